//! Stateless HTTP request builder and response parser for the session API.
//!
//! # Design
//! `SessionClient` holds only a `base_url` and carries no mutable state between
//! calls. Each operation is split into a `build_*` method that produces an
//! `HttpRequest` and a `parse_*` method that consumes an `HttpResponse`.
//! Retrying, timeouts and mock mode live one layer up in `SessionApi`; this
//! layer stays deterministic and free of I/O.
//!
//! Input validation happens in the `build_*` methods so a bad duration or
//! session id never reaches the network.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::types::{
    ApiResponse, BatchOutcome, BatchUpload, DeletePayload, NewSession, SessionCompletion, SessionList,
    SessionPayload, StatsPayload,
};

/// Collection endpoint for sessions.
pub const SESSIONS_PATH: &str = "/sessions";

/// Path of a single session.
pub fn session_path(id: &str) -> String {
    format!("{SESSIONS_PATH}/{id}")
}

/// Path of the stats endpoint.
pub fn stats_path() -> String {
    format!("{SESSIONS_PATH}/stats")
}

/// Path of the batch upload endpoint.
pub fn batch_path() -> String {
    format!("{SESSIONS_PATH}/batch")
}

/// Reject zero-length sessions.
pub fn validate_duration(duration: u32) -> ApiResult<()> {
    if duration == 0 {
        return Err(ApiError::Validation("duration must be a positive number of minutes".to_string()));
    }
    Ok(())
}

/// Session ids are embedded in URL paths, so they must be non-empty and
/// free of separators and whitespace.
pub fn validate_session_id(id: &str) -> ApiResult<()> {
    if id.trim().is_empty() {
        return Err(ApiError::Validation("session id must not be empty".to_string()));
    }
    if id.contains(['/', '?', '#']) || id.chars().any(char::is_whitespace) {
        return Err(ApiError::Validation(format!("session id {id:?} is not a valid identifier")));
    }
    Ok(())
}

/// Synchronous, stateless client for the session API.
#[derive(Debug, Clone)]
pub struct SessionClient {
    base_url: String,
}

impl SessionClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build_create_session(&self, input: &NewSession, token: Option<&str>) -> ApiResult<HttpRequest> {
        validate_duration(input.duration)?;
        self.json_request(HttpMethod::Post, SESSIONS_PATH, input, token)
    }

    pub fn build_complete_session(
        &self,
        id: &str,
        completion: &SessionCompletion,
        token: Option<&str>,
    ) -> ApiResult<HttpRequest> {
        validate_session_id(id)?;
        self.json_request(HttpMethod::Put, &session_path(id), completion, token)
    }

    pub fn build_list_sessions(&self, token: Option<&str>) -> HttpRequest {
        self.request(HttpMethod::Get, SESSIONS_PATH, token)
    }

    pub fn build_get_stats(&self, token: Option<&str>) -> HttpRequest {
        self.request(HttpMethod::Get, &stats_path(), token)
    }

    pub fn build_delete_session(&self, id: &str, token: Option<&str>) -> ApiResult<HttpRequest> {
        validate_session_id(id)?;
        Ok(self.request(HttpMethod::Delete, &session_path(id), token))
    }

    pub fn build_batch_upload(&self, sessions: &[NewSession], token: Option<&str>) -> ApiResult<HttpRequest> {
        if sessions.is_empty() {
            return Err(ApiError::Validation("batch upload needs at least one session".to_string()));
        }
        for session in sessions {
            validate_duration(session.duration)?;
        }
        let body = BatchUpload {
            sessions: sessions.to_vec(),
        };
        self.json_request(HttpMethod::Post, &batch_path(), &body, token)
    }

    pub fn parse_create_session(&self, response: HttpResponse) -> ApiResult<ApiResponse<SessionPayload>> {
        parse_envelope(response)
    }

    pub fn parse_complete_session(&self, response: HttpResponse) -> ApiResult<ApiResponse<SessionPayload>> {
        parse_envelope(response)
    }

    pub fn parse_list_sessions(&self, response: HttpResponse) -> ApiResult<ApiResponse<SessionList>> {
        parse_envelope(response)
    }

    pub fn parse_get_stats(&self, response: HttpResponse) -> ApiResult<ApiResponse<StatsPayload>> {
        parse_envelope(response)
    }

    pub fn parse_delete_session(&self, response: HttpResponse) -> ApiResult<ApiResponse<DeletePayload>> {
        parse_envelope(response)
    }

    pub fn parse_batch_upload(&self, response: HttpResponse) -> ApiResult<ApiResponse<BatchOutcome>> {
        parse_envelope(response)
    }

    fn request(&self, method: HttpMethod, path: &str, token: Option<&str>) -> HttpRequest {
        let mut headers = Vec::new();
        if let Some(token) = token {
            headers.push(("authorization".to_string(), format!("Bearer {token}")));
        }
        HttpRequest {
            method,
            url: format!("{}{path}", self.base_url),
            headers,
            body: None,
        }
    }

    fn json_request<B: Serialize>(
        &self,
        method: HttpMethod,
        path: &str,
        body: &B,
        token: Option<&str>,
    ) -> ApiResult<HttpRequest> {
        let body = serde_json::to_string(body).map_err(|e| ApiError::SerializationError(e.to_string()))?;
        let mut request = self.request(method, path, token);
        request
            .headers
            .insert(0, ("content-type".to_string(), "application/json".to_string()));
        request.body = Some(body);
        Ok(request)
    }
}

/// Map non-success status codes to the appropriate `ApiError` variant.
fn check_status(response: &HttpResponse) -> ApiResult<()> {
    if response.is_success() {
        return Ok(());
    }
    if response.status == 404 {
        return Err(ApiError::NotFound);
    }
    Err(ApiError::HttpError {
        status: response.status,
        body: response.body.clone(),
    })
}

/// Decode an envelope, turning `success: false` into `Rejected`.
fn parse_envelope<T: DeserializeOwned>(response: HttpResponse) -> ApiResult<ApiResponse<T>> {
    check_status(&response)?;
    let value: serde_json::Value =
        serde_json::from_str(&response.body).map_err(|e| ApiError::DeserializationError(e.to_string()))?;

    if value.get("success").and_then(serde_json::Value::as_bool) == Some(false) {
        let reason = value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("no reason given");
        return Err(ApiError::Rejected(reason.to_string()));
    }

    serde_json::from_value(value).map_err(|e| ApiError::DeserializationError(e.to_string()))
}
