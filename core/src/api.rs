//! Retrying, timeout-bounded façade over the session endpoints.
//!
//! # Design
//! `SessionApi` wraps the stateless `SessionClient` with the I/O policy:
//! - every attempt races the transport call against `ApiConfig::timeout`;
//! - a failed attempt (timeout, transport error, non-2xx, bad body) is retried
//!   up to `retry_attempts` times with a fixed `retry_delay` in between;
//! - in mock mode no request is ever built or sent, responses are synthesized
//!   locally with fresh UUIDs and current timestamps.
//!
//! Validation failures are returned before any retry or mock handling.
//! Exhausted retries always surface as an error here; queuing failed writes
//! for later replay is the sync engine's job.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::{validate_duration, validate_session_id, SessionClient};
use crate::config::{ApiConfig, AUTH_TOKEN_KEY};
use crate::error::{ApiError, ApiResult};
use crate::http::{HttpRequest, HttpResponse, Transport};
use crate::store::Store;
use crate::types::{
    ApiResponse, BatchOutcome, DeletePayload, NewSession, Session, SessionCompletion, SessionList,
    SessionPayload, SessionStats, SessionType, StatsPayload,
};

/// Duration reported by mock completions, which have no server record to
/// read the real one from.
const MOCK_COMPLETION_MINUTES: u32 = 25;

/// Async session API with retry and mock fallback.
#[derive(Clone)]
pub struct SessionApi {
    config: ApiConfig,
    client: SessionClient,
    transport: Arc<dyn Transport>,
    store: Arc<dyn Store>,
}

impl SessionApi {
    pub fn new(config: ApiConfig, transport: Arc<dyn Transport>, store: Arc<dyn Store>) -> Self {
        let client = SessionClient::new(&config.base_url);
        Self {
            config,
            client,
            transport,
            store,
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn is_mock(&self) -> bool {
        self.config.is_mock()
    }

    /// Create a session starting now.
    pub async fn create(&self, duration: u32, session_type: SessionType) -> ApiResult<ApiResponse<SessionPayload>> {
        self.create_from(&NewSession::starting_now(duration, session_type)).await
    }

    /// Create a session from a prepared payload, keeping its start time.
    pub async fn create_from(&self, input: &NewSession) -> ApiResult<ApiResponse<SessionPayload>> {
        validate_duration(input.duration)?;
        if self.is_mock() {
            let session = Session::local(Uuid::new_v4().to_string(), input, Utc::now());
            return Ok(ApiResponse::ok(
                SessionPayload { session },
                "Session created successfully (mock)",
            ));
        }

        let token = self.auth_token().await;
        let request = self.client.build_create_session(input, token.as_deref())?;
        self.send(request, |r| self.client.parse_create_session(r)).await
    }

    /// Mark a session completed now.
    pub async fn complete(&self, session_id: &str) -> ApiResult<ApiResponse<SessionPayload>> {
        self.complete_at(session_id, Utc::now()).await
    }

    /// Mark a session completed at `end_time`.
    pub async fn complete_at(
        &self,
        session_id: &str,
        end_time: DateTime<Utc>,
    ) -> ApiResult<ApiResponse<SessionPayload>> {
        validate_session_id(session_id)?;
        if self.is_mock() {
            let session = Session {
                id: session_id.to_string(),
                duration: MOCK_COMPLETION_MINUTES,
                session_type: SessionType::Work,
                completed: true,
                start_time: end_time - ChronoDuration::minutes(i64::from(MOCK_COMPLETION_MINUTES)),
                end_time: Some(end_time),
                created_at: Utc::now(),
            };
            return Ok(ApiResponse::ok(
                SessionPayload { session },
                "Session completed successfully (mock)",
            ));
        }

        let completion = SessionCompletion {
            completed: true,
            end_time,
        };
        let token = self.auth_token().await;
        let request = self
            .client
            .build_complete_session(session_id, &completion, token.as_deref())?;
        self.send(request, |r| self.client.parse_complete_session(r)).await
    }

    pub async fn get_all(&self) -> ApiResult<ApiResponse<SessionList>> {
        if self.is_mock() {
            return Ok(ApiResponse::ok(
                SessionList { sessions: Vec::new() },
                "No sessions found (mock)",
            ));
        }

        let token = self.auth_token().await;
        let request = self.client.build_list_sessions(token.as_deref());
        self.send(request, |r| self.client.parse_list_sessions(r)).await
    }

    pub async fn get_stats(&self) -> ApiResult<ApiResponse<StatsPayload>> {
        if self.is_mock() {
            return Ok(ApiResponse::ok(
                StatsPayload {
                    stats: SessionStats::default(),
                },
                "Stats retrieved successfully (mock)",
            ));
        }

        let token = self.auth_token().await;
        let request = self.client.build_get_stats(token.as_deref());
        self.send(request, |r| self.client.parse_get_stats(r)).await
    }

    pub async fn delete(&self, session_id: &str) -> ApiResult<ApiResponse<DeletePayload>> {
        validate_session_id(session_id)?;
        if self.is_mock() {
            return Ok(ApiResponse::ok(
                DeletePayload { deleted: true },
                "Session deleted successfully (mock)",
            ));
        }

        let token = self.auth_token().await;
        let request = self.client.build_delete_session(session_id, token.as_deref())?;
        self.send(request, |r| self.client.parse_delete_session(r)).await
    }

    pub async fn batch_upload(&self, sessions: &[NewSession]) -> ApiResult<ApiResponse<BatchOutcome>> {
        if self.is_mock() {
            for session in sessions {
                validate_duration(session.duration)?;
            }
            let uploaded = u32::try_from(sessions.len()).unwrap_or(u32::MAX);
            return Ok(ApiResponse::ok(
                BatchOutcome { uploaded, failed: 0 },
                "Batch upload completed successfully (mock)",
            ));
        }

        let token = self.auth_token().await;
        let request = self.client.build_batch_upload(sessions, token.as_deref())?;
        self.send(request, |r| self.client.parse_batch_upload(r)).await
    }

    /// Bearer token from the store. A missing or unreadable token is not an
    /// error at this layer; the request simply goes out unauthenticated.
    async fn auth_token(&self) -> Option<String> {
        match self.store.get(AUTH_TOKEN_KEY).await {
            Ok(token) => token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "could not read auth token");
                None
            }
        }
    }

    /// Run `request` with the timeout and retry policy, parsing each response
    /// with `parse`. A parse failure counts as a failed attempt.
    async fn send<T, P>(&self, request: HttpRequest, parse: P) -> ApiResult<T>
    where
        P: Fn(HttpResponse) -> ApiResult<T>,
    {
        let max_attempts = self.config.max_attempts();
        let mut attempt = 1;
        loop {
            if self.config.enable_logging {
                debug!(method = %request.method, url = %request.url, attempt, body = ?request.body, "api request");
            }

            let result = match self.attempt(request.clone()).await {
                Ok(response) => {
                    if self.config.enable_logging {
                        debug!(
                            method = %request.method,
                            url = %request.url,
                            status = response.status,
                            body = %response.body,
                            "api response"
                        );
                    }
                    parse(response)
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= max_attempts => {
                    if self.config.enable_logging {
                        warn!(method = %request.method, url = %request.url, attempts = attempt, error = %e, "api request failed, giving up");
                    }
                    return Err(e);
                }
                Err(e) => {
                    if self.config.enable_logging {
                        warn!(method = %request.method, url = %request.url, attempt, error = %e, "api request failed, retrying");
                    }
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, request: HttpRequest) -> ApiResult<HttpResponse> {
        match tokio::time::timeout(self.config.timeout, self.transport.execute(request)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ApiError::Timeout(self.config.timeout)),
        }
    }
}
