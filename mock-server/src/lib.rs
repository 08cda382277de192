use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{info, warn};
use uuid::Uuid;

const SESSION_TYPES: [&str; 3] = ["work", "short-break", "long-break"];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub duration: u32,
    #[serde(rename = "type")]
    pub session_type: String,
    pub completed: bool,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSession {
    pub duration: i64,
    #[serde(rename = "type")]
    pub session_type: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteSession {
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct BatchUpload {
    pub sessions: Vec<Value>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_sessions: u64,
    pub completed_sessions: u64,
    pub total_minutes: u64,
    pub work_sessions: u64,
    pub break_sessions: u64,
    pub completion_rate: f64,
}

/// Sessions plus the outage switch.
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    available: Arc<AtomicBool>,
}

impl Default for AppState {
    fn default() -> Self {
        AppState {
            sessions: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl AppState {
    /// While unavailable every route answers 503.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

pub fn app() -> Router {
    router(AppState::default())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/stats", get(get_stats))
        .route("/sessions/batch", post(batch_upload))
        .route("/sessions/{id}", put(complete_session).delete(delete_session))
        .layer(middleware::from_fn_with_state(state.clone(), availability))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    serve(listener, AppState::default()).await
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state)).await
}

fn envelope(data: Value, message: &str) -> Json<Value> {
    Json(json!({ "success": true, "data": data, "message": message }))
}

fn failure(status: StatusCode, error: impl Into<String>) -> Response {
    let error = error.into();
    (status, Json(json!({ "success": false, "error": error }))).into_response()
}

async fn availability(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.is_available() {
        warn!(uri = %request.uri(), "simulated outage");
        return failure(StatusCode::SERVICE_UNAVAILABLE, "service unavailable");
    }
    next.run(request).await
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "OK", "timestamp": Utc::now() }))
}

fn validate(input: &CreateSession) -> Result<u32, String> {
    let duration = u32::try_from(input.duration)
        .ok()
        .filter(|d| *d > 0)
        .ok_or_else(|| format!("duration must be a positive number of minutes, got {}", input.duration))?;
    if !SESSION_TYPES.contains(&input.session_type.as_str()) {
        return Err(format!("unknown session type {:?}", input.session_type));
    }
    Ok(duration)
}

fn new_session(input: CreateSession, duration: u32) -> Session {
    let now = Utc::now();
    let start_time = input.start_time.unwrap_or(now);
    Session {
        id: Uuid::new_v4().to_string(),
        duration,
        session_type: input.session_type,
        completed: input.end_time.is_some(),
        start_time,
        end_time: input.end_time.map(|end| end.max(start_time)),
        created_at: now,
    }
}

async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let mut sessions: Vec<Session> = state.sessions.read().await.values().cloned().collect();
    sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    envelope(json!({ "sessions": sessions }), "Sessions retrieved successfully")
}

async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<CreateSession>, JsonRejection>,
) -> Response {
    let input = match payload {
        Ok(Json(input)) => input,
        Err(rejection) => return failure(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let duration = match validate(&input) {
        Ok(duration) => duration,
        Err(reason) => return failure(StatusCode::BAD_REQUEST, reason),
    };

    let session = new_session(input, duration);
    info!(id = %session.id, duration, kind = %session.session_type, "session created");
    state.sessions.write().await.insert(session.id.clone(), session.clone());
    (
        StatusCode::CREATED,
        envelope(json!({ "session": session }), "Session created successfully"),
    )
        .into_response()
}

async fn complete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<CompleteSession>, JsonRejection>,
) -> Response {
    let end_time = match payload {
        Ok(Json(input)) => input.end_time,
        Err(rejection) => return failure(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let mut sessions = state.sessions.write().await;
    let Some(session) = sessions.get_mut(&id) else {
        return failure(StatusCode::NOT_FOUND, "Session not found");
    };
    if session.completed {
        return failure(StatusCode::BAD_REQUEST, "Session already completed");
    }
    session.completed = true;
    session.end_time = Some(end_time.unwrap_or_else(Utc::now).max(session.start_time));
    info!(id = %id, "session completed");
    envelope(json!({ "session": session }), "Session completed successfully").into_response()
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.sessions.write().await.remove(&id) {
        Some(_) => envelope(json!({ "deleted": true }), "Session deleted successfully").into_response(),
        None => failure(StatusCode::NOT_FOUND, "Session not found"),
    }
}

async fn get_stats(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.sessions.read().await;
    let stats = compute_stats(sessions.values());
    envelope(json!({ "stats": stats }), "Stats retrieved successfully")
}

/// Minutes and per-kind counts only include completed sessions.
pub fn compute_stats<'a>(sessions: impl Iterator<Item = &'a Session>) -> Stats {
    let mut stats = Stats::default();
    for session in sessions {
        stats.total_sessions += 1;
        if !session.completed {
            continue;
        }
        stats.completed_sessions += 1;
        stats.total_minutes += u64::from(session.duration);
        if session.session_type == "work" {
            stats.work_sessions += 1;
        } else {
            stats.break_sessions += 1;
        }
    }
    if stats.total_sessions > 0 {
        stats.completion_rate = stats.completed_sessions as f64 / stats.total_sessions as f64 * 100.0;
    }
    stats
}

async fn batch_upload(
    State(state): State<AppState>,
    payload: Result<Json<BatchUpload>, JsonRejection>,
) -> Response {
    let batch = match payload {
        Ok(Json(batch)) => batch,
        Err(rejection) => return failure(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let mut uploaded = 0u32;
    let mut failed = 0u32;
    let mut sessions = state.sessions.write().await;
    for raw in batch.sessions {
        let accepted = serde_json::from_value::<CreateSession>(raw)
            .ok()
            .and_then(|input| validate(&input).ok().map(|duration| new_session(input, duration)));
        match accepted {
            Some(session) => {
                sessions.insert(session.id.clone(), session);
                uploaded += 1;
            }
            None => failed += 1,
        }
    }
    info!(uploaded, failed, "batch upload");
    envelope(
        json!({ "uploaded": uploaded, "failed": failed }),
        "Batch upload completed successfully",
    )
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(kind: &str, duration: u32, completed: bool) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4().to_string(),
            duration,
            session_type: kind.to_string(),
            completed,
            start_time: now,
            end_time: completed.then_some(now),
            created_at: now,
        }
    }

    #[test]
    fn session_serializes_camel_case() {
        let json = serde_json::to_value(session("short-break", 5, false)).unwrap();
        assert_eq!(json["type"], "short-break");
        assert!(json["startTime"].is_string());
        assert!(json.get("endTime").is_none());
    }

    #[test]
    fn validate_rejects_bad_duration_and_type() {
        let input = |duration: i64, kind: &str| CreateSession {
            duration,
            session_type: kind.to_string(),
            start_time: None,
            end_time: None,
        };
        assert_eq!(validate(&input(25, "work")), Ok(25));
        assert!(validate(&input(0, "work")).is_err());
        assert!(validate(&input(-5, "work")).is_err());
        assert!(validate(&input(25, "nap")).is_err());
    }

    #[test]
    fn stats_count_completed_minutes_only() {
        let sessions = [
            session("work", 25, true),
            session("work", 25, false),
            session("short-break", 5, true),
            session("long-break", 15, false),
        ];
        let stats = compute_stats(sessions.iter());
        assert_eq!(stats.total_sessions, 4);
        assert_eq!(stats.completed_sessions, 2);
        assert_eq!(stats.total_minutes, 30);
        assert_eq!(stats.work_sessions, 1);
        assert_eq!(stats.break_sessions, 1);
        assert_eq!(stats.completion_rate, 50.0);
    }

    #[test]
    fn stats_of_nothing_are_zero() {
        assert_eq!(compute_stats(std::iter::empty()), Stats::default());
    }

    #[test]
    fn batch_entries_with_end_time_are_completed() {
        let start: DateTime<Utc> = "2024-05-01T09:00:00Z".parse().unwrap();
        let end: DateTime<Utc> = "2024-05-01T08:00:00Z".parse().unwrap();
        let input = CreateSession {
            duration: 25,
            session_type: "work".to_string(),
            start_time: Some(start),
            end_time: Some(end),
        };
        let created = new_session(input, 25);
        assert!(created.completed);
        assert_eq!(created.end_time, Some(start));
    }
}
