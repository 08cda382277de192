//! Durable FIFO of session writes that could not be delivered.
//!
//! The whole queue is serialized as one JSON array under a single store key
//! and rewritten after every mutation, so a reload always sees a complete
//! snapshot. Insertion order is replay order.
//!
//! Each entry carries a typed `QueuedOperation` decided when it is enqueued;
//! the HTTP method, endpoint and body are derived from it. Records written in
//! the older untyped `{endpoint, method, body}` shape are classified once on
//! load.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::client::{batch_path, session_path, validate_session_id, SESSIONS_PATH};
use crate::http::HttpMethod;
use crate::store::Store;
use crate::types::{NewSession, SessionType};

/// Error type for queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The method/endpoint pair does not map to a replayable session write.
    #[error("cannot queue {method} {endpoint}: not a replayable session write")]
    Unclassified { method: HttpMethod, endpoint: String },

    /// The endpoint was recognized but the body does not fit it.
    #[error("invalid body for {method} {endpoint}: {reason}")]
    InvalidBody {
        method: HttpMethod,
        endpoint: String,
        reason: String,
    },
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// A session write waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueuedOperation {
    CreateSession {
        /// Client-assigned id handed to the UI while the creation is pending.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        local_id: Option<String>,
        session: NewSession,
    },
    CompleteSession {
        session_id: String,
        end_time: DateTime<Utc>,
    },
    DeleteSession {
        session_id: String,
    },
    BatchUpload {
        sessions: Vec<NewSession>,
    },
}

impl QueuedOperation {
    pub fn method(&self) -> HttpMethod {
        match self {
            QueuedOperation::CreateSession { .. } | QueuedOperation::BatchUpload { .. } => HttpMethod::Post,
            QueuedOperation::CompleteSession { .. } => HttpMethod::Put,
            QueuedOperation::DeleteSession { .. } => HttpMethod::Delete,
        }
    }

    pub fn endpoint(&self) -> String {
        match self {
            QueuedOperation::CreateSession { .. } => SESSIONS_PATH.to_string(),
            QueuedOperation::CompleteSession { session_id, .. }
            | QueuedOperation::DeleteSession { session_id } => session_path(session_id),
            QueuedOperation::BatchUpload { .. } => batch_path(),
        }
    }

    /// JSON body as it goes on the wire.
    pub fn body(&self) -> Option<Value> {
        match self {
            QueuedOperation::CreateSession { session, .. } => serde_json::to_value(session).ok(),
            QueuedOperation::CompleteSession { end_time, .. } => Some(serde_json::json!({
                "completed": true,
                "endTime": end_time,
            })),
            QueuedOperation::DeleteSession { .. } => None,
            QueuedOperation::BatchUpload { sessions } => Some(serde_json::json!({ "sessions": sessions })),
        }
    }

    /// Existing session this write targets.
    pub fn target_session(&self) -> Option<&str> {
        match self {
            QueuedOperation::CompleteSession { session_id, .. }
            | QueuedOperation::DeleteSession { session_id } => Some(session_id),
            _ => None,
        }
    }

    /// Client-assigned id of a pending creation.
    pub fn local_session(&self) -> Option<&str> {
        match self {
            QueuedOperation::CreateSession { local_id, .. } => local_id.as_deref(),
            _ => None,
        }
    }

    /// Point a write aimed at `from` to `to`. Returns whether it changed.
    pub fn rebind(&mut self, from: &str, to: &str) -> bool {
        match self {
            QueuedOperation::CompleteSession { session_id, .. }
            | QueuedOperation::DeleteSession { session_id }
                if session_id == from =>
            {
                *session_id = to.to_string();
                true
            }
            _ => false,
        }
    }

    /// Decide the operation for a raw method/endpoint/body triple.
    ///
    /// `endpoint` may be a path or a full URL; the segments after `sessions`
    /// select the operation.
    pub fn classify(method: HttpMethod, endpoint: &str, body: Option<&Value>) -> QueueResult<Self> {
        let unclassified = || QueueError::Unclassified {
            method,
            endpoint: endpoint.to_string(),
        };
        let invalid = |reason: String| QueueError::InvalidBody {
            method,
            endpoint: endpoint.to_string(),
            reason,
        };

        let path = endpoint.split(['?', '#']).next().unwrap_or("");
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let pos = segments
            .iter()
            .position(|s| *s == "sessions")
            .ok_or_else(unclassified)?;
        let rest = &segments[pos + 1..];

        match (method, rest) {
            (HttpMethod::Post, []) => {
                let body: CreateBody = decode_body(body).map_err(invalid)?;
                if body.duration == 0 {
                    return Err(invalid("duration must be positive".to_string()));
                }
                Ok(QueuedOperation::CreateSession {
                    local_id: None,
                    session: NewSession {
                        duration: body.duration,
                        session_type: body.session_type,
                        start_time: body.start_time.unwrap_or_else(Utc::now),
                        end_time: body.end_time,
                    },
                })
            }
            (HttpMethod::Post, ["batch"]) => {
                let body: BatchBody = decode_body(body).map_err(invalid)?;
                if body.sessions.is_empty() || body.sessions.iter().any(|s| s.duration == 0) {
                    return Err(invalid("batch needs sessions with positive durations".to_string()));
                }
                Ok(QueuedOperation::BatchUpload {
                    sessions: body.sessions,
                })
            }
            (HttpMethod::Put, [id]) if !is_reserved(id) => {
                validate_session_id(id).map_err(|e| invalid(e.to_string()))?;
                let end_time = match body {
                    Some(body) => {
                        let body: CompleteBody =
                            serde_json::from_value(body.clone()).map_err(|e| invalid(e.to_string()))?;
                        body.end_time
                    }
                    None => None,
                };
                Ok(QueuedOperation::CompleteSession {
                    session_id: id.to_string(),
                    end_time: end_time.unwrap_or_else(Utc::now),
                })
            }
            (HttpMethod::Delete, [id]) if !is_reserved(id) => {
                validate_session_id(id).map_err(|e| invalid(e.to_string()))?;
                Ok(QueuedOperation::DeleteSession {
                    session_id: id.to_string(),
                })
            }
            _ => Err(unclassified()),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody {
    duration: u32,
    #[serde(rename = "type")]
    session_type: SessionType,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    end_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct BatchBody {
    sessions: Vec<NewSession>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteBody {
    #[serde(default)]
    end_time: Option<DateTime<Utc>>,
}

fn is_reserved(segment: &str) -> bool {
    matches!(segment, "stats" | "batch")
}

fn decode_body<T: serde::de::DeserializeOwned>(body: Option<&Value>) -> Result<T, String> {
    let body = body.ok_or_else(|| "missing body".to_string())?;
    serde_json::from_value(body.clone()).map_err(|e| e.to_string())
}

/// One pending write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// Random UUID, unique within the queue.
    pub id: String,
    /// Milliseconds since the Unix epoch at enqueue time.
    pub timestamp: i64,
    pub operation: QueuedOperation,
}

impl QueuedRequest {
    pub fn new(operation: QueuedOperation) -> Self {
        QueuedRequest {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().timestamp_millis(),
            operation,
        }
    }

    pub fn method(&self) -> HttpMethod {
        self.operation.method()
    }

    pub fn endpoint(&self) -> String {
        self.operation.endpoint()
    }

    pub fn body(&self) -> Option<Value> {
        self.operation.body()
    }
}

/// Untyped entry shape written by earlier app versions.
#[derive(Deserialize)]
struct LegacyRequest {
    id: String,
    endpoint: String,
    method: HttpMethod,
    #[serde(default)]
    body: Option<Value>,
    timestamp: i64,
}

fn decode_entry(value: Value) -> Option<QueuedRequest> {
    if let Ok(request) = serde_json::from_value::<QueuedRequest>(value.clone()) {
        return Some(request);
    }
    let legacy: LegacyRequest = match serde_json::from_value(value) {
        Ok(legacy) => legacy,
        Err(e) => {
            warn!(error = %e, "dropping unreadable queue entry");
            return None;
        }
    };
    match QueuedOperation::classify(legacy.method, &legacy.endpoint, legacy.body.as_ref()) {
        Ok(operation) => Some(QueuedRequest {
            id: legacy.id,
            timestamp: legacy.timestamp,
            operation,
        }),
        Err(e) => {
            warn!(id = %legacy.id, error = %e, "dropping legacy queue entry");
            None
        }
    }
}

fn decode_entries(raw: &str) -> Vec<QueuedRequest> {
    let values: Vec<Value> = match serde_json::from_str(raw) {
        Ok(values) => values,
        Err(e) => {
            warn!(error = %e, "persisted request queue is corrupt, starting empty");
            return Vec::new();
        }
    };
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter_map(decode_entry)
        .filter(|entry| seen.insert(entry.id.clone()))
        .collect()
}

/// Durable FIFO of pending writes.
///
/// The in-memory list is authoritative; the store holds a best-effort mirror.
/// A failed persist is logged and the next successful one catches up.
pub struct RequestQueue {
    store: Arc<dyn Store>,
    key: String,
    entries: Vec<QueuedRequest>,
}

impl RequestQueue {
    /// Hydrate the queue stored under `key`. Missing, unreadable or corrupt
    /// records yield an empty queue.
    pub async fn load(store: Arc<dyn Store>, key: &str) -> Self {
        let entries = match store.get(key).await {
            Ok(Some(raw)) => decode_entries(&raw),
            Ok(None) => Vec::new(),
            Err(e) => {
                error!(key, error = %e, "could not read request queue");
                Vec::new()
            }
        };
        if !entries.is_empty() {
            info!(count = entries.len(), "hydrated request queue");
        }
        Self {
            store,
            key: key.to_string(),
            entries,
        }
    }

    /// Pending entries in replay order.
    pub fn entries(&self) -> &[QueuedRequest] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append `operation` and persist.
    pub async fn enqueue(&mut self, operation: QueuedOperation) -> QueuedRequest {
        let request = QueuedRequest::new(operation);
        self.entries.push(request.clone());
        self.persist().await;
        info!(
            id = %request.id,
            method = %request.method(),
            endpoint = %request.endpoint(),
            "request queued for later"
        );
        request
    }

    /// Classify a raw write and append it.
    pub async fn enqueue_request(
        &mut self,
        endpoint: &str,
        method: HttpMethod,
        body: Option<Value>,
    ) -> QueueResult<QueuedRequest> {
        let operation = QueuedOperation::classify(method, endpoint, body.as_ref())?;
        Ok(self.enqueue(operation).await)
    }

    /// Remove the entries whose id is in `ids`.
    pub async fn dequeue_processed(&mut self, ids: &HashSet<String>) -> usize {
        self.settle(ids, &HashMap::new()).await
    }

    /// Remove processed entries and point retained writes at rebound session
    /// ids, in one persist. Relative order of retained entries is unchanged.
    /// Returns how many entries were removed.
    pub async fn settle(&mut self, processed: &HashSet<String>, rebinds: &HashMap<String, String>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| !processed.contains(&entry.id));
        let removed = before - self.entries.len();

        let mut rebound = false;
        for entry in &mut self.entries {
            for (from, to) in rebinds {
                rebound |= entry.operation.rebind(from, to);
            }
        }

        if removed > 0 || rebound {
            self.persist().await;
        }
        removed
    }

    /// Drop entries older than `max_age`. Returns how many were dropped.
    pub async fn purge_older_than(&mut self, max_age: Duration) -> usize {
        self.purge_older_than_at(max_age, Utc::now().timestamp_millis()).await
    }

    async fn purge_older_than_at(&mut self, max_age: Duration, now_ms: i64) -> usize {
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms.saturating_sub(max_age_ms);
        let before = self.entries.len();
        self.entries.retain(|entry| entry.timestamp > cutoff);
        let purged = before - self.entries.len();
        if purged > 0 {
            self.persist().await;
            info!(purged, "cleaned up old queued requests");
        }
        purged
    }

    /// Empty the queue and delete the persisted record.
    pub async fn clear(&mut self) {
        self.entries.clear();
        if let Err(e) = self.store.remove(&self.key).await {
            error!(key = %self.key, error = %e, "could not remove persisted request queue");
        }
    }

    async fn persist(&self) {
        let raw = match serde_json::to_string(&self.entries) {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "could not serialize request queue");
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key, raw).await {
            error!(key = %self.key, error = %e, "could not persist request queue");
        }
    }
}

/// Durable map from client-assigned session ids to the ids the server gave
/// their creations on replay.
///
/// A session created offline is known to the host by its local id. Once the
/// queued creation lands, later writes for that session must go to the
/// server id, including writes issued long after the drain that created it.
pub struct SessionIdMap {
    store: Arc<dyn Store>,
    key: String,
    ids: HashMap<String, String>,
}

impl SessionIdMap {
    /// Hydrate the map stored under `key`. Missing or corrupt records yield
    /// an empty map.
    pub async fn load(store: Arc<dyn Store>, key: &str) -> Self {
        let ids = match store.get(key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(key, error = %e, "persisted session id map is corrupt, starting empty");
                HashMap::new()
            }),
            Ok(None) => HashMap::new(),
            Err(e) => {
                error!(key, error = %e, "could not read session id map");
                HashMap::new()
            }
        };
        Self {
            store,
            key: key.to_string(),
            ids,
        }
    }

    /// The server id for `id`, or `id` itself when it was never rebound.
    pub fn resolve<'a>(&'a self, id: &'a str) -> &'a str {
        self.ids.get(id).map(String::as_str).unwrap_or(id)
    }

    pub fn ids(&self) -> &HashMap<String, String> {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Add `local -> server` pairs and persist.
    pub async fn record(&mut self, pairs: &HashMap<String, String>) {
        if pairs.is_empty() {
            return;
        }
        self.ids
            .extend(pairs.iter().map(|(local, server)| (local.clone(), server.clone())));
        self.persist().await;
    }

    /// Drop every local id bound to `server_id`, once the session is gone.
    pub async fn forget_server_id(&mut self, server_id: &str) {
        let before = self.ids.len();
        self.ids.retain(|_, server| server != server_id);
        if self.ids.len() != before {
            self.persist().await;
        }
    }

    async fn persist(&self) {
        let raw = match serde_json::to_string(&self.ids) {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "could not serialize session id map");
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key, raw).await {
            error!(key = %self.key, error = %e, "could not persist session id map");
        }
    }
}
