//! Sync engine: probe, queue and replay session writes.
//!
//! # Design
//! The engine owns the request queue behind a `tokio::sync::Mutex` and holds
//! a separate drain guard. A drain takes the guard with `try_lock`, so an
//! overlapping call returns immediately with a `skipped` report instead of
//! waiting. The queue lock is only held for snapshotting and settling, never
//! across network calls, so writes can keep enqueuing during a drain.
//!
//! Replay is FIFO over a snapshot. Successes are removed in one `settle` at
//! the end; failures stay in place. Writes aimed at a session whose queued
//! creation (or an earlier write) failed in the same cycle are deferred, and
//! writes aimed at a session created earlier in the cycle are sent with the
//! server id and rebound in the queue.
//!
//! Every local to server id pair learned in a drain is also kept in a
//! durable `SessionIdMap`, so a write issued after the drain, or after a
//! restart, still reaches the server session.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::SessionApi;
use crate::config::{ApiConfig, QUEUE_KEY, SESSION_ID_MAP_KEY};
use crate::connectivity::{ConnectivityProber, ConnectivityState};
use crate::error::{ApiError, ApiResult};
use crate::http::{HttpMethod, Transport};
use crate::queue::{QueueResult, QueuedOperation, QueuedRequest, RequestQueue, SessionIdMap};
use crate::store::Store;
use crate::types::{NewSession, Session, SessionType};

/// Where the engine is in a drain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncState {
    Idle = 0,
    Probing = 1,
    Draining = 2,
}

impl SyncState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SyncState::Probing,
            2 => SyncState::Draining,
            _ => SyncState::Idle,
        }
    }
}

/// Summary of one `process_queued_requests` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries dispatched to the API.
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Entries held back because an earlier write to the same session failed.
    pub deferred: usize,
    /// Another drain was already running.
    pub skipped: bool,
    /// The probe reported offline; nothing was dispatched.
    pub offline: bool,
    /// Queue length after the cycle.
    pub remaining: usize,
    /// Client-assigned session ids whose creation landed in this cycle,
    /// mapped to the server ids. Hosts holding a local copy should adopt them.
    pub rebound: HashMap<String, String>,
}

/// Result of a write that may have been deferred to the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
    /// The server accepted the write.
    Synced(T),
    /// The write failed and was queued; `local` is the client-side view.
    Queued { request_id: String, local: T },
}

impl<T> WriteOutcome<T> {
    pub fn value(&self) -> &T {
        match self {
            WriteOutcome::Synced(value) | WriteOutcome::Queued { local: value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            WriteOutcome::Synced(value) | WriteOutcome::Queued { local: value, .. } => value,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, WriteOutcome::Queued { .. })
    }
}

/// Resets the engine state to idle when a drain ends, however it ends.
struct IdleOnDrop<'a>(&'a AtomicU8);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(SyncState::Idle as u8, Ordering::SeqCst);
    }
}

/// Offline-tolerant front for session writes.
pub struct SyncEngine {
    api: SessionApi,
    prober: ConnectivityProber,
    queue: Mutex<RequestQueue>,
    session_ids: Mutex<SessionIdMap>,
    drain_guard: Mutex<()>,
    state: AtomicU8,
    max_queue_age: Duration,
}

impl SyncEngine {
    pub fn new(
        api: SessionApi,
        prober: ConnectivityProber,
        queue: RequestQueue,
        session_ids: SessionIdMap,
    ) -> Self {
        let max_queue_age = api.config().max_queue_age;
        Self {
            api,
            prober,
            queue: Mutex::new(queue),
            session_ids: Mutex::new(session_ids),
            drain_guard: Mutex::new(()),
            state: AtomicU8::new(SyncState::Idle as u8),
            max_queue_age,
        }
    }

    /// Wire an engine from config, hydrating the queue from `store`.
    pub async fn open(config: ApiConfig, transport: Arc<dyn Transport>, store: Arc<dyn Store>) -> Self {
        let queue = RequestQueue::load(Arc::clone(&store), QUEUE_KEY).await;
        let session_ids = SessionIdMap::load(Arc::clone(&store), SESSION_ID_MAP_KEY).await;
        let prober = ConnectivityProber::from_config(&config, Arc::clone(&transport));
        let api = SessionApi::new(config, transport, store);
        Self::new(api, prober, queue, session_ids)
    }

    pub fn api(&self) -> &SessionApi {
        &self.api
    }

    pub fn state(&self) -> SyncState {
        SyncState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SyncState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Shared connectivity flag, for observers.
    pub fn connectivity(&self) -> ConnectivityState {
        self.prober.state()
    }

    pub fn is_online(&self) -> bool {
        self.prober.is_online()
    }

    pub async fn check_connection(&self) -> bool {
        self.prober.check_connection().await
    }

    pub async fn queue_length(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Snapshot of pending entries in replay order.
    pub async fn pending(&self) -> Vec<QueuedRequest> {
        self.queue.lock().await.entries().to_vec()
    }

    /// The server id for a session known by `id`. Ids the engine never
    /// rebound are returned unchanged.
    pub async fn resolve_session_id(&self, id: &str) -> String {
        self.session_ids.lock().await.resolve(id).to_string()
    }

    pub async fn clear_queue(&self) {
        self.queue.lock().await.clear().await;
        info!("request queue cleared");
    }

    /// Purge entries older than the configured maximum age.
    pub async fn cleanup_old_requests(&self) -> usize {
        self.cleanup_older_than(self.max_queue_age).await
    }

    pub async fn cleanup_older_than(&self, max_age: Duration) -> usize {
        self.queue.lock().await.purge_older_than(max_age).await
    }

    pub async fn enqueue(&self, operation: QueuedOperation) -> QueuedRequest {
        self.queue.lock().await.enqueue(operation).await
    }

    pub async fn enqueue_request(
        &self,
        endpoint: &str,
        method: HttpMethod,
        body: Option<Value>,
    ) -> QueueResult<QueuedRequest> {
        self.queue.lock().await.enqueue_request(endpoint, method, body).await
    }

    /// Manual retry from the UI; same as a regular drain.
    pub async fn retry_queued_requests(&self) -> DrainReport {
        self.process_queued_requests().await
    }

    /// Probe, then replay the queue if online. Never fails.
    pub async fn process_queued_requests(&self) -> DrainReport {
        let Ok(_guard) = self.drain_guard.try_lock() else {
            debug!("queue drain already running");
            return DrainReport {
                skipped: true,
                remaining: self.queue_length().await,
                ..DrainReport::default()
            };
        };
        let _idle = IdleOnDrop(&self.state);

        self.set_state(SyncState::Probing);
        if !self.prober.check_connection().await {
            info!("offline, not replaying queued requests");
            return DrainReport {
                offline: true,
                remaining: self.queue_length().await,
                ..DrainReport::default()
            };
        }

        let snapshot = self.pending().await;
        if snapshot.is_empty() {
            return DrainReport::default();
        }

        self.set_state(SyncState::Draining);
        info!(count = snapshot.len(), "replaying queued requests");

        let mut report = DrainReport::default();
        let mut processed = HashSet::new();
        let mut rebinds = self.session_ids.lock().await.ids().clone();
        let mut blocked: HashSet<String> = HashSet::new();

        for entry in &snapshot {
            if let Some(target) = entry.operation.target_session() {
                if blocked.contains(target) {
                    debug!(id = %entry.id, session = target, "deferring write behind failed session write");
                    report.deferred += 1;
                    continue;
                }
            }

            report.attempted += 1;
            match self.dispatch(&entry.operation, &rebinds).await {
                Ok(created) => {
                    report.succeeded += 1;
                    processed.insert(entry.id.clone());
                    if let (Some(local), Some(server)) = (entry.operation.local_session(), created) {
                        rebinds.insert(local.to_string(), server.clone());
                        report.rebound.insert(local.to_string(), server);
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        id = %entry.id,
                        method = %entry.method(),
                        endpoint = %entry.endpoint(),
                        error = %e,
                        "queued request failed, keeping it"
                    );
                    let session = entry.operation.local_session().or(entry.operation.target_session());
                    if let Some(session) = session {
                        blocked.insert(session.to_string());
                    }
                }
            }
        }

        self.session_ids.lock().await.record(&report.rebound).await;
        let mut queue = self.queue.lock().await;
        queue.settle(&processed, &rebinds).await;
        report.remaining = queue.len();
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            deferred = report.deferred,
            remaining = report.remaining,
            "queue replay finished"
        );
        report
    }

    /// Send one queued write. Creations return the server-assigned id.
    async fn dispatch(
        &self,
        operation: &QueuedOperation,
        rebinds: &HashMap<String, String>,
    ) -> ApiResult<Option<String>> {
        let resolve = |id: &String| rebinds.get(id).cloned().unwrap_or_else(|| id.clone());
        match operation {
            QueuedOperation::CreateSession { session, .. } => {
                let response = self.api.create_from(session).await?;
                Ok(Some(response.data.session.id))
            }
            QueuedOperation::CompleteSession { session_id, end_time } => {
                self.api.complete_at(&resolve(session_id), *end_time).await?;
                Ok(None)
            }
            QueuedOperation::DeleteSession { session_id } => {
                let server_id = resolve(session_id);
                self.api.delete(&server_id).await?;
                self.session_ids.lock().await.forget_server_id(&server_id).await;
                Ok(None)
            }
            QueuedOperation::BatchUpload { sessions } => {
                self.api.batch_upload(sessions).await?;
                Ok(None)
            }
        }
    }

    /// Whether `session_id` only exists as a queued creation so far.
    async fn is_pending_creation(&self, session_id: &str) -> bool {
        self.queue
            .lock()
            .await
            .entries()
            .iter()
            .any(|entry| entry.operation.local_session() == Some(session_id))
    }

    /// Create a session starting now, queuing it if the API is unreachable.
    pub async fn create_session(
        &self,
        duration: u32,
        session_type: SessionType,
    ) -> ApiResult<WriteOutcome<Session>> {
        let input = NewSession::starting_now(duration, session_type);
        match self.api.create_from(&input).await {
            Ok(response) => Ok(WriteOutcome::Synced(response.data.session)),
            Err(e) if e.is_validation() => Err(e),
            Err(e) => {
                let local = Session::local(Uuid::new_v4().to_string(), &input, Utc::now());
                warn!(error = %e, local_id = %local.id, "session creation failed, queued for sync");
                let request = self
                    .enqueue(QueuedOperation::CreateSession {
                        local_id: Some(local.id.clone()),
                        session: input,
                    })
                    .await;
                Ok(WriteOutcome::Queued {
                    request_id: request.id,
                    local,
                })
            }
        }
    }

    /// Mark `session` completed now, queuing the update if needed.
    ///
    /// Sessions still waiting for their queued creation are queued directly,
    /// since the server cannot know them yet.
    pub async fn complete_session(&self, session: &Session) -> ApiResult<WriteOutcome<Session>> {
        if session.completed {
            return Err(ApiError::Validation(format!(
                "session {} is already completed",
                session.id
            )));
        }
        let session_id = self.resolve_session_id(&session.id).await;
        let mut local = session.completed_at(Utc::now());
        local.id = session_id.clone();
        let end_time = local.end_time.unwrap_or(local.start_time);

        let failure = if self.is_pending_creation(&session_id).await {
            debug!(session = %session_id, "session not synced yet, queuing completion");
            None
        } else {
            match self.api.complete_at(&session_id, end_time).await {
                Ok(response) => return Ok(WriteOutcome::Synced(response.data.session)),
                Err(e) if e.is_validation() => return Err(e),
                Err(e) => Some(e),
            }
        };

        if let Some(e) = failure {
            warn!(error = %e, session = %session_id, "session completion failed, queued for sync");
        }
        let request = self
            .enqueue(QueuedOperation::CompleteSession {
                session_id,
                end_time,
            })
            .await;
        Ok(WriteOutcome::Queued {
            request_id: request.id,
            local,
        })
    }

    /// Delete a session, queuing the delete if needed.
    pub async fn delete_session(&self, session_id: &str) -> ApiResult<WriteOutcome<bool>> {
        let session_id = self.resolve_session_id(session_id).await;
        let failure = if self.is_pending_creation(&session_id).await {
            None
        } else {
            match self.api.delete(&session_id).await {
                Ok(response) => {
                    self.session_ids.lock().await.forget_server_id(&session_id).await;
                    return Ok(WriteOutcome::Synced(response.data.deleted));
                }
                Err(e) if e.is_validation() => return Err(e),
                Err(e) => Some(e),
            }
        };

        if let Some(e) = failure {
            warn!(error = %e, session = %session_id, "session delete failed, queued for sync");
        }
        let request = self
            .enqueue(QueuedOperation::DeleteSession { session_id })
            .await;
        Ok(WriteOutcome::Queued {
            request_id: request.id,
            local: true,
        })
    }
}
