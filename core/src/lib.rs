//! Offline-resilient session sync core for the focus timer.
//!
//! # Overview
//! Session writes go to the remote API through `SessionApi`, which applies
//! timeouts, retries and the mock fallback. Writes that still fail are kept
//! in a durable `RequestQueue` and replayed by the `SyncEngine` once the
//! `ConnectivityProber` reports the network is back.
//!
//! # Design
//! - `SessionClient` is stateless: `build_*` produces an `HttpRequest`,
//!   `parse_*` consumes an `HttpResponse`. The I/O boundary is the
//!   `Transport` trait, so tests script responses without a network.
//! - Persistence goes through the `Store` trait (`MemoryStore`,
//!   `FileStore`).
//! - Nothing is global: the composition root (`SyncEngine::open`, the FFI
//!   handle, or a test) builds the engine from an `ApiConfig`, a transport
//!   and a store.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod api;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod http;
pub mod queue;
pub mod store;
pub mod sync;
pub mod types;

#[cfg(test)]
mod test_support;

pub use api::SessionApi;
pub use client::SessionClient;
pub use config::{ApiConfig, ConfigError};
pub use connectivity::{ConnectivityProber, ConnectivityState};
pub use error::{ApiError, ApiResult};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError, UreqTransport};
pub use queue::{QueueError, QueuedOperation, QueuedRequest, RequestQueue, SessionIdMap};
pub use store::{FileStore, MemoryStore, Store, StoreError};
pub use sync::{DrainReport, SyncEngine, SyncState, WriteOutcome};
pub use types::{NewSession, Session, SessionStats, SessionType};
