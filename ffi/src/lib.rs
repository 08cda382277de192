//! C-ABI wrapper around `focus-core`'s sync engine.
//!
//! # Overview
//! Exposes session writes, connectivity checks and queue maintenance through
//! `extern "C"` functions so the mobile UI can drive the offline-resilient
//! sync core without linking to Rust's async runtime directly.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - The engine handle owns a current-thread tokio runtime; each call blocks
//!   on the corresponding async engine operation.
//! - Writes return a heap-allocated `FfiSessionResult` that carries either
//!   the session (synced or queued locally) or an error code and message.
//! - The C caller owns all returned pointers and must call the matching
//!   `focus_*_free` / `focus_free_result` function to release them.

pub mod types;

use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use focus_core::{ApiConfig, FileStore, SyncEngine, Transport, UreqTransport};

use types::*;

// ---------------------------------------------------------------------------
// Engine lifecycle
// ---------------------------------------------------------------------------

fn build_engine(base_url: Option<&str>, data_dir: &str, probe_url: Option<&str>) -> Option<FfiEngine> {
    let mut config = ApiConfig::from_env().ok()?;
    if let Some(url) = base_url {
        config.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(url) = probe_url {
        config.probe_url = url.to_string();
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .ok()?;
    let engine = runtime.block_on(async {
        let store = FileStore::open(Path::new(data_dir)).await.ok()?;
        let transport: Arc<dyn Transport> = Arc::new(UreqTransport::new(config.timeout));
        Some(SyncEngine::open(config, transport, Arc::new(store)).await)
    })?;
    Some(FfiEngine { runtime, engine })
}

/// Create a sync engine persisting its queue under `data_dir`.
///
/// Configuration comes from the `FOCUS_*` environment variables; non-null
/// `base_url` and `probe_url` override the API and reachability endpoints.
/// Returns null if `data_dir` is null or unusable, the environment holds an
/// invalid value, or an internal panic occurs. Free with `focus_engine_free`.
#[unsafe(no_mangle)]
pub extern "C" fn focus_engine_new(
    base_url: *const c_char,
    data_dir: *const c_char,
    probe_url: *const c_char,
) -> *mut FfiEngine {
    catch_unwind(|| {
        let Some(data_dir) = (unsafe { read_str(data_dir) }) else {
            return std::ptr::null_mut();
        };
        let base_url = unsafe { read_str(base_url) };
        let probe_url = unsafe { read_str(probe_url) };
        match build_engine(base_url, data_dir, probe_url) {
            Some(engine) => Box::into_raw(Box::new(engine)),
            None => std::ptr::null_mut(),
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free an engine created by `focus_engine_new`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn focus_engine_free(engine: *mut FfiEngine) {
    if !engine.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(engine) });
        }));
    }
}

/// Run `f` against the engine behind `engine`, or return `T::default()` when
/// the handle is null or `f` panics.
fn with_engine<T: Default>(engine: *const FfiEngine, f: impl FnOnce(&FfiEngine) -> T) -> T {
    if engine.is_null() {
        return T::default();
    }
    let handle = unsafe { &*engine };
    catch_unwind(AssertUnwindSafe(|| f(handle))).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

/// Probe the reachability endpoint and return whether the network is usable.
/// Returns false for a null handle.
#[unsafe(no_mangle)]
pub extern "C" fn focus_check_connection(engine: *const FfiEngine) -> bool {
    with_engine(engine, |h| h.runtime.block_on(h.engine.check_connection()))
}

/// Last known connectivity, without I/O. Returns false for a null handle.
#[unsafe(no_mangle)]
pub extern "C" fn focus_is_online(engine: *const FfiEngine) -> bool {
    with_engine(engine, |h| h.engine.is_online())
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Number of writes waiting for replay. Returns 0 for a null handle.
#[unsafe(no_mangle)]
pub extern "C" fn focus_queue_length(engine: *const FfiEngine) -> u32 {
    with_engine(engine, |h| count(h.runtime.block_on(h.engine.queue_length())))
}

/// Probe and replay the queue. `ok` is false for a null handle.
#[unsafe(no_mangle)]
pub extern "C" fn focus_process_queue(engine: *const FfiEngine) -> FfiDrainReport {
    with_engine(engine, |h| {
        h.runtime.block_on(h.engine.process_queued_requests()).into()
    })
}

/// Drop queued writes older than `max_age_hours`; a negative value uses the
/// configured maximum age. Returns how many were dropped.
#[unsafe(no_mangle)]
pub extern "C" fn focus_cleanup_queue(engine: *const FfiEngine, max_age_hours: i64) -> u32 {
    with_engine(engine, |h| {
        let purged = match u64::try_from(max_age_hours) {
            Ok(hours) => h
                .runtime
                .block_on(h.engine.cleanup_older_than(Duration::from_secs(hours.saturating_mul(3600)))),
            Err(_) => h.runtime.block_on(h.engine.cleanup_old_requests()),
        };
        count(purged)
    })
}

/// Discard every queued write. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn focus_clear_queue(engine: *const FfiEngine) {
    with_engine(engine, |h| h.runtime.block_on(h.engine.clear_queue()))
}

// ---------------------------------------------------------------------------
// Session writes
// ---------------------------------------------------------------------------

/// Create a session starting now. `session_type` is an `FfiSessionType`
/// discriminant. When the API is unreachable the creation is queued and
/// the result carries `queued = true` with a client-assigned session id.
#[unsafe(no_mangle)]
pub extern "C" fn focus_create_session(
    engine: *const FfiEngine,
    duration: u32,
    session_type: i32,
) -> *mut FfiSessionResult {
    catch_unwind(AssertUnwindSafe(|| {
        if engine.is_null() {
            return FfiSessionResult::null_arg("engine");
        }
        let h = unsafe { &*engine };
        let kind = match session_type_from_raw(session_type) {
            Ok(kind) => kind,
            Err(e) => return FfiSessionResult::from_error(e),
        };
        match h.runtime.block_on(h.engine.create_session(duration, kind)) {
            Ok(outcome) => FfiSessionResult::from_outcome(outcome),
            Err(e) => FfiSessionResult::from_error(e),
        }
    }))
    .unwrap_or_else(|_| FfiSessionResult::panic("panic in focus_create_session"))
}

/// Mark `session` completed now, queuing the update when offline.
///
/// `session` is typically the one returned by `focus_create_session`; it is
/// only read, never freed.
#[unsafe(no_mangle)]
pub extern "C" fn focus_complete_session(
    engine: *const FfiEngine,
    session: *const FfiSession,
) -> *mut FfiSessionResult {
    catch_unwind(AssertUnwindSafe(|| {
        if engine.is_null() {
            return FfiSessionResult::null_arg("engine");
        }
        if session.is_null() {
            return FfiSessionResult::null_arg("session");
        }
        let h = unsafe { &*engine };
        let session = match unsafe { (*session).to_core() } {
            Ok(session) => session,
            Err(e) => return FfiSessionResult::from_error(e),
        };
        match h.runtime.block_on(h.engine.complete_session(&session)) {
            Ok(outcome) => FfiSessionResult::from_outcome(outcome),
            Err(e) => FfiSessionResult::from_error(e),
        }
    }))
    .unwrap_or_else(|_| FfiSessionResult::panic("panic in focus_complete_session"))
}

/// Free a result returned by `focus_create_session` or
/// `focus_complete_session`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn focus_free_result(result: *mut FfiSessionResult) {
    if result.is_null() {
        return;
    }
    let _ = catch_unwind(|| unsafe { FfiSessionResult::free(result) });
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
