//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Each type mirrors a core type but uses C-compatible representations:
//! `*mut c_char` for strings (timestamps as RFC 3339), plain integers for
//! enums coming in from C, and explicit discriminants for enums going out.
//! Conversion functions live here to keep `lib.rs` focused on the
//! `extern "C"` surface.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use chrono::{DateTime, Utc};
use focus_core::{ApiError, DrainReport, Session, SessionType, SyncEngine, WriteOutcome};

/// Opaque handle owning a sync engine and the runtime that drives it.
pub struct FfiEngine {
    pub(crate) runtime: tokio::runtime::Runtime,
    pub(crate) engine: SyncEngine,
}

/// Copy `s` into a C string owned by the caller. Interior NULs are dropped.
pub(crate) fn c_string(s: impl Into<String>) -> *mut c_char {
    let s: String = s.into();
    CString::new(s.replace('\0', "")).unwrap_or_default().into_raw()
}

/// Borrow a C string as UTF-8. Null or invalid input yields `None`.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Free a string produced by `c_string`. Null is ignored.
pub(crate) fn free_c_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr) });
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Session kinds as passed across the boundary in `i32` fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiSessionType {
    Work = 0,
    ShortBreak = 1,
    LongBreak = 2,
}

impl From<SessionType> for FfiSessionType {
    fn from(kind: SessionType) -> Self {
        match kind {
            SessionType::Work => FfiSessionType::Work,
            SessionType::ShortBreak => FfiSessionType::ShortBreak,
            SessionType::LongBreak => FfiSessionType::LongBreak,
        }
    }
}

/// Decode an `i32` from C. Unknown values are a validation error.
pub(crate) fn session_type_from_raw(raw: i32) -> Result<SessionType, ApiError> {
    match raw {
        0 => Ok(SessionType::Work),
        1 => Ok(SessionType::ShortBreak),
        2 => Ok(SessionType::LongBreak),
        other => Err(ApiError::Validation(format!("unknown session type code {other}"))),
    }
}

/// A session exposed to C. `end_time` is null until completion.
#[repr(C)]
pub struct FfiSession {
    pub id: *mut c_char,
    pub duration: u32,
    /// An `FfiSessionType` discriminant.
    pub session_type: i32,
    pub completed: bool,
    pub start_time: *mut c_char,
    pub end_time: *mut c_char,
    pub created_at: *mut c_char,
}

impl FfiSession {
    pub(crate) fn from_core(session: Session) -> Self {
        FfiSession {
            id: c_string(session.id),
            duration: session.duration,
            session_type: FfiSessionType::from(session.session_type) as i32,
            completed: session.completed,
            start_time: c_string(session.start_time.to_rfc3339()),
            end_time: session
                .end_time
                .map(|t| c_string(t.to_rfc3339()))
                .unwrap_or(std::ptr::null_mut()),
            created_at: c_string(session.created_at.to_rfc3339()),
        }
    }

    /// Read a session handed back by C.
    ///
    /// # Safety
    /// String fields must be null or valid NUL-terminated strings.
    pub(crate) unsafe fn to_core(&self) -> Result<Session, ApiError> {
        let id = unsafe { read_str(self.id) }
            .ok_or_else(|| ApiError::Validation("session id is missing".to_string()))?;
        let start_time = unsafe { parse_time(self.start_time, "start_time") }?
            .ok_or_else(|| ApiError::Validation("start_time is missing".to_string()))?;
        let end_time = unsafe { parse_time(self.end_time, "end_time") }?;
        let created_at = unsafe { parse_time(self.created_at, "created_at") }?.unwrap_or(start_time);
        Ok(Session {
            id: id.to_string(),
            duration: self.duration,
            session_type: session_type_from_raw(self.session_type)?,
            completed: self.completed,
            start_time,
            end_time,
            created_at,
        })
    }

    fn free_fields(&self) {
        free_c_string(self.id);
        free_c_string(self.start_time);
        free_c_string(self.end_time);
        free_c_string(self.created_at);
    }
}

unsafe fn parse_time(ptr: *const c_char, field: &str) -> Result<Option<DateTime<Utc>>, ApiError> {
    match unsafe { read_str(ptr) } {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| ApiError::Validation(format!("{field} is not RFC 3339: {e}"))),
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Error codes returned in `FfiSessionResult`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    Validation = 1,
    NotFound = 2,
    Http = 3,
    Network = 4,
    Rejected = 5,
    Deserialization = 6,
    Serialization = 7,
    Panic = 8,
    NullArg = 9,
}

/// Result envelope for session writes.
///
/// On success `error_code` is `Ok` and `session` points to the synced or
/// locally-queued session; when `queued` is set, `request_id` names the
/// queue entry. On failure `error_message` describes the error and
/// `session` is null. Free with `focus_free_result`.
#[repr(C)]
pub struct FfiSessionResult {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub http_status: u16,
    pub queued: bool,
    pub request_id: *mut c_char,
    pub session: *mut FfiSession,
}

impl FfiSessionResult {
    fn boxed(self) -> *mut Self {
        Box::into_raw(Box::new(self))
    }

    pub(crate) fn from_outcome(outcome: WriteOutcome<Session>) -> *mut Self {
        let (queued, request_id, session) = match outcome {
            WriteOutcome::Synced(session) => (false, std::ptr::null_mut(), session),
            WriteOutcome::Queued { request_id, local } => (true, c_string(request_id), local),
        };
        FfiSessionResult {
            error_code: FfiErrorCode::Ok,
            error_message: std::ptr::null_mut(),
            http_status: 0,
            queued,
            request_id,
            session: Box::into_raw(Box::new(FfiSession::from_core(session))),
        }
        .boxed()
    }

    pub(crate) fn from_error(err: ApiError) -> *mut Self {
        let error_code = match &err {
            ApiError::NotFound => FfiErrorCode::NotFound,
            ApiError::HttpError { .. } => FfiErrorCode::Http,
            ApiError::Timeout(_) | ApiError::Transport(_) => FfiErrorCode::Network,
            ApiError::Rejected(_) => FfiErrorCode::Rejected,
            ApiError::Validation(_) => FfiErrorCode::Validation,
            ApiError::DeserializationError(_) => FfiErrorCode::Deserialization,
            ApiError::SerializationError(_) => FfiErrorCode::Serialization,
        };
        Self::failure(error_code, err.status().unwrap_or(0), err.to_string())
    }

    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::failure(FfiErrorCode::NullArg, 0, format!("null argument: {name}"))
    }

    pub(crate) fn panic(msg: &str) -> *mut Self {
        Self::failure(FfiErrorCode::Panic, 0, msg.to_string())
    }

    fn failure(error_code: FfiErrorCode, http_status: u16, msg: String) -> *mut Self {
        FfiSessionResult {
            error_code,
            error_message: c_string(msg),
            http_status,
            queued: false,
            request_id: std::ptr::null_mut(),
            session: std::ptr::null_mut(),
        }
        .boxed()
    }

    /// Release every allocation reachable from the result, then the result.
    ///
    /// # Safety
    /// `ptr` must come from one of the constructors above and not be freed
    /// twice.
    pub(crate) unsafe fn free(ptr: *mut Self) {
        let result = unsafe { Box::from_raw(ptr) };
        free_c_string(result.error_message);
        free_c_string(result.request_id);
        if !result.session.is_null() {
            let session = unsafe { Box::from_raw(result.session) };
            session.free_fields();
        }
    }
}

/// Summary of a queue drain, returned by value.
///
/// `ok` is false when the engine handle was null or the call panicked.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FfiDrainReport {
    pub ok: bool,
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub deferred: u32,
    pub remaining: u32,
    pub skipped: bool,
    pub offline: bool,
    /// Sessions created offline that received a server id in this drain.
    /// Later writes through the engine resolve their ids automatically.
    pub rebound: u32,
}

pub(crate) fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl From<DrainReport> for FfiDrainReport {
    fn from(report: DrainReport) -> Self {
        FfiDrainReport {
            ok: true,
            attempted: count(report.attempted),
            succeeded: count(report.succeeded),
            failed: count(report.failed),
            deferred: count(report.deferred),
            remaining: count(report.remaining),
            skipped: report.skipped,
            offline: report.offline,
            rebound: count(report.rebound.len()),
        }
    }
}
