//! Domain DTOs for the session API.
//!
//! # Design
//! These types mirror the mock-server's schema but are defined independently;
//! integration tests catch any drift between the two crates. Wire names are
//! camelCase and timestamps are RFC 3339 strings via chrono.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Kind of timed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionType {
    Work,
    ShortBreak,
    LongBreak,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Work => "work",
            SessionType::ShortBreak => "short-break",
            SessionType::LongBreak => "long-break",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "work" => Ok(SessionType::Work),
            "short-break" => Ok(SessionType::ShortBreak),
            "long-break" => Ok(SessionType::LongBreak),
            other => Err(ApiError::Validation(format!(
                "session type must be work, short-break or long-break, got {other:?}"
            ))),
        }
    }
}

/// A session as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Length in minutes.
    pub duration: u32,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    pub completed: bool,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// A session that exists only on this device so far.
    pub fn local(id: String, new: &NewSession, created_at: DateTime<Utc>) -> Self {
        Session {
            id,
            duration: new.duration,
            session_type: new.session_type,
            completed: new.end_time.is_some(),
            start_time: new.start_time,
            end_time: new.end_time,
            created_at,
        }
    }

    /// This session marked completed at `end_time`, clamped so it never
    /// precedes `start_time`.
    pub fn completed_at(&self, end_time: DateTime<Utc>) -> Self {
        Session {
            completed: true,
            end_time: Some(end_time.max(self.start_time)),
            ..self.clone()
        }
    }
}

/// Payload for creating a session, also the element type of batch uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub duration: u32,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl NewSession {
    pub fn starting_at(duration: u32, session_type: SessionType, start_time: DateTime<Utc>) -> Self {
        NewSession {
            duration,
            session_type,
            start_time,
            end_time: None,
        }
    }

    pub fn starting_now(duration: u32, session_type: SessionType) -> Self {
        Self::starting_at(duration, session_type, Utc::now())
    }
}

/// Body of `PUT /sessions/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCompletion {
    pub completed: bool,
    pub end_time: DateTime<Utc>,
}

/// Body of `POST /sessions/batch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUpload {
    pub sessions: Vec<NewSession>,
}

/// Aggregated statistics. Missing fields default to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionStats {
    pub total_sessions: u64,
    pub completed_sessions: u64,
    #[serde(alias = "totalTime")]
    pub total_minutes: u64,
    pub work_sessions: u64,
    pub break_sessions: u64,
    /// Percentage of sessions completed, 0–100.
    pub completion_rate: f64,
}

/// Standard response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        ApiResponse {
            success: true,
            data,
            message: Some(message.into()),
            error: None,
        }
    }
}

/// `data` of create and complete responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub session: Session,
}

/// `data` of list responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionList {
    pub sessions: Vec<Session>,
}

/// `data` of stats responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsPayload {
    pub stats: SessionStats,
}

/// `data` of delete responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePayload {
    pub deleted: bool,
}

/// `data` of batch upload responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub uploaded: u32,
    pub failed: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_type_uses_kebab_case_on_the_wire() {
        assert_eq!(serde_json::to_value(SessionType::ShortBreak).unwrap(), "short-break");
        let parsed: SessionType = serde_json::from_value("long-break".into()).unwrap();
        assert_eq!(parsed, SessionType::LongBreak);
        assert!("nap".parse::<SessionType>().is_err());
    }

    #[test]
    fn session_deserializes_backend_shape() {
        let json = r#"{
            "id": "s1",
            "userId": "u1",
            "duration": 25,
            "type": "work",
            "completed": true,
            "startTime": "2024-05-01T09:00:00Z",
            "endTime": "2024-05-01T09:25:00Z",
            "notes": null,
            "createdAt": "2024-05-01T09:00:00Z"
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.id, "s1");
        assert_eq!(session.session_type, SessionType::Work);
        assert!(session.end_time.unwrap() >= session.start_time);
    }

    #[test]
    fn new_session_omits_missing_end_time() {
        let new = NewSession::starting_now(25, SessionType::Work);
        let json = serde_json::to_value(&new).unwrap();
        assert_eq!(json["duration"], 25);
        assert_eq!(json["type"], "work");
        assert!(json["startTime"].is_string());
        assert!(json.get("endTime").is_none());
    }

    #[test]
    fn completion_never_precedes_start() {
        let start: DateTime<Utc> = "2024-05-01T09:00:00Z".parse().unwrap();
        let new = NewSession::starting_at(25, SessionType::Work, start);
        let session = Session::local("local".to_string(), &new, start);
        assert!(!session.completed);

        let early: DateTime<Utc> = "2024-05-01T08:00:00Z".parse().unwrap();
        let done = session.completed_at(early);
        assert!(done.completed);
        assert_eq!(done.end_time, Some(start));
    }

    #[test]
    fn stats_accept_backend_total_time_alias() {
        let stats: SessionStats = serde_json::from_str(
            r#"{"totalSessions":4,"completedSessions":3,"totalTime":75,"completionRate":75}"#,
        )
        .unwrap();
        assert_eq!(stats.total_minutes, 75);
        assert_eq!(stats.work_sessions, 0);
        assert_eq!(stats.completion_rate, 75.0);
    }
}
