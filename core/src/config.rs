//! Runtime configuration for the session API and sync engine.
//!
//! Values come from the environment (`FOCUS_*` variables) layered over
//! defaults. Nothing in the queue or engine hardcodes these; they receive an
//! `ApiConfig` from the composition root.

use std::time::Duration;

/// Host substring that marks the unconfigured placeholder backend.
pub const PLACEHOLDER_HOST: &str = "your-api-endpoint.com";

/// Store key holding the persisted request queue.
pub const QUEUE_KEY: &str = "api_request_queue";

/// Store key holding client-assigned to server-assigned session ids.
pub const SESSION_ID_MAP_KEY: &str = "api_session_id_map";

/// Store key holding the optional bearer token.
pub const AUTH_TOKEN_KEY: &str = "focusbloom_auth_token";

const DEFAULT_BASE_URL: &str = "https://your-api-endpoint.com/api";
const DEFAULT_PROBE_URL: &str = "https://www.google.com/favicon.ico";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Session API and connectivity settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    /// Base URL of the remote API, without trailing slash.
    pub base_url: String,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Retries after the initial attempt.
    pub retry_attempts: u32,
    /// Fixed pause between attempts.
    pub retry_delay: Duration,
    /// Synthesize responses locally instead of calling the API.
    pub use_mock_data: bool,
    /// Log every request, response and failed attempt.
    pub enable_logging: bool,
    /// Endpoint used by the reachability probe.
    pub probe_url: String,
    /// Timeout for the reachability probe.
    pub probe_timeout: Duration,
    /// Age after which queued requests are purged by cleanup.
    pub max_queue_age: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_millis(10_000),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1_000),
            use_mock_data: false,
            enable_logging: false,
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_timeout: Duration::from_millis(5_000),
            max_queue_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl ApiConfig {
    /// Defaults pointed at `base_url`.
    pub fn with_base_url(base_url: &str) -> Self {
        ApiConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..ApiConfig::default()
        }
    }

    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` to resolve variable names.
    ///
    /// Recognized: `FOCUS_API_URL`, `FOCUS_API_TIMEOUT_MS`,
    /// `FOCUS_RETRY_ATTEMPTS`, `FOCUS_RETRY_DELAY_MS`, `FOCUS_USE_MOCK_DATA`,
    /// `FOCUS_ENABLE_LOGGING`, `FOCUS_PROBE_URL`, `FOCUS_PROBE_TIMEOUT_MS`,
    /// `FOCUS_MAX_QUEUE_AGE_HOURS`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = ApiConfig::default();

        if let Some(url) = get("FOCUS_API_URL") {
            config.base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(ms) = get("FOCUS_API_TIMEOUT_MS") {
            config.timeout = Duration::from_millis(parse_u64("FOCUS_API_TIMEOUT_MS", &ms)?);
        }
        if let Some(n) = get("FOCUS_RETRY_ATTEMPTS") {
            config.retry_attempts = parse_u64("FOCUS_RETRY_ATTEMPTS", &n)?
                .try_into()
                .map_err(|_| invalid("FOCUS_RETRY_ATTEMPTS", &n, "too large"))?;
        }
        if let Some(ms) = get("FOCUS_RETRY_DELAY_MS") {
            config.retry_delay = Duration::from_millis(parse_u64("FOCUS_RETRY_DELAY_MS", &ms)?);
        }
        if let Some(flag) = get("FOCUS_USE_MOCK_DATA") {
            config.use_mock_data = parse_bool("FOCUS_USE_MOCK_DATA", &flag)?;
        }
        if let Some(flag) = get("FOCUS_ENABLE_LOGGING") {
            config.enable_logging = parse_bool("FOCUS_ENABLE_LOGGING", &flag)?;
        }
        if let Some(url) = get("FOCUS_PROBE_URL") {
            config.probe_url = url.trim().to_string();
        }
        if let Some(ms) = get("FOCUS_PROBE_TIMEOUT_MS") {
            config.probe_timeout = Duration::from_millis(parse_u64("FOCUS_PROBE_TIMEOUT_MS", &ms)?);
        }
        if let Some(hours) = get("FOCUS_MAX_QUEUE_AGE_HOURS") {
            let hours = parse_u64("FOCUS_MAX_QUEUE_AGE_HOURS", &hours)?;
            config.max_queue_age = Duration::from_secs(hours.saturating_mul(60 * 60));
        }

        Ok(config)
    }

    /// Whether API calls bypass the network: explicitly configured, or the
    /// base URL still points at the placeholder backend.
    pub fn is_mock(&self) -> bool {
        self.use_mock_data || self.base_url.contains(PLACEHOLDER_HOST)
    }

    /// Total attempts per operation, initial call included.
    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_u64(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(name, value, &e.to_string()))
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value, "expected a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ApiConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(10_000));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1_000));
        assert_eq!(config.probe_timeout, Duration::from_millis(5_000));
        assert_eq!(config.max_queue_age, Duration::from_secs(86_400));
        assert_eq!(config.max_attempts(), 4);
    }

    #[test]
    fn placeholder_base_url_forces_mock_mode() {
        let config = ApiConfig::default();
        assert!(!config.use_mock_data);
        assert!(config.is_mock());

        let real = ApiConfig::with_base_url("http://localhost:3000/");
        assert_eq!(real.base_url, "http://localhost:3000");
        assert!(!real.is_mock());
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = ApiConfig::from_lookup(lookup(&[
            ("FOCUS_API_URL", "https://api.example.com/v1/"),
            ("FOCUS_API_TIMEOUT_MS", "2500"),
            ("FOCUS_RETRY_ATTEMPTS", "5"),
            ("FOCUS_RETRY_DELAY_MS", "10"),
            ("FOCUS_USE_MOCK_DATA", "true"),
            ("FOCUS_ENABLE_LOGGING", "1"),
            ("FOCUS_PROBE_URL", "http://127.0.0.1:9/health"),
            ("FOCUS_PROBE_TIMEOUT_MS", "750"),
            ("FOCUS_MAX_QUEUE_AGE_HOURS", "48"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "https://api.example.com/v1");
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(10));
        assert!(config.use_mock_data);
        assert!(config.enable_logging);
        assert_eq!(config.probe_url, "http://127.0.0.1:9/health");
        assert_eq!(config.probe_timeout, Duration::from_millis(750));
        assert_eq!(config.max_queue_age, Duration::from_secs(48 * 3600));
    }

    #[test]
    fn empty_values_are_ignored() {
        let config = ApiConfig::from_lookup(lookup(&[("FOCUS_RETRY_ATTEMPTS", "  ")])).unwrap();
        assert_eq!(config.retry_attempts, 3);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = ApiConfig::from_lookup(lookup(&[("FOCUS_API_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("FOCUS_API_TIMEOUT_MS"));

        let err = ApiConfig::from_lookup(lookup(&[("FOCUS_USE_MOCK_DATA", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "FOCUS_USE_MOCK_DATA", .. }));
    }
}
