//! Online/offline detection via a lightweight reachability probe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::ApiConfig;
use crate::http::{HttpMethod, HttpRequest, Transport};

/// Shared last-known connectivity flag.
///
/// Starts optimistic (`true`). Only the prober writes it; clones observe the
/// same value.
#[derive(Debug, Clone)]
pub struct ConnectivityState(Arc<AtomicBool>);

impl Default for ConnectivityState {
    fn default() -> Self {
        ConnectivityState(Arc::new(AtomicBool::new(true)))
    }
}

impl ConnectivityState {
    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::SeqCst);
    }
}

/// Probes a well-known URL to decide whether the network is usable.
pub struct ConnectivityProber {
    transport: Arc<dyn Transport>,
    probe_url: String,
    timeout: Duration,
    state: ConnectivityState,
}

impl ConnectivityProber {
    pub fn new(transport: Arc<dyn Transport>, probe_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transport,
            probe_url: probe_url.into(),
            timeout,
            state: ConnectivityState::default(),
        }
    }

    pub fn from_config(config: &ApiConfig, transport: Arc<dyn Transport>) -> Self {
        Self::new(transport, config.probe_url.clone(), config.probe_timeout)
    }

    /// Handle to the flag this prober updates.
    pub fn state(&self) -> ConnectivityState {
        self.state.clone()
    }

    /// Last probe result, without I/O.
    pub fn is_online(&self) -> bool {
        self.state.is_connected()
    }

    /// Send a HEAD probe and record the result.
    ///
    /// A 2xx answer within the timeout counts as online. Anything else counts
    /// as offline; this never fails.
    pub async fn check_connection(&self) -> bool {
        let request = HttpRequest {
            method: HttpMethod::Head,
            url: self.probe_url.clone(),
            headers: vec![("cache-control".to_string(), "no-cache".to_string())],
            body: None,
        };

        let online = match tokio::time::timeout(self.timeout, self.transport.execute(request)).await {
            Ok(Ok(response)) => {
                debug!(status = response.status, url = %self.probe_url, "reachability probe answered");
                response.is_success()
            }
            Ok(Err(e)) => {
                debug!(error = %e, url = %self.probe_url, "reachability probe failed");
                false
            }
            Err(_) => {
                debug!(timeout_ms = self.timeout.as_millis() as u64, url = %self.probe_url, "reachability probe timed out");
                false
            }
        };

        let was_online = self.state.is_connected();
        self.state.set(online);
        if was_online != online {
            info!(online, "connectivity changed");
        }
        online
    }
}
