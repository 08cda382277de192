//! Shared test helpers: scripted transports and a fake session backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::http::{BoxFuture, HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};

/// What a scripted transport does with a request.
pub enum Reply {
    Respond(HttpResponse),
    Fail(TransportError),
    /// Never resolve.
    Hang,
}

pub fn respond(status: u16, body: &str) -> Reply {
    Reply::Respond(HttpResponse {
        status,
        headers: Vec::new(),
        body: body.to_string(),
    })
}

type Responder = Box<dyn Fn(&HttpRequest) -> Reply + Send + Sync>;

/// Transport that records every request and answers from a closure.
pub struct ScriptedTransport {
    requests: Mutex<Vec<HttpRequest>>,
    responder: Responder,
}

impl ScriptedTransport {
    pub fn new(responder: impl Fn(&HttpRequest) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Self::new(|_| Reply::Fail(TransportError::Connection("connection refused".to_string())))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = (self.responder)(&request);
        Box::pin(async move {
            match reply {
                Reply::Respond(response) => Ok(response),
                Reply::Fail(err) => Err(err),
                Reply::Hang => std::future::pending().await,
            }
        })
    }
}

/// In-memory stand-in for the remote API plus the reachability endpoint.
///
/// While offline every request fails at the transport level. Requests whose
/// URL or body contains one of the `poison` markers get a 500.
#[derive(Default)]
pub struct FakeBackend {
    online: AtomicBool,
    next_id: AtomicUsize,
    poison: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new(online: bool) -> Arc<Self> {
        let backend = Self::default();
        backend.online.store(online, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn poison(&self, marker: &str) {
        self.poison.lock().unwrap().push(marker.to_string());
    }

    pub fn cure(&self) {
        self.poison.lock().unwrap().clear();
    }

    /// Transport wired to this backend.
    pub fn transport(self: &Arc<Self>) -> Arc<ScriptedTransport> {
        let backend = Arc::clone(self);
        ScriptedTransport::new(move |req| backend.handle(req))
    }

    fn handle(&self, req: &HttpRequest) -> Reply {
        if !self.online.load(Ordering::SeqCst) {
            return Reply::Fail(TransportError::Connection("network unreachable".to_string()));
        }
        if req.method == HttpMethod::Head {
            return respond(200, "");
        }
        let body = req.body.clone().unwrap_or_default();
        let poisoned = self
            .poison
            .lock()
            .unwrap()
            .iter()
            .any(|m| req.url.contains(m.as_str()) || body.contains(m.as_str()));
        if poisoned {
            return respond(500, "injected failure");
        }

        let path = req.url.split("/sessions").nth(1).unwrap_or("");
        let now = Utc::now().to_rfc3339();
        match (req.method, path) {
            (HttpMethod::Post, "") => {
                let input: serde_json::Value = serde_json::from_str(&body).unwrap();
                let id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
                let session = serde_json::json!({
                    "id": id,
                    "duration": input["duration"],
                    "type": input["type"],
                    "completed": false,
                    "startTime": input["startTime"],
                    "createdAt": now,
                });
                respond(201, &serde_json::json!({"success": true, "data": {"session": session}}).to_string())
            }
            (HttpMethod::Post, "/batch") => {
                let input: serde_json::Value = serde_json::from_str(&body).unwrap();
                let count = input["sessions"].as_array().map(Vec::len).unwrap_or(0);
                respond(
                    200,
                    &serde_json::json!({"success": true, "data": {"uploaded": count, "failed": 0}}).to_string(),
                )
            }
            (HttpMethod::Get, "/stats") => respond(
                200,
                r#"{"success":true,"data":{"stats":{"totalSessions":1,"completedSessions":1,"totalMinutes":25}}}"#,
            ),
            (HttpMethod::Get, "") => respond(200, r#"{"success":true,"data":{"sessions":[]}}"#),
            (HttpMethod::Put, id) => {
                let input: serde_json::Value = serde_json::from_str(&body).unwrap();
                let session = serde_json::json!({
                    "id": id.trim_start_matches('/'),
                    "duration": 25,
                    "type": "work",
                    "completed": true,
                    "startTime": "2000-01-01T00:00:00Z",
                    "endTime": input["endTime"],
                    "createdAt": "2000-01-01T00:00:00Z",
                });
                respond(200, &serde_json::json!({"success": true, "data": {"session": session}}).to_string())
            }
            (HttpMethod::Delete, _) => respond(200, r#"{"success":true,"data":{"deleted":true}}"#),
            _ => respond(404, ""),
        }
    }
}
