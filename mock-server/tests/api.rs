use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, router, AppState, Session, Stats};
use serde_json::Value;
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(String::new())
        .unwrap()
}

fn session_of(body: &Value) -> Session {
    serde_json::from_value(body["data"]["session"].clone()).unwrap()
}

// --- health ---

#[tokio::test]
async fn health_answers_get_and_head() {
    let resp = app().oneshot(empty_request("GET", "/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "OK");

    let resp = app().oneshot(empty_request("HEAD", "/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_bytes(resp).await.is_empty());
}

// --- list ---

#[tokio::test]
async fn list_sessions_empty() {
    let resp = app().oneshot(empty_request("GET", "/sessions")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["sessions"], serde_json::json!([]));
}

// --- create ---

#[tokio::test]
async fn create_session_returns_201_envelope() {
    let resp = app()
        .oneshot(json_request(
            "POST",
            "/sessions",
            r#"{"duration":25,"type":"work","startTime":"2024-05-01T09:00:00Z"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    assert_eq!(body["success"], true);
    let session = session_of(&body);
    assert_eq!(session.duration, 25);
    assert_eq!(session.session_type, "work");
    assert!(!session.completed);
    assert_eq!(session.start_time.to_rfc3339(), "2024-05-01T09:00:00+00:00");
}

#[tokio::test]
async fn create_session_rejects_bad_input_with_400() {
    for body in [
        r#"{"duration":0,"type":"work"}"#,
        r#"{"duration":-3,"type":"work"}"#,
        r#"{"duration":25,"type":"nap"}"#,
        r#"{"type":"work"}"#,
        r#"not json"#,
    ] {
        let resp = app().oneshot(json_request("POST", "/sessions", body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {body}");
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
    }
}

// --- complete / delete ---

#[tokio::test]
async fn complete_unknown_session_returns_404() {
    let resp = app()
        .oneshot(json_request("PUT", "/sessions/missing", r#"{"completed":true}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_unknown_session_returns_404() {
    let resp = app().oneshot(empty_request("DELETE", "/sessions/missing")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- outage switch ---

#[tokio::test]
async fn unavailable_server_answers_503_everywhere() {
    let state = AppState::default();
    state.set_available(false);

    for (method, uri) in [("GET", "/health"), ("HEAD", "/health"), ("GET", "/sessions")] {
        let resp = router(state.clone()).oneshot(empty_request(method, uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
    let resp = router(state.clone())
        .oneshot(json_request("POST", "/sessions", r#"{"duration":25,"type":"work"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(state.session_count().await, 0);

    state.set_available(true);
    let resp = router(state).oneshot(empty_request("GET", "/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// --- batch ---

#[tokio::test]
async fn batch_upload_counts_rejected_entries() {
    let state = AppState::default();
    let resp = router(state.clone())
        .oneshot(json_request(
            "POST",
            "/sessions/batch",
            r#"{"sessions":[
                {"duration":25,"type":"work","startTime":"2024-05-01T09:00:00Z","endTime":"2024-05-01T09:25:00Z"},
                {"duration":5,"type":"short-break","startTime":"2024-05-01T09:25:00Z"},
                {"duration":0,"type":"work","startTime":"2024-05-01T09:30:00Z"}
            ]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["data"]["uploaded"], 2);
    assert_eq!(body["data"]["failed"], 1);
    assert_eq!(state.session_count().await, 2);
}

// --- full lifecycle ---

#[tokio::test]
async fn session_lifecycle() {
    use tower::Service;

    let mut app = app().into_service();

    // create
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(json_request(
            "POST",
            "/sessions",
            r#"{"duration":25,"type":"work","startTime":"2024-05-01T09:00:00Z"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = session_of(&body_json(resp).await);
    let id = created.id.clone();

    // complete with an end time before the start; clamped to the start
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(json_request(
            "PUT",
            &format!("/sessions/{id}"),
            r#"{"completed":true,"endTime":"2024-05-01T08:00:00Z"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let completed = session_of(&body_json(resp).await);
    assert!(completed.completed);
    assert_eq!(completed.end_time, Some(created.start_time));

    // completing twice is rejected
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(json_request("PUT", &format!("/sessions/{id}"), r#"{"completed":true}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // a second, unfinished session
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(json_request("POST", "/sessions", r#"{"duration":5,"type":"short-break"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    // stats
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(empty_request("GET", "/sessions/stats"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let stats: Stats = serde_json::from_value(body["data"]["stats"].clone()).unwrap();
    assert_eq!(stats.total_sessions, 2);
    assert_eq!(stats.completed_sessions, 1);
    assert_eq!(stats.total_minutes, 25);
    assert_eq!(stats.completion_rate, 50.0);

    // delete
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(empty_request("DELETE", &format!("/sessions/{id}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["data"]["deleted"], true);

    // list after delete: only the break remains
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(empty_request("GET", "/sessions"))
        .await
        .unwrap();
    let body = body_json(resp).await;
    let sessions = body["data"]["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["type"], "short-break");
}
