use crate::app_with_state;
use crate::state::AppState;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use od_core::clock::{ManualClock, SharedClock};
use od_core::config::{DeskConfig, ExtensionConfig};
use od_core::error::Result;
use od_extension::{Delivery, ExtensionTransport};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

#[derive(Default)]
struct RecordingTransport {
    delivered: Mutex<Vec<Delivery>>,
}

#[async_trait]
impl ExtensionTransport for RecordingTransport {
    async fn probe(&self, _extension: &ExtensionConfig) -> std::result::Result<(), String> {
        Ok(())
    }

    async fn start(&self, _extension: &ExtensionConfig) -> Result<()> {
        Ok(())
    }

    async fn deliver(&self, _extension: &ExtensionConfig, delivery: &Delivery) -> Result<()> {
        self.delivered.lock().push(delivery.clone());
        Ok(())
    }

    async fn stop(&self, _extension_id: &str) {}
}

struct Harness {
    tmp: TempDir,
    clock: Arc<ManualClock>,
    transport: Arc<RecordingTransport>,
    app: Router,
}

impl Harness {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let mut config = DeskConfig::default();
        config.recovery.dir = tmp.path().join("recovery");
        config.extensions = vec![ExtensionConfig::new("pdf-preview", &["pdf"])];
        let clock = ManualClock::starting_now();
        let shared: SharedClock = clock.clone();
        let transport = Arc::new(RecordingTransport::default());
        let state = AppState::build(&config, transport.clone(), shared).await.unwrap();
        Self {
            tmp,
            clock,
            transport,
            app: app_with_state(state),
        }
    }

    fn write(&self, name: &str, content: &str) -> String {
        let path = self.tmp.path().join(name);
        std::fs::write(&path, content).unwrap();
        path.display().to_string()
    }

    fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.tmp.path().join(name)).unwrap()
    }

    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn open(&self, name: &str, content: &str) -> String {
        let path = self.write(name, content);
        let (status, body) = self
            .call(Method::POST, "/api/v1/sessions", Some(json!({ "path": path })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    async fn append(&self, id: &str, text: &str) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            "/api/v1/dispatch",
            Some(json!({
                "document_type": "word",
                "operation": "append-text",
                "params": { "text": text },
                "target": { "kind": "session", "session_id": id }
            })),
        )
        .await
    }
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new().await;
    let (status, body) = h.call(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn test_session_lifecycle_over_http() {
    let h = Harness::new().await;
    let id = h.open("a.docx", "hello").await;

    let (status, body) = h.append(&id, " world").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dirty"], true);

    let (status, body) = h.call(Method::GET, &format!("/api/v1/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dirty"], true);
    assert_eq!(body["document_type"], "word");

    let (status, _) = h.call(Method::DELETE, &format!("/api/v1/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = h
        .call(Method::POST, &format!("/api/v1/sessions/{id}/save"), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["push"]["status"], "not_bound");
    assert_eq!(h.read("a.docx"), "hello world");

    let (status, _) = h.call(Method::DELETE, &format!("/api/v1/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = h.call(Method::GET, &format!("/api/v1/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_open_requires_known_type() {
    let h = Harness::new().await;
    let path = h.write("notes.xyz", "x");
    let (status, body) = h
        .call(Method::POST, "/api/v1/sessions", Some(json!({ "path": path })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = h
        .call(
            Method::POST,
            "/api/v1/sessions",
            Some(json!({ "path": path, "document_type": "email", "mode": "read-only" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["mode"], "read-only");
}

#[tokio::test]
async fn test_dispatch_errors_map_to_status() {
    let h = Harness::new().await;
    let id = h.open("a.docx", "x").await;

    let (status, body) = h
        .call(
            Method::POST,
            "/api/v1/dispatch",
            Some(json!({
                "document_type": "word",
                "operation": "explode",
                "target": { "kind": "session", "session_id": id }
            })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_operation");

    let (status, body) = h
        .call(
            Method::POST,
            "/api/v1/dispatch",
            Some(json!({
                "document_type": "word",
                "operation": "set-text",
                "target": { "kind": "session", "session_id": id }
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "missing_parameter");
}

#[tokio::test]
async fn test_disconnect_and_recover_over_http() {
    let h = Harness::new().await;
    let id = h.open("b.docx", "1,2").await;
    h.append(&id, ",3").await;

    let (status, body) = h
        .call(Method::POST, &format!("/api/v1/sessions/{id}/disconnect"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recovery"]["session_id"], id.as_str());

    let (_, body) = h.call(Method::GET, "/api/v1/recovery", None).await;
    assert_eq!(body["count"], 1);

    // the original still holds "1,2", so overwriting it needs confirmation
    let (status, _) = h
        .call(Method::POST, &format!("/api/v1/recovery/{id}/recover"), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = h
        .call(
            Method::POST,
            &format!("/api/v1/recovery/{id}/recover"),
            Some(json!({ "confirm_overwrite": true })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["record_deleted"], true);
    assert_eq!(h.read("b.docx"), "1,2,3");

    let (_, body) = h.call(Method::DELETE, &format!("/api/v1/recovery/{id}"), None).await;
    assert_eq!(body["deleted"], false);
}

#[tokio::test]
async fn test_recovery_cleanup_and_stats() {
    let h = Harness::new().await;
    let id = h.open("c.docx", "x").await;
    h.append(&id, "y").await;
    h.call(Method::POST, &format!("/api/v1/sessions/{id}/disconnect"), None)
        .await;

    h.clock.advance(chrono::Duration::hours(48));
    let (_, stats) = h.call(Method::GET, "/api/v1/recovery/stats", None).await;
    assert_eq!(stats["expired_count"], 1);
    assert_eq!(stats["retention_hours"], 24);

    let (status, report) = h.call(Method::POST, "/api/v1/recovery/cleanup", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["deleted"], 1);
    assert_eq!(report["errors"], 0);
}

#[tokio::test]
async fn test_bind_push_unbind_over_http() {
    let h = Harness::new().await;
    let id = h.open("a.docx", "preview me").await;

    let (status, body) = h
        .call(
            Method::POST,
            &format!("/api/v1/sessions/{id}/bindings"),
            Some(json!({ "extension_id": "pdf-preview", "format": "docx" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_argument");

    let (status, _) = h
        .call(
            Method::POST,
            &format!("/api/v1/sessions/{id}/bindings"),
            Some(json!({ "extension_id": "pdf-preview", "format": "pdf" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, saved) = h
        .call(Method::POST, &format!("/api/v1/sessions/{id}/save"), Some(json!({})))
        .await;
    assert_eq!(saved["push"]["status"], "delivered");
    assert_eq!(saved["push"]["delivered"], 1);
    assert_eq!(h.transport.delivered.lock().len(), 1);

    let (_, status) = h
        .call(Method::GET, "/api/v1/extensions/pdf-preview/status", None)
        .await;
    assert_eq!(status["active_bindings"], 1);
    assert_eq!(status["state"], "idle");

    let (_, removed) = h
        .call(Method::DELETE, &format!("/api/v1/sessions/{id}/bindings"), None)
        .await;
    assert_eq!(removed["removed"], 1);
    let (_, removed) = h
        .call(Method::DELETE, &format!("/api/v1/sessions/{id}/bindings/pdf-preview"), None)
        .await;
    assert_eq!(removed["removed"], 0);
}

#[tokio::test]
async fn test_extensions_listing_and_unknown_status() {
    let h = Harness::new().await;
    let (_, list) = h.call(Method::GET, "/api/v1/extensions", None).await;
    assert_eq!(list[0]["id"], "pdf-preview");
    assert_eq!(list[0]["available"], false);

    let (_, list) = h.call(Method::POST, "/api/v1/extensions/probe", None).await;
    assert_eq!(list[0]["available"], true);

    let (status, body) = h.call(Method::GET, "/api/v1/extensions/ghost/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "not_found");
}

#[tokio::test]
async fn test_extension_reset() {
    let h = Harness::new().await;
    let (status, body) = h.call(Method::POST, "/api/v1/extensions/pdf-preview/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    assert_eq!(body["restart_count"], 0);

    let (status, body) = h.call(Method::POST, "/api/v1/extensions/ghost/reset", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}
