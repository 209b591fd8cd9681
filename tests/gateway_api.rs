//! Integration tests for the HTTP gateway surface.
//!
//! These tests validate that:
//! 1. Every keyed endpoint rejects missing or wrong `x-api-key` values
//! 2. Sends are refused with 503 while the session is not linked
//! 3. Direct and group targets resolve to the right chat ids
//! 4. Multipart uploads dispatch attachments before the text body
//! 5. Mixed send outcomes surface as `partial` instead of a blanket error
//! 6. The status endpoint serves a PNG data-URL challenge while pairing

use anyhow::{Result, bail};
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tower::ServiceExt;

use wagate::config::GatewayConfig;
use wagate::gateway::{AppState, router};
use wagate::session::SessionController;
use wagate::transport::{ChatSummary, ChatTransport, MediaPayload, TransportEvent};

const API_KEY: &str = "integration-test-key";

/// Transport with a fixed chat list and a send log. Sends addressed to a
/// filename or body starting with "bad" fail; everything else succeeds.
struct ScriptedTransport {
    chats: Vec<ChatSummary>,
    log: StdMutex<Vec<String>>,
    events: Option<mpsc::Sender<TransportEvent>>,
    connects: AtomicUsize,
}

impl ScriptedTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            chats: vec![
                ChatSummary {
                    id: "someone@c.us".into(),
                    name: "Family Chat".into(),
                    is_group: false,
                },
                ChatSummary {
                    id: "family@g.us".into(),
                    name: "Family Chat".into(),
                    is_group: true,
                },
            ],
            log: StdMutex::new(Vec::new()),
            events: None,
            connects: AtomicUsize::new(0),
        })
    }

    /// Variant whose `connect` emits a fresh pairing challenge each cycle.
    fn with_events(events: mpsc::Sender<TransportEvent>) -> Arc<Self> {
        Arc::new(Self {
            chats: Vec::new(),
            log: StdMutex::new(Vec::new()),
            events: Some(events),
            connects: AtomicUsize::new(0),
        })
    }

    fn log_entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self) -> Result<()> {
        let cycle = self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(events) = &self.events {
            let _ = events
                .send(TransportEvent::Qr(format!("pair-cycle-{cycle}")))
                .await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.log.lock().unwrap().push("logout".into());
        Ok(())
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>> {
        Ok(self.chats.clone())
    }

    async fn send_text(&self, chat_id: &str, body: &str) -> Result<()> {
        if body.starts_with("bad") {
            bail!("scripted text failure");
        }
        self.log.lock().unwrap().push(format!("text:{chat_id}:{body}"));
        Ok(())
    }

    async fn send_media(
        &self,
        chat_id: &str,
        media: &MediaPayload,
        caption: Option<&str>,
    ) -> Result<()> {
        if media.filename.starts_with("bad") {
            bail!("scripted media failure");
        }
        self.log.lock().unwrap().push(format!(
            "media:{chat_id}:{}:{}",
            media.filename,
            caption.unwrap_or("-")
        ));
        Ok(())
    }
}

fn test_app(transport: Arc<ScriptedTransport>) -> (Router, Arc<SessionController>) {
    let session = SessionController::new(transport.clone());
    let state = AppState::new(API_KEY, session.clone(), transport, "91");
    (router(state, &GatewayConfig::default()), session)
}

async fn ready_app(transport: Arc<ScriptedTransport>) -> (Router, Arc<SessionController>) {
    let (app, session) = test_app(transport);
    session.on_transport_event(TransportEvent::Ready).await;
    (app, session)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_send(key: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/send")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

// ── Authentication ────────────────────────────────────────────────

#[tokio::test]
async fn send_rejects_missing_api_key() {
    let (app, _) = ready_app(ScriptedTransport::new()).await;
    let request = json_send(None, &serde_json::json!({"number": "1", "message": "hi"}));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn send_rejects_wrong_api_key() {
    let (app, _) = ready_app(ScriptedTransport::new()).await;
    let request = json_send(
        Some("not-the-key"),
        &serde_json::json!({"number": "1", "message": "hi"}),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn logout_rejects_missing_api_key() {
    let (app, _) = ready_app(ScriptedTransport::new()).await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/logout")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ── Readiness gate ────────────────────────────────────────────────

#[tokio::test]
async fn send_refused_while_session_not_linked() {
    let transport = ScriptedTransport::new();
    let (app, _) = test_app(transport.clone());
    let request = json_send(
        Some(API_KEY),
        &serde_json::json!({"number": "9876543210", "message": "hi"}),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(transport.log_entries().is_empty());
}

// ── Target resolution ─────────────────────────────────────────────

#[tokio::test]
async fn direct_send_applies_country_prefix() {
    let transport = ScriptedTransport::new();
    let (app, _) = ready_app(transport.clone()).await;
    let request = json_send(
        Some(API_KEY),
        &serde_json::json!({"number": "9876543210", "message": "hello"}),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(
        transport.log_entries(),
        vec!["text:919876543210@c.us:hello".to_string()]
    );
}

#[tokio::test]
async fn group_send_matches_name_case_insensitively() {
    let transport = ScriptedTransport::new();
    let (app, _) = ready_app(transport.clone()).await;
    let request = json_send(
        Some(API_KEY),
        &serde_json::json!({"group": true, "groupName": "FAMILY chat", "message": "hi all"}),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // Resolves to the group chat, not the direct chat with the same name.
    assert_eq!(
        transport.log_entries(),
        vec!["text:family@g.us:hi all".to_string()]
    );
}

#[tokio::test]
async fn unknown_group_is_404() {
    let (app, _) = ready_app(ScriptedTransport::new()).await;
    let request = json_send(
        Some(API_KEY),
        &serde_json::json!({"group": true, "groupName": "nope", "message": "hi"}),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn direct_send_without_number_is_400() {
    let (app, _) = ready_app(ScriptedTransport::new()).await;
    let request = json_send(Some(API_KEY), &serde_json::json!({"message": "hi"}));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_dispatch_is_400() {
    let (app, _) = ready_app(ScriptedTransport::new()).await;
    let request = json_send(Some(API_KEY), &serde_json::json!({"number": "9876543210"}));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ── Multipart dispatch ────────────────────────────────────────────

fn multipart_send(parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
    let boundary = "wagate-test-boundary";
    let mut body = String::new();
    for (name, filename, value) in parts {
        body.push_str(&format!("--{boundary}\r\n"));
        match filename {
            Some(filename) => {
                body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                ));
            }
            None => {
                body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                ));
            }
        }
        body.push_str(value);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{boundary}--\r\n"));

    Request::builder()
        .method("POST")
        .uri("/api/send")
        .header("x-api-key", API_KEY)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn multipart_sends_attachments_then_text() {
    let transport = ScriptedTransport::new();
    let (app, _) = ready_app(transport.clone()).await;

    let request = multipart_send(&[
        ("number", None, "9876543210"),
        ("caption", None, "trip pics"),
        ("message", None, "sent everything"),
        ("files", Some("one.png"), "PNGDATA1"),
        ("files", Some("two.png"), "PNGDATA2"),
    ]);
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(
        transport.log_entries(),
        vec![
            "media:919876543210@c.us:one.png:trip pics".to_string(),
            "media:919876543210@c.us:two.png:trip pics".to_string(),
            "text:919876543210@c.us:sent everything".to_string(),
        ]
    );
}

#[tokio::test]
async fn failed_attachment_yields_partial_with_text_still_sent() {
    let transport = ScriptedTransport::new();
    let (app, _) = ready_app(transport.clone()).await;

    let request = multipart_send(&[
        ("number", None, "9876543210"),
        ("message", None, "still delivered"),
        ("files", Some("bad.png"), "X"),
        ("files", Some("fine.png"), "Y"),
    ]);
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "partial");
    assert_eq!(body["result"]["attachments"][0]["status"], "failed");
    assert_eq!(body["result"]["attachments"][1]["status"], "sent");
    assert_eq!(
        transport.log_entries(),
        vec![
            "media:919876543210@c.us:fine.png:-".to_string(),
            "text:919876543210@c.us:still delivered".to_string(),
        ]
    );
}

#[tokio::test]
async fn all_sends_failing_is_500() {
    let (app, _) = ready_app(ScriptedTransport::new()).await;
    let request = json_send(
        Some(API_KEY),
        &serde_json::json!({"number": "9876543210", "message": "bad news"}),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
}

// ── Status & health ───────────────────────────────────────────────

#[tokio::test]
async fn status_serves_qr_data_url_while_pairing() {
    let transport = ScriptedTransport::new();
    let (app, session) = test_app(transport);
    session
        .on_transport_event(TransportEvent::Qr("pairing-challenge".into()))
        .await;

    let request = Request::builder()
        .uri("/api/status")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "waiting");
    let qr = body["qr"].as_str().unwrap();
    assert!(qr.starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn status_reports_ready_without_challenge() {
    let (app, _) = ready_app(ScriptedTransport::new()).await;
    let request = Request::builder()
        .uri("/api/status")
        .body(Body::empty())
        .unwrap();
    let body = body_json(app.oneshot(request).await.unwrap()).await;
    assert_eq!(body["status"], "success");
    assert!(body.get("qr").is_none());
}

#[tokio::test]
async fn status_reports_disconnected_without_challenge() {
    let (app, _) = test_app(ScriptedTransport::new());
    let request = Request::builder()
        .uri("/api/status")
        .body(Body::empty())
        .unwrap();
    let body = body_json(app.oneshot(request).await.unwrap()).await;
    assert_eq!(body["status"], "disconnected");
}

#[tokio::test]
async fn health_reports_session_state() {
    let (app, _) = ready_app(ScriptedTransport::new()).await;
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let body = body_json(app.oneshot(request).await.unwrap()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["session"], "ready");
}

// ── Logout ────────────────────────────────────────────────────────

#[tokio::test]
async fn logout_unlinks_and_yields_a_fresh_challenge() {
    let (events_tx, events_rx) = mpsc::channel(8);
    let transport = ScriptedTransport::with_events(events_tx);
    let (session, _loop_handle) = SessionController::spawn(transport.clone(), events_rx);
    let state = AppState::new(API_KEY, session.clone(), transport.clone(), "91");
    let app = router(state, &GatewayConfig::default());

    session.initialize().await;
    let first = wait_for_challenge(&session).await;

    // Link, then log out through the gateway.
    session.on_transport_event(TransportEvent::Ready).await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/logout")
        .header("x-api-key", API_KEY)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(transport.log_entries().contains(&"logout".to_string()));

    // A new cycle starts with a challenge the old one never saw.
    let second = wait_for_challenge(&session).await;
    assert_ne!(first, second);
}

async fn wait_for_challenge(session: &SessionController) -> String {
    for _ in 0..200 {
        if let Some(challenge) = session.status().challenge {
            return challenge;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("no pairing challenge observed");
}
