pub mod qr;

use crate::config::{Config, GatewayConfig};
use crate::dispatch::{DispatchRequest, MessageDispatcher, OverallStatus};
use crate::error::GatewayError;
use crate::recipient::{RecipientResolver, Target};
use crate::session::{SessionController, SessionState};
use crate::transport::{ChatTransport, MediaPayload};
use anyhow::Result;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Everything a request handler needs; cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    api_key: Arc<str>,
    session: Arc<SessionController>,
    resolver: Arc<RecipientResolver>,
    dispatcher: Arc<MessageDispatcher>,
    /// Shared with the dispatcher: logout waits on it so an in-flight batch
    /// always runs to completion before the session is torn down.
    dispatch_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        api_key: &str,
        session: Arc<SessionController>,
        transport: Arc<dyn ChatTransport>,
        country_prefix: &str,
    ) -> Self {
        let dispatch_lock = Arc::new(Mutex::new(()));
        Self {
            api_key: Arc::from(api_key),
            session,
            resolver: Arc::new(RecipientResolver::new(transport.clone(), country_prefix)),
            dispatcher: Arc::new(MessageDispatcher::new(transport, dispatch_lock.clone())),
            dispatch_lock,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(json!({"status": "error", "message": self.to_string()})),
        )
            .into_response()
    }
}

/// Compare secrets without leaking length-of-match timing.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn require_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), GatewayError> {
    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if constant_time_eq(presented, &state.api_key) {
        Ok(())
    } else {
        tracing::warn!("Rejected request with missing or invalid API key");
        Err(GatewayError::InvalidApiKey)
    }
}

// ── Request parsing ───────────────────────────────────────────────

/// The `group` flag arrives as the string "true" from form clients and as a
/// real boolean from JSON clients; both mean the same thing.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GroupFlag {
    Bool(bool),
    Text(String),
}

impl GroupFlag {
    fn is_set(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Text(s) => s == "true",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SendForm {
    group: Option<GroupFlag>,
    #[serde(rename = "groupName")]
    group_name: Option<String>,
    number: Option<String>,
    message: Option<String>,
    caption: Option<String>,
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"status": "error", "message": message})),
    )
        .into_response()
}

async fn parse_multipart(
    mut multipart: Multipart,
) -> Result<(SendForm, Vec<MediaPayload>), Response> {
    let mut form = SendForm::default();
    let mut attachments = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(&format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "files" => {
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let filename = field.file_name().unwrap_or("file").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(&format!("Failed to read file part: {e}")))?;
                attachments.push(MediaPayload {
                    mime_type,
                    filename,
                    data: data.to_vec(),
                });
            }
            other => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| bad_request(&format!("Failed to read field '{other}': {e}")))?;
                match other {
                    "group" => form.group = Some(GroupFlag::Text(value)),
                    "groupName" => form.group_name = Some(value),
                    "number" => form.number = Some(value),
                    "message" => form.message = Some(value),
                    "caption" => form.caption = Some(value),
                    _ => tracing::debug!("Ignoring unknown form field '{other}'"),
                }
            }
        }
    }

    Ok((form, attachments))
}

fn build_dispatch_request(
    form: SendForm,
    attachments: Vec<MediaPayload>,
) -> Result<DispatchRequest, GatewayError> {
    let target = if form.group.as_ref().is_some_and(GroupFlag::is_set) {
        Target::Group(form.group_name.unwrap_or_default())
    } else {
        let number = form
            .number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                GatewayError::InvalidTarget("number is required for direct sends".into())
            })?;
        Target::Direct(number.to_string())
    };

    Ok(DispatchRequest {
        target,
        text: form.message,
        caption: form.caption,
        attachments,
    })
}

// ── Handlers ──────────────────────────────────────────────────────

async fn send_message(
    State(state): State<AppState>,
    req: Request,
) -> Result<Response, GatewayError> {
    require_api_key(&state, req.headers())?;

    // Gate on readiness before touching the recipient or the body.
    if state.session.status().state != SessionState::Ready {
        return Err(GatewayError::SessionNotReady);
    }

    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let (form, attachments) = if is_multipart {
        let multipart = match Multipart::from_request(req, &()).await {
            Ok(m) => m,
            Err(e) => return Ok(bad_request(&format!("Invalid multipart request: {e}"))),
        };
        match parse_multipart(multipart).await {
            Ok(parsed) => parsed,
            Err(response) => return Ok(response),
        }
    } else {
        let bytes = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
            Ok(b) => b,
            Err(e) => return Ok(bad_request(&format!("Failed to read request body: {e}"))),
        };
        let form: SendForm = match serde_json::from_slice(&bytes) {
            Ok(f) => f,
            Err(e) => return Ok(bad_request(&format!("Invalid JSON body: {e}"))),
        };
        (form, Vec::new())
    };

    let request = build_dispatch_request(form, attachments)?;
    if request.is_empty() {
        return Err(GatewayError::EmptyDispatch);
    }

    let recipient = state.resolver.resolve(&request.target).await?;
    let result = state.dispatcher.dispatch(&recipient, &request).await?;

    // Mixed outcomes are reported, not collapsed into a boolean.
    let response = match result.overall {
        OverallStatus::Success => (
            StatusCode::OK,
            Json(json!({"status": "success", "result": result})),
        ),
        OverallStatus::PartialFailure => (
            StatusCode::OK,
            Json(json!({"status": "partial", "result": result})),
        ),
        OverallStatus::Failure => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "message": "All sends failed", "result": result})),
        ),
    };
    Ok(response.into_response())
}

/// Unkeyed: the QR must be fetchable before any session exists.
async fn session_status(State(state): State<AppState>) -> Response {
    let snapshot = state.session.status();
    match (snapshot.state, snapshot.challenge) {
        (SessionState::Ready, _) => {
            Json(json!({"status": "success", "message": "Session is ready"})).into_response()
        }
        (_, Some(challenge)) => match qr::challenge_to_data_url(&challenge) {
            Ok(url) => Json(json!({"status": "waiting", "qr": url})).into_response(),
            Err(e) => {
                tracing::error!("Failed to render challenge: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"status": "error", "message": "Failed to render challenge"})),
                )
                    .into_response()
            }
        },
        _ => Json(json!({"status": "disconnected", "message": "Session is disconnected"}))
            .into_response(),
    }
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, GatewayError> {
    require_api_key(&state, &headers)?;

    // Wait for any in-flight dispatch; hold the lock so no new batch starts
    // mid-teardown.
    let _guard = state.dispatch_lock.lock().await;
    state.session.logout().await;
    Ok(Json(json!({"status": "success", "message": "Logged out"})))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "session": state.session.status().state,
    }))
}

// ── Router & server ───────────────────────────────────────────────

pub fn router(state: AppState, gateway: &GatewayConfig) -> Router {
    Router::new()
        .route("/api/send", post(send_message))
        .route("/api/status", get(session_status))
        .route("/api/logout", post(logout))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(gateway.max_upload_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            gateway.request_timeout_secs,
        )))
        .with_state(state)
}

fn is_public_bind(host: &str) -> bool {
    !(host == "localhost" || host == "::1" || host.starts_with("127."))
}

pub async fn run_gateway(config: &Config, state: AppState) -> Result<()> {
    let host = &config.gateway.host;
    if is_public_bind(host) && !config.gateway.allow_public_bind {
        anyhow::bail!(
            "Refusing to bind to {host} — the gateway would be exposed to the internet.\n\
             Fix: use host 127.0.0.1 (default), or set [gateway] allow_public_bind = true \
             in config.toml (NOT recommended without a reverse proxy)."
        );
    }

    let listener = TcpListener::bind(format!("{host}:{}", config.gateway.port)).await?;
    let addr = listener.local_addr()?;

    println!("wagate gateway listening on http://{addr}");
    println!("  POST /api/send    — dispatch a message (x-api-key required)");
    println!("  GET  /api/status  — session state / pairing QR");
    println!("  POST /api/logout  — unlink and start a fresh cycle");
    println!("  GET  /health      — liveness");
    println!("  Press Ctrl+C to stop.");

    axum::serve(listener, router(state, &config.gateway))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {e}");
        return;
    }
    tracing::info!("Shutdown signal received, stopping gateway");
}
