use thiserror::Error;

/// Gateway error taxonomy.
///
/// `InvalidApiKey` and `SessionNotReady` are rejected at the HTTP boundary
/// before any resolution or dispatch work starts. `RecipientNotFound` aborts
/// a dispatch before the first send, so there is nothing to partially fail.
/// Per-item transport failures inside a batch are recorded in the
/// `DispatchResult` instead of being raised; `Transport` covers failures
/// outside a batch (group enumeration, teardown).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Forbidden: invalid API key")]
    InvalidApiKey,

    #[error("Session is not ready — link a device via /api/status first")]
    SessionNotReady,

    #[error("Invalid recipient: {0}")]
    InvalidTarget(String),

    #[error("Group not found: {0}")]
    RecipientNotFound(String),

    #[error("Nothing to send: no attachments and no message body")]
    EmptyDispatch,

    #[error("Transport error: {0}")]
    Transport(#[source] anyhow::Error),
}

impl GatewayError {
    /// HTTP status the gateway maps this error to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidApiKey => 403,
            Self::SessionNotReady => 503,
            Self::InvalidTarget(_) | Self::EmptyDispatch => 400,
            Self::RecipientNotFound(_) => 404,
            Self::Transport(_) => 500,
        }
    }
}
