use crate::error::GatewayError;
use crate::recipient::{ResolvedRecipient, Target};
use crate::transport::{ChatTransport, MediaPayload};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One logical send: zero-or-more attachments plus an optional text body.
/// Immutable once constructed; lives for a single call.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub target: Target,
    pub text: Option<String>,
    /// Applied to every attachment in the batch, not to the text body.
    pub caption: Option<String>,
    pub attachments: Vec<MediaPayload>,
}

impl DispatchRequest {
    /// True when nothing would be sent. Rejected upstream as a caller error.
    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty() && self.trimmed_text().is_none()
    }

    fn trimmed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum ItemStatus {
    Sent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum TextStatus {
    Sent,
    NotAttempted,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    PartialFailure,
    Failure,
}

/// Per-item accounting for one dispatch. Serialized into the HTTP response
/// so mixed outcomes stay visible to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub overall: OverallStatus,
    pub attachments: Vec<ItemStatus>,
    pub text: TextStatus,
}

/// Sends an ordered batch to a resolved recipient over the shared transport.
///
/// All dispatches serialize on one global lock: the transport is a single
/// shared session, and concurrent sends from one account risk interleaving
/// and magnified rate-limit exposure. Order and caption-per-file association
/// win over throughput here.
pub struct MessageDispatcher {
    transport: Arc<dyn ChatTransport>,
    send_lock: Arc<Mutex<()>>,
}

impl MessageDispatcher {
    pub fn new(transport: Arc<dyn ChatTransport>, send_lock: Arc<Mutex<()>>) -> Self {
        Self {
            transport,
            send_lock,
        }
    }

    /// Send attachments sequentially in input order, then the text body.
    ///
    /// Attachments are independent messages on the wire: one failing never
    /// aborts the rest, and the text is attempted regardless of attachment
    /// outcomes. No automatic retry at any level — retries belong to the
    /// transport or the caller, to avoid duplicate delivery.
    pub async fn dispatch(
        &self,
        recipient: &ResolvedRecipient,
        request: &DispatchRequest,
    ) -> Result<DispatchResult, GatewayError> {
        if request.is_empty() {
            return Err(GatewayError::EmptyDispatch);
        }

        let _guard = self.send_lock.lock().await;

        let mut attachments = Vec::with_capacity(request.attachments.len());
        for media in &request.attachments {
            match self
                .transport
                .send_media(&recipient.chat_id, media, request.caption.as_deref())
                .await
            {
                Ok(()) => attachments.push(ItemStatus::Sent),
                Err(e) => {
                    tracing::warn!(
                        "Attachment '{}' to {} failed: {e:#}",
                        media.filename,
                        recipient.chat_id
                    );
                    attachments.push(ItemStatus::Failed(e.to_string()));
                }
            }
        }

        let text = match request.trimmed_text() {
            None => TextStatus::NotAttempted,
            Some(body) => match self.transport.send_text(&recipient.chat_id, body).await {
                Ok(()) => TextStatus::Sent,
                Err(e) => {
                    tracing::warn!("Text message to {} failed: {e:#}", recipient.chat_id);
                    TextStatus::Failed(e.to_string())
                }
            },
        };

        Ok(DispatchResult {
            overall: aggregate(&attachments, &text),
            attachments,
            text,
        })
    }
}

fn aggregate(attachments: &[ItemStatus], text: &TextStatus) -> OverallStatus {
    let mut sent = 0usize;
    let mut failed = 0usize;
    for item in attachments {
        match item {
            ItemStatus::Sent => sent += 1,
            ItemStatus::Failed(_) => failed += 1,
        }
    }
    match text {
        TextStatus::Sent => sent += 1,
        TextStatus::Failed(_) => failed += 1,
        TextStatus::NotAttempted => {}
    }
    match (sent, failed) {
        (_, 0) => OverallStatus::Success,
        (0, _) => OverallStatus::Failure,
        _ => OverallStatus::PartialFailure,
    }
}
