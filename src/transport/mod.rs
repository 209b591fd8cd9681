pub mod console;

pub use console::ConsoleTransport;

use crate::config::Config;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle events emitted by a transport, consumed by the session
/// controller's event loop in FIFO order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A fresh pairing challenge. Supersedes any previous one.
    Qr(String),
    /// The remote side accepted the scanned challenge; the session is not
    /// usable yet.
    Authenticated,
    /// The session is linked and can send.
    Ready,
    /// Authentication was rejected. Not retried automatically.
    AuthFailure(String),
    /// The link dropped. The controller tears down and re-initializes.
    Disconnected(String),
}

/// One entry from the transport's chat enumeration.
#[derive(Debug, Clone)]
pub struct ChatSummary {
    /// Transport-addressable chat identifier.
    pub id: String,
    /// Display name as shown to users.
    pub name: String,
    pub is_group: bool,
}

/// An attachment as it travels to the transport: raw bytes plus the metadata
/// the remote network needs to present it.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub mime_type: String,
    pub filename: String,
    pub data: Vec<u8>,
}

/// Opaque chat-protocol capability — implement for any messaging backend.
///
/// `connect` begins a connection cycle and returns promptly; linking progress
/// arrives as [`TransportEvent`]s on the channel handed to the implementation
/// at construction time. Send primitives may block on network I/O and carry
/// no internal timeout; callers impose one at the boundary.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Human-readable transport name.
    fn name(&self) -> &str;

    /// Start (or restart) a connection cycle.
    async fn connect(&self) -> Result<()>;

    /// Tear down the current connection, keeping credentials.
    async fn disconnect(&self) -> Result<()>;

    /// Invalidate the linked session on the remote side.
    async fn logout(&self) -> Result<()>;

    /// Enumerate all chats visible to the linked account.
    async fn list_chats(&self) -> Result<Vec<ChatSummary>>;

    /// Send a plain text message to a chat.
    async fn send_text(&self, chat_id: &str, body: &str) -> Result<()>;

    /// Send one media item, with an optional caption, to a chat.
    async fn send_media(
        &self,
        chat_id: &str,
        media: &MediaPayload,
        caption: Option<&str>,
    ) -> Result<()>;
}

/// Build the transport selected by `transport.mode` in the config.
///
/// The real chat-protocol engine lives outside this crate; embedders provide
/// their own [`ChatTransport`]. The built-in `console` mode keeps the binary
/// runnable for local development and deployment smoke tests.
pub fn create_transport(
    config: &Config,
    events: mpsc::Sender<TransportEvent>,
) -> Result<Arc<dyn ChatTransport>> {
    match config.transport.mode.as_str() {
        "console" => Ok(Arc::new(ConsoleTransport::new(events))),
        other => anyhow::bail!(
            "Unknown transport mode '{other}' — supported modes: console. \
             Embed wagate as a library to plug in a real chat backend."
        ),
    }
}
