use super::{ChatSummary, ChatTransport, MediaPayload, TransportEvent};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Console transport — stdin/stdout, always available, zero network.
///
/// Simulates the full linking handshake for local development: `connect`
/// issues a fresh synthetic challenge, and pressing Enter stands in for
/// scanning it. Outbound messages are printed instead of delivered.
pub struct ConsoleTransport {
    events: mpsc::Sender<TransportEvent>,
    linked: Arc<AtomicBool>,
    waiter_active: Arc<AtomicBool>,
}

impl ConsoleTransport {
    pub fn new(events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            events,
            linked: Arc::new(AtomicBool::new(false)),
            waiter_active: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_linked(&self) -> bool {
        self.linked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    async fn connect(&self) -> Result<()> {
        let challenge = format!("wagate-link:{}", Uuid::new_v4());
        self.events
            .send(TransportEvent::Qr(challenge))
            .await
            .map_err(|e| anyhow::anyhow!("event channel closed: {e}"))?;

        // One stdin waiter per link cycle.
        if self.waiter_active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let events = self.events.clone();
        let linked = self.linked.clone();
        let waiter_active = self.waiter_active.clone();
        tokio::spawn(async move {
            eprintln!("Console transport: press Enter to simulate scanning the challenge.");
            let mut lines = BufReader::new(io::stdin()).lines();
            let scanned = matches!(lines.next_line().await, Ok(Some(_)));
            waiter_active.store(false, Ordering::SeqCst);
            if !scanned {
                let _ = events
                    .send(TransportEvent::AuthFailure("stdin closed".into()))
                    .await;
                return;
            }
            linked.store(true, Ordering::SeqCst);
            let _ = events.send(TransportEvent::Authenticated).await;
            let _ = events.send(TransportEvent::Ready).await;
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.linked.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.linked.store(false, Ordering::SeqCst);
        tracing::info!("Console transport: session unlinked");
        Ok(())
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>> {
        if !self.is_linked() {
            anyhow::bail!("Console transport not linked");
        }
        Ok(vec![ChatSummary {
            id: "console@g.us".into(),
            name: "Console".into(),
            is_group: true,
        }])
    }

    async fn send_text(&self, chat_id: &str, body: &str) -> Result<()> {
        if !self.is_linked() {
            anyhow::bail!("Console transport not linked");
        }
        println!("[{chat_id}] {body}");
        Ok(())
    }

    async fn send_media(
        &self,
        chat_id: &str,
        media: &MediaPayload,
        caption: Option<&str>,
    ) -> Result<()> {
        if !self.is_linked() {
            anyhow::bail!("Console transport not linked");
        }
        println!(
            "[{chat_id}] <{} {} ({} bytes)>{}",
            media.mime_type,
            media.filename,
            media.data.len(),
            caption.map(|c| format!(" {c}")).unwrap_or_default()
        );
        Ok(())
    }
}
