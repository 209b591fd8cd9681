use crate::transport::{ChatTransport, TransportEvent};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Session lifecycle states. Exactly one is active at any time.
///
/// `Ready` implies no pending challenge; entering `Disconnected` or
/// `LoggedOut` clears the challenge and forces a fresh connection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    QrPending,
    Authenticating,
    Ready,
    Disconnected,
    LoggedOut,
}

/// Point-in-time view of the session. Cheap to take, never touches the
/// network.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub challenge: Option<String>,
}

struct Inner {
    state: SessionState,
    challenge: Option<String>,
    init_in_flight: bool,
    restart_queued: bool,
}

/// Owns the session state machine over transport lifecycle events.
///
/// The controller is the single writer of session state; everything else
/// reads snapshots. Events are consumed FIFO by one loop task, so transitions
/// never race each other.
pub struct SessionController {
    transport: Arc<dyn ChatTransport>,
    inner: Mutex<Inner>,
}

impl SessionController {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            inner: Mutex::new(Inner {
                state: SessionState::Initializing,
                challenge: None,
                init_in_flight: false,
                restart_queued: false,
            }),
        })
    }

    /// Create the controller and start its event loop.
    pub fn spawn(
        transport: Arc<dyn ChatTransport>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let controller = Self::new(transport);
        let looped = controller.clone();
        let handle = tokio::spawn(async move {
            looped.run_event_loop(events).await;
        });
        (controller, handle)
    }

    async fn run_event_loop(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.on_transport_event(event).await;
        }
        tracing::debug!("Transport event channel closed; session event loop exiting");
    }

    /// Apply one lifecycle event to the state machine.
    pub async fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Qr(code) => {
                tracing::info!("Pairing challenge received");
                let mut inner = self.inner.lock();
                inner.state = SessionState::QrPending;
                inner.challenge = Some(code);
            }
            TransportEvent::Authenticated => {
                let mut inner = self.inner.lock();
                match inner.state {
                    SessionState::QrPending | SessionState::Authenticating => {
                        // Challenge stays visible until `Ready` confirms the link.
                        inner.state = SessionState::Authenticating;
                        tracing::info!("Challenge accepted, finalizing link");
                    }
                    other => {
                        tracing::debug!("Ignoring authenticated event in state {other:?}");
                    }
                }
            }
            TransportEvent::Ready => {
                tracing::info!("Session is ready");
                let mut inner = self.inner.lock();
                inner.state = SessionState::Ready;
                inner.challenge = None;
            }
            TransportEvent::AuthFailure(reason) => {
                // Surfaced via status, never retried automatically — repeated
                // retries against bad credentials invite remote rate limits.
                tracing::warn!("Authentication failed: {reason}");
                self.inner.lock().state = SessionState::Initializing;
            }
            TransportEvent::Disconnected(reason) => {
                tracing::warn!("Transport disconnected: {reason}");
                {
                    let mut inner = self.inner.lock();
                    inner.state = SessionState::Disconnected;
                    inner.challenge = None;
                }
                if let Err(e) = self.transport.disconnect().await {
                    tracing::warn!("Transport teardown failed: {e:#}");
                }
                self.initialize().await;
            }
        }
    }

    /// Start (or restart) the transport connection cycle.
    ///
    /// Idempotent and re-entrant: a call that lands while a cycle is already
    /// starting is queued and runs once the current attempt returns, never
    /// dropped and never double-started.
    pub async fn initialize(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.init_in_flight {
                inner.restart_queued = true;
                tracing::debug!("Initialize already in flight; restart queued");
                return;
            }
            inner.init_in_flight = true;
            inner.state = SessionState::Initializing;
        }

        loop {
            if let Err(e) = self.transport.connect().await {
                // Surfaced via status and logs; the next logout or disconnect
                // starts a fresh cycle. The process stays up.
                tracing::error!("Transport connect failed: {e:#}");
            }
            let run_again = {
                let mut inner = self.inner.lock();
                if inner.restart_queued {
                    inner.restart_queued = false;
                    inner.state = SessionState::Initializing;
                    true
                } else {
                    inner.init_in_flight = false;
                    false
                }
            };
            if !run_again {
                break;
            }
            tracing::info!("Running queued session restart");
        }
    }

    /// Unlink the session and begin a fresh cycle (new challenge expected).
    ///
    /// Callers that must not interrupt an in-flight dispatch hold the global
    /// dispatch lock across this call.
    pub async fn logout(&self) {
        let was_ready = self.inner.lock().state == SessionState::Ready;
        if was_ready {
            if let Err(e) = self.transport.logout().await {
                tracing::warn!("Transport logout failed: {e:#}");
            }
        }
        {
            let mut inner = self.inner.lock();
            inner.state = SessionState::LoggedOut;
            inner.challenge = None;
        }
        self.initialize().await;
    }

    /// Snapshot of the current state. Never blocks on I/O.
    pub fn status(&self) -> StatusSnapshot {
        let inner = self.inner.lock();
        StatusSnapshot {
            state: inner.state,
            challenge: inner.challenge.clone(),
        }
    }
}
