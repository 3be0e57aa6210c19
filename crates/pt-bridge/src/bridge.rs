//! The per-connection loop joining one WebSocket to one terminal session.
//!
//! The bridge owns the session for the lifetime of the connection. Whatever
//! way the loop ends (client gone, shell exited, server shutdown, error or
//! panic) the session is deregistered and stopped exactly once.

use std::any::Any;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use pt_core::config::BridgeConfig;
use pt_core::history::CommandHistoryStore;
use pt_core::shutdown::ShutdownSignal;
use pt_session::{PtyError, SessionRegistry, TerminalSession};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::line_capture::LineCapture;
use crate::protocol::{ClientMessage, ServerMessage, Utf8Decoder};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("websocket channel error: {0}")]
    Channel(String),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("bridge panicked: {0}")]
    Panicked(String),
}

/// Why a bridge loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    ShellExited,
    ChannelClosed,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct BridgeSettings {
    pub inbound_timeout: Duration,
    pub poll_interval: Duration,
}

impl From<&BridgeConfig> for BridgeSettings {
    fn from(cfg: &BridgeConfig) -> Self {
        Self {
            inbound_timeout: Duration::from_millis(cfg.inbound_timeout_ms),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

/// Deregisters and stops the session when dropped, including during unwinding.
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    session: Arc<TerminalSession>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let id = self.session.id();
        self.registry.remove(&id);
        self.session.stop();
        debug!(session_id = %id, "bridge released session");
    }
}

enum Flow {
    Continue,
    Close,
}

// ---------------------------------------------------------------------------
// DuplexBridge
// ---------------------------------------------------------------------------

pub struct DuplexBridge {
    registry: Arc<SessionRegistry>,
    session: Arc<TerminalSession>,
    history: Option<Arc<CommandHistoryStore>>,
    settings: BridgeSettings,
    shutdown: ShutdownSignal,
}

impl DuplexBridge {
    /// `session` must already be started and registered in `registry`.
    pub fn new(
        registry: Arc<SessionRegistry>,
        session: Arc<TerminalSession>,
        settings: BridgeSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            registry,
            session,
            history: None,
            settings,
            shutdown,
        }
    }

    /// Record submitted command lines into `store`.
    pub fn with_history(mut self, store: Arc<CommandHistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    /// Drive the session until the shell exits, the client goes away or the
    /// server shuts down. A failed loop is reported to the client as an
    /// `error` frame; the connection is closed in every case.
    pub async fn run<Rx, Tx, E>(self, mut rx: Rx, mut tx: Tx) -> Result<BridgeOutcome, BridgeError>
    where
        Rx: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
        Tx: Sink<Message> + Unpin,
        Tx::Error: Display,
    {
        let session_id = self.session.id();
        let guard = SessionGuard {
            registry: self.registry.clone(),
            session: self.session.clone(),
        };

        let result = AssertUnwindSafe(self.pump(&mut rx, &mut tx))
            .catch_unwind()
            .await;
        // Stopping reaps the child, which blocks.
        if let Err(e) = tokio::task::spawn_blocking(move || drop(guard)).await {
            warn!(%session_id, error = %e, "session cleanup task failed");
        }

        let result = match result {
            Ok(result) => result,
            Err(payload) => Err(BridgeError::Panicked(panic_message(&*payload))),
        };

        match &result {
            Ok(outcome) => info!(%session_id, ?outcome, "terminal bridge finished"),
            Err(e) => {
                error!(%session_id, error = %e, "terminal bridge failed");
                if let Ok(text) = serde_json::to_string(&ServerMessage::error(e.to_string())) {
                    let _ = tx.send(Message::Text(text.into())).await;
                }
            }
        }
        let _ = tx.send(Message::Close(None)).await;
        result
    }

    async fn pump<Rx, Tx, E>(&self, rx: &mut Rx, tx: &mut Tx) -> Result<BridgeOutcome, BridgeError>
    where
        Rx: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
        Tx: Sink<Message> + Unpin,
        Tx::Error: Display,
    {
        let mut decoder = Utf8Decoder::new();
        let mut lines = LineCapture::new();
        let mut shutdown_rx = self.shutdown.subscribe();

        send_frame(tx, &ServerMessage::connected(self.session.id())).await?;

        loop {
            match tokio::time::timeout(self.settings.inbound_timeout, rx.next()).await {
                Err(_) => {}
                Ok(None) => return Ok(BridgeOutcome::ChannelClosed),
                Ok(Some(Err(e))) => {
                    debug!(session_id = %self.session.id(), error = %e, "websocket receive failed");
                    return Ok(BridgeOutcome::ChannelClosed);
                }
                Ok(Some(Ok(msg))) => {
                    if let Flow::Close = self.handle_frame(msg, &mut lines).await {
                        return Ok(BridgeOutcome::ChannelClosed);
                    }
                }
            }

            self.flush_output(tx, &mut decoder).await?;

            if !self.session.is_running() {
                self.flush_output(tx, &mut decoder).await?;
                let tail = decoder.finish();
                if !tail.is_empty() {
                    send_frame(tx, &ServerMessage::output(tail)).await?;
                }
                send_frame(tx, &ServerMessage::disconnected()).await?;
                return Ok(BridgeOutcome::ShellExited);
            }

            if self.shutdown.is_shutting_down() {
                send_frame(tx, &ServerMessage::disconnected()).await?;
                return Ok(BridgeOutcome::Shutdown);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = shutdown_rx.recv() => {
                    send_frame(tx, &ServerMessage::disconnected()).await?;
                    return Ok(BridgeOutcome::Shutdown);
                }
            }
        }
    }

    async fn handle_frame(&self, msg: Message, lines: &mut LineCapture) -> Flow {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(ClientMessage::Input { data }) => {
                    self.record(lines.feed(&data, self.echo_enabled())).await;
                    self.write_input(data.as_bytes());
                }
                Ok(ClientMessage::Resize { rows, cols }) => {
                    if let Err(e) = self.session.resize(rows, cols) {
                        warn!(session_id = %self.session.id(), rows, cols, error = %e, "resize rejected");
                    }
                }
                Err(e) => {
                    debug!(session_id = %self.session.id(), error = %e, "ignoring malformed frame");
                }
            },
            Message::Binary(data) => {
                self.record(lines.feed(&String::from_utf8_lossy(&data), self.echo_enabled()))
                    .await;
                self.write_input(&data);
            }
            Message::Close(_) => return Flow::Close,
            // ping/pong are answered by the transport
            _ => {}
        }
        Flow::Continue
    }

    /// Echo state of the session's terminal; assumed on when unknown.
    fn echo_enabled(&self) -> bool {
        self.session.echo_enabled().unwrap_or(true)
    }

    fn write_input(&self, data: &[u8]) {
        match self.session.write(data) {
            Ok(()) => {}
            // the liveness check right after reports the end of the session
            Err(PtyError::NotRunning) => {}
            Err(e) => {
                warn!(session_id = %self.session.id(), bytes = data.len(), error = %e, "dropped terminal input");
            }
        }
    }

    async fn record(&self, submitted: Vec<String>) {
        let Some(store) = &self.history else {
            return;
        };
        for line in submitted {
            if let Err(e) = store.append(&line).await {
                warn!(session_id = %self.session.id(), error = %e, "failed to record command history");
            }
        }
    }

    async fn flush_output<Tx>(&self, tx: &mut Tx, decoder: &mut Utf8Decoder) -> Result<(), BridgeError>
    where
        Tx: Sink<Message> + Unpin,
        Tx::Error: Display,
    {
        let bytes = self.session.read_available();
        if bytes.is_empty() {
            return Ok(());
        }
        let text = decoder.decode(&bytes);
        if text.is_empty() {
            return Ok(());
        }
        send_frame(tx, &ServerMessage::output(text)).await
    }
}

async fn send_frame<Tx>(tx: &mut Tx, msg: &ServerMessage) -> Result<(), BridgeError>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
{
    let text = serde_json::to_string(msg)?;
    tx.send(Message::Text(text.into()))
        .await
        .map_err(|e| BridgeError::Channel(e.to_string()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
