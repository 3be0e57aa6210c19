use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::bridge::DuplexBridge;
use crate::http_api::ApiState;
use crate::origin_validation::validate_websocket_origin;
use crate::protocol::ServerMessage;

/// GET /ws/terminal: each accepted connection gets its own shell.
///
/// Upgrades from an origin outside `allowed_origins` are refused with 403
/// before any session exists.
pub async fn terminal_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(status) = validate_websocket_origin(&headers, &state.allowed_origins) {
        warn!(
            origin = ?headers.get("origin"),
            "rejected terminal websocket from disallowed origin"
        );
        return status.into_response();
    }
    ws.on_upgrade(move |socket| handle_terminal_ws(socket, state))
        .into_response()
}

async fn handle_terminal_ws(socket: WebSocket, state: Arc<ApiState>) {
    let (mut ws_sender, ws_receiver) = socket.split();

    // openpty and spawn block; keep them off the async workers.
    let registry = state.registry.clone();
    let created = tokio::task::spawn_blocking(move || registry.create())
        .await
        .map_err(|e| format!("session start task failed: {e}"))
        .and_then(|r| r.map_err(|e| e.to_string()));

    let session = match created {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "failed to start terminal session");
            let frame = ServerMessage::error(format!("failed to start terminal: {e}"));
            if let Ok(text) = serde_json::to_string(&frame) {
                let _ = ws_sender.send(Message::Text(text.into())).await;
            }
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };
    debug!(session_id = %session.id(), "terminal websocket attached");

    let bridge = DuplexBridge::new(
        state.registry.clone(),
        session,
        state.bridge,
        state.shutdown.clone(),
    )
    .with_history(state.history.clone());

    // The outcome and any error are already logged and reported by the bridge.
    let _ = bridge.run(ws_receiver, ws_sender).await;
}
