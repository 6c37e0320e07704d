//! Axum WebSocket transport for the push fabric.
//!
//! The handler upgrades the HTTP request, bridges the socket to the
//! connection engine's channels and lets the engine drive the protocol.
//! Two tasks per socket: one pumps client text frames into the engine, one
//! pumps server frames out; whichever side ends first tears the other down.

use crate::connection::PushConnection;
use crate::subscriptions::SubscriptionRegistry;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use collegium_core::access::PermissionsOracle;
use collegium_core::config::PushConfig;
use collegium_core::signing::Signer;
use futures::{SinkExt, stream::StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared state of the push endpoint.
#[derive(Clone)]
pub struct PushState {
    /// The process-wide subscription registry.
    pub registry: Arc<SubscriptionRegistry>,
    /// The platform signer.
    pub signer: Arc<Signer>,
    /// The permissions oracle.
    pub permissions: Arc<dyn PermissionsOracle>,
    /// Push configuration.
    pub config: PushConfig,
}

/// WebSocket handler; mount with
/// `Router::new().route("/api/push", get(handler::handle)).with_state(state)`.
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn handle(ws: WebSocketUpgrade, State(state): State<PushState>) -> Response {
    info!("push socket requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: PushState) {
    let (mut sender, mut receiver) = socket.split();
    let (in_tx, in_rx) = tokio::sync::mpsc::channel::<String>(64);
    let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel();

    let connection = PushConnection::new(
        state.registry,
        state.signer,
        state.permissions,
        state.config,
    );
    let socket_id = connection.socket_id().to_string();
    info!(socket_id, "push socket established");

    let mut engine_task = tokio::spawn(connection.run(in_rx, out_tx));

    // Client → engine.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    if in_tx.send(text).await.is_err() {
                        break;
                    }
                }
                Message::Binary(_) => {
                    warn!("unexpected binary frame on push socket");
                }
                Message::Ping(_) | Message::Pong(_) => {
                    debug!("keep-alive frame");
                }
                Message::Close(_) => {
                    debug!("client closed push socket");
                    break;
                }
            }
        }
    });

    // Engine → client.
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(error) => {
                    warn!(%error, "server frame serialization failed");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        // Engine finished: close the socket.
        let _ = sender.send(Message::Close(None)).await;
    });

    tokio::select! {
        _ = (&mut engine_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            engine_task.abort();
        }
    }
    // The engine's outgoing sender is gone now, so the send task drains its
    // last frames and closes the socket on its own.
    let _ = (&mut send_task).await;
    info!(socket_id, "push socket closed");
}
