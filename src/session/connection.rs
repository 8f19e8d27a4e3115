//! WebSocket connection handler
//!
//! One task per accepted socket. The read loop hands frames to the
//! dispatcher in arrival order; a separate writer task drains the
//! connection's outbound channel so deliveries from other tasks never
//! interleave mid-frame. Losing the socket, however it happens, runs the
//! same cleanup as an explicit `leaveRoom`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::protocol::ServerEvent;
use crate::server::AppContext;
use crate::ClientId;

/// Query parameters accepted on the `/ws` upgrade
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    /// Stable identity for reconnects; a fresh one is assigned when absent
    #[serde(default, rename = "clientId")]
    pub client_id: Option<String>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(ctx): State<Arc<AppContext>>,
) -> impl IntoResponse {
    let client_id = query
        .client_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, ctx, client_id))
}

pub async fn handle_socket(socket: WebSocket, ctx: Arc<AppContext>, client_id: ClientId) {
    let (mut sink, mut stream) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    ctx.connections.register(client_id.clone(), tx);
    if let Err(e) = ctx.directory.touch(&client_id).await {
        tracing::warn!(client = %client_id, error = %e, "Failed to stamp client record");
    }

    // A returning client whose record still names a room becomes a local
    // delivery target again right away.
    match ctx.directory.room_of(&client_id).await {
        Ok(Some(room_id)) => ctx.directory.rebind_local(&client_id, &room_id),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(client = %client_id, error = %e, "Reconnect lookup failed");
        }
    }

    tracing::info!(client = %client_id, "Client connected");

    // Writer task: the only place that touches the sink, so outbound
    // frames never interleave.
    let writer_id = client_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if sink.send(Message::Text(event.to_json().into())).await.is_err() {
                break;
            }
        }
        tracing::debug!(client = %writer_id, "Writer ended");
    });

    // Ready acknowledgement, delivered through the writer like everything
    // else.
    ctx.connections.send_to(&client_id, ServerEvent::Pong);

    let idle_timeout = ctx.config.idle_timeout;
    loop {
        let frame = tokio::select! {
            _ = &mut writer => break,
            frame = tokio::time::timeout(idle_timeout, stream.next()) => frame,
        };

        match frame {
            Err(_) => {
                tracing::info!(client = %client_id, "Idle timeout, closing");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(client = %client_id, error = %e, "Socket error");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                ctx.dispatcher.handle_frame(&client_id, &text).await;
            }
            Ok(Some(Ok(Message::Close(_)))) => break,
            // Pings are answered by the protocol layer; binary is ignored.
            Ok(Some(Ok(_))) => {}
        }
    }

    ctx.dispatcher.disconnect(&client_id).await;
    ctx.connections.drop_connection(&client_id);
    writer.abort();
    tracing::info!(client = %client_id, "Client disconnected");
}
