use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::application::error::HandshakeError;
use crate::application::messages::{ClientMessage, ServerFrame};
use crate::bootstrap::app_context::AppContext;
use crate::domain::{ClientId, RoomId};
use crate::infrastructure::metrics;

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub room: Option<String>,
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

/// Validated handshake parameters. `room` is required; a missing/empty value
/// is `HandshakeError::MissingRoomParam`, which the caller closes the socket
/// with code 1008 for.
fn parse_handshake(query: &ConnectQuery) -> Result<(RoomId, ClientId), HandshakeError> {
    let room = query
        .room
        .as_deref()
        .and_then(RoomId::new)
        .ok_or(HandshakeError::MissingRoomParam)?;
    let client_id = query
        .client_id
        .clone()
        .filter(|s| !s.is_empty())
        .map(ClientId::new)
        .unwrap_or_else(ClientId::mint);
    Ok((room, client_id))
}

pub async fn axum_ws_entry(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(ctx): State<AppContext>,
) -> impl IntoResponse {
    match parse_handshake(&query) {
        Ok((room_id, client_id)) => {
            ws.on_upgrade(move |socket| handle_socket(socket, ctx, room_id, client_id))
        }
        Err(HandshakeError::MissingRoomParam) => {
            ws.on_upgrade(|socket| close_with(socket, 1008, "room parameter is required"))
        }
        Err(e) => {
            tracing::warn!(error = %e, "ws_handshake_failed");
            ws.on_upgrade(|socket| close_with(socket, 1011, "internal error"))
        }
    }
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

async fn handle_socket(socket: WebSocket, ctx: AppContext, room_id: RoomId, client_id: ClientId) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    let room = ctx
        .room_manager
        .attach(&room_id, client_id.clone(), outbound_tx.clone())
        .await;
    tracing::info!(room = %room_id, client = %client_id, "ws_attached");

    let snapshot = ctx.room_manager.encode_snapshot(&room).await;
    let frame = ServerFrame::snapshot(snapshot).to_json();
    if outbound_tx.send(frame).is_err() {
        ctx.room_manager.detach(&room_id, &client_id).await;
        return;
    }
    metrics::MESSAGES_SENT_TOTAL.inc();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(room = %room_id, client = %client_id, error = %e, "ws_recv_error");
                break;
            }
        };
        match msg {
            Message::Text(text) => {
                if let Some(parsed) = ClientMessage::parse(&text) {
                    if parsed.is_actionable_update() {
                        if let Some(update_b64) = parsed.update.as_deref() {
                            match BASE64.decode(update_b64) {
                                Ok(bytes) => {
                                    ctx.room_manager
                                        .apply_local_update(&room_id, &client_id, &bytes)
                                        .await;
                                }
                                Err(e) => {
                                    tracing::warn!(room = %room_id, error = %e, "client_update_base64_decode_failed");
                                }
                            }
                        }
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    ctx.room_manager.detach(&room_id, &client_id).await;
    tracing::info!(room = %room_id, client = %client_id, "ws_detached");
}
