//! Media bridge WebSocket.
//!
//! A media worker that has joined the call's room with the bot token connects
//! to `/media/{roomName}`. Binary messages from the worker are caller audio;
//! binary messages to the worker are synthesized replies to publish. The
//! socket closing counts as the media leg going away.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Extension, Path, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use parley_voice::{media_closed_event, MediaAttachment, TransportEvent};
use std::sync::Arc;

/// Handler for `GET /media/{roomName}`.
///
/// Rejects the upgrade with `404` if no call is waiting for media in the room
/// and with `409` if another worker is already attached.
pub async fn media_ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room_name): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.bridge.is_registered(&room_name) {
        tracing::warn!(room = %room_name, "media attach for unknown room");
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("no call in room {}", room_name) })),
        )
            .into_response();
    }
    if state.bridge.is_attached(&room_name) {
        tracing::warn!(room = %room_name, "media already attached");
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": format!("media for room {} is already attached", room_name) })),
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_media_socket(socket, state, room_name))
}

async fn handle_media_socket(socket: WebSocket, state: Arc<AppState>, room_name: String) {
    // Attach only once the upgrade has completed so an aborted handshake
    // cannot leave the room marked as attached.
    let MediaAttachment {
        attachment_id,
        events,
        mut outbound,
        ..
    } = match state.bridge.attach(&room_name) {
        Ok(attachment) => attachment,
        Err(e) => {
            tracing::warn!(room = %room_name, "media attach failed after upgrade: {}", e);
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();

    if events.send(TransportEvent::Connected).await.is_err() {
        state.bridge.detach(&room_name, attachment_id);
        return;
    }
    tracing::info!(room = %room_name, attachment_id, "media worker attached");

    // Forward synthesized audio until the session releases the link.
    let mut send_task = tokio::spawn(async move {
        while let Some(audio) = outbound.recv().await {
            if sender.send(Message::Binary(audio.into())).await.is_err() {
                return;
            }
        }
        let _ = sender.close().await;
    });

    let mut frames: u64 = 0;
    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Binary(frame))) => {
                    frames += 1;
                    if events
                        .send(TransportEvent::RemoteAudioFrame(frame.to_vec()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = &mut send_task => break,
        }
    }
    send_task.abort();

    tracing::info!(room = %room_name, attachment_id, frames, "media worker detached");

    // Only report the loss if the session still owns this link.
    if let Some(events) = state.bridge.detach(&room_name, attachment_id) {
        let _ = events.send(media_closed_event()).await;
    }
}
