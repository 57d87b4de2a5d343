//! services/api/src/web/chat_task.rs
//!
//! This module contains the asynchronous "worker" function that drives one
//! send through the chat controller and forwards its events over the socket.

use crate::web::{
    protocol::{ConversationPayload, MessagePayload, ServerMessage},
    state::SessionState,
};
use axum::extract::ws::{Message, WebSocket};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use study_core::{
    ports::{PortError, PortResult},
    SendEvent,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Serializes and sends one server message. Returns `false` when the client
/// is gone, so callers can stop forwarding.
pub async fn send_server_message(
    ws_sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    message: &ServerMessage,
) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize server message: {}", e);
            return true;
        }
    };
    ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await
        .is_ok()
}

/// The main asynchronous task for one send-message interaction.
///
/// Opens the event stream on the session's chat controller and forwards each
/// event to the client until the send settles. Rollback on failure happens
/// inside the controller; this task only reports it.
pub async fn send_process(
    session_state_lock: Arc<Mutex<SessionState>>,
    ws_sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    subject_id: Uuid,
    conversation_id: Option<Uuid>,
    content: String,
    cancel: CancellationToken,
) -> PortResult<()> {
    let events = {
        let session = session_state_lock.lock().await;
        session
            .chat
            .send_message(subject_id, conversation_id, &content, cancel)
            .await
    };

    let mut events = match events {
        Ok(stream) => stream,
        Err(e) => {
            // Validation and re-entrancy failures never mutate anything, so a
            // plain report is enough.
            let report = ServerMessage::SendFailed {
                conversation_id,
                error: e.to_string(),
            };
            if !send_server_message(&ws_sender, &report).await {
                return Err(PortError::Unexpected(
                    "Failed to send rejection to client.".to_string(),
                ));
            }
            return Ok(());
        }
    };

    while let Some(event) = events.next().await {
        let outgoing = match event {
            SendEvent::ConversationCreated { conversation } => ServerMessage::ConversationCreated {
                conversation: ConversationPayload::from(&conversation),
            },
            SendEvent::Chunk {
                conversation_id,
                text,
            } => ServerMessage::Chunk {
                conversation_id,
                text,
            },
            SendEvent::Completed {
                conversation_id,
                user_message,
                assistant_message,
            } => {
                info!(conversation = %conversation_id, "Send completed");
                ServerMessage::SendCompleted {
                    conversation_id,
                    user_message: MessagePayload::from(&user_message),
                    assistant_message: MessagePayload::from(&assistant_message),
                }
            }
            SendEvent::Failed {
                conversation_id,
                error,
            } => {
                warn!(?conversation_id, "Send failed: {}", error);
                ServerMessage::SendFailed {
                    conversation_id,
                    error,
                }
            }
        };

        if !send_server_message(&ws_sender, &outgoing).await {
            // The client disconnected mid-send. Dropping the event stream
            // releases the in-flight slot; the per-connection store goes
            // away with the socket.
            return Err(PortError::Unexpected(
                "Client disconnected while streaming.".to_string(),
            ));
        }
    }

    Ok(())
}
