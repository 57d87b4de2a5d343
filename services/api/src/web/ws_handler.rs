//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! It hydrates the per-connection session, then dispatches client commands.

use crate::web::{
    chat_task::{send_process, send_server_message},
    protocol::{ClientMessage, ServerMessage, SubjectPayload},
    state::{AppState, SessionState},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::stream::{SplitSink, StreamExt};
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    info!("New WebSocket connection established for user: {}", user_id);

    // The sender is wrapped in an Arc<Mutex<>> to allow for shared mutable access across tasks.
    let (sender, mut receiver) = socket.split();
    let ws_sender = Arc::new(Mutex::new(sender));

    // --- 1. Hydration Phase ---
    let session_state_lock = match SessionState::new(app_state.clone(), user_id).await {
        Ok(state) => Arc::new(Mutex::new(state)),
        Err(e) => {
            error!("Failed to hydrate session for user {}: {:?}", user_id, e);
            let report = ServerMessage::Error {
                message: "Failed to load session data.".to_string(),
            };
            let _ = send_server_message(&ws_sender, &report).await;
            return;
        }
    };

    // Announce the full sidebar snapshot before accepting commands.
    let ready = {
        let session = session_state_lock.lock().await;
        let store = session.chat.store();
        let store = store.lock().await;
        ServerMessage::SessionReady {
            subjects: store
                .ordered_subjects()
                .into_iter()
                .map(SubjectPayload::from_subject)
                .collect(),
        }
    };
    if !send_server_message(&ws_sender, &ready).await {
        error!("Failed to send session snapshot.");
        return;
    }

    // --- 2. Main Message Loop ---
    let mut send_task_handle: Option<JoinHandle<()>> = None;

    loop {
        if let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_message(
                        text.to_string(),
                        &app_state,
                        &session_state_lock,
                        &ws_sender,
                        &mut send_task_handle,
                    )
                    .await;
                }
                Message::Close(_) => {
                    info!("Client sent close message.");
                    break;
                }
                _ => {}
            }
        } else {
            info!("Client disconnected.");
            break;
        }
    }

    // --- 3. Cleanup ---
    {
        let session = session_state_lock.lock().await;
        session.cancellation_token.cancel();
    }
    if let Some(handle) = send_task_handle {
        handle.abort();
    }
    info!("WebSocket connection closed.");
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(
    text: String,
    app_state: &Arc<AppState>,
    session_state_lock: &Arc<Mutex<SessionState>>,
    ws_sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    send_task_handle: &mut Option<JoinHandle<()>>,
) {
    match serde_json::from_str::<ClientMessage>(&text) {
        Ok(client_msg) => match client_msg {
            ClientMessage::SendMessage {
                subject_id,
                conversation_id,
                content,
            } => {
                info!(%subject_id, ?conversation_id, "SendMessage received.");
                let cancel = {
                    let mut session = session_state_lock.lock().await;
                    session.cancellation_token = CancellationToken::new();
                    session.cancellation_token.clone()
                };
                let task = {
                    let session_state_lock = session_state_lock.clone();
                    let ws_sender = ws_sender.clone();
                    tokio::spawn(async move {
                        if let Err(e) = send_process(
                            session_state_lock,
                            ws_sender,
                            subject_id,
                            conversation_id,
                            content,
                            cancel,
                        )
                        .await
                        {
                            error!("Send process failed: {:?}", e);
                        }
                    })
                };
                *send_task_handle = Some(task);
            }
            ClientMessage::CancelSend => {
                info!("CancelSend received. Cancelling in-flight send.");
                let session = session_state_lock.lock().await;
                session.cancellation_token.cancel();
            }
            ClientMessage::SelectSubject { subject_id } => {
                let session = session_state_lock.lock().await;
                let store = session.chat.store();
                let mut store = store.lock().await;
                store.set_current_subject(subject_id);
            }
            ClientMessage::SelectConversation { conversation_id } => {
                handle_select_conversation(
                    conversation_id,
                    app_state,
                    session_state_lock,
                    ws_sender,
                )
                .await;
            }
        },
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
        }
    }
}

/// Selects a conversation and, when one is chosen, refreshes its cached
/// history from the database and sends it to the client.
async fn handle_select_conversation(
    conversation_id: Option<Uuid>,
    app_state: &Arc<AppState>,
    session_state_lock: &Arc<Mutex<SessionState>>,
    ws_sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
) {
    let Some(id) = conversation_id else {
        let session = session_state_lock.lock().await;
        let store = session.chat.store();
        let mut store = store.lock().await;
        store.set_current_conversation(None);
        return;
    };

    // The store only holds this user's subjects, so membership is the
    // ownership check. Unknown ids get a not-found, never foreign history.
    {
        let session = session_state_lock.lock().await;
        let store = session.chat.store();
        let store = store.lock().await;
        if store.conversation(id).is_none() {
            let report = ServerMessage::Error {
                message: "Conversation not found.".to_string(),
            };
            drop(store);
            let _ = send_server_message(ws_sender, &report).await;
            return;
        }
    }

    let messages = match app_state.db.list_messages(id).await {
        Ok(messages) => messages,
        Err(e) => {
            error!("Failed to load messages for conversation {}: {:?}", id, e);
            let report = ServerMessage::Error {
                message: "Failed to load conversation history.".to_string(),
            };
            let _ = send_server_message(ws_sender, &report).await;
            return;
        }
    };

    {
        let session = session_state_lock.lock().await;
        let store = session.chat.store();
        let mut store = store.lock().await;
        if let Err(e) = store.set_conversation_messages(id, messages.clone()) {
            error!("Failed to cache history for conversation {}: {}", id, e);
            drop(store);
            drop(session);
            let report = ServerMessage::Error {
                message: "Conversation not found.".to_string(),
            };
            let _ = send_server_message(ws_sender, &report).await;
            return;
        }
        store.set_current_conversation(Some(id));
    }

    let history = ServerMessage::ConversationHistory {
        conversation_id: id,
        messages: messages.iter().map(Into::into).collect(),
    };
    let _ = send_server_message(ws_sender, &history).await;
}
