//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the
//! API server for the chat surface. REST endpoints reuse the payload structs
//! defined here for their JSON bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use study_core::domain::{Conversation, Message, Subject};

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Submits a user message. With `conversation_id` absent, a new
    /// conversation is created under the subject and announced back.
    SendMessage {
        subject_id: Uuid,
        conversation_id: Option<Uuid>,
        content: String,
    },

    /// Cancels the in-flight send, if any. The send settles as failed and its
    /// optimistic state is rolled back.
    CancelSend,

    /// Changes the active subject. `None` clears the selection.
    SelectSubject { subject_id: Option<Uuid> },

    /// Changes the active conversation. Selecting a conversation loads its
    /// message history and sends it back as `ConversationHistory`.
    SelectConversation { conversation_id: Option<Uuid> },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after connect: the full sidebar snapshot, already in display
    /// order (pinned first, then newest).
    SessionReady { subjects: Vec<SubjectPayload> },

    /// A conversation was created to carry an in-flight send. The client
    /// should adopt the new id without reloading.
    ConversationCreated { conversation: ConversationPayload },

    /// An incremental fragment of the in-progress assistant reply.
    Chunk { conversation_id: Uuid, text: String },

    /// The send settled successfully with the persisted message pair.
    SendCompleted {
        conversation_id: Uuid,
        user_message: MessagePayload,
        assistant_message: MessagePayload,
    },

    /// The send failed or was cancelled; the client should drop any partial
    /// text it rendered for this send.
    SendFailed {
        conversation_id: Option<Uuid>,
        error: String,
    },

    /// The persisted history of a conversation, oldest first.
    ConversationHistory {
        conversation_id: Uuid,
        messages: Vec<MessagePayload>,
    },

    /// Reports an error to the client outside the send lifecycle.
    Error { message: String },
}

//=========================================================================================
// Wire Payloads
//=========================================================================================
// Only persisted state crosses the wire: message payloads always carry the
// backend-assigned id, never a provisional one.
//=========================================================================================

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct MessagePayload {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for MessagePayload {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.raw(),
            conversation_id: message.conversation_id,
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            created_at: message.created_at,
        }
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct ConversationPayload {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub title: String,
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Conversation> for ConversationPayload {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id,
            subject_id: conversation.subject_id,
            title: conversation.title.clone(),
            is_pinned: conversation.is_pinned,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct SubjectPayload {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
    pub conversations: Vec<ConversationPayload>,
}

impl SubjectPayload {
    /// Builds the payload with the subject's conversations in display order.
    pub fn from_subject(subject: &Subject) -> Self {
        let mut conversations: Vec<&Conversation> = subject.conversations.iter().collect();
        conversations.sort_by_key(|c| (!c.is_pinned, std::cmp::Reverse(c.created_at)));
        Self {
            id: subject.id,
            name: subject.name.clone(),
            color: subject.color.clone(),
            is_pinned: subject.is_pinned,
            created_at: subject.created_at,
            conversations: conversations
                .into_iter()
                .map(ConversationPayload::from)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_deserializes_with_and_without_conversation() {
        let with: ClientMessage = serde_json::from_str(
            r#"{"type":"send_message","subject_id":"6f8f57c5-32bd-4f6a-9c37-9c3585906d9b","conversation_id":"b5c1f3a0-8d9e-4f31-9a51-2f3c4d5e6f70","content":"hi"}"#,
        )
        .unwrap();
        assert!(matches!(
            with,
            ClientMessage::SendMessage {
                conversation_id: Some(_),
                ..
            }
        ));

        let without: ClientMessage = serde_json::from_str(
            r#"{"type":"send_message","subject_id":"6f8f57c5-32bd-4f6a-9c37-9c3585906d9b","conversation_id":null,"content":"hi"}"#,
        )
        .unwrap();
        assert!(matches!(
            without,
            ClientMessage::SendMessage {
                conversation_id: None,
                ..
            }
        ));
    }

    #[test]
    fn cancel_send_deserializes_from_bare_tag() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"cancel_send"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::CancelSend));
    }

    #[test]
    fn server_messages_serialize_with_snake_case_tags() {
        let chunk = ServerMessage::Chunk {
            conversation_id: Uuid::new_v4(),
            text: "Mito".to_string(),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "chunk");
        assert_eq!(json["text"], "Mito");

        let failed = ServerMessage::SendFailed {
            conversation_id: None,
            error: "cancelled".to_string(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["type"], "send_failed");
        assert!(json["conversation_id"].is_null());
    }
}
