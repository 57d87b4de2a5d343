//! crates/study_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{
    Conversation, FileItem, FileTag, Message, MessageFeedback, ProcessStatus, Role, Subject, User,
    UserCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    Invalid(String),
    #[error("Operation already in flight: {0}")]
    Busy(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// An incremental stream of assistant-reply text fragments.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, PortError>> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- User Management ---
    async fn create_user_with_email(
        &self,
        name: &str,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User>;

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    // --- Auth Methods ---
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Subject Management ---
    async fn create_subject(&self, user_id: Uuid, name: &str, color: &str)
        -> PortResult<Subject>;

    /// Lists a user's subjects with their conversations (message bodies are
    /// loaded lazily through `list_messages`).
    async fn list_subjects(&self, user_id: Uuid) -> PortResult<Vec<Subject>>;

    async fn rename_subject(&self, user_id: Uuid, subject_id: Uuid, name: &str)
        -> PortResult<()>;

    async fn set_subject_color(
        &self,
        user_id: Uuid,
        subject_id: Uuid,
        color: &str,
    ) -> PortResult<()>;

    async fn set_subject_pinned(
        &self,
        user_id: Uuid,
        subject_id: Uuid,
        pinned: bool,
    ) -> PortResult<()>;

    /// Deletes a subject and cascades to its conversations, messages and files.
    async fn delete_subject(&self, user_id: Uuid, subject_id: Uuid) -> PortResult<()>;

    // --- Conversation Management ---
    async fn create_conversation(&self, subject_id: Uuid, title: &str)
        -> PortResult<Conversation>;

    async fn set_conversation_pinned(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        pinned: bool,
    ) -> PortResult<()>;

    async fn delete_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> PortResult<()>;

    /// Bumps a conversation's `updated_at` so sidebar ordering reflects activity.
    async fn touch_conversation(&self, conversation_id: Uuid) -> PortResult<()>;

    // --- Message Management ---
    /// Returns the persisted messages of a conversation in creation order.
    async fn list_messages(&self, conversation_id: Uuid) -> PortResult<Vec<Message>>;

    /// Persists a message and returns it with its durable identifier.
    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: Role,
        content: &str,
    ) -> PortResult<Message>;

    // --- File Management ---
    async fn create_file(&self, file: &FileItem) -> PortResult<()>;

    async fn list_files(&self, subject_id: Uuid) -> PortResult<Vec<FileItem>>;

    async fn set_file_tag(
        &self,
        user_id: Uuid,
        file_id: Uuid,
        tag: Option<FileTag>,
    ) -> PortResult<()>;

    async fn set_file_status(&self, file_id: Uuid, status: ProcessStatus) -> PortResult<()>;

    async fn delete_file(&self, user_id: Uuid, file_id: Uuid) -> PortResult<()>;

    // --- Feedback ---
    async fn save_feedback(&self, user_id: Uuid, feedback: &MessageFeedback) -> PortResult<()>;
}

#[async_trait]
pub trait AssistantService: Send + Sync {
    /// Generates the assistant's reply to `prompt` given the prior conversation
    /// history, streamed incrementally as text fragments.
    async fn complete_streaming(
        &self,
        history: &[Message],
        prompt: &str,
    ) -> PortResult<TokenStream>;
}

#[async_trait]
pub trait TitleGenerationService: Send + Sync {
    /// Generates a concise conversation title from its first message.
    async fn generate_title_from_text(&self, text: &str) -> PortResult<String>;
}
