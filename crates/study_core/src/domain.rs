//! crates/study_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// The author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// Identifier for a message, tagged by provenance.
///
/// A `Provisional` id belongs to an optimistic, client-synthesized message that
/// the backend has not acknowledged yet. A `Durable` id belongs to a persisted
/// message. Matching-and-replacing an optimistic message is therefore a typed
/// operation, never a string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    Provisional(Uuid),
    Durable(Uuid),
}

impl MessageId {
    pub fn is_provisional(&self) -> bool {
        matches!(self, MessageId::Provisional(_))
    }

    /// The raw uuid, regardless of provenance.
    pub fn raw(&self) -> Uuid {
        match self {
            MessageId::Provisional(id) | MessageId::Durable(id) => *id,
        }
    }
}

/// A single message within a conversation.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Synthesizes an optimistic user message awaiting backend confirmation.
    pub fn provisional_user(conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::Provisional(Uuid::new_v4()),
            conversation_id,
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// An ordered thread of messages belonging to one subject.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub title: String,
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

/// A top-level user-defined topic grouping conversations and files.
#[derive(Debug, Clone)]
pub struct Subject {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
    pub conversations: Vec<Conversation>,
}

/// Broad classification of an uploaded file, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Image,
    Video,
    Audio,
    Document,
    Other,
}

impl FileKind {
    /// Classifies a file by its extension. Unknown extensions map to `Other`.
    pub fn from_name(name: &str) -> Self {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => FileKind::Pdf,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" => FileKind::Image,
            "mp4" | "mov" | "webm" | "mkv" => FileKind::Video,
            "mp3" | "wav" | "ogg" | "m4a" | "flac" => FileKind::Audio,
            "doc" | "docx" | "txt" | "md" | "odt" | "ppt" | "pptx" => FileKind::Document,
            _ => FileKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Image => "image",
            FileKind::Video => "video",
            FileKind::Audio => "audio",
            FileKind::Document => "document",
            FileKind::Other => "other",
        }
    }
}

/// A user-assigned study category for an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTag {
    Exam,
    Exercise,
    Course,
}

impl FileTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileTag::Exam => "exam",
            FileTag::Exercise => "exercise",
            FileTag::Course => "course",
        }
    }
}

/// Server-side processing state of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Pending => "pending",
            ProcessStatus::Processing => "processing",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Failed => "failed",
        }
    }
}

/// A file uploaded into a subject.
#[derive(Debug, Clone)]
pub struct FileItem {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub name: String,
    pub kind: FileKind,
    pub size: u64,
    pub tag: Option<FileTag>,
    pub status: ProcessStatus,
    pub uploaded_at: DateTime<Utc>,
}

/// Access level of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    Student,
    Superadmin,
}

// Represents a user - used throughout app
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub hashed_password: String,
}

/// A user's reaction to a single assistant message.
#[derive(Debug, Clone)]
pub struct MessageFeedback {
    pub message_id: Uuid,
    pub is_liked: bool,
    pub reasons: Vec<String>,
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_kind_is_derived_from_extension() {
        assert_eq!(FileKind::from_name("notes.PDF"), FileKind::Pdf);
        assert_eq!(FileKind::from_name("diagram.png"), FileKind::Image);
        assert_eq!(FileKind::from_name("lecture.mp3"), FileKind::Audio);
        assert_eq!(FileKind::from_name("summary.docx"), FileKind::Document);
        assert_eq!(FileKind::from_name("archive.zip"), FileKind::Other);
        assert_eq!(FileKind::from_name("no_extension"), FileKind::Other);
    }

    #[test]
    fn provisional_ids_never_equal_durable_ids() {
        let raw = Uuid::new_v4();
        assert_ne!(MessageId::Provisional(raw), MessageId::Durable(raw));
        assert!(MessageId::Provisional(raw).is_provisional());
        assert!(!MessageId::Durable(raw).is_provisional());
    }
}
