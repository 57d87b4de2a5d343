//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Every query touching user-owned rows is scoped by `user_id` so that a stale
//! or foreign id can never read or mutate another user's data; an unmatched row
//! surfaces as `PortError::NotFound`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use study_core::domain::{
    Conversation, FileItem, FileKind, FileTag, Message, MessageFeedback, MessageId, ProcessStatus,
    Role, Subject, User, UserCredentials, UserRole,
};
use study_core::ports::{DatabaseService, PortError, PortResult};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found(label: String) -> impl FnOnce(sqlx::Error) -> PortError {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(label),
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// Enum <-> TEXT Mappings
//=========================================================================================

fn role_to_db(role: Role) -> &'static str {
    role.as_str()
}

fn role_from_db(raw: &str) -> PortResult<Role> {
    match raw {
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "system" => Ok(Role::System),
        other => Err(PortError::Unexpected(format!(
            "Unknown message role in database: '{}'",
            other
        ))),
    }
}

fn kind_from_db(raw: &str) -> FileKind {
    match raw {
        "pdf" => FileKind::Pdf,
        "image" => FileKind::Image,
        "video" => FileKind::Video,
        "audio" => FileKind::Audio,
        "document" => FileKind::Document,
        _ => FileKind::Other,
    }
}

fn tag_from_db(raw: Option<&str>) -> Option<FileTag> {
    match raw {
        Some("exam") => Some(FileTag::Exam),
        Some("exercise") => Some(FileTag::Exercise),
        Some("course") => Some(FileTag::Course),
        _ => None,
    }
}

fn status_from_db(raw: &str) -> ProcessStatus {
    match raw {
        "processing" => ProcessStatus::Processing,
        "completed" => ProcessStatus::Completed,
        "failed" => ProcessStatus::Failed,
        _ => ProcessStatus::Pending,
    }
}

fn user_role_from_db(raw: &str) -> UserRole {
    match raw {
        "superadmin" => UserRole::Superadmin,
        _ => UserRole::Student,
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    name: String,
    email: String,
    role: String,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: self.user_id,
            name: self.name,
            email: self.email,
            role: user_role_from_db(&self.role),
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    user_id: Uuid,
    name: String,
    email: String,
    hashed_password: String,
}
impl CredentialsRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user_id: self.user_id,
            name: self.name,
            email: self.email,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct SubjectRecord {
    id: Uuid,
    name: String,
    color: String,
    is_pinned: bool,
    created_at: DateTime<Utc>,
}
impl SubjectRecord {
    fn to_domain(self) -> Subject {
        Subject {
            id: self.id,
            name: self.name,
            color: self.color,
            is_pinned: self.is_pinned,
            created_at: self.created_at,
            conversations: Vec::new(),
        }
    }
}

#[derive(FromRow)]
struct ConversationRecord {
    id: Uuid,
    subject_id: Uuid,
    title: String,
    is_pinned: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ConversationRecord {
    fn to_domain(self) -> Conversation {
        Conversation {
            id: self.id,
            subject_id: self.subject_id,
            title: self.title,
            is_pinned: self.is_pinned,
            created_at: self.created_at,
            updated_at: self.updated_at,
            messages: Vec::new(),
        }
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}
impl MessageRecord {
    fn to_domain(self) -> PortResult<Message> {
        Ok(Message {
            id: MessageId::Durable(self.id),
            conversation_id: self.conversation_id,
            role: role_from_db(&self.role)?,
            content: self.content,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct FileRecord {
    id: Uuid,
    subject_id: Uuid,
    name: String,
    kind: String,
    size: i64,
    tag: Option<String>,
    status: String,
    uploaded_at: DateTime<Utc>,
}
impl FileRecord {
    fn to_domain(self) -> FileItem {
        FileItem {
            id: self.id,
            subject_id: self.subject_id,
            name: self.name,
            kind: kind_from_db(&self.kind),
            size: self.size.max(0) as u64,
            tag: tag_from_db(self.tag.as_deref()),
            status: status_from_db(&self.status),
            uploaded_at: self.uploaded_at,
        }
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user_with_email(
        &self,
        name: &str,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (user_id, name, email, hashed_password) \
             VALUES ($1, $2, $3, $4) RETURNING user_id, name, email, role",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(email)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT user_id, name, email, role FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found(format!("User {}", user_id)))?;
        Ok(record.to_domain())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT user_id, name, email, hashed_password FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found(format!("User {}", email)))?;
        Ok(record.to_domain())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let row: (Uuid, DateTime<Utc>) = sqlx::query_as(
            "SELECT user_id, expires_at FROM auth_sessions WHERE id = $1",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::Unauthorized,
            _ => PortError::Unexpected(e.to_string()),
        })?;

        if row.1 < Utc::now() {
            return Err(PortError::Unauthorized);
        }
        Ok(row.0)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn create_subject(
        &self,
        user_id: Uuid,
        name: &str,
        color: &str,
    ) -> PortResult<Subject> {
        let record = sqlx::query_as::<_, SubjectRecord>(
            "INSERT INTO subjects (id, user_id, name, color) \
             VALUES ($1, $2, $3, $4) RETURNING id, name, color, is_pinned, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(name)
        .bind(color)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn list_subjects(&self, user_id: Uuid) -> PortResult<Vec<Subject>> {
        let subject_records = sqlx::query_as::<_, SubjectRecord>(
            "SELECT id, name, color, is_pinned, created_at FROM subjects \
             WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let conversation_records = sqlx::query_as::<_, ConversationRecord>(
            "SELECT c.id, c.subject_id, c.title, c.is_pinned, c.created_at, c.updated_at \
             FROM conversations c \
             JOIN subjects s ON s.id = c.subject_id \
             WHERE s.user_id = $1 ORDER BY c.created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let mut by_subject: HashMap<Uuid, Vec<Conversation>> = HashMap::new();
        for record in conversation_records {
            let conversation = record.to_domain();
            by_subject
                .entry(conversation.subject_id)
                .or_default()
                .push(conversation);
        }

        let subjects = subject_records
            .into_iter()
            .map(|record| {
                let mut subject = record.to_domain();
                subject.conversations = by_subject.remove(&subject.id).unwrap_or_default();
                subject
            })
            .collect();
        Ok(subjects)
    }

    async fn rename_subject(
        &self,
        user_id: Uuid,
        subject_id: Uuid,
        name: &str,
    ) -> PortResult<()> {
        let result = sqlx::query("UPDATE subjects SET name = $1 WHERE id = $2 AND user_id = $3")
            .bind(name)
            .bind(subject_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Subject {}", subject_id)));
        }
        Ok(())
    }

    async fn set_subject_color(
        &self,
        user_id: Uuid,
        subject_id: Uuid,
        color: &str,
    ) -> PortResult<()> {
        let result = sqlx::query("UPDATE subjects SET color = $1 WHERE id = $2 AND user_id = $3")
            .bind(color)
            .bind(subject_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Subject {}", subject_id)));
        }
        Ok(())
    }

    async fn set_subject_pinned(
        &self,
        user_id: Uuid,
        subject_id: Uuid,
        pinned: bool,
    ) -> PortResult<()> {
        let result =
            sqlx::query("UPDATE subjects SET is_pinned = $1 WHERE id = $2 AND user_id = $3")
                .bind(pinned)
                .bind(subject_id)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Subject {}", subject_id)));
        }
        Ok(())
    }

    async fn delete_subject(&self, user_id: Uuid, subject_id: Uuid) -> PortResult<()> {
        // Conversations, messages and files go with it via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM subjects WHERE id = $1 AND user_id = $2")
            .bind(subject_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Subject {}", subject_id)));
        }
        Ok(())
    }

    async fn create_conversation(
        &self,
        subject_id: Uuid,
        title: &str,
    ) -> PortResult<Conversation> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            "INSERT INTO conversations (id, subject_id, title) \
             VALUES ($1, $2, $3) \
             RETURNING id, subject_id, title, is_pinned, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(subject_id)
        .bind(title)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn set_conversation_pinned(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        pinned: bool,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE conversations c SET is_pinned = $1 \
             FROM subjects s WHERE c.id = $2 AND c.subject_id = s.id AND s.user_id = $3",
        )
        .bind(pinned)
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Conversation {}",
                conversation_id
            )));
        }
        Ok(())
    }

    async fn delete_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> PortResult<()> {
        let result = sqlx::query(
            "DELETE FROM conversations c \
             USING subjects s WHERE c.id = $1 AND c.subject_id = s.id AND s.user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Conversation {}",
                conversation_id
            )));
        }
        Ok(())
    }

    async fn touch_conversation(&self, conversation_id: Uuid) -> PortResult<()> {
        sqlx::query("UPDATE conversations SET updated_at = now() WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn list_messages(&self, conversation_id: Uuid) -> PortResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT id, conversation_id, role, content, created_at FROM messages \
             WHERE conversation_id = $1 ORDER BY created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: Role,
        content: &str,
    ) -> PortResult<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(
            "INSERT INTO messages (id, conversation_id, role, content) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, conversation_id, role, content, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(role_to_db(role))
        .bind(content)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.to_domain()
    }

    async fn create_file(&self, file: &FileItem) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO files (id, subject_id, name, kind, size, tag, status, uploaded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(file.id)
        .bind(file.subject_id)
        .bind(&file.name)
        .bind(file.kind.as_str())
        .bind(file.size as i64)
        .bind(file.tag.map(|t| t.as_str()))
        .bind(file.status.as_str())
        .bind(file.uploaded_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn list_files(&self, subject_id: Uuid) -> PortResult<Vec<FileItem>> {
        let records = sqlx::query_as::<_, FileRecord>(
            "SELECT id, subject_id, name, kind, size, tag, status, uploaded_at FROM files \
             WHERE subject_id = $1 ORDER BY uploaded_at ASC",
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn set_file_tag(
        &self,
        user_id: Uuid,
        file_id: Uuid,
        tag: Option<FileTag>,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE files f SET tag = $1 \
             FROM subjects s WHERE f.id = $2 AND f.subject_id = s.id AND s.user_id = $3",
        )
        .bind(tag.map(|t| t.as_str()))
        .bind(file_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("File {}", file_id)));
        }
        Ok(())
    }

    async fn set_file_status(&self, file_id: Uuid, status: ProcessStatus) -> PortResult<()> {
        sqlx::query("UPDATE files SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(file_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn delete_file(&self, user_id: Uuid, file_id: Uuid) -> PortResult<()> {
        let result = sqlx::query(
            "DELETE FROM files f \
             USING subjects s WHERE f.id = $1 AND f.subject_id = s.id AND s.user_id = $2",
        )
        .bind(file_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("File {}", file_id)));
        }
        Ok(())
    }

    async fn save_feedback(&self, user_id: Uuid, feedback: &MessageFeedback) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO message_feedback (id, message_id, user_id, is_liked, reasons, comment) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(feedback.message_id)
        .bind(user_id)
        .bind(feedback.is_liked)
        .bind(&feedback.reasons)
        .bind(feedback.comment.as_deref())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}
