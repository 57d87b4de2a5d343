//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::protocol::{ConversationPayload, MessagePayload, SubjectPayload};
use crate::web::state::AppState;
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use study_core::{
    domain::{FileItem, FileKind, FileTag, MessageFeedback, ProcessStatus},
    ports::{DatabaseService, PortError},
};
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_subjects_handler,
        create_subject_handler,
        update_subject_handler,
        pin_subject_handler,
        delete_subject_handler,
        pin_conversation_handler,
        delete_conversation_handler,
        list_messages_handler,
        upload_file_handler,
        list_files_handler,
        tag_file_handler,
        retry_file_handler,
        delete_file_handler,
        feedback_handler,
    ),
    components(
        schemas(
            SubjectPayload,
            ConversationPayload,
            MessagePayload,
            FilePayload,
            CreateSubjectRequest,
            UpdateSubjectRequest,
            PinRequest,
            TagRequest,
            FeedbackRequest,
        )
    ),
    tags(
        (name = "Study Assistant API", description = "API endpoints for subjects, conversations, files and feedback.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Request and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateSubjectRequest {
    pub name: String,
    pub color: String,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateSubjectRequest {
    pub name: Option<String>,
    pub color: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct PinRequest {
    pub pinned: bool,
}

/// Tag assignment for a file. A `null` tag clears it.
#[derive(Deserialize, ToSchema)]
pub struct TagRequest {
    pub tag: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct FeedbackRequest {
    pub message_id: Uuid,
    pub is_liked: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
    pub comment: Option<String>,
}

#[derive(serde::Serialize, ToSchema)]
pub struct FilePayload {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub name: String,
    pub kind: String,
    pub size: u64,
    pub tag: Option<String>,
    pub status: String,
    pub uploaded_at: chrono::DateTime<Utc>,
}

impl From<&FileItem> for FilePayload {
    fn from(file: &FileItem) -> Self {
        Self {
            id: file.id,
            subject_id: file.subject_id,
            name: file.name.clone(),
            kind: file.kind.as_str().to_string(),
            size: file.size,
            tag: file.tag.map(|t| t.as_str().to_string()),
            status: file.status.as_str().to_string(),
            uploaded_at: file.uploaded_at,
        }
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

fn port_error_response(e: PortError) -> (StatusCode, String) {
    let status = match &e {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Invalid(_) => StatusCode::BAD_REQUEST,
        PortError::Busy(_) => StatusCode::CONFLICT,
        PortError::Unauthorized => StatusCode::UNAUTHORIZED,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {:?}", e);
        (status, "Internal server error".to_string())
    } else {
        (status, e.to_string())
    }
}

/// Confirms the subject belongs to the authenticated user.
async fn ensure_subject_owned(
    db: &Arc<dyn DatabaseService>,
    user_id: Uuid,
    subject_id: Uuid,
) -> Result<(), (StatusCode, String)> {
    let subjects = db.list_subjects(user_id).await.map_err(port_error_response)?;
    if subjects.iter().any(|s| s.id == subject_id) {
        Ok(())
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("Subject {} not found", subject_id),
        ))
    }
}

/// Confirms the conversation lives under one of the user's subjects.
async fn ensure_conversation_owned(
    db: &Arc<dyn DatabaseService>,
    user_id: Uuid,
    conversation_id: Uuid,
) -> Result<(), (StatusCode, String)> {
    let subjects = db.list_subjects(user_id).await.map_err(port_error_response)?;
    let owned = subjects
        .iter()
        .flat_map(|s| s.conversations.iter())
        .any(|c| c.id == conversation_id);
    if owned {
        Ok(())
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("Conversation {} not found", conversation_id),
        ))
    }
}

/// Confirms the file lives under one of the user's subjects.
async fn ensure_file_owned(
    db: &Arc<dyn DatabaseService>,
    user_id: Uuid,
    file_id: Uuid,
) -> Result<(), (StatusCode, String)> {
    let subjects = db.list_subjects(user_id).await.map_err(port_error_response)?;
    for subject in &subjects {
        let files = db.list_files(subject.id).await.map_err(port_error_response)?;
        if files.iter().any(|f| f.id == file_id) {
            return Ok(());
        }
    }
    Err((StatusCode::NOT_FOUND, format!("File {} not found", file_id)))
}

//=========================================================================================
// Subject Handlers
//=========================================================================================

/// List the user's subjects with their conversations, in display order.
#[utoipa::path(
    get,
    path = "/subjects",
    responses(
        (status = 200, description = "The user's subjects", body = [SubjectPayload]),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_subjects_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut subjects = app_state
        .db
        .list_subjects(user_id)
        .await
        .map_err(port_error_response)?;
    subjects.sort_by_key(|s| (!s.is_pinned, std::cmp::Reverse(s.created_at)));
    let payload: Vec<SubjectPayload> = subjects.iter().map(SubjectPayload::from_subject).collect();
    Ok(Json(payload))
}

/// Create a new subject.
#[utoipa::path(
    post,
    path = "/subjects",
    request_body = CreateSubjectRequest,
    responses(
        (status = 201, description = "Subject created", body = SubjectPayload),
        (status = 400, description = "Invalid request")
    )
)]
pub async fn create_subject_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<CreateSubjectRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.name.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Subject name must not be empty".to_string(),
        ));
    }
    let subject = app_state
        .db
        .create_subject(user_id, req.name.trim(), &req.color)
        .await
        .map_err(port_error_response)?;
    Ok((
        StatusCode::CREATED,
        Json(SubjectPayload::from_subject(&subject)),
    ))
}

/// Rename a subject and/or change its color.
#[utoipa::path(
    patch,
    path = "/subjects/{subject_id}",
    request_body = UpdateSubjectRequest,
    params(("subject_id" = Uuid, Path, description = "The subject to update.")),
    responses(
        (status = 204, description = "Subject updated"),
        (status = 404, description = "Subject not found")
    )
)]
pub async fn update_subject_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(subject_id): Path<Uuid>,
    Json(req): Json<UpdateSubjectRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if let Some(name) = &req.name {
        if name.trim().is_empty() {
            return Err((
                StatusCode::BAD_REQUEST,
                "Subject name must not be empty".to_string(),
            ));
        }
        app_state
            .db
            .rename_subject(user_id, subject_id, name.trim())
            .await
            .map_err(port_error_response)?;
    }
    if let Some(color) = &req.color {
        app_state
            .db
            .set_subject_color(user_id, subject_id, color)
            .await
            .map_err(port_error_response)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Pin or unpin a subject.
#[utoipa::path(
    post,
    path = "/subjects/{subject_id}/pin",
    request_body = PinRequest,
    params(("subject_id" = Uuid, Path, description = "The subject to pin or unpin.")),
    responses(
        (status = 204, description = "Pin state updated"),
        (status = 404, description = "Subject not found")
    )
)]
pub async fn pin_subject_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(subject_id): Path<Uuid>,
    Json(req): Json<PinRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .db
        .set_subject_pinned(user_id, subject_id, req.pinned)
        .await
        .map_err(port_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Delete a subject and everything under it.
#[utoipa::path(
    delete,
    path = "/subjects/{subject_id}",
    params(("subject_id" = Uuid, Path, description = "The subject to delete.")),
    responses(
        (status = 204, description = "Subject deleted"),
        (status = 404, description = "Subject not found")
    )
)]
pub async fn delete_subject_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(subject_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .db
        .delete_subject(user_id, subject_id)
        .await
        .map_err(port_error_response)?;
    info!(%subject_id, "Subject deleted");
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Conversation Handlers
//=========================================================================================

/// Pin or unpin a conversation.
#[utoipa::path(
    post,
    path = "/conversations/{conversation_id}/pin",
    request_body = PinRequest,
    params(("conversation_id" = Uuid, Path, description = "The conversation to pin or unpin.")),
    responses(
        (status = 204, description = "Pin state updated"),
        (status = 404, description = "Conversation not found")
    )
)]
pub async fn pin_conversation_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<PinRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .db
        .set_conversation_pinned(user_id, conversation_id, req.pinned)
        .await
        .map_err(port_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Delete a conversation and its messages.
#[utoipa::path(
    delete,
    path = "/conversations/{conversation_id}",
    params(("conversation_id" = Uuid, Path, description = "The conversation to delete.")),
    responses(
        (status = 204, description = "Conversation deleted"),
        (status = 404, description = "Conversation not found")
    )
)]
pub async fn delete_conversation_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .db
        .delete_conversation(user_id, conversation_id)
        .await
        .map_err(port_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// List a conversation's messages, oldest first.
#[utoipa::path(
    get,
    path = "/conversations/{conversation_id}/messages",
    params(("conversation_id" = Uuid, Path, description = "The conversation to read.")),
    responses(
        (status = 200, description = "The conversation's messages", body = [MessagePayload]),
        (status = 404, description = "Conversation not found")
    )
)]
pub async fn list_messages_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    ensure_conversation_owned(&app_state.db, user_id, conversation_id).await?;
    let messages = app_state
        .db
        .list_messages(conversation_id)
        .await
        .map_err(port_error_response)?;
    let payload: Vec<MessagePayload> = messages.iter().map(MessagePayload::from).collect();
    Ok(Json(payload))
}

//=========================================================================================
// File Handlers
//=========================================================================================

/// Upload a file to a subject.
///
/// Accepts a multipart/form-data request with a single file part. The file is
/// registered as `pending` and processed in the background.
#[utoipa::path(
    post,
    path = "/subjects/{subject_id}/files",
    request_body(content_type = "multipart/form-data", description = "The file to upload."),
    params(("subject_id" = Uuid, Path, description = "The subject to attach the file to.")),
    responses(
        (status = 201, description = "File registered", body = FilePayload),
        (status = 400, description = "Bad request (e.g. missing file part)"),
        (status = 404, description = "Subject not found")
    )
)]
pub async fn upload_file_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(subject_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    ensure_subject_owned(&app_state.db, user_id, subject_id).await?;

    let field = multipart
        .next_field()
        .await
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("Failed to read multipart data: {}", e),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "Multipart form must include a file".to_string(),
            )
        })?;

    let name = field.file_name().unwrap_or("untitled").to_string();
    let data = field.bytes().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Failed to read file bytes: {}", e),
        )
    })?;

    let file = FileItem {
        id: Uuid::new_v4(),
        subject_id,
        name: name.clone(),
        kind: FileKind::from_name(&name),
        size: data.len() as u64,
        tag: None,
        status: ProcessStatus::Pending,
        uploaded_at: Utc::now(),
    };

    app_state
        .db
        .create_file(&file)
        .await
        .map_err(port_error_response)?;

    // Processing runs in the background; the client polls the file's status.
    tokio::spawn(process_file(app_state.db.clone(), file.id));

    Ok((StatusCode::CREATED, Json(FilePayload::from(&file))))
}

/// A "fire-and-forget" background task that walks a file through its
/// processing lifecycle.
async fn process_file(db: Arc<dyn DatabaseService>, file_id: Uuid) {
    if let Err(e) = db.set_file_status(file_id, ProcessStatus::Processing).await {
        error!("Failed to mark file {} as processing: {:?}", file_id, e);
        return;
    }
    // Content extraction is not wired up yet; the lifecycle settles as soon
    // as the record is durable.
    match db.set_file_status(file_id, ProcessStatus::Completed).await {
        Ok(()) => info!("File {} processed.", file_id),
        Err(e) => {
            error!("Failed to complete processing for file {}: {:?}", file_id, e);
            let _ = db.set_file_status(file_id, ProcessStatus::Failed).await;
        }
    }
}

/// List a subject's files in upload order.
#[utoipa::path(
    get,
    path = "/subjects/{subject_id}/files",
    params(("subject_id" = Uuid, Path, description = "The subject whose files to list.")),
    responses(
        (status = 200, description = "The subject's files", body = [FilePayload]),
        (status = 404, description = "Subject not found")
    )
)]
pub async fn list_files_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(subject_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    ensure_subject_owned(&app_state.db, user_id, subject_id).await?;
    let files = app_state
        .db
        .list_files(subject_id)
        .await
        .map_err(port_error_response)?;
    let payload: Vec<FilePayload> = files.iter().map(FilePayload::from).collect();
    Ok(Json(payload))
}

/// Set or clear a file's tag.
#[utoipa::path(
    post,
    path = "/files/{file_id}/tag",
    request_body = TagRequest,
    params(("file_id" = Uuid, Path, description = "The file to tag.")),
    responses(
        (status = 204, description = "Tag updated"),
        (status = 400, description = "Unknown tag"),
        (status = 404, description = "File not found")
    )
)]
pub async fn tag_file_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(file_id): Path<Uuid>,
    Json(req): Json<TagRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let tag = match req.tag.as_deref() {
        None => None,
        Some("exam") => Some(FileTag::Exam),
        Some("exercise") => Some(FileTag::Exercise),
        Some("course") => Some(FileTag::Course),
        Some(other) => {
            return Err((StatusCode::BAD_REQUEST, format!("Unknown tag '{}'", other)));
        }
    };
    app_state
        .db
        .set_file_tag(user_id, file_id, tag)
        .await
        .map_err(port_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Re-run processing for a failed file.
#[utoipa::path(
    post,
    path = "/files/{file_id}/retry",
    params(("file_id" = Uuid, Path, description = "The file to reprocess.")),
    responses(
        (status = 202, description = "Processing restarted"),
        (status = 404, description = "File not found")
    )
)]
pub async fn retry_file_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(file_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    ensure_file_owned(&app_state.db, user_id, file_id).await?;
    app_state
        .db
        .set_file_status(file_id, ProcessStatus::Pending)
        .await
        .map_err(port_error_response)?;
    tokio::spawn(process_file(app_state.db.clone(), file_id));
    Ok(StatusCode::ACCEPTED)
}

/// Delete a file.
#[utoipa::path(
    delete,
    path = "/files/{file_id}",
    params(("file_id" = Uuid, Path, description = "The file to delete.")),
    responses(
        (status = 204, description = "File deleted"),
        (status = 404, description = "File not found")
    )
)]
pub async fn delete_file_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(file_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .db
        .delete_file(user_id, file_id)
        .await
        .map_err(port_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Feedback Handler
//=========================================================================================

/// Record like/dislike feedback on an assistant message.
#[utoipa::path(
    post,
    path = "/feedback",
    request_body = FeedbackRequest,
    responses(
        (status = 201, description = "Feedback recorded"),
        (status = 400, description = "Invalid request")
    )
)]
pub async fn feedback_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<FeedbackRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let feedback = MessageFeedback {
        message_id: req.message_id,
        is_liked: req.is_liked,
        reasons: req.reasons,
        comment: req.comment,
    };
    app_state
        .db
        .save_feedback(user_id, &feedback)
        .await
        .map_err(port_error_response)?;
    Ok(StatusCode::CREATED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex as StdMutex;
    use study_core::domain::{
        Conversation, Message, MessageId, Role, Subject, User, UserCredentials, UserRole,
    };
    use study_core::ports::{AssistantService, PortResult, TitleGenerationService, TokenStream};

    fn unsupported<T>() -> PortResult<T> {
        Err(PortError::Unexpected("not supported by fixture".to_string()))
    }

    /// Database double seeded with one owner, one subject, one conversation
    /// and one file. Reads are scoped the way the live adapter scopes them.
    struct FixtureDb {
        owner: Uuid,
        subject_id: Uuid,
        conversation_id: Uuid,
        file_id: Uuid,
        status_updates: StdMutex<Vec<(Uuid, ProcessStatus)>>,
    }

    impl FixtureDb {
        fn new() -> Self {
            Self {
                owner: Uuid::new_v4(),
                subject_id: Uuid::new_v4(),
                conversation_id: Uuid::new_v4(),
                file_id: Uuid::new_v4(),
                status_updates: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DatabaseService for FixtureDb {
        async fn create_user_with_email(&self, _: &str, _: &str, _: &str) -> PortResult<User> {
            unsupported()
        }
        async fn get_user_by_id(&self, _: Uuid) -> PortResult<User> {
            unsupported()
        }
        async fn get_user_by_email(&self, _: &str) -> PortResult<UserCredentials> {
            unsupported()
        }
        async fn create_auth_session(
            &self,
            _: &str,
            _: Uuid,
            _: DateTime<Utc>,
        ) -> PortResult<()> {
            unsupported()
        }
        async fn validate_auth_session(&self, _: &str) -> PortResult<Uuid> {
            unsupported()
        }
        async fn delete_auth_session(&self, _: &str) -> PortResult<()> {
            unsupported()
        }
        async fn create_subject(&self, _: Uuid, _: &str, _: &str) -> PortResult<Subject> {
            unsupported()
        }
        async fn list_subjects(&self, user_id: Uuid) -> PortResult<Vec<Subject>> {
            if user_id != self.owner {
                return Ok(Vec::new());
            }
            let now = Utc::now();
            Ok(vec![Subject {
                id: self.subject_id,
                name: "Biology".to_string(),
                color: "green".to_string(),
                is_pinned: false,
                created_at: now,
                conversations: vec![Conversation {
                    id: self.conversation_id,
                    subject_id: self.subject_id,
                    title: "Cells".to_string(),
                    is_pinned: false,
                    created_at: now,
                    updated_at: now,
                    messages: Vec::new(),
                }],
            }])
        }
        async fn rename_subject(&self, _: Uuid, _: Uuid, _: &str) -> PortResult<()> {
            unsupported()
        }
        async fn set_subject_color(&self, _: Uuid, _: Uuid, _: &str) -> PortResult<()> {
            unsupported()
        }
        async fn set_subject_pinned(&self, _: Uuid, _: Uuid, _: bool) -> PortResult<()> {
            unsupported()
        }
        async fn delete_subject(&self, _: Uuid, _: Uuid) -> PortResult<()> {
            unsupported()
        }
        async fn create_conversation(&self, _: Uuid, _: &str) -> PortResult<Conversation> {
            unsupported()
        }
        async fn set_conversation_pinned(&self, _: Uuid, _: Uuid, _: bool) -> PortResult<()> {
            unsupported()
        }
        async fn delete_conversation(&self, _: Uuid, _: Uuid) -> PortResult<()> {
            unsupported()
        }
        async fn touch_conversation(&self, _: Uuid) -> PortResult<()> {
            unsupported()
        }
        async fn list_messages(&self, conversation_id: Uuid) -> PortResult<Vec<Message>> {
            Ok(vec![Message {
                id: MessageId::Durable(Uuid::new_v4()),
                conversation_id,
                role: Role::User,
                content: "What powers a cell?".to_string(),
                created_at: Utc::now(),
            }])
        }
        async fn append_message(&self, _: Uuid, _: Role, _: &str) -> PortResult<Message> {
            unsupported()
        }
        async fn create_file(&self, _: &FileItem) -> PortResult<()> {
            unsupported()
        }
        async fn list_files(&self, subject_id: Uuid) -> PortResult<Vec<FileItem>> {
            if subject_id != self.subject_id {
                return Ok(Vec::new());
            }
            Ok(vec![FileItem {
                id: self.file_id,
                subject_id,
                name: "notes.pdf".to_string(),
                kind: FileKind::Pdf,
                size: 1024,
                tag: None,
                status: ProcessStatus::Failed,
                uploaded_at: Utc::now(),
            }])
        }
        async fn set_file_tag(&self, _: Uuid, _: Uuid, _: Option<FileTag>) -> PortResult<()> {
            unsupported()
        }
        async fn set_file_status(&self, file_id: Uuid, status: ProcessStatus) -> PortResult<()> {
            self.status_updates.lock().unwrap().push((file_id, status));
            Ok(())
        }
        async fn delete_file(&self, _: Uuid, _: Uuid) -> PortResult<()> {
            unsupported()
        }
        async fn save_feedback(&self, _: Uuid, _: &MessageFeedback) -> PortResult<()> {
            unsupported()
        }
    }

    struct NullAssistant;

    #[async_trait]
    impl AssistantService for NullAssistant {
        async fn complete_streaming(&self, _: &[Message], _: &str) -> PortResult<TokenStream> {
            unsupported()
        }
    }

    struct NullTitles;

    #[async_trait]
    impl TitleGenerationService for NullTitles {
        async fn generate_title_from_text(&self, _: &str) -> PortResult<String> {
            unsupported()
        }
    }

    fn test_config() -> Config {
        Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            database_url: String::new(),
            log_level: tracing::Level::INFO,
            openai_api_key: None,
            chat_model: "gpt-4o-mini".to_string(),
            title_model: "gpt-4o-mini".to_string(),
            cors_origin: "http://localhost:5173".to_string(),
            max_upload_bytes: 1024 * 1024,
        }
    }

    fn app_state_with(db: Arc<FixtureDb>) -> Arc<AppState> {
        Arc::new(AppState {
            db,
            config: Arc::new(test_config()),
            assistant_adapter: Arc::new(NullAssistant),
            title_adapter: Arc::new(NullTitles),
        })
    }

    #[tokio::test]
    async fn listing_messages_of_foreign_conversation_is_not_found() {
        let db = Arc::new(FixtureDb::new());
        let owner = db.owner;
        let conversation_id = db.conversation_id;
        let state = app_state_with(db);

        let intruder = Uuid::new_v4();
        let denied = list_messages_handler(
            State(state.clone()),
            Extension(intruder),
            Path(conversation_id),
        )
        .await;
        match denied {
            Err((status, _)) => assert_eq!(status, StatusCode::NOT_FOUND),
            Ok(_) => panic!("foreign conversation must not be readable"),
        }

        let allowed = list_messages_handler(
            State(state),
            Extension(owner),
            Path(conversation_id),
        )
        .await;
        assert!(allowed.is_ok());
    }

    #[tokio::test]
    async fn retrying_foreign_file_is_not_found() {
        let db = Arc::new(FixtureDb::new());
        let owner = db.owner;
        let file_id = db.file_id;
        let state = app_state_with(db.clone());

        let intruder = Uuid::new_v4();
        let denied =
            retry_file_handler(State(state.clone()), Extension(intruder), Path(file_id)).await;
        match denied {
            Err((status, _)) => assert_eq!(status, StatusCode::NOT_FOUND),
            Ok(_) => panic!("foreign file must not be reprocessable"),
        }
        assert!(db.status_updates.lock().unwrap().is_empty());

        let allowed = retry_file_handler(State(state), Extension(owner), Path(file_id)).await;
        assert!(allowed.is_ok());
        assert!(db
            .status_updates
            .lock()
            .unwrap()
            .iter()
            .any(|(id, status)| *id == file_id && *status == ProcessStatus::Pending));
    }
}
