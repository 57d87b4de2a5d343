//! services/api/src/web/state.rs
//!
//! Defines the application's shared and session-specific states.

use crate::config::Config;
use std::sync::Arc;
use study_core::{
    ports::{AssistantService, DatabaseService, PortResult, TitleGenerationService},
    store::SessionStore,
    ChatSession,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub assistant_adapter: Arc<dyn AssistantService>,
    pub title_adapter: Arc<dyn TitleGenerationService>,
}

//=========================================================================================
// SessionState (Specific to One WebSocket Connection)
//=========================================================================================

/// The state for a single, active WebSocket connection: the chat controller
/// with its hydrated store, plus the cancellation token for the current send.
pub struct SessionState {
    pub user_id: Uuid,
    pub chat: ChatSession,
    /// Cancels the in-flight send. Replaced with a fresh token for each send.
    pub cancellation_token: CancellationToken,
}

impl SessionState {
    /// Creates a new `SessionState` by hydrating the store from the database.
    pub async fn new(app_state: Arc<AppState>, user_id: Uuid) -> PortResult<Self> {
        let user = app_state.db.get_user_by_id(user_id).await?;
        let subjects = app_state.db.list_subjects(user_id).await?;

        let mut files = Vec::new();
        for subject in &subjects {
            files.extend(app_state.db.list_files(subject.id).await?);
        }

        let mut store = SessionStore::new(user);
        store.hydrate(subjects, files);

        let chat = ChatSession::new(
            Arc::new(Mutex::new(store)),
            app_state.db.clone(),
            app_state.assistant_adapter.clone(),
            app_state.title_adapter.clone(),
        );

        Ok(Self {
            user_id,
            chat,
            cancellation_token: CancellationToken::new(),
        })
    }
}
