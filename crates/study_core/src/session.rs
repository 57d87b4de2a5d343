//! crates/study_core/src/session.rs
//!
//! The streaming chat session controller. Drives one send-message interaction
//! from user input to settled (persisted or failed) state, with live partial
//! output along the way.
//!
//! Each send moves through: optimistic append -> streaming -> settled. Partial
//! assistant text is only ever visible in `SendEvent::Chunk` items; it is never
//! written to the store. On success the optimistic user message is atomically
//! replaced by the backend-confirmed user/assistant pair. On any failure the
//! optimistic message is retracted and the persisted history is left untouched.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};

use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{Conversation, Message, MessageId, Role};
use crate::ports::{AssistantService, DatabaseService, PortError, PortResult, TitleGenerationService};
use crate::store::SessionStore;

/// Maximum characters of the first message used as a fallback title when the
/// title service is unavailable.
const FALLBACK_TITLE_LEN: usize = 40;

/// One item of the send-event sequence produced by [`ChatSession::send_message`].
///
/// The sequence is finite and not restartable: zero or more `Chunk`s followed
/// by exactly one `Completed` or `Failed`. A send against a conversation that
/// does not exist yet starts with `ConversationCreated`.
#[derive(Debug, Clone)]
pub enum SendEvent {
    /// A conversation was created to carry this send. The consumer should
    /// adopt the new id (e.g. update its route) without reloading.
    ConversationCreated { conversation: Conversation },
    /// An incremental fragment of the in-progress assistant reply.
    Chunk { conversation_id: Uuid, text: String },
    /// The send settled successfully with the backend-confirmed pair.
    Completed {
        conversation_id: Uuid,
        user_message: Message,
        assistant_message: Message,
    },
    /// The send failed; all optimistic state has been rolled back.
    Failed {
        conversation_id: Option<Uuid>,
        error: String,
    },
}

/// The finite async sequence of events for one send.
pub type SendEventStream = Pin<Box<dyn Stream<Item = SendEvent> + Send>>;

/// Key identifying which conversation a send occupies while in flight.
/// A send that still has to create its conversation occupies the single
/// pending slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SendKey {
    Conversation(Uuid),
    Pending,
}

/// Releases the in-flight slot when the send settles or its stream is dropped.
struct InFlightGuard {
    key: SendKey,
    in_flight: Arc<StdMutex<HashSet<SendKey>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.key);
        }
    }
}

/// Outcome of one step of the token-stream consumption loop.
enum StreamStep {
    Token(String),
    Done,
    Cancelled,
    Error(PortError),
}

/// Claims the in-flight slot for `key`, or reports the conflict.
fn claim_in_flight(
    in_flight: &Arc<StdMutex<HashSet<SendKey>>>,
    key: SendKey,
) -> PortResult<InFlightGuard> {
    let mut set = in_flight
        .lock()
        .map_err(|_| PortError::Unexpected("in-flight set poisoned".to_string()))?;
    if !set.insert(key) {
        return Err(PortError::Busy(match key {
            SendKey::Conversation(id) => format!("conversation {}", id),
            SendKey::Pending => "pending conversation".to_string(),
        }));
    }
    Ok(InFlightGuard {
        key,
        in_flight: in_flight.clone(),
    })
}

/// The session-scoped chat controller.
///
/// Holds the session store by shared handle and the backend collaborators as
/// ports. One instance serves one user session; sends against different
/// conversations are independent, sends against the same conversation are
/// serialized by rejection (`PortError::Busy`).
pub struct ChatSession {
    store: Arc<Mutex<SessionStore>>,
    db: Arc<dyn DatabaseService>,
    assistant: Arc<dyn AssistantService>,
    titles: Arc<dyn TitleGenerationService>,
    in_flight: Arc<StdMutex<HashSet<SendKey>>>,
}

impl ChatSession {
    pub fn new(
        store: Arc<Mutex<SessionStore>>,
        db: Arc<dyn DatabaseService>,
        assistant: Arc<dyn AssistantService>,
        titles: Arc<dyn TitleGenerationService>,
    ) -> Self {
        Self {
            store,
            db,
            assistant,
            titles,
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    /// Shared handle to the underlying store, for read access by the caller.
    pub fn store(&self) -> Arc<Mutex<SessionStore>> {
        self.store.clone()
    }

    /// Whether a send is currently in flight for the given conversation.
    pub fn is_sending(&self, conversation_id: Uuid) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(&SendKey::Conversation(conversation_id)))
            .unwrap_or(false)
    }

    /// Sends a user message, streaming the assistant's reply.
    ///
    /// With `conversation_id` set, the optimistic user message is appended to
    /// the store before this function returns, so the caller can render the
    /// send with zero latency. With `conversation_id` `None`, a conversation is
    /// created under `subject_id` first and announced via
    /// `SendEvent::ConversationCreated`.
    ///
    /// Errors returned here (validation, re-entrancy, unknown referents) mean
    /// nothing was mutated. Errors after this point arrive as
    /// `SendEvent::Failed` on the stream, after rollback.
    pub async fn send_message(
        &self,
        subject_id: Uuid,
        conversation_id: Option<Uuid>,
        text: &str,
        cancel: CancellationToken,
    ) -> PortResult<SendEventStream> {
        let prompt = text.trim().to_string();
        if prompt.is_empty() {
            return Err(PortError::Invalid("message text is empty".to_string()));
        }

        let key = conversation_id
            .map(SendKey::Conversation)
            .unwrap_or(SendKey::Pending);
        let guard = claim_in_flight(&self.in_flight, key)?;

        // Validate referents and, for an existing conversation, append the
        // optimistic message up front.
        let (history, optimistic) = {
            let mut store = self.store.lock().await;
            match conversation_id {
                Some(id) => {
                    let history = store
                        .conversation(id)
                        .map(|c| c.messages.clone())
                        .ok_or_else(|| PortError::NotFound(format!("Conversation {}", id)))?;
                    let optimistic = Message::provisional_user(id, prompt.clone());
                    store
                        .push_message(optimistic.clone())
                        .map_err(|e| PortError::Unexpected(e.to_string()))?;
                    (history, Some(optimistic))
                }
                None => {
                    store
                        .subject(subject_id)
                        .ok_or_else(|| PortError::NotFound(format!("Subject {}", subject_id)))?;
                    (Vec::new(), None)
                }
            }
        };

        let store = self.store.clone();
        let db = self.db.clone();
        let assistant = self.assistant.clone();
        let titles = self.titles.clone();
        let in_flight = self.in_flight.clone();

        let events = async_stream::stream! {
            // Keeps the in-flight slot claimed until the stream is dropped.
            let _guard = guard;

            let mut history = history;
            let (conv_id, optimistic, _conv_guard) = match (conversation_id, optimistic) {
                (Some(id), Some(optimistic)) => (id, optimistic, None),
                _ => {
                    // No active conversation: create one through the backend
                    // before anything becomes visible.
                    let title = match titles.generate_title_from_text(&prompt).await {
                        Ok(title) => title,
                        Err(e) => {
                            warn!("Title generation failed, falling back to excerpt: {}", e);
                            fallback_title(&prompt)
                        }
                    };
                    let conversation = match db.create_conversation(subject_id, &title).await {
                        Ok(conversation) => conversation,
                        Err(e) => {
                            yield SendEvent::Failed {
                                conversation_id: None,
                                error: e.to_string(),
                            };
                            return;
                        }
                    };
                    // Sends addressed to the announced id must see it as in
                    // flight until this one settles.
                    let conv_guard =
                        match claim_in_flight(&in_flight, SendKey::Conversation(conversation.id)) {
                            Ok(guard) => guard,
                            Err(e) => {
                                yield SendEvent::Failed {
                                    conversation_id: Some(conversation.id),
                                    error: e.to_string(),
                                };
                                return;
                            }
                        };
                    let optimistic =
                        Message::provisional_user(conversation.id, prompt.clone());
                    {
                        let mut store = store.lock().await;
                        if let Err(e) = store.insert_conversation(conversation.clone()) {
                            yield SendEvent::Failed {
                                conversation_id: Some(conversation.id),
                                error: e.to_string(),
                            };
                            return;
                        }
                        store.set_current_conversation(Some(conversation.id));
                        // The conversation is brand new, the push cannot miss.
                        let _ = store.push_message(optimistic.clone());
                    }
                    let conv_id = conversation.id;
                    yield SendEvent::ConversationCreated { conversation };
                    (conv_id, optimistic, Some(conv_guard))
                }
            };

            // Only backend-confirmed messages count as context.
            history.retain(|m| !m.id.is_provisional());

            debug!(conversation = %conv_id, "Opening assistant stream");
            let mut tokens = match assistant.complete_streaming(&history, &prompt).await {
                Ok(tokens) => tokens,
                Err(e) => {
                    retract(&store, conv_id, &optimistic.id).await;
                    yield SendEvent::Failed {
                        conversation_id: Some(conv_id),
                        error: e.to_string(),
                    };
                    return;
                }
            };

            // Live buffer for the in-progress reply. Rendered by the consumer,
            // never committed to the store.
            let mut buffer = String::new();
            loop {
                let step = tokio::select! {
                    _ = cancel.cancelled() => StreamStep::Cancelled,
                    next = tokens.next() => match next {
                        Some(Ok(token)) => StreamStep::Token(token),
                        Some(Err(e)) => StreamStep::Error(e),
                        None => StreamStep::Done,
                    },
                };
                match step {
                    StreamStep::Token(token) => {
                        buffer.push_str(&token);
                        yield SendEvent::Chunk {
                            conversation_id: conv_id,
                            text: token,
                        };
                    }
                    StreamStep::Done => break,
                    StreamStep::Cancelled => {
                        debug!(conversation = %conv_id, "Send cancelled mid-stream");
                        retract(&store, conv_id, &optimistic.id).await;
                        yield SendEvent::Failed {
                            conversation_id: Some(conv_id),
                            error: "send cancelled".to_string(),
                        };
                        return;
                    }
                    StreamStep::Error(e) => {
                        retract(&store, conv_id, &optimistic.id).await;
                        yield SendEvent::Failed {
                            conversation_id: Some(conv_id),
                            error: e.to_string(),
                        };
                        return;
                    }
                }
            }

            // Persist the pair, then swap optimistic -> authoritative in one
            // store transition.
            let user_message = match db.append_message(conv_id, Role::User, &prompt).await {
                Ok(message) => message,
                Err(e) => {
                    retract(&store, conv_id, &optimistic.id).await;
                    yield SendEvent::Failed {
                        conversation_id: Some(conv_id),
                        error: e.to_string(),
                    };
                    return;
                }
            };
            let assistant_message =
                match db.append_message(conv_id, Role::Assistant, &buffer).await {
                    Ok(message) => message,
                    Err(e) => {
                        retract(&store, conv_id, &optimistic.id).await;
                        yield SendEvent::Failed {
                            conversation_id: Some(conv_id),
                            error: e.to_string(),
                        };
                        return;
                    }
                };

            {
                let mut store = store.lock().await;
                store.remove_message(conv_id, &optimistic.id);
                // The conversation may have been deleted while streaming; in
                // that case there is nothing left to reconcile locally.
                let _ = store.push_message(user_message.clone());
                let _ = store.push_message(assistant_message.clone());
                let _ = store.touch_conversation(conv_id, assistant_message.created_at);
            }
            if let Err(e) = db.touch_conversation(conv_id).await {
                warn!(conversation = %conv_id, "Failed to bump conversation timestamp: {}", e);
            }

            yield SendEvent::Completed {
                conversation_id: conv_id,
                user_message,
                assistant_message,
            };
        };

        Ok(Box::pin(events))
    }
}

/// Removes the optimistic message after a failed or cancelled send.
async fn retract(store: &Arc<Mutex<SessionStore>>, conversation_id: Uuid, id: &MessageId) {
    let mut store = store.lock().await;
    store.remove_message(conversation_id, id);
}

/// Title derived from the first message when the title service fails.
fn fallback_title(prompt: &str) -> String {
    let mut title: String = prompt.chars().take(FALLBACK_TITLE_LEN).collect();
    if prompt.chars().count() > FALLBACK_TITLE_LEN {
        title.push('…');
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Conversation, FileItem, FileTag, Message, MessageFeedback, ProcessStatus, Subject, User,
        UserCredentials, UserRole,
    };
    use crate::ports::TokenStream;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use futures::stream;

    fn test_user() -> User {
        User {
            id: Uuid::new_v4(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            role: UserRole::Student,
        }
    }

    /// In-memory database double. Only the conversation/message operations the
    /// controller exercises are backed by state; the rest reject.
    #[derive(Default)]
    struct MockDb {
        created_conversations: StdMutex<Vec<Conversation>>,
        appended: StdMutex<Vec<Message>>,
        fail_appends: bool,
    }

    fn unsupported<T>() -> PortResult<T> {
        Err(PortError::Unexpected("not supported by mock".to_string()))
    }

    #[async_trait]
    impl DatabaseService for MockDb {
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
        async fn list_subjects(&self, _: Uuid) -> PortResult<Vec<Subject>> {
            unsupported()
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
        async fn create_conversation(
            &self,
            subject_id: Uuid,
            title: &str,
        ) -> PortResult<Conversation> {
            let now = Utc::now();
            let conversation = Conversation {
                id: Uuid::new_v4(),
                subject_id,
                title: title.to_string(),
                is_pinned: false,
                created_at: now,
                updated_at: now,
                messages: Vec::new(),
            };
            self.created_conversations
                .lock()
                .unwrap()
                .push(conversation.clone());
            Ok(conversation)
        }
        async fn set_conversation_pinned(&self, _: Uuid, _: Uuid, _: bool) -> PortResult<()> {
            unsupported()
        }
        async fn delete_conversation(&self, _: Uuid, _: Uuid) -> PortResult<()> {
            unsupported()
        }
        async fn touch_conversation(&self, _: Uuid) -> PortResult<()> {
            Ok(())
        }
        async fn list_messages(&self, _: Uuid) -> PortResult<Vec<Message>> {
            unsupported()
        }
        async fn append_message(
            &self,
            conversation_id: Uuid,
            role: Role,
            content: &str,
        ) -> PortResult<Message> {
            if self.fail_appends {
                return Err(PortError::Unexpected("append rejected".to_string()));
            }
            let message = Message {
                id: MessageId::Durable(Uuid::new_v4()),
                conversation_id,
                role,
                content: content.to_string(),
                created_at: Utc::now(),
            };
            self.appended.lock().unwrap().push(message.clone());
            Ok(message)
        }
        async fn create_file(&self, _: &FileItem) -> PortResult<()> {
            unsupported()
        }
        async fn list_files(&self, _: Uuid) -> PortResult<Vec<FileItem>> {
            unsupported()
        }
        async fn set_file_tag(&self, _: Uuid, _: Uuid, _: Option<FileTag>) -> PortResult<()> {
            unsupported()
        }
        async fn set_file_status(&self, _: Uuid, _: ProcessStatus) -> PortResult<()> {
            unsupported()
        }
        async fn delete_file(&self, _: Uuid, _: Uuid) -> PortResult<()> {
            unsupported()
        }
        async fn save_feedback(&self, _: Uuid, _: &MessageFeedback) -> PortResult<()> {
            unsupported()
        }
    }

    /// Assistant double that replays a fixed chunk script.
    struct MockAssistant {
        chunks: Vec<Result<String, String>>,
        hang_after_script: bool,
    }

    impl MockAssistant {
        fn replying(chunks: &[&str]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| Ok(c.to_string())).collect(),
                hang_after_script: false,
            }
        }

        fn failing_after(chunks: &[&str]) -> Self {
            let mut script: Vec<Result<String, String>> =
                chunks.iter().map(|c| Ok(c.to_string())).collect();
            script.push(Err("connection dropped".to_string()));
            Self {
                chunks: script,
                hang_after_script: false,
            }
        }

        fn hanging_after(chunks: &[&str]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| Ok(c.to_string())).collect(),
                hang_after_script: true,
            }
        }
    }

    #[async_trait]
    impl AssistantService for MockAssistant {
        async fn complete_streaming(&self, _: &[Message], _: &str) -> PortResult<TokenStream> {
            let script = self
                .chunks
                .iter()
                .map(|c| c.clone().map_err(PortError::Unexpected))
                .collect::<Vec<_>>();
            let replay = stream::iter(script);
            if self.hang_after_script {
                Ok(Box::pin(replay.chain(stream::pending())))
            } else {
                Ok(Box::pin(replay))
            }
        }
    }

    struct MockTitles;

    #[async_trait]
    impl TitleGenerationService for MockTitles {
        async fn generate_title_from_text(&self, text: &str) -> PortResult<String> {
            Ok(format!("About: {}", text.chars().take(10).collect::<String>()))
        }
    }

    struct FailingTitles;

    #[async_trait]
    impl TitleGenerationService for FailingTitles {
        async fn generate_title_from_text(&self, _: &str) -> PortResult<String> {
            Err(PortError::Unexpected("titles offline".to_string()))
        }
    }

    fn session_with(
        assistant: MockAssistant,
        db: MockDb,
    ) -> (ChatSession, Arc<Mutex<SessionStore>>, Uuid, Uuid) {
        let mut store = SessionStore::new(test_user());
        let subject = store.add_subject("Biology", "green");
        let conversation = store.add_conversation(subject.id, "Cells").unwrap();
        let store = Arc::new(Mutex::new(store));
        let session = ChatSession::new(
            store.clone(),
            Arc::new(db),
            Arc::new(assistant),
            Arc::new(MockTitles),
        );
        (session, store, subject.id, conversation.id)
    }

    #[tokio::test]
    async fn successful_send_replaces_optimistic_with_authoritative_pair() {
        let (session, store, subject_id, conv_id) =
            session_with(MockAssistant::replying(&["Mito", "chondria"]), MockDb::default());

        let events: Vec<SendEvent> = session
            .send_message(subject_id, Some(conv_id), "What powers a cell?", CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;

        let chunks: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                SendEvent::Chunk { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, vec!["Mito", "chondria"]);
        assert!(matches!(events.last(), Some(SendEvent::Completed { .. })));

        let store = store.lock().await;
        let messages = &store.conversation(conv_id).unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| !m.id.is_provisional()));
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "What powers a cell?");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Mitochondria");
    }

    #[tokio::test]
    async fn failed_stream_rolls_back_optimistic_message() {
        let (session, store, subject_id, conv_id) = session_with(
            MockAssistant::failing_after(&["partial ", "answer"]),
            MockDb::default(),
        );

        let events: Vec<SendEvent> = session
            .send_message(subject_id, Some(conv_id), "hello", CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;

        // Chunks were visible transiently, but the send settled as failed.
        assert!(matches!(events.last(), Some(SendEvent::Failed { .. })));

        let store = store.lock().await;
        assert!(store.conversation(conv_id).unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_rolls_back_optimistic_message() {
        let db = MockDb {
            fail_appends: true,
            ..MockDb::default()
        };
        let (session, store, subject_id, conv_id) =
            session_with(MockAssistant::replying(&["ok"]), db);

        let events: Vec<SendEvent> = session
            .send_message(subject_id, Some(conv_id), "hello", CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;

        assert!(matches!(events.last(), Some(SendEvent::Failed { .. })));
        let store = store.lock().await;
        assert!(store.conversation(conv_id).unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn second_send_for_same_conversation_is_rejected_while_first_in_flight() {
        let (session, store, subject_id, conv_id) =
            session_with(MockAssistant::replying(&["hi"]), MockDb::default());

        let first = session
            .send_message(subject_id, Some(conv_id), "first", CancellationToken::new())
            .await
            .unwrap();
        assert!(session.is_sending(conv_id));

        let second = session
            .send_message(subject_id, Some(conv_id), "second", CancellationToken::new())
            .await;
        assert!(matches!(second, Err(PortError::Busy(_))));

        // Exactly one optimistic message exists despite the double submit.
        {
            let store = store.lock().await;
            let provisional = store
                .conversation(conv_id)
                .unwrap()
                .messages
                .iter()
                .filter(|m| m.id.is_provisional())
                .count();
            assert_eq!(provisional, 1);
        }

        // Once the first send settles, the slot is free again.
        let _: Vec<SendEvent> = first.collect().await;
        assert!(!session.is_sending(conv_id));
        assert!(session
            .send_message(subject_id, Some(conv_id), "third", CancellationToken::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn send_to_newly_announced_conversation_is_rejected_until_settled() {
        let mut store = SessionStore::new(test_user());
        let subject = store.add_subject("Biology", "green");
        let store = Arc::new(Mutex::new(store));
        let session = ChatSession::new(
            store.clone(),
            Arc::new(MockDb::default()),
            Arc::new(MockAssistant::hanging_after(&["intro "])),
            Arc::new(MockTitles),
        );

        let cancel = CancellationToken::new();
        let mut events = session
            .send_message(subject.id, None, "hello", cancel.clone())
            .await
            .unwrap();

        let conv_id = match events.next().await {
            Some(SendEvent::ConversationCreated { conversation }) => conversation.id,
            other => panic!("expected ConversationCreated, got {:?}", other),
        };
        assert!(session.is_sending(conv_id));

        // The consumer adopts the new id immediately; a submit against it
        // while the first send streams must be rejected, not interleaved.
        let second = session
            .send_message(subject.id, Some(conv_id), "again", cancel.clone())
            .await;
        assert!(matches!(second, Err(PortError::Busy(_))));
        {
            let store = store.lock().await;
            let provisional = store
                .conversation(conv_id)
                .unwrap()
                .messages
                .iter()
                .filter(|m| m.id.is_provisional())
                .count();
            assert_eq!(provisional, 1);
        }

        cancel.cancel();
        while events.next().await.is_some() {}
        drop(events);

        assert!(!session.is_sending(conv_id));
        assert!(session
            .send_message(subject.id, Some(conv_id), "third", CancellationToken::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn send_without_conversation_creates_one_with_exactly_two_messages() {
        let mut store = SessionStore::new(test_user());
        let subject = store.add_subject("Biology", "green");
        let store = Arc::new(Mutex::new(store));
        let session = ChatSession::new(
            store.clone(),
            Arc::new(MockDb::default()),
            Arc::new(MockAssistant::replying(&["Chlorophyll ", "absorbs light."])),
            Arc::new(MockTitles),
        );

        let events: Vec<SendEvent> = session
            .send_message(subject.id, None, "Explain photosynthesis", CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;

        assert!(matches!(
            events.first(),
            Some(SendEvent::ConversationCreated { .. })
        ));
        assert!(matches!(events.last(), Some(SendEvent::Completed { .. })));

        let store = store.lock().await;
        let subject = store.subject(subject.id).unwrap();
        assert_eq!(subject.conversations.len(), 1);
        let conversation = &subject.conversations[0];
        assert_eq!(conversation.title, "About: Explain ph");
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].role, Role::User);
        assert_eq!(conversation.messages[1].role, Role::Assistant);
        assert_eq!(store.current_conversation_id(), Some(conversation.id));
    }

    #[tokio::test]
    async fn title_service_failure_falls_back_to_excerpt() {
        let mut store = SessionStore::new(test_user());
        let subject = store.add_subject("Biology", "green");
        let store = Arc::new(Mutex::new(store));
        let session = ChatSession::new(
            store.clone(),
            Arc::new(MockDb::default()),
            Arc::new(MockAssistant::replying(&["ok"])),
            Arc::new(FailingTitles),
        );

        let _: Vec<SendEvent> = session
            .send_message(subject.id, None, "Explain photosynthesis", CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;

        let store = store.lock().await;
        let conversation = &store.subject(subject.id).unwrap().conversations[0];
        assert_eq!(conversation.title, "Explain photosynthesis");
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_mutation() {
        let (session, store, subject_id, conv_id) =
            session_with(MockAssistant::replying(&["hi"]), MockDb::default());

        let result = session
            .send_message(subject_id, Some(conv_id), "   \n ", CancellationToken::new())
            .await;
        assert!(matches!(result, Err(PortError::Invalid(_))));

        let store = store.lock().await;
        assert!(store.conversation(conv_id).unwrap().messages.is_empty());
        drop(store);
        // Validation failures must not leave the in-flight slot claimed.
        assert!(!session.is_sending(conv_id));
    }

    #[tokio::test]
    async fn cancellation_mid_stream_retracts_optimistic_message() {
        let (session, store, subject_id, conv_id) =
            session_with(MockAssistant::hanging_after(&["some "]), MockDb::default());

        let cancel = CancellationToken::new();
        let mut events = session
            .send_message(subject_id, Some(conv_id), "hello", cancel.clone())
            .await
            .unwrap();

        let first = events.next().await;
        assert!(matches!(first, Some(SendEvent::Chunk { .. })));

        cancel.cancel();
        let last = events.next().await;
        assert!(matches!(last, Some(SendEvent::Failed { .. })));

        let store = store.lock().await;
        assert!(store.conversation(conv_id).unwrap().messages.is_empty());
    }
}
