//! crates/study_core/src/store.rs
//!
//! The in-memory state container for one user session: subjects, their
//! conversations and messages, uploaded files, and the active-selection
//! pointers backing the sidebar.
//!
//! The store performs no network I/O. Callers talk to the backend ports first
//! and then apply the results here through the mutation operations. Every
//! mutation is a synchronous state transition; concurrent access is the
//! caller's concern (the API service wraps the store in an `Arc<Mutex>`).

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use uuid::Uuid;

use crate::domain::{
    Conversation, FileItem, FileTag, Message, MessageId, ProcessStatus, Role, Subject, User,
};

/// Errors for store mutations whose referent does not exist.
///
/// An unmatched foreign key is a hard error here, never a silent no-op: a
/// caller holding a stale id should find out immediately.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unknown subject: {0}")]
    UnknownSubject(Uuid),
    #[error("Unknown conversation: {0}")]
    UnknownConversation(Uuid),
    #[error("Unknown file: {0}")]
    UnknownFile(Uuid),
}

/// The single reactive container for all locally-cached domain state.
///
/// Holds the full working set for one user's session; no size bound is
/// enforced. Lookups that walk all conversations are linear scans, which is
/// acceptable at the scale of a personal study tool.
pub struct SessionStore {
    user: User,
    subjects: Vec<Subject>,
    files: Vec<FileItem>,
    current_subject_id: Option<Uuid>,
    current_conversation_id: Option<Uuid>,
    sidebar_open: bool,
}

impl SessionStore {
    pub fn new(user: User) -> Self {
        Self {
            user,
            subjects: Vec::new(),
            files: Vec::new(),
            current_subject_id: None,
            current_conversation_id: None,
            sidebar_open: true,
        }
    }

    /// Replaces the collections with a backend snapshot, dropping any selection
    /// pointers that no longer resolve.
    pub fn hydrate(&mut self, subjects: Vec<Subject>, files: Vec<FileItem>) {
        self.subjects = subjects;
        self.files = files;
        if self
            .current_subject_id
            .is_some_and(|id| self.subject(id).is_none())
        {
            self.current_subject_id = None;
        }
        if self
            .current_conversation_id
            .is_some_and(|id| self.conversation(id).is_none())
        {
            self.current_conversation_id = None;
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    //=====================================================================================
    // Subjects
    //=====================================================================================

    /// Appends a new subject with a locally-generated id and no conversations.
    /// Duplicate names are allowed.
    pub fn add_subject(&mut self, name: impl Into<String>, color: impl Into<String>) -> Subject {
        let subject = Subject {
            id: Uuid::new_v4(),
            name: name.into(),
            color: color.into(),
            is_pinned: false,
            created_at: Utc::now(),
            conversations: Vec::new(),
        };
        self.subjects.push(subject.clone());
        subject
    }

    /// Registers a backend-owned subject as-is.
    pub fn insert_subject(&mut self, subject: Subject) {
        self.subjects.push(subject);
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    pub fn subject(&self, subject_id: Uuid) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.id == subject_id)
    }

    fn subject_mut(&mut self, subject_id: Uuid) -> Option<&mut Subject> {
        self.subjects.iter_mut().find(|s| s.id == subject_id)
    }

    pub fn rename_subject(&mut self, subject_id: Uuid, name: &str) -> Result<(), StoreError> {
        let subject = self
            .subject_mut(subject_id)
            .ok_or(StoreError::UnknownSubject(subject_id))?;
        subject.name = name.to_string();
        Ok(())
    }

    pub fn set_subject_color(&mut self, subject_id: Uuid, color: &str) -> Result<(), StoreError> {
        let subject = self
            .subject_mut(subject_id)
            .ok_or(StoreError::UnknownSubject(subject_id))?;
        subject.color = color.to_string();
        Ok(())
    }

    /// Flips the subject's pin flag and returns the new value.
    pub fn toggle_pin_subject(&mut self, subject_id: Uuid) -> Result<bool, StoreError> {
        let subject = self
            .subject_mut(subject_id)
            .ok_or(StoreError::UnknownSubject(subject_id))?;
        subject.is_pinned = !subject.is_pinned;
        Ok(subject.is_pinned)
    }

    /// Removes a subject together with its conversations and files.
    /// Selection pointers into the deleted subtree are cleared.
    pub fn delete_subject(&mut self, subject_id: Uuid) -> Result<Subject, StoreError> {
        let position = self
            .subjects
            .iter()
            .position(|s| s.id == subject_id)
            .ok_or(StoreError::UnknownSubject(subject_id))?;
        let subject = self.subjects.remove(position);

        self.files.retain(|f| f.subject_id != subject_id);

        if self.current_subject_id == Some(subject_id) {
            self.current_subject_id = None;
        }
        if self
            .current_conversation_id
            .is_some_and(|id| subject.conversations.iter().any(|c| c.id == id))
        {
            self.current_conversation_id = None;
        }

        Ok(subject)
    }

    /// Subjects in display order: pinned first, then by creation date descending.
    /// Computed at read time; the underlying collection keeps insertion order.
    pub fn ordered_subjects(&self) -> Vec<&Subject> {
        let mut subjects: Vec<&Subject> = self.subjects.iter().collect();
        subjects.sort_by_key(|s| (!s.is_pinned, Reverse(s.created_at)));
        subjects
    }

    //=====================================================================================
    // Conversations
    //=====================================================================================

    /// Appends a new conversation with a locally-generated id to the subject.
    pub fn add_conversation(
        &mut self,
        subject_id: Uuid,
        title: impl Into<String>,
    ) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            subject_id,
            title: title.into(),
            is_pinned: false,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        };
        let subject = self
            .subject_mut(subject_id)
            .ok_or(StoreError::UnknownSubject(subject_id))?;
        subject.conversations.push(conversation.clone());
        Ok(conversation)
    }

    /// Registers a backend-owned conversation under its subject.
    pub fn insert_conversation(&mut self, conversation: Conversation) -> Result<(), StoreError> {
        let subject = self
            .subject_mut(conversation.subject_id)
            .ok_or(StoreError::UnknownSubject(conversation.subject_id))?;
        subject.conversations.push(conversation);
        Ok(())
    }

    pub fn conversation(&self, conversation_id: Uuid) -> Option<&Conversation> {
        self.subjects
            .iter()
            .flat_map(|s| s.conversations.iter())
            .find(|c| c.id == conversation_id)
    }

    fn conversation_mut(&mut self, conversation_id: Uuid) -> Option<&mut Conversation> {
        self.subjects
            .iter_mut()
            .flat_map(|s| s.conversations.iter_mut())
            .find(|c| c.id == conversation_id)
    }

    pub fn toggle_pin_conversation(
        &mut self,
        conversation_id: Uuid,
    ) -> Result<bool, StoreError> {
        let conversation = self
            .conversation_mut(conversation_id)
            .ok_or(StoreError::UnknownConversation(conversation_id))?;
        conversation.is_pinned = !conversation.is_pinned;
        Ok(conversation.is_pinned)
    }

    pub fn delete_conversation(&mut self, conversation_id: Uuid) -> Result<(), StoreError> {
        let subject = self
            .subjects
            .iter_mut()
            .find(|s| s.conversations.iter().any(|c| c.id == conversation_id))
            .ok_or(StoreError::UnknownConversation(conversation_id))?;
        subject.conversations.retain(|c| c.id != conversation_id);
        if self.current_conversation_id == Some(conversation_id) {
            self.current_conversation_id = None;
        }
        Ok(())
    }

    /// A subject's conversations in display order: pinned first, then newest.
    pub fn ordered_conversations(&self, subject_id: Uuid) -> Vec<&Conversation> {
        let mut conversations: Vec<&Conversation> = self
            .subject(subject_id)
            .map(|s| s.conversations.iter().collect())
            .unwrap_or_default();
        conversations.sort_by_key(|c| (!c.is_pinned, Reverse(c.created_at)));
        conversations
    }

    /// Bumps a conversation's `updated_at` after backend-confirmed activity.
    pub fn touch_conversation(
        &mut self,
        conversation_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conversation = self
            .conversation_mut(conversation_id)
            .ok_or(StoreError::UnknownConversation(conversation_id))?;
        conversation.updated_at = at;
        Ok(())
    }

    /// Replaces a conversation's cached message list with a backend snapshot.
    pub fn set_conversation_messages(
        &mut self,
        conversation_id: Uuid,
        messages: Vec<Message>,
    ) -> Result<(), StoreError> {
        let conversation = self
            .conversation_mut(conversation_id)
            .ok_or(StoreError::UnknownConversation(conversation_id))?;
        conversation.messages = messages;
        Ok(())
    }

    //=====================================================================================
    // Messages
    //=====================================================================================

    /// Appends a locally-synthesized message to the matching conversation.
    /// Scans all subjects' conversations; the collection is deliberately
    /// unindexed.
    pub fn add_message(
        &mut self,
        conversation_id: Uuid,
        role: Role,
        content: impl Into<String>,
    ) -> Result<Message, StoreError> {
        let message = Message {
            id: MessageId::Provisional(Uuid::new_v4()),
            conversation_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
        };
        self.push_message(message.clone())?;
        Ok(message)
    }

    /// Appends a message (typically backend-confirmed) to its conversation.
    pub fn push_message(&mut self, message: Message) -> Result<(), StoreError> {
        let conversation = self
            .conversation_mut(message.conversation_id)
            .ok_or(StoreError::UnknownConversation(message.conversation_id))?;
        conversation.messages.push(message);
        Ok(())
    }

    /// Removes a message by id. Returns `true` if a message was removed.
    /// Used to retract an optimistic message when its send settles.
    pub fn remove_message(&mut self, conversation_id: Uuid, message_id: &MessageId) -> bool {
        if let Some(conversation) = self.conversation_mut(conversation_id) {
            let before = conversation.messages.len();
            conversation.messages.retain(|m| m.id != *message_id);
            before != conversation.messages.len()
        } else {
            false
        }
    }

    //=====================================================================================
    // Files
    //=====================================================================================

    pub fn add_file(&mut self, file: FileItem) {
        self.files.push(file);
    }

    pub fn delete_file(&mut self, file_id: Uuid) -> Result<FileItem, StoreError> {
        let position = self
            .files
            .iter()
            .position(|f| f.id == file_id)
            .ok_or(StoreError::UnknownFile(file_id))?;
        Ok(self.files.remove(position))
    }

    /// Sets or clears a file's tag. Re-applying the same tag is idempotent.
    pub fn set_file_tag(
        &mut self,
        file_id: Uuid,
        tag: Option<FileTag>,
    ) -> Result<(), StoreError> {
        let file = self
            .files
            .iter_mut()
            .find(|f| f.id == file_id)
            .ok_or(StoreError::UnknownFile(file_id))?;
        file.tag = tag;
        Ok(())
    }

    pub fn set_file_status(
        &mut self,
        file_id: Uuid,
        status: ProcessStatus,
    ) -> Result<(), StoreError> {
        let file = self
            .files
            .iter_mut()
            .find(|f| f.id == file_id)
            .ok_or(StoreError::UnknownFile(file_id))?;
        file.status = status;
        Ok(())
    }

    pub fn files(&self) -> &[FileItem] {
        &self.files
    }

    /// The files belonging to one subject, in insertion order.
    pub fn subject_files(&self, subject_id: Uuid) -> Vec<&FileItem> {
        self.files
            .iter()
            .filter(|f| f.subject_id == subject_id)
            .collect()
    }

    //=====================================================================================
    // Selection State
    //=====================================================================================

    pub fn set_current_subject(&mut self, subject_id: Option<Uuid>) {
        self.current_subject_id = subject_id;
    }

    pub fn set_current_conversation(&mut self, conversation_id: Option<Uuid>) {
        self.current_conversation_id = conversation_id;
    }

    pub fn set_sidebar_open(&mut self, open: bool) {
        self.sidebar_open = open;
    }

    pub fn sidebar_open(&self) -> bool {
        self.sidebar_open
    }

    pub fn current_subject_id(&self) -> Option<Uuid> {
        self.current_subject_id
    }

    pub fn current_conversation_id(&self) -> Option<Uuid> {
        self.current_conversation_id
    }

    pub fn current_subject(&self) -> Option<&Subject> {
        self.current_subject_id.and_then(|id| self.subject(id))
    }

    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.current_conversation_id
            .and_then(|id| self.conversation(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserRole;
    use chrono::Duration;

    fn test_user() -> User {
        User {
            id: Uuid::new_v4(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            role: UserRole::Student,
        }
    }

    fn test_file(subject_id: Uuid, name: &str) -> FileItem {
        FileItem {
            id: Uuid::new_v4(),
            subject_id,
            name: name.to_string(),
            kind: FileKind::from_name(name),
            size: 1024,
            tag: None,
            status: ProcessStatus::Completed,
            uploaded_at: Utc::now(),
        }
    }

    use crate::domain::FileKind;

    #[test]
    fn subject_files_returns_matches_in_insertion_order() {
        let mut store = SessionStore::new(test_user());
        let maths = store.add_subject("Maths", "blue");
        let physics = store.add_subject("Physics", "red");

        let a = test_file(maths.id, "a.pdf");
        let b = test_file(physics.id, "b.pdf");
        let c = test_file(maths.id, "c.png");
        store.add_file(a.clone());
        store.add_file(b.clone());
        store.add_file(c.clone());

        let files: Vec<Uuid> = store.subject_files(maths.id).iter().map(|f| f.id).collect();
        assert_eq!(files, vec![a.id, c.id]);

        store.delete_file(a.id).unwrap();
        let files: Vec<Uuid> = store.subject_files(maths.id).iter().map(|f| f.id).collect();
        assert_eq!(files, vec![c.id]);
    }

    #[test]
    fn duplicate_subject_names_are_allowed() {
        let mut store = SessionStore::new(test_user());
        let first = store.add_subject("Biology", "green");
        let second = store.add_subject("Biology", "green");
        assert_ne!(first.id, second.id);
        assert_eq!(store.subjects().len(), 2);
    }

    #[test]
    fn ordered_subjects_puts_pinned_first_then_newest() {
        let mut store = SessionStore::new(test_user());
        let t0 = Utc::now();
        for (name, pinned, offset) in [("A", false, 1), ("B", true, 2), ("C", false, 3)] {
            let mut subject = store.add_subject(name, "gray");
            subject.created_at = t0 + Duration::seconds(offset);
            subject.is_pinned = pinned;
            // Rewrite the stored copy with the adjusted timestamps.
            store.delete_subject(subject.id).unwrap();
            store.insert_subject(subject);
        }

        let names: Vec<&str> = store
            .ordered_subjects()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["B", "C", "A"]);
    }

    #[test]
    fn add_conversation_to_unknown_subject_is_an_error() {
        let mut store = SessionStore::new(test_user());
        let missing = Uuid::new_v4();
        let err = store.add_conversation(missing, "Untitled").unwrap_err();
        assert_eq!(err, StoreError::UnknownSubject(missing));
        assert!(store.subjects().is_empty());
    }

    #[test]
    fn add_message_finds_conversation_across_subjects() {
        let mut store = SessionStore::new(test_user());
        let maths = store.add_subject("Maths", "blue");
        let physics = store.add_subject("Physics", "red");
        store.add_conversation(maths.id, "Algebra").unwrap();
        let target = store.add_conversation(physics.id, "Optics").unwrap();

        let message = store
            .add_message(target.id, Role::User, "What is refraction?")
            .unwrap();
        assert!(message.id.is_provisional());

        let conversation = store.conversation(target.id).unwrap();
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].content, "What is refraction?");
    }

    #[test]
    fn remove_message_retracts_by_typed_id() {
        let mut store = SessionStore::new(test_user());
        let subject = store.add_subject("Maths", "blue");
        let conversation = store.add_conversation(subject.id, "Algebra").unwrap();
        let message = store
            .add_message(conversation.id, Role::User, "hello")
            .unwrap();

        // A durable id with the same uuid must not match the provisional one.
        assert!(!store.remove_message(conversation.id, &MessageId::Durable(message.id.raw())));
        assert!(store.remove_message(conversation.id, &message.id));
        assert!(store.conversation(conversation.id).unwrap().messages.is_empty());
    }

    #[test]
    fn set_file_tag_is_idempotent() {
        let mut store = SessionStore::new(test_user());
        let subject = store.add_subject("Maths", "blue");
        let file = test_file(subject.id, "exam.pdf");
        store.add_file(file.clone());

        store.set_file_tag(file.id, Some(FileTag::Exam)).unwrap();
        store.set_file_tag(file.id, Some(FileTag::Exam)).unwrap();

        let files = store.subject_files(subject.id);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].tag, Some(FileTag::Exam));
    }

    #[test]
    fn delete_subject_cascades_and_clears_selection() {
        let mut store = SessionStore::new(test_user());
        let subject = store.add_subject("Maths", "blue");
        let conversation = store.add_conversation(subject.id, "Algebra").unwrap();
        store.add_file(test_file(subject.id, "a.pdf"));
        store.set_current_subject(Some(subject.id));
        store.set_current_conversation(Some(conversation.id));

        store.delete_subject(subject.id).unwrap();

        assert!(store.subjects().is_empty());
        assert!(store.files().is_empty());
        assert_eq!(store.current_subject_id(), None);
        assert_eq!(store.current_conversation_id(), None);
    }

    #[test]
    fn delete_conversation_clears_dangling_pointer() {
        let mut store = SessionStore::new(test_user());
        let subject = store.add_subject("Maths", "blue");
        let conversation = store.add_conversation(subject.id, "Algebra").unwrap();
        store.set_current_conversation(Some(conversation.id));

        store.delete_conversation(conversation.id).unwrap();

        assert_eq!(store.current_conversation_id(), None);
        assert!(store.subject(subject.id).unwrap().conversations.is_empty());
    }

    #[test]
    fn toggle_pin_flips_back_and_forth() {
        let mut store = SessionStore::new(test_user());
        let subject = store.add_subject("Maths", "blue");
        assert!(store.toggle_pin_subject(subject.id).unwrap());
        assert!(!store.toggle_pin_subject(subject.id).unwrap());

        let conversation = store.add_conversation(subject.id, "Algebra").unwrap();
        assert!(store.toggle_pin_conversation(conversation.id).unwrap());
        assert!(!store.toggle_pin_conversation(conversation.id).unwrap());
    }
}
