pub mod domain;
pub mod ports;
pub mod session;
pub mod store;

pub use domain::{
    Conversation, FileItem, FileKind, FileTag, Message, MessageFeedback, MessageId,
    ProcessStatus, Role, Subject, User, UserCredentials, UserRole,
};
pub use ports::{
    AssistantService, DatabaseService, PortError, PortResult, TitleGenerationService, TokenStream,
};
pub use session::{ChatSession, SendEvent, SendEventStream};
pub use store::{SessionStore, StoreError};
