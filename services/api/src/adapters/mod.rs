pub mod assistant_llm;
pub mod db;
pub mod title_llm;

pub use assistant_llm::OpenAiAssistantAdapter;
pub use db::DbAdapter;
pub use title_llm::OpenAiTitleAdapter;
