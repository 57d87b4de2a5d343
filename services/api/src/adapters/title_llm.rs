//! services/api/src/adapters/title_llm.rs
//!
//! This module contains the adapter for the conversation-titling LLM.
//! It implements the `TitleGenerationService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use study_core::ports::{PortError, PortResult, TitleGenerationService};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `TitleGenerationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiTitleAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiTitleAdapter {
    /// Creates a new `OpenAiTitleAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// `TitleGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TitleGenerationService for OpenAiTitleAdapter {
    /// Produces a short conversation title from the user's opening message.
    async fn generate_title_from_text(&self, text: &str) -> PortResult<String> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(
                    "You name chat conversations. Given the user's first message, reply with a \
                     short title of at most five words that captures its topic. Reply with the \
                     title only: no quotes, no trailing punctuation.",
                )
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(text)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let title = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().trim_matches('"').to_string())
            .filter(|title| !title.is_empty())
            .ok_or_else(|| {
                PortError::Unexpected("Title LLM response contained no text content.".to_string())
            })?;

        Ok(title)
    }
}
