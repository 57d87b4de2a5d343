//! services/api/src/adapters/assistant_llm.rs
//!
//! This module contains the adapter for the main study assistant LLM.
//! It implements the `AssistantService` port from the `core` crate,
//! streaming completion tokens back as they arrive.

const SYSTEM_INSTRUCTIONS: &str = r#"You are a friendly study assistant helping a student work through their course material.

Your role:
- Answer the student's questions clearly and accurately.
- When a question touches on earlier messages in the conversation, use that history.
- Prefer worked explanations over bare answers: show the reasoning steps a student could follow.
- Keep the tone encouraging and conversational, never condescending.

Style:
- Use plain language and contractions.
- Keep answers as long as they need to be and no longer.
- Use short lists or step-by-step structure when it genuinely helps."#;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures::StreamExt;
use study_core::{
    domain::{Message, Role},
    ports::{AssistantService, PortError, PortResult, TokenStream},
};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `AssistantService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiAssistantAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiAssistantAdapter {
    /// Creates a new `OpenAiAssistantAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

fn history_message(message: &Message) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let built = match message.role {
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(message.content.as_str())
            .build()?
            .into(),
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(message.content.as_str())
            .build()?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(message.content.as_str())
            .build()?
            .into(),
    };
    Ok(built)
}

//=========================================================================================
// `AssistantService` Trait Implementation
//=========================================================================================

#[async_trait]
impl AssistantService for OpenAiAssistantAdapter {
    /// Opens a streaming chat completion for the prompt, preceded by the
    /// conversation history, and returns the token stream.
    async fn complete_streaming(
        &self,
        history: &[Message],
        prompt: &str,
    ) -> PortResult<TokenStream> {
        let mut messages: Vec<ChatCompletionRequestMessage> =
            vec![ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into()];

        for message in history {
            messages.push(
                history_message(message).map_err(|e| PortError::Unexpected(e.to_string()))?,
            );
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response_stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        // Each stream item carries at most one delta; empty deltas are dropped
        // so callers only ever see actual text.
        let tokens = response_stream.filter_map(|item| async move {
            match item {
                Ok(response) => response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|content| !content.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(PortError::Unexpected(e.to_string()))),
            }
        });

        Ok(Box::pin(tokens))
    }
}
