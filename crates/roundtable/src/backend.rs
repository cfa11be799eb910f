//! `GenerationBackend` on rig's OpenAI-compatible completions client.
//!
//! Each call builds a one-shot agent: role instructions become the preamble,
//! the last user message is the prompt and everything before it is history.

use anyhow::Result;
use async_trait::async_trait;
use coordination::backend::{ChatMessage, ChatRole, GenerationBackend, GenerationRequest};
use coordination::BackendError;
use rig::client::CompletionClient;
use rig::completion::{Chat, Message};
use rig::providers::openai;
use tracing::debug;

use crate::config::EndpointConfig;

/// Prompt used when a request ends with an assistant turn.
const CONTINUE_PROMPT: &str = "Continue.";

pub struct RigBackend {
    client: openai::CompletionsClient,
    model: String,
}

impl RigBackend {
    pub fn new(endpoint: &EndpointConfig) -> Result<Self> {
        Ok(Self {
            client: endpoint.client()?,
            model: endpoint.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationBackend for RigBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<String, BackendError> {
        let (prompt, history) = split_prompt(&request.messages);
        debug!(
            label = %request.label,
            model = %self.model,
            history = history.len(),
            "generation request"
        );

        let mut builder = self
            .client
            .agent(&self.model)
            .preamble(&request.instructions)
            .temperature(request.sampling.temperature);
        if let Some(max_tokens) = request.sampling.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        let agent = builder.build();

        agent
            .chat(&prompt, history)
            .await
            .map_err(|e| classify_error(&e.to_string()))
    }
}

fn to_rig(message: &ChatMessage) -> Message {
    match message.role {
        ChatRole::User => Message::user(message.content.clone()),
        ChatRole::Assistant => Message::assistant(message.content.clone()),
    }
}

/// Split off the prompt. A trailing assistant turn stays in history.
pub fn split_prompt(messages: &[ChatMessage]) -> (String, Vec<Message>) {
    match messages.split_last() {
        Some((last, rest)) if last.role == ChatRole::User => {
            (last.content.clone(), rest.iter().map(to_rig).collect())
        }
        _ => (
            CONTINUE_PROMPT.to_string(),
            messages.iter().map(to_rig).collect(),
        ),
    }
}

/// Map a rig error message onto the backend error taxonomy.
pub fn classify_error(message: &str) -> BackendError {
    let lowered = message.to_ascii_lowercase();
    if ["429", "rate limit", "too many requests"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        BackendError::RateLimited(message.to_string())
    } else if ["connect", "timed out", "timeout", "dns", "connection refused"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        BackendError::Unavailable(message.to_string())
    } else {
        BackendError::Request(message.to_string())
    }
}
