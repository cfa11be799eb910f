//! Collaborator contracts consumed by the control layer.
//!
//! The council never talks to a model, a vector store or a document service
//! directly. It goes through the three traits below, each awaited to
//! completion before the state machine advances.

pub mod replay;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use crate::errors::BackendError;

/// Who authored a message in a backend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One message of the ordered history sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub max_tokens: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// A single stateless generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Role label, e.g. `security.synthesizer` or `coordinator`.
    pub label: String,
    /// Role instructions (system preamble).
    pub instructions: String,
    /// Ordered history; the last message is the one to answer.
    pub messages: Vec<ChatMessage>,
    pub sampling: SamplingParams,
}

impl GenerationRequest {
    /// Concatenated content of every message, for assertions and logging.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Text generation backend. Stateless; any error aborts the current turn only.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, BackendError>;
}

/// Ranked snippet retrieval used to seed specialist context.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Return at most `limit` snippets ranked by relevance to `keywords`.
    async fn retrieve(&self, keywords: &[String], limit: usize) -> anyhow::Result<Vec<String>>;
}

/// Named-section document persistence, exposed to roles as tools.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_section(&self, name: &str, content: &str) -> anyhow::Result<()>;
    async fn list_sections(&self) -> anyhow::Result<Vec<String>>;
    async fn read_section(&self, name: &str) -> anyhow::Result<String>;
    /// Merge the latest version of `name` into the document. `false` if there was nothing to merge.
    async fn merge_section(&self, name: &str) -> anyhow::Result<bool>;
}

/// Run one generation call, abandoning it if `cancel` fires first.
pub async fn generate_with_cancel(
    backend: &dyn GenerationBackend,
    request: GenerationRequest,
    cancel: &CancellationToken,
) -> Result<String, BackendError> {
    if cancel.is_cancelled() {
        return Err(BackendError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BackendError::Cancelled),
        result = backend.generate(request) => result,
    }
}
