//! Deliberation control layer for LLM specialist councils.
//!
//! A [`Council`] answers one request by routing it through a coordinator
//! (hub) to specialists (spokes). Each specialist runs a bounded two-role
//! [`Deliberation`] and returns exactly one conclusion; a summarizer turns
//! the collected conclusions into the final report.
//!
//! - [`backend`]: collaborator traits (generation, knowledge, documents) and the replay backend
//! - [`deliberation`]: inner loop, termination conditions and marker extraction
//! - [`decision`]: coordinator decisions, parsing with retry and fallback
//! - [`team`]: team state, orchestrator and summarizer
//! - [`roles`]: role template and specialist definitions
//! - [`tools`]: fenced tool calls served by the collaborators
//!
//! All model calls are sequential and race the session's
//! [`CancellationToken`](tokio_util::sync::CancellationToken).

pub mod backend;
pub mod config;
pub mod decision;
pub mod deliberation;
pub mod errors;
pub mod roles;
pub mod team;
pub mod tools;

pub use backend::{
    ChatMessage, DocumentStore, GenerationBackend, GenerationRequest, KnowledgeStore,
    SamplingParams,
};
pub use config::{CouncilConfig, RetryPolicy};
pub use decision::{Decision, DecisionParser, Target};
pub use deliberation::{Conclusion, Deliberation, ExtractionMethod, SignalParser};
pub use errors::{BackendError, Cancelled, SessionError};
pub use roles::{RoleKind, RoleTraits, Specialist};
pub use team::{Council, CouncilBuilder, SessionOutcome, TeamState};
