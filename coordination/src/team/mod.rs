//! Hub-and-spoke team layer: session state, coordinator, summarizer, council.

pub mod coordinator;
pub mod orchestrator;
pub mod state;
pub mod summarizer;

pub use orchestrator::{Council, CouncilBuilder, DecisionRecord, Provenance, SessionOutcome};
pub use state::{LogEntry, LogKind, SpecialistConclusion, TeamPhase, TeamState, TeamTransition};
pub use summarizer::{SummaryMethod, SummaryOutcome, REPORT_SECTION};
