//! Bounded two-role deliberation: state, termination, extraction, engine.
//!
//! Each dispatch builds a [`Deliberation`], runs it once, and keeps only
//! the returned [`Conclusion`].

pub mod conclusion;
pub mod engine;
pub mod state;
pub mod termination;

pub use conclusion::{Conclusion, ExtractionMethod, SignalParser, TurnSignal};
pub use engine::{Deliberation, DeliberationOutcome, DeliberationSeed};
pub use state::{DeliberationPhase, DeliberationState, Utterance, UtteranceLog, UtteranceRole};
pub use termination::{TerminationCondition, TerminationOutcome};
