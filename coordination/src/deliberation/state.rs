//! Deliberation state machine: phases, transitions, and the utterance log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a single specialist deliberation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliberationPhase {
    /// Context seeded, no turn taken yet.
    Init,
    /// Generative role is speaking.
    GeneratorTurn,
    /// Synthesizing role is speaking.
    SynthesizerTurn,
    /// A conclusion was extracted.
    Concluded,
    /// Backend failure or cancellation ended the exchange early.
    Aborted,
}

impl DeliberationPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Concluded | Self::Aborted)
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [DeliberationPhase] {
        match self {
            Self::Init => &[Self::GeneratorTurn, Self::Aborted],
            Self::GeneratorTurn => &[Self::SynthesizerTurn, Self::Aborted],
            Self::SynthesizerTurn => &[Self::GeneratorTurn, Self::Concluded, Self::Aborted],
            Self::Concluded | Self::Aborted => &[],
        }
    }
}

impl std::fmt::Display for DeliberationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::GeneratorTurn => write!(f, "generator_turn"),
            Self::SynthesizerTurn => write!(f, "synthesizer_turn"),
            Self::Concluded => write!(f, "concluded"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Author of an utterance inside one deliberation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtteranceRole {
    /// Seeded task, team context, or control instructions.
    Context,
    Generator,
    Synthesizer,
    /// Result of a tool invocation.
    Tool,
}

impl UtteranceRole {
    /// Whether this is one of the two debating roles.
    pub fn is_speaker(self) -> bool {
        matches!(self, Self::Generator | Self::Synthesizer)
    }
}

impl std::fmt::Display for UtteranceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Context => write!(f, "context"),
            Self::Generator => write!(f, "generator"),
            Self::Synthesizer => write!(f, "synthesizer"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// Immutable entry of the utterance log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub role: UtteranceRole,
    pub text: String,
    pub sequence_index: usize,
}

/// Append-only ordered record of one deliberation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtteranceLog {
    entries: Vec<Utterance>,
}

impl UtteranceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append and return the sequence index assigned.
    pub fn push(&mut self, role: UtteranceRole, text: impl Into<String>) -> usize {
        let sequence_index = self.entries.len();
        self.entries.push(Utterance {
            role,
            text: text.into(),
            sequence_index,
        });
        sequence_index
    }

    pub fn entries(&self) -> &[Utterance] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&Utterance> {
        self.entries.last()
    }

    /// Latest utterance by `role`.
    pub fn last_by(&self, role: UtteranceRole) -> Option<&Utterance> {
        self.entries.iter().rev().find(|u| u.role == role)
    }

    /// Latest utterance by either debating role.
    pub fn last_spoken(&self) -> Option<&Utterance> {
        self.entries.iter().rev().find(|u| u.role.is_speaker())
    }
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: DeliberationPhase,
    pub to: DeliberationPhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: DeliberationPhase,
    pub to: DeliberationPhase,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid deliberation transition {} → {} (allowed: {:?})",
            self.from,
            self.to,
            self.from.valid_transitions()
        )
    }
}

impl std::error::Error for TransitionError {}

/// State owned by exactly one running deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationState {
    pub log: UtteranceLog,
    pub round_count: u32,
    pub max_rounds: u32,
    pub concluded: bool,
    pub phase: DeliberationPhase,
    pub transitions: Vec<PhaseTransition>,
}

impl DeliberationState {
    pub fn new(max_rounds: u32) -> Self {
        Self {
            log: UtteranceLog::new(),
            round_count: 0,
            max_rounds,
            concluded: false,
            phase: DeliberationPhase::Init,
            transitions: Vec::new(),
        }
    }

    /// Transition to a new phase. Entering `GeneratorTurn` starts a new round.
    pub fn transition(
        &mut self,
        to: DeliberationPhase,
        reason: &str,
    ) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
            });
        }

        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;

        match to {
            DeliberationPhase::GeneratorTurn => self.round_count += 1,
            DeliberationPhase::Concluded => self.concluded = true,
            _ => {}
        }
        Ok(())
    }

    pub fn rounds_exhausted(&self) -> bool {
        self.round_count >= self.max_rounds
    }

    pub fn status_line(&self) -> String {
        format!(
            "[{}] round {}/{} | {} utterances",
            self.phase,
            self.round_count,
            self.max_rounds,
            self.log.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_advance_on_generator_turn() {
        let mut state = DeliberationState::new(2);
        state.transition(DeliberationPhase::GeneratorTurn, "start").unwrap();
        assert_eq!(state.round_count, 1);
        state
            .transition(DeliberationPhase::SynthesizerTurn, "draft")
            .unwrap();
        assert_eq!(state.round_count, 1);
        assert!(!state.rounds_exhausted());
        state.transition(DeliberationPhase::GeneratorTurn, "again").unwrap();
        assert!(state.rounds_exhausted());
    }

    #[test]
    fn conclusion_only_after_synthesizer() {
        let mut state = DeliberationState::new(3);
        let err = state
            .transition(DeliberationPhase::Concluded, "skip")
            .unwrap_err();
        assert_eq!(err.from, DeliberationPhase::Init);

        state.transition(DeliberationPhase::GeneratorTurn, "start").unwrap();
        assert!(state.transition(DeliberationPhase::Concluded, "skip").is_err());
        state
            .transition(DeliberationPhase::SynthesizerTurn, "draft")
            .unwrap();
        state.transition(DeliberationPhase::Concluded, "marker").unwrap();
        assert!(state.concluded);
        assert!(state.phase.is_terminal());
        assert_eq!(state.transitions.len(), 3);
    }

    #[test]
    fn terminal_phases_reject_everything() {
        let mut state = DeliberationState::new(3);
        state.transition(DeliberationPhase::Aborted, "backend down").unwrap();
        assert!(state
            .transition(DeliberationPhase::GeneratorTurn, "retry")
            .is_err());
        assert!(!state.concluded);
    }

    #[test]
    fn log_assigns_sequence_and_searches_backwards() {
        let mut log = UtteranceLog::new();
        log.push(UtteranceRole::Context, "task");
        log.push(UtteranceRole::Generator, "idea 1");
        log.push(UtteranceRole::Synthesizer, "critique 1");
        log.push(UtteranceRole::Tool, "tool output");
        log.push(UtteranceRole::Generator, "idea 2");

        assert_eq!(log.len(), 5);
        assert_eq!(log.last().unwrap().sequence_index, 4);
        assert_eq!(log.last_by(UtteranceRole::Synthesizer).unwrap().text, "critique 1");
        assert_eq!(log.last_spoken().unwrap().text, "idea 2");
        assert_eq!(log.last_by(UtteranceRole::Tool).unwrap().sequence_index, 3);
    }

    #[test]
    fn status_line_shows_progress() {
        let mut state = DeliberationState::new(4);
        state.transition(DeliberationPhase::GeneratorTurn, "start").unwrap();
        let line = state.status_line();
        assert!(line.contains("[generator_turn]"));
        assert!(line.contains("round 1/4"));
    }
}
