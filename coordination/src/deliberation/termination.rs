//! Termination predicates over a deliberation.
//!
//! Composed conditions are evaluated left to right and the first one that
//! fires wins. The standard composition checks the marker before the round
//! limit, so a synthesizer that concludes on its last round is never forced.

use serde::{Deserialize, Serialize};

use super::conclusion::SignalParser;
use super::state::{DeliberationState, UtteranceRole};

/// Why a deliberation should stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationOutcome {
    Continue,
    /// Marker found in the utterance at `sequence_index`.
    MarkerFound { sequence_index: usize },
    /// Round limit reached without a marker.
    RoundLimit { rounds: u32 },
}

impl TerminationOutcome {
    pub fn should_stop(&self) -> bool {
        !matches!(self, Self::Continue)
    }
}

impl std::fmt::Display for TerminationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::MarkerFound { sequence_index } => {
                write!(f, "marker_found (utterance {})", sequence_index)
            }
            Self::RoundLimit { rounds } => write!(f, "round_limit ({})", rounds),
        }
    }
}

/// Predicate value, composable with [`TerminationCondition::or`].
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationCondition {
    /// The latest utterance of `source` carries the marker.
    Marker {
        signal: SignalParser,
        source: UtteranceRole,
    },
    /// `round_count >= rounds`.
    MaxRounds(u32),
    /// Ordered disjunction.
    Any(Vec<TerminationCondition>),
}

impl TerminationCondition {
    /// Marker from the synthesizer, then the round limit.
    pub fn standard(signal: SignalParser, max_rounds: u32) -> Self {
        Self::Marker {
            signal,
            source: UtteranceRole::Synthesizer,
        }
        .or(Self::MaxRounds(max_rounds))
    }

    /// Append `other` after `self`, flattening nested disjunctions.
    pub fn or(self, other: TerminationCondition) -> Self {
        let mut parts = match self {
            Self::Any(parts) => parts,
            single => vec![single],
        };
        match other {
            Self::Any(more) => parts.extend(more),
            single => parts.push(single),
        }
        Self::Any(parts)
    }

    /// Evaluate against `state`. Pure: reads the state, never mutates it.
    pub fn evaluate(&self, state: &DeliberationState) -> TerminationOutcome {
        match self {
            Self::Marker { signal, source } => match state.log.last_by(*source) {
                Some(utterance) if signal.parse(&utterance.text).is_conclude() => {
                    TerminationOutcome::MarkerFound {
                        sequence_index: utterance.sequence_index,
                    }
                }
                _ => TerminationOutcome::Continue,
            },
            Self::MaxRounds(rounds) => {
                if state.round_count >= *rounds {
                    TerminationOutcome::RoundLimit {
                        rounds: state.round_count,
                    }
                } else {
                    TerminationOutcome::Continue
                }
            }
            Self::Any(parts) => parts
                .iter()
                .map(|part| part.evaluate(state))
                .find(TerminationOutcome::should_stop)
                .unwrap_or(TerminationOutcome::Continue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deliberation::state::DeliberationPhase;

    fn state_after_rounds(rounds: u32, max: u32, synth_text: &str) -> DeliberationState {
        let mut state = DeliberationState::new(max);
        for i in 0..rounds {
            state.transition(DeliberationPhase::GeneratorTurn, "turn").unwrap();
            state.log.push(UtteranceRole::Generator, format!("idea {i}"));
            state
                .transition(DeliberationPhase::SynthesizerTurn, "turn")
                .unwrap();
            state.log.push(UtteranceRole::Synthesizer, synth_text);
        }
        state
    }

    #[test]
    fn continues_without_marker_under_limit() {
        let cond = TerminationCondition::standard(SignalParser::default(), 3);
        let state = state_after_rounds(1, 3, "needs more work");
        assert_eq!(cond.evaluate(&state), TerminationOutcome::Continue);
    }

    #[test]
    fn marker_wins_over_round_limit() {
        let cond = TerminationCondition::standard(SignalParser::default(), 2);
        let state = state_after_rounds(2, 2, "CONCLUDE: done");
        assert!(matches!(
            cond.evaluate(&state),
            TerminationOutcome::MarkerFound { .. }
        ));
    }

    #[test]
    fn round_limit_fires_without_marker() {
        let cond = TerminationCondition::standard(SignalParser::default(), 2);
        let state = state_after_rounds(2, 2, "still debating");
        assert_eq!(
            cond.evaluate(&state),
            TerminationOutcome::RoundLimit { rounds: 2 }
        );
    }

    #[test]
    fn marker_only_counts_from_its_source() {
        let cond = TerminationCondition::Marker {
            signal: SignalParser::default(),
            source: UtteranceRole::Synthesizer,
        };
        let mut state = DeliberationState::new(5);
        state.log.push(UtteranceRole::Generator, "CONCLUDE: premature");
        assert_eq!(cond.evaluate(&state), TerminationOutcome::Continue);
    }

    #[test]
    fn or_flattens_in_order() {
        let cond = TerminationCondition::MaxRounds(1)
            .or(TerminationCondition::MaxRounds(2))
            .or(TerminationCondition::MaxRounds(3).or(TerminationCondition::MaxRounds(4)));
        match cond {
            TerminationCondition::Any(parts) => {
                assert_eq!(parts.len(), 4);
                assert_eq!(parts[0], TerminationCondition::MaxRounds(1));
                assert_eq!(parts[3], TerminationCondition::MaxRounds(4));
            }
            other => panic!("expected Any, got {other:?}"),
        }
    }

    #[test]
    fn evaluation_is_repeatable() {
        let cond = TerminationCondition::standard(SignalParser::default(), 3);
        let state = state_after_rounds(3, 3, "CONCLUDE: ship it");
        let first = cond.evaluate(&state);
        assert_eq!(first, cond.evaluate(&state));
        assert_eq!(state.log.len(), 6);
    }
}
