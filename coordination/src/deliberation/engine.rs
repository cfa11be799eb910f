//! Inner deliberation loop for one specialist.
//!
//! ```text
//! Init → GeneratorTurn → SynthesizerTurn → GeneratorTurn …
//!                                        ↓ marker            → Concluded
//!                                        ↓ round limit       → forced summary → Concluded
//! any turn → Aborted (backend error: raw fallback; cancellation: no conclusion)
//! ```
//!
//! State is created inside [`Deliberation::run`] and dropped when it returns,
//! so nothing leaks from one dispatch to the next.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::conclusion::{Conclusion, ExtractionMethod, SignalParser};
use super::state::{DeliberationPhase, DeliberationState, Utterance, UtteranceRole};
use super::termination::{TerminationCondition, TerminationOutcome};
use crate::backend::{generate_with_cancel, ChatMessage, GenerationBackend, GenerationRequest};
use crate::errors::{BackendError, Cancelled};
use crate::roles::RolePrompt;
use crate::tools::{number_snippets, parse_tool_blocks, strip_tool_blocks, ToolBox};

const TOOL_FOLLOW_UP: &str =
    "The tool results are above. Continue your turn using them; do not call tools again.";

/// Everything a specialist is told before its first turn.
#[derive(Debug, Clone, Default)]
pub struct DeliberationSeed {
    pub request: String,
    pub instructions: String,
    pub focus_terms: Vec<String>,
    /// Filtered global log: coordinator reasoning and specialist conclusions.
    pub team_context: Vec<String>,
    pub knowledge: Vec<String>,
}

impl DeliberationSeed {
    pub fn render(&self) -> String {
        let mut out = format!(
            "Original request:\n{}\n\nYour task:\n{}",
            self.request.trim(),
            self.instructions.trim()
        );
        if !self.focus_terms.is_empty() {
            out.push_str("\n\nFocus terms: ");
            out.push_str(&self.focus_terms.join(", "));
        }
        if !self.team_context.is_empty() {
            out.push_str("\n\nTeam discussion so far:\n");
            out.push_str(&self.team_context.join("\n"));
        }
        if !self.knowledge.is_empty() {
            out.push_str("\n\nRelevant knowledge:\n");
            out.push_str(&number_snippets(&self.knowledge));
        }
        out
    }
}

/// Result of one deliberation, plus call accounting.
#[derive(Debug, Clone)]
pub struct DeliberationOutcome {
    pub specialist: String,
    pub conclusion: Conclusion,
    pub rounds: u32,
    pub generation_calls: u32,
    pub failed_calls: u32,
    pub forced_summary: bool,
    pub polished: bool,
    pub utterances: usize,
}

impl DeliberationOutcome {
    pub fn successful_calls(&self) -> u32 {
        self.generation_calls.saturating_sub(self.failed_calls)
    }
}

enum TurnFailure {
    Cancelled,
    Backend(BackendError),
}

#[derive(Default)]
struct CallStats {
    calls: u32,
    failed: u32,
}

/// A configured two-role exchange. Cheap to build per dispatch.
#[derive(Debug, Clone)]
pub struct Deliberation {
    specialist: String,
    generator: RolePrompt,
    synthesizer: RolePrompt,
    reporter: Option<RolePrompt>,
    signal: SignalParser,
    termination: TerminationCondition,
    max_rounds: u32,
    tools: Option<ToolBox>,
    max_tool_calls: usize,
}

impl Deliberation {
    pub fn new(
        specialist: impl Into<String>,
        generator: RolePrompt,
        synthesizer: RolePrompt,
        signal: SignalParser,
        max_rounds: u32,
    ) -> Self {
        let max_rounds = max_rounds.max(1);
        Self {
            specialist: specialist.into(),
            generator,
            synthesizer,
            reporter: None,
            termination: TerminationCondition::standard(signal.clone(), max_rounds),
            signal,
            max_rounds,
            tools: None,
            max_tool_calls: 0,
        }
    }

    /// Rewrite the extracted conclusion with one extra reporter call.
    pub fn with_reporter(mut self, reporter: RolePrompt) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_tools(mut self, tools: ToolBox, max_calls_per_turn: usize) -> Self {
        self.tools = Some(tools);
        self.max_tool_calls = max_calls_per_turn;
        self
    }

    /// Replace the standard condition. The round cap still applies.
    pub fn with_termination(mut self, condition: TerminationCondition) -> Self {
        self.termination = condition;
        self
    }

    /// Run to exactly one conclusion, or `Cancelled`.
    pub async fn run(
        &self,
        backend: &dyn GenerationBackend,
        seed: &DeliberationSeed,
        cancel: &CancellationToken,
    ) -> Result<DeliberationOutcome, Cancelled> {
        let mut state = DeliberationState::new(self.max_rounds);
        let mut stats = CallStats::default();
        let mut forced_summary = false;
        state.log.push(UtteranceRole::Context, seed.render());

        info!(
            specialist = %self.specialist,
            max_rounds = self.max_rounds,
            "deliberation started"
        );

        let conclusion = loop {
            advance(&mut state, DeliberationPhase::GeneratorTurn, "generator turn");
            if let Err(failure) = self
                .take_turn(
                    backend,
                    &self.generator,
                    UtteranceRole::Generator,
                    &mut state,
                    &mut stats,
                    cancel,
                )
                .await
            {
                break self.abort(&mut state, failure)?;
            }

            advance(&mut state, DeliberationPhase::SynthesizerTurn, "synthesizer turn");
            let turn = self
                .take_turn(
                    backend,
                    &self.synthesizer,
                    UtteranceRole::Synthesizer,
                    &mut state,
                    &mut stats,
                    cancel,
                )
                .await;
            let concluded = match turn {
                Ok(concluded) => concluded,
                Err(failure) => break self.abort(&mut state, failure)?,
            };

            let mut outcome = match concluded {
                Some(sequence_index) => TerminationOutcome::MarkerFound { sequence_index },
                None => self.termination.evaluate(&state),
            };
            if outcome == TerminationOutcome::Continue && state.rounds_exhausted() {
                outcome = TerminationOutcome::RoundLimit {
                    rounds: state.round_count,
                };
            }
            debug!(
                specialist = %self.specialist,
                status = %state.status_line(),
                %outcome,
                "turn evaluated"
            );

            match outcome {
                TerminationOutcome::Continue => continue,
                TerminationOutcome::MarkerFound { sequence_index } => {
                    let text = state
                        .log
                        .entries()
                        .get(sequence_index)
                        .map(|u| u.text.clone())
                        .unwrap_or_default();
                    advance(&mut state, DeliberationPhase::Concluded, "marker found");
                    break Conclusion::from_utterance(
                        &self.signal,
                        &strip_tool_blocks(&text),
                        ExtractionMethod::MarkerFound,
                    );
                }
                TerminationOutcome::RoundLimit { rounds } => {
                    info!(
                        specialist = %self.specialist,
                        rounds,
                        "round limit reached without marker, forcing summary"
                    );
                    forced_summary = true;
                    match self.forced_summary(backend, &mut state, &mut stats, cancel).await {
                        Ok(text) => {
                            advance(&mut state, DeliberationPhase::Concluded, "forced summary");
                            break Conclusion::from_utterance(
                                &self.signal,
                                &text,
                                ExtractionMethod::ForcedSummary,
                            );
                        }
                        Err(failure) => break self.abort(&mut state, failure)?,
                    }
                }
            }
        };

        let (conclusion, polished) = self.polish(backend, conclusion, &mut stats, cancel).await?;

        info!(
            specialist = %self.specialist,
            method = %conclusion.method,
            rounds = state.round_count,
            calls = stats.calls,
            "deliberation concluded"
        );

        Ok(DeliberationOutcome {
            specialist: self.specialist.clone(),
            conclusion,
            rounds: state.round_count,
            generation_calls: stats.calls,
            failed_calls: stats.failed,
            forced_summary,
            polished,
            utterances: state.log.len(),
        })
    }

    async fn call(
        &self,
        backend: &dyn GenerationBackend,
        role: &RolePrompt,
        speaker: UtteranceRole,
        state: &DeliberationState,
        stats: &mut CallStats,
        cancel: &CancellationToken,
    ) -> Result<String, TurnFailure> {
        let request = GenerationRequest {
            label: role.label.clone(),
            instructions: role.instructions.clone(),
            messages: history_for(speaker, state.log.entries()),
            sampling: role.sampling,
        };
        stats.calls += 1;
        match generate_with_cancel(backend, request, cancel).await {
            Ok(text) => Ok(text),
            Err(BackendError::Cancelled) => Err(TurnFailure::Cancelled),
            Err(e) => {
                stats.failed += 1;
                Err(TurnFailure::Backend(e))
            }
        }
    }

    /// One role turn, including tool execution and a single follow-up.
    ///
    /// Returns the sequence index of a synthesizer reply that carried the
    /// marker outside its tool blocks. Its tool calls still run, but no
    /// follow-up is requested.
    async fn take_turn(
        &self,
        backend: &dyn GenerationBackend,
        role: &RolePrompt,
        speaker: UtteranceRole,
        state: &mut DeliberationState,
        stats: &mut CallStats,
        cancel: &CancellationToken,
    ) -> Result<Option<usize>, TurnFailure> {
        let text = self.call(backend, role, speaker, state, stats, cancel).await?;
        let index = state.log.push(speaker, text.as_str());
        let concluded = (speaker == UtteranceRole::Synthesizer
            && self.signal.parse(&strip_tool_blocks(&text)).is_conclude())
        .then_some(index);

        let Some(tools) = self.tools.as_ref().filter(|_| !role.tools.is_empty()) else {
            return Ok(concluded);
        };
        let calls = parse_tool_blocks(&text);
        if calls.is_empty() {
            return Ok(concluded);
        }
        for call in calls.iter().take(self.max_tool_calls) {
            if cancel.is_cancelled() {
                return Err(TurnFailure::Cancelled);
            }
            debug!(specialist = %self.specialist, tool = %call.tool, "executing tool");
            let result = tools.run(call, &role.tools).await;
            state.log.push(UtteranceRole::Tool, result);
        }
        if calls.len() > self.max_tool_calls {
            let dropped = calls.len() - self.max_tool_calls;
            warn!(
                specialist = %self.specialist,
                requested = calls.len(),
                limit = self.max_tool_calls,
                "tool calls over the per-turn limit were dropped"
            );
            state.log.push(
                UtteranceRole::Tool,
                format!(
                    "Tool calls dropped: {dropped} over the limit of {} per turn were not run.",
                    self.max_tool_calls
                ),
            );
        }
        if concluded.is_some() {
            return Ok(concluded);
        }

        state.log.push(UtteranceRole::Context, TOOL_FOLLOW_UP);
        let follow_up = self.call(backend, role, speaker, state, stats, cancel).await?;
        state.log.push(speaker, follow_up);
        Ok(None)
    }

    async fn forced_summary(
        &self,
        backend: &dyn GenerationBackend,
        state: &mut DeliberationState,
        stats: &mut CallStats,
        cancel: &CancellationToken,
    ) -> Result<String, TurnFailure> {
        state
            .log
            .push(UtteranceRole::Context, self.signal.forced_summary_instruction());
        let text = self
            .call(
                backend,
                &self.synthesizer,
                UtteranceRole::Synthesizer,
                state,
                stats,
                cancel,
            )
            .await?;
        state.log.push(UtteranceRole::Synthesizer, text.as_str());
        Ok(text)
    }

    fn abort(
        &self,
        state: &mut DeliberationState,
        failure: TurnFailure,
    ) -> Result<Conclusion, Cancelled> {
        match failure {
            TurnFailure::Cancelled => {
                advance(state, DeliberationPhase::Aborted, "cancelled");
                info!(specialist = %self.specialist, "deliberation cancelled");
                Err(Cancelled)
            }
            TurnFailure::Backend(e) => {
                advance(state, DeliberationPhase::Aborted, "backend failure");
                warn!(
                    specialist = %self.specialist,
                    error = %e,
                    round = state.round_count,
                    "generation failed, falling back to raw transcript"
                );
                let last = state
                    .log
                    .last_by(UtteranceRole::Synthesizer)
                    .or_else(|| state.log.last_spoken())
                    .map(|u| u.text.as_str());
                Ok(Conclusion::raw_fallback(last))
            }
        }
    }

    async fn polish(
        &self,
        backend: &dyn GenerationBackend,
        conclusion: Conclusion,
        stats: &mut CallStats,
        cancel: &CancellationToken,
    ) -> Result<(Conclusion, bool), Cancelled> {
        let Some(reporter) = &self.reporter else {
            return Ok((conclusion, false));
        };
        if conclusion.method == ExtractionMethod::RawFallback {
            return Ok((conclusion, false));
        }

        let request = GenerationRequest {
            label: reporter.label.clone(),
            instructions: reporter.instructions.clone(),
            messages: vec![ChatMessage::user(format!(
                "Conclusion to restate:\n\n{}",
                conclusion.text
            ))],
            sampling: reporter.sampling,
        };
        stats.calls += 1;
        match generate_with_cancel(backend, request, cancel).await {
            Ok(text) if !text.trim().is_empty() => Ok((
                Conclusion {
                    text: self.signal.extract(&text),
                    method: conclusion.method,
                },
                true,
            )),
            Ok(_) => Ok((conclusion, false)),
            Err(BackendError::Cancelled) => Err(Cancelled),
            Err(e) => {
                stats.failed += 1;
                warn!(specialist = %self.specialist, error = %e, "polish failed, keeping conclusion");
                Ok((conclusion, false))
            }
        }
    }
}

fn advance(state: &mut DeliberationState, to: DeliberationPhase, reason: &str) {
    if let Err(e) = state.transition(to, reason) {
        warn!(error = %e, "unexpected deliberation transition");
    }
}

/// The log as seen by `speaker`: its own turns are assistant messages.
fn history_for(speaker: UtteranceRole, entries: &[Utterance]) -> Vec<ChatMessage> {
    entries
        .iter()
        .map(|u| match u.role {
            role if role == speaker => ChatMessage::assistant(u.text.clone()),
            UtteranceRole::Context | UtteranceRole::Tool => ChatMessage::user(u.text.clone()),
            other => ChatMessage::user(format!("[{other}]\n{}", u.text)),
        })
        .collect()
}
