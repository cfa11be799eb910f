//! Hub-and-spoke council session.
//!
//! ```text
//! Coordinate ──specialist──▶ Dispatch ──conclusion──▶ Coordinate
//!     │  ▲ continue_self                                  │
//!     │  └────────────────                                │
//!     └──summarize / end / budget / cycle cap──▶ Summarize ──▶ End
//! ```
//!
//! The council owns the roster, the collaborators and the rendered role
//! prompts. Every [`Council::consult`] call builds a fresh [`TeamState`].
//! Only cancellation and total backend unavailability surface as errors.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::coordinator::{render_briefing, CoordinatorExchange};
use super::state::{TeamPhase, TeamState};
use super::summarizer::{SummaryMethod, Summarizer};
use crate::backend::{DocumentStore, GenerationBackend, KnowledgeStore};
use crate::config::CouncilConfig;
use crate::decision::parser::FALLBACK_INSTRUCTIONS;
use crate::decision::{fallback_decision, Decision, DecisionOrigin, DecisionParser, Target};
use crate::deliberation::{Deliberation, DeliberationOutcome, DeliberationSeed, SignalParser};
use crate::errors::{Cancelled, SessionError};
use crate::roles::{RoleKind, RolePrompt, RoleTemplate, RoleTraits, Specialist};
use crate::tools::ToolBox;

/// Subject line shared by the council-level roles.
const COUNCIL_SUBJECT: &str = "a multi-domain specialist consultation";

/// How the decision acted on in one coordinator cycle came about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Provenance {
    /// Parsed from the coordinator's reply on `attempt`.
    Coordinator { attempt: u32 },
    /// Parser retries ran out.
    Fallback { reason: String },
    /// Message budget reached; the coordinator was not called.
    BudgetOverride,
    /// Too many coordinator cycles; the coordinator was not called.
    CycleCap,
    /// Consecutive `continue_self` limit reached.
    SelfContinueLimit,
    /// The coordinator named an unknown specialist.
    Substituted { requested: String },
}

impl From<DecisionOrigin> for Provenance {
    fn from(origin: DecisionOrigin) -> Self {
        match origin {
            DecisionOrigin::Parsed { attempt } => Self::Coordinator { attempt },
            DecisionOrigin::Fallback { reason } => Self::Fallback { reason },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub cycle: u32,
    pub decision: Decision,
    pub provenance: Provenance,
}

/// Everything a successful session produced.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub report: String,
    pub summary_method: SummaryMethod,
    pub report_persisted: bool,
    pub state: TeamState,
    pub decisions: Vec<DecisionRecord>,
    pub backend_successes: u32,
    pub backend_failures: u32,
}

struct SpecialistRoles {
    specialist: Specialist,
    generator: RolePrompt,
    synthesizer: RolePrompt,
    reporter: Option<RolePrompt>,
}

/// Assembles a [`Council`]; validation happens in [`CouncilBuilder::build`].
pub struct CouncilBuilder {
    backend: Arc<dyn GenerationBackend>,
    config: CouncilConfig,
    specialists: Vec<Specialist>,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    documents: Option<Arc<dyn DocumentStore>>,
}

impl CouncilBuilder {
    pub fn config(mut self, config: CouncilConfig) -> Self {
        self.config = config;
        self
    }

    pub fn specialist(mut self, specialist: Specialist) -> Self {
        self.specialists.push(specialist);
        self
    }

    pub fn specialists(mut self, specialists: impl IntoIterator<Item = Specialist>) -> Self {
        self.specialists.extend(specialists);
        self
    }

    pub fn knowledge(mut self, store: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(store);
        self
    }

    pub fn documents(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(store);
        self
    }

    /// Validate the config and roster, then render every role prompt once.
    pub fn build(self) -> Result<Council, SessionError> {
        self.config.validate().map_err(SessionError::Configuration)?;
        validate_roster(&self.specialists)?;

        let mut tools = ToolBox::new(self.config.knowledge_snippets);
        if let Some(store) = &self.knowledge {
            tools = tools.with_knowledge(Arc::clone(store));
        }
        if let Some(store) = &self.documents {
            tools = tools.with_documents(Arc::clone(store));
        }
        let available = tools.available();
        let signal = SignalParser::new(&self.config.marker);
        let config = &self.config;

        let base = RoleTemplate {
            owner: None,
            subject: COUNCIL_SUBJECT,
            signal: &signal,
            default_temperature: config.coordinator_temperature,
            max_tokens: config.max_tokens,
            available_tools: &available,
        };

        let roster: Vec<SpecialistRoles> = self
            .specialists
            .iter()
            .map(|specialist| {
                let generate = RoleTemplate {
                    owner: Some(specialist.id.as_str()),
                    subject: specialist.description.as_str(),
                    default_temperature: config.generator_temperature,
                    ..base.clone()
                };
                let synthesize = RoleTemplate {
                    default_temperature: config.synthesizer_temperature,
                    ..generate.clone()
                };
                SpecialistRoles {
                    specialist: specialist.clone(),
                    generator: generate.render(RoleKind::Generator, &specialist.generator),
                    synthesizer: synthesize.render(RoleKind::Synthesizer, &specialist.synthesizer),
                    reporter: config
                        .polish_conclusions
                        .then(|| synthesize.render(RoleKind::Reporter, &RoleTraits::default())),
                }
            })
            .collect();

        let coordinator = base.render(RoleKind::Coordinator, &RoleTraits::default());
        let summarizer = RoleTemplate {
            default_temperature: config.summarizer_temperature,
            ..base.clone()
        }
        .render(RoleKind::Summarizer, &RoleTraits::default());

        info!(
            specialists = self.specialists.len(),
            tools = available.len(),
            marker = %self.config.marker,
            "council assembled"
        );

        Ok(Council {
            parser: DecisionParser::new(self.config.decision_retries)
                .with_max_lookups(self.config.max_tool_calls_per_turn),
            backend: self.backend,
            roster,
            coordinator,
            summarizer,
            signal,
            tools,
            knowledge: self.knowledge,
            documents: self.documents,
            config: self.config,
        })
    }
}

fn validate_roster(specialists: &[Specialist]) -> Result<(), SessionError> {
    if specialists.is_empty() {
        return Err(SessionError::Configuration(
            "at least one specialist is required".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for specialist in specialists {
        let id = specialist.id.trim();
        if id.is_empty() {
            return Err(SessionError::Configuration(
                "specialist id must not be empty".to_string(),
            ));
        }
        if !matches!(Target::parse(id), Target::Specialist(_)) {
            return Err(SessionError::Configuration(format!(
                "specialist id '{id}' collides with a control decision"
            )));
        }
        if !seen.insert(id.to_ascii_lowercase()) {
            return Err(SessionError::Configuration(format!(
                "duplicate specialist id '{id}'"
            )));
        }
    }
    Ok(())
}

/// A configured council. Reusable across sessions.
pub struct Council {
    backend: Arc<dyn GenerationBackend>,
    config: CouncilConfig,
    roster: Vec<SpecialistRoles>,
    coordinator: RolePrompt,
    summarizer: RolePrompt,
    signal: SignalParser,
    parser: DecisionParser,
    tools: ToolBox,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    documents: Option<Arc<dyn DocumentStore>>,
}

#[derive(Default)]
struct CallTally {
    successes: u32,
    failures: u32,
    last_error: Option<String>,
}

impl CallTally {
    fn add(&mut self, successes: u32, failures: u32, last_error: Option<&String>) {
        self.successes += successes;
        self.failures += failures;
        if let Some(e) = last_error {
            self.last_error = Some(e.clone());
        }
    }

    fn unavailable(&self) -> SessionError {
        SessionError::BackendUnavailable {
            attempts: self.failures,
            last_error: self
                .last_error
                .clone()
                .unwrap_or_else(|| "no backend call succeeded".to_string()),
        }
    }
}

impl Council {
    pub fn builder(backend: Arc<dyn GenerationBackend>) -> CouncilBuilder {
        CouncilBuilder {
            backend,
            config: CouncilConfig::default(),
            specialists: Vec::new(),
            knowledge: None,
            documents: None,
        }
    }

    pub fn config(&self) -> &CouncilConfig {
        &self.config
    }

    pub fn specialists(&self) -> impl Iterator<Item = &Specialist> {
        self.roster.iter().map(|r| &r.specialist)
    }

    /// Run one session on `request` to a final report.
    pub async fn consult(
        &self,
        request: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        let ids: Vec<String> = self.specialists().map(|s| s.id.clone()).collect();
        let mut state = TeamState::new(request, ids, self.config.message_budget);
        let mut decisions = Vec::new();
        let mut tally = CallTally::default();
        let mut self_continues = 0;
        let mut cycle = 0;
        let cycle_cap = self.config.cycle_cap();

        info!(
            session_id = %state.session_id,
            specialists = state.roster.len(),
            budget = state.message_budget,
            "council session started"
        );

        loop {
            if cancel.is_cancelled() {
                return Err(self.fail(&mut state, SessionError::Cancelled));
            }
            cycle += 1;

            let (decision, provenance) = if state.budget_exhausted() {
                info!(
                    message_count = state.message_count,
                    "message budget exhausted, summarizing"
                );
                (
                    Decision::summarize("Message budget exhausted."),
                    Provenance::BudgetOverride,
                )
            } else if cycle > cycle_cap {
                warn!(cycle, cycle_cap, "coordinator cycle cap reached, summarizing");
                (
                    Decision::summarize("Coordinator cycle limit reached."),
                    Provenance::CycleCap,
                )
            } else {
                let briefing = render_briefing(
                    &state,
                    &self.specialists().collect::<Vec<_>>(),
                    self.config.recent_log_window,
                    self_continues,
                );
                let mut exchange = CoordinatorExchange::new(
                    self.backend.as_ref(),
                    &self.coordinator,
                    &self.tools,
                    briefing,
                    cancel,
                );
                let standing = state.standing();
                let resolved = self
                    .parser
                    .resolve(&mut exchange, &standing, &state.focus_terms)
                    .await;
                let resolution = match resolved {
                    Ok(resolution) => resolution,
                    Err(Cancelled) => return Err(self.fail(&mut state, SessionError::Cancelled)),
                };
                tally.add(
                    resolution.backend_successes,
                    resolution.backend_failures,
                    resolution.last_backend_error.as_ref(),
                );
                if resolution.backend_unreachable() && tally.successes == 0 {
                    let err = tally.unavailable();
                    return Err(self.fail(&mut state, err));
                }
                (resolution.decision, resolution.origin.into())
            };

            let (decision, provenance) = self.settle(decision, provenance, &state, self_continues);
            debug!(cycle, target = %decision.target, ?provenance, "decision settled");
            state.record_decision(&decision);
            decisions.push(DecisionRecord {
                cycle,
                decision: decision.clone(),
                provenance,
            });

            match &decision.target {
                Target::ContinueSelf => {
                    self_continues += 1;
                    advance(&mut state, TeamPhase::Coordinate, "continue_self");
                }
                Target::Summarize | Target::End => {
                    advance(&mut state, TeamPhase::Summarize, &decision.target.to_string());
                    break;
                }
                Target::Specialist(id) => {
                    self_continues = 0;
                    let Some(roles) = self.roster.iter().find(|r| &r.specialist.id == id) else {
                        // settle() only returns roster ids
                        warn!(specialist = %id, "unroutable specialist, summarizing");
                        advance(&mut state, TeamPhase::Summarize, "unroutable");
                        break;
                    };
                    if !decision.focus_terms.is_empty() {
                        state.focus_terms = decision.focus_terms.clone();
                    }
                    advance(&mut state, TeamPhase::Dispatch, id);

                    let dispatched = self.dispatch(roles, &decision, &state, cancel).await;
                    let outcome = match dispatched {
                        Ok(outcome) => outcome,
                        Err(Cancelled) => {
                            return Err(self.fail(&mut state, SessionError::Cancelled))
                        }
                    };
                    tally.add(outcome.successful_calls(), outcome.failed_calls, None);
                    state.record_conclusion(id, &outcome.conclusion);
                    info!(
                        specialist = %id,
                        method = %outcome.conclusion.method,
                        rounds = outcome.rounds,
                        status = %state.status_line(),
                        "conclusion recorded"
                    );
                    advance(&mut state, TeamPhase::Coordinate, "conclusion recorded");
                }
            }
        }

        let mut summarizer = Summarizer::new(&self.summarizer, &self.config.summarizer_retry);
        if self.config.persist_report {
            if let Some(documents) = self.documents.as_deref() {
                summarizer = summarizer.persisting_to(documents);
            }
        }
        let summarized = summarizer
            .summarize(self.backend.as_ref(), &state, cancel)
            .await;
        let summary = match summarized {
            Ok(summary) => summary,
            Err(Cancelled) => return Err(self.fail(&mut state, SessionError::Cancelled)),
        };
        tally.add(
            summary.backend_successes,
            summary.backend_failures,
            summary.last_backend_error.as_ref(),
        );
        if summary.method == SummaryMethod::Fallback && tally.successes == 0 {
            let err = tally.unavailable();
            return Err(self.fail(&mut state, err));
        }

        advance(&mut state, TeamPhase::End, "report ready");
        info!(
            session_id = %state.session_id,
            messages = state.message_count,
            cycles = cycle,
            summary = %summary.method,
            backend_failures = tally.failures,
            "council session finished"
        );

        Ok(SessionOutcome {
            report: summary.report,
            summary_method: summary.method,
            report_persisted: summary.persisted,
            state,
            decisions,
            backend_successes: tally.successes,
            backend_failures: tally.failures,
        })
    }

    /// Apply the self-continue bound and route unknown specialist ids.
    fn settle(
        &self,
        decision: Decision,
        provenance: Provenance,
        state: &TeamState,
        self_continues: u32,
    ) -> (Decision, Provenance) {
        let (decision, provenance) = match decision.target {
            Target::ContinueSelf if self_continues >= self.config.max_self_continues => {
                warn!(self_continues, "self-continue limit reached, applying fallback");
                (
                    fallback_decision(&state.standing(), &state.focus_terms),
                    Provenance::SelfContinueLimit,
                )
            }
            _ => (decision, provenance),
        };

        let Target::Specialist(requested) = &decision.target else {
            return (decision, provenance);
        };
        if let Some(id) = self.resolve_specialist(requested) {
            let id = id.to_string();
            return (
                Decision {
                    target: Target::Specialist(id),
                    ..decision
                },
                provenance,
            );
        }

        let requested = requested.clone();
        match state.least_contributed() {
            Some(substitute) => {
                warn!(
                    requested = %requested,
                    substitute,
                    "unknown specialist, routing to least-contributed"
                );
                let instructions = if decision.instructions.is_empty() {
                    FALLBACK_INSTRUCTIONS.to_string()
                } else {
                    decision.instructions.clone()
                };
                (
                    Decision {
                        target: Target::Specialist(substitute.to_string()),
                        instructions,
                        ..decision
                    },
                    Provenance::Substituted { requested },
                )
            }
            None => (
                Decision::summarize("No specialists available."),
                Provenance::Substituted { requested },
            ),
        }
    }

    /// Exact id, then ASCII case-insensitive.
    fn resolve_specialist(&self, requested: &str) -> Option<&str> {
        let requested = requested.trim();
        self.specialists()
            .find(|s| s.id == requested)
            .or_else(|| {
                self.specialists()
                    .find(|s| s.id.eq_ignore_ascii_case(requested))
            })
            .map(|s| s.id.as_str())
    }

    async fn dispatch(
        &self,
        roles: &SpecialistRoles,
        decision: &Decision,
        state: &TeamState,
        cancel: &CancellationToken,
    ) -> Result<DeliberationOutcome, Cancelled> {
        let knowledge = self
            .seed_knowledge(&roles.specialist, &decision.focus_terms, cancel)
            .await?;
        let seed = DeliberationSeed {
            request: state.request.clone(),
            instructions: decision.instructions.clone(),
            focus_terms: decision.focus_terms.clone(),
            team_context: state.team_context(),
            knowledge,
        };

        let mut deliberation = Deliberation::new(
            roles.specialist.id.clone(),
            roles.generator.clone(),
            roles.synthesizer.clone(),
            self.signal.clone(),
            self.config.max_rounds_per_specialist,
        );
        if let Some(reporter) = &roles.reporter {
            deliberation = deliberation.with_reporter(reporter.clone());
        }
        if !self.tools.available().is_empty() {
            deliberation =
                deliberation.with_tools(self.tools.clone(), self.config.max_tool_calls_per_turn);
        }
        deliberation.run(self.backend.as_ref(), &seed, cancel).await
    }

    /// Query the knowledge store with focus terms plus standing keywords.
    async fn seed_knowledge(
        &self,
        specialist: &Specialist,
        focus_terms: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, Cancelled> {
        let Some(store) = &self.knowledge else {
            return Ok(Vec::new());
        };
        let mut seen = HashSet::new();
        let keywords: Vec<String> = focus_terms
            .iter()
            .chain(&specialist.keywords)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
            .collect();
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            result = store.retrieve(&keywords, self.config.knowledge_snippets) => result,
        };
        match result {
            Ok(mut snippets) => {
                snippets.truncate(self.config.knowledge_snippets);
                debug!(specialist = %specialist.id, snippets = snippets.len(), "knowledge seeded");
                Ok(snippets)
            }
            Err(e) => {
                warn!(specialist = %specialist.id, error = %e, "knowledge lookup failed, seeding without it");
                Ok(Vec::new())
            }
        }
    }

    fn fail(&self, state: &mut TeamState, err: SessionError) -> SessionError {
        advance(state, TeamPhase::Failed, &err.to_string());
        error!(
            session_id = %state.session_id,
            status = %state.status_line(),
            error = %err,
            "council session failed"
        );
        err
    }
}

fn advance(state: &mut TeamState, to: TeamPhase, reason: &str) {
    if let Err(e) = state.transition(to, reason) {
        warn!(error = %e, "unexpected team transition");
    }
}
