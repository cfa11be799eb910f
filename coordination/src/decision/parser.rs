//! Decision parser: embedded-object extraction, bounded retry, fallback.
//!
//! Each coordinator call is one attempt. A reply is parsed from the span
//! between the first `{` and the last `}`, then from the whole trimmed text.
//! Lookup requests are answered once and the coordinator is re-prompted.
//! Unusable replies get a corrective re-prompt. When attempts run out the
//! deterministic fallback applies. Only cancellation escapes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Decision, RawDecision};
use crate::backend::ChatMessage;
use crate::errors::{BackendError, Cancelled, ParseError};
use crate::tools::ToolCall;

/// Instructions attached to a fallback dispatch.
pub const FALLBACK_INSTRUCTIONS: &str =
    "Provide your analysis of the original request from your domain's perspective, \
     building on what the team has said so far.";

/// A structurally valid coordinator reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedReply {
    Decision(Decision),
    /// The coordinator wants lookups answered before deciding.
    Lookups {
        reasoning: String,
        calls: Vec<ToolCall>,
    },
}

/// Where coordinator replies come from.
#[async_trait]
pub trait DecisionSource: Send {
    /// Ask for a decision. `follow_ups` are appended after the briefing.
    async fn request(&mut self, follow_ups: &[ChatMessage]) -> Result<String, BackendError>;

    /// Execute one lookup and return its rendered result.
    async fn lookup(&mut self, call: &ToolCall) -> String;
}

/// How the final decision was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DecisionOrigin {
    Parsed { attempt: u32 },
    Fallback { reason: String },
}

/// Decision plus the accounting of how it was reached.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub decision: Decision,
    pub origin: DecisionOrigin,
    pub attempts: u32,
    pub backend_successes: u32,
    pub backend_failures: u32,
    pub last_backend_error: Option<String>,
}

impl Resolution {
    /// Every attempt failed at the backend.
    pub fn backend_unreachable(&self) -> bool {
        self.backend_successes == 0 && self.backend_failures > 0
    }
}

/// Parser with a fixed retry bound.
#[derive(Debug, Clone)]
pub struct DecisionParser {
    max_attempts: u32,
    max_lookups: usize,
}

impl Default for DecisionParser {
    fn default() -> Self {
        Self::new(3)
    }
}

impl DecisionParser {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            max_lookups: 3,
        }
    }

    pub fn with_max_lookups(mut self, max_lookups: usize) -> Self {
        self.max_lookups = max_lookups;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Parse one reply without retrying.
    pub fn parse(&self, text: &str) -> Result<ParsedReply, ParseError> {
        let trimmed = text.trim();
        if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
            if start < end {
                if let Ok(raw) = serde_json::from_str::<RawDecision>(&trimmed[start..=end]) {
                    return raw.into_reply();
                }
            }
        }
        match serde_json::from_str::<RawDecision>(trimmed) {
            Ok(raw) => raw.into_reply(),
            Err(e) => Err(ParseError::NoObject(e.to_string())),
        }
    }

    /// Obtain a decision from `source`, falling back once attempts run out.
    ///
    /// `standing` lists `(specialist, contributions)` in roster order.
    pub async fn resolve(
        &self,
        source: &mut dyn DecisionSource,
        standing: &[(String, u32)],
        focus_terms: &[String],
    ) -> Result<Resolution, Cancelled> {
        let mut follow_ups: Vec<ChatMessage> = Vec::new();
        let mut looked_up = false;
        let mut successes = 0;
        let mut failures = 0;
        let mut last_backend_error = None;
        let mut last_parse_error = None;

        for attempt in 1..=self.max_attempts {
            let reply = match source.request(&follow_ups).await {
                Ok(reply) => {
                    successes += 1;
                    reply
                }
                Err(BackendError::Cancelled) => return Err(Cancelled),
                Err(e) => {
                    failures += 1;
                    warn!(attempt, error = %e, "coordinator call failed");
                    last_backend_error = Some(e.to_string());
                    continue;
                }
            };

            let parse_error = match self.parse(&reply) {
                Ok(ParsedReply::Decision(decision)) => {
                    debug!(attempt, target = %decision.target, "decision parsed");
                    return Ok(Resolution {
                        decision,
                        origin: DecisionOrigin::Parsed { attempt },
                        attempts: attempt,
                        backend_successes: successes,
                        backend_failures: failures,
                        last_backend_error,
                    });
                }
                Ok(ParsedReply::Lookups { calls, .. }) if !looked_up => {
                    looked_up = true;
                    let mut results = Vec::new();
                    for call in calls.iter().take(self.max_lookups) {
                        results.push(source.lookup(call).await);
                    }
                    debug!(attempt, lookups = results.len(), "coordinator lookups answered");
                    follow_ups.push(ChatMessage::assistant(reply));
                    follow_ups.push(ChatMessage::user(format!(
                        "Lookup results:\n\n{}\n\nNow reply with your final decision as a single JSON object.",
                        results.join("\n\n")
                    )));
                    continue;
                }
                Ok(ParsedReply::Lookups { .. }) => ParseError::RepeatedLookup,
                Err(e) => e,
            };

            warn!(attempt, error = %parse_error, "coordinator reply unusable");
            follow_ups.push(ChatMessage::assistant(reply));
            follow_ups.push(ChatMessage::user(format!(
                "Your previous reply could not be used ({parse_error}). \
                 Reply with only the JSON decision object."
            )));
            last_parse_error = Some(parse_error);
        }

        let reason = match (&last_parse_error, &last_backend_error) {
            (Some(parse), _) => format!("no usable decision: {parse}"),
            (None, Some(backend)) => format!("coordinator unavailable: {backend}"),
            (None, None) => "no usable decision".to_string(),
        };
        let decision = fallback_decision(standing, focus_terms);
        warn!(target = %decision.target, %reason, "applying fallback decision");
        Ok(Resolution {
            decision,
            origin: DecisionOrigin::Fallback { reason },
            attempts: self.max_attempts,
            backend_successes: successes,
            backend_failures: failures,
            last_backend_error,
        })
    }
}

/// Deterministic fallback: the least-contributed specialist while anyone
/// lags behind or has never spoken, otherwise summarize. Without current
/// focus terms the chosen specialist's id is the focus.
pub fn fallback_decision(standing: &[(String, u32)], focus_terms: &[String]) -> Decision {
    let (Some(min), Some(max)) = (
        standing.iter().map(|(_, n)| *n).min(),
        standing.iter().map(|(_, n)| *n).max(),
    ) else {
        return Decision::summarize("Fallback: no specialists available.");
    };

    if min == 0 || min < max {
        if let Some((id, count)) = standing.iter().find(|(_, n)| *n == min) {
            let focus = if focus_terms.is_empty() {
                vec![id.clone()]
            } else {
                focus_terms.to_vec()
            };
            return Decision::specialist(
                id.clone(),
                FALLBACK_INSTRUCTIONS,
                focus,
                format!("Fallback: {id} has contributed least ({count})."),
            );
        }
    }
    Decision::summarize("Fallback: every specialist has contributed.")
}
