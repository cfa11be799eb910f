//! Coordinator decisions and their wire form.

pub mod parser;

use serde::{Deserialize, Serialize};

use crate::errors::ParseError;
use crate::tools::ToolCall;

pub use parser::{
    fallback_decision, DecisionOrigin, DecisionParser, DecisionSource, ParsedReply, Resolution,
};

/// Where the coordinator sends control next.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Specialist(String),
    Summarize,
    End,
    ContinueSelf,
}

impl Target {
    /// Interpret a raw target string. Anything unrecognised names a specialist.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "summarize" | "summarise" | "summary" => Self::Summarize,
            "end" | "finish" | "done" | "terminate" => Self::End,
            "continue_self" | "continue" | "self" => Self::ContinueSelf,
            _ => Self::Specialist(raw.trim().to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Summarize | Self::End)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Specialist(id) => write!(f, "{}", id),
            Self::Summarize => write!(f, "summarize"),
            Self::End => write!(f, "end"),
            Self::ContinueSelf => write!(f, "continue_self"),
        }
    }
}

/// A validated coordinator decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub reasoning: String,
    pub target: Target,
    pub focus_terms: Vec<String>,
    pub instructions: String,
}

/// Focus term and instructions carried by constructed summarize decisions.
pub const SUMMARY_FOCUS: &str = "summary";
pub const SUMMARY_INSTRUCTIONS: &str = "Create the final summary.";

impl Decision {
    pub fn summarize(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            target: Target::Summarize,
            focus_terms: vec![SUMMARY_FOCUS.to_string()],
            instructions: SUMMARY_INSTRUCTIONS.to_string(),
        }
    }

    pub fn specialist(
        id: impl Into<String>,
        instructions: impl Into<String>,
        focus_terms: Vec<String>,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            reasoning: reasoning.into(),
            target: Target::Specialist(id.into()),
            focus_terms,
            instructions: instructions.into(),
        }
    }

    /// Global log line for this decision.
    pub fn log_line(&self) -> String {
        format!("Decision: {} | Reasoning: {}", self.target, self.reasoning.trim())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Terms {
    Many(Vec<String>),
    One(String),
}

impl Terms {
    fn into_vec(self) -> Vec<String> {
        let items = match self {
            Self::Many(items) => items,
            Self::One(joined) => joined.split(',').map(str::to_string).collect(),
        };
        items
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Decision as the coordinator writes it. Accepts `decision` for `target`
/// and `keywords` for `focus_terms`.
#[derive(Debug, Deserialize)]
pub(crate) struct RawDecision {
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default, alias = "decision", alias = "next")]
    target: Option<String>,
    #[serde(default, alias = "keywords")]
    focus_terms: Option<Terms>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default, alias = "tool_calls")]
    lookups: Vec<ToolCall>,
}

impl RawDecision {
    pub(crate) fn into_reply(self) -> Result<ParsedReply, ParseError> {
        let reasoning = self.reasoning.unwrap_or_default().trim().to_string();
        if !self.lookups.is_empty() {
            return Ok(ParsedReply::Lookups {
                reasoning,
                calls: self.lookups,
            });
        }

        let raw_target = self
            .target
            .filter(|t| !t.trim().is_empty())
            .ok_or(ParseError::MissingTarget)?;
        let target = Target::parse(&raw_target);
        let focus_terms = self.focus_terms.map(Terms::into_vec).unwrap_or_default();
        let instructions = self.instructions.unwrap_or_default().trim().to_string();

        // Everything but `continue_self` must say what to do and what to look at.
        if target != Target::ContinueSelf {
            if instructions.is_empty() {
                return Err(ParseError::MissingField {
                    target: target.to_string(),
                    field: "instructions",
                });
            }
            if focus_terms.is_empty() {
                return Err(ParseError::MissingField {
                    target: target.to_string(),
                    field: "focus_terms",
                });
            }
        }

        Ok(ParsedReply::Decision(Decision {
            reasoning,
            target,
            focus_terms,
            instructions,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(json: &str) -> Result<ParsedReply, ParseError> {
        serde_json::from_str::<RawDecision>(json).unwrap().into_reply()
    }

    #[test]
    fn target_keywords_are_case_insensitive() {
        assert_eq!(Target::parse("SUMMARIZE"), Target::Summarize);
        assert_eq!(Target::parse(" End "), Target::End);
        assert_eq!(Target::parse("continue-self"), Target::ContinueSelf);
        assert_eq!(
            Target::parse(" SecurityExpert "),
            Target::Specialist("SecurityExpert".into())
        );
    }

    #[test]
    fn aliases_and_comma_terms() {
        let parsed = reply(
            r#"{"reasoning": "start", "decision": "security", "keywords": "vpn, mfa", "instructions": "Assess"}"#,
        )
        .unwrap();
        match parsed {
            ParsedReply::Decision(d) => {
                assert_eq!(d.target, Target::Specialist("security".into()));
                assert_eq!(d.focus_terms, vec!["vpn", "mfa"]);
                assert_eq!(d.log_line(), "Decision: security | Reasoning: start");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn specialist_requires_instructions_and_terms() {
        let err = reply(r#"{"target": "security", "focus_terms": ["vpn"]}"#).unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingField {
                target: "security".into(),
                field: "instructions"
            }
        );
        let err = reply(r#"{"target": "security", "instructions": "go"}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingField { field: "focus_terms", .. }));
    }

    #[test]
    fn continue_self_needs_no_fields() {
        let parsed = reply(r#"{"decision": "continue_self", "reasoning": "think more"}"#).unwrap();
        match parsed {
            ParsedReply::Decision(d) => assert_eq!(d.target, Target::ContinueSelf),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn summarize_and_end_require_instructions_and_terms() {
        let err = reply(r#"{"decision": "summarize"}"#).unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingField {
                target: "summarize".into(),
                field: "instructions"
            }
        );
        let err = reply(r#"{"decision": "end", "instructions": "wrap up"}"#).unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingField {
                target: "end".into(),
                field: "focus_terms"
            }
        );
        let parsed = reply(
            r#"{"decision": "summarize", "keywords": ["summary"], "instructions": "Write it up"}"#,
        )
        .unwrap();
        assert!(matches!(parsed, ParsedReply::Decision(d) if d.target == Target::Summarize));
    }

    #[test]
    fn constructed_summarize_carries_defaults() {
        let d = Decision::summarize("done");
        assert_eq!(d.focus_terms, vec![SUMMARY_FOCUS]);
        assert_eq!(d.instructions, SUMMARY_INSTRUCTIONS);
    }

    #[test]
    fn missing_target_rejected() {
        assert_eq!(
            reply(r#"{"reasoning": "hmm"}"#).unwrap_err(),
            ParseError::MissingTarget
        );
    }

    #[test]
    fn lookups_take_precedence() {
        let parsed = reply(
            r#"{"reasoning": "need data", "decision": "security", "tool_calls": [{"tool": "list_sections"}]}"#,
        )
        .unwrap();
        match parsed {
            ParsedReply::Lookups { calls, reasoning } => {
                assert_eq!(calls.len(), 1);
                assert_eq!(reasoning, "need data");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
