//! Council configuration: bounds, marker, sampling, retry policy.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (`ROUNDTABLE_*`, see [`CouncilConfig::apply_overrides`])
//! 2. Values deserialized by the embedding application (the `[council]` table)
//! 3. Built-in defaults

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default canonical termination marker.
pub const DEFAULT_MARKER: &str = "CONCLUDE:";

const ENV_MAX_ROUNDS: &str = "ROUNDTABLE_MAX_ROUNDS";
const ENV_MESSAGE_BUDGET: &str = "ROUNDTABLE_MESSAGE_BUDGET";
const ENV_MARKER: &str = "ROUNDTABLE_MARKER";
const ENV_DECISION_RETRIES: &str = "ROUNDTABLE_DECISION_RETRIES";
const ENV_POLISH: &str = "ROUNDTABLE_POLISH_CONCLUSIONS";

/// Retry policy for transient failures of hub calls (summarizer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before the second attempt in milliseconds.
    pub initial_backoff_ms: u64,
    /// Multiplier applied per further attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay.
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay to wait before `attempt` (1-indexed). The first attempt never waits.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        if attempt <= 1 {
            return 0;
        }
        let delay =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 2);
        (delay as u64).min(self.max_backoff_ms)
    }

    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms(attempt))
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    /// 3 attempts, 500ms initial back-off, 2x multiplier, 5s cap.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 5_000,
        }
    }
}

/// Everything a council session needs besides its roster and collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    /// Generator turns per deliberation before a forced summary.
    pub max_rounds_per_specialist: u32,
    /// Specialist conclusions allowed before summarize is forced.
    pub message_budget: u32,
    /// Canonical termination marker.
    pub marker: String,
    /// Coordinator attempts per decision before the fallback applies.
    pub decision_retries: u32,
    /// Global log entries shown to the coordinator.
    pub recent_log_window: usize,
    /// Consecutive `continue_self` decisions tolerated.
    pub max_self_continues: u32,
    /// Tool calls executed per role turn.
    pub max_tool_calls_per_turn: usize,
    /// Knowledge snippets seeded into a deliberation.
    pub knowledge_snippets: usize,
    /// Rewrite each conclusion in the specialist's own voice.
    pub polish_conclusions: bool,
    /// Store the final report through the document collaborator.
    pub persist_report: bool,
    pub generator_temperature: f64,
    pub synthesizer_temperature: f64,
    pub coordinator_temperature: f64,
    pub summarizer_temperature: f64,
    /// Per-call token cap passed to the backend, if any.
    pub max_tokens: Option<u64>,
    pub summarizer_retry: RetryPolicy,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            max_rounds_per_specialist: 4,
            message_budget: 15,
            marker: DEFAULT_MARKER.to_string(),
            decision_retries: 3,
            recent_log_window: 10,
            max_self_continues: 2,
            max_tool_calls_per_turn: 3,
            knowledge_snippets: 3,
            polish_conclusions: false,
            persist_report: false,
            generator_temperature: 0.8,
            synthesizer_temperature: 0.4,
            coordinator_temperature: 0.2,
            summarizer_temperature: 0.3,
            max_tokens: None,
            summarizer_retry: RetryPolicy::default(),
        }
    }
}

impl CouncilConfig {
    /// Apply `ROUNDTABLE_*` overrides from `lookup`. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_MAX_ROUNDS).and_then(|v| v.trim().parse().ok()) {
            self.max_rounds_per_specialist = v;
        }
        if let Some(v) = lookup(ENV_MESSAGE_BUDGET).and_then(|v| v.trim().parse().ok()) {
            self.message_budget = v;
        }
        if let Some(v) = lookup(ENV_MARKER).filter(|v| !v.trim().is_empty()) {
            self.marker = v;
        }
        if let Some(v) = lookup(ENV_DECISION_RETRIES).and_then(|v| v.trim().parse().ok()) {
            self.decision_retries = v;
        }
        if let Some(v) = lookup(ENV_POLISH) {
            self.polish_conclusions = matches!(v.trim(), "1" | "true" | "yes");
        }
    }

    /// Hard cap on coordinator cycles, counting self-continues.
    pub fn cycle_cap(&self) -> u32 {
        self.message_budget
            .saturating_mul(2)
            .saturating_add(self.max_self_continues)
            .saturating_add(1)
    }

    /// Validate the config; return an error string if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_rounds_per_specialist == 0 {
            return Err("max_rounds_per_specialist must be > 0".to_string());
        }
        if self.decision_retries == 0 {
            return Err("decision_retries must be > 0".to_string());
        }
        if self.marker.trim().is_empty() {
            return Err("marker must not be empty".to_string());
        }
        for (name, value) in [
            ("generator_temperature", self.generator_temperature),
            ("synthesizer_temperature", self.synthesizer_temperature),
            ("coordinator_temperature", self.coordinator_temperature),
            ("summarizer_temperature", self.summarizer_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(format!("{name} must be in [0, 2], got {value}"));
            }
        }
        if self.summarizer_retry.backoff_multiplier < 1.0 {
            return Err(format!(
                "summarizer_retry.backoff_multiplier must be >= 1, got {}",
                self.summarizer_retry.backoff_multiplier
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_validate() {
        let config = CouncilConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.marker, "CONCLUDE:");
        assert_eq!(config.decision_retries, 3);
        assert!(!config.polish_conclusions);
    }

    #[test]
    fn zero_rounds_rejected() {
        let config = CouncilConfig {
            max_rounds_per_specialist: 0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("max_rounds"));
    }

    #[test]
    fn blank_marker_rejected() {
        let config = CouncilConfig {
            marker: "  ".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_temperature_rejected() {
        let config = CouncilConfig {
            generator_temperature: 3.5,
            ..Default::default()
        };
        assert!(config
            .validate()
            .unwrap_err()
            .contains("generator_temperature"));
    }

    #[test]
    fn overrides_apply_and_ignore_garbage() {
        let vars: HashMap<&str, &str> = [
            ("ROUNDTABLE_MAX_ROUNDS", "2"),
            ("ROUNDTABLE_MESSAGE_BUDGET", "not-a-number"),
            ("ROUNDTABLE_MARKER", "FINAL:"),
            ("ROUNDTABLE_POLISH_CONCLUSIONS", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = CouncilConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.max_rounds_per_specialist, 2);
        assert_eq!(config.message_budget, 15);
        assert_eq!(config.marker, "FINAL:");
        assert!(config.polish_conclusions);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_ms(1), 0);
        assert_eq!(policy.backoff_ms(2), 500);
        assert_eq!(policy.backoff_ms(3), 1_000);
        assert_eq!(policy.backoff_ms(10), 5_000);
        let single = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(single.attempts(), 1);
    }

    #[test]
    fn cycle_cap_covers_budget_and_self_continues() {
        let config = CouncilConfig {
            message_budget: 4,
            max_self_continues: 2,
            ..Default::default()
        };
        assert_eq!(config.cycle_cap(), 11);
    }
}
