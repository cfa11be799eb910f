//! Team-level session state: phases, the global log and contribution counts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::Decision;
use crate::deliberation::{Conclusion, ExtractionMethod};

/// Phase of the hub-and-spoke session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamPhase {
    /// Asking the coordinator for the next step.
    Coordinate,
    /// A specialist deliberation is running.
    Dispatch,
    /// Building the final report.
    Summarize,
    End,
    /// Cancelled or no backend reachable.
    Failed,
}

impl TeamPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::End | Self::Failed)
    }

    /// Valid transitions from this phase. `Coordinate → Coordinate` is a self-continue.
    pub fn valid_transitions(self) -> &'static [TeamPhase] {
        match self {
            Self::Coordinate => &[Self::Coordinate, Self::Dispatch, Self::Summarize, Self::Failed],
            Self::Dispatch => &[Self::Coordinate, Self::Failed],
            Self::Summarize => &[Self::End, Self::Failed],
            Self::End | Self::Failed => &[],
        }
    }
}

impl std::fmt::Display for TeamPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coordinate => write!(f, "coordinate"),
            Self::Dispatch => write!(f, "dispatch"),
            Self::Summarize => write!(f, "summarize"),
            Self::End => write!(f, "end"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamTransition {
    pub from: TeamPhase,
    pub to: TeamPhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamTransitionError {
    pub from: TeamPhase,
    pub to: TeamPhase,
}

impl std::fmt::Display for TeamTransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid team transition {} → {} (allowed: {:?})",
            self.from,
            self.to,
            self.from.valid_transitions()
        )
    }
}

impl std::error::Error for TeamTransitionError {}

/// What a global log entry records. Internal deliberation turns never appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    CoordinatorReasoning,
    Conclusion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub speaker: String,
    pub kind: LogKind,
    pub text: String,
}

impl LogEntry {
    pub fn render(&self) -> String {
        format!("{}: {}", self.speaker, self.text)
    }
}

/// One specialist conclusion, in dispatch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialistConclusion {
    pub specialist: String,
    pub text: String,
    pub method: ExtractionMethod,
}

/// Speaker name used for coordinator entries in the global log.
pub const COORDINATOR_SPEAKER: &str = "coordinator";

/// State of one council session. The council is its only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamState {
    pub session_id: String,
    pub request: String,
    /// Specialist ids in roster order.
    pub roster: Vec<String>,
    pub global_log: Vec<LogEntry>,
    pub contributions: HashMap<String, u32>,
    /// Specialist conclusions appended so far.
    pub message_count: u32,
    pub message_budget: u32,
    /// Focus terms of the latest dispatch.
    pub focus_terms: Vec<String>,
    pub concluded: bool,
    pub conclusions: Vec<SpecialistConclusion>,
    pub phase: TeamPhase,
    pub transitions: Vec<TeamTransition>,
    pub started_at: DateTime<Utc>,
}

impl TeamState {
    pub fn new(request: impl Into<String>, roster: Vec<String>, message_budget: u32) -> Self {
        let contributions = roster.iter().map(|id| (id.clone(), 0)).collect();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            request: request.into(),
            roster,
            global_log: Vec::new(),
            contributions,
            message_count: 0,
            message_budget,
            focus_terms: Vec::new(),
            concluded: false,
            conclusions: Vec::new(),
            phase: TeamPhase::Coordinate,
            transitions: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn transition(&mut self, to: TeamPhase, reason: &str) -> Result<(), TeamTransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TeamTransitionError {
                from: self.phase,
                to,
            });
        }
        self.transitions.push(TeamTransition {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;
        if to == TeamPhase::End {
            self.concluded = true;
        }
        Ok(())
    }

    pub fn budget_exhausted(&self) -> bool {
        self.message_count >= self.message_budget
    }

    pub fn remaining_budget(&self) -> u32 {
        self.message_budget.saturating_sub(self.message_count)
    }

    pub fn contribution(&self, specialist: &str) -> u32 {
        self.contributions.get(specialist).copied().unwrap_or(0)
    }

    /// `(specialist, contributions)` in roster order.
    pub fn standing(&self) -> Vec<(String, u32)> {
        self.roster
            .iter()
            .map(|id| (id.clone(), self.contribution(id)))
            .collect()
    }

    /// Least-contributed specialist; roster order breaks ties.
    pub fn least_contributed(&self) -> Option<&str> {
        self.roster
            .iter()
            .min_by_key(|id| self.contribution(id))
            .map(String::as_str)
    }

    /// Record coordinator reasoning. Does not count against the budget.
    pub fn record_decision(&mut self, decision: &Decision) {
        self.global_log.push(LogEntry {
            speaker: COORDINATOR_SPEAKER.to_string(),
            kind: LogKind::CoordinatorReasoning,
            text: decision.log_line(),
        });
    }

    /// Append a specialist conclusion and count it.
    pub fn record_conclusion(&mut self, specialist: &str, conclusion: &Conclusion) {
        self.global_log.push(LogEntry {
            speaker: specialist.to_string(),
            kind: LogKind::Conclusion,
            text: conclusion.text.clone(),
        });
        self.conclusions.push(SpecialistConclusion {
            specialist: specialist.to_string(),
            text: conclusion.text.clone(),
            method: conclusion.method,
        });
        self.message_count += 1;
        *self.contributions.entry(specialist.to_string()).or_insert(0) += 1;
    }

    /// Filtered view handed to a specialist: every entry as `speaker: text`.
    pub fn team_context(&self) -> Vec<String> {
        self.global_log.iter().map(LogEntry::render).collect()
    }

    /// The last `window` global log entries.
    pub fn recent_log(&self, window: usize) -> &[LogEntry] {
        let start = self.global_log.len().saturating_sub(window);
        &self.global_log[start..]
    }

    /// Conclusions grouped per specialist, roster order first, then any others.
    pub fn conclusions_by_specialist(&self) -> Vec<(String, Vec<&str>)> {
        let mut grouped: Vec<(String, Vec<&str>)> = Vec::new();
        for c in &self.conclusions {
            match grouped.iter_mut().find(|(id, _)| *id == c.specialist) {
                Some((_, texts)) => texts.push(c.text.as_str()),
                None => grouped.push((c.specialist.clone(), vec![c.text.as_str()])),
            }
        }
        grouped.sort_by_key(|(id, _)| {
            self.roster
                .iter()
                .position(|r| r == id)
                .unwrap_or(usize::MAX)
        });
        grouped
    }

    pub fn status_line(&self) -> String {
        format!(
            "[{}] {}/{} messages | {} log entries",
            self.phase,
            self.message_count,
            self.message_budget,
            self.global_log.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> TeamState {
        TeamState::new("Review the VPN rollout", vec!["a".into(), "b".into()], 4)
    }

    fn conclusion(text: &str) -> Conclusion {
        Conclusion {
            text: text.into(),
            method: ExtractionMethod::MarkerFound,
        }
    }

    #[test]
    fn phase_table() {
        let mut s = state();
        assert!(s.transition(TeamPhase::Coordinate, "self continue").is_ok());
        assert!(s.transition(TeamPhase::Dispatch, "a").is_ok());
        assert!(s.transition(TeamPhase::Summarize, "skip").is_err());
        assert!(s.transition(TeamPhase::Coordinate, "back").is_ok());
        assert!(s.transition(TeamPhase::Summarize, "done").is_ok());
        assert!(s.transition(TeamPhase::End, "report").is_ok());
        assert!(s.concluded);
        assert!(s.transition(TeamPhase::Coordinate, "again").is_err());
        assert_eq!(s.transitions.len(), 5);
    }

    #[test]
    fn conclusions_count_but_reasoning_does_not() {
        let mut s = state();
        s.record_decision(&Decision::specialist("a", "go", vec!["vpn".into()], "start"));
        s.record_conclusion("a", &conclusion("A says yes"));
        assert_eq!(s.message_count, 1);
        assert_eq!(s.contribution("a"), 1);
        assert_eq!(s.contribution("b"), 0);
        assert_eq!(
            s.team_context(),
            vec![
                "coordinator: Decision: a | Reasoning: start".to_string(),
                "a: A says yes".to_string()
            ]
        );
    }

    #[test]
    fn least_contributed_breaks_ties_by_roster() {
        let mut s = state();
        assert_eq!(s.least_contributed(), Some("a"));
        s.record_conclusion("a", &conclusion("x"));
        assert_eq!(s.least_contributed(), Some("b"));
        assert_eq!(s.standing(), vec![("a".into(), 1), ("b".into(), 0)]);
    }

    #[test]
    fn budget_and_recent_window() {
        let mut s = state();
        for i in 0..4 {
            s.record_conclusion("a", &conclusion(&format!("c{i}")));
        }
        assert!(s.budget_exhausted());
        assert_eq!(s.remaining_budget(), 0);
        let recent = s.recent_log(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].text, "c3");
    }

    #[test]
    fn grouped_conclusions_follow_roster() {
        let mut s = state();
        s.record_conclusion("b", &conclusion("b1"));
        s.record_conclusion("a", &conclusion("a1"));
        s.record_conclusion("b", &conclusion("b2"));
        let grouped = s.conclusions_by_specialist();
        assert_eq!(grouped[0], ("a".to_string(), vec!["a1"]));
        assert_eq!(grouped[1], ("b".to_string(), vec!["b1", "b2"]));
    }
}
