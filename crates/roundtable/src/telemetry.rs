//! Tracing setup and session records.
//!
//! A [`SessionRecord`] is a serializable snapshot of one council session.
//! Two sinks:
//! - a transcript file: the complete record, overwritten each run
//! - a history file: append-only JSONL, one record per session

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use coordination::team::{
    DecisionRecord, LogEntry, SpecialistConclusion, SummaryMethod, TeamPhase, TeamTransition,
};
use coordination::SessionOutcome;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over the `info` default.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub request: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: i64,
    pub final_phase: TeamPhase,
    pub message_count: u32,
    pub message_budget: u32,
    /// Sorted by specialist id.
    pub contributions: BTreeMap<String, u32>,
    pub conclusions: Vec<SpecialistConclusion>,
    pub global_log: Vec<LogEntry>,
    pub transitions: Vec<TeamTransition>,
    pub decisions: Vec<DecisionRecord>,
    pub summary_method: SummaryMethod,
    pub report_persisted: bool,
    pub report: String,
    pub backend_successes: u32,
    pub backend_failures: u32,
}

impl SessionRecord {
    pub fn from_outcome(outcome: &SessionOutcome) -> Self {
        let state = &outcome.state;
        let finished_at = state
            .transitions
            .last()
            .map(|t| t.timestamp)
            .unwrap_or_else(Utc::now);
        Self {
            session_id: state.session_id.clone(),
            request: state.request.clone(),
            started_at: state.started_at,
            finished_at,
            elapsed_ms: (finished_at - state.started_at).num_milliseconds(),
            final_phase: state.phase,
            message_count: state.message_count,
            message_budget: state.message_budget,
            contributions: state
                .contributions
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            conclusions: state.conclusions.clone(),
            global_log: state.global_log.clone(),
            transitions: state.transitions.clone(),
            decisions: outcome.decisions.clone(),
            summary_method: outcome.summary_method,
            report_persisted: outcome.report_persisted,
            report: outcome.report.clone(),
            backend_successes: outcome.backend_successes,
            backend_failures: outcome.backend_failures,
        }
    }

    /// One-line human summary for logs and the CLI footer.
    pub fn summary_line(&self) -> String {
        let consulted = self
            .contributions
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(id, n)| format!("{id}×{n}"))
            .collect::<Vec<_>>();
        format!(
            "session {} | {} of {} messages | consulted: {} | summary: {:?} | calls ok/failed: {}/{}",
            self.session_id,
            self.message_count,
            self.message_budget,
            if consulted.is_empty() {
                "none".to_string()
            } else {
                consulted.join(", ")
            },
            self.summary_method,
            self.backend_successes,
            self.backend_failures,
        )
    }
}

/// Write the full record as pretty JSON to `path`.
pub fn write_session_record(record: &SessionRecord, path: &Path) {
    match serde_json::to_string_pretty(record) {
        Ok(json) => match std::fs::write(path, json) {
            Ok(()) => info!(path = %path.display(), "Wrote session transcript"),
            Err(e) => warn!("Failed to write session transcript: {e}"),
        },
        Err(e) => warn!("Failed to serialize session transcript: {e}"),
    }
}

/// Append the record as one JSON line to `path`.
pub fn append_session_record(record: &SessionRecord, path: &Path) {
    match serde_json::to_string(record) {
        Ok(json) => {
            use std::io::Write;
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append session history: {e}");
                    } else {
                        info!(path = %path.display(), "Appended session history");
                    }
                }
                Err(e) => warn!("Failed to open session history: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize session history: {e}"),
    }
}

/// Read every record from a JSONL history file. Malformed lines are skipped.
pub fn read_history(path: &Path) -> std::io::Result<Vec<SessionRecord>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping malformed history line: {e}");
                None
            }
        })
        .collect())
}
