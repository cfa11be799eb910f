//! Final report from the specialists' conclusions.
//!
//! The summarizer reads the request, the global log and the per-specialist
//! conclusions. It performs no routing. Backend calls retry per
//! [`RetryPolicy`]; when every attempt fails the report is assembled
//! deterministically from the conclusions.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::TeamState;
use crate::backend::{
    generate_with_cancel, ChatMessage, DocumentStore, GenerationBackend, GenerationRequest,
};
use crate::config::RetryPolicy;
use crate::errors::{BackendError, Cancelled};
use crate::roles::RolePrompt;

/// Document section the report is persisted under.
pub const REPORT_SECTION: &str = "final_report";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMethod {
    Generated,
    /// Every summarizer attempt failed; conclusions were concatenated.
    Fallback,
}

impl std::fmt::Display for SummaryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generated => write!(f, "generated"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub report: String,
    pub method: SummaryMethod,
    pub attempts: u32,
    pub backend_successes: u32,
    pub backend_failures: u32,
    pub last_backend_error: Option<String>,
    pub persisted: bool,
}

/// Summarizer input: request, one section per specialist, then the log.
pub fn render_input(state: &TeamState) -> String {
    let mut out = format!("Original request:\n{}\n", state.request.trim());
    for (specialist, texts) in state.conclusions_by_specialist() {
        out.push_str(&format!("\n=== {specialist} Analysis ===\n"));
        out.push_str(&texts.join("\n\n"));
        out.push('\n');
    }
    out.push_str("\n=== Conversation Log ===\n");
    for entry in &state.global_log {
        out.push_str(&entry.render());
        out.push('\n');
    }
    out
}

/// Deterministic report used when the summarizer cannot be reached.
pub fn fallback_report(state: &TeamState) -> String {
    let mut out = format!("# Assessment\n\n## Request\n\n{}\n\n## Findings by Specialist\n", state.request.trim());
    let grouped = state.conclusions_by_specialist();
    if grouped.is_empty() {
        out.push_str("\nNo specialist conclusions were recorded.\n");
    }
    for (specialist, texts) in grouped {
        out.push_str(&format!("\n### {specialist}\n\n{}\n", texts.join("\n\n")));
    }
    out.push_str(
        "\n_The summarizer was unavailable; this report lists the specialists' conclusions as given._\n",
    );
    out
}

pub struct Summarizer<'a> {
    prompt: &'a RolePrompt,
    retry: &'a RetryPolicy,
    documents: Option<&'a dyn DocumentStore>,
}

impl<'a> Summarizer<'a> {
    pub fn new(prompt: &'a RolePrompt, retry: &'a RetryPolicy) -> Self {
        Self {
            prompt,
            retry,
            documents: None,
        }
    }

    /// Persist the report as [`REPORT_SECTION`] after it is produced.
    pub fn persisting_to(mut self, documents: &'a dyn DocumentStore) -> Self {
        self.documents = Some(documents);
        self
    }

    pub async fn summarize(
        &self,
        backend: &dyn GenerationBackend,
        state: &TeamState,
        cancel: &CancellationToken,
    ) -> Result<SummaryOutcome, Cancelled> {
        let input = render_input(state);
        let max_attempts = self.retry.attempts();
        let mut successes = 0;
        let mut failures = 0;
        let mut last_backend_error = None;
        let mut generated = None;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            attempts = attempt;
            let delay = self.retry.backoff_duration(attempt);
            if !delay.is_zero() {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "summarizer back-off");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let request = GenerationRequest {
                label: self.prompt.label.clone(),
                instructions: self.prompt.instructions.clone(),
                messages: vec![ChatMessage::user(input.clone())],
                sampling: self.prompt.sampling,
            };
            match generate_with_cancel(backend, request, cancel).await {
                Ok(text) if !text.trim().is_empty() => {
                    successes += 1;
                    generated = Some(text.trim().to_string());
                    break;
                }
                Ok(_) => {
                    successes += 1;
                    warn!(attempt, "summarizer returned an empty report");
                }
                Err(BackendError::Cancelled) => return Err(Cancelled),
                Err(e) => {
                    failures += 1;
                    let category = e.retry_category();
                    warn!(attempt, max_attempts, %category, error = %e, "summarizer call failed");
                    let retriable = category.is_retriable();
                    last_backend_error = Some(e.to_string());
                    if !retriable {
                        break;
                    }
                }
            }
        }

        let (report, method) = match generated {
            Some(report) => (report, SummaryMethod::Generated),
            None => {
                warn!(attempts, "summarizer exhausted, assembling report from conclusions");
                (fallback_report(state), SummaryMethod::Fallback)
            }
        };

        let persisted = match self.documents {
            Some(documents) => persist(documents, &report).await,
            None => false,
        };

        info!(%method, attempts, persisted, "report ready");
        Ok(SummaryOutcome {
            report,
            method,
            attempts,
            backend_successes: successes,
            backend_failures: failures,
            last_backend_error,
            persisted,
        })
    }
}

/// Store and merge the report. Failures are logged and ignored.
async fn persist(documents: &dyn DocumentStore, report: &str) -> bool {
    if let Err(e) = documents.create_section(REPORT_SECTION, report).await {
        warn!(error = %e, "could not store report section");
        return false;
    }
    match documents.merge_section(REPORT_SECTION).await {
        Ok(merged) => merged,
        Err(e) => {
            warn!(error = %e, "could not merge report section");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::backend::replay::ReplayBackend;
    use crate::decision::Decision;
    use crate::deliberation::{Conclusion, ExtractionMethod, SignalParser};
    use crate::roles::{RoleKind, RoleTemplate, RoleTraits};

    fn prompt() -> RolePrompt {
        let signal = SignalParser::default();
        RoleTemplate {
            owner: None,
            subject: "security review",
            signal: &signal,
            default_temperature: 0.3,
            max_tokens: None,
            available_tools: &[],
        }
        .render(RoleKind::Summarizer, &RoleTraits::default())
    }

    fn state() -> TeamState {
        let mut state = TeamState::new("Roll out a VPN", vec!["a".into(), "b".into()], 4);
        state.record_decision(&Decision::specialist("a", "go", vec!["vpn".into()], "start"));
        for (id, text) in [("a", "A finding"), ("b", "B finding")] {
            state.record_conclusion(
                id,
                &Conclusion {
                    text: text.into(),
                    method: ExtractionMethod::MarkerFound,
                },
            );
        }
        state
    }

    #[derive(Default)]
    struct RecordingDocs {
        calls: Mutex<Vec<String>>,
        fail_create: bool,
    }

    #[async_trait]
    impl DocumentStore for RecordingDocs {
        async fn create_section(&self, name: &str, content: &str) -> anyhow::Result<()> {
            if self.fail_create {
                anyhow::bail!("disk full");
            }
            self.calls
                .lock()
                .unwrap()
                .push(format!("create {name} {}", content.len()));
            Ok(())
        }
        async fn list_sections(&self) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn read_section(&self, name: &str) -> anyhow::Result<String> {
            anyhow::bail!("no section {name}")
        }
        async fn merge_section(&self, name: &str) -> anyhow::Result<bool> {
            self.calls.lock().unwrap().push(format!("merge {name}"));
            Ok(true)
        }
    }

    #[test]
    fn input_has_sections_and_log() {
        let input = render_input(&state());
        assert!(input.contains("=== a Analysis ===\nA finding"));
        assert!(input.contains("=== b Analysis ===\nB finding"));
        assert!(input.contains("=== Conversation Log ===\ncoordinator: Decision: a"));
    }

    #[test]
    fn fallback_report_lists_conclusions() {
        let report = fallback_report(&state());
        assert!(report.contains("### a\n\nA finding"));
        assert!(report.contains("### b\n\nB finding"));

        let empty = TeamState::new("x", vec!["a".into()], 1);
        assert!(fallback_report(&empty).contains("No specialist conclusions"));
    }

    #[tokio::test]
    async fn generated_report_is_trimmed() {
        let backend = ReplayBackend::new().with_replies("summarizer", ["  # Report\nAll good.  "]);
        let prompt = prompt();
        let retry = RetryPolicy::default();
        let outcome = Summarizer::new(&prompt, &retry)
            .summarize(&backend, &state(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.report, "# Report\nAll good.");
        assert_eq!(outcome.method, SummaryMethod::Generated);
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.persisted);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_falls_back() {
        let backend = ReplayBackend::new()
            .with_failure("summarizer", "boom")
            .with_failure("summarizer", "boom")
            .with_failure("summarizer", "boom");
        let prompt = prompt();
        let retry = RetryPolicy::default();
        let outcome = Summarizer::new(&prompt, &retry)
            .summarize(&backend, &state(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.method, SummaryMethod::Fallback);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.backend_failures, 3);
        assert_eq!(outcome.backend_successes, 0);
        assert!(outcome.report.contains("A finding"));
        assert_eq!(backend.requests_for("summarizer").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_second_attempt() {
        let backend = ReplayBackend::new()
            .with_failure("summarizer", "timeout")
            .with_replies("summarizer", ["final"]);
        let prompt = prompt();
        let retry = RetryPolicy::default();
        let outcome = Summarizer::new(&prompt, &retry)
            .summarize(&backend, &state(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.report, "final");
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.backend_failures, 1);
    }

    #[tokio::test]
    async fn persists_report_and_ignores_store_failure() {
        let prompt = prompt();
        let retry = RetryPolicy::default();

        let docs = RecordingDocs::default();
        let backend = ReplayBackend::new().with_replies("summarizer", ["report"]);
        let outcome = Summarizer::new(&prompt, &retry)
            .persisting_to(&docs)
            .summarize(&backend, &state(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.persisted);
        assert_eq!(
            *docs.calls.lock().unwrap(),
            vec!["create final_report 6".to_string(), "merge final_report".to_string()]
        );

        let broken = RecordingDocs {
            fail_create: true,
            ..Default::default()
        };
        let backend = ReplayBackend::new().with_replies("summarizer", ["report"]);
        let outcome = Summarizer::new(&prompt, &retry)
            .persisting_to(&broken)
            .summarize(&backend, &state(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.persisted);
        assert_eq!(outcome.report, "report");
    }

    #[tokio::test]
    async fn cancelled_before_call() {
        let backend = ReplayBackend::new().with_replies("summarizer", ["never"]);
        let prompt = prompt();
        let retry = RetryPolicy::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = Summarizer::new(&prompt, &retry)
            .summarize(&backend, &state(), &cancel)
            .await;
        assert!(matches!(result, Err(Cancelled)));
        assert_eq!(backend.call_count(), 0);
    }
}
