//! Coordinator briefing and the backend-facing decision source.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::state::TeamState;
use crate::backend::{generate_with_cancel, ChatMessage, GenerationBackend, GenerationRequest};
use crate::decision::DecisionSource;
use crate::errors::BackendError;
use crate::roles::{RolePrompt, Specialist};
use crate::tools::{ToolBox, ToolCall};

/// Render what the coordinator sees before each decision.
pub fn render_briefing(
    state: &TeamState,
    specialists: &[&Specialist],
    window: usize,
    self_continues: u32,
) -> String {
    let mut out = format!("Original request:\n{}\n", state.request.trim());

    out.push_str("\nSpecialists:\n");
    for specialist in specialists {
        let standing = match state.contribution(&specialist.id) {
            0 => "Not consulted yet".to_string(),
            n => format!("Contributed {n} time(s)"),
        };
        out.push_str(&format!(
            "- {}: {} ({standing})\n",
            specialist.id, specialist.description
        ));
    }

    if !state.focus_terms.is_empty() {
        out.push_str(&format!(
            "\nCurrent focus terms: {}\n",
            state.focus_terms.join(", ")
        ));
    }

    let recent = state.recent_log(window);
    if recent.is_empty() {
        out.push_str("\nNo discussion yet.\n");
    } else {
        out.push_str(&format!(
            "\nRecent discussion (last {} of {} entries):\n",
            recent.len(),
            state.global_log.len()
        ));
        for entry in recent {
            out.push_str(&entry.render());
            out.push('\n');
        }
    }

    out.push_str(&format!(
        "\nMessages remaining: {} of {}\n",
        state.remaining_budget(),
        state.message_budget
    ));
    if self_continues > 0 {
        out.push_str(&format!(
            "You have continued without dispatching {self_continues} time(s) in a row.\n"
        ));
    }
    out.push_str("\nReply with your decision.");
    out
}

/// One coordinator decision cycle against the generation backend.
pub struct CoordinatorExchange<'a> {
    backend: &'a dyn GenerationBackend,
    prompt: &'a RolePrompt,
    tools: &'a ToolBox,
    briefing: String,
    cancel: &'a CancellationToken,
}

impl<'a> CoordinatorExchange<'a> {
    pub fn new(
        backend: &'a dyn GenerationBackend,
        prompt: &'a RolePrompt,
        tools: &'a ToolBox,
        briefing: String,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            backend,
            prompt,
            tools,
            briefing,
            cancel,
        }
    }
}

#[async_trait]
impl<'a> DecisionSource for CoordinatorExchange<'a> {
    async fn request(&mut self, follow_ups: &[ChatMessage]) -> Result<String, BackendError> {
        let mut messages = Vec::with_capacity(follow_ups.len() + 1);
        messages.push(ChatMessage::user(self.briefing.clone()));
        messages.extend_from_slice(follow_ups);
        let request = GenerationRequest {
            label: self.prompt.label.clone(),
            instructions: self.prompt.instructions.clone(),
            messages,
            sampling: self.prompt.sampling,
        };
        generate_with_cancel(self.backend, request, self.cancel).await
    }

    async fn lookup(&mut self, call: &ToolCall) -> String {
        self.tools.run(call, &self.prompt.tools).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::replay::ReplayBackend;
    use crate::decision::Decision;
    use crate::deliberation::{Conclusion, ExtractionMethod, SignalParser};
    use crate::roles::{RoleKind, RoleTemplate, RoleTraits};

    fn roster() -> Vec<Specialist> {
        vec![
            Specialist::new("security", "threat analysis"),
            Specialist::new("compliance", "regulatory review"),
        ]
    }

    #[test]
    fn briefing_shows_standing_log_and_budget() {
        let specialists = roster();
        let refs: Vec<&Specialist> = specialists.iter().collect();
        let mut state = TeamState::new(
            "Roll out a VPN",
            vec!["security".into(), "compliance".into()],
            4,
        );
        state.record_decision(&Decision::specialist(
            "security",
            "assess",
            vec!["vpn".into()],
            "threats first",
        ));
        state.record_conclusion(
            "security",
            &Conclusion {
                text: "Enforce MFA.".into(),
                method: ExtractionMethod::MarkerFound,
            },
        );
        state.focus_terms = vec!["vpn".into()];

        let briefing = render_briefing(&state, &refs, 1, 1);
        assert!(briefing.starts_with("Original request:\nRoll out a VPN"));
        assert!(briefing.contains("- security: threat analysis (Contributed 1 time(s))"));
        assert!(briefing.contains("- compliance: regulatory review (Not consulted yet)"));
        assert!(briefing.contains("Current focus terms: vpn"));
        assert!(briefing.contains("last 1 of 2 entries"));
        assert!(briefing.contains("security: Enforce MFA."));
        assert!(!briefing.contains("threats first"));
        assert!(briefing.contains("Messages remaining: 3 of 4"));
        assert!(briefing.contains("1 time(s) in a row"));
    }

    #[tokio::test]
    async fn exchange_sends_briefing_then_follow_ups() {
        let backend = ReplayBackend::new().with_replies("coordinator", ["{}"]);
        let signal = SignalParser::default();
        let prompt = RoleTemplate {
            owner: None,
            subject: "security review",
            signal: &signal,
            default_temperature: 0.2,
            max_tokens: None,
            available_tools: &[],
        }
        .render(RoleKind::Coordinator, &RoleTraits::default());
        let tools = ToolBox::new(3);
        let cancel = CancellationToken::new();
        let mut exchange =
            CoordinatorExchange::new(&backend, &prompt, &tools, "BRIEF".into(), &cancel);

        let reply = exchange
            .request(&[ChatMessage::assistant("bad"), ChatMessage::user("fix it")])
            .await
            .unwrap();
        assert_eq!(reply, "{}");

        let requests = backend.requests_for("coordinator");
        assert_eq!(requests.len(), 1);
        let contents: Vec<&str> = requests[0]
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["BRIEF", "bad", "fix it"]);
        assert_eq!(requests[0].sampling.temperature, 0.2);
    }

    #[tokio::test]
    async fn lookup_without_stores_reports_error_text() {
        let backend = ReplayBackend::new();
        let signal = SignalParser::default();
        let prompt = RoleTemplate {
            owner: None,
            subject: "review",
            signal: &signal,
            default_temperature: 0.2,
            max_tokens: None,
            available_tools: &[],
        }
        .render(RoleKind::Coordinator, &RoleTraits::default());
        let tools = ToolBox::new(3);
        let cancel = CancellationToken::new();
        let mut exchange =
            CoordinatorExchange::new(&backend, &prompt, &tools, String::new(), &cancel);

        let result = exchange
            .lookup(&ToolCall {
                tool: "list_sections".into(),
                args: serde_json::Value::Null,
            })
            .await;
        assert!(result.starts_with("Tool error [list_sections]"));
    }
}
