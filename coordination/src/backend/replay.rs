//! Scripted generation backend for dry runs and tests.
//!
//! Replies are queued per role label. A label without its own queue falls
//! back to the queue named after its role suffix (`security.synthesizer` →
//! `synthesizer`), then to the default reply. Every request is recorded.
//!
//! ```json
//! {
//!   "default_reply": "CONCLUDE: nothing further",
//!   "replies": {
//!     "coordinator": ["{\"decision\": \"summarize\", \"reasoning\": \"done\", \"keywords\": [\"summary\"], \"instructions\": \"Wrap up\"}"],
//!     "security.generator": ["idea one", {"fail": "connection reset"}]
//!   }
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{BackendError, GenerationBackend, GenerationRequest};

/// One scripted step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplayStep {
    Reply(String),
    Fail { fail: String },
}

/// Serialized form of a replay script.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayScript {
    #[serde(default)]
    pub default_reply: Option<String>,
    #[serde(default)]
    pub replies: HashMap<String, Vec<ReplayStep>>,
}

/// Backend answering from per-label queues.
#[derive(Debug, Default)]
pub struct ReplayBackend {
    queues: Mutex<HashMap<String, VecDeque<ReplayStep>>>,
    default_reply: Option<String>,
    recorded: Mutex<Vec<GenerationRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ReplayBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_script(script: ReplayScript) -> Self {
        let queues = script
            .replies
            .into_iter()
            .map(|(label, steps)| (label, steps.into_iter().collect()))
            .collect();
        Self {
            queues: Mutex::new(queues),
            default_reply: script.default_reply,
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_script(serde_json::from_str(json)?))
    }

    /// Queue replies for `label`.
    pub fn with_replies<I, S>(self, label: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.queues)
            .entry(label.to_string())
            .or_default()
            .extend(replies.into_iter().map(|r| ReplayStep::Reply(r.into())));
        self
    }

    /// Queue a failure for `label`.
    pub fn with_failure(self, label: &str, message: &str) -> Self {
        lock(&self.queues)
            .entry(label.to_string())
            .or_default()
            .push_back(ReplayStep::Fail {
                fail: message.to_string(),
            });
        self
    }

    /// Reply used when no queue matches.
    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = Some(reply.into());
        self
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.recorded).clone()
    }

    /// Requests whose label equals `label` or ends with `.{label}`.
    pub fn requests_for(&self, label: &str) -> Vec<GenerationRequest> {
        let suffix = format!(".{label}");
        lock(&self.recorded)
            .iter()
            .filter(|r| r.label == label || r.label.ends_with(&suffix))
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.recorded).len()
    }

    fn next_step(&self, label: &str) -> Option<ReplayStep> {
        let mut queues = lock(&self.queues);
        if let Some(step) = queues.get_mut(label).and_then(VecDeque::pop_front) {
            return Some(step);
        }
        let suffix = label.rsplit('.').next().unwrap_or(label);
        if suffix != label {
            if let Some(step) = queues.get_mut(suffix).and_then(VecDeque::pop_front) {
                return Some(step);
            }
        }
        self.default_reply.clone().map(ReplayStep::Reply)
    }
}

#[async_trait]
impl GenerationBackend for ReplayBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<String, BackendError> {
        let label = request.label.clone();
        lock(&self.recorded).push(request);
        match self.next_step(&label) {
            Some(ReplayStep::Reply(text)) => Ok(text),
            Some(ReplayStep::Fail { fail }) => Err(BackendError::Request(fail)),
            None => Err(BackendError::Unavailable(format!(
                "replay script exhausted for '{label}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatMessage, SamplingParams};

    fn request(label: &str) -> GenerationRequest {
        GenerationRequest {
            label: label.into(),
            instructions: String::new(),
            messages: vec![ChatMessage::user("go")],
            sampling: SamplingParams::default(),
        }
    }

    #[tokio::test]
    async fn exact_label_then_suffix_then_default() {
        let backend = ReplayBackend::new()
            .with_replies("a.generator", ["exact"])
            .with_replies("generator", ["suffix"])
            .with_default_reply("default");

        assert_eq!(backend.generate(request("a.generator")).await.unwrap(), "exact");
        assert_eq!(backend.generate(request("a.generator")).await.unwrap(), "suffix");
        assert_eq!(backend.generate(request("a.generator")).await.unwrap(), "default");
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn exhausted_script_is_unavailable() {
        let backend = ReplayBackend::new();
        let err = backend.generate(request("coordinator")).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }

    #[tokio::test]
    async fn injected_failure_surfaces_once() {
        let backend = ReplayBackend::new()
            .with_failure("summarizer", "boom")
            .with_replies("summarizer", ["report"]);

        let first = backend.generate(request("summarizer")).await;
        assert_eq!(first, Err(BackendError::Request("boom".into())));
        assert_eq!(backend.generate(request("summarizer")).await.unwrap(), "report");
    }

    #[tokio::test]
    async fn json_script_round_trips_failures() {
        let backend = ReplayBackend::from_json(
            r#"{"replies": {"coordinator": ["first", {"fail": "down"}]}}"#,
        )
        .unwrap();
        assert_eq!(backend.generate(request("coordinator")).await.unwrap(), "first");
        assert!(backend.generate(request("coordinator")).await.is_err());
        assert_eq!(backend.requests_for("coordinator").len(), 2);
    }
}
