//! Role tools: knowledge lookups and document sections.
//!
//! Roles request tools with fenced blocks in their output:
//!
//! ````text
//! ```tool
//! {"tool": "read_section", "args": {"name": "threat_model"}}
//! ```
//! ````
//!
//! The control layer executes the call and folds the returned string back
//! into the caller's local context. It never interprets the content.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::backend::{DocumentStore, KnowledgeStore};

static TOOL_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```tool[ \t]*\r?\n(.*?)```").expect("TOOL_BLOCK_RE regex should compile")
});

/// Tools offered to roles when their backing store is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    QueryKnowledge,
    CreateSection,
    ListSections,
    ReadSection,
    MergeSection,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        Self::QueryKnowledge,
        Self::CreateSection,
        Self::ListSections,
        Self::ReadSection,
        Self::MergeSection,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::QueryKnowledge => "query_knowledge",
            Self::CreateSection => "create_section",
            Self::ListSections => "list_sections",
            Self::ReadSection => "read_section",
            Self::MergeSection => "merge_section",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    /// One-line usage shown in role instructions.
    pub fn usage(self) -> &'static str {
        match self {
            Self::QueryKnowledge => {
                r#"query_knowledge {"keywords": ["..."]} - search the shared knowledge base"#
            }
            Self::CreateSection => {
                r#"create_section {"name": "...", "content": "..."} - draft or revise a report section"#
            }
            Self::ListSections => "list_sections {} - list report sections",
            Self::ReadSection => r#"read_section {"name": "..."} - read the latest version of a section"#,
            Self::MergeSection => {
                r#"merge_section {"name": "..."} - merge the latest draft of a section into the report"#
            }
        }
    }

    fn needs_knowledge(self) -> bool {
        matches!(self, Self::QueryKnowledge)
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A requested tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(alias = "name")]
    pub tool: String,
    #[serde(default, alias = "arguments")]
    pub args: Value,
}

impl ToolCall {
    pub fn new(tool: ToolKind, args: Value) -> Self {
        Self {
            tool: tool.name().to_string(),
            args,
        }
    }

    fn str_arg(&self, key: &'static str) -> Result<&str, ToolError> {
        self.args
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ToolError::MissingArgument {
                tool: self.tool.clone(),
                arg: key,
            })
    }

    fn keywords(&self) -> Vec<String> {
        match self.args.get("keywords") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Role output with its fenced `tool` blocks removed.
pub fn strip_tool_blocks(text: &str) -> String {
    TOOL_BLOCK_RE.replace_all(text, "").trim().to_string()
}

/// Extract every well-formed fenced `tool` block from role output.
pub fn parse_tool_blocks(text: &str) -> Vec<ToolCall> {
    TOOL_BLOCK_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let body = caps.get(1)?.as_str().trim();
            match serde_json::from_str::<ToolCall>(body) {
                Ok(call) => Some(call),
                Err(e) => {
                    debug!(error = %e, "ignoring malformed tool block");
                    None
                }
            }
        })
        .collect()
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    Unknown(String),

    #[error("tool '{0}' is not available to this role")]
    NotPermitted(String),

    #[error("tool '{tool}' requires argument '{arg}'")]
    MissingArgument { tool: String, arg: &'static str },

    #[error("tool '{0}' has no backing store")]
    Unavailable(String),

    #[error("tool '{tool}' failed: {source}")]
    Store {
        tool: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Executes tool calls against the configured collaborators.
#[derive(Clone)]
pub struct ToolBox {
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    documents: Option<Arc<dyn DocumentStore>>,
    knowledge_limit: usize,
}

impl std::fmt::Debug for ToolBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBox")
            .field("knowledge", &self.knowledge.is_some())
            .field("documents", &self.documents.is_some())
            .field("knowledge_limit", &self.knowledge_limit)
            .finish()
    }
}

impl ToolBox {
    pub fn new(knowledge_limit: usize) -> Self {
        Self {
            knowledge: None,
            documents: None,
            knowledge_limit: knowledge_limit.max(1),
        }
    }

    pub fn with_knowledge(mut self, store: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(store);
        self
    }

    pub fn with_documents(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(store);
        self
    }

    /// Tools backed by a configured store.
    pub fn available(&self) -> Vec<ToolKind> {
        ToolKind::ALL
            .into_iter()
            .filter(|kind| {
                if kind.needs_knowledge() {
                    self.knowledge.is_some()
                } else {
                    self.documents.is_some()
                }
            })
            .collect()
    }

    pub async fn execute(
        &self,
        call: &ToolCall,
        permitted: &[ToolKind],
    ) -> Result<String, ToolError> {
        let kind =
            ToolKind::from_name(&call.tool).ok_or_else(|| ToolError::Unknown(call.tool.clone()))?;
        if !permitted.contains(&kind) {
            return Err(ToolError::NotPermitted(kind.name().to_string()));
        }
        let store_err = |source: anyhow::Error| ToolError::Store {
            tool: kind.name().to_string(),
            source,
        };

        if kind.needs_knowledge() {
            let store = self
                .knowledge
                .as_ref()
                .ok_or_else(|| ToolError::Unavailable(kind.name().to_string()))?;
            let keywords = call.keywords();
            if keywords.is_empty() {
                return Err(ToolError::MissingArgument {
                    tool: call.tool.clone(),
                    arg: "keywords",
                });
            }
            let snippets = store
                .retrieve(&keywords, self.knowledge_limit)
                .await
                .map_err(store_err)?;
            return Ok(number_snippets(&snippets));
        }

        let docs = self
            .documents
            .as_ref()
            .ok_or_else(|| ToolError::Unavailable(kind.name().to_string()))?;
        match kind {
            ToolKind::CreateSection => {
                let name = call.str_arg("name")?;
                let content = call.str_arg("content")?;
                docs.create_section(name, content)
                    .await
                    .map_err(store_err)?;
                Ok(format!("section '{name}' saved"))
            }
            ToolKind::ListSections => {
                let names = docs.list_sections().await.map_err(store_err)?;
                if names.is_empty() {
                    Ok("no sections yet".to_string())
                } else {
                    Ok(names.join("\n"))
                }
            }
            ToolKind::ReadSection => {
                let name = call.str_arg("name")?;
                docs.read_section(name).await.map_err(store_err)
            }
            ToolKind::MergeSection => {
                let name = call.str_arg("name")?;
                let merged = docs.merge_section(name).await.map_err(store_err)?;
                Ok(if merged {
                    format!("section '{name}' merged")
                } else {
                    format!("section '{name}' had nothing to merge")
                })
            }
            ToolKind::QueryKnowledge => Err(ToolError::Unknown(call.tool.clone())),
        }
    }

    /// Execute and render the outcome as context text. Never fails.
    pub async fn run(&self, call: &ToolCall, permitted: &[ToolKind]) -> String {
        match self.execute(call, permitted).await {
            Ok(output) => format!("Tool result [{}]:\n{}", call.tool, output),
            Err(e) => format!("Tool error [{}]: {}", call.tool, e),
        }
    }
}

/// Numbered snippet list for seeding and tool output.
pub fn number_snippets(snippets: &[String]) -> String {
    if snippets.is_empty() {
        return "no matching knowledge".to_string();
    }
    snippets
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct MemoryDocs {
        sections: Mutex<BTreeMap<String, String>>,
    }

    #[async_trait]
    impl DocumentStore for MemoryDocs {
        async fn create_section(&self, name: &str, content: &str) -> anyhow::Result<()> {
            self.sections
                .lock()
                .unwrap()
                .insert(name.to_string(), content.to_string());
            Ok(())
        }
        async fn list_sections(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.sections.lock().unwrap().keys().cloned().collect())
        }
        async fn read_section(&self, name: &str) -> anyhow::Result<String> {
            self.sections
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no section '{name}'"))
        }
        async fn merge_section(&self, name: &str) -> anyhow::Result<bool> {
            Ok(self.sections.lock().unwrap().contains_key(name))
        }
    }

    struct EchoKnowledge;

    #[async_trait]
    impl KnowledgeStore for EchoKnowledge {
        async fn retrieve(&self, keywords: &[String], limit: usize) -> anyhow::Result<Vec<String>> {
            Ok(keywords.iter().take(limit).map(|k| format!("about {k}")).collect())
        }
    }

    fn full_box() -> ToolBox {
        ToolBox::new(2)
            .with_knowledge(Arc::new(EchoKnowledge))
            .with_documents(Arc::new(MemoryDocs::default()))
    }

    #[test]
    fn parses_fenced_blocks_and_skips_garbage() {
        let text = "Let me check.\n```tool\n{\"tool\": \"list_sections\"}\n```\n\
                    and\n```tool\nnot json\n```\n```tool\n{\"name\": \"read_section\", \"arguments\": {\"name\": \"a\"}}\n```";
        let calls = parse_tool_blocks(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].tool, "list_sections");
        assert_eq!(calls[1].args["name"], "a");
    }

    #[test]
    fn plain_json_fences_are_not_tools() {
        assert!(parse_tool_blocks("```json\n{\"tool\": \"list_sections\"}\n```").is_empty());
    }

    #[test]
    fn available_follows_backing_stores() {
        let docs_only = ToolBox::new(3).with_documents(Arc::new(MemoryDocs::default()));
        let available = docs_only.available();
        assert!(available.contains(&ToolKind::ReadSection));
        assert!(!available.contains(&ToolKind::QueryKnowledge));
        assert!(ToolBox::new(3).available().is_empty());
    }

    #[test]
    fn strip_removes_only_tool_blocks() {
        let text = "Patch the VPN.\n```tool\n{\"tool\": \"list_sections\"}\n```\nThen rotate keys.";
        assert_eq!(strip_tool_blocks(text), "Patch the VPN.\n\nThen rotate keys.");
        assert_eq!(strip_tool_blocks("```json\n{}\n```"), "```json\n{}\n```");
    }

    #[tokio::test]
    async fn section_round_trip() {
        let tools = full_box();
        let all = ToolKind::ALL;
        let created = tools
            .execute(
                &ToolCall::new(
                    ToolKind::CreateSection,
                    json!({"name": "risks", "content": "phishing"}),
                ),
                &all,
            )
            .await
            .unwrap();
        assert!(created.contains("saved"));

        let read = tools
            .execute(&ToolCall::new(ToolKind::ReadSection, json!({"name": "risks"})), &all)
            .await
            .unwrap();
        assert_eq!(read, "phishing");

        let merged = tools
            .execute(&ToolCall::new(ToolKind::MergeSection, json!({"name": "risks"})), &all)
            .await
            .unwrap();
        assert!(merged.contains("merged"));
    }

    #[tokio::test]
    async fn knowledge_query_accepts_comma_string() {
        let tools = full_box();
        let out = tools
            .execute(
                &ToolCall::new(ToolKind::QueryKnowledge, json!({"keywords": "tls, mfa, sso"})),
                &[ToolKind::QueryKnowledge],
            )
            .await
            .unwrap();
        assert_eq!(out, "1. about tls\n2. about mfa");
    }

    #[tokio::test]
    async fn errors_are_folded_into_text() {
        let tools = full_box();
        let denied = tools
            .run(
                &ToolCall::new(ToolKind::CreateSection, json!({"name": "x", "content": "y"})),
                &[ToolKind::ReadSection],
            )
            .await;
        assert!(denied.starts_with("Tool error [create_section]"));

        let missing = tools
            .run(&ToolCall::new(ToolKind::ReadSection, json!({})), &ToolKind::ALL)
            .await;
        assert!(missing.contains("requires argument 'name'"));

        let unknown = tools
            .run(
                &ToolCall {
                    tool: "launch_rockets".into(),
                    args: Value::Null,
                },
                &ToolKind::ALL,
            )
            .await;
        assert!(unknown.contains("unknown tool"));
    }
}
