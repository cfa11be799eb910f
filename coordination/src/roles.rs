//! Role definitions and the single instruction template.
//!
//! Every role in a council (the two debating roles of each specialist, the
//! optional reporter, the coordinator and the summarizer) is rendered from
//! one template. A [`RoleTraits`] value overrides the per-kind defaults for
//! tone, focus, tools and temperature.

use serde::{Deserialize, Serialize};

use crate::backend::SamplingParams;
use crate::deliberation::conclusion::SignalParser;
use crate::tools::ToolKind;

/// The part a role plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Generator,
    Synthesizer,
    Reporter,
    Coordinator,
    Summarizer,
}

impl RoleKind {
    fn default_tone(self) -> &'static str {
        match self {
            Self::Generator => "exploratory and imaginative; favour breadth over polish",
            Self::Synthesizer => "skeptical, precise and evidence-driven",
            Self::Reporter => "clear and direct, first person",
            Self::Coordinator => "decisive and economical",
            Self::Summarizer => "balanced and structured",
        }
    }

    fn default_focus(self) -> &'static str {
        match self {
            Self::Generator => "surface options, risks and non-obvious angles",
            Self::Synthesizer => "test each idea, keep what survives, converge on a position",
            Self::Reporter => "faithful restatement of the conclusion",
            Self::Coordinator => "route each step to the specialist who adds the most",
            Self::Summarizer => "an actionable assessment grounded in the specialists' findings",
        }
    }

    fn default_tools(self) -> &'static [ToolKind] {
        match self {
            Self::Generator | Self::Coordinator => &[
                ToolKind::QueryKnowledge,
                ToolKind::ListSections,
                ToolKind::ReadSection,
            ],
            Self::Synthesizer => &[
                ToolKind::QueryKnowledge,
                ToolKind::ListSections,
                ToolKind::ReadSection,
                ToolKind::CreateSection,
                ToolKind::MergeSection,
            ],
            Self::Reporter | Self::Summarizer => &[],
        }
    }

    fn protocol(self, subject: &str, signal: &SignalParser) -> String {
        match self {
            Self::Generator => format!(
                "Propose ideas, risks and angles on the task from the {subject} perspective. \
                 Build on the synthesizer's feedback in each round. Do not write a final \
                 conclusion; the synthesizer decides when the discussion ends."
            ),
            Self::Synthesizer => format!(
                "Critically evaluate the generator's latest ideas from the {subject} perspective. \
                 Say what holds up, what does not, and what is still missing. {}",
                signal.closing_instruction()
            ),
            Self::Reporter => format!(
                "Rewrite the conclusion you are given as a single first-person statement from \
                 the {subject} specialist. Keep every substantive point. Reply with the \
                 rewritten text only."
            ),
            Self::Coordinator => "Decide the next step of the consultation. Reply with a single \
                 JSON object and nothing else:\n\
                 {\"reasoning\": \"why\", \"decision\": \"<specialist id> | summarize | end | \
                 continue_self\", \"keywords\": [\"focus\", \"terms\"], \"instructions\": \
                 \"what the specialist should do\"}\n\
                 keywords and instructions are required for every decision except \
                 continue_self. Pick \
                 summarize once every relevant specialist has contributed."
                .to_string(),
            Self::Summarizer => "Write the final assessment of the original request from the \
                 specialists' analyses below. Use markdown sections: Summary, Findings by \
                 Domain, Recommendations. Do not add findings no specialist made."
                .to_string(),
        }
    }
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generator => write!(f, "generator"),
            Self::Synthesizer => write!(f, "synthesizer"),
            Self::Reporter => write!(f, "reporter"),
            Self::Coordinator => write!(f, "coordinator"),
            Self::Summarizer => write!(f, "summarizer"),
        }
    }
}

/// Overrides for one role. Unset fields use the kind's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleTraits {
    pub tone: Option<String>,
    pub focus: Option<String>,
    pub tools: Option<Vec<ToolKind>>,
    pub temperature: Option<f64>,
}

impl RoleTraits {
    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = Some(tone.into());
        self
    }

    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.focus = Some(focus.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolKind>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A rendered role, built once and reused for every call.
#[derive(Debug, Clone, PartialEq)]
pub struct RolePrompt {
    /// Backend label, e.g. `security.generator`.
    pub label: String,
    pub kind: RoleKind,
    pub instructions: String,
    pub sampling: SamplingParams,
    /// Tools the role may call; already restricted to what is available.
    pub tools: Vec<ToolKind>,
}

/// Inputs to the role template besides the traits.
#[derive(Debug, Clone)]
pub struct RoleTemplate<'a> {
    /// Specialist id, or `None` for council-level roles.
    pub owner: Option<&'a str>,
    /// Who the role speaks for, e.g. "cybersecurity threat analysis".
    pub subject: &'a str,
    pub signal: &'a SignalParser,
    pub default_temperature: f64,
    pub max_tokens: Option<u64>,
    /// Tools the environment can actually serve.
    pub available_tools: &'a [ToolKind],
}

impl RoleTemplate<'_> {
    pub fn render(&self, kind: RoleKind, traits: &RoleTraits) -> RolePrompt {
        let label = match self.owner {
            Some(owner) => format!("{owner}.{kind}"),
            None => kind.to_string(),
        };
        let tone = traits.tone.as_deref().unwrap_or(kind.default_tone());
        let focus = traits.focus.as_deref().unwrap_or(kind.default_focus());
        let wanted = traits.tools.as_deref().unwrap_or(kind.default_tools());
        let tools: Vec<ToolKind> = wanted
            .iter()
            .copied()
            .filter(|t| self.available_tools.contains(t))
            .collect();

        let who = match self.owner {
            Some(owner) => format!("the {kind} of the `{owner}` specialist ({})", self.subject),
            None => format!("the {kind} of a council of specialists ({})", self.subject),
        };

        let mut instructions = format!(
            "You are {who}.\n\nTone: {tone}\nFocus: {focus}\n\n{}",
            kind.protocol(self.owner.unwrap_or(self.subject), self.signal)
        );
        if !tools.is_empty() {
            instructions.push_str("\n\n");
            instructions.push_str(&tool_section(kind, &tools));
        }

        RolePrompt {
            label,
            kind,
            instructions,
            sampling: SamplingParams {
                temperature: traits.temperature.unwrap_or(self.default_temperature),
                max_tokens: self.max_tokens,
            },
            tools,
        }
    }
}

fn tool_section(kind: RoleKind, tools: &[ToolKind]) -> String {
    let usage = tools
        .iter()
        .map(|t| format!("- {}", t.usage()))
        .collect::<Vec<_>>()
        .join("\n");
    if kind == RoleKind::Coordinator {
        format!(
            "Before deciding you may request lookups instead of a decision:\n\
             {{\"reasoning\": \"why\", \"lookups\": [{{\"tool\": \"<name>\", \"args\": {{}}}}]}}\n\
             Available lookups:\n{usage}"
        )
    } else {
        format!(
            "You may call tools by writing a fenced block:\n```tool\n\
             {{\"tool\": \"<name>\", \"args\": {{}}}}\n```\nAvailable tools:\n{usage}"
        )
    }
}

/// A participant the coordinator can dispatch to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specialist {
    /// Stable id used in decisions and the global log.
    pub id: String,
    /// Domain description shown to the coordinator and in role instructions.
    pub description: String,
    /// Standing keywords added to every knowledge lookup.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub generator: RoleTraits,
    #[serde(default)]
    pub synthesizer: RoleTraits,
}

impl Specialist {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            keywords: Vec::new(),
            generator: RoleTraits::default(),
            synthesizer: RoleTraits::default(),
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_generator(mut self, traits: RoleTraits) -> Self {
        self.generator = traits;
        self
    }

    pub fn with_synthesizer(mut self, traits: RoleTraits) -> Self {
        self.synthesizer = traits;
        self
    }
}
