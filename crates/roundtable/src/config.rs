//! Application configuration: inference endpoint, council settings, roster.
//!
//! Loaded from a TOML file with `[endpoint]`, `[council]`, `[[specialists]]`
//! and an optional `[knowledge]` table. Every table is optional. Endpoint
//! fields not given in the file come from `ROUNDTABLE_*` environment
//! variables; council settings take `ROUNDTABLE_*` overrides after the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use coordination::{CouncilConfig, RoleTraits, Specialist};
use rig::providers::openai;
use serde::{Deserialize, Serialize};

pub const ENV_BASE_URL: &str = "ROUNDTABLE_BASE_URL";
pub const ENV_API_KEY: &str = "ROUNDTABLE_API_KEY";
pub const ENV_MODEL: &str = "ROUNDTABLE_MODEL";

/// OpenAI-compatible inference endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL including the `/v1` suffix.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var(ENV_BASE_URL)
                .unwrap_or_else(|_| "http://localhost:8080/v1".into()),
            api_key: std::env::var(ENV_API_KEY).unwrap_or_else(|_| "not-needed".into()),
            model: std::env::var(ENV_MODEL).unwrap_or_else(|_| "default".into()),
        }
    }
}

impl EndpointConfig {
    pub fn client(&self) -> Result<openai::CompletionsClient> {
        openai::CompletionsClient::builder()
            .api_key(&self.api_key)
            .base_url(&self.base_url)
            .build()
            .context(format!("Failed to build client for {}", self.base_url))
    }
}

/// Directory of `.md` / `.txt` files served as the knowledge store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    pub dir: PathBuf,
    /// Paragraphs are packed into chunks of at most this many characters.
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
}

fn default_chunk_chars() -> usize {
    800
}

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub council: CouncilConfig,
    #[serde(default = "default_roster")]
    pub specialists: Vec<Specialist>,
    #[serde(default)]
    pub knowledge: Option<KnowledgeConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            council: CouncilConfig::default(),
            specialists: default_roster(),
            knowledge: None,
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).context(format!("Failed to parse config TOML {}", path.display()))
    }

    /// File (or defaults) with council environment overrides applied.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.council.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Validate the config; return an error string if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.council.validate()?;
        if self.endpoint.base_url.trim().is_empty() {
            return Err("endpoint.base_url must not be empty".to_string());
        }
        if self.endpoint.model.trim().is_empty() {
            return Err("endpoint.model must not be empty".to_string());
        }
        if self.specialists.is_empty() {
            return Err("at least one [[specialists]] entry is required".to_string());
        }
        if let Some(knowledge) = &self.knowledge {
            if knowledge.chunk_chars == 0 {
                return Err("knowledge.chunk_chars must be > 0".to_string());
            }
        }
        Ok(())
    }
}

/// Security, compliance and architecture reviewers.
pub fn default_roster() -> Vec<Specialist> {
    vec![
        Specialist::new(
            "security",
            "cybersecurity threat analysis: attack surface, authentication, data exposure",
        )
        .with_keywords(["threat", "vulnerability", "authentication", "encryption"])
        .with_generator(RoleTraits::default().with_tone("adversarial; think like an attacker")),
        Specialist::new(
            "compliance",
            "regulatory compliance: privacy law, audit obligations, data retention",
        )
        .with_keywords(["gdpr", "audit", "retention", "policy"]),
        Specialist::new(
            "architecture",
            "systems architecture: scalability, operability, failure modes",
        )
        .with_keywords(["scalability", "availability", "latency", "deployment"])
        .with_synthesizer(RoleTraits::default().with_focus(
            "weigh trade-offs and converge on a design the team can operate",
        )),
    ]
}

/// Check an OpenAI-compatible endpoint by listing its models.
pub async fn check_endpoint(url: &str) -> bool {
    let models_url = format!("{}/models", url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
