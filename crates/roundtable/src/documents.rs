//! In-memory section store with versions, change history and a merged document.
//!
//! Roles write named sections through tools; each write adds a version.
//! Merging copies a section's latest version into the current document,
//! which renders as markdown in first-merge order.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordination::DocumentStore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SectionError {
    #[error("section name must not be empty")]
    EmptyName,

    #[error("section '{0}' has no content")]
    EmptyContent(String),

    #[error("section '{0}' not found")]
    NotFound(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionVersion {
    pub version: u32,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Revised,
    Merged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionChange {
    pub section: String,
    pub version: u32,
    pub kind: ChangeKind,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    sections: BTreeMap<String, Vec<SectionVersion>>,
    /// Merged `(name, version)` pairs in first-merge order.
    document: Vec<(String, u32)>,
    history: Vec<SectionChange>,
}

#[derive(Debug, Default)]
pub struct SectionStore {
    inner: Mutex<Inner>,
}

impl SectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a version of `name`; returns the new version number.
    pub fn write(&self, name: &str, content: &str) -> Result<u32, SectionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SectionError::EmptyName);
        }
        if content.trim().is_empty() {
            return Err(SectionError::EmptyContent(name.to_string()));
        }

        let mut inner = self.lock();
        let versions = inner.sections.entry(name.to_string()).or_default();
        let version = versions.len() as u32 + 1;
        versions.push(SectionVersion {
            version,
            content: content.trim().to_string(),
            created_at: Utc::now(),
        });
        let kind = if version == 1 {
            ChangeKind::Created
        } else {
            ChangeKind::Revised
        };
        inner.history.push(SectionChange {
            section: name.to_string(),
            version,
            kind,
            at: Utc::now(),
        });
        debug!(section = name, version, "section written");
        Ok(version)
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().sections.keys().cloned().collect()
    }

    pub fn latest(&self, name: &str) -> Result<String, SectionError> {
        self.lock()
            .sections
            .get(name.trim())
            .and_then(|versions| versions.last())
            .map(|v| v.content.clone())
            .ok_or_else(|| SectionError::NotFound(name.to_string()))
    }

    pub fn versions(&self, name: &str) -> Vec<SectionVersion> {
        self.lock()
            .sections
            .get(name.trim())
            .cloned()
            .unwrap_or_default()
    }

    /// Merge the latest version of `name`. `false` if it is already merged.
    pub fn merge(&self, name: &str) -> Result<bool, SectionError> {
        let name = name.trim();
        let mut inner = self.lock();
        let latest = inner
            .sections
            .get(name)
            .and_then(|versions| versions.last())
            .map(|v| v.version)
            .ok_or_else(|| SectionError::NotFound(name.to_string()))?;

        match inner.document.iter_mut().find(|(n, _)| n == name) {
            Some((_, merged)) if *merged == latest => return Ok(false),
            Some((_, merged)) => *merged = latest,
            None => inner.document.push((name.to_string(), latest)),
        }
        inner.history.push(SectionChange {
            section: name.to_string(),
            version: latest,
            kind: ChangeKind::Merged,
            at: Utc::now(),
        });
        debug!(section = name, version = latest, "section merged");
        Ok(true)
    }

    pub fn history(&self) -> Vec<SectionChange> {
        self.lock().history.clone()
    }

    /// The merged document, one `## name` heading per section.
    pub fn render_markdown(&self) -> String {
        let inner = self.lock();
        inner
            .document
            .iter()
            .filter_map(|(name, version)| {
                inner
                    .sections
                    .get(name)
                    .and_then(|versions| versions.get(*version as usize - 1))
                    .map(|v| format!("## {name}\n\n{}\n", v.content))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl DocumentStore for SectionStore {
    async fn create_section(&self, name: &str, content: &str) -> anyhow::Result<()> {
        self.write(name, content)?;
        Ok(())
    }

    async fn list_sections(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.names())
    }

    async fn read_section(&self, name: &str) -> anyhow::Result<String> {
        Ok(self.latest(name)?)
    }

    async fn merge_section(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self.merge(name)?)
    }
}
