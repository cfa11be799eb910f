//! Assemble a council from an [`AppConfig`] and write session outputs.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use coordination::{Council, GenerationBackend, SessionOutcome};
use tracing::info;

use crate::config::AppConfig;
use crate::documents::SectionStore;
use crate::knowledge::DirectoryKnowledge;

/// Build the council. The section store is always attached; knowledge only
/// when `[knowledge]` is configured.
pub fn build_council(
    config: &AppConfig,
    backend: Arc<dyn GenerationBackend>,
    documents: Arc<SectionStore>,
) -> Result<Council> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let mut builder = Council::builder(backend)
        .config(config.council.clone())
        .specialists(config.specialists.iter().cloned())
        .documents(documents);
    if let Some(knowledge) = &config.knowledge {
        let store = DirectoryKnowledge::from_dir(&knowledge.dir, knowledge.chunk_chars)?;
        builder = builder.knowledge(Arc::new(store));
    }
    Ok(builder.build()?)
}

/// Read the request text from a file; blank files are rejected.
pub fn read_request(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .context(format!("Failed to read request {}", path.display()))?;
    if text.trim().is_empty() {
        anyhow::bail!("Request file {} is empty", path.display());
    }
    Ok(text.trim().to_string())
}

/// Write the final report, and the merged document when it has sections.
pub fn write_outputs(
    outcome: &SessionOutcome,
    documents: &SectionStore,
    report_path: Option<&Path>,
    document_path: Option<&Path>,
) -> Result<()> {
    if let Some(path) = report_path {
        std::fs::write(path, &outcome.report)
            .context(format!("Failed to write report {}", path.display()))?;
        info!(path = %path.display(), "Wrote report");
    }
    if let Some(path) = document_path {
        let document = documents.render_markdown();
        if document.is_empty() {
            info!("No merged sections; document not written");
        } else {
            std::fs::write(path, document)
                .context(format!("Failed to write document {}", path.display()))?;
            info!(path = %path.display(), "Wrote merged document");
        }
    }
    Ok(())
}
