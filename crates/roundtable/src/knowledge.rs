//! Lexical knowledge store over a directory of text files.
//!
//! Files are split into paragraph chunks. A query scores each chunk by the
//! number of whole-word, case-insensitive keyword hits; ties keep file order.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use coordination::KnowledgeStore;
use regex::Regex;
use tracing::{debug, info};

const EXTENSIONS: [&str; 3] = ["md", "txt", "markdown"];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Chunk {
    source: String,
    text: String,
}

#[derive(Debug, Clone, Default)]
pub struct DirectoryKnowledge {
    chunks: Vec<Chunk>,
}

impl DirectoryKnowledge {
    /// Load every text file directly under `dir`, in file-name order.
    pub fn from_dir(dir: &Path, chunk_chars: usize) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .context(format!("Failed to read knowledge dir {}", dir.display()))?;
        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in &paths {
            let text = std::fs::read_to_string(path)
                .context(format!("Failed to read {}", path.display()))?;
            let source = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            documents.push((source, text));
        }

        let store = Self::from_texts(documents, chunk_chars);
        info!(
            dir = %dir.display(),
            files = paths.len(),
            chunks = store.len(),
            "knowledge loaded"
        );
        Ok(store)
    }

    pub fn from_texts<I, S, T>(documents: I, chunk_chars: usize) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: AsRef<str>,
    {
        let mut chunks = Vec::new();
        for (source, text) in documents {
            let source = source.into();
            for text in pack_paragraphs(text.as_ref(), chunk_chars.max(1)) {
                chunks.push(Chunk {
                    source: source.clone(),
                    text,
                });
            }
        }
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Ranked `[source] text` snippets for `keywords`.
    pub fn search(&self, keywords: &[String], limit: usize) -> Vec<String> {
        let patterns: Vec<Regex> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .filter_map(|k| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(k))).ok())
            .collect();
        if patterns.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, usize)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let hits = patterns
                    .iter()
                    .map(|p| p.find_iter(&chunk.text).count())
                    .sum();
                (i, hits)
            })
            .filter(|(_, hits)| *hits > 0)
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        debug!(keywords = ?keywords, matches = scored.len(), "knowledge search");
        scored
            .into_iter()
            .take(limit)
            .map(|(i, _)| {
                let chunk = &self.chunks[i];
                format!("[{}] {}", chunk.source, chunk.text)
            })
            .collect()
    }
}

#[async_trait]
impl KnowledgeStore for DirectoryKnowledge {
    async fn retrieve(&self, keywords: &[String], limit: usize) -> anyhow::Result<Vec<String>> {
        Ok(self.search(keywords, limit))
    }
}

/// Split on blank lines and pack paragraphs up to `max_chars`.
fn pack_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let paragraph = paragraph.split_whitespace().collect::<Vec<_>>().join(" ");
        if !current.is_empty() && current.len() + paragraph.len() + 1 > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&paragraph);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
