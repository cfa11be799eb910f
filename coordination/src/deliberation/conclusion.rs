//! Turn signals and conclusion extraction.
//!
//! The canonical marker lives only inside [`SignalParser`]. Everything else
//! sees a [`TurnSignal`] or a finished [`Conclusion`].

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_MARKER;

/// Conclusion text used when nothing usable was produced.
pub const NO_CONCLUSION_PLACEHOLDER: &str =
    "The specialist could not reach a conclusion on this request.";

/// What a synthesizer utterance asks the loop to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnSignal {
    /// No marker; the exchange goes on. Carries the trimmed utterance.
    Continue(String),
    /// Marker found. Carries the trimmed text after its last occurrence.
    Conclude(String),
}

impl TurnSignal {
    pub fn is_conclude(&self) -> bool {
        matches!(self, Self::Conclude(_))
    }
}

/// Recognises the termination marker in role output.
///
/// Matching is ASCII case-insensitive and always uses the last occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalParser {
    marker: String,
    marker_folded: String,
}

impl Default for SignalParser {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER)
    }
}

impl SignalParser {
    pub fn new(marker: &str) -> Self {
        let marker = marker.trim().to_string();
        let marker_folded = marker.to_ascii_lowercase();
        Self {
            marker,
            marker_folded,
        }
    }

    /// Byte offset of the last marker occurrence in `text`.
    fn last_marker(&self, text: &str) -> Option<usize> {
        if self.marker_folded.is_empty() {
            return None;
        }
        // ASCII folding keeps byte offsets aligned with `text`.
        text.to_ascii_lowercase().rfind(&self.marker_folded)
    }

    pub fn parse(&self, utterance: &str) -> TurnSignal {
        match self.last_marker(utterance) {
            Some(at) => TurnSignal::Conclude(utterance[at + self.marker.len()..].trim().to_string()),
            None => TurnSignal::Continue(utterance.trim().to_string()),
        }
    }

    /// Never-empty conclusion text for a terminal utterance.
    ///
    /// Text after the last marker; if that is empty, the text before it;
    /// without a marker, the whole utterance; then the placeholder.
    pub fn extract(&self, utterance: &str) -> String {
        let candidate = match self.last_marker(utterance) {
            Some(at) => {
                let after = utterance[at + self.marker.len()..].trim();
                if after.is_empty() {
                    utterance[..at].trim()
                } else {
                    after
                }
            }
            None => utterance.trim(),
        };
        if candidate.is_empty() {
            NO_CONCLUSION_PLACEHOLDER.to_string()
        } else {
            candidate.to_string()
        }
    }

    /// Instruction given to the synthesizing role on how to finish.
    pub fn closing_instruction(&self) -> String {
        format!(
            "When the analysis is complete, write `{}` followed by the final conclusion. \
             Do not write `{}` before you are ready to conclude.",
            self.marker, self.marker
        )
    }

    /// Instruction for the single forced-summary call.
    pub fn forced_summary_instruction(&self) -> String {
        format!(
            "The discussion has reached its round limit. Produce your final conclusion now, \
             prefixed by `{}`. Do not ask further questions.",
            self.marker
        )
    }
}

/// How a conclusion was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    MarkerFound,
    ForcedSummary,
    RawFallback,
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MarkerFound => write!(f, "marker_found"),
            Self::ForcedSummary => write!(f, "forced_summary"),
            Self::RawFallback => write!(f, "raw_fallback"),
        }
    }
}

/// The single result of a deliberation. `text` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conclusion {
    pub text: String,
    pub method: ExtractionMethod,
}

impl Conclusion {
    /// Extract from a terminal utterance.
    pub fn from_utterance(parser: &SignalParser, utterance: &str, method: ExtractionMethod) -> Self {
        Self {
            text: parser.extract(utterance),
            method,
        }
    }

    /// Last-resort conclusion from whatever text survived.
    pub fn raw_fallback(text: Option<&str>) -> Self {
        let text = text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(NO_CONCLUSION_PLACEHOLDER)
            .to_string();
        Self {
            text,
            method: ExtractionMethod::RawFallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_after_last_marker() {
        let parser = SignalParser::default();
        let text = "I will CONCLUDE: once ready.\nMore analysis.\nconclude:  Patch the gateway first.  ";
        assert_eq!(parser.extract(text), "Patch the gateway first.");
        assert_eq!(
            parser.parse(text),
            TurnSignal::Conclude("Patch the gateway first.".into())
        );
    }

    #[test]
    fn marker_at_position_p_yields_exact_suffix() {
        let parser = SignalParser::new("CONCLUDE:");
        let prefix = "Weighing the options carefully. ";
        let suffix = "  Adopt zero-trust networking.\n";
        let text = format!("{prefix}CONCLUDE:{suffix}");
        assert_eq!(parser.extract(&text), suffix.trim());
    }

    #[test]
    fn no_marker_continues_with_whole_text() {
        let parser = SignalParser::default();
        let signal = parser.parse("  still thinking  ");
        assert_eq!(signal, TurnSignal::Continue("still thinking".into()));
        assert!(!signal.is_conclude());
        assert_eq!(parser.extract("  still thinking  "), "still thinking");
    }

    #[test]
    fn empty_after_marker_uses_text_before_it() {
        let parser = SignalParser::default();
        assert_eq!(parser.extract("Encrypt backups. CONCLUDE:   "), "Encrypt backups.");
    }

    #[test]
    fn empty_everything_uses_placeholder() {
        let parser = SignalParser::default();
        assert_eq!(parser.extract("   "), NO_CONCLUSION_PLACEHOLDER);
        assert_eq!(parser.extract("CONCLUDE:"), NO_CONCLUSION_PLACEHOLDER);
    }

    #[test]
    fn extraction_is_idempotent() {
        let parser = SignalParser::default();
        for text in [
            "a CONCLUDE: b",
            "no marker at all",
            "",
            "conclude: x CONCLUDE: y",
            "Über CONCLUDE: naïve café",
        ] {
            assert_eq!(parser.extract(text), parser.extract(text));
        }
    }

    #[test]
    fn non_ascii_text_keeps_offsets() {
        let parser = SignalParser::default();
        assert_eq!(parser.extract("Prüfung läuft. Conclude: Größe passt."), "Größe passt.");
    }

    #[test]
    fn custom_marker_is_trimmed_and_used() {
        let parser = SignalParser::new(" FINAL ANSWER: ");
        assert!(parser.parse("final answer: yes").is_conclude());
        assert!(parser.closing_instruction().contains("`FINAL ANSWER:`"));
        assert!(parser.forced_summary_instruction().contains("FINAL ANSWER:"));
    }

    #[test]
    fn raw_fallback_never_empty() {
        assert_eq!(Conclusion::raw_fallback(None).text, NO_CONCLUSION_PLACEHOLDER);
        assert_eq!(Conclusion::raw_fallback(Some("  ")).text, NO_CONCLUSION_PLACEHOLDER);
        let c = Conclusion::raw_fallback(Some(" partial view "));
        assert_eq!(c.text, "partial view");
        assert_eq!(c.method, ExtractionMethod::RawFallback);
    }
}
