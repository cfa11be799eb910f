//! Error taxonomy for the deliberation control layer.
//!
//! Only two conditions ever reach the caller of a council session:
//! explicit cancellation and total backend unavailability. Everything else
//! is recovered where it happens:
//!
//! | Failure              | Recovery                                         |
//! |----------------------|--------------------------------------------------|
//! | Backend request      | raw-fallback conclusion, or hub-call retry       |
//! | Rate limit           | hub-call retry with back-off                     |
//! | Unparseable decision | corrective re-prompt, then fallback decision     |
//! | Unknown specialist   | least-contributed specialist substitution        |
//! | Round or message cap | forced summary / forced summarize (not an error) |
//! | Cancellation         | terminal                                         |
//! | No backend success   | terminal                                         |

use std::fmt;

use thiserror::Error;

/// Classification of a backend failure, deciding whether a hub call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Backend request failed; the next call may succeed.
    Generation,
    /// Backend throttled the request.
    RateLimit,
    /// The session token was cancelled.
    Cancelled,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Generation | Self::RateLimit)
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generation => write!(f, "generation"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Failure reported by a [`GenerationBackend`](crate::backend::GenerationBackend).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The endpoint could not be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The endpoint answered with an error.
    #[error("generation request failed: {0}")]
    Request(String),

    /// The endpoint throttled the request.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The call was abandoned because the session was cancelled.
    #[error("generation cancelled")]
    Cancelled,
}

impl BackendError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Unavailable(_) | Self::Request(_) => RetryCategory::Generation,
            Self::RateLimited(_) => RetryCategory::RateLimit,
            Self::Cancelled => RetryCategory::Cancelled,
        }
    }
}

/// A deliberation or decision step was interrupted by cancellation.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("deliberation cancelled")]
pub struct Cancelled;

/// Coordinator output that could not be turned into a decision.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// No JSON object could be parsed from the reply.
    #[error("no decision object found: {0}")]
    NoObject(String),

    /// The object parsed but carried no target.
    #[error("decision is missing a target")]
    MissingTarget,

    /// A decision other than `continue_self` without instructions or focus terms.
    #[error("decision for '{target}' is missing {field}")]
    MissingField { target: String, field: &'static str },

    /// The coordinator asked for lookups after they were already answered.
    #[error("lookups were already answered; a final decision is required")]
    RepeatedLookup,
}

/// Terminal failure of a whole council session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session token was cancelled before a report was produced.
    #[error("session cancelled")]
    Cancelled,

    /// No backend call succeeded across every retry.
    #[error("generation backend unavailable after {attempts} attempt(s): {last_error}")]
    BackendUnavailable { attempts: u32, last_error: String },

    /// The council could not be assembled.
    #[error("invalid council configuration: {0}")]
    Configuration(String),
}

impl From<Cancelled> for SessionError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_failures_are_retriable() {
        let err = BackendError::Request("502 bad gateway".into());
        assert_eq!(err.retry_category(), RetryCategory::Generation);
        assert!(err.retry_category().is_retriable());
        assert!(BackendError::RateLimited("slow down".into())
            .retry_category()
            .is_retriable());
        assert!(BackendError::Unavailable("refused".into())
            .retry_category()
            .is_retriable());
    }

    #[test]
    fn cancellation_is_not_retried() {
        let category = BackendError::Cancelled.retry_category();
        assert_eq!(category, RetryCategory::Cancelled);
        assert!(!category.is_retriable());
        assert_eq!(category.to_string(), "cancelled");
    }

    #[test]
    fn missing_field_names_target_and_field() {
        let err = ParseError::MissingField {
            target: "security".into(),
            field: "instructions",
        };
        assert_eq!(
            err.to_string(),
            "decision for 'security' is missing instructions"
        );
    }

    #[test]
    fn session_error_from_cancelled() {
        let err: SessionError = Cancelled.into();
        assert!(matches!(err, SessionError::Cancelled));
    }
}
