//! Failure taxonomy for one extraction attempt.

use claim_harness_core::contract::ContractError;
use thiserror::Error;

/// Result code for a document blocked by the redactor.
pub const BLOCKED_SENSITIVE: &str = "blocked_sensitive";
/// Result code for every failure worth retrying later.
pub const RETRYABLE_ERROR: &str = "retryable_error";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExtractError {
    /// Redaction risk is high; the text may not leave the system.
    #[error("blocked_sensitive")]
    BlockedSensitive,

    #[error("fact_document not found")]
    DocumentNotFound,

    #[error("environment variable not set: {0}")]
    MissingApiKey(String),

    #[error("LLM HTTP error: {status} {body}")]
    Http { status: u16, body: String },

    #[error("LLM request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("LLM parse failed: {0}")]
    Parse(#[from] ContractError),

    #[error("quality_gate_rejected_all_claims")]
    QualityGateRejectedAll,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ExtractError {
    /// A blocked document stays blocked until its text changes; everything
    /// else may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExtractError::BlockedSensitive)
    }

    pub fn error_code(&self) -> &'static str {
        if self.is_retryable() {
            RETRYABLE_ERROR
        } else {
            BLOCKED_SENSITIVE
        }
    }

    /// Transport-level timeouts, for logging.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExtractError::Transport(e) if e.is_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_and_codes() {
        let err = ExtractError::MissingApiKey("OPENAI_API_KEY".to_string());
        assert_eq!(err.to_string(), "environment variable not set: OPENAI_API_KEY");
        assert_eq!(err.error_code(), RETRYABLE_ERROR);
        assert!(err.is_retryable());

        let err = ExtractError::BlockedSensitive;
        assert!(!err.is_retryable());
        assert_eq!(err.error_code(), BLOCKED_SENSITIVE);
        assert_eq!(err.to_string(), "blocked_sensitive");

        let err = ExtractError::QualityGateRejectedAll;
        assert_eq!(err.to_string(), "quality_gate_rejected_all_claims");

        let err = ExtractError::from(ContractError::NotAnObject);
        assert!(err.to_string().starts_with("LLM parse failed"));
        assert!(!err.is_timeout());
    }
}
