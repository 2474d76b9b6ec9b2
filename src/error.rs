use thiserror::Error;

use crate::domain::MatchKey;

/// Main error type for the tipping pipeline
#[derive(Error, Debug)]
pub enum TiplineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Session/login errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    // External response shape errors (retryable on the next schedule tick)
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    // Prediction service answered for only part of the requested batch
    #[error("Partial prediction response: {} match/model pairs unanswered", unanswered.len())]
    PartialPrediction { unanswered: Vec<(MatchKey, String)> },

    // Attempted mutation of an immutable prediction
    #[error("Duplicate prediction for {match_key} by {ml_model}")]
    DuplicatePrediction {
        match_key: MatchKey,
        ml_model: String,
    },

    // Conflicting match result; the stored row is left untouched
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    // Tip rejected by the competition site
    #[error("Tip submission failed: {0}")]
    Submission(String),

    #[error("Submission retries exhausted after {attempts} attempts for {match_key}")]
    SubmissionRetriesExhausted { match_key: MatchKey, attempts: u32 },

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Storage contract violations not covered by a more specific variant
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Job exceeded its time budget: {0}")]
    JobTimeout(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TiplineError {
    /// Whether the next scheduled tick is expected to succeed without
    /// operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TiplineError::Http(_)
                | TiplineError::Ingestion(_)
                | TiplineError::PartialPrediction { .. }
                | TiplineError::Submission(_)
                | TiplineError::JobTimeout(_)
        )
    }
}

/// Result type alias for TiplineError
pub type Result<T> = std::result::Result<T, TiplineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(TiplineError::Ingestion("bad table".into()).is_retryable());
        assert!(TiplineError::Submission("rejected".into()).is_retryable());
        assert!(!TiplineError::DataIntegrity("conflict".into()).is_retryable());
        assert!(!TiplineError::Authentication("wrong passwd".into()).is_retryable());
    }
}
