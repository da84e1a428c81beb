//! Pipeline error taxonomy
//!
//! Only `Config`, `Database`, `Store` and `BackendUnavailable` ever escape a
//! stage's `start()`. Fetch and record level failures are absorbed by the
//! managers and show up as counters in the stage report.

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network failure, timeout, 5xx or rate limit that outlived the retry policy
    #[error("Transient fetch failure for {url} after {attempts} attempt(s): {reason}")]
    TransientFetch {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// The upstream answered with a definitive error (404 and other 4xx)
    #[error("Upstream rejected {url}: HTTP {status}")]
    Upstream { url: String, status: u16 },

    /// One record could not be turned into canonical fields
    #[error("Malformed record {record}: {reason}")]
    MalformedRecord { record: String, reason: String },

    /// Embedding model/backend unreachable or returned garbage for the whole batch
    #[error("Embedding backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Invariant violation detected by a store implementation
    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] pis_common::PisError),
}

impl PipelineError {
    pub fn malformed(record: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::MalformedRecord {
            record: record.into(),
            reason: reason.into(),
        }
    }

    /// Errors that a later run may succeed on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientFetch { .. } | PipelineError::BackendUnavailable(_)
        )
    }

    /// Failures scoped to one record or page; the stage counts them and moves on
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientFetch { .. }
                | PipelineError::Upstream { .. }
                | PipelineError::MalformedRecord { .. }
        )
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(err: serde_yaml::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let transient = PipelineError::TransientFetch {
            url: "https://rest.uniprot.org".to_string(),
            attempts: 4,
            reason: "HTTP 503".to_string(),
        };
        assert!(transient.is_recoverable());
        assert!(transient.is_record_level());

        let malformed = PipelineError::malformed("P12345", "missing uniProtkbId");
        assert!(!malformed.is_recoverable());
        assert!(malformed.is_record_level());
        assert_eq!(malformed.to_string(), "Malformed record P12345: missing uniProtkbId");

        let backend = PipelineError::BackendUnavailable("connection refused".to_string());
        assert!(backend.is_recoverable());
        assert!(!backend.is_record_level());
        assert!(!PipelineError::Config("DB_HOST must be set".to_string()).is_record_level());
    }
}
