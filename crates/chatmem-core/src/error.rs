//! ============================================================================
//! Errors - failure kinds and the best-effort outcome type
//! ============================================================================

use serde::Serialize;

/// Error types for memory operations
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum MemoryError {
    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Dimension mismatch on {index}: index expects {expected}, got {actual}")]
    DimensionMismatch {
        index: String,
        expected: usize,
        actual: usize,
    },

    #[error("Record {id} not found in {index}")]
    RecordNotFound { index: String, id: String },

    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Failed to decode stored record: {0}")]
    Codec(String),
}

impl MemoryError {
    /// A dimension mismatch means the embedding model changed without a
    /// reindex. It must never be downgraded to a degraded result.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MemoryError::DimensionMismatch { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MemoryError::IndexNotFound(_) | MemoryError::RecordNotFound { .. }
        )
    }
}

pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

/// Result of a best-effort operation.
///
/// `Recovered` carries a usable fallback value together with the failure that
/// forced it, so callers can tell "no prior context" apart from "context
/// lookup failed" without sentinel values.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Operation completed normally
    Complete(T),
    /// Operation degraded; `value` is the fallback
    Recovered { value: T, error: MemoryError },
    /// Operation failed outright
    Failed(MemoryError),
}

impl<T> Outcome<T> {
    /// Degrade a result: errors become `Recovered` with the fallback value,
    /// except fatal errors which stay `Failed`.
    pub fn degrade(result: MemoryResult<T>, fallback: impl FnOnce() -> T) -> Self {
        match result {
            Ok(value) => Outcome::Complete(value),
            Err(error) if error.is_fatal() => Outcome::Failed(error),
            Err(error) => Outcome::Recovered {
                value: fallback(),
                error,
            },
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Outcome::Complete(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// The value, if the operation produced one (complete or recovered)
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Complete(value) | Outcome::Recovered { value, .. } => Some(value),
            Outcome::Failed(_) => None,
        }
    }

    /// The error behind a degraded or failed outcome
    pub fn error(&self) -> Option<&MemoryError> {
        match self {
            Outcome::Complete(_) => None,
            Outcome::Recovered { error, .. } | Outcome::Failed(error) => Some(error),
        }
    }

    /// Collapse into a `Result`, accepting recovered values as success
    pub fn into_result(self) -> MemoryResult<T> {
        match self {
            Outcome::Complete(value) | Outcome::Recovered { value, .. } => Ok(value),
            Outcome::Failed(error) => Err(error),
        }
    }
}
