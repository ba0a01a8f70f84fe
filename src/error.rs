//! Error type shared by the coordinators.

use thiserror::Error;

/// Why a state-changing request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The current state does not allow the operation.
    NotAllowed,
    /// An equivalent request is already pending.
    Duplicate,
    /// Another writer changed the row first.
    Concurrent,
}

impl ConflictReason {
    /// Only a lost race may succeed when re-read and retried by the caller.
    /// Conflicts are never retried internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConflictReason::Concurrent)
    }
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictReason::NotAllowed => write!(f, "not allowed in current state"),
            ConflictReason::Duplicate => write!(f, "duplicate request"),
            ConflictReason::Concurrent => write!(f, "concurrent modification"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(ConflictReason),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid apply id: {0}")]
    InvalidApplyId(String),
}

impl CatalogError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, CatalogError::Conflict(_))
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;
