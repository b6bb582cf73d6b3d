//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant carries a caller-facing message; `code()` gives the stable
/// machine-readable kind an embedding API maps into its error envelope.
/// `Storage` is the one infrastructure escape hatch (backend failures);
/// everything else is a deterministic business outcome.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. non-positive quantity, blank field,
    /// insufficient stock to cover a request).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Role, scope or ownership check failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The operation is illegal in the current state (bad transition,
    /// duplicate genesis, lost concurrent race).
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Derived state no longer matches the event stream (replay divergence).
    /// Should be unreachable; surfacing one means data corruption.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Storage backend failure (infrastructure, not a business outcome).
    #[error("storage error: {0}")]
    Storage(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn state_conflict(msg: impl Into<String>) -> Self {
        Self::StateConflict(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Stable error code for API envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::StateConflict(_) => "STATE_CONFLICT",
            Self::InvariantViolation(_) => "INVARIANT_VIOLATION",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// The bare caller-facing message (without the `Display` kind prefix).
    pub fn message(&self) -> &str {
        match self {
            Self::Validation(m)
            | Self::NotFound(m)
            | Self::Unauthorized(m)
            | Self::StateConflict(m)
            | Self::InvariantViolation(m)
            | Self::Storage(m) => m,
        }
    }
}
