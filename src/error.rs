//! Error types for KyroSync.
//!
//! Errors that abort a call are strongly typed using thiserror. Record-level
//! failures inside a pass are not errors at this level; they are reported in
//! the pass [`Outcome`](crate::Outcome)s.

use thiserror::Error;

use crate::entity::EntityType;
use crate::storage::StorageError;

/// Validation errors for caller input and configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is blank.
    #[error("Field '{field}' cannot be empty")]
    EmptyField {
        /// Offending field.
        field: String,
    },

    /// A field is longer than allowed.
    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        /// Offending field.
        field: String,
        /// Longest accepted length.
        max_length: usize,
    },

    /// A configuration value is out of range or malformed.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong.
        reason: String,
    },
}

/// Top-level error type for KyroSync.
///
/// Returned when a call cannot produce per-record outcomes at all.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The store could not serve a lookup; nothing was written.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StorageError),

    /// Caller input or configuration was rejected.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Another pass for the same entity type has not finished.
    #[error("A reconciliation pass for {0} is already in progress")]
    PassInProgress(EntityType),

    /// An invariant of the engine itself was broken.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the broken invariant.
        message: String,
    },
}

impl ReconcileError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a store availability error.
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if the caller may retry the same call later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::StoreUnavailable(e) => !matches!(e, StorageError::Unsupported(_)),
            Self::PassInProgress(_) => true,
            Self::Validation(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for KyroSync operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;
