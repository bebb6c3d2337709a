//! Per-record results of a reconciliation pass.
//!
//! Every desired entity handed to a pass gets exactly one [`Outcome`], in
//! input order. Failures are reported here rather than as errors so that one
//! rejected record never hides the results of its siblings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::SurrogateId;
use crate::storage::{RecordError, StorageError};

/// Why a record was not written.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    /// The batch carrying this record could not be submitted.
    #[error("store unavailable: {message}")]
    StoreUnavailable {
        /// Store-reported cause.
        message: String,
    },

    /// A field value was rejected, locally or by the store.
    #[error("validation rejected field '{field}': {reason}")]
    ValidationRejected {
        /// Offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Any other record-level rejection.
    #[error("rejected: {message}")]
    Rejected {
        /// Store-reported cause.
        message: String,
    },

    /// The child's parent could not be resolved or created.
    #[error("parent '{parent_key}' unresolved: {reason}")]
    ParentUnresolved {
        /// Natural key of the parent.
        parent_key: String,
        /// Why the parent has no id.
        reason: String,
    },
}

impl FailureReason {
    /// Returns true for batch-level store failures.
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Returns true for field validation failures.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::ValidationRejected { .. })
    }
}

impl From<&StorageError> for FailureReason {
    fn from(err: &StorageError) -> Self {
        Self::StoreUnavailable {
            message: err.to_string(),
        }
    }
}

impl From<RecordError> for FailureReason {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::ValidationRejected { field, reason } => {
                Self::ValidationRejected { field, reason }
            }
            other => Self::Rejected {
                message: other.to_string(),
            },
        }
    }
}

/// Non-fatal annotation on an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum OutcomeWarning {
    /// The lookup matched several records; the first in store order was used.
    AmbiguousMatch {
        /// Number of matching records.
        candidates: usize,
    },
}

/// What happened to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// A new record was created with this id.
    Created(SurrogateId),
    /// The existing record with this id was overwritten.
    Updated(SurrogateId),
    /// Nothing was written.
    Failed(FailureReason),
}

/// Result for one desired entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Natural key of the desired entity.
    pub natural_key: String,
    /// What happened.
    pub kind: OutcomeKind,
    /// Non-fatal annotations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<OutcomeWarning>,
}

impl Outcome {
    /// A created outcome.
    #[must_use]
    pub fn created(natural_key: impl Into<String>, id: SurrogateId) -> Self {
        Self::with_kind(natural_key, OutcomeKind::Created(id))
    }

    /// An updated outcome.
    #[must_use]
    pub fn updated(natural_key: impl Into<String>, id: SurrogateId) -> Self {
        Self::with_kind(natural_key, OutcomeKind::Updated(id))
    }

    /// A failed outcome.
    #[must_use]
    pub fn failed(natural_key: impl Into<String>, reason: FailureReason) -> Self {
        Self::with_kind(natural_key, OutcomeKind::Failed(reason))
    }

    pub(crate) fn with_kind(natural_key: impl Into<String>, kind: OutcomeKind) -> Self {
        Self {
            natural_key: natural_key.into(),
            kind,
            warnings: Vec::new(),
        }
    }

    /// Returns this outcome with the given warnings attached.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<OutcomeWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Returns true if a new record was created.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self.kind, OutcomeKind::Created(_))
    }

    /// Returns true if an existing record was overwritten.
    #[must_use]
    pub const fn is_updated(&self) -> bool {
        matches!(self.kind, OutcomeKind::Updated(_))
    }

    /// Returns true if nothing was written for this record.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.kind, OutcomeKind::Failed(_))
    }

    /// Id of the written record, if any.
    #[must_use]
    pub fn surrogate_id(&self) -> Option<SurrogateId> {
        match self.kind {
            OutcomeKind::Created(id) | OutcomeKind::Updated(id) => Some(id),
            OutcomeKind::Failed(_) => None,
        }
    }

    /// Failure reason, if nothing was written.
    #[must_use]
    pub const fn failure(&self) -> Option<&FailureReason> {
        match &self.kind {
            OutcomeKind::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Returns true if the lookup for this record was ambiguous.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, OutcomeWarning::AmbiguousMatch { .. }))
    }
}

/// Created/updated/failed counts over a set of outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeSummary {
    /// Records created.
    pub created: usize,
    /// Records updated.
    pub updated: usize,
    /// Records not written.
    pub failed: usize,
}

impl OutcomeSummary {
    /// Tallies outcomes.
    #[must_use]
    pub fn of(outcomes: &[Outcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut acc, o| {
            match o.kind {
                OutcomeKind::Created(_) => acc.created += 1,
                OutcomeKind::Updated(_) => acc.updated += 1,
                OutcomeKind::Failed(_) => acc.failed += 1,
            }
            acc
        })
    }
}
