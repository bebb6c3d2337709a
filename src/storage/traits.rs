//! Abstract store client trait for KyroSync.
//!
//! The reconciliation core never talks to a concrete database. It consumes
//! this trait, which models a persistence service exposing query-by-field and
//! batched writes with per-record results. Batch size limits, retries and
//! timeouts belong to the implementation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::{Entity, EntityType, SurrogateId};

/// Errors that fail a whole store call.
///
/// When a batch write returns one of these, no record of the batch is
/// considered written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The store could not be reached or timed out.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The batch exceeds the store's size limit.
    #[error("Batch of {size} records exceeds store limit of {max}")]
    BatchTooLarge {
        /// Submitted batch size.
        size: usize,
        /// Largest batch the store accepts.
        max: usize,
    },

    /// The store does not implement the requested operation.
    #[error("Operation not supported by store: {0}")]
    Unsupported(&'static str),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Errors that fail a single record inside an otherwise accepted batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RecordError {
    /// The store rejected a field value.
    #[error("Validation rejected field '{field}': {reason}")]
    ValidationRejected {
        /// Offending field.
        field: String,
        /// Store-supplied reason.
        reason: String,
    },

    /// The record to update or delete does not exist.
    #[error("Record not found: {0}")]
    NotFound(SurrogateId),

    /// The store enforces key uniqueness and the key is taken.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Any other record-level rejection.
    #[error("Record rejected: {0}")]
    Rejected(String),
}

/// Acknowledgement for one successfully written record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    /// Id of the written record.
    pub id: SurrogateId,
    /// True if the write created the record.
    pub created: bool,
}

impl WriteAck {
    /// Acknowledges a newly created record.
    #[must_use]
    pub const fn created(id: SurrogateId) -> Self {
        Self { id, created: true }
    }

    /// Acknowledges an update of an existing record.
    #[must_use]
    pub const fn updated(id: SurrogateId) -> Self {
        Self { id, created: false }
    }
}

/// Per-record result of a batch write.
pub type RecordResult = Result<WriteAck, RecordError>;

/// Per-record result of a batch delete.
pub type DeleteResult = Result<(), RecordError>;

/// Store client consumed by the reconciliation core.
///
/// Every batch call takes records of one entity type and returns results in
/// the same order as the input.
///
/// # Safety Considerations
/// - Each batch call should be atomic with respect to other callers
/// - Implementations should handle concurrent access safely
pub trait StoreClient: Send + Sync {
    /// Find records of `entity_type` whose `field` equals any of `values`.
    ///
    /// Results are returned in store-defined order; when several records
    /// match one value, the first is the canonical match.
    fn find(
        &self,
        entity_type: &EntityType,
        field: &str,
        values: &[String],
    ) -> Result<Vec<Entity>, StorageError>;

    /// Create records. Input records carry no surrogate id.
    fn create_batch(
        &self,
        entity_type: &EntityType,
        records: Vec<Entity>,
    ) -> Result<Vec<RecordResult>, StorageError>;

    /// Update records by surrogate id, overwriting the supplied attributes.
    fn update_batch(
        &self,
        entity_type: &EntityType,
        records: Vec<Entity>,
    ) -> Result<Vec<RecordResult>, StorageError>;

    /// Returns true if [`StoreClient::upsert_batch`] is implemented.
    fn supports_upsert(&self) -> bool {
        false
    }

    /// Update records that carry a surrogate id or match on `key_field`;
    /// create the rest.
    fn upsert_batch(
        &self,
        _entity_type: &EntityType,
        _key_field: &str,
        _records: Vec<Entity>,
    ) -> Result<Vec<RecordResult>, StorageError> {
        Err(StorageError::Unsupported("upsert_batch"))
    }

    /// Delete records by surrogate id.
    fn delete_batch(
        &self,
        entity_type: &EntityType,
        ids: &[SurrogateId],
    ) -> Result<Vec<DeleteResult>, StorageError>;
}
