//! Store client boundary for KyroSync.
//!
//! The [`StoreClient`] trait is the only way the reconciliation core reaches
//! persisted records. [`InMemoryStore`] is the bundled reference backend.

#[cfg(test)]
pub(crate) mod exact;
mod memory;
mod traits;

pub use memory::{InMemoryStore, InMemoryStoreConfig, StoreOp, StoreStats};
pub use traits::{
    DeleteResult, RecordError, RecordResult, StorageError, StoreClient, WriteAck,
};
