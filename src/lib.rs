//! # KyroSync - Natural-Key Reconciliation
//!
//! KyroSync brings a record store in line with a list of desired entities.
//! Each desired entity is identified by a human-meaningful natural key; the
//! store assigns surrogate ids. A reconciliation pass upserts by natural key
//! and, for one level of parent/child relationships, creates missing parents
//! before stamping children with their parent's surrogate id.
//!
//! ## Core Concepts
//!
//! - **Entity**: A desired or stored record with a natural key and attributes
//! - **Resolution**: Natural key to surrogate id mapping from one store lookup
//! - **Outcome**: Per-record result of a pass (created, updated or failed)
//! - **StoreClient**: The injected record store
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kyrosync::{Entity, EntityType, InMemoryStore, ParentLink, Reconciler};
//!
//! let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()));
//!
//! let outcomes = reconciler.reconcile(
//!     EntityType::Account,
//!     vec![Entity::new(EntityType::Account, "Acme").with_attribute("Industry", "Tech")],
//! )?;
//!
//! let contacts = vec![Entity::new(EntityType::Contact, "Jane Doe").with_attribute("Company", "Doe")];
//! let result = reconciler.reconcile_children(
//!     EntityType::Contact,
//!     contacts,
//!     &ParentLink::new(EntityType::Account, "AccountId"),
//!     |c| c.attribute("Company").and_then(|v| v.lookup_text()).unwrap_or_default(),
//! )?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod entity;
pub mod error;
pub mod outcome;
pub mod storage;
pub mod value;

pub use engine::{
    ChildReconciliation, LinkedChild, LinkedChildren, ParentLink, PersistMode, Reconciler,
    ReconcilerConfig, RelationshipLinker, UnlinkedChild,
};
pub use entity::{normalize_key, Entity, EntityType, KeyResolver, Resolution, SurrogateId};
pub use error::{ReconcileError, ReconcileResult, ValidationError};
pub use outcome::{FailureReason, Outcome, OutcomeKind, OutcomeSummary, OutcomeWarning};
pub use storage::{
    DeleteResult, InMemoryStore, InMemoryStoreConfig, RecordError, RecordResult, StorageError,
    StoreClient, StoreOp, StoreStats, WriteAck,
};
pub use value::Value;
