//! Reconciliation driver for KyroSync.
//!
//! [`Reconciler`] owns an injected store client and runs reconciliation
//! passes against it. A pass is synchronous: the only points where it waits
//! are the store lookup and the batch writes.

mod config;
mod link;
mod pass;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::info;

pub use config::{PersistMode, ReconcilerConfig, MAX_FIELD_NAME_LENGTH};
pub use link::{
    ChildReconciliation, LinkedChild, LinkedChildren, ParentLink, RelationshipLinker,
    UnlinkedChild,
};

use crate::entity::{Entity, EntityType, KeyResolver};
use crate::error::{ReconcileError, ReconcileResult};
use crate::outcome::{Outcome, OutcomeSummary};
use crate::storage::StoreClient;
use pass::{Collected, Resolved};

/// Marks an entity type as having a pass in flight until dropped.
pub(crate) struct PassGuard<'a> {
    in_flight: &'a Mutex<HashSet<EntityType>>,
    entity_type: EntityType,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        in_flight.remove(&self.entity_type);
    }
}

/// Upserts desired entities by natural key.
///
/// # Example
/// ```rust,ignore
/// let store = Arc::new(InMemoryStore::new());
/// let reconciler = Reconciler::new(store);
/// let outcomes = reconciler.reconcile(
///     EntityType::Account,
///     vec![Entity::new(EntityType::Account, "Acme").with_attribute("Industry", "Tech")],
/// )?;
/// assert!(outcomes[0].is_created());
/// ```
pub struct Reconciler<S: StoreClient + ?Sized> {
    store: Arc<S>,
    config: ReconcilerConfig,
    in_flight: Mutex<HashSet<EntityType>>,
}

impl<S: StoreClient + ?Sized> Reconciler<S> {
    /// Creates a reconciler with the default configuration.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            config: ReconcilerConfig::default(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Creates a reconciler with a validated configuration.
    ///
    /// # Errors
    /// Returns `ReconcileError::Validation` if the configuration is invalid.
    pub fn with_config(store: Arc<S>, config: ReconcilerConfig) -> ReconcileResult<Self> {
        Ok(Self {
            store,
            config: config.validate()?,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Returns the configuration.
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Returns the injected store.
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns a key resolver over this reconciler's store and key field.
    pub fn resolver(&self) -> KeyResolver<'_, S> {
        KeyResolver::new(self.store.as_ref(), &self.config.key_field)
    }

    /// Reconcile `desired` entities of one type against the store.
    ///
    /// Returns one [`Outcome`] per input, in input order. Record-level and
    /// batch-level write failures are reported in the outcomes.
    ///
    /// # Errors
    /// - `StoreUnavailable` if the lookup fails (nothing is written)
    /// - `PassInProgress` if another pass for `entity_type` is running
    #[tracing::instrument(skip_all, fields(entity_type = %entity_type, desired = desired.len()))]
    pub fn reconcile(
        &self,
        entity_type: EntityType,
        desired: Vec<Entity>,
    ) -> ReconcileResult<Vec<Outcome>> {
        let _guard = self.begin_pass(&entity_type)?;
        let resolved = Collected::new(entity_type, desired, &self.config).resolve(&self.resolver())?;
        Ok(self.complete(resolved))
    }

    /// Reserves `entity_type` for one pass.
    pub(crate) fn begin_pass(&self, entity_type: &EntityType) -> ReconcileResult<PassGuard<'_>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| ReconcileError::internal("pass registry lock poisoned"))?;
        if !in_flight.insert(entity_type.clone()) {
            return Err(ReconcileError::PassInProgress(entity_type.clone()));
        }
        Ok(PassGuard {
            in_flight: &self.in_flight,
            entity_type: entity_type.clone(),
        })
    }

    /// Runs PARTITION, PERSIST and REPORT.
    pub(crate) fn complete(&self, resolved: Resolved) -> Vec<Outcome> {
        let outcomes = resolved
            .partition()
            .persist(self.store.as_ref(), &self.config)
            .report();

        let summary = OutcomeSummary::of(&outcomes);
        info!(
            created = summary.created,
            updated = summary.updated,
            failed = summary.failed,
            ambiguous = outcomes.iter().filter(|o| o.is_ambiguous()).count(),
            "reconciliation pass finished"
        );
        outcomes
    }
}
