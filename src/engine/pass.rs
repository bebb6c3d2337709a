//! One reconciliation pass as a typed state machine.
//!
//! `COLLECT → RESOLVE → PARTITION → PERSIST → REPORT`. Each stage is its own
//! type and is consumed by the next, so a pass cannot skip a stage, repeat
//! one, or outlive its working set.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::engine::config::{PersistMode, ReconcilerConfig};
use crate::entity::{Entity, EntityType, KeyResolver, Resolution};
use crate::error::ReconcileResult;
use crate::outcome::{FailureReason, Outcome, OutcomeKind, OutcomeWarning};
use crate::storage::{RecordResult, StorageError, StoreClient, WriteAck};

/// Position of one input entity in the pass.
#[derive(Debug)]
enum Slot {
    /// Points at a working-set member; `key` is the input's own trimmed key.
    Member { index: usize, key: String },
    /// Refused during COLLECT; never sent to the store.
    Rejected(Outcome),
}

/// A working-set member on its way to the store.
#[derive(Debug)]
struct Pending {
    index: usize,
    record: Entity,
}

/// COLLECT: validated, deduplicated working set.
#[derive(Debug)]
pub(crate) struct Collected {
    entity_type: EntityType,
    slots: Vec<Slot>,
    working: Vec<Entity>,
    /// Every accepted key as spelled by the caller, trimmed.
    spellings: BTreeSet<String>,
}

/// RESOLVE: working set plus the key resolution.
#[derive(Debug)]
pub(crate) struct Resolved {
    collected: Collected,
    resolution: Resolution,
}

/// PARTITION: records split into updates and creates.
#[derive(Debug)]
pub(crate) struct Partitioned {
    entity_type: EntityType,
    slots: Vec<Slot>,
    updates: Vec<Pending>,
    creates: Vec<Pending>,
    warnings: Vec<Vec<OutcomeWarning>>,
}

/// PERSIST: per-member results, ready to report.
#[derive(Debug)]
pub(crate) struct Persisted {
    slots: Vec<Slot>,
    results: Vec<Option<OutcomeKind>>,
    warnings: Vec<Vec<OutcomeWarning>>,
}

/// Checks one desired entity and strips store-managed fields.
fn admit(
    entity_type: &EntityType,
    entity: &mut Entity,
    config: &ReconcilerConfig,
) -> Result<(), FailureReason> {
    entity.natural_key = entity.natural_key.trim().to_string();
    if entity.natural_key.is_empty() {
        return Err(FailureReason::ValidationRejected {
            field: config.key_field.clone(),
            reason: "natural key is empty".to_string(),
        });
    }
    if entity.natural_key.chars().count() > config.max_key_length {
        return Err(FailureReason::ValidationRejected {
            field: config.key_field.clone(),
            reason: format!("natural key exceeds {} characters", config.max_key_length),
        });
    }
    if entity.entity_type != *entity_type {
        return Err(FailureReason::ValidationRejected {
            field: "entity_type".to_string(),
            reason: format!("expected {entity_type}, got {}", entity.entity_type),
        });
    }

    entity.surrogate_id = None;
    entity.created_at = None;
    entity.updated_at = None;
    Ok(())
}

impl Collected {
    /// Builds the working set. For duplicate keys the last input wins while
    /// keeping the position of the first.
    pub(crate) fn new(entity_type: EntityType, desired: Vec<Entity>, config: &ReconcilerConfig) -> Self {
        let mut slots = Vec::with_capacity(desired.len());
        let mut working: Vec<Entity> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut spellings = BTreeSet::new();

        for mut entity in desired {
            if let Err(reason) = admit(&entity_type, &mut entity, config) {
                debug!(key = %entity.natural_key, %reason, "rejected during collect");
                slots.push(Slot::Rejected(Outcome::failed(entity.natural_key, reason)));
                continue;
            }

            let key = entity.natural_key.clone();
            spellings.insert(key.clone());
            let index = match positions.entry(entity.normalized_key()) {
                Entry::Occupied(e) => {
                    let index = *e.get();
                    working[index] = entity;
                    index
                }
                Entry::Vacant(e) => {
                    e.insert(working.len());
                    working.push(entity);
                    working.len() - 1
                }
            };
            slots.push(Slot::Member { index, key });
        }

        debug!(
            %entity_type,
            inputs = slots.len(),
            working = working.len(),
            "collected working set"
        );
        Self {
            entity_type,
            slots,
            working,
            spellings,
        }
    }

    /// Distinct spellings of the working set's natural keys.
    ///
    /// Duplicates collapse to one working-set member, but the store may
    /// compare keys exactly, so every spelling is looked up.
    pub(crate) fn keys(&self) -> BTreeSet<String> {
        self.spellings.clone()
    }

    /// RESOLVE with one lookup for the whole working set.
    pub(crate) fn resolve<S: StoreClient + ?Sized>(
        self,
        resolver: &KeyResolver<'_, S>,
    ) -> ReconcileResult<Resolved> {
        let resolution = resolver.resolve(&self.entity_type, &self.keys())?;
        Ok(self.with_resolution(resolution))
    }

    /// RESOLVE with a resolution obtained earlier in the same pass.
    pub(crate) fn with_resolution(self, resolution: Resolution) -> Resolved {
        Resolved {
            collected: self,
            resolution,
        }
    }
}

impl Resolved {
    /// PARTITION into updates (id attached) and creates (no id).
    pub(crate) fn partition(self) -> Partitioned {
        let Collected {
            entity_type,
            slots,
            working,
            ..
        } = self.collected;
        let resolution = self.resolution;

        let mut updates = Vec::new();
        let mut creates = Vec::new();
        let mut warnings = vec![Vec::new(); working.len()];

        for (index, desired) in working.into_iter().enumerate() {
            match resolution.get(&desired.natural_key) {
                Some(id) => {
                    if let Some(candidates) = resolution.ambiguity(&desired.natural_key) {
                        warnings[index].push(OutcomeWarning::AmbiguousMatch { candidates });
                    }
                    updates.push(Pending {
                        index,
                        record: desired.merged_onto(id),
                    });
                }
                None => creates.push(Pending {
                    index,
                    record: desired,
                }),
            }
        }

        debug!(
            %entity_type,
            updates = updates.len(),
            creates = creates.len(),
            "partitioned working set"
        );
        Partitioned {
            entity_type,
            slots,
            updates,
            creates,
            warnings,
        }
    }
}

fn split(batch: Vec<Pending>) -> (Vec<usize>, Vec<Entity>) {
    batch.into_iter().map(|p| (p.index, p.record)).unzip()
}

/// Turns one batch response into per-member results.
fn apply_batch(
    results: &mut [Option<OutcomeKind>],
    indices: &[usize],
    batch: Result<Vec<RecordResult>, StorageError>,
    op: &'static str,
    on_ack: impl Fn(WriteAck) -> OutcomeKind,
) {
    let acks = match batch {
        Ok(acks) => acks,
        Err(err) => {
            warn!(op, records = indices.len(), error = %err, "batch failed");
            let reason = FailureReason::from(&err);
            for &index in indices {
                results[index] = Some(OutcomeKind::Failed(reason.clone()));
            }
            return;
        }
    };

    if acks.len() != indices.len() {
        warn!(
            op,
            expected = indices.len(),
            received = acks.len(),
            "store returned a mismatched result count"
        );
    }

    let mut acks = acks.into_iter();
    for &index in indices {
        let kind = match acks.next() {
            Some(Ok(ack)) => on_ack(ack),
            Some(Err(err)) => {
                debug!(op, error = %err, "record rejected");
                OutcomeKind::Failed(err.into())
            }
            None => OutcomeKind::Failed(FailureReason::StoreUnavailable {
                message: format!("store returned no result for this record ({op})"),
            }),
        };
        results[index] = Some(kind);
    }
}

impl Partitioned {
    /// PERSIST with at most one call per batch kind.
    pub(crate) fn persist<S: StoreClient + ?Sized>(
        self,
        store: &S,
        config: &ReconcilerConfig,
    ) -> Persisted {
        let Self {
            entity_type,
            slots,
            updates,
            creates,
            warnings,
        } = self;
        let mut results = vec![None; warnings.len()];

        let use_upsert = match config.persist_mode {
            PersistMode::Auto => store.supports_upsert(),
            PersistMode::Split => false,
            PersistMode::Upsert => true,
        };

        if use_upsert {
            let batch: Vec<Pending> = updates.into_iter().chain(creates).collect();
            if !batch.is_empty() {
                let (indices, records) = split(batch);
                let response = store.upsert_batch(&entity_type, &config.key_field, records);
                apply_batch(&mut results, &indices, response, "upsert", |ack| {
                    if ack.created {
                        OutcomeKind::Created(ack.id)
                    } else {
                        OutcomeKind::Updated(ack.id)
                    }
                });
            }
        } else {
            if !updates.is_empty() {
                let (indices, records) = split(updates);
                let response = store.update_batch(&entity_type, records);
                apply_batch(&mut results, &indices, response, "update", |ack| {
                    OutcomeKind::Updated(ack.id)
                });
            }
            if !creates.is_empty() {
                let (indices, records) = split(creates);
                let response = store.create_batch(&entity_type, records);
                apply_batch(&mut results, &indices, response, "create", |ack| {
                    OutcomeKind::Created(ack.id)
                });
            }
        }

        Persisted {
            slots,
            results,
            warnings,
        }
    }
}

impl Persisted {
    /// REPORT one outcome per input, in input order.
    pub(crate) fn report(self) -> Vec<Outcome> {
        let Self {
            slots,
            results,
            warnings,
        } = self;

        slots
            .into_iter()
            .map(|slot| match slot {
                Slot::Rejected(outcome) => outcome,
                Slot::Member { index, key } => {
                    let kind = results[index].clone().unwrap_or_else(|| {
                        OutcomeKind::Failed(FailureReason::StoreUnavailable {
                            message: "record was not submitted".to_string(),
                        })
                    });
                    Outcome::with_kind(key, kind).with_warnings(warnings[index].clone())
                }
            })
            .collect()
    }
}
