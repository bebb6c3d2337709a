//! One-hop parent/child linking.
//!
//! Children reference their parent by the parent's natural key. Before any
//! child is written, the linker resolves every referenced parent, creates the
//! missing ones in a sub-pass, and stamps each child with its parent's
//! surrogate id. A child whose parent has no id is never written.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::pass::Collected;
use crate::engine::Reconciler;
use crate::entity::{normalize_key, Entity, EntityType, SurrogateId};
use crate::error::{ReconcileError, ReconcileResult};
use crate::outcome::{FailureReason, Outcome, OutcomeKind};
use crate::storage::StoreClient;

/// Describes the parent side of a child relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    /// Entity type of the parent.
    pub parent_type: EntityType,
    /// Child field that receives the parent's surrogate id.
    pub parent_field: String,
}

impl ParentLink {
    /// Creates a link to `parent_type` stored in `parent_field`.
    #[must_use]
    pub fn new(parent_type: EntityType, parent_field: impl Into<String>) -> Self {
        Self {
            parent_type,
            parent_field: parent_field.into(),
        }
    }
}

/// A child stamped with its parent reference.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedChild {
    /// Position in the input list.
    pub index: usize,
    /// The child, carrying the parent's id.
    pub entity: Entity,
}

/// A child whose parent has no surrogate id.
#[derive(Debug, Clone, PartialEq)]
pub struct UnlinkedChild {
    /// Position in the input list.
    pub index: usize,
    /// The child, unchanged.
    pub entity: Entity,
    /// Why no parent id is available.
    pub reason: FailureReason,
}

/// Result of linking children to their parents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkedChildren {
    /// Children ready to be written.
    pub linked: Vec<LinkedChild>,
    /// Children that must not be written.
    pub unlinked: Vec<UnlinkedChild>,
    /// Outcomes of the parent-creation sub-pass, one per missing parent.
    pub parent_outcomes: Vec<Outcome>,
}

impl LinkedChildren {
    /// Returns true if every child received a parent reference.
    #[must_use]
    pub fn is_fully_linked(&self) -> bool {
        self.unlinked.is_empty()
    }

    /// The linked children, in input order.
    #[must_use]
    pub fn into_entities(self) -> Vec<Entity> {
        self.linked.into_iter().map(|c| c.entity).collect()
    }
}

/// Child outcomes of a two-level reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildReconciliation {
    /// One outcome per input child, in input order.
    pub outcomes: Vec<Outcome>,
    /// Outcomes of the parent-creation sub-pass.
    pub parent_outcomes: Vec<Outcome>,
}

/// Resolves and, where needed, creates the parents of a set of children.
pub struct RelationshipLinker<'a, S: StoreClient + ?Sized> {
    reconciler: &'a Reconciler<S>,
    link: &'a ParentLink,
}

impl<'a, S: StoreClient + ?Sized> RelationshipLinker<'a, S> {
    /// Creates a linker that writes parents through `reconciler`.
    pub const fn new(reconciler: &'a Reconciler<S>, link: &'a ParentLink) -> Self {
        Self { reconciler, link }
    }

    /// Link `children` to the parents named by `parent_key_of`.
    ///
    /// Parent keys are resolved with one lookup. Missing parents are created
    /// once each, from their natural key alone, before this returns.
    ///
    /// # Errors
    /// - `StoreUnavailable` if the parent lookup fails
    /// - `PassInProgress` if a pass for the parent type is running
    #[tracing::instrument(
        skip_all,
        fields(parent_type = %self.link.parent_type, children = children.len())
    )]
    pub fn link<F>(&self, children: Vec<Entity>, parent_key_of: F) -> ReconcileResult<LinkedChildren>
    where
        F: Fn(&Entity) -> String,
    {
        let link = self.link;
        let _guard = self.reconciler.begin_pass(&link.parent_type)?;

        let derived: Vec<String> = children
            .iter()
            .map(|child| parent_key_of(child).trim().to_string())
            .collect();

        // A new parent takes the first spelling seen; every spelling is looked up.
        let mut spellings: BTreeMap<String, String> = BTreeMap::new();
        for key in derived.iter().filter(|k| !k.is_empty()) {
            spellings
                .entry(normalize_key(key))
                .or_insert_with(|| key.clone());
        }
        let keys: BTreeSet<String> = derived.iter().filter(|k| !k.is_empty()).cloned().collect();
        let resolution = self.reconciler.resolver().resolve(&link.parent_type, &keys)?;

        let new_parents: Vec<Entity> = resolution
            .missing()
            .filter_map(|normalized| spellings.get(normalized))
            .map(|key| Entity::new(link.parent_type.clone(), key.clone()))
            .collect();

        let parent_outcomes = if new_parents.is_empty() {
            Vec::new()
        } else {
            debug!(parents = new_parents.len(), "creating missing parents");
            let collected = Collected::new(
                link.parent_type.clone(),
                new_parents,
                self.reconciler.config(),
            );
            self.reconciler
                .complete(collected.with_resolution(resolution.clone()))
        };

        let mut parent_ids: HashMap<String, Result<SurrogateId, FailureReason>> = resolution
            .iter()
            .filter_map(|(key, id)| id.map(|id| (key.to_string(), Ok(id))))
            .collect();
        for outcome in &parent_outcomes {
            let entry = match &outcome.kind {
                OutcomeKind::Created(id) | OutcomeKind::Updated(id) => Ok(*id),
                OutcomeKind::Failed(reason) => Err(reason.clone()),
            };
            parent_ids.insert(normalize_key(&outcome.natural_key), entry);
        }

        let mut linked = Vec::new();
        let mut unlinked = Vec::new();
        for (index, (mut child, parent_key)) in children.into_iter().zip(derived).enumerate() {
            let parent = if parent_key.is_empty() {
                Err("parent key is empty".to_string())
            } else {
                match parent_ids.get(&normalize_key(&parent_key)) {
                    Some(Ok(id)) => Ok(*id),
                    Some(Err(reason)) => Err(reason.to_string()),
                    None => Err("parent was not resolved".to_string()),
                }
            };

            match parent {
                Ok(id) => {
                    child.set_attribute(link.parent_field.clone(), id);
                    linked.push(LinkedChild {
                        index,
                        entity: child,
                    });
                }
                Err(reason) => {
                    warn!(child = %child.natural_key, parent = %parent_key, %reason, "child left unlinked");
                    unlinked.push(UnlinkedChild {
                        index,
                        entity: child,
                        reason: FailureReason::ParentUnresolved { parent_key, reason },
                    });
                }
            }
        }

        info!(
            linked = linked.len(),
            unlinked = unlinked.len(),
            parents_created = parent_outcomes.iter().filter(|o| o.is_created()).count(),
            "children linked"
        );
        Ok(LinkedChildren {
            linked,
            unlinked,
            parent_outcomes,
        })
    }
}

impl<S: StoreClient + ?Sized> Reconciler<S> {
    /// Link `children` to their parents, creating missing parents first.
    ///
    /// See [`RelationshipLinker::link`].
    ///
    /// # Errors
    /// Propagates parent lookup failures.
    pub fn link<F>(
        &self,
        children: Vec<Entity>,
        link: &ParentLink,
        parent_key_of: F,
    ) -> ReconcileResult<LinkedChildren>
    where
        F: Fn(&Entity) -> String,
    {
        RelationshipLinker::new(self, link).link(children, parent_key_of)
    }

    /// Link `children` to their parents, then reconcile the linked children.
    ///
    /// Unlinked children are reported as `Failed(ParentUnresolved)` and are
    /// never sent to the store.
    ///
    /// # Errors
    /// Propagates parent or child lookup failures. Parents created before a
    /// failed child lookup stay created.
    pub fn reconcile_children<F>(
        &self,
        child_type: EntityType,
        children: Vec<Entity>,
        link: &ParentLink,
        parent_key_of: F,
    ) -> ReconcileResult<ChildReconciliation>
    where
        F: Fn(&Entity) -> String,
    {
        let total = children.len();
        let LinkedChildren {
            linked,
            unlinked,
            parent_outcomes,
        } = self.link(children, link, parent_key_of)?;

        let (indices, entities): (Vec<usize>, Vec<Entity>) =
            linked.into_iter().map(|c| (c.index, c.entity)).unzip();
        let child_outcomes = self.reconcile(child_type, entities)?;

        let mut slots: Vec<Option<Outcome>> = vec![None; total];
        for (index, outcome) in indices.into_iter().zip(child_outcomes) {
            slots[index] = Some(outcome);
        }
        for child in unlinked {
            slots[child.index] = Some(Outcome::failed(child.entity.natural_key, child.reason));
        }

        let outcomes = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ReconcileError::internal("child outcome missing after linking"))?;
        Ok(ChildReconciliation {
            outcomes,
            parent_outcomes,
        })
    }
}
