//! Natural-key resolution.
//!
//! Maps a set of natural keys to the surrogate ids of existing records using
//! a single store lookup per entity type. Keys are compared in normalized
//! form, so `"Acme"` and `" acme "` resolve to the same record.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::entity::{normalize_key, EntityType, SurrogateId};
use crate::error::ReconcileResult;
use crate::storage::StoreClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Match {
    id: SurrogateId,
    candidates: usize,
}

/// Result of resolving a set of natural keys.
///
/// Every requested key has an entry: `Some(id)` when a record exists,
/// `None` when one must be created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    entries: BTreeMap<String, Option<Match>>,
}

impl Resolution {
    /// Returns the surrogate id `key` resolved to, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<SurrogateId> {
        self.entries
            .get(&normalize_key(key))
            .copied()
            .flatten()
            .map(|m| m.id)
    }

    /// Number of matching records when the lookup for `key` was ambiguous.
    #[must_use]
    pub fn ambiguity(&self, key: &str) -> Option<usize> {
        self.entries
            .get(&normalize_key(key))
            .copied()
            .flatten()
            .filter(|m| m.candidates > 1)
            .map(|m| m.candidates)
    }

    /// Normalized keys with no existing record.
    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, m)| m.is_none())
            .map(|(k, _)| k.as_str())
    }

    /// Normalized keys and their resolved ids.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<SurrogateId>)> {
        self.entries
            .iter()
            .map(|(k, m)| (k.as_str(), m.map(|m| m.id)))
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no key was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves natural keys against a store.
///
/// # Example
/// ```rust,ignore
/// let resolver = KeyResolver::new(store.as_ref(), "Name");
/// let resolution = resolver.resolve(&EntityType::Account, &keys)?;
/// let acme = resolution.get("Acme");
/// ```
#[derive(Debug)]
pub struct KeyResolver<'a, S: StoreClient + ?Sized> {
    store: &'a S,
    key_field: &'a str,
}

impl<'a, S: StoreClient + ?Sized> KeyResolver<'a, S> {
    /// Creates a resolver looking keys up on `key_field`.
    pub const fn new(store: &'a S, key_field: &'a str) -> Self {
        Self { store, key_field }
    }

    /// Resolve `keys` for `entity_type` with exactly one store lookup.
    ///
    /// The store is queried with the trimmed keys as the caller spelled
    /// them; matching the returned records back to keys is done on the
    /// normalized form, so spellings that differ only in case share one
    /// entry. An empty key set resolves to an empty mapping without
    /// touching the store. When several records match a key, the first in
    /// store order wins and the key is flagged as ambiguous.
    ///
    /// # Errors
    /// Returns `ReconcileError::StoreUnavailable` if the lookup fails; no
    /// partial resolution is produced.
    #[tracing::instrument(skip_all, fields(entity_type = %entity_type, keys = keys.len()))]
    pub fn resolve(
        &self,
        entity_type: &EntityType,
        keys: &BTreeSet<String>,
    ) -> ReconcileResult<Resolution> {
        let spellings: BTreeSet<&str> = keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();
        if spellings.is_empty() {
            return Ok(Resolution::default());
        }

        let mut entries: BTreeMap<String, Option<Match>> = spellings
            .iter()
            .map(|k| (normalize_key(k), None))
            .collect();
        let values: Vec<String> = spellings.into_iter().map(str::to_string).collect();
        let records = self.store.find(entity_type, self.key_field, &values)?;
        debug!(values = values.len(), records = records.len(), "lookup returned");

        for record in records {
            let Some(id) = record.surrogate_id else {
                warn!(key = %record.natural_key, "lookup returned a record without a surrogate id");
                continue;
            };
            let Some(slot) = entries.get_mut(&record.normalized_key()) else {
                warn!(key = %record.natural_key, "lookup returned a record for an unrequested key");
                continue;
            };
            slot.get_or_insert(Match { id, candidates: 0 }).candidates += 1;
        }

        for (key, m) in &entries {
            if let Some(m) = m.filter(|m| m.candidates > 1) {
                warn!(key = %key, candidates = m.candidates, chosen = %m.id, "ambiguous natural key");
            }
        }

        let resolution = Resolution { entries };
        debug!(
            keys = resolution.len(),
            missing = resolution.missing().count(),
            "keys resolved"
        );
        Ok(resolution)
    }
}

#[cfg(test)]
impl Resolution {
    /// Builds a resolution directly from (key, id) pairs.
    pub(crate) fn from_pairs<'k>(pairs: impl IntoIterator<Item = (&'k str, Option<SurrogateId>)>) -> Self {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, id)| (normalize_key(k), id.map(|id| Match { id, candidates: 1 })))
                .collect(),
        }
    }
}
