//! In-memory store backend.
//!
//! This module provides a thread-safe in-memory implementation of
//! [`StoreClient`]. It is intended for embedded usage, tests, and as a
//! reference implementation of the store contract: per-record validation,
//! batch-level failures, store-defined lookup order and call accounting.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::entity::{normalize_key, Entity, EntityType, SurrogateId};
use crate::storage::traits::{
    DeleteResult, RecordError, RecordResult, StorageError, StoreClient, WriteAck,
};
use crate::value::Value;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Store call kinds, used for fault injection and accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// [`StoreClient::find`]
    Find,
    /// [`StoreClient::create_batch`]
    Create,
    /// [`StoreClient::update_batch`]
    Update,
    /// [`StoreClient::upsert_batch`]
    Upsert,
    /// [`StoreClient::delete_batch`]
    Delete,
}

/// Number of calls received per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// `find` calls.
    pub finds: u64,
    /// `create_batch` calls.
    pub creates: u64,
    /// `update_batch` calls.
    pub updates: u64,
    /// `upsert_batch` calls.
    pub upserts: u64,
    /// `delete_batch` calls.
    pub deletes: u64,
}

impl StoreStats {
    /// Total number of batch write calls (excluding deletes).
    #[must_use]
    pub const fn writes(&self) -> u64 {
        self.creates + self.updates + self.upserts
    }

    fn record(&mut self, op: StoreOp) {
        match op {
            StoreOp::Find => self.finds += 1,
            StoreOp::Create => self.creates += 1,
            StoreOp::Update => self.updates += 1,
            StoreOp::Upsert => self.upserts += 1,
            StoreOp::Delete => self.deletes += 1,
        }
    }
}

/// Configuration for [`InMemoryStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryStoreConfig {
    /// Field name that `find` serves from the natural-key index.
    pub key_field: String,
    /// Whether `upsert_batch` is available.
    pub supports_upsert: bool,
    /// Largest accepted batch; `None` means unlimited.
    pub max_batch_size: Option<usize>,
    /// Reject creates whose natural key already exists.
    pub unique_keys: bool,
}

impl Default for InMemoryStoreConfig {
    fn default() -> Self {
        Self {
            key_field: "Name".to_string(),
            supports_upsert: false,
            max_batch_size: None,
            unique_keys: false,
        }
    }
}

#[derive(Debug)]
struct StoredRecord {
    seq: u64,
    entity: Entity,
}

#[derive(Debug, Default)]
struct Table {
    by_id: HashMap<SurrogateId, StoredRecord>,
    by_key: HashMap<String, BTreeSet<(u64, SurrogateId)>>,
}

impl Table {
    fn index(&mut self, seq: u64, entity: &Entity, id: SurrogateId) {
        self.by_key
            .entry(entity.normalized_key())
            .or_default()
            .insert((seq, id));
    }

    fn unindex(&mut self, seq: u64, key: &str, id: SurrogateId) {
        let key = normalize_key(key);
        if let Some(set) = self.by_key.get_mut(&key) {
            set.remove(&(seq, id));
            if set.is_empty() {
                self.by_key.remove(&key);
            }
        }
    }

    fn first_by_key(&self, key: &str) -> Option<SurrogateId> {
        self.by_key
            .get(&normalize_key(key))
            .and_then(|set| set.iter().next())
            .map(|(_, id)| *id)
    }
}

#[derive(Debug)]
struct RejectRule {
    field: String,
    value: Value,
    reason: String,
}

#[derive(Debug, Default)]
struct StoreState {
    tables: HashMap<EntityType, Table>,
    required: HashMap<EntityType, BTreeSet<String>>,
    reject_rules: HashMap<EntityType, Vec<RejectRule>>,
    next_seq: u64,
}

impl StoreState {
    fn validate(&self, entity_type: &EntityType, record: &Entity, key_field: &str) -> Result<(), RecordError> {
        if record.natural_key.trim().is_empty() {
            return Err(RecordError::ValidationRejected {
                field: key_field.to_string(),
                reason: "required field is missing".to_string(),
            });
        }

        if let Some(required) = self.required.get(entity_type) {
            for field in required {
                if record.attribute(field).map_or(true, Value::is_null) {
                    return Err(RecordError::ValidationRejected {
                        field: field.clone(),
                        reason: "required field is missing".to_string(),
                    });
                }
            }
        }

        if let Some(rules) = self.reject_rules.get(entity_type) {
            for rule in rules {
                if record.attribute(&rule.field) == Some(&rule.value) {
                    return Err(RecordError::ValidationRejected {
                        field: rule.field.clone(),
                        reason: rule.reason.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    fn insert(&mut self, entity_type: &EntityType, mut record: Entity) -> SurrogateId {
        let id = SurrogateId::new();
        let now = Utc::now();
        record.entity_type = entity_type.clone();
        record.surrogate_id = Some(id);
        record.created_at = Some(now);
        record.updated_at = Some(now);

        self.next_seq += 1;
        let seq = self.next_seq;
        let table = self.tables.entry(entity_type.clone()).or_default();
        table.index(seq, &record, id);
        table.by_id.insert(id, StoredRecord { seq, entity: record });
        id
    }

    fn overwrite(
        &mut self,
        entity_type: &EntityType,
        id: SurrogateId,
        record: Entity,
        key_field: &str,
    ) -> Result<(), RecordError> {
        let Some(table) = self.tables.get(entity_type) else {
            return Err(RecordError::NotFound(id));
        };
        let Some(stored) = table.by_id.get(&id) else {
            return Err(RecordError::NotFound(id));
        };

        let mut merged = stored.entity.clone();
        merged.natural_key = record.natural_key;
        merged.attributes.extend(record.attributes);
        self.validate(entity_type, &merged, key_field)?;
        merged.updated_at = Some(Utc::now());

        let table = self.tables.entry(entity_type.clone()).or_default();
        let Some(stored) = table.by_id.get_mut(&id) else {
            return Err(RecordError::NotFound(id));
        };
        let seq = stored.seq;
        let previous = std::mem::replace(&mut stored.entity, merged);
        if previous.normalized_key() != stored.entity.normalized_key() {
            let entity = stored.entity.clone();
            table.unindex(seq, &previous.natural_key, id);
            table.index(seq, &entity, id);
        }
        Ok(())
    }

    fn create_one(
        &mut self,
        entity_type: &EntityType,
        record: Entity,
        key_field: &str,
        unique_keys: bool,
    ) -> RecordResult {
        if record.is_persisted() {
            return Err(RecordError::Rejected(
                "cannot create a record that already has a surrogate id".to_string(),
            ));
        }
        self.validate(entity_type, &record, key_field)?;
        if unique_keys
            && self
                .tables
                .get(entity_type)
                .and_then(|t| t.first_by_key(&record.natural_key))
                .is_some()
        {
            return Err(RecordError::DuplicateKey(record.natural_key));
        }
        Ok(WriteAck::created(self.insert(entity_type, record)))
    }

    fn update_one(&mut self, entity_type: &EntityType, record: Entity, key_field: &str) -> RecordResult {
        let Some(id) = record.surrogate_id else {
            return Err(RecordError::Rejected(
                "cannot update a record without a surrogate id".to_string(),
            ));
        };
        self.overwrite(entity_type, id, record, key_field)?;
        Ok(WriteAck::updated(id))
    }
}

#[derive(Debug)]
struct Control {
    available: bool,
    fail_next: HashSet<StoreOp>,
    stats: StoreStats,
}

impl Default for Control {
    fn default() -> Self {
        Self {
            available: true,
            fail_next: HashSet::new(),
            stats: StoreStats::default(),
        }
    }
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    config: InMemoryStoreConfig,
    state: RwLock<StoreState>,
    control: Mutex<Control>,
}

impl InMemoryStore {
    /// Create a new empty store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty store with the given configuration.
    #[must_use]
    pub fn with_config(config: InMemoryStoreConfig) -> Self {
        Self {
            config,
            state: RwLock::default(),
            control: Mutex::default(),
        }
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &InMemoryStoreConfig {
        &self.config
    }

    /// Require `field` to be present and non-null on every written record of
    /// `entity_type`.
    pub fn require_field(&self, entity_type: EntityType, field: impl Into<String>) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("store.require_field"))?;
        state.required.entry(entity_type).or_default().insert(field.into());
        Ok(())
    }

    /// Reject records of `entity_type` whose `field` equals `value`.
    pub fn reject_when(
        &self,
        entity_type: EntityType,
        field: impl Into<String>,
        value: impl Into<Value>,
        reason: impl Into<String>,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("store.reject_when"))?;
        state.reject_rules.entry(entity_type).or_default().push(RejectRule {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        });
        Ok(())
    }

    /// Make every subsequent call fail with [`StorageError::Unavailable`]
    /// (or succeed again).
    pub fn set_available(&self, available: bool) -> Result<(), StorageError> {
        let mut control = self.control.lock().map_err(|_| lock_err("store.set_available"))?;
        control.available = available;
        Ok(())
    }

    /// Fail the next call of `op` with [`StorageError::Unavailable`].
    pub fn fail_next(&self, op: StoreOp) -> Result<(), StorageError> {
        let mut control = self.control.lock().map_err(|_| lock_err("store.fail_next"))?;
        control.fail_next.insert(op);
        Ok(())
    }

    /// Returns call counts received so far.
    pub fn stats(&self) -> Result<StoreStats, StorageError> {
        let control = self.control.lock().map_err(|_| lock_err("store.stats"))?;
        Ok(control.stats)
    }

    /// Get a record by id.
    pub fn get(&self, entity_type: &EntityType, id: SurrogateId) -> Result<Option<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("store.get"))?;
        Ok(state
            .tables
            .get(entity_type)
            .and_then(|t| t.by_id.get(&id))
            .map(|r| r.entity.clone()))
    }

    /// All records of a type in store order.
    pub fn records(&self, entity_type: &EntityType) -> Result<Vec<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("store.records"))?;
        let Some(table) = state.tables.get(entity_type) else {
            return Ok(Vec::new());
        };
        let mut records: Vec<&StoredRecord> = table.by_id.values().collect();
        records.sort_by_key(|r| r.seq);
        Ok(records.into_iter().map(|r| r.entity.clone()).collect())
    }

    /// Number of records of a type.
    pub fn count(&self, entity_type: &EntityType) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("store.count"))?;
        Ok(state.tables.get(entity_type).map_or(0, |t| t.by_id.len()))
    }

    /// Accounts for a call and applies injected faults.
    fn enter(&self, op: StoreOp, batch_size: Option<usize>) -> Result<(), StorageError> {
        let mut control = self.control.lock().map_err(|_| lock_err("store.enter"))?;
        control.stats.record(op);

        if !control.available {
            return Err(StorageError::Unavailable("store is offline".to_string()));
        }
        if control.fail_next.remove(&op) {
            return Err(StorageError::Unavailable(format!("injected {op:?} failure")));
        }
        if let (Some(size), Some(max)) = (batch_size, self.config.max_batch_size) {
            if size > max {
                return Err(StorageError::BatchTooLarge { size, max });
            }
        }
        Ok(())
    }

    fn is_key_field(&self, field: &str) -> bool {
        field.eq_ignore_ascii_case(&self.config.key_field)
    }
}

impl StoreClient for InMemoryStore {
    fn find(
        &self,
        entity_type: &EntityType,
        field: &str,
        values: &[String],
    ) -> Result<Vec<Entity>, StorageError> {
        self.enter(StoreOp::Find, None)?;
        // Natural keys live outside `attributes`; any other field would
        // silently match nothing.
        if !self.is_key_field(field) {
            return Err(StorageError::BackendError(format!(
                "lookup field '{field}' is not indexed"
            )));
        }
        let state = self.state.read().map_err(|_| lock_err("store.find"))?;
        let Some(table) = state.tables.get(entity_type) else {
            return Ok(Vec::new());
        };

        let wanted: HashSet<String> = values.iter().map(|v| normalize_key(v)).collect();
        let mut hits: Vec<&StoredRecord> = wanted
            .iter()
            .filter_map(|key| table.by_key.get(key))
            .flatten()
            .filter_map(|(_, id)| table.by_id.get(id))
            .collect();

        hits.sort_by_key(|r| r.seq);
        Ok(hits.into_iter().map(|r| r.entity.clone()).collect())
    }

    fn create_batch(
        &self,
        entity_type: &EntityType,
        records: Vec<Entity>,
    ) -> Result<Vec<RecordResult>, StorageError> {
        self.enter(StoreOp::Create, Some(records.len()))?;
        let mut state = self.state.write().map_err(|_| lock_err("store.create_batch"))?;
        Ok(records
            .into_iter()
            .map(|record| {
                state.create_one(entity_type, record, &self.config.key_field, self.config.unique_keys)
            })
            .collect())
    }

    fn update_batch(
        &self,
        entity_type: &EntityType,
        records: Vec<Entity>,
    ) -> Result<Vec<RecordResult>, StorageError> {
        self.enter(StoreOp::Update, Some(records.len()))?;
        let mut state = self.state.write().map_err(|_| lock_err("store.update_batch"))?;
        Ok(records
            .into_iter()
            .map(|record| state.update_one(entity_type, record, &self.config.key_field))
            .collect())
    }

    fn supports_upsert(&self) -> bool {
        self.config.supports_upsert
    }

    fn upsert_batch(
        &self,
        entity_type: &EntityType,
        key_field: &str,
        records: Vec<Entity>,
    ) -> Result<Vec<RecordResult>, StorageError> {
        self.enter(StoreOp::Upsert, Some(records.len()))?;
        if !self.config.supports_upsert {
            return Err(StorageError::Unsupported("upsert_batch"));
        }
        if !self.is_key_field(key_field) {
            return Err(StorageError::BackendError(format!(
                "upsert key field '{key_field}' is not indexed"
            )));
        }
        let mut state = self.state.write().map_err(|_| lock_err("store.upsert_batch"))?;
        Ok(records
            .into_iter()
            .map(|mut record| {
                if record.surrogate_id.is_none() {
                    record.surrogate_id = state
                        .tables
                        .get(entity_type)
                        .and_then(|t| t.first_by_key(&record.natural_key));
                }
                if record.is_persisted() {
                    state.update_one(entity_type, record, &self.config.key_field)
                } else {
                    state.create_one(entity_type, record, &self.config.key_field, false)
                }
            })
            .collect())
    }

    fn delete_batch(
        &self,
        entity_type: &EntityType,
        ids: &[SurrogateId],
    ) -> Result<Vec<DeleteResult>, StorageError> {
        self.enter(StoreOp::Delete, Some(ids.len()))?;
        let mut state = self.state.write().map_err(|_| lock_err("store.delete_batch"))?;
        let table = state.tables.entry(entity_type.clone()).or_default();
        Ok(ids
            .iter()
            .map(|id| -> DeleteResult {
                let stored = table.by_id.remove(id).ok_or(RecordError::NotFound(*id))?;
                table.unindex(stored.seq, &stored.entity.natural_key, *id);
                Ok(())
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(name: &str) -> Entity {
        Entity::new(EntityType::Account, name)
    }

    fn created_id(result: &RecordResult) -> SurrogateId {
        let ack = result.as_ref().unwrap();
        assert!(ack.created);
        ack.id
    }

    #[test]
    fn create_find_update_delete_and_key_index() {
        let store = InMemoryStore::new();

        let results = store
            .create_batch(&EntityType::Account, vec![account("Acme Corp").with_attribute("Industry", "Tech")])
            .unwrap();
        let id = created_id(&results[0]);

        let stored = store.get(&EntityType::Account, id).unwrap().unwrap();
        assert_eq!(stored.surrogate_id, Some(id));
        assert!(stored.created_at.is_some());

        // Key lookup is normalized.
        let found = store
            .find(&EntityType::Account, "Name", &["  acme corp ".to_string()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].surrogate_id, Some(id));

        // Only the key field is indexed.
        let err = store
            .find(&EntityType::Account, "Industry", &["tech".to_string()])
            .unwrap_err();
        assert!(matches!(err, StorageError::BackendError(msg) if msg.contains("Industry")));

        // Update overwrites supplied attributes and reindexes the key.
        let update = account("Acme Inc").with_attribute("Industry", "Finance").with_surrogate_id(id);
        let results = store.update_batch(&EntityType::Account, vec![update]).unwrap();
        assert_eq!(results[0], Ok(WriteAck::updated(id)));
        assert!(store
            .find(&EntityType::Account, "Name", &["acme corp".to_string()])
            .unwrap()
            .is_empty());
        let renamed = store
            .find(&EntityType::Account, "Name", &["acme inc".to_string()])
            .unwrap();
        assert_eq!(renamed[0].attribute("Industry"), Some(&Value::from("Finance")));

        // Delete removes from indexes.
        let results = store.delete_batch(&EntityType::Account, &[id]).unwrap();
        assert_eq!(results, vec![Ok(())]);
        assert!(store.get(&EntityType::Account, id).unwrap().is_none());
        let results = store.delete_batch(&EntityType::Account, &[id]).unwrap();
        assert_eq!(results, vec![Err(RecordError::NotFound(id))]);
    }

    #[test]
    fn find_returns_duplicates_in_creation_order() {
        let store = InMemoryStore::new();
        let first = store.create_batch(&EntityType::Account, vec![account("Acme")]).unwrap();
        let second = store.create_batch(&EntityType::Account, vec![account("ACME")]).unwrap();

        let found = store.find(&EntityType::Account, "name", &["acme".to_string()]).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].surrogate_id, Some(created_id(&first[0])));
        assert_eq!(found[1].surrogate_id, Some(created_id(&second[0])));
    }

    #[test]
    fn record_level_validation_is_isolated() {
        let store = InMemoryStore::new();
        store.require_field(EntityType::Contact, "LastName").unwrap();

        let results = store
            .create_batch(
                &EntityType::Contact,
                vec![
                    Entity::new(EntityType::Contact, "Jane Doe").with_attribute("LastName", "Doe"),
                    Entity::new(EntityType::Contact, "Nobody"),
                    Entity::new(EntityType::Contact, "John Doe").with_attribute("LastName", "Doe"),
                ],
            )
            .unwrap();

        assert!(results[0].is_ok());
        assert!(matches!(
            &results[1],
            Err(RecordError::ValidationRejected { field, .. }) if field == "LastName"
        ));
        assert!(results[2].is_ok());
        assert_eq!(store.count(&EntityType::Contact).unwrap(), 2);
    }

    #[test]
    fn reject_rules_apply_to_updates() {
        let store = InMemoryStore::new();
        store
            .reject_when(EntityType::Account, "Industry", "Banned", "industry not allowed")
            .unwrap();

        let id = created_id(&store.create_batch(&EntityType::Account, vec![account("Acme")]).unwrap()[0]);
        let results = store
            .update_batch(
                &EntityType::Account,
                vec![account("Acme").with_attribute("Industry", "Banned").with_surrogate_id(id)],
            )
            .unwrap();
        assert!(matches!(results[0], Err(RecordError::ValidationRejected { .. })));

        let stored = store.get(&EntityType::Account, id).unwrap().unwrap();
        assert!(stored.attribute("Industry").is_none());
    }

    #[test]
    fn update_of_unknown_id_is_not_found() {
        let store = InMemoryStore::new();
        let missing = SurrogateId::new();
        let results = store
            .update_batch(&EntityType::Account, vec![account("Ghost").with_surrogate_id(missing)])
            .unwrap();
        assert_eq!(results, vec![Err(RecordError::NotFound(missing))]);
    }

    #[test]
    fn unique_keys_reject_duplicate_creates() {
        let store = InMemoryStore::with_config(InMemoryStoreConfig {
            unique_keys: true,
            ..InMemoryStoreConfig::default()
        });
        store.create_batch(&EntityType::Account, vec![account("Acme")]).unwrap();
        let results = store.create_batch(&EntityType::Account, vec![account("acme")]).unwrap();
        assert_eq!(results, vec![Err(RecordError::DuplicateKey("acme".to_string()))]);
    }

    #[test]
    fn upsert_matches_by_key_or_creates() {
        let store = InMemoryStore::with_config(InMemoryStoreConfig {
            supports_upsert: true,
            ..InMemoryStoreConfig::default()
        });
        let id = created_id(&store.create_batch(&EntityType::Account, vec![account("Acme")]).unwrap()[0]);

        let results = store
            .upsert_batch(&EntityType::Account, "Name", vec![account("acme"), account("Globex")])
            .unwrap();
        assert_eq!(results[0], Ok(WriteAck::updated(id)));
        assert!(results[1].as_ref().unwrap().created);
        assert_eq!(store.count(&EntityType::Account).unwrap(), 2);
    }

    #[test]
    fn upsert_requires_support() {
        let store = InMemoryStore::new();
        assert!(!store.supports_upsert());
        assert_eq!(
            store.upsert_batch(&EntityType::Account, "Name", vec![account("Acme")]),
            Err(StorageError::Unsupported("upsert_batch"))
        );
    }

    #[test]
    fn faults_and_batch_limits_fail_the_whole_call() {
        let store = InMemoryStore::with_config(InMemoryStoreConfig {
            max_batch_size: Some(2),
            ..InMemoryStoreConfig::default()
        });

        let err = store
            .create_batch(&EntityType::Account, vec![account("A"), account("B"), account("C")])
            .unwrap_err();
        assert_eq!(err, StorageError::BatchTooLarge { size: 3, max: 2 });

        store.fail_next(StoreOp::Find).unwrap();
        assert!(matches!(
            store.find(&EntityType::Account, "Name", &["A".to_string()]),
            Err(StorageError::Unavailable(_))
        ));
        assert!(store.find(&EntityType::Account, "Name", &["A".to_string()]).is_ok());

        store.set_available(false).unwrap();
        assert!(matches!(
            store.create_batch(&EntityType::Account, vec![account("A")]),
            Err(StorageError::Unavailable(_))
        ));
        store.set_available(true).unwrap();
        assert_eq!(store.count(&EntityType::Account).unwrap(), 0);
    }

    #[test]
    fn stats_count_calls() {
        let store = InMemoryStore::new();
        store.find(&EntityType::Account, "Name", &[]).unwrap();
        store.create_batch(&EntityType::Account, vec![account("A")]).unwrap();
        store.update_batch(&EntityType::Account, Vec::new()).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.finds, 1);
        assert_eq!(stats.creates, 1);
        assert_eq!(stats.updates, 1);
        assert_eq!(stats.writes(), 2);
    }
}
