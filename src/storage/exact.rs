//! Store double that compares natural keys byte for byte, like a
//! case-sensitive column. Records every lookup it receives.

use std::sync::Mutex;

use crate::entity::{Entity, EntityType, SurrogateId};
use crate::storage::traits::{
    DeleteResult, RecordError, RecordResult, StorageError, StoreClient, WriteAck,
};

#[derive(Debug, Default)]
pub(crate) struct ExactStore {
    rows: Mutex<Vec<Entity>>,
    lookups: Mutex<Vec<Vec<String>>>,
}

impl ExactStore {
    pub(crate) fn rows(&self, entity_type: &EntityType) -> Vec<Entity> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| &r.entity_type == entity_type)
            .cloned()
            .collect()
    }

    /// Values passed to each `find`, in call order.
    pub(crate) fn lookups(&self) -> Vec<Vec<String>> {
        self.lookups.lock().unwrap().clone()
    }
}

impl StoreClient for ExactStore {
    fn find(&self, entity_type: &EntityType, _: &str, values: &[String]) -> Result<Vec<Entity>, StorageError> {
        self.lookups.lock().unwrap().push(values.to_vec());
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| &r.entity_type == entity_type && values.contains(&r.natural_key))
            .cloned()
            .collect())
    }

    fn create_batch(&self, entity_type: &EntityType, records: Vec<Entity>) -> Result<Vec<RecordResult>, StorageError> {
        let mut rows = self.rows.lock().unwrap();
        Ok(records
            .into_iter()
            .map(|mut record| {
                let id = SurrogateId::new();
                record.entity_type = entity_type.clone();
                record.surrogate_id = Some(id);
                rows.push(record);
                Ok(WriteAck::created(id))
            })
            .collect())
    }

    fn update_batch(&self, _: &EntityType, records: Vec<Entity>) -> Result<Vec<RecordResult>, StorageError> {
        let mut rows = self.rows.lock().unwrap();
        Ok(records
            .into_iter()
            .map(|record| -> RecordResult {
                let id = record
                    .surrogate_id
                    .ok_or_else(|| RecordError::Rejected("missing id".to_string()))?;
                let row = rows
                    .iter_mut()
                    .find(|r| r.surrogate_id == Some(id))
                    .ok_or(RecordError::NotFound(id))?;
                row.natural_key = record.natural_key;
                row.attributes.extend(record.attributes);
                Ok(WriteAck::updated(id))
            })
            .collect())
    }

    fn delete_batch(&self, _: &EntityType, ids: &[SurrogateId]) -> Result<Vec<DeleteResult>, StorageError> {
        let mut rows = self.rows.lock().unwrap();
        Ok(ids
            .iter()
            .map(|id| {
                let before = rows.len();
                rows.retain(|r| r.surrogate_id != Some(*id));
                if rows.len() < before {
                    Ok(())
                } else {
                    Err(RecordError::NotFound(*id))
                }
            })
            .collect())
    }
}
