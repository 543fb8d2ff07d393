use std::collections::HashMap;
use std::sync::Arc;

use fieldsync_core::{EntityRecord, EntityType, FieldKey, FieldValue, RecordId, Timestamp};

/// In-memory mirror of fetched rows: entity type -> id -> record.
///
/// Records are held behind `Arc` and every write swaps in a whole new record,
/// so a reader holding a record never sees a half-applied update.
#[derive(Debug, Default)]
pub struct EntityCache {
    tables: HashMap<EntityType, HashMap<RecordId, Arc<EntityRecord>>>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entity_type: &EntityType, id: &RecordId) -> Option<Arc<EntityRecord>> {
        self.tables.get(entity_type)?.get(id).cloned()
    }

    pub fn field(&self, key: &FieldKey) -> Option<FieldValue> {
        self.tables
            .get(&key.entity_type)?
            .get(&key.record_id)?
            .get(&key.field)
            .cloned()
    }

    pub fn contains(&self, entity_type: &EntityType, id: &RecordId) -> bool {
        self.tables
            .get(entity_type)
            .is_some_and(|table| table.contains_key(id))
    }

    /// All cached records of one type, ordered by id.
    pub fn records_of(&self, entity_type: &EntityType) -> Vec<Arc<EntityRecord>> {
        let mut records: Vec<_> = self
            .tables
            .get(entity_type)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn len(&self) -> usize {
        self.tables.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the whole table for `entity_type` with a fresh fetch.
    pub fn set_entities(&mut self, entity_type: EntityType, records: Vec<EntityRecord>) {
        let table = records
            .into_iter()
            .map(|record| (record.id.clone(), Arc::new(record)))
            .collect();
        self.tables.insert(entity_type, table);
    }

    /// Insert or replace one record as-is.
    pub fn put(&mut self, entity_type: &EntityType, record: EntityRecord) {
        self.tables
            .entry(entity_type.clone())
            .or_default()
            .insert(record.id.clone(), Arc::new(record));
    }

    pub fn delete(&mut self, entity_type: &EntityType, id: &RecordId) -> Option<Arc<EntityRecord>> {
        self.tables.get_mut(entity_type)?.remove(id)
    }

    /// Local edit: set `fields` and move `updated_at` forward to `now`.
    /// Returns false when the record isn't cached.
    pub fn apply_local<I>(&mut self, entity_type: &EntityType, id: &RecordId, fields: I, now: Timestamp) -> bool
    where
        I: IntoIterator<Item = (String, FieldValue)>,
    {
        self.modify(entity_type, id, |record| {
            record.fields.extend(fields);
            record.updated_at = now.after(record.updated_at);
        })
    }

    /// Put back pre-edit values; `None` removes the field. `updated_at` is left
    /// alone since it may only move forward.
    pub fn restore<I>(&mut self, entity_type: &EntityType, id: &RecordId, previous: I) -> bool
    where
        I: IntoIterator<Item = (String, Option<FieldValue>)>,
    {
        self.modify(entity_type, id, |record| {
            for (field, value) in previous {
                match value {
                    Some(value) => record.fields.insert(field, value),
                    None => record.fields.remove(&field),
                };
            }
        })
    }

    /// Set a single field without touching `updated_at`. Used for remote
    /// values that were held back while the field had focus.
    pub fn set_field(&mut self, key: &FieldKey, value: FieldValue) -> bool {
        self.modify(&key.entity_type, &key.record_id, |record| {
            record.fields.insert(key.field.clone(), value);
        })
    }

    fn modify(&mut self, entity_type: &EntityType, id: &RecordId, f: impl FnOnce(&mut EntityRecord)) -> bool {
        let Some(slot) = self.tables.get_mut(entity_type).and_then(|t| t.get_mut(id)) else {
            return false;
        };
        // Clones when a reader still holds the old snapshot.
        f(Arc::make_mut(slot));
        true
    }
}
