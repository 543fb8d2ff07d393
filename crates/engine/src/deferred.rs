use std::collections::HashMap;

use fieldsync_core::{EntityType, FieldKey, FieldValue, RecordId};

/// Remote values held back because their field had focus when they arrived.
/// One slot per field; a newer value replaces an unconsumed older one.
#[derive(Debug, Default)]
pub struct DeferredUpdates {
    values: HashMap<FieldKey, FieldValue>,
}

impl DeferredUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: FieldKey, value: FieldValue) {
        if let Some(replaced) = self.values.insert(key.clone(), value) {
            tracing::debug!(%key, ?replaced, "deferred remote value superseded");
        }
    }

    /// Read-once: the value is gone after this returns it.
    pub fn take(&mut self, key: &FieldKey) -> Option<FieldValue> {
        self.values.remove(key)
    }

    pub fn get(&self, key: &FieldKey) -> Option<&FieldValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &FieldKey) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop everything held for one record, e.g. after it was deleted.
    pub fn clear_record(&mut self, entity_type: &EntityType, record_id: &RecordId) -> usize {
        let before = self.values.len();
        self.values.retain(|key, _| !key.is_on(entity_type, record_id));
        before - self.values.len()
    }

    pub fn clear_all(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_value_replaces_older() {
        let mut deferred = DeferredUpdates::new();
        let key = FieldKey::new("tasks", "1", "title");
        deferred.put(key.clone(), "v1".into());
        deferred.put(key.clone(), "v2".into());
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred.take(&key), Some(FieldValue::text("v2")));
        assert_eq!(deferred.take(&key), None);
    }

    #[test]
    fn clear_record_only_touches_that_record() {
        let mut deferred = DeferredUpdates::new();
        deferred.put(FieldKey::new("tasks", "1", "title"), "a".into());
        deferred.put(FieldKey::new("tasks", "1", "status"), "done".into());
        deferred.put(FieldKey::new("tasks", "2", "title"), "b".into());
        assert_eq!(deferred.clear_record(&"tasks".into(), &"1".into()), 2);
        assert!(deferred.contains(&FieldKey::new("tasks", "2", "title")));
    }
}
