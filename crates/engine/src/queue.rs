use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use fieldsync_core::{EntityType, FieldKey, FieldValue, QueueItemId, RecordId, Timestamp};
use fieldsync_storage::DurableStore;

use crate::error::EngineError;

/// A field write waiting for connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFieldUpdate {
    pub id: QueueItemId,
    pub entity_type: EntityType,
    pub record_id: RecordId,
    pub field: String,
    pub value: FieldValue,
    pub enqueued_at: Timestamp,
}

impl PendingFieldUpdate {
    pub fn new(key: FieldKey, value: FieldValue, enqueued_at: Timestamp) -> Self {
        Self {
            id: QueueItemId::new(),
            entity_type: key.entity_type,
            record_id: key.record_id,
            field: key.field,
            value,
            enqueued_at,
        }
    }

    pub fn key(&self) -> FieldKey {
        FieldKey {
            entity_type: self.entity_type.clone(),
            record_id: self.record_id.clone(),
            field: self.field.clone(),
        }
    }

    pub fn is_for(&self, key: &FieldKey) -> bool {
        self.field == key.field && self.record_id == key.record_id && self.entity_type == key.entity_type
    }
}

/// FIFO of pending writes, mirrored to durable storage on every change.
///
/// The queue never merges entries: two writes to the same field stay two
/// entries and replay in the order they were enqueued.
pub struct OfflineQueue {
    store: Option<Box<dyn DurableStore>>,
    storage_key: String,
    items: Vec<PendingFieldUpdate>,
    /// Entries the server refused on their last replay. Not persisted; after
    /// a reload every entry counts as waiting for connectivity again.
    rejected: HashSet<QueueItemId>,
}

impl OfflineQueue {
    /// Load whatever a previous session left behind. An unreadable blob is
    /// logged and discarded rather than blocking startup.
    pub fn load(store: Box<dyn DurableStore>, storage_key: &str) -> Result<Self, EngineError> {
        let items = match store.load(storage_key)? {
            Some(json) => match serde_json::from_str::<Vec<PendingFieldUpdate>>(&json) {
                Ok(items) => {
                    tracing::debug!(count = items.len(), "loaded offline queue");
                    items
                }
                Err(err) => {
                    tracing::warn!("discarding unreadable offline queue: {err}");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        Ok(Self {
            store: Some(store),
            storage_key: storage_key.to_string(),
            items,
            rejected: HashSet::new(),
        })
    }

    /// A queue that neither loads nor persists anything.
    pub fn disabled() -> Self {
        Self {
            store: None,
            storage_key: String::new(),
            items: Vec::new(),
            rejected: HashSet::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn enqueue(&mut self, update: PendingFieldUpdate) {
        if !self.is_enabled() {
            tracing::warn!(key = %update.key(), "offline queue disabled, dropping write");
            return;
        }
        tracing::debug!(key = %update.key(), id = %update.id, "queued offline write");
        self.items.push(update);
        self.persist();
    }

    /// Put back a write that was in flight when the connection dropped. It
    /// predates every entry for its field that is still waiting, so it goes
    /// in front of the first of them.
    pub fn requeue(&mut self, update: PendingFieldUpdate) {
        if !self.is_enabled() {
            tracing::warn!(key = %update.key(), "offline queue disabled, dropping write");
            return;
        }
        let key = update.key();
        let pos = self
            .items
            .iter()
            .position(|item| item.is_for(&key) && !self.rejected.contains(&item.id))
            .unwrap_or(self.items.len());
        tracing::debug!(%key, id = %update.id, pos, "requeued interrupted write");
        self.items.insert(pos, update);
        self.persist();
    }

    pub fn remove(&mut self, id: QueueItemId) -> Option<PendingFieldUpdate> {
        let pos = self.items.iter().position(|item| item.id == id)?;
        let item = self.items.remove(pos);
        self.rejected.remove(&id);
        self.persist();
        Some(item)
    }

    /// The oldest entry `ready` accepts.
    pub fn next_ready(&self, mut ready: impl FnMut(&PendingFieldUpdate) -> bool) -> Option<&PendingFieldUpdate> {
        self.items.iter().find(|item| ready(item))
    }

    pub fn items_for<'a>(&'a self, key: &'a FieldKey) -> impl Iterator<Item = &'a PendingFieldUpdate> + 'a {
        self.items.iter().filter(move |item| item.is_for(key))
    }

    /// Record whether the server refused `id` on its latest replay.
    pub fn set_rejected(&mut self, id: QueueItemId, rejected: bool) {
        if !rejected {
            self.rejected.remove(&id);
        } else if self.items.iter().any(|item| item.id == id) {
            self.rejected.insert(id);
        }
    }

    pub fn is_rejected(&self, id: QueueItemId) -> bool {
        self.rejected.contains(&id)
    }

    /// Drop refused entries for `key` once a newer value for it is saved:
    /// those ahead of the entry `newer`, or all of them for a live save.
    pub fn discard_rejected(&mut self, key: &FieldKey, newer: Option<QueueItemId>) -> usize {
        let before = self.items.len();
        let end = newer
            .and_then(|id| self.items.iter().position(|item| item.id == id))
            .unwrap_or(before);
        let rejected = &self.rejected;
        let mut index = 0;
        self.items.retain(|item| {
            let superseded = index < end && item.is_for(key) && rejected.contains(&item.id);
            index += 1;
            !superseded
        });
        let dropped = before - self.items.len();
        if dropped > 0 {
            let items = &self.items;
            self.rejected.retain(|id| items.iter().any(|item| item.id == *id));
            self.persist();
        }
        dropped
    }

    pub fn items(&self) -> &[PendingFieldUpdate] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.rejected.clear();
        self.persist();
    }

    fn persist(&mut self) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        if self.items.is_empty() {
            if let Err(err) = store.remove(&self.storage_key) {
                tracing::warn!("failed to remove offline queue: {err}");
            }
            return;
        }
        let json = match serde_json::to_string(&self.items) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!("failed to encode offline queue: {err}");
                return;
            }
        };
        if let Err(err) = store.save(&self.storage_key, &json) {
            tracing::warn!("failed to persist offline queue: {err}");
        }
    }
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("enabled", &self.is_enabled())
            .field("storage_key", &self.storage_key)
            .field("items", &self.items.len())
            .field("rejected", &self.rejected.len())
            .finish()
    }
}
