//! Inbound half of the engine: change events from other clients, merged
//! field by field under the focus-wins rule.

use fieldsync_core::{EntityRecord, EntityType, FieldKey, FieldValue, RecordId, Resolution, resolve};

use crate::remote::ChangeEvent;
use crate::{Engine, EngineEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The row was not cached and now is.
    Inserted,
    /// Fields that took the remote value and fields held back for focus.
    Merged {
        applied: Vec<String>,
        deferred: Vec<String>,
    },
    /// Not newer than the cached row; dropped.
    Stale,
    Deleted { existed: bool },
    /// No active channel would have delivered it.
    Ignored,
}

impl Engine {
    pub fn apply_change(&mut self, event: ChangeEvent) -> ReconcileOutcome {
        let row = match &event {
            ChangeEvent::Insert { record, .. } | ChangeEvent::Update { record, .. } => Some(record),
            ChangeEvent::Delete { .. } => None,
        };
        if !self.subscriptions.admits(event.entity_type(), row) {
            tracing::debug!(entity_type = %event.entity_type(), record_id = %event.record_id(), "no subscription, ignoring change");
            return ReconcileOutcome::Ignored;
        }

        match event {
            ChangeEvent::Insert { entity_type, record } | ChangeEvent::Update { entity_type, record } => {
                self.merge_remote(entity_type, record)
            }
            ChangeEvent::Delete {
                entity_type,
                record_id,
            } => {
                let existed = self.cache.delete(&entity_type, &record_id).is_some();
                let dropped = self.deferred.clear_record(&entity_type, &record_id);
                tracing::debug!(%entity_type, %record_id, existed, dropped, "remote delete");
                ReconcileOutcome::Deleted { existed }
            }
        }
    }

    /// Decode a raw change payload and apply it. Undecodable payloads are
    /// logged and ignored.
    pub fn apply_payload(&mut self, entity_type: EntityType, payload: serde_json::Value) -> ReconcileOutcome {
        match ChangeEvent::from_payload(entity_type, payload) {
            Ok(Some(event)) => self.apply_change(event),
            Ok(None) => ReconcileOutcome::Ignored,
            Err(err) => {
                tracing::warn!("dropping malformed change payload: {err}");
                ReconcileOutcome::Ignored
            }
        }
    }

    fn merge_remote(&mut self, entity_type: EntityType, incoming: EntityRecord) -> ReconcileOutcome {
        let Some(current) = self.cache.record(&entity_type, &incoming.id) else {
            self.cache.put(&entity_type, incoming);
            return ReconcileOutcome::Inserted;
        };
        if incoming.updated_at <= current.updated_at {
            tracing::debug!(
                %entity_type,
                record_id = %incoming.id,
                remote = %incoming.updated_at,
                local = %current.updated_at,
                "dropping stale remote update"
            );
            return ReconcileOutcome::Stale;
        }

        let mut merged = (*current).clone();
        merged.updated_at = incoming.updated_at;
        let mut applied = Vec::new();
        let mut deferred = Vec::new();
        for (field, remote) in incoming.fields {
            let key = FieldKey {
                entity_type: entity_type.clone(),
                record_id: incoming.id.clone(),
                field: field.clone(),
            };
            match resolve(&*self.focus, &key, &remote, current.get(&field)) {
                Resolution::Defer => {
                    tracing::debug!(%key, "field has focus, deferring remote value");
                    self.deferred.put(key, remote);
                    deferred.push(field);
                }
                Resolution::RemoteWins => {
                    merged.fields.insert(field.clone(), remote);
                    applied.push(field);
                }
                Resolution::LocalWins => {}
            }
        }
        self.cache.put(&entity_type, merged);
        ReconcileOutcome::Merged { applied, deferred }
    }

    // ========================================================================
    // Focus
    // ========================================================================

    /// The field lost focus. Its deferred remote value lands now, or once
    /// the field's own pending save settles.
    pub fn on_blur(&mut self, key: &FieldKey) -> Option<FieldValue> {
        if !self.deferred.contains(key) {
            return None;
        }
        if !self.is_idle(key) {
            tracing::debug!(%key, "blur with save outstanding, holding deferred value");
            self.blur_pending.insert(key.clone());
            return None;
        }
        self.flush_deferred(key)
    }

    /// Write the deferred remote value for `key` into the cache, leaving
    /// `updated_at` as the merge that deferred it set it.
    pub fn flush_deferred(&mut self, key: &FieldKey) -> Option<FieldValue> {
        let value = self.deferred.take(key)?;
        if !self.cache.set_field(key, value.clone()) {
            tracing::debug!(%key, "record gone, discarding deferred value");
            return None;
        }
        self.events.push_back(EngineEvent::DeferredApplied {
            key: key.clone(),
            value: value.clone(),
        });
        Some(value)
    }

    pub(crate) fn settle_blurs(&mut self) {
        let ready: Vec<FieldKey> = self
            .blur_pending
            .iter()
            .filter(|key| self.is_idle(key))
            .cloned()
            .collect();
        for key in ready {
            self.blur_pending.remove(&key);
            if !self.focus.is_focused(&key) {
                self.flush_deferred(&key);
            }
        }
    }

    pub fn focused_field(&self) -> Option<FieldKey> {
        self.focus.focused_field()
    }

    pub fn is_entity_being_edited(&self, entity_type: &EntityType, record_id: &RecordId) -> bool {
        self.focus.is_entity_being_edited(entity_type, record_id)
    }
}
