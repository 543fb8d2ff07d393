//! Outbound half of the engine: optimistic local edits, debounce timers,
//! dispatch, response handling, rollback and offline replay.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use fieldsync_core::{
    EntityType, FieldKey, FieldValue, QueueItemId, RecordId, RequestId, Timestamp, ValidationError,
};

use crate::error::{EngineError, SaveError};
use crate::queue::PendingFieldUpdate;
use crate::remote::{MutationError, MutationRequest, MutationResponse, is_policy_denial};
use crate::{Engine, EngineEvent};

/// What happened to a submitted edit by the time the call returned. The cache
/// already holds the new value in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// Offline: appended to the offline queue.
    Queued,
    /// Waiting out the quiet period.
    Scheduled { due: Timestamp },
    Dispatched(RequestId),
    /// Held until an in-flight write to the same field settles.
    Parked,
}

/// Payload of a debounce timer.
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    pub value: FieldValue,
    /// Cached value before the first edit of this debounce window.
    pub previous: Option<FieldValue>,
}

/// A mutation for one record, plus what to restore if the server refuses it.
#[derive(Debug, Clone)]
pub(crate) struct Write {
    pub entity_type: EntityType,
    pub record_id: RecordId,
    pub fields: BTreeMap<String, FieldValue>,
    pub previous: BTreeMap<String, Option<FieldValue>>,
    pub immediate: bool,
}

impl Write {
    fn single(key: FieldKey, value: FieldValue, previous: Option<FieldValue>, immediate: bool) -> Self {
        Self {
            entity_type: key.entity_type,
            record_id: key.record_id,
            fields: BTreeMap::from([(key.field.clone(), value)]),
            previous: BTreeMap::from([(key.field, previous)]),
            immediate,
        }
    }

    fn key(&self, field: &str) -> FieldKey {
        FieldKey {
            entity_type: self.entity_type.clone(),
            record_id: self.record_id.clone(),
            field: field.to_string(),
        }
    }

    pub(crate) fn keys(&self) -> Vec<FieldKey> {
        self.fields.keys().map(|field| self.key(field)).collect()
    }

    pub(crate) fn touches(&self, key: &FieldKey) -> bool {
        key.is_on(&self.entity_type, &self.record_id) && self.fields.contains_key(&key.field)
    }

    fn same_target(&self, other: &Write) -> bool {
        self.entity_type == other.entity_type
            && self.record_id == other.record_id
            && self.fields.keys().eq(other.fields.keys())
    }
}

pub(crate) enum Flight {
    Live(Write),
    Replay(QueueItemId),
}

/// One sequential pass over the offline queue.
#[derive(Debug, Default)]
pub(crate) struct ReplayPass {
    attempted: HashSet<QueueItemId>,
    /// The item on the wire, if any.
    current: Option<QueueItemId>,
    replayed: usize,
    failed: usize,
}

impl Engine {
    // ========================================================================
    // Submission
    // ========================================================================

    /// Optimistically apply `value` and save it once the field has been quiet
    /// for `debounce`. A zero debounce sends right away.
    pub fn submit(&mut self, key: FieldKey, value: FieldValue, debounce: Duration) -> Result<Submitted, SaveError> {
        self.submit_field(key, value, Some(debounce), false)
    }

    /// [`Engine::submit`] with the configured quiet period.
    pub fn submit_default(&mut self, key: FieldKey, value: FieldValue) -> Result<Submitted, SaveError> {
        let debounce = self.config.default_debounce();
        self.submit_field(key, value, Some(debounce), false)
    }

    /// Save without waiting, for selects, checkboxes and blur commits. A
    /// remote value deferred for this field lands once the save succeeds, if
    /// the field no longer has focus by then.
    pub fn submit_immediate(&mut self, key: FieldKey, value: FieldValue) -> Result<Submitted, SaveError> {
        self.submit_field(key, value, None, true)
    }

    /// Several fields of one record in a single mutation, no debounce.
    pub fn submit_batch(
        &mut self,
        entity_type: EntityType,
        record_id: RecordId,
        fields: BTreeMap<String, FieldValue>,
    ) -> Result<Submitted, SaveError> {
        if fields.is_empty() {
            return Err(ValidationError::new("fields", "batch update has no fields").into());
        }
        for (field, value) in &fields {
            self.rules.validate(&entity_type, field, value)?;
        }

        let now = self.clock.now();
        let mut previous = BTreeMap::new();
        for field in fields.keys() {
            let key = FieldKey {
                entity_type: entity_type.clone(),
                record_id: record_id.clone(),
                field: field.clone(),
            };
            let mut before = self.cache.field(&key);
            // The batch supersedes a pending debounced edit of the same field.
            if let Some(pending) = self.timers.cancel(&key) {
                before = pending.previous;
            }
            previous.insert(field.clone(), before);
        }
        if !self.cache.apply_local(&entity_type, &record_id, fields.clone(), now) {
            tracing::debug!(%entity_type, %record_id, "batch for uncached record, saving without local copy");
        }

        let write = Write {
            entity_type,
            record_id,
            fields,
            previous,
            immediate: false,
        };
        Ok(self.dispatch_or_park(write))
    }

    fn submit_field(
        &mut self,
        key: FieldKey,
        value: FieldValue,
        debounce: Option<Duration>,
        immediate: bool,
    ) -> Result<Submitted, SaveError> {
        self.rules.validate(&key.entity_type, &key.field, &value)?;

        let now = self.clock.now();
        let mut previous = self.cache.field(&key);
        if !self
            .cache
            .apply_local(&key.entity_type, &key.record_id, [(key.field.clone(), value.clone())], now)
        {
            tracing::debug!(%key, "edit for uncached record, saving without local copy");
        }
        if let Some(pending) = self.timers.cancel(&key) {
            previous = pending.previous;
        }

        match debounce {
            Some(quiet) if !quiet.is_zero() && !self.is_offline() => {
                let due = now.saturating_add(quiet);
                self.timers.schedule(key, due, PendingWrite { value, previous });
                Ok(Submitted::Scheduled { due })
            }
            _ => Ok(self.dispatch_or_park(Write::single(key, value, previous, immediate))),
        }
    }

    /// Offline without a disabled queue. Restricted contexts are never offline.
    fn is_offline(&self) -> bool {
        !self.online && self.queue.is_enabled()
    }

    fn dispatch_or_park(&mut self, write: Write) -> Submitted {
        if self.is_offline() {
            self.enqueue_write(write);
            return Submitted::Queued;
        }
        // Older queued writes to these fields have to reach the server first.
        let keys = write.keys();
        if keys.iter().any(|key| self.queued_ahead(key)) {
            self.sync_queue();
            self.park(write);
            return Submitted::Parked;
        }
        if keys
            .iter()
            .any(|key| self.busy.contains_key(key) || self.parked.iter().any(|p| p.touches(key)))
        {
            self.park(write);
            return Submitted::Parked;
        }
        Submitted::Dispatched(self.send_live(write))
    }

    fn send_live(&mut self, write: Write) -> RequestId {
        let id = self.next_request_id();
        for key in write.keys() {
            self.busy.insert(key, id);
        }
        tracing::debug!(request = %id, entity_type = %write.entity_type, record_id = %write.record_id, "dispatching save");
        self.outbox.push_back(MutationRequest {
            id,
            entity_type: write.entity_type.clone(),
            record_id: write.record_id.clone(),
            fields: write.fields.clone(),
        });
        self.in_flight.insert(id, Flight::Live(write));
        id
    }

    /// A later write for the same field set replaces the parked one but keeps
    /// its rollback values.
    fn park(&mut self, write: Write) {
        if let Some(parked) = self.parked.iter_mut().find(|p| p.same_target(&write)) {
            parked.fields = write.fields;
            parked.immediate |= write.immediate;
            return;
        }
        self.parked.push_back(write);
    }

    /// A queued write to `key` must land before a live one may go out: any
    /// entry still waiting for connectivity, and refused entries the running
    /// replay pass has not retried yet.
    fn queued_ahead(&self, key: &FieldKey) -> bool {
        self.queue.items_for(key).any(|item| {
            !self.queue.is_rejected(item.id)
                || self
                    .replay
                    .as_ref()
                    .is_some_and(|pass| !pass.attempted.contains(&item.id))
        })
    }

    /// Send parked writes whose fields are no longer busy, oldest first.
    pub(crate) fn unpark(&mut self) {
        let mut waiting = std::mem::take(&mut self.parked);
        while let Some(write) = waiting.pop_front() {
            let blocked = write
                .keys()
                .iter()
                .any(|key| self.busy.contains_key(key) || self.parked.iter().any(|p| p.touches(key)));
            if blocked {
                self.parked.push_back(write);
            } else {
                self.dispatch_or_park(write);
            }
        }
    }

    fn enqueue_write(&mut self, write: Write) {
        let now = self.clock.now();
        for field in write.fields.keys() {
            let key = write.key(field);
            if let Some(value) = write.fields.get(field) {
                self.queue
                    .enqueue(PendingFieldUpdate::new(key.clone(), value.clone(), now));
            }
            self.events.push_back(EngineEvent::Queued { key });
        }
    }

    /// A live write lost its connection. It is older than anything queued
    /// for its fields since it went out, so it goes back in front of those.
    fn requeue_write(&mut self, write: Write) {
        let now = self.clock.now();
        for (field, value) in write.fields {
            let key = FieldKey {
                entity_type: write.entity_type.clone(),
                record_id: write.record_id.clone(),
                field,
            };
            self.queue
                .requeue(PendingFieldUpdate::new(key.clone(), value, now));
            self.events.push_back(EngineEvent::Queued { key });
        }
    }

    /// Move parked writes into the offline queue, or with `behind_queue`
    /// only those held back by queued writes to the same fields.
    fn queue_parked(&mut self, behind_queue: bool) {
        let parked = std::mem::take(&mut self.parked);
        for write in parked {
            if !behind_queue || write.keys().iter().any(|key| self.queued_ahead(key)) {
                self.enqueue_write(write);
            } else {
                self.parked.push_back(write);
            }
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Earliest debounce deadline still armed.
    pub fn next_timeout(&self) -> Option<Timestamp> {
        self.timers.next_deadline()
    }

    /// Fire every debounce timer that is due. Returns how many fired.
    pub fn poll_timers(&mut self) -> usize {
        let now = self.clock.now();
        let due = self.timers.take_due(now);
        let fired = due.len();
        for (key, pending) in due {
            self.dispatch_or_park(Write::single(key, pending.value, pending.previous, false));
        }
        fired
    }

    pub fn is_update_pending(&self, key: &FieldKey) -> bool {
        !self.is_idle(key)
    }

    /// No timer, in-flight or parked write for `key`.
    pub(crate) fn is_idle(&self, key: &FieldKey) -> bool {
        !self.timers.is_pending(key)
            && !self.busy.contains_key(key)
            && !self.parked.iter().any(|p| p.touches(key))
    }

    /// Drop every armed timer and parked write. Their optimistic values stay
    /// in the cache. Returns how many writes were dropped.
    pub fn cancel_all_pending(&mut self) -> usize {
        let dropped = self.timers.clear() + self.parked.len();
        self.parked.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "cancelled pending saves");
        }
        self.settle_blurs();
        dropped
    }

    // ========================================================================
    // Responses
    // ========================================================================

    pub fn handle_response(&mut self, id: RequestId, response: MutationResponse) -> Result<(), EngineError> {
        let flight = self
            .in_flight
            .remove(&id)
            .ok_or(EngineError::UnknownRequest(id))?;
        match flight {
            Flight::Live(write) => {
                self.settle_live(id, write, response);
                // A replay pass may be waiting on one of these fields.
                if self.replay.as_ref().is_some_and(|pass| pass.current.is_none()) {
                    self.send_next_replay();
                }
            }
            Flight::Replay(item) => self.settle_replay(item, response),
        }
        self.unpark();
        self.settle_blurs();
        Ok(())
    }

    fn settle_live(&mut self, id: RequestId, write: Write, response: MutationResponse) {
        for key in write.keys() {
            if self.busy.get(&key) == Some(&id) {
                self.busy.remove(&key);
            }
        }

        match response.map_err(MutationError::reclassified) {
            Ok(_) => {
                tracing::debug!(request = %id, "save confirmed");
                let keys = write.keys();
                for key in &keys {
                    let dropped = self.queue.discard_rejected(key, None);
                    if dropped > 0 {
                        tracing::debug!(%key, dropped, "saved value supersedes refused queued writes");
                    }
                }
                self.events.push_back(EngineEvent::Saved {
                    request_id: id,
                    keys: keys.clone(),
                });
                if write.immediate {
                    for key in &keys {
                        if self.is_idle(key) && !self.focus.is_focused(key) {
                            self.flush_deferred(key);
                        }
                    }
                }
            }
            Err(MutationError::Connectivity(message)) if self.queue.is_enabled() => {
                tracing::debug!(request = %id, "connection lost mid-flight, queueing: {message}");
                self.requeue_write(write);
            }
            Err(MutationError::Connectivity(message)) => {
                self.fail_live(write, SaveError::Unreachable(message));
            }
            Err(MutationError::Validation(message)) => {
                self.fail_live(write, SaveError::Rejected(message));
            }
            Err(MutationError::Server(message)) => {
                let quiet = is_policy_denial(&message);
                self.fail_live(write, SaveError::Server { message, quiet });
            }
        }
    }

    /// Restore pre-edit values for fields still showing what was sent. A field
    /// with newer local work keeps that work and hands its rollback value on.
    fn fail_live(&mut self, write: Write, error: SaveError) {
        let mut restore = Vec::new();
        for (field, sent) in &write.fields {
            let key = write.key(field);
            let previous = write.previous.get(field).cloned().flatten();
            if !self.is_idle(&key) {
                self.inherit_previous(&key, previous);
            } else if self.cache.field(&key).as_ref() == Some(sent) {
                restore.push((field.clone(), previous));
            }
        }
        let rolled_back =
            !restore.is_empty() && self.cache.restore(&write.entity_type, &write.record_id, restore);

        let keys = write.keys();
        match &error {
            SaveError::Server { quiet: true, .. } => {
                tracing::debug!(entity_type = %write.entity_type, record_id = %write.record_id, rolled_back, "save denied by policy: {error}")
            }
            _ => {
                tracing::warn!(entity_type = %write.entity_type, record_id = %write.record_id, rolled_back, "save failed: {error}")
            }
        }
        self.events.push_back(EngineEvent::SaveFailed {
            keys,
            error,
            rolled_back,
        });
    }

    fn inherit_previous(&mut self, key: &FieldKey, previous: Option<FieldValue>) {
        if let Some(pending) = self.timers.payload_mut(key) {
            pending.previous = previous.clone();
        }
        for parked in self.parked.iter_mut().filter(|p| p.touches(key)) {
            parked.previous.insert(key.field.clone(), previous.clone());
        }
        if let Some(id) = self.busy.get(key)
            && let Some(Flight::Live(write)) = self.in_flight.get_mut(id)
        {
            write.previous.insert(key.field.clone(), previous);
        }
    }

    // ========================================================================
    // Connectivity / replay
    // ========================================================================

    /// Report a connectivity change. Coming back online replays the queue.
    pub fn set_online(&mut self, online: bool) {
        if self.config.restricted_context {
            tracing::debug!(online, "restricted context, ignoring connectivity change");
            return;
        }
        if self.online == online {
            return;
        }
        self.online = online;
        tracing::debug!(online, "connectivity changed");
        self.events
            .push_back(EngineEvent::ConnectivityChanged { online });
        if online {
            self.sync_queue();
            return;
        }
        if self.replay.as_ref().is_some_and(|pass| pass.current.is_none()) {
            self.finish_replay();
        }
        self.queue_parked(false);
        self.settle_blurs();
    }

    /// Start a replay pass over the offline queue. Items go out one at a
    /// time in queue order, skipping fields with a live write in flight
    /// until it settles. A success removes the item, any other failure
    /// leaves it queued, and a connectivity failure ends the pass. Returns
    /// false when there was nothing to start.
    pub fn sync_queue(&mut self) -> bool {
        if !self.queue.is_enabled() || !self.online || self.replay.is_some() || self.queue.is_empty() {
            return false;
        }
        tracing::debug!(count = self.queue.len(), "replaying offline queue");
        self.replay = Some(ReplayPass::default());
        self.send_next_replay();
        true
    }

    pub fn is_syncing(&self) -> bool {
        self.replay.is_some()
    }

    fn send_next_replay(&mut self) {
        let Some(pass) = &self.replay else {
            return;
        };
        if pass.current.is_some() {
            return;
        }
        if !self.online {
            self.finish_replay();
            return;
        }
        let next = self
            .queue
            .next_ready(|item| !pass.attempted.contains(&item.id) && !self.busy.contains_key(&item.key()))
            .cloned();
        let Some(item) = next else {
            if self
                .queue
                .next_ready(|item| !pass.attempted.contains(&item.id))
                .is_some()
            {
                tracing::debug!("replay waiting for in-flight saves");
            } else {
                self.finish_replay();
            }
            return;
        };

        let id = self.next_request_id();
        if let Some(pass) = self.replay.as_mut() {
            pass.attempted.insert(item.id);
            pass.current = Some(item.id);
        }
        self.queue.set_rejected(item.id, false);
        tracing::debug!(request = %id, key = %item.key(), "replaying queued write");
        self.outbox.push_back(MutationRequest {
            id,
            entity_type: item.entity_type.clone(),
            record_id: item.record_id.clone(),
            fields: BTreeMap::from([(item.field.clone(), item.value.clone())]),
        });
        self.in_flight.insert(id, Flight::Replay(item.id));
    }

    fn settle_replay(&mut self, item: QueueItemId, response: MutationResponse) {
        let outcome = response.map_err(MutationError::reclassified);
        match &outcome {
            Ok(_) => {
                if let Some(key) = self.queue.items().iter().find(|i| i.id == item).map(|i| i.key()) {
                    self.queue.discard_rejected(&key, Some(item));
                }
                self.queue.remove(item);
            }
            Err(MutationError::Connectivity(_)) => {}
            Err(_) => self.queue.set_rejected(item, true),
        }
        let Some(pass) = self.replay.as_mut().filter(|pass| pass.current == Some(item)) else {
            // Pass abandoned by clear_queue while this item was in flight.
            return;
        };
        pass.current = None;
        match outcome {
            Ok(_) => pass.replayed += 1,
            Err(MutationError::Connectivity(message)) => {
                pass.failed += 1;
                tracing::debug!("replay interrupted: {message}");
                self.finish_replay();
                self.queue_parked(true);
                return;
            }
            Err(err) => {
                pass.failed += 1;
                tracing::warn!(item = %item, "queued write failed, keeping it: {err}");
            }
        }
        self.send_next_replay();
    }

    fn finish_replay(&mut self) {
        if let Some(pass) = self.replay.take() {
            tracing::debug!(replayed = pass.replayed, failed = pass.failed, "offline queue replay finished");
            self.events.push_back(EngineEvent::QueueSynced {
                replayed: pass.replayed,
                failed: pass.failed,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use fieldsync_core::{
        EntityRecord, EntitySchema, FieldKind, ManualClock, SchemaRegistry,
    };
    use fieldsync_storage::MemoryStore;

    use super::*;
    use crate::config::EngineConfig;
    use crate::focus::FocusTracker;

    const QUIET: Duration = Duration::from_millis(500);

    fn schema() -> SchemaRegistry {
        SchemaRegistry::new().register(
            "tasks",
            EntitySchema::new()
                .field("title", FieldKind::required_text(200))
                .optional("notes", FieldKind::text(2_000))
                .field("status", FieldKind::select(["todo", "doing", "done"])),
        )
    }

    fn engine_with(config: EngineConfig) -> (Engine, ManualClock) {
        let clock = ManualClock::new(Timestamp::from_unix_millis(1_000_000).unwrap());
        let mut engine = Engine::new(
            config,
            Box::new(MemoryStore::new()),
            Box::new(schema()),
            Box::new(FocusTracker::new()),
            Box::new(clock.clone()),
        )
        .unwrap();
        engine.set_entities(
            "tasks".into(),
            vec![
                EntityRecord::new("1", Timestamp::from_unix_millis(0).unwrap())
                    .with_field("title", "Draft")
                    .with_field("status", "todo"),
            ],
        );
        (engine, clock)
    }

    fn engine() -> (Engine, ManualClock) {
        engine_with(EngineConfig::default())
    }

    fn title() -> FieldKey {
        FieldKey::new("tasks", "1", "title")
    }

    fn ok(request: &MutationRequest) -> MutationResponse {
        let mut record = EntityRecord::new(request.record_id.clone(), Timestamp::from_unix_millis(2_000_000).unwrap());
        record.fields.extend(request.fields.clone());
        Ok(record)
    }

    #[test]
    fn debounce_coalesces_keystrokes() {
        let (mut engine, clock) = engine();
        for text in ["H", "He", "Hel", "Hell", "Hello"] {
            let submitted = engine.submit(title(), text.into(), QUIET).unwrap();
            assert!(matches!(submitted, Submitted::Scheduled { .. }));
            clock.advance(Duration::from_millis(100));
        }
        assert_eq!(engine.field(&title()), Some(FieldValue::text("Hello")));
        assert_eq!(engine.poll_timers(), 0);
        assert!(engine.poll_transmit().is_none());

        clock.advance(QUIET);
        assert_eq!(engine.poll_timers(), 1);
        let request = engine.poll_transmit().unwrap();
        assert_eq!(request.fields.get("title"), Some(&FieldValue::text("Hello")));
        assert!(engine.poll_transmit().is_none());
    }

    #[test]
    fn validation_failure_leaves_cache_alone() {
        let (mut engine, _) = engine();
        let status = FieldKey::new("tasks", "1", "status");
        let err = engine.submit_immediate(status.clone(), "archived".into()).unwrap_err();
        assert!(matches!(err, SaveError::Validation(_)));
        assert_eq!(engine.field(&status), Some(FieldValue::text("todo")));
        assert!(engine.poll_transmit().is_none());
    }

    #[test]
    fn server_error_rolls_back_to_pre_window_value() {
        let (mut engine, clock) = engine();
        engine.submit(title(), "A".into(), QUIET).unwrap();
        engine.submit(title(), "AB".into(), QUIET).unwrap();
        clock.advance(QUIET);
        engine.poll_timers();
        let request = engine.poll_transmit().unwrap();

        engine
            .handle_response(request.id, Err(MutationError::Server("boom".into())))
            .unwrap();
        assert_eq!(engine.field(&title()), Some(FieldValue::text("Draft")));
        let events = engine.drain_events();
        assert!(matches!(
            events.as_slice(),
            [EngineEvent::SaveFailed { rolled_back: true, error: SaveError::Server { quiet: false, .. }, .. }]
        ));
    }

    #[test]
    fn rejected_write_does_not_clobber_newer_edit() {
        let (mut engine, clock) = engine();
        let Submitted::Dispatched(first) = engine.submit_immediate(title(), "A".into()).unwrap() else {
            panic!("expected dispatch");
        };
        engine.poll_transmit();
        engine.submit(title(), "B".into(), QUIET).unwrap();

        engine
            .handle_response(first, Err(MutationError::Validation("too long".into())))
            .unwrap();
        assert_eq!(engine.field(&title()), Some(FieldValue::text("B")));

        // The timer now carries the original value as its rollback target.
        clock.advance(QUIET);
        engine.poll_timers();
        let second = engine.poll_transmit().unwrap();
        engine
            .handle_response(second.id, Err(MutationError::Server("boom".into())))
            .unwrap();
        assert_eq!(engine.field(&title()), Some(FieldValue::text("Draft")));
    }

    #[test]
    fn second_write_waits_for_in_flight_one() {
        let (mut engine, _) = engine();
        let Submitted::Dispatched(first) = engine.submit_immediate(title(), "A".into()).unwrap() else {
            panic!("expected dispatch");
        };
        assert_eq!(engine.submit_immediate(title(), "B".into()).unwrap(), Submitted::Parked);
        assert_eq!(engine.submit_immediate(title(), "C".into()).unwrap(), Submitted::Parked);
        let request = engine.poll_transmit().unwrap();
        assert!(engine.poll_transmit().is_none());

        engine.handle_response(first, ok(&request)).unwrap();
        let next = engine.poll_transmit().unwrap();
        assert_eq!(next.fields.get("title"), Some(&FieldValue::text("C")));
        assert!(engine.is_update_pending(&title()));
        engine.handle_response(next.id, ok(&next)).unwrap();
        assert!(!engine.is_update_pending(&title()));
    }

    #[test]
    fn offline_edits_queue_and_replay_in_order() {
        let (mut engine, _) = engine();
        engine.set_online(false);
        assert_eq!(engine.submit(title(), "A".into(), QUIET).unwrap(), Submitted::Queued);
        assert_eq!(engine.submit(title(), "B".into(), QUIET).unwrap(), Submitted::Queued);
        assert_eq!(engine.queue_len(), 2);
        assert_eq!(engine.field(&title()), Some(FieldValue::text("B")));

        engine.set_online(true);
        assert!(engine.is_syncing());
        let a = engine.poll_transmit().unwrap();
        assert_eq!(a.fields.get("title"), Some(&FieldValue::text("A")));
        assert!(engine.poll_transmit().is_none());
        engine.handle_response(a.id, ok(&a)).unwrap();
        let b = engine.poll_transmit().unwrap();
        assert_eq!(b.fields.get("title"), Some(&FieldValue::text("B")));
        engine.handle_response(b.id, ok(&b)).unwrap();

        assert_eq!(engine.queue_len(), 0);
        assert!(!engine.is_syncing());
        assert!(engine
            .drain_events()
            .contains(&EngineEvent::QueueSynced { replayed: 2, failed: 0 }));
    }

    #[test]
    fn failed_replay_items_stay_queued() {
        let (mut engine, _) = engine();
        engine.set_online(false);
        engine.submit_immediate(title(), "A".into()).unwrap();
        engine
            .submit_immediate(FieldKey::new("tasks", "1", "status"), "done".into())
            .unwrap();
        engine.set_online(true);

        let first = engine.poll_transmit().unwrap();
        engine
            .handle_response(first.id, Err(MutationError::Validation("nope".into())))
            .unwrap();
        let second = engine.poll_transmit().unwrap();
        engine.handle_response(second.id, ok(&second)).unwrap();

        assert_eq!(engine.queue_len(), 1);
        assert_eq!(engine.queue().items()[0].field, "title");
        assert!(engine
            .drain_events()
            .contains(&EngineEvent::QueueSynced { replayed: 1, failed: 1 }));
    }

    #[test]
    fn going_offline_queues_parked_writes_behind_in_flight_one() {
        let (mut engine, _) = engine();
        let Submitted::Dispatched(first) = engine.submit_immediate(title(), "A".into()).unwrap() else {
            panic!("expected dispatch");
        };
        engine.poll_transmit();
        assert_eq!(engine.submit_immediate(title(), "B".into()).unwrap(), Submitted::Parked);

        engine.set_online(false);
        assert_eq!(engine.submit_immediate(title(), "C".into()).unwrap(), Submitted::Queued);
        engine
            .handle_response(first, Err(MutationError::Connectivity("offline".into())))
            .unwrap();

        let values: Vec<_> = engine.queue().items().iter().map(|i| i.value.clone()).collect();
        assert_eq!(
            values,
            vec![FieldValue::text("A"), FieldValue::text("B"), FieldValue::text("C")]
        );
        assert!(!engine.is_update_pending(&title()));
    }

    #[test]
    fn interrupted_replay_queues_writes_waiting_on_it() {
        let (mut engine, _) = engine();
        engine.set_online(false);
        engine.submit_immediate(title(), "A".into()).unwrap();
        engine.set_online(true);
        assert_eq!(engine.submit_immediate(title(), "B".into()).unwrap(), Submitted::Parked);

        let replay = engine.poll_transmit().unwrap();
        assert_eq!(replay.fields.get("title"), Some(&FieldValue::text("A")));
        assert!(engine.poll_transmit().is_none());
        engine
            .handle_response(replay.id, Err(MutationError::Connectivity("offline".into())))
            .unwrap();

        assert!(!engine.is_syncing());
        assert!(engine.poll_transmit().is_none());
        let values: Vec<_> = engine.queue().items().iter().map(|i| i.value.clone()).collect();
        assert_eq!(values, vec![FieldValue::text("A"), FieldValue::text("B")]);
        assert!(engine
            .drain_events()
            .contains(&EngineEvent::QueueSynced { replayed: 0, failed: 1 }));
    }

    #[test]
    fn connectivity_loss_mid_flight_queues() {
        let (mut engine, _) = engine();
        let Submitted::Dispatched(id) = engine.submit_immediate(title(), "A".into()).unwrap() else {
            panic!("expected dispatch");
        };
        engine.poll_transmit();
        engine
            .handle_response(id, Err(MutationError::Server("TypeError: Failed to fetch".into())))
            .unwrap();
        assert_eq!(engine.queue_len(), 1);
        assert_eq!(engine.field(&title()), Some(FieldValue::text("A")));
    }

    #[test]
    fn restricted_context_reports_unreachable() {
        let (mut engine, _) = engine_with(EngineConfig {
            restricted_context: true,
            ..EngineConfig::default()
        });
        engine.set_online(false);
        let Submitted::Dispatched(id) = engine.submit_immediate(title(), "A".into()).unwrap() else {
            panic!("restricted context never queues");
        };
        engine.poll_transmit();
        engine
            .handle_response(id, Err(MutationError::Connectivity("offline".into())))
            .unwrap();
        assert_eq!(engine.queue_len(), 0);
        assert_eq!(engine.field(&title()), Some(FieldValue::text("Draft")));
        assert!(matches!(
            engine.drain_events().last(),
            Some(EngineEvent::SaveFailed { error: SaveError::Unreachable(_), .. })
        ));
    }

    #[test]
    fn policy_denial_is_quiet() {
        let (mut engine, _) = engine();
        let Submitted::Dispatched(id) = engine.submit_immediate(title(), "A".into()).unwrap() else {
            panic!("expected dispatch");
        };
        engine
            .handle_response(
                id,
                Err(MutationError::Server("new row violates row-level security policy".into())),
            )
            .unwrap();
        assert!(matches!(
            engine.drain_events().as_slice(),
            [EngineEvent::SaveFailed { error: SaveError::Server { quiet: true, .. }, .. }]
        ));
    }

    #[test]
    fn batch_sends_one_mutation() {
        let (mut engine, _) = engine();
        let fields = BTreeMap::from([
            ("title".to_string(), FieldValue::text("Ship")),
            ("status".to_string(), FieldValue::text("done")),
        ]);
        let submitted = engine.submit_batch("tasks".into(), "1".into(), fields).unwrap();
        assert!(matches!(submitted, Submitted::Dispatched(_)));
        let request = engine.poll_transmit().unwrap();
        assert_eq!(request.fields.len(), 2);
        assert!(engine.poll_transmit().is_none());

        let empty = engine.submit_batch("tasks".into(), "1".into(), BTreeMap::new());
        assert!(matches!(empty, Err(SaveError::Validation(_))));
    }

    #[test]
    fn cancel_all_pending_keeps_optimistic_values() {
        let (mut engine, clock) = engine();
        engine.submit(title(), "A".into(), QUIET).unwrap();
        assert_eq!(engine.cancel_all_pending(), 1);
        clock.advance(QUIET);
        assert_eq!(engine.poll_timers(), 0);
        assert_eq!(engine.field(&title()), Some(FieldValue::text("A")));
        assert!(engine.next_timeout().is_none());
    }

    #[test]
    fn unknown_response_is_an_error() {
        let (mut engine, _) = engine();
        let err = engine
            .handle_response(RequestId(99), Err(MutationError::Server("x".into())))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownRequest(RequestId(99))));
    }
}
