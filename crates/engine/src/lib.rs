pub mod cache;
pub mod config;
pub mod debounce;
pub mod deferred;
pub mod error;
pub mod focus;
pub mod pipeline;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod subscription;

pub use cache::EntityCache;
pub use config::EngineConfig;
pub use debounce::DebounceScheduler;
pub use deferred::DeferredUpdates;
pub use error::{EngineError, SaveError};
pub use focus::FocusTracker;
pub use pipeline::Submitted;
pub use queue::{OfflineQueue, PendingFieldUpdate};
pub use reconcile::ReconcileOutcome;
pub use remote::{ChangeEvent, MutationError, MutationRequest, MutationResponse, RemoteStore};
pub use subscription::{ChannelFilter, SubscriptionRegistry};

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use fieldsync_core::{
    Clock, EntityRecord, EntityType, FieldKey, FieldValue, FocusQuery, RecordId, RequestId,
    Timestamp, ValidationRules,
};
use fieldsync_storage::DurableStore;

use crate::pipeline::{Flight, PendingWrite, ReplayPass, Write};

/// Something the host may want to surface once it happened: a save settled,
/// a write went to the offline queue, a held-back remote value landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Saved {
        request_id: RequestId,
        keys: Vec<FieldKey>,
    },
    SaveFailed {
        keys: Vec<FieldKey>,
        error: SaveError,
        rolled_back: bool,
    },
    Queued {
        key: FieldKey,
    },
    QueueSynced {
        replayed: usize,
        failed: usize,
    },
    DeferredApplied {
        key: FieldKey,
        value: FieldValue,
    },
    ConnectivityChanged {
        online: bool,
    },
}

/// The edit-sync core. Owns the entity cache and every piece of state that
/// touches it; the host drives it with timers, transport and change events.
///
/// Nothing here blocks or spawns. Outbound mutations are collected with
/// [`Engine::poll_transmit`] and their results fed back through
/// [`Engine::handle_response`]; the time between the two is "in flight".
pub struct Engine {
    config: EngineConfig,
    clock: Box<dyn Clock>,
    rules: Box<dyn ValidationRules>,
    focus: Box<dyn FocusQuery>,
    cache: EntityCache,
    deferred: DeferredUpdates,
    queue: OfflineQueue,
    timers: DebounceScheduler<PendingWrite>,
    subscriptions: SubscriptionRegistry,
    online: bool,
    next_request: u64,
    outbox: VecDeque<MutationRequest>,
    in_flight: HashMap<RequestId, Flight>,
    /// Field keys with a live write in flight, and which request carries it.
    busy: HashMap<FieldKey, RequestId>,
    /// Writes waiting for an in-flight write to the same field to settle.
    parked: VecDeque<Write>,
    replay: Option<ReplayPass>,
    /// Fields blurred while local work was still outstanding.
    blur_pending: BTreeSet<FieldKey>,
    events: VecDeque<EngineEvent>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Box<dyn DurableStore>,
        rules: Box<dyn ValidationRules>,
        focus: Box<dyn FocusQuery>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let queue = if config.restricted_context {
            tracing::debug!("restricted context, offline queue disabled");
            OfflineQueue::disabled()
        } else {
            OfflineQueue::load(store, &config.queue_storage_key)?
        };
        Ok(Self {
            config,
            clock,
            rules,
            focus,
            cache: EntityCache::new(),
            deferred: DeferredUpdates::new(),
            queue,
            timers: DebounceScheduler::new(),
            subscriptions: SubscriptionRegistry::new(),
            online: true,
            next_request: 1,
            outbox: VecDeque::new(),
            in_flight: HashMap::new(),
            busy: HashMap::new(),
            parked: VecDeque::new(),
            replay: None,
            blur_pending: BTreeSet::new(),
            events: VecDeque::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(crate) fn next_request_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request);
        self.next_request += 1;
        id
    }

    // ========================================================================
    // Cache
    // ========================================================================

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn record(&self, entity_type: &EntityType, id: &RecordId) -> Option<Arc<EntityRecord>> {
        self.cache.record(entity_type, id)
    }

    pub fn field(&self, key: &FieldKey) -> Option<FieldValue> {
        self.cache.field(key)
    }

    /// Seed the cache with a fetched table.
    pub fn set_entities(&mut self, entity_type: EntityType, records: Vec<EntityRecord>) {
        self.cache.set_entities(entity_type, records);
    }

    /// Fetch one row from the remote store into the cache. Returns false when
    /// the row doesn't exist.
    pub fn load_record<R: RemoteStore + ?Sized>(
        &mut self,
        remote: &R,
        entity_type: &EntityType,
        id: &RecordId,
    ) -> bool {
        match remote.read(entity_type, id) {
            Some(record) => {
                self.cache.put(entity_type, record);
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Offline queue
    // ========================================================================

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Drop every queued write. A replay in progress is abandoned, and writes
    /// that were waiting behind queued ones go out.
    pub fn clear_queue(&mut self) {
        self.queue.clear();
        self.replay = None;
        self.unpark();
    }

    // ========================================================================
    // Deferred remote values
    // ========================================================================

    pub fn deferred(&self) -> &DeferredUpdates {
        &self.deferred
    }

    pub fn has_deferred(&self, key: &FieldKey) -> bool {
        self.deferred.contains(key)
    }

    /// Consume a deferred value without applying it.
    pub fn take_deferred(&mut self, key: &FieldKey) -> Option<FieldValue> {
        self.deferred.take(key)
    }

    pub fn clear_deferred(&mut self) {
        self.deferred.clear_all();
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub fn subscribe(&mut self, entity_type: impl Into<EntityType>, filter: Option<ChannelFilter>) -> String {
        self.subscriptions.subscribe(entity_type.into(), filter)
    }

    pub fn unsubscribe(&mut self, channel_key: &str) -> bool {
        self.subscriptions.unsubscribe(channel_key)
    }

    pub fn unsubscribe_all(&mut self) -> usize {
        self.subscriptions.unsubscribe_all()
    }

    pub fn active_subscriptions(&self) -> Vec<String> {
        self.subscriptions.active()
    }

    pub fn is_subscribed(&self, entity_type: &EntityType) -> bool {
        self.subscriptions.is_subscribed(entity_type)
    }

    // ========================================================================
    // Transport / events
    // ========================================================================

    /// Next mutation to put on the wire, oldest first.
    pub fn poll_transmit(&mut self) -> Option<MutationRequest> {
        self.outbox.pop_front()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn poll_event(&mut self) -> Option<EngineEvent> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain(..).collect()
    }

    /// Deliver every outbound mutation to `remote` and feed the answers back,
    /// until nothing is left to send. Returns the number of round trips.
    pub fn exchange<R: RemoteStore + ?Sized>(&mut self, remote: &mut R) -> Result<usize, EngineError> {
        let mut round_trips = 0;
        while let Some(request) = self.poll_transmit() {
            let response = remote.mutate(&request);
            self.handle_response(request.id, response)?;
            round_trips += 1;
        }
        Ok(round_trips)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("online", &self.online)
            .field("cached", &self.cache.len())
            .field("queued", &self.queue.len())
            .field("timers", &self.timers.len())
            .field("in_flight", &self.in_flight.len())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}
