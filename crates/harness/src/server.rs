use std::collections::{BTreeMap, HashMap, VecDeque};

use fieldsync_core::{Clock, EntityRecord, EntityType, FieldValue, ManualClock, RecordId};
use fieldsync_engine::{ChangeEvent, MutationError, MutationRequest, MutationResponse, RemoteStore};

/// In-process stand-in for the hosted database. Mutations replace the named
/// fields, stamp `updated_at` from the shared clock and append a change event
/// every client can read back.
pub struct TestServer {
    clock: ManualClock,
    tables: HashMap<EntityType, BTreeMap<RecordId, EntityRecord>>,
    changes: Vec<ChangeEvent>,
    requests: Vec<MutationRequest>,
    scripted: VecDeque<MutationError>,
    unreachable: bool,
}

impl TestServer {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            tables: HashMap::new(),
            changes: Vec::new(),
            requests: Vec::new(),
            scripted: VecDeque::new(),
            unreachable: false,
        }
    }

    /// Seed a row without emitting a change.
    pub fn insert(&mut self, entity_type: &str, record: EntityRecord) {
        self.tables
            .entry(entity_type.into())
            .or_default()
            .insert(record.id.clone(), record);
    }

    pub fn record(&self, entity_type: &str, id: &str) -> Option<&EntityRecord> {
        self.tables.get(&EntityType::from(entity_type))?.get(&RecordId::from(id))
    }

    pub fn records(&self, entity_type: &str) -> Vec<EntityRecord> {
        self.tables
            .get(&EntityType::from(entity_type))
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Answer the next mutation with `error` instead of applying it.
    pub fn fail_next(&mut self, error: MutationError) {
        self.scripted.push_back(error);
    }

    /// While unreachable every mutation fails as a transport error.
    pub fn set_unreachable(&mut self, unreachable: bool) {
        self.unreachable = unreachable;
    }

    /// Every mutation received, including refused ones.
    pub fn requests(&self) -> &[MutationRequest] {
        &self.requests
    }

    pub fn changes_since(&self, cursor: usize) -> &[ChangeEvent] {
        self.changes.get(cursor..).unwrap_or_default()
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    /// A write from some other client: applied and broadcast as usual.
    pub fn external_update(
        &mut self,
        entity_type: &str,
        id: &str,
        fields: BTreeMap<String, FieldValue>,
    ) -> Option<EntityRecord> {
        self.apply(&entity_type.into(), &id.into(), fields)
    }

    /// Broadcast a raw change without touching the stored row, e.g. a late
    /// delivery of an old event.
    pub fn broadcast(&mut self, event: ChangeEvent) {
        self.changes.push(event);
    }

    pub fn delete(&mut self, entity_type: &str, id: &str) -> bool {
        let entity_type = EntityType::from(entity_type);
        let record_id = RecordId::from(id);
        let existed = self
            .tables
            .get_mut(&entity_type)
            .and_then(|table| table.remove(&record_id))
            .is_some();
        if existed {
            self.changes.push(ChangeEvent::Delete {
                entity_type,
                record_id,
            });
        }
        existed
    }

    fn apply(
        &mut self,
        entity_type: &EntityType,
        id: &RecordId,
        fields: BTreeMap<String, FieldValue>,
    ) -> Option<EntityRecord> {
        let now = self.clock.now();
        let row = self.tables.get_mut(entity_type)?.get_mut(id)?;
        row.fields.extend(fields);
        row.updated_at = now.after(row.updated_at);
        let row = row.clone();
        self.changes.push(ChangeEvent::Update {
            entity_type: entity_type.clone(),
            record: row.clone(),
        });
        Some(row)
    }
}

impl RemoteStore for TestServer {
    fn read(&self, entity_type: &EntityType, record_id: &RecordId) -> Option<EntityRecord> {
        self.tables.get(entity_type)?.get(record_id).cloned()
    }

    fn mutate(&mut self, request: &MutationRequest) -> MutationResponse {
        self.requests.push(request.clone());
        if self.unreachable {
            return Err(MutationError::Connectivity("TypeError: Failed to fetch".into()));
        }
        if let Some(error) = self.scripted.pop_front() {
            return Err(error);
        }
        self.apply(&request.entity_type, &request.record_id, request.fields.clone())
            .ok_or_else(|| MutationError::Server(format!("no {} row with id {}", request.entity_type, request.record_id)))
    }
}
