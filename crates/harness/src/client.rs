use std::time::Duration;

use fieldsync_core::{EntityType, FieldKey, FieldValue, ManualClock};
use fieldsync_engine::{Engine, EngineConfig, EngineError, FocusTracker, ReconcileOutcome};
use fieldsync_storage::{DurableStore, MemoryStore};

use crate::server::TestServer;
use crate::tasks_schema;

/// One browser tab: an engine wired to a focus tracker, the shared clock and
/// its own durable store, plus a cursor into the server's change feed.
pub struct TestClient {
    pub engine: Engine,
    pub focus: FocusTracker,
    pub clock: ManualClock,
    cursor: usize,
}

impl TestClient {
    pub fn new(clock: &ManualClock) -> Result<Self, EngineError> {
        Self::with_store(clock, EngineConfig::default(), Box::new(MemoryStore::new()))
    }

    pub fn with_store(
        clock: &ManualClock,
        config: EngineConfig,
        store: Box<dyn DurableStore>,
    ) -> Result<Self, EngineError> {
        let focus = FocusTracker::new();
        let engine = Engine::new(
            config,
            store,
            Box::new(tasks_schema()),
            Box::new(focus.clone()),
            Box::new(clock.clone()),
        )?;
        Ok(Self {
            engine,
            focus,
            clock: clock.clone(),
            cursor: 0,
        })
    }

    /// Subscribe to `entity_type` and load its current rows.
    pub fn open(&mut self, server: &TestServer, entity_type: &str) {
        self.engine.subscribe(entity_type, None);
        self.engine
            .set_entities(EntityType::from(entity_type), server.records(entity_type));
        self.cursor = server.change_count();
    }

    pub fn field(&self, key: &FieldKey) -> Option<FieldValue> {
        self.engine.field(key)
    }

    /// Focus `key` and type `text` one character at a time, `gap` apart,
    /// through the default debounce.
    pub fn type_text(&mut self, key: &FieldKey, text: &str, gap: Duration) -> Result<(), Box<dyn std::error::Error>> {
        self.focus.focus(key.clone());
        let mut typed = String::new();
        for ch in text.chars() {
            typed.push(ch);
            self.engine.submit_default(key.clone(), FieldValue::text(typed.as_str()))?;
            self.clock.advance(gap);
        }
        Ok(())
    }

    /// Wait out the debounce and deliver everything outbound.
    pub fn settle(&mut self, server: &mut TestServer) -> Result<usize, EngineError> {
        self.clock.advance(self.engine.config().default_debounce());
        self.engine.poll_timers();
        self.engine.exchange(server)
    }

    /// Apply every change the server broadcast since the last pull.
    pub fn pull(&mut self, server: &TestServer) -> Vec<ReconcileOutcome> {
        let changes = server.changes_since(self.cursor).to_vec();
        self.cursor += changes.len();
        changes
            .into_iter()
            .map(|event| self.engine.apply_change(event))
            .collect()
    }

    /// Move focus off `key` and let the engine apply what it held back.
    pub fn blur(&mut self, key: &FieldKey) -> Option<FieldValue> {
        self.focus.blur();
        self.engine.on_blur(key)
    }
}
