pub mod client;
pub mod server;

pub use client::TestClient;
pub use server::TestServer;

use fieldsync_core::{EntityRecord, EntitySchema, FieldKind, ManualClock, SchemaRegistry, Timestamp};

/// Field rules for the `tasks` table used across the integration tests.
pub fn tasks_schema() -> SchemaRegistry {
    SchemaRegistry::new().register(
        "tasks",
        EntitySchema::new()
            .field("title", FieldKind::required_text(200))
            .optional("description", FieldKind::text(5_000))
            .field("status", FieldKind::select(["todo", "in_progress", "done"]))
            .optional("tags", FieldKind::multi_select(["bug", "feature", "chore"]))
            .optional("estimate", FieldKind::Number { min: Some(0.0), max: None })
            .optional("done", FieldKind::Checkbox),
    )
}

/// Clock shared by the server and every client, starting well past the
/// timestamps of seeded rows.
pub fn test_clock() -> ManualClock {
    ManualClock::new(Timestamp::from_unix_millis(1_700_000_000_000).unwrap_or(Timestamp::UNIX_EPOCH))
}

/// A task row stamped at the epoch, so any later write is newer.
pub fn seed_task(id: &str, title: &str) -> EntityRecord {
    EntityRecord::new(id, Timestamp::UNIX_EPOCH)
        .with_field("title", title)
        .with_field("description", "")
        .with_field("status", "todo")
}
