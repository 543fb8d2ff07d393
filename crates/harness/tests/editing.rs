use std::collections::BTreeMap;
use std::time::Duration;

use fieldsync_core::{FieldKey, FieldValue};
use fieldsync_engine::{EngineEvent, MutationError, SaveError, Submitted};
use fieldsync_harness::{TestClient, TestServer, seed_task, test_clock};

fn setup() -> Result<(TestServer, TestClient), Box<dyn std::error::Error>> {
    let clock = test_clock();
    let mut server = TestServer::new(clock.clone());
    server.insert("tasks", seed_task("123", "Draft"));
    let mut client = TestClient::new(&clock)?;
    client.open(&server, "tasks");
    Ok((server, client))
}

fn key(field: &str) -> FieldKey {
    FieldKey::new("tasks", "123", field)
}

// ============================================================================
// Debounce (2 tests)
// ============================================================================

#[test]
fn rapid_typing_sends_one_request_with_last_value() -> Result<(), Box<dyn std::error::Error>> {
    let (mut server, mut client) = setup()?;
    client.type_text(&key("title"), "Hello", Duration::from_millis(100))?;

    // Local copy follows every keystroke, nothing has left yet.
    assert_eq!(client.field(&key("title")), Some(FieldValue::text("Hello")));
    assert!(server.requests().is_empty());

    assert_eq!(client.settle(&mut server)?, 1);
    assert_eq!(server.requests().len(), 1);
    assert_eq!(
        server.requests()[0].fields.get("title"),
        Some(&FieldValue::text("Hello"))
    );
    assert_eq!(
        server.record("tasks", "123").and_then(|r| r.get("title")),
        Some(&FieldValue::text("Hello"))
    );
    assert!(matches!(
        client.engine.drain_events().as_slice(),
        [EngineEvent::Saved { .. }]
    ));
    Ok(())
}

#[test]
fn fields_debounce_independently() -> Result<(), Box<dyn std::error::Error>> {
    let (mut server, mut client) = setup()?;
    let quiet = Duration::from_millis(500);

    client.engine.submit(key("title"), "T".into(), quiet)?;
    client.clock.advance(Duration::from_millis(300));
    client.engine.submit(key("description"), "D".into(), quiet)?;

    client.clock.advance(Duration::from_millis(200));
    assert_eq!(client.engine.poll_timers(), 1);
    client.engine.exchange(&mut server)?;
    assert_eq!(server.requests().len(), 1);
    assert!(client.engine.is_update_pending(&key("description")));

    client.clock.advance(Duration::from_millis(300));
    assert_eq!(client.engine.poll_timers(), 1);
    client.engine.exchange(&mut server)?;
    assert_eq!(server.requests().len(), 2);
    assert!(client.engine.next_timeout().is_none());
    Ok(())
}

// ============================================================================
// Failures and rollback (3 tests)
// ============================================================================

#[test]
fn server_error_restores_previous_value() -> Result<(), Box<dyn std::error::Error>> {
    let (mut server, mut client) = setup()?;
    server.fail_next(MutationError::Server("internal error".into()));

    client.engine.submit_immediate(key("title"), "Broken".into())?;
    assert_eq!(client.field(&key("title")), Some(FieldValue::text("Broken")));
    client.engine.exchange(&mut server)?;

    assert_eq!(client.field(&key("title")), Some(FieldValue::text("Draft")));
    assert!(matches!(
        client.engine.drain_events().as_slice(),
        [EngineEvent::SaveFailed {
            rolled_back: true,
            error: SaveError::Server { quiet: false, .. },
            ..
        }]
    ));
    // Not retried.
    assert_eq!(client.engine.queue_len(), 0);
    assert_eq!(server.requests().len(), 1);
    Ok(())
}

#[test]
fn server_validation_error_is_reported_as_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let (mut server, mut client) = setup()?;
    server.fail_next(MutationError::Validation("title too long".into()));

    client.engine.submit_immediate(key("title"), "Long".into())?;
    client.engine.exchange(&mut server)?;

    assert_eq!(client.field(&key("title")), Some(FieldValue::text("Draft")));
    let events = client.engine.drain_events();
    assert_eq!(
        events,
        vec![EngineEvent::SaveFailed {
            keys: vec![key("title")],
            error: SaveError::Rejected("title too long".into()),
            rolled_back: true,
        }]
    );
    Ok(())
}

#[test]
fn invalid_value_is_never_sent() -> Result<(), Box<dyn std::error::Error>> {
    let (mut server, mut client) = setup()?;

    let err = client
        .engine
        .submit_immediate(key("status"), "archived".into())
        .unwrap_err();
    assert!(matches!(err, SaveError::Validation(_)));
    let err = client
        .engine
        .submit_immediate(key("title"), "".into())
        .unwrap_err();
    assert!(matches!(err, SaveError::Validation(_)));

    client.engine.exchange(&mut server)?;
    assert!(server.requests().is_empty());
    assert_eq!(client.field(&key("status")), Some(FieldValue::text("todo")));
    Ok(())
}

// ============================================================================
// Immediate, batch and ordering (3 tests)
// ============================================================================

#[test]
fn immediate_save_skips_debounce() -> Result<(), Box<dyn std::error::Error>> {
    let (mut server, mut client) = setup()?;
    let submitted = client.engine.submit_immediate(key("status"), "done".into())?;
    assert!(matches!(submitted, Submitted::Dispatched(_)));
    client.engine.exchange(&mut server)?;
    assert_eq!(
        server.record("tasks", "123").and_then(|r| r.get("status")),
        Some(&FieldValue::text("done"))
    );
    Ok(())
}

#[test]
fn batch_update_is_one_request() -> Result<(), Box<dyn std::error::Error>> {
    let (mut server, mut client) = setup()?;
    let fields = BTreeMap::from([
        ("title".to_string(), FieldValue::text("Ship it")),
        ("status".to_string(), FieldValue::text("in_progress")),
        ("done".to_string(), FieldValue::Boolean(false)),
    ]);
    client
        .engine
        .submit_batch("tasks".into(), "123".into(), fields)?;
    client.engine.exchange(&mut server)?;

    assert_eq!(server.requests().len(), 1);
    assert_eq!(server.requests()[0].fields.len(), 3);
    let row = server.record("tasks", "123").ok_or("row missing")?;
    assert_eq!(row.get("status"), Some(&FieldValue::text("in_progress")));
    assert_eq!(client.field(&key("title")), Some(FieldValue::text("Ship it")));
    Ok(())
}

#[test]
fn writes_to_one_field_reach_server_in_order() -> Result<(), Box<dyn std::error::Error>> {
    let (mut server, mut client) = setup()?;
    assert!(matches!(
        client.engine.submit_immediate(key("status"), "in_progress".into())?,
        Submitted::Dispatched(_)
    ));
    assert_eq!(
        client.engine.submit_immediate(key("status"), "done".into())?,
        Submitted::Parked
    );

    client.engine.exchange(&mut server)?;
    let sent: Vec<_> = server
        .requests()
        .iter()
        .filter_map(|r| r.fields.get("status").cloned())
        .collect();
    assert_eq!(sent, vec![FieldValue::text("in_progress"), FieldValue::text("done")]);
    assert_eq!(
        server.record("tasks", "123").and_then(|r| r.get("status")),
        Some(&FieldValue::text("done"))
    );
    assert!(!client.engine.is_update_pending(&key("status")));
    Ok(())
}
