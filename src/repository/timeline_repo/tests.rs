use super::TimelineRepository;
use crate::domain::timeline::{TimelineEvent, TimelineEventKind};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::json;

fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    crate::db::configure_sqlite_connection(&conn).unwrap();
    crate::db::ensure_schema(&conn).unwrap();

    for batch_id in ["b1", "b2"] {
        conn.execute(
            r#"
            INSERT INTO production_batch (
                batch_id, batch_sku, product_id, product_name, status,
                target_quantity, created_by, created_at, updated_at
            ) VALUES (?1, ?2, 'p1', 'Kemeja', 'PENDING', 0, 'lead', '2025-01-01 00:00:00', '2025-01-01 00:00:00')
            "#,
            params![batch_id, format!("SKU-{}", batch_id)],
        )
        .unwrap();
    }

    conn
}

fn make_event(event_id: &str, batch_id: &str, kind: TimelineEventKind) -> TimelineEvent {
    TimelineEvent {
        event_id: event_id.to_string(),
        batch_id: batch_id.to_string(),
        event: kind.as_str().to_string(),
        actor_id: Some("lead-1".to_string()),
        details: Some(json!({ "from": "PENDING", "to": "MATERIAL_REQUESTED" })),
        created_at: crate::db::now_ts(),
    }
}

fn append(conn: &Connection, event: &TimelineEvent) {
    TimelineRepository::append_in(conn, event).unwrap();
}

#[test]
fn test_append_and_find_by_batch_keeps_order() {
    let conn = setup_test_db();

    append(&conn, &make_event("e1", "b1", TimelineEventKind::BatchCreated));
    append(&conn, &make_event("e2", "b1", TimelineEventKind::StatusChanged));
    append(&conn, &make_event("e3", "b2", TimelineEventKind::BatchCreated));

    let events = TimelineRepository::find_by_batch_in(&conn, "b1").unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_id, "e1");
    assert_eq!(events[1].event_id, "e2");
    assert_eq!(events[1].details.as_ref().unwrap()["to"], "MATERIAL_REQUESTED");
}

#[test]
fn test_find_recent_spans_batches() {
    let conn = setup_test_db();

    for i in 1..=4 {
        append(&conn, &make_event(&format!("e{}", i), "b1", TimelineEventKind::StatusChanged));
    }
    append(&conn, &make_event("e5", "b2", TimelineEventKind::BatchCreated));

    let recent = TimelineRepository::find_recent_in(&conn, 3).unwrap();
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].event_id, "e5");
    assert_eq!(recent[0].batch_id, "b2");
    assert_eq!(recent[2].event_id, "e3");
}

#[test]
fn test_event_without_details() {
    let conn = setup_test_db();

    let mut event = make_event("e1", "b1", TimelineEventKind::ProgressRecorded);
    event.details = None;
    event.actor_id = None;
    event.created_at = Utc::now().naive_utc();
    append(&conn, &event);

    let events = TimelineRepository::find_by_batch_in(&conn, "b1").unwrap();
    assert_eq!(events[0].details, None);
    assert_eq!(events[0].actor_id, None);
}
