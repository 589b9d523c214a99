use inbox_relay_service::registry::{PresenceStatus, SocketRegistry};
use inbox_relay_service::services::PRESENCE_ROUTING_KEY;
use inbox_relay_service::test_utils::{bearer, TestHarness};
use inbox_relay_service::{ServerMessage, UserId};
use serde_json::json;

async fn joined(harness: &TestHarness, user: &str) -> inbox_relay_service::ConnectionId {
    let (conn, _rx) = harness.sessions.connect(bearer(user)).await.unwrap();
    let frame = json!({"event": "join_room", "data": {"userId": user}}).to_string();
    harness.sessions.handle_text(&conn, &frame).await;
    conn
}

fn statuses(harness: &TestHarness) -> Vec<String> {
    harness
        .bus
        .published_with_key(PRESENCE_ROUTING_KEY)
        .iter()
        .map(|e| e.payload["status"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_closing_only_connection_publishes_one_offline() {
    let harness = TestHarness::new();
    let user = UserId::new("u1");
    let conn = joined(&harness, "u1").await;
    assert_eq!(statuses(&harness), vec!["online"]);
    harness.bus.clear();

    let outcome = harness.sessions.disconnect(&conn).await.unwrap();
    assert!(outcome.went_offline);

    assert_eq!(statuses(&harness), vec!["offline"]);
    assert_eq!(harness.registry.connection_count(&user).await.unwrap(), 0);
    assert_eq!(
        harness.registry.get_status(&user).await.unwrap(),
        PresenceStatus::Offline
    );
}

#[tokio::test]
async fn test_closing_one_of_two_connections_publishes_nothing() {
    let harness = TestHarness::new();
    let user = UserId::new("u1");
    let first = joined(&harness, "u1").await;
    let _second = joined(&harness, "u1").await;

    // Only the first join announces the user
    assert_eq!(statuses(&harness), vec!["online"]);
    harness.bus.clear();

    harness.sessions.disconnect(&first).await.unwrap();
    assert!(statuses(&harness).is_empty());
    assert_eq!(harness.registry.connection_count(&user).await.unwrap(), 1);
    assert_eq!(
        harness.registry.get_status(&user).await.unwrap(),
        PresenceStatus::Online
    );
}

#[tokio::test]
async fn test_authenticated_but_unjoined_disconnect_stays_quiet() {
    let harness = TestHarness::new();
    let (conn, _rx) = harness.sessions.connect(bearer("u1")).await.unwrap();

    // Binds the identity without joining
    let frame = json!({"event": "get_unread_count"}).to_string();
    harness.sessions.handle_text(&conn, &frame).await;

    let outcome = harness.sessions.disconnect(&conn).await.unwrap();
    assert!(!outcome.went_offline);
    assert!(harness.bus.published().is_empty());
}

#[tokio::test]
async fn test_offline_publish_failure_still_clears_registry() {
    let harness = TestHarness::new();
    let user = UserId::new("u1");
    let conn = joined(&harness, "u1").await;
    harness.bus.fail_publishes(true);

    let outcome = harness.sessions.disconnect(&conn).await.unwrap();
    assert!(outcome.removed);
    assert!(!outcome.published);
    assert_eq!(harness.registry.connection_count(&user).await.unwrap(), 0);
    assert_eq!(harness.registry.stored_status(&user), Some(PresenceStatus::Offline));
}

#[tokio::test]
async fn test_presence_update_reaches_every_local_connection() {
    let harness = TestHarness::new();
    let (_anon, mut anon_rx) = harness
        .sessions
        .connect(inbox_relay_service::auth::Handshake::default())
        .await
        .unwrap();
    let (_other, mut other_rx) = harness.sessions.connect(bearer("u2")).await.unwrap();
    anon_rx.try_recv().unwrap();
    other_rx.try_recv().unwrap();

    joined(&harness, "u1").await;
    harness.pump_bus().await;

    for rx in [&mut anon_rx, &mut other_rx] {
        match rx.try_recv().unwrap() {
            ServerMessage::PresenceUpdate(payload) => {
                assert_eq!(payload.user_id, "u1");
                assert_eq!(payload.status, "online");
            }
            other => panic!("expected presence update, got {:?}", other),
        }
    }
}
