mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use chatsync::ws::ConnectionEvent;
use chatsync::{ClientEvent, ConnectionState, TransportEvent};
use common::*;

fn closed() -> ClientEvent {
    ClientEvent::Transport(TransportEvent::Closed {
        code: Some(1006),
        reason: None,
    })
}

fn opened() -> ClientEvent {
    ClientEvent::Transport(TransportEvent::Opened)
}

const HERE: &str = r#"{"type":"user_joined","room_id":1,"action":"here","users":[{"id":2,"name":"bob"}]}"#;

#[tokio::test]
async fn reconnect_clears_presence_then_resyncs() {
    let h = Harness::new();
    h.api.set_rooms(vec![room(1, "general")]);
    h.api.set_online(1, vec![online(BOB, "bob"), online(3, "carol")]);
    let mut h = h.connected().await;
    h.client.set_current_room(Some(room(1, "general")));
    h.send(frame(HERE)).await;
    assert_eq!(h.client.online_users(1).len(), 1);

    h.send(closed()).await;
    assert_eq!(h.client.connection_state(), ConnectionState::Reconnecting);
    assert!(h.client.online_users(1).is_empty());

    h.advance(Duration::from_millis(1000)).await;
    assert_eq!(h.transport.opens(), 2);

    h.send(opened()).await;
    assert_eq!(h.client.connection_state(), ConnectionState::Connected);
    assert_eq!(h.api.count("list_rooms"), 2);
    assert_eq!(h.api.count("fetch_online_users"), 1);
    assert_eq!(h.client.online_users(1).len(), 2);
    assert_eq!(h.client.connection_info().reconnect_attempts, 0);
}

#[tokio::test]
async fn auto_reconnect_gives_up_after_max_attempts() {
    let mut h = Harness::new();
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    h.client.subscribe(move |event| sink.borrow_mut().push(event.clone()));
    let mut h = h.connected().await;

    for _ in 0..5 {
        h.send(closed()).await;
        assert_eq!(h.client.connection_state(), ConnectionState::Reconnecting);
        h.advance(Duration::from_secs(60)).await;
    }
    h.send(closed()).await;

    assert_eq!(h.client.connection_state(), ConnectionState::Error);
    assert_eq!(h.transport.opens(), 6);
    assert!(matches!(events.borrow().last(), Some(ConnectionEvent::Error(_))));

    h.advance(Duration::from_secs(600)).await;
    assert_eq!(h.transport.opens(), 6);

    h.client.reconnect();
    assert_eq!(h.client.connection_state(), ConnectionState::Connecting);
    assert_eq!(h.transport.opens(), 7);
}

#[tokio::test]
async fn rejected_credentials_stop_retrying() {
    let mut h = Harness::new().connected().await;
    h.client.set_current_room(Some(room(1, "general")));
    h.send(frame(HERE)).await;

    h.send(ClientEvent::Transport(TransportEvent::Closed {
        code: Some(4000),
        reason: Some("bad token".into()),
    }))
    .await;

    assert_eq!(h.client.connection_state(), ConnectionState::Error);
    assert!(h.client.online_users(1).is_empty());
    assert_eq!(h.scheduler.pending(), 0);
}

#[tokio::test]
async fn manual_disconnect_ignores_late_close() {
    let mut h = Harness::new().connected().await;

    h.client.disconnect();
    h.send(closed()).await;

    assert_eq!(h.client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(h.scheduler.pending(), 0);
    assert_eq!(h.transport.closes(), 1);
}

#[tokio::test]
async fn presence_actions_patch_room_list() {
    let mut h = Harness::new().connected().await;
    h.send(frame(HERE)).await;
    h.send(frame(
        r#"{"type":"user_joined","room_id":1,"action":"joining","user":{"id":3,"name":"carol"}}"#,
    ))
    .await;
    h.send(frame(
        r#"{"type":"user_left","room_id":1,"action":"leaving","user":{"id":2,"name":"bob"}}"#,
    ))
    .await;

    let names: Vec<&str> = h.client.online_users(1).iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["carol"]);
}

#[tokio::test]
async fn bare_presence_event_reloads_with_throttle() {
    let h = Harness::new();
    h.api.set_online(1, vec![online(BOB, "bob")]);
    let mut h = h.connected().await;
    h.client.set_current_room(Some(room(1, "general")));

    h.send(frame(r#"{"type":"user_joined","room_id":1}"#)).await;
    h.send(frame(r#"{"type":"user_left","room_id":1}"#)).await;
    assert_eq!(h.api.count("fetch_online_users"), 1);
    assert_eq!(h.client.online_users(1), &[online(BOB, "bob")]);

    h.advance(Duration::from_secs(6)).await;
    h.send(frame(r#"{"type":"user_left","room_id":1}"#)).await;
    assert_eq!(h.api.count("fetch_online_users"), 2);
}

#[tokio::test]
async fn presence_failures_are_swallowed() {
    let h = Harness::new();
    h.api.fail_next("fetch_online_users", chatsync::shared::ChatError::network("down"));
    let mut h = h.connected().await;

    h.client.load_online_users(1).await;

    assert!(h.client.online_users(1).is_empty());
    assert!(h.client.error().is_none());
}

#[tokio::test]
async fn run_drains_events_in_order() {
    let mut h = Harness::new();
    h.client.connect();
    let msg = message(1, 1, BOB, "hello", 1);
    let events = futures_util::stream::iter(vec![opened(), message_frame(&msg), closed()]);

    h.client.run(events).await;

    assert_eq!(h.client.messages(1), &[msg]);
    assert_eq!(h.client.connection_state(), ConnectionState::Reconnecting);
}
