//! Buffered publish behaviour of the session manager
//!
//! Tests focus on what reaches the transport and in which order, driving
//! the session through a scripted mock transport.

use bytes::Bytes;
use mqtt_session::session::{
    DropReason, FlushPolicy, PublishOptions, SendOutcome, SessionManager, SessionOptions,
    SessionStatus,
};
use mqtt_session::testing::MockTransport;
use mqtt_session::transport::{ConnectOptions, QoS, Scheme};
use mqtt_session::SessionError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn options() -> SessionOptions {
    SessionOptions::new(ConnectOptions::new(Scheme::Mqtt, "localhost", 1883))
}

/// Let the driver task apply queued transport events
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn pair(topic: &str, payload: &'static str) -> (String, Bytes) {
    (topic.to_string(), Bytes::from_static(payload.as_bytes()))
}

async fn open_session(
    transport: &MockTransport,
    options: SessionOptions,
) -> SessionManager<MockTransport> {
    let session = SessionManager::new(transport.clone(), options);
    session.open();
    transport.emit_connected();
    settle().await;
    assert_eq!(session.status(), SessionStatus::Open);
    session
}

#[tokio::test(start_paused = true)]
async fn test_send_while_closed_buffers_message() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options());

    assert!(!session.send("t", "A", true));

    let buffered = session.buffered();
    assert_eq!(buffered.len(), 1);
    assert_eq!(buffered[0].topic, "t");
    assert_eq!(buffered[0].payload, Bytes::from_static(b"A"));
    assert!(transport.get_published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_without_buffering_drops_message() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options());

    assert!(!session.send("t", "B", false));
    assert_eq!(session.buffered_len(), 0);
    assert_eq!(session.stats().messages_dropped, 1);

    // Existing buffer content is left alone
    session.send("t", "A", true);
    assert!(!session.send("t", "B", false));
    assert_eq!(session.buffered_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_flushes_buffer_with_on_connect_policy() {
    let transport = MockTransport::new();
    let session = SessionManager::new(
        transport.clone(),
        options().with_flush_policy(FlushPolicy::OnConnect),
    );

    assert!(!session.send("t", "A", true));
    assert_eq!(session.buffered_len(), 1);

    session.open();
    transport.emit_connected();
    settle().await;

    assert_eq!(transport.get_published_pairs(), vec![pair("t", "A")]);
    assert_eq!(session.buffered_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_on_next_send_policy_flushes_before_new_message() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options());

    session.send("t", "A", true);
    session.send("u", "B", true);

    session.open();
    transport.emit_connected();
    settle().await;

    // Connected but nothing flushed yet
    assert!(transport.get_published().is_empty());
    assert_eq!(session.buffered_len(), 2);

    assert!(session.send("t", "C", true));
    assert_eq!(
        transport.get_published_pairs(),
        vec![pair("t", "A"), pair("u", "B"), pair("t", "C")]
    );
    assert_eq!(session.buffered_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_flush_buffer_explicitly() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options());

    session.send("t", "A", true);
    assert_eq!(session.flush_buffer(), 0, "nothing flushes while closed");

    session.open();
    transport.emit_connected();
    settle().await;

    assert_eq!(session.flush_buffer(), 1);
    assert_eq!(transport.get_published_pairs(), vec![pair("t", "A")]);
    assert_eq!(session.flush_buffer(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_send_while_open_is_delivered() {
    let transport = MockTransport::new();
    let session = open_session(&transport, options().with_publish_qos(QoS::AtLeastOnce)).await;

    let outcome = session.send_with(
        "topic/browser",
        r#"{ "msg": "Hello, I am browser." }"#,
        PublishOptions::default().retained(),
    );
    assert_eq!(outcome, SendOutcome::Delivered);

    let published = transport.get_published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].qos, QoS::AtLeastOnce);
    assert!(published[0].retain);

    let stats = session.stats();
    assert_eq!(stats.messages_sent, 1);
    assert!(stats.last_activity.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_qos_override_per_send() {
    let transport = MockTransport::new();
    let session = open_session(&transport, options()).await;

    session.send_with(
        "t",
        "A",
        PublishOptions::default().with_qos(QoS::ExactlyOnce),
    );
    assert_eq!(transport.get_published()[0].qos, QoS::ExactlyOnce);
}

#[tokio::test(start_paused = true)]
async fn test_buffer_capacity_drops_overflow() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options().with_buffer_capacity(2));

    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();
    session.on_error(move |e| seen.lock().unwrap().push(e.to_string()));

    assert_eq!(
        session.send_with("t", "1", PublishOptions::default()),
        SendOutcome::Buffered
    );
    session.send("t", "2", true);
    assert_eq!(
        session.send_with("t", "3", PublishOptions::default()),
        SendOutcome::Dropped(DropReason::BufferFull { capacity: 2 })
    );

    assert_eq!(session.buffered_len(), 2);
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert!(errors.lock().unwrap()[0].contains("buffer full"));
}

#[tokio::test(start_paused = true)]
async fn test_publish_failure_keeps_message_buffered() {
    let transport = MockTransport::new();
    let session = open_session(&transport, options()).await;

    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();
    session.on_error(move |e| {
        seen.lock()
            .unwrap()
            .push(matches!(e, SessionError::Transport(_)))
    });

    transport.set_fail_publish(true);
    assert_eq!(
        session.send_with("t", "A", PublishOptions::default()),
        SendOutcome::Buffered
    );
    assert_eq!(
        session.send_with("t", "B", PublishOptions::default().without_buffering()),
        SendOutcome::Dropped(DropReason::Unavailable)
    );
    assert_eq!(session.buffered_len(), 1);
    assert_eq!(*errors.lock().unwrap(), vec![true, true]);

    // Transport recovers: buffered message goes out ahead of the new one
    transport.set_fail_publish(false);
    assert!(session.send("t", "C", true));
    assert_eq!(
        transport.get_published_pairs(),
        vec![pair("t", "A"), pair("t", "C")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_buffer_survives_reconnect_cycles() {
    let transport = MockTransport::new();
    let session = SessionManager::new(
        transport.clone(),
        options().with_flush_policy(FlushPolicy::OnConnect),
    );

    session.send("t", "A", true);
    session.open();

    // First attempt fails before connecting
    transport.fail_connection("broker unavailable");
    settle().await;
    session.send("t", "B", true);
    assert_eq!(session.buffered_len(), 2);

    // Default reconnect delay is 4s
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.connect_attempts(), 2);

    transport.emit_connected();
    settle().await;

    assert_eq!(
        transport.get_published_pairs(),
        vec![pair("t", "A"), pair("t", "B")]
    );
    assert!(transport
        .get_published()
        .iter()
        .all(|message| message.connection == 1));
}
