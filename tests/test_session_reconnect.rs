//! Reconnect, cancellation and lifecycle behaviour of the session manager
//!
//! Runs on a paused Tokio clock so retry delays elapse instantly and
//! deterministically.

use mqtt_session::session::{
    ReconnectConfig, SessionEvent, SessionManager, SessionOptions, SessionStatus,
};
use mqtt_session::testing::MockTransport;
use mqtt_session::transport::{ConnectOptions, QoS, Scheme, TransportError};
use mqtt_session::SessionError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RETRY_DELAY: Duration = Duration::from_millis(100);

fn options(max_retries: u32) -> SessionOptions {
    SessionOptions::new(ConnectOptions::new(Scheme::Mqtt, "localhost", 1883))
        .with_reconnect(ReconnectConfig::bounded(max_retries, RETRY_DELAY))
}

/// Let the driver task apply queued transport events
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Wait past one retry delay
async fn past_retry_delay() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (count.clone(), count)
}

#[tokio::test(start_paused = true)]
async fn test_open_transitions_to_connecting_synchronously() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(2));

    session.open();
    assert_eq!(session.status(), SessionStatus::Connecting);
    assert_eq!(transport.connect_attempts(), 1);

    transport.emit_connected();
    settle().await;
    assert_eq!(session.status(), SessionStatus::Open);
    assert_eq!(session.stats().connects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhausted_after_two_attempts() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(2));

    let (failed, seen) = counter();
    let reported = Arc::new(Mutex::new(None));
    let slot = reported.clone();
    session.on_reconnect_failed(move |e| {
        seen.fetch_add(1, Ordering::SeqCst);
        *slot.lock().unwrap() = Some(matches!(
            e,
            SessionError::ReconnectBudgetExhausted { max_retries: 2 }
        ));
    });

    session.open();

    // Three consecutive disconnects without ever connecting
    for expected_attempts in 1..=2 {
        transport.emit_disconnected("connection refused");
        settle().await;
        assert_eq!(session.retry_count(), expected_attempts);
        past_retry_delay().await;
        assert_eq!(transport.connect_attempts(), 1 + expected_attempts as usize);
    }

    transport.emit_disconnected("connection refused");
    settle().await;

    assert_eq!(failed.load(Ordering::SeqCst), 1);
    assert_eq!(*reported.lock().unwrap(), Some(true));
    assert_eq!(session.status(), SessionStatus::Closed);
    assert_eq!(session.stats().reconnect_attempts, 2);

    // Paused: no further attempts until open()
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.connect_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_open_rearms_after_exhaustion() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(0));

    session.open();
    transport.emit_disconnected("network");
    settle().await;
    assert!(session.retry_count() > 0);

    session.open();
    assert_eq!(session.retry_count(), 0);
    assert_eq!(session.status(), SessionStatus::Connecting);
    assert_eq!(transport.connect_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_pending_reconnect() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(5));

    session.open();
    transport.emit_connected();
    settle().await;

    transport.emit_disconnected("broker went away");
    settle().await;
    assert_eq!(session.retry_count(), 1);

    session.close();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(transport.connect_attempts(), 1);
    assert_eq!(session.status(), SessionStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_close_twice_requests_one_transport_close() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(2));

    session.open();
    transport.emit_connected();
    settle().await;

    session.close();
    session.close();
    settle().await;
    session.close();

    assert_eq!(transport.close_requests(), 1);
    assert_eq!(session.status(), SessionStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_close_without_handle_is_noop() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(2));

    session.close();
    assert_eq!(transport.close_requests(), 0);
    assert_eq!(session.status(), SessionStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_close_does_not_reconnect() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(5));

    let (disconnects, seen) = counter();
    session.on_disconnected(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    session.open();
    transport.emit_connected();
    settle().await;

    session.close();
    settle().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(transport.connect_attempts(), 1);
    assert_eq!(session.retry_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_while_connecting_replaces_attempt() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(2));

    session.open();
    session.open();

    assert_eq!(transport.close_requests(), 1);
    assert_eq!(transport.connection_count(), 2);

    // The replaced handle's disconnect must not trigger a reconnect
    settle().await;
    past_retry_delay().await;
    assert_eq!(transport.connect_attempts(), 2);
    assert_eq!(session.status(), SessionStatus::Connecting);
}

#[tokio::test(start_paused = true)]
async fn test_connected_resets_retry_count() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(5));

    session.open();
    transport.emit_disconnected("network");
    settle().await;
    past_retry_delay().await;
    assert_eq!(session.retry_count(), 1);

    transport.emit_connected();
    settle().await;
    assert_eq!(session.retry_count(), 0);
    assert_eq!(session.status(), SessionStatus::Open);
}

#[tokio::test(start_paused = true)]
async fn test_refused_connect_follows_reconnect_rule() {
    let transport = MockTransport::new();
    transport.fail_next_connects(1);
    let session = SessionManager::new(transport.clone(), options(2));

    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();
    session.on_error(move |e| {
        seen.lock()
            .unwrap()
            .push(matches!(e, SessionError::TransportConnect(_)))
    });

    session.open();
    assert_eq!(session.status(), SessionStatus::Connecting);
    settle().await;

    assert_eq!(*errors.lock().unwrap(), vec![true]);
    assert_eq!(session.status(), SessionStatus::Closed);
    assert_eq!(session.retry_count(), 1);

    past_retry_delay().await;
    assert_eq!(transport.connect_attempts(), 2);
    assert_eq!(transport.connection_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_pattern_delays() {
    let transport = MockTransport::new();
    let reconnect = ReconnectConfig {
        backoff_pattern: vec![25, 50],
        delay_ms: 200,
        ..ReconnectConfig::default()
    };
    let options = options(0).with_reconnect(reconnect);
    let session = SessionManager::new(transport.clone(), options);

    session.open();

    transport.emit_disconnected("down");
    settle().await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(transport.connect_attempts(), 2);

    transport.emit_disconnected("down");
    settle().await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(transport.connect_attempts(), 2, "second retry waits 50ms");
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(transport.connect_attempts(), 3);

    transport.emit_disconnected("down");
    settle().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(transport.connect_attempts(), 3, "pattern exhausted, 200ms");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.connect_attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_reconnect() {
    let transport = MockTransport::new();
    let options = options(5).with_reconnect(ReconnectConfig::disabled());
    let session = SessionManager::new(transport.clone(), options);

    session.open();
    transport.emit_connected();
    settle().await;
    transport.emit_disconnected("network");
    settle().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(transport.connect_attempts(), 1);
    assert_eq!(session.status(), SessionStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_subscriptions_reissued_on_every_connect() {
    let transport = MockTransport::new();
    let options = options(5).with_subscription("topic/mqttx", QoS::AtMostOnce);
    let session = SessionManager::new(transport.clone(), options);

    session.open();
    transport.emit_connected();
    settle().await;

    session.subscribe("topic/extra", QoS::AtLeastOnce);
    assert_eq!(
        transport.get_subscribed(),
        vec![
            ("topic/mqttx".to_string(), QoS::AtMostOnce),
            ("topic/extra".to_string(), QoS::AtLeastOnce),
        ]
    );

    transport.clear_history();
    transport.emit_disconnected("network");
    settle().await;
    past_retry_delay().await;
    transport.emit_connected();
    settle().await;

    assert_eq!(
        transport.get_subscribed(),
        vec![
            ("topic/mqttx".to_string(), QoS::AtMostOnce),
            ("topic/extra".to_string(), QoS::AtLeastOnce),
        ]
    );

    session.unsubscribe("topic/mqttx");
    assert_eq!(transport.get_unsubscribed(), vec!["topic/mqttx".to_string()]);
    assert_eq!(session.subscriptions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_messages_reach_every_listener() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(2));

    let received = Arc::new(Mutex::new(Vec::new()));
    for id in 0..2 {
        let received = received.clone();
        session.on_message(move |topic, payload| {
            received
                .lock()
                .unwrap()
                .push((id, topic.to_string(), payload.clone()));
        });
    }
    let mut events = session.events();

    session.open();
    transport.emit_connected();
    transport.emit_message("topic/mqttx", "hello");
    settle().await;

    assert_eq!(received.lock().unwrap().len(), 2);
    assert_eq!(session.stats().messages_received, 1);

    let mut saw_message = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Message { topic, .. } = event {
            assert_eq!(topic, "topic/mqttx");
            saw_message = true;
        }
    }
    assert!(saw_message);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_drop_reports_disconnect_error() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(2));

    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();
    session.on_error(move |e| seen.lock().unwrap().push(e.to_string()));

    session.open();
    transport.emit_connected();
    settle().await;
    transport.emit_error(TransportError::ConnectionLost("reset by peer".to_string()));
    transport.emit_disconnected("reset by peer");
    settle().await;

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("Transport error"));
    assert!(errors[1].contains("reset by peer"));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_events_broadcast() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(1));
    let mut events = session.events();

    session.open();
    transport.emit_disconnected("down");
    settle().await;
    past_retry_delay().await;
    transport.emit_disconnected("down");
    settle().await;

    let mut scheduled = Vec::new();
    let mut failed = None;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::ReconnectScheduled { attempt, delay } => scheduled.push((attempt, delay)),
            SessionEvent::ReconnectFailed { max_retries } => failed = Some(max_retries),
            _ => {}
        }
    }

    assert_eq!(scheduled, vec![(1, RETRY_DELAY)]);
    assert_eq!(failed, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_watch_status_observes_transitions() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(2));
    let mut status = session.watch_status();
    assert_eq!(*status.borrow(), SessionStatus::Closed);

    session.open();
    assert!(status.has_changed().unwrap());
    assert_eq!(*status.borrow_and_update(), SessionStatus::Connecting);

    transport.emit_connected();
    session
        .wait_for_status(SessionStatus::Open, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(*status.borrow_and_update(), SessionStatus::Open);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_status_times_out() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(2));
    session.open();

    let result = session
        .wait_for_status(SessionStatus::Open, Duration::from_millis(500))
        .await;
    assert!(matches!(result, Err(SessionError::Timeout(_))));
}

#[tokio::test(start_paused = true)]
async fn test_open_with_replaces_connect_options() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(2));

    session.open();
    let replacement =
        ConnectOptions::new(Scheme::Ws, "broker.emqx.io", 8083).with_client_id("emqx_vue3_1");
    session.open_with(replacement.clone());

    assert_eq!(transport.last_connect_options(), Some(replacement.clone()));
    assert_eq!(session.connect_options(), replacement);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_transport() {
    let transport = MockTransport::new();
    let session = SessionManager::new(transport.clone(), options(2));

    session.open();
    transport.emit_connected();
    settle().await;

    session.shutdown().await;
    assert_eq!(transport.close_requests(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.connect_attempts(), 1);
}
