//! Mock implementations for testing
//!
//! Provides a scripted [`Transport`] that records every call made on it and
//! lets tests inject transport events, so session behaviour can be checked
//! without an MQTT broker.

use crate::transport::{
    ConnectOptions, EventSink, QoS, Transport, TransportError, TransportEvent, TransportHandle,
};
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A publish recorded by the mock, tagged with the connection it went through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub connection: usize,
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug)]
struct MockState {
    connections: Vec<(ConnectOptions, EventSink)>,
    connect_attempts: usize,
    failing_connects: usize,
    fail_publish: bool,
    disconnect_on_close: bool,
    published: Vec<PublishedMessage>,
    subscribed: Vec<(String, QoS)>,
    unsubscribed: Vec<String>,
    close_requests: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            connections: Vec::new(),
            connect_attempts: 0,
            failing_connects: 0,
            fail_publish: false,
            disconnect_on_close: true,
            published: Vec::new(),
            subscribed: Vec::new(),
            unsubscribed: Vec::new(),
            close_requests: 0,
        }
    }
}

/// Mock transport for testing
///
/// Clones share state, so a test keeps one clone and hands the other to the
/// session manager. Connections never connect on their own: tests drive them
/// with `emit_*`.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect call is refused
    pub fn with_failure() -> Self {
        let transport = Self::new();
        transport.fail_next_connects(usize::MAX);
        transport
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse the next `count` connect calls synchronously
    pub fn fail_next_connects(&self, count: usize) {
        self.state().failing_connects = count;
    }

    /// Make every publish fail until switched off again
    pub fn set_fail_publish(&self, fail: bool) {
        self.state().fail_publish = fail;
    }

    /// Whether `close` emits `Disconnected` right away (default: true)
    pub fn set_disconnect_on_close(&self, disconnect: bool) {
        self.state().disconnect_on_close = disconnect;
    }

    /// Number of `connect` calls, refused ones included
    pub fn connect_attempts(&self) -> usize {
        self.state().connect_attempts
    }

    /// Number of handles handed out
    pub fn connection_count(&self) -> usize {
        self.state().connections.len()
    }

    pub fn last_connect_options(&self) -> Option<ConnectOptions> {
        self.state()
            .connections
            .last()
            .map(|(options, _)| options.clone())
    }

    pub fn get_published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }

    /// Published (topic, payload) pairs in publish order
    pub fn get_published_pairs(&self) -> Vec<(String, Bytes)> {
        self.state()
            .published
            .iter()
            .map(|m| (m.topic.clone(), m.payload.clone()))
            .collect()
    }

    pub fn get_subscribed(&self) -> Vec<(String, QoS)> {
        self.state().subscribed.clone()
    }

    pub fn get_unsubscribed(&self) -> Vec<String> {
        self.state().unsubscribed.clone()
    }

    pub fn close_requests(&self) -> usize {
        self.state().close_requests
    }

    pub fn clear_history(&self) {
        let mut state = self.state();
        state.published.clear();
        state.subscribed.clear();
        state.unsubscribed.clear();
        state.close_requests = 0;
    }

    /// Deliver an event from connection `index`; false if there is no such connection
    pub fn emit_to(&self, index: usize, event: TransportEvent) -> bool {
        let sink = self.state().connections.get(index).map(|(_, sink)| sink.clone());
        match sink {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    /// Deliver an event from the most recent connection
    pub fn emit(&self, event: TransportEvent) -> bool {
        let last = self.connection_count().checked_sub(1);
        match last {
            Some(index) => self.emit_to(index, event),
            None => false,
        }
    }

    pub fn emit_connected(&self) -> bool {
        self.emit(TransportEvent::Connected)
    }

    pub fn emit_disconnected(&self, reason: &str) -> bool {
        self.emit(TransportEvent::Disconnected {
            reason: reason.to_string(),
        })
    }

    pub fn emit_error(&self, error: TransportError) -> bool {
        self.emit(TransportEvent::Error(error))
    }

    pub fn emit_message(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        self.emit(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.into(),
        })
    }

    /// Error followed by disconnect, as a real transport reports a failed attempt
    pub fn fail_connection(&self, reason: &str) -> bool {
        self.emit_error(TransportError::ConnectionRefused(reason.to_string()))
            && self.emit_disconnected(reason)
    }
}

impl Transport for MockTransport {
    type Handle = MockHandle;

    fn connect(
        &self,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<Self::Handle, TransportError> {
        let mut state = self.state();
        state.connect_attempts += 1;

        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(TransportError::ConnectionRefused(
                "Mock connection failure".to_string(),
            ));
        }

        let index = state.connections.len();
        state.connections.push((options.clone(), events.clone()));

        Ok(MockHandle {
            state: self.state.clone(),
            index,
            events,
        })
    }
}

/// Handle returned by [`MockTransport`]
#[derive(Debug)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    index: usize,
    events: EventSink,
}

impl MockHandle {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl TransportHandle for MockHandle {
    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.fail_publish {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                source: "Mock publish failure".into(),
            });
        }

        state.published.push(PublishedMessage {
            connection: self.index,
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.state().subscribed.push((topic.to_string(), qos));
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.state().unsubscribed.push(topic.to_string());
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        let disconnect = {
            let mut state = self.state();
            state.close_requests += 1;
            state.disconnect_on_close
        };

        if disconnect {
            self.events.emit(TransportEvent::Disconnected {
                reason: "closed by client".to_string(),
            });
        }
        Ok(())
    }
}
