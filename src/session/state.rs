//! Session state types
//!
//! Plain data owned by a session: its status, the outbound buffer, publish
//! options and outcomes, statistics and construction options.

use crate::error::SessionError;
use crate::transport::{ConnectOptions, QoS};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use super::reconnect::ReconnectConfig;

/// Connection status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    #[default]
    Closed,
    Connecting,
    Open,
}

impl SessionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionStatus::Open)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Closed => "CLOSED",
            SessionStatus::Connecting => "CONNECTING",
            SessionStatus::Open => "OPEN",
        };
        f.write_str(label)
    }
}

/// Message waiting for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
        }
    }
}

/// FIFO buffer of messages sent while the session was not open
#[derive(Debug, Clone, Default)]
pub struct OutboundBuffer {
    messages: VecDeque<OutboundMessage>,
    capacity: Option<usize>,
}

impl OutboundBuffer {
    /// Create a buffer, unbounded when `capacity` is None
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            messages: VecDeque::new(),
            capacity,
        }
    }

    /// Append a message; hands it back when the buffer is full
    pub fn push(&mut self, message: OutboundMessage) -> Result<(), OutboundMessage> {
        if self.is_full() {
            return Err(message);
        }
        self.messages.push_back(message);
        Ok(())
    }

    /// Deliver messages front to back until `deliver` fails
    ///
    /// A message that fails stays at the front, followed by everything
    /// behind it. Returns the number delivered before the failure, if any.
    pub fn drain_with<E, F>(&mut self, mut deliver: F) -> Result<usize, (usize, E)>
    where
        F: FnMut(&OutboundMessage) -> Result<(), E>,
    {
        let mut delivered = 0;
        while let Some(message) = self.messages.front() {
            if let Err(e) = deliver(message) {
                return Err((delivered, e));
            }
            self.messages.pop_front();
            delivered += 1;
        }
        Ok(delivered)
    }

    pub fn is_full(&self) -> bool {
        self.capacity
            .is_some_and(|capacity| self.messages.len() >= capacity)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Copy of the buffered messages in delivery order
    pub fn snapshot(&self) -> Vec<OutboundMessage> {
        self.messages.iter().cloned().collect()
    }
}

/// When buffered messages are flushed after a connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Flush lazily, ahead of the next send
    #[default]
    OnNextSend,
    /// Flush as part of handling the connected event
    OnConnect,
}

/// Per-send publish options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    /// QoS override; the session default applies when None
    pub qos: Option<QoS>,
    pub retain: bool,
    pub buffer_if_unavailable: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            qos: None,
            retain: false,
            buffer_if_unavailable: true,
        }
    }
}

impl PublishOptions {
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = Some(qos);
        self
    }

    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }

    pub fn without_buffering(mut self) -> Self {
        self.buffer_if_unavailable = false;
        self
    }
}

/// What happened to a message handed to `send`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the transport
    Delivered,
    /// Queued for delivery once the session is open
    Buffered,
    /// Discarded
    Dropped(DropReason),
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }
}

/// Why a message was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Session not open and buffering not requested
    Unavailable,
    /// Outbound buffer at capacity
    BufferFull { capacity: usize },
}

impl DropReason {
    pub fn into_error(self, topic: impl Into<String>) -> SessionError {
        let topic = topic.into();
        match self {
            DropReason::Unavailable => SessionError::SendUnavailable { topic },
            DropReason::BufferFull { capacity } => SessionError::BufferFull { topic, capacity },
        }
    }
}

/// Topic filter the session keeps subscribed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: String,
    #[serde(default)]
    pub qos: QoS,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            qos,
        }
    }
}

/// Session counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub connects: u64,
    pub disconnects: u64,
    pub reconnect_attempts: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_buffered: u64,
    pub messages_dropped: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl SessionStats {
    pub(crate) fn touch(&mut self) {
        self.last_activity = Some(Utc::now());
    }
}

/// Everything needed to construct a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub connect: ConnectOptions,
    pub reconnect: ReconnectConfig,
    /// QoS used by `send` and by sends without an override
    pub publish_qos: QoS,
    pub flush_policy: FlushPolicy,
    /// Outbound buffer capacity, unbounded when None
    pub buffer_capacity: Option<usize>,
    pub subscriptions: Vec<Subscription>,
    /// Open as part of `SessionManager::start`
    pub connect_immediately: bool,
}

impl SessionOptions {
    pub fn new(connect: ConnectOptions) -> Self {
        Self {
            connect,
            reconnect: ReconnectConfig::default(),
            publish_qos: QoS::AtMostOnce,
            flush_policy: FlushPolicy::default(),
            buffer_capacity: None,
            subscriptions: Vec::new(),
            connect_immediately: true,
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_flush_policy(mut self, flush_policy: FlushPolicy) -> Self {
        self.flush_policy = flush_policy;
        self
    }

    pub fn with_publish_qos(mut self, qos: QoS) -> Self {
        self.publish_qos = qos;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    pub fn with_subscription(mut self, topic: impl Into<String>, qos: QoS) -> Self {
        self.subscriptions.push(Subscription::new(topic, qos));
        self
    }
}
