//! Transport layer for MQTT sessions
//!
//! This module defines the capability the session manager is built on: a
//! [`Transport`] opens connections and hands back a [`TransportHandle`], and
//! reports lifecycle events asynchronously through an [`EventSink`].
//!
//! The MQTT wire protocol itself lives behind this boundary. [`mqtt`]
//! provides the `rumqttc`-backed implementation.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

pub mod mqtt;

/// Transport capability used by the session manager
///
/// `connect` must not block: it creates the handle, starts any background
/// I/O and returns. The outcome of the attempt is reported later through
/// the sink as exactly one of `Connected` or `Error`/`Disconnected`.
pub trait Transport: Send + Sync + 'static {
    type Handle: TransportHandle;

    /// Start a connection attempt for the given options
    fn connect(
        &self,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<Self::Handle, TransportError>;
}

/// Live connection owned by a session
///
/// All operations enqueue work and return immediately. Completion and
/// failures of the underlying I/O arrive as [`TransportEvent`]s.
pub trait TransportHandle: Send + 'static {
    /// Publish a payload to a topic
    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Subscribe to a topic filter
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    /// Remove a subscription
    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Request graceful shutdown; `Disconnected` is emitted once it completes
    fn close(&self) -> Result<(), TransportError>;
}

/// Lifecycle events emitted by a transport connection
#[derive(Debug)]
pub enum TransportEvent {
    /// Broker accepted the connection
    Connected,
    /// Connection ended, for whatever reason
    Disconnected { reason: String },
    /// Connection or protocol failure
    Error(TransportError),
    /// Inbound publish on a subscribed topic
    Message { topic: String, payload: Bytes },
}

/// Event tagged with the generation of the handle that produced it
#[derive(Debug)]
pub(crate) struct TaggedEvent {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Delivery endpoint handed to a transport at connect time
///
/// Every event is tagged with the generation of the connection attempt so
/// the session can ignore events from handles it has already replaced.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    /// Generation of the connection attempt this sink belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Emit an event; returns false once the session has gone away
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    /// Check whether the receiving session has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// MQTT quality of service level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// QoS 0
    #[default]
    AtMostOnce,
    /// QoS 1
    AtLeastOnce,
    /// QoS 2
    ExactlyOnce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid QoS level {0}, expected 0, 1 or 2")]
pub struct InvalidQos(pub u8);

impl TryFrom<u8> for QoS {
    type Error = InvalidQos;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(InvalidQos(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// Connection scheme for the broker address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain TCP
    #[default]
    #[serde(alias = "tcp")]
    Mqtt,
    /// TCP with TLS
    #[serde(alias = "ssl")]
    Mqtts,
    /// WebSocket
    Ws,
    /// WebSocket over TLS
    Wss,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Mqtt => "mqtt",
            Scheme::Mqtts => "mqtts",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }

    /// Conventional broker port for this scheme
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Mqtt => 1883,
            Scheme::Mqtts => 8883,
            Scheme::Ws => 8083,
            Scheme::Wss => 8084,
        }
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self, Scheme::Ws | Scheme::Wss)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Scheme::Mqtts | Scheme::Wss)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a transport needs to open a connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Path component, only meaningful for WebSocket schemes
    pub path: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub clean_session: bool,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl ConnectOptions {
    /// Options with conventional defaults and a random client id
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
            path: if scheme.is_websocket() {
                "/mqtt".to_string()
            } else {
                String::new()
            },
            client_id: generate_client_id(DEFAULT_CLIENT_ID_PREFIX),
            username: None,
            password: None,
            clean_session: true,
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Set username and password
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Replace the client id
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Broker URL: `scheme://host:port/path`
    pub fn url(&self) -> String {
        let path = if self.path.is_empty() || self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, path)
    }
}

pub const DEFAULT_CLIENT_ID_PREFIX: &str = "mqtt_session_";

/// Client id made of a prefix and eight random hex characters
pub fn generate_client_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", &suffix[..8])
}

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid broker address: {0}")]
    InvalidAddress(String),
    #[error("Invalid client id: {0:?}")]
    InvalidClientId(String),
    #[error("Connection failed")]
    ConnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection refused by broker: {0}")]
    ConnectionRefused(String),
    #[error("No connection acknowledgement within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Publishing to {topic} failed")]
    PublishFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Subscription to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },
    #[error("Close request failed")]
    CloseFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Transport is not connected")]
    NotConnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_conversion() {
        assert_eq!(QoS::try_from(0), Ok(QoS::AtMostOnce));
        assert_eq!(QoS::try_from(1), Ok(QoS::AtLeastOnce));
        assert_eq!(QoS::try_from(2), Ok(QoS::ExactlyOnce));
        assert_eq!(QoS::try_from(3), Err(InvalidQos(3)));
        assert_eq!(u8::from(QoS::ExactlyOnce), 2);
    }

    #[test]
    fn test_scheme_default_ports() {
        assert_eq!(Scheme::Mqtt.default_port(), 1883);
        assert_eq!(Scheme::Mqtts.default_port(), 8883);
        assert_eq!(Scheme::Ws.default_port(), 8083);
        assert!(Scheme::Wss.is_tls());
        assert!(Scheme::Wss.is_websocket());
        assert!(!Scheme::Mqtt.is_websocket());
    }

    #[test]
    fn test_connect_options_url() {
        let options = ConnectOptions::new(Scheme::Ws, "broker.emqx.io", 8083);
        assert_eq!(options.url(), "ws://broker.emqx.io:8083/mqtt");

        let mut options = ConnectOptions::new(Scheme::Mqtt, "localhost", 1883);
        assert_eq!(options.url(), "mqtt://localhost:1883");

        options.path = "custom".to_string();
        assert_eq!(options.url(), "mqtt://localhost:1883/custom");
    }

    #[test]
    fn test_generated_client_ids_are_unique() {
        let first = generate_client_id("emqx_");
        let second = generate_client_id("emqx_");
        assert!(first.starts_with("emqx_"));
        assert_eq!(first.len(), "emqx_".len() + 8);
        assert_ne!(first, second);
    }

    #[test]
    fn test_event_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(7, tx);
        assert_eq!(sink.generation(), 7);
        assert!(sink.emit(TransportEvent::Connected));

        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.emit(TransportEvent::Connected));
    }
}
