//! mqtt-session - reconnecting MQTT session manager
//!
//! Keeps one logical MQTT session alive on top of a pluggable transport:
//! automatic reconnect with bounded retries, an outbound buffer that holds
//! messages while the broker is unreachable, and status and event
//! observation for callers.
//!
//! # Overview
//!
//! - [`session`] - The session state machine, reconnect policy and buffer
//! - [`transport`] - Transport trait boundary and the `rumqttc` adapter
//! - [`config`] - TOML configuration
//! - [`observability`] - Structured logging
//! - [`testing`] - Scripted mock transport
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_session::session::{SessionManager, SessionOptions, SessionStatus};
//! use mqtt_session::testing::MockTransport;
//! use mqtt_session::transport::{ConnectOptions, Scheme};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transport = MockTransport::new();
//! let options = SessionOptions::new(ConnectOptions::new(Scheme::Mqtt, "localhost", 1883));
//! let session = SessionManager::new(transport.clone(), options);
//!
//! // Not open yet: the message waits in the buffer
//! assert!(!session.send("topic/browser", "hello", true));
//! assert_eq!(session.buffered_len(), 1);
//!
//! session.open();
//! assert_eq!(session.status(), SessionStatus::Connecting);
//! # }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use session::{
    FlushPolicy, PublishOptions, ReconnectConfig, SendOutcome, SessionEvent, SessionManager,
    SessionOptions, SessionStatus,
};
pub use transport::mqtt::MqttTransport;
pub use transport::{ConnectOptions, QoS, Scheme, Transport, TransportError, TransportHandle};
