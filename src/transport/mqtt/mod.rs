//! `rumqttc`-backed MQTT transport
//!
//! Splits pure functions from I/O the same way throughout:
//!
//! - [`connection`] - Pure mapping of connect options onto `rumqttc` options
//! - [`message_handler`] - Pure classification of event loop output
//! - [`client`] - Impure event loop task and connection handle
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_session::session::{SessionManager, SessionOptions};
//! use mqtt_session::transport::mqtt::MqttTransport;
//! use mqtt_session::transport::{ConnectOptions, Scheme};
//!
//! # async fn example() {
//! let connect = ConnectOptions::new(Scheme::Mqtt, "localhost", 1883);
//! let session = SessionManager::new(MqttTransport::new(), SessionOptions::new(connect));
//! session.open();
//! session.send("topic/browser", r#"{ "msg": "Hello" }"#, true);
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttHandle, MqttTransport};
pub use connection::{configure_mqtt_options, to_rumqttc_qos};
pub use message_handler::{EventRoute, MessageHandler};
