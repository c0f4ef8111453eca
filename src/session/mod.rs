//! Reconnecting MQTT session with buffered publish
//!
//! A [`SessionManager`] owns one logical session on top of a
//! [`Transport`](crate::transport::Transport):
//!
//! - [`state`] - Status, outbound buffer and session options
//! - [`reconnect`] - Pure reconnect decisions and backoff delays
//! - [`events`] - Broadcast events and callback registration
//! - [`manager`] - The session state machine and its event driver
//!
//! ```text
//! Closed --open()--> Connecting --connected--> Open
//! Open --disconnected--> Closed   (reconnect scheduled unless closed or out of retries)
//! any --close()--> Closed         (no reconnect until the next open)
//! ```
//!
//! Messages sent while the session is not open are buffered and delivered
//! in send order, each to its own topic, once it is. With
//! [`FlushPolicy::OnNextSend`] the flush happens ahead of the next `send`;
//! with [`FlushPolicy::OnConnect`] it happens as soon as the broker accepts
//! the connection.

pub mod events;
pub mod manager;
pub mod reconnect;
pub mod state;

pub use events::SessionEvent;
pub use manager::SessionManager;
pub use reconnect::{ReconnectConfig, ReconnectDecision, ReconnectPolicy};
pub use state::{
    DropReason, FlushPolicy, OutboundBuffer, OutboundMessage, PublishOptions, SendOutcome,
    SessionOptions, SessionStats, SessionStatus, Subscription,
};
