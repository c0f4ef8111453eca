//! Session observation: broadcast events and registered callbacks

use crate::error::SessionError;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use super::state::SessionStatus;

/// Event published to every `SessionManager::events` receiver
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },
    Connected,
    Disconnected {
        reason: String,
    },
    Error(Arc<SessionError>),
    Message {
        topic: String,
        payload: Bytes,
    },
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
    },
    ReconnectFailed {
        max_retries: u32,
    },
}

pub type ConnectedCallback = Arc<dyn Fn() + Send + Sync>;
pub type DisconnectedCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&SessionError) + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&str, &Bytes) + Send + Sync>;

/// Registered listeners, several per kind
#[derive(Default, Clone)]
pub(crate) struct Callbacks {
    pub connected: Vec<ConnectedCallback>,
    pub disconnected: Vec<DisconnectedCallback>,
    pub error: Vec<ErrorCallback>,
    pub message: Vec<MessageCallback>,
    pub reconnect_failed: Vec<ErrorCallback>,
}

/// Notification collected under the session lock, dispatched after release
#[derive(Debug)]
pub(crate) enum Notification {
    Connected,
    Disconnected(String),
    Error(Arc<SessionError>),
    Message { topic: String, payload: Bytes },
    ReconnectFailed(Arc<SessionError>),
}

impl Callbacks {
    pub fn dispatch(&self, notification: &Notification) {
        match notification {
            Notification::Connected => self.connected.iter().for_each(|cb| cb()),
            Notification::Disconnected(reason) => {
                self.disconnected.iter().for_each(|cb| cb(reason))
            }
            Notification::Error(error) => self.error.iter().for_each(|cb| cb(error)),
            Notification::Message { topic, payload } => {
                self.message.iter().for_each(|cb| cb(topic, payload))
            }
            Notification::ReconnectFailed(error) => {
                self.reconnect_failed.iter().for_each(|cb| cb(error))
            }
        }
    }
}
