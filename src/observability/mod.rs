//! Observability for MQTT sessions
//!
//! Structured logging through `tracing`. Session state itself is observable
//! through [`SessionManager`](crate::session::SessionManager) status and
//! event channels.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{mqtt_span, session_span};
