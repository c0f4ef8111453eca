//! Testing utilities and mock implementations
//!
//! This module provides a mock transport for testing session behaviour
//! without requiring an MQTT broker.

pub mod mocks;

pub use mocks::*;
