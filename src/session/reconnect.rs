//! Pure reconnection decision logic
//!
//! This module contains pure functions deciding whether and when a session
//! reconnects after a transport disconnect.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use super::state::SessionStatus;

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Reconnect automatically after an unexpected disconnect
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Maximum number of retries (None = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Delay before each retry once the backoff pattern is exhausted
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Custom backoff pattern in milliseconds, applied to the first retries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backoff_pattern: Vec<u64>,
}

fn default_enabled() -> bool {
    true
}

fn default_delay_ms() -> u64 {
    4000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: None, // Unlimited retries by default
            delay_ms: default_delay_ms(),
            backoff_pattern: Vec::new(),
        }
    }
}

impl ReconnectConfig {
    /// Fixed delay, bounded retries
    pub fn bounded(max_retries: u32, delay: Duration) -> Self {
        Self {
            enabled: true,
            max_retries: Some(max_retries),
            delay_ms: delay.as_millis() as u64,
            backoff_pattern: Vec::new(),
        }
    }

    /// Never reconnect automatically
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Calculate delay for given attempt (1-based)
    /// Pattern entries first, then `delay_ms` forever
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let millis = self
            .backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.delay_ms);
        Duration::from_millis(millis)
    }

    /// Calculate the maximum total delay across all retries
    /// Returns None if unlimited retries are configured
    pub fn calculate_max_total_time(&self) -> Option<Duration> {
        self.max_retries.map(|max_retries| {
            (1..=max_retries)
                .map(|attempt| self.delay_for_attempt(attempt))
                .sum()
        })
    }

    /// Validate reconnect configuration (pure function)
    pub fn validate(&self) -> Result<(), String> {
        if self.delay_ms == 0 {
            return Err("reconnect delay_ms must be greater than 0".to_string());
        }

        if self.backoff_pattern.iter().any(|delay| *delay == 0) {
            return Err("reconnect backoff_pattern entries must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectDecision {
    /// Schedule reconnection attempt `attempt` after `delay`
    Proceed { attempt: u32, delay: Duration },
    /// User closed the session
    AbortExplicitlyClosed,
    /// Auto-reconnect is turned off
    AbortDisabled,
    /// Retry budget spent
    AbortBudgetExhausted { max_retries: u32 },
}

/// Pure reconnection decision logic
pub struct ReconnectPolicy;

impl ReconnectPolicy {
    /// Determine if reconnection should be attempted (pure function)
    ///
    /// `retry_count` is the number of retries already made since the last
    /// successful connect or explicit open.
    pub fn decide(
        retry_count: u32,
        explicitly_closed: bool,
        config: &ReconnectConfig,
    ) -> ReconnectDecision {
        if explicitly_closed {
            return ReconnectDecision::AbortExplicitlyClosed;
        }

        if !config.enabled {
            return ReconnectDecision::AbortDisabled;
        }

        let attempt = retry_count.saturating_add(1);
        if let Some(max_retries) = config.max_retries {
            if attempt > max_retries {
                return ReconnectDecision::AbortBudgetExhausted { max_retries };
            }
        }

        ReconnectDecision::Proceed {
            attempt,
            delay: config.delay_for_attempt(attempt),
        }
    }

    /// Log session status transition
    pub fn log_transition(from: SessionStatus, to: SessionStatus, retry_count: u32) {
        match (from, to) {
            (SessionStatus::Connecting, SessionStatus::Open) if retry_count > 0 => {
                info!(retry_count, "Reconnection successful");
            }
            (SessionStatus::Connecting, SessionStatus::Open) => {
                info!("MQTT session established");
            }
            (SessionStatus::Open, SessionStatus::Closed) => {
                warn!("MQTT session closed");
            }
            (SessionStatus::Connecting, SessionStatus::Closed) => {
                warn!(retry_count, "MQTT session closed before connecting");
            }
            _ => {
                info!("MQTT session state: {} -> {}", from, to);
            }
        }
    }
}
