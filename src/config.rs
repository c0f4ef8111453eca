//! Configuration system for MQTT sessions
//!
//! Loads a [`SessionConfig`] from TOML, validates it and turns it into the
//! [`SessionOptions`] a [`SessionManager`](crate::session::SessionManager)
//! is built from. Defaults mirror a public test broker over WebSocket.

use crate::session::{FlushPolicy, ReconnectConfig, SessionOptions, Subscription};
use crate::transport::{generate_client_id, ConnectOptions, QoS, Scheme, DEFAULT_CLIENT_ID_PREFIX};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main session configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Open the session as soon as it is started
    #[serde(default = "default_connect_immediately")]
    pub connect_immediately: bool,
    pub broker: BrokerSection,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub buffer: BufferSection,
    /// Topic filters subscribed on every connect
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

fn default_connect_immediately() -> bool {
    true
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// mqtt | tcp | mqtts | ssl | ws | wss
    #[serde(default)]
    pub protocol: Scheme,
    pub host: String,
    /// Defaults to the protocol's conventional port
    pub port: Option<u16>,
    /// WebSocket path (default: /mqtt)
    pub path: Option<String>,
    /// Fixed client id; when unset one is generated from `client_id_prefix`
    pub client_id: Option<String>,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_clean")]
    pub clean: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_client_id_prefix() -> String {
    DEFAULT_CLIENT_ID_PREFIX.to_string()
}

fn default_clean() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

fn default_keep_alive_secs() -> u64 {
    60
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            protocol: Scheme::Ws,
            host: "broker.emqx.io".to_string(),
            port: Some(8083),
            path: Some("/mqtt".to_string()),
            client_id: None,
            client_id_prefix: default_client_id_prefix(),
            username: None,
            password: None,
            username_env: None,
            password_env: None,
            clean: default_clean(),
            connect_timeout_ms: default_connect_timeout_ms(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

/// Publish section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    /// Default QoS for `send`
    #[serde(default)]
    pub qos: QoS,
    #[serde(default)]
    pub flush_policy: FlushPolicy,
}

/// Outbound buffer section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BufferSection {
    /// Maximum buffered messages (None = unbounded)
    pub capacity: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_immediately: default_connect_immediately(),
            broker: BrokerSection::default(),
            reconnect: ReconnectConfig::default(),
            publish: PublishSection::default(),
            buffer: BufferSection::default(),
            subscriptions: Vec::new(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid client ID: {0}")]
    InvalidClientId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot check on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.host must not be empty".to_string(),
            ));
        }

        if self.broker.port == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "broker.port must be greater than 0".to_string(),
            ));
        }

        if self.broker.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        match &self.broker.client_id {
            Some(client_id) => validate_client_id(client_id, false)?,
            None => validate_client_id(&self.broker.client_id_prefix, true)?,
        }

        self.reconnect
            .validate()
            .map_err(ConfigError::InvalidConfig)?;

        if self.buffer.capacity == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "buffer.capacity must be greater than 0 when set".to_string(),
            ));
        }

        if let Some(subscription) = self
            .subscriptions
            .iter()
            .find(|s| s.topic.trim().is_empty())
        {
            return Err(ConfigError::InvalidConfig(format!(
                "subscription topic must not be empty (qos {:?})",
                subscription.qos
            )));
        }

        Ok(())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    fn resolve(value: &Option<String>, env: &Option<String>) -> Result<Option<String>, ConfigError> {
        match (value, env) {
            (Some(value), _) => Ok(Some(value.clone())),
            (None, Some(env)) => Self::get_env_var_required(env).map(Some),
            (None, None) => Ok(None),
        }
    }

    /// Get MQTT username, from the config or its environment variable
    pub fn get_mqtt_username(&self) -> Result<Option<String>, ConfigError> {
        Self::resolve(&self.broker.username, &self.broker.username_env)
    }

    /// Get MQTT password, from the config or its environment variable
    pub fn get_mqtt_password(&self) -> Result<Option<String>, ConfigError> {
        Self::resolve(&self.broker.password, &self.broker.password_env)
    }

    /// Build transport connect options, resolving credentials now
    pub fn connect_options(&self) -> Result<ConnectOptions, ConfigError> {
        let broker = &self.broker;
        let port = broker.port.unwrap_or_else(|| broker.protocol.default_port());
        let mut options = ConnectOptions::new(broker.protocol, broker.host.trim(), port);

        if let Some(path) = &broker.path {
            options.path = path.clone();
        }
        options.client_id = match &broker.client_id {
            Some(client_id) => client_id.clone(),
            None => generate_client_id(&broker.client_id_prefix),
        };
        options.username = self.get_mqtt_username()?;
        options.password = self.get_mqtt_password()?;
        options.clean_session = broker.clean;
        options.keep_alive = Duration::from_secs(broker.keep_alive_secs);
        options.connect_timeout = Duration::from_millis(broker.connect_timeout_ms);

        Ok(options)
    }

    /// Build the options for a session manager
    pub fn session_options(&self) -> Result<SessionOptions, ConfigError> {
        let mut options = SessionOptions::new(self.connect_options()?)
            .with_reconnect(self.reconnect.clone())
            .with_publish_qos(self.publish.qos)
            .with_flush_policy(self.publish.flush_policy);
        options.buffer_capacity = self.buffer.capacity;
        options.subscriptions = self.subscriptions.clone();
        options.connect_immediately = self.connect_immediately;
        Ok(options)
    }

    /// Copy with the literal password masked, for display
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.broker.password.is_some() {
            config.broker.password = Some("********".to_string());
        }
        config
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
protocol = "mqtt"
host = "localhost"
port = 1883
client_id = "test-session"

[reconnect]
max_retries = 2
delay_ms = 100

[[subscriptions]]
topic = "topic/mqttx"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Validate client id characters ([a-zA-Z0-9._-]); a prefix may be empty
fn validate_client_id(client_id: &str, is_prefix: bool) -> Result<(), ConfigError> {
    let valid_chars = client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if (!is_prefix && client_id.is_empty()) || !valid_chars {
        return Err(ConfigError::InvalidClientId(format!(
            "Client ID '{client_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
