//! Configuration for the broker session
//!
//! Loaded from a TOML file. Credentials are never stored in the file, only the
//! names of the environment variables that hold them.

use crate::publish::ImageFormat;
use crate::session::{RetryPolicy, SessionSettings};
use crate::transport::{ConnectOptions, QoS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub broker: BrokerSection,
    pub session: SessionSection,
    #[serde(default)]
    pub publish: PublishSection,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, `mqtt://host[:port]` or `mqtts://host[:port]`
    pub url: String,
    /// Client identifier; generated per process when absent
    pub client_id: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub clean_start: bool,
}

/// Subscriptions and reconnect behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// Topic filters, subscribed in this order after every (re)connect
    pub topics: Vec<String>,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

/// Outbound publish settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default)]
    pub image_format: ImageFormatName,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            qos: default_qos(),
            image_format: ImageFormatName::default(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormatName {
    #[default]
    Jpeg,
    Png,
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_qos() -> u8 {
    1
}

fn default_max_retries() -> u32 {
    crate::session::state::DEFAULT_MAX_RETRIES
}

fn default_reconnect_delay_ms() -> u64 {
    crate::session::state::DEFAULT_RECONNECT_DELAY.as_millis() as u64
}

fn default_jpeg_quality() -> u8 {
    90
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.broker.url).map_err(|e| {
            ConfigError::InvalidConfig(format!("broker url '{}': {e}", self.broker.url))
        })?;

        if let Some(client_id) = &self.broker.client_id {
            validate_client_id(client_id)?;
        }

        if self.session.topics.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "[session] topics must list at least one topic".to_string(),
            ));
        }
        for topic in &self.session.topics {
            validate_topic_filter(topic)?;
        }

        qos_from_level(self.session.qos)?;
        qos_from_level(self.publish.qos)?;

        if !(1..=100).contains(&self.publish.jpeg_quality) {
            return Err(ConfigError::InvalidConfig(format!(
                "[publish] jpeg_quality must be within 1..=100, got {}",
                self.publish.jpeg_quality
            )));
        }

        Ok(())
    }

    /// Configured client id, or a fresh unique one
    pub fn resolve_client_id(&self) -> String {
        self.broker
            .client_id
            .clone()
            .unwrap_or_else(|| format!("broker-session-{}", Uuid::new_v4().simple()))
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
            clean_start: self.broker.clean_start,
            connect_timeout: Duration::from_secs(self.broker.connect_timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.session.max_retries,
            reconnect_delay: Duration::from_millis(self.session.reconnect_delay_ms),
        }
    }

    pub fn session_settings(&self) -> Result<SessionSettings, ConfigError> {
        Ok(SessionSettings {
            topics: self.session.topics.clone(),
            qos: qos_from_level(self.session.qos)?,
            policy: self.retry_policy(),
            connect_options: self.connect_options(),
        })
    }

    pub fn publish_qos(&self) -> Result<QoS, ConfigError> {
        qos_from_level(self.publish.qos)
    }

    pub fn image_format(&self) -> ImageFormat {
        match self.publish.image_format {
            ImageFormatName::Jpeg => ImageFormat::Jpeg {
                quality: self.publish.jpeg_quality,
            },
            ImageFormatName::Png => ImageFormat::Png,
        }
    }

    /// Get MQTT username from environment variable
    pub fn get_username(&self) -> Option<String> {
        get_env_var_optional(self.broker.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_password(&self) -> Option<String> {
        get_env_var_optional(self.broker.password_env.as_ref())
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

/// Map a numeric QoS level onto the transport's QoS
pub fn qos_from_level(level: u8) -> Result<QoS, ConfigError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ConfigError::InvalidConfig(format!(
            "QoS must be 0, 1 or 2, got {other}"
        ))),
    }
}

fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    let valid_chars = client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if client_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidConfig(format!(
            "Client ID '{client_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }
    Ok(())
}

/// Validate an MQTT topic filter: `+` must fill a whole level, `#` must be the last level
pub fn validate_topic_filter(filter: &str) -> Result<(), ConfigError> {
    if filter.is_empty() {
        return Err(ConfigError::InvalidConfig(
            "topic filters must not be empty".to_string(),
        ));
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        let misplaced_plus = level.contains('+') && *level != "+";
        let misplaced_hash =
            level.contains('#') && (*level != "#" || index != levels.len() - 1);
        if misplaced_plus || misplaced_hash {
            return Err(ConfigError::InvalidConfig(format!(
                "invalid wildcard placement in topic filter '{filter}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[broker]
url = "mqtt://localhost:1883"

[session]
topics = ["sensors/temp", "sensors/humidity"]
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = SessionConfig::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.broker.url, "mqtt://localhost:1883");
        assert_eq!(config.broker.client_id, None);
        assert_eq!(config.broker.keep_alive_secs, 60);
        assert_eq!(config.broker.connect_timeout_secs, 10);
        assert!(config.broker.clean_start);
        assert_eq!(config.session.topics, vec!["sensors/temp", "sensors/humidity"]);
        assert_eq!(config.session.qos, 1);
        assert_eq!(config.session.max_retries, 5);
        assert_eq!(config.session.reconnect_delay_ms, 2500);
        assert_eq!(config.publish, PublishSection::default());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = SessionConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_session_settings_keep_topic_order() {
        let config = SessionConfig::from_toml_str(MINIMAL).unwrap();
        let settings = config.session_settings().unwrap();
        assert_eq!(settings.topics, vec!["sensors/temp", "sensors/humidity"]);
        assert_eq!(settings.qos, QoS::AtLeastOnce);
    }

    #[test]
    fn test_image_format_selection() {
        let mut config = SessionConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.image_format(), ImageFormat::Jpeg { quality: 90 });

        config.publish.image_format = ImageFormatName::Png;
        assert_eq!(config.image_format(), ImageFormat::Png);
    }

    #[test]
    fn test_generated_client_ids_are_unique() {
        let config = SessionConfig::from_toml_str(MINIMAL).unwrap();
        let a = config.resolve_client_id();
        let b = config.resolve_client_id();
        assert!(a.starts_with("broker-session-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_configured_client_id_is_used() {
        let mut config = SessionConfig::from_toml_str(MINIMAL).unwrap();
        config.broker.client_id = Some("camera-7".to_string());
        assert_eq!(config.resolve_client_id(), "camera-7");
    }

    #[test]
    fn test_qos_from_level() {
        assert_eq!(qos_from_level(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2).unwrap(), QoS::ExactlyOnce);
        assert!(qos_from_level(3).is_err());
    }

    #[test]
    fn test_topic_filter_validation() {
        assert!(validate_topic_filter("sensors/temp").is_ok());
        assert!(validate_topic_filter("sensors/+/temp").is_ok());
        assert!(validate_topic_filter("sensors/#").is_ok());
        assert!(validate_topic_filter("#").is_ok());

        assert!(validate_topic_filter("").is_err());
        assert!(validate_topic_filter("sensors/#/temp").is_err());
        assert!(validate_topic_filter("sensors/te+mp").is_err());
        assert!(validate_topic_filter("sensors/temp#").is_err());
    }

    #[test]
    fn test_invalid_client_id() {
        assert!(validate_client_id("invalid@client").is_err());
        assert!(validate_client_id("").is_err());
        assert!(validate_client_id("valid-client_1.0").is_ok());
    }
}
