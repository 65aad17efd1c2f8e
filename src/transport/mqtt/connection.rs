//! Pure connection configuration for the MQTT transport
//!
//! Broker URL parsing, link state and option construction. No I/O.

use crate::config::SessionConfig;
use crate::transport::ConnectOptions;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use thiserror::Error;
use url::Url;

/// Largest incoming packet accepted; image frames need far more than the broker default
pub const MAX_PACKET_SIZE: u32 = 8 * 1024 * 1024;

/// State of the transport's link to the broker
#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    /// Created, no connect requested yet
    Idle,
    /// Waiting for the broker's ConnAck
    Connecting,
    /// Ready for publish and subscribe
    Connected,
    /// Link dropped or connect failed, with reason
    Disconnected(String),
    /// Transport shut down; no further requests are accepted
    Closed,
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: LinkState },
    #[error("Request rejected by client")]
    RequestRejected(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Transport has been shut down")]
    Disposed,
    #[error("Event loop driver already started")]
    DriverAlreadyStarted,
}

/// Where and how to reach the broker
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub credentials: Option<(String, String)>,
}

impl BrokerEndpoint {
    /// Parse the broker URL; `mqtt://` defaults to 1883, `mqtts://` to 8883 with TLS
    pub fn parse(broker_url: &str) -> Result<Self, MqttError> {
        let url = Url::parse(broker_url)
            .map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(MqttError::InvalidBrokerUrl(broker_url.to_string())),
        };
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
            credentials: None,
        })
    }

    /// Endpoint from configuration, with credentials resolved from the environment
    pub fn from_config(config: &SessionConfig) -> Result<Self, MqttError> {
        let mut endpoint = Self::parse(&config.broker.url)?;
        if let Some(username) = config.get_username() {
            let password = config.get_password().unwrap_or_default();
            endpoint.credentials = Some((username, password));
        }
        Ok(endpoint)
    }
}

/// Build rumqttc options for one connect attempt
pub fn configure_mqtt_options(
    client_id: &str,
    endpoint: &BrokerEndpoint,
    options: &ConnectOptions,
) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(client_id, endpoint.host.clone(), endpoint.port);

    if endpoint.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some((username, password)) = &endpoint.credentials {
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(options.keep_alive);
    mqtt_options.set_clean_start(options.clean_start);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    mqtt_options
}
