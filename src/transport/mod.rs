//! Transport layer for the broker session
//!
//! This module provides the transport abstraction the session state machine
//! drives, the callback surface a transport drives in return, and the rumqttc
//! based MQTT implementation.

use crate::error::SessionResult;
use crate::session::{ActionListener, ActionResult, DeliveryTracker};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub mod mqtt;

pub use rumqttc::v5::mqttbytes::QoS;

/// Transport trait for broker communication
///
/// Operations only *issue* requests. Their outcomes arrive later through
/// [`ConnectionEvents`] (connect) or an [`ActionListener`]
/// (subscribe, publish). An `Err` means the request could not be issued at all.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Client identifier, used for diagnostics only
    fn client_id(&self) -> &str;

    /// Issue a connect request
    async fn connect(&self, options: &ConnectOptions) -> Result<(), Self::Error>;

    /// Issue a subscribe request for a single topic filter; `listener` observes the outcome
    async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        listener: Arc<dyn ActionListener>,
    ) -> Result<(), Self::Error>;

    /// Hand a message to the broker, returning a handle for the in-flight delivery
    async fn publish(&self, message: Message) -> Result<DeliveryToken, Self::Error>;

    /// Check if the link to the broker is currently up
    fn is_connected(&self) -> bool;

    /// Close the link and release the transport; further requests fail
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// Connection lifecycle callbacks a transport invokes on the session.
///
/// Hooks are called from the transport's background context.
#[async_trait::async_trait]
pub trait ConnectionEvents: Send + Sync + 'static {
    /// The (re)connection is established and the broker acknowledged it
    async fn connected(&self, cause: &str);

    /// An established connection dropped
    fn connection_lost(&self, cause: Option<&str>);

    /// A connect attempt completed with failure
    fn on_failure(&self, result: &ActionResult) -> SessionResult<()>;

    /// A connect attempt completed with success
    fn on_success(&self, result: &ActionResult);

    /// A publish completed outside the publish-call return path
    fn delivery_complete(&self, token: Option<&DeliveryToken>);
}

/// Options applied to each connect request
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub keep_alive: Duration,
    /// Start from a clean broker session; subscriptions are re-issued by the session
    pub clean_start: bool,
    /// How long to wait for the broker's acknowledgement
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(60),
            clean_start: true,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Outbound message: topic plus opaque payload bytes
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
        }
    }
}

/// Handle for one in-flight publish
#[derive(Debug, Clone)]
pub struct DeliveryToken {
    topic: String,
    tracker: Arc<DeliveryTracker>,
}

impl DeliveryToken {
    pub fn new(topic: impl Into<String>, tracker: Arc<DeliveryTracker>) -> Self {
        Self {
            topic: topic.into(),
            tracker,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Broker packet id, 0 until known (and for QoS 0)
    pub fn message_id(&self) -> u16 {
        self.tracker.message_id()
    }

    pub fn is_done(&self) -> bool {
        self.tracker.is_done()
    }

    pub fn tracker(&self) -> &Arc<DeliveryTracker> {
        &self.tracker
    }

    /// Poll until the delivery reaches a terminal state or `timeout` elapses.
    /// Returns whether the delivery completed.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let poll = async {
            while !self.is_done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }
}

/// Message received on one of the subscribed topics
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
    pub received_at: DateTime<Utc>,
}
