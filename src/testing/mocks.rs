//! Mock implementations for testing
//!
//! Provides a mock [`Transport`] that records every request, so the session
//! state machine and publish gateway can be tested without a broker.

use crate::session::{ActionListener, ActionResult, DeliveryTracker};
use crate::transport::{ConnectOptions, DeliveryToken, Message, QoS, Transport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Errors the mock transport can be told to produce
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockTransportError {
    #[error("Mock {0} refused")]
    Refused(&'static str),
    #[error("Mock transport not connected")]
    NotConnected,
    #[error("Mock transport shut down")]
    ShutDown,
}

#[derive(Debug, Default)]
struct Recorded {
    connects: Vec<ConnectOptions>,
    subscribe_attempts: usize,
    subscribed: Vec<(String, QoS)>,
    published: Vec<Message>,
    tokens: Vec<DeliveryToken>,
    shut_down: bool,
}

/// Mock transport for testing
#[derive(Debug)]
pub struct MockTransport {
    client_id: String,
    refuse_connect: bool,
    refuse_subscribe: bool,
    refuse_publish: bool,
    /// Complete delivery trackers as soon as the publish is accepted
    auto_complete: bool,
    connected: Mutex<bool>,
    next_packet_id: AtomicU16,
    recorded: Mutex<Recorded>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            client_id: "mock-client".to_string(),
            refuse_connect: false,
            refuse_subscribe: false,
            refuse_publish: false,
            auto_complete: true,
            connected: Mutex::new(true),
            next_packet_id: AtomicU16::new(1),
            recorded: Mutex::new(Recorded::default()),
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect request fails to be issued
    pub fn with_connect_refused() -> Self {
        Self {
            refuse_connect: true,
            ..Default::default()
        }
    }

    /// Every subscribe request fails to be issued
    pub fn with_subscribe_refused() -> Self {
        Self {
            refuse_subscribe: true,
            ..Default::default()
        }
    }

    /// Every publish request fails to be issued
    pub fn with_publish_failure() -> Self {
        Self {
            refuse_publish: true,
            ..Default::default()
        }
    }

    /// Link reports disconnected; publishes fail fast
    pub fn disconnected() -> Self {
        Self {
            connected: Mutex::new(false),
            ..Default::default()
        }
    }

    /// Publishes stay in flight until completed by the test
    pub fn with_pending_deliveries() -> Self {
        Self {
            auto_complete: false,
            ..Default::default()
        }
    }

    pub fn set_connected(&self, connected: bool) {
        *lock(&self.connected) = connected;
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.recorded).connects.len()
    }

    pub fn connect_options(&self) -> Vec<ConnectOptions> {
        lock(&self.recorded).connects.clone()
    }

    /// Topics of accepted subscribe requests, in request order
    pub fn subscribed_topics(&self) -> Vec<String> {
        lock(&self.recorded)
            .subscribed
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        lock(&self.recorded).subscribed.clone()
    }

    /// Subscribe requests made, accepted or not
    pub fn subscribe_attempts(&self) -> usize {
        lock(&self.recorded).subscribe_attempts
    }

    pub fn published_messages(&self) -> Vec<Message> {
        lock(&self.recorded).published.clone()
    }

    /// Tokens handed out for accepted publishes
    pub fn delivery_tokens(&self) -> Vec<DeliveryToken> {
        lock(&self.recorded).tokens.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.recorded).shut_down
    }

    pub fn clear_history(&self) {
        let mut recorded = lock(&self.recorded);
        recorded.connects.clear();
        recorded.subscribe_attempts = 0;
        recorded.subscribed.clear();
        recorded.published.clear();
        recorded.tokens.clear();
    }

    fn packet_id(&self) -> u16 {
        self.next_packet_id.fetch_add(1, Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<(), MockTransportError> {
        if lock(&self.recorded).shut_down {
            return Err(MockTransportError::ShutDown);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn connect(&self, options: &ConnectOptions) -> Result<(), Self::Error> {
        self.ensure_open()?;
        lock(&self.recorded).connects.push(options.clone());
        if self.refuse_connect {
            return Err(MockTransportError::Refused("connect"));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        listener: std::sync::Arc<dyn ActionListener>,
    ) -> Result<(), Self::Error> {
        self.ensure_open()?;
        {
            let mut recorded = lock(&self.recorded);
            recorded.subscribe_attempts += 1;
            if self.refuse_subscribe {
                return Err(MockTransportError::Refused("subscribe"));
            }
            recorded.subscribed.push((topic.to_string(), qos));
        }

        listener.on_success(&ActionResult::for_topic(self.packet_id(), topic));
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<DeliveryToken, Self::Error> {
        self.ensure_open()?;
        if !*lock(&self.connected) {
            return Err(MockTransportError::NotConnected);
        }
        if self.refuse_publish {
            return Err(MockTransportError::Refused("publish"));
        }

        let tracker = std::sync::Arc::new(DeliveryTracker::new("Delivery"));
        let token = DeliveryToken::new(message.topic.clone(), tracker.clone());
        if message.qos != QoS::AtMostOnce {
            tracker.assign_message_id(self.packet_id());
        }
        if self.auto_complete {
            tracker.on_success(&ActionResult::for_topic(
                tracker.message_id(),
                message.topic.clone(),
            ));
        }

        let mut recorded = lock(&self.recorded);
        recorded.published.push(message);
        recorded.tokens.push(token.clone());
        Ok(token)
    }

    fn is_connected(&self) -> bool {
        *lock(&self.connected) && !self.is_shut_down()
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        lock(&self.recorded).shut_down = true;
        *lock(&self.connected) = false;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
