//! Impure I/O for the MQTT transport
//!
//! A background driver task owns the rumqttc event loop and dispatches
//! connection events to the session; the transport handle only issues
//! requests and never blocks on the event loop.

use super::connection::{configure_mqtt_options, BrokerEndpoint, LinkState, MqttError};
use super::ledger::{PendingSubscribe, RequestLedger};
use super::router::{route_event, EventRoute};
use crate::config::SessionConfig;
use crate::session::{ActionListener, ActionResult, DeliveryTracker};
use crate::transport::{
    ConnectOptions, ConnectionEvents, DeliveryToken, InboundMessage, Message, QoS, Transport,
};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{AsyncClient, Event, EventLoop};
use rumqttc::Outgoing;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Capacity of rumqttc's request channel
const REQUEST_CAPACITY: usize = 64;

/// How long a clean DISCONNECT may take on shutdown
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

enum DriverCommand {
    Connect(ConnectOptions),
    Shutdown,
}

/// Connection notices, delivered to the session in the order the driver saw them
enum Notice {
    Connected,
    Lost(String),
}

/// Client handle and request bookkeeping shared with the driver
#[derive(Default)]
struct Link {
    client: Option<AsyncClient>,
    ledger: RequestLedger,
}

/// rumqttc based transport
pub struct MqttTransport {
    client_id: String,
    endpoint: BrokerEndpoint,
    link: Arc<Mutex<Link>>,
    state_tx: Arc<watch::Sender<LinkState>>,
    state_rx: watch::Receiver<LinkState>,
    command_tx: mpsc::UnboundedSender<DriverCommand>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<DriverCommand>>>,
    inbound: Arc<Mutex<Option<mpsc::Sender<InboundMessage>>>>,
    driver_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    pub fn new(client_id: impl Into<String>, endpoint: BrokerEndpoint) -> Self {
        let (state_tx, state_rx) = watch::channel(LinkState::Idle);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        Self {
            client_id: client_id.into(),
            endpoint,
            link: Arc::new(Mutex::new(Link::default())),
            state_tx: Arc::new(state_tx),
            state_rx,
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            inbound: Arc::new(Mutex::new(None)),
            driver_handle: Mutex::new(None),
        }
    }

    /// Build a transport from configuration, resolving the client id
    pub fn from_config(config: &SessionConfig) -> Result<Self, MqttError> {
        let endpoint = BrokerEndpoint::from_config(config)?;
        Ok(Self::new(config.resolve_client_id(), endpoint))
    }

    /// Spawn the event loop driver that reports to `events`.
    ///
    /// Must be called once, from within a tokio runtime.
    pub fn start(&self, events: Arc<dyn ConnectionEvents>) -> Result<(), MqttError> {
        let commands = lock(&self.command_rx)
            .take()
            .ok_or(MqttError::DriverAlreadyStarted)?;

        // Subscribing from `connected` issues requests the driver must keep
        // polling for, so notices run on their own task
        let (notices, pending_notices) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_notices(events.clone(), pending_notices));

        let driver = Driver {
            client_id: self.client_id.clone(),
            endpoint: self.endpoint.clone(),
            link: self.link.clone(),
            state_tx: self.state_tx.clone(),
            inbound: self.inbound.clone(),
            events,
            notices,
            commands,
        };

        info!(
            client_id = %self.client_id,
            host = %self.endpoint.host,
            port = self.endpoint.port,
            "Starting MQTT driver"
        );
        *lock(&self.driver_handle) = Some(tokio::spawn(driver.run()));
        Ok(())
    }

    /// Forward messages arriving on subscribed topics to `sender`
    pub fn set_inbound_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        *lock(&self.inbound) = Some(sender);
    }

    pub fn link_state(&self) -> LinkState {
        self.state_rx.borrow().clone()
    }

    /// Watch link state changes
    pub fn subscribe_link_state(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    fn connected_client(&self) -> Result<AsyncClient, MqttError> {
        let state = self.link_state();
        if state != LinkState::Connected {
            return Err(MqttError::NotConnected { state });
        }
        lock(&self.link)
            .client
            .clone()
            .ok_or(MqttError::NotConnected { state })
    }
}

#[async_trait]
impl Transport for MqttTransport {
    type Error = MqttError;

    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn connect(&self, options: &ConnectOptions) -> Result<(), MqttError> {
        if self.link_state() == LinkState::Closed {
            return Err(MqttError::Disposed);
        }
        self.command_tx
            .send(DriverCommand::Connect(options.clone()))
            .map_err(|_| MqttError::Disposed)
    }

    async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        listener: Arc<dyn ActionListener>,
    ) -> Result<(), MqttError> {
        let client = self.connected_client()?;

        // Hold the link while issuing so the ledger sees requests in send order
        let mut link = lock(&self.link);
        client
            .try_subscribe(topic, qos)
            .map_err(|e| MqttError::RequestRejected(Box::new(e)))?;
        link.ledger.enqueue_subscribe(PendingSubscribe {
            topic: topic.to_string(),
            listener,
        });
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<DeliveryToken, MqttError> {
        let client = self.connected_client()?;
        let token = DeliveryToken::new(
            message.topic.clone(),
            Arc::new(DeliveryTracker::new("Delivery")),
        );

        let mut link = lock(&self.link);
        client
            .try_publish(message.topic, message.qos, message.retain, message.payload)
            .map_err(|e| MqttError::RequestRejected(Box::new(e)))?;
        link.ledger.enqueue_publish(token.clone());
        Ok(token)
    }

    fn is_connected(&self) -> bool {
        self.link_state() == LinkState::Connected
    }

    async fn shutdown(&self) -> Result<(), MqttError> {
        // The driver may already be gone; either way the link ends Closed
        let _ = self.command_tx.send(DriverCommand::Shutdown);

        let handle = lock(&self.driver_handle).take();
        if let Some(handle) = handle {
            match tokio::time::timeout(DISCONNECT_GRACE * 2, handle).await {
                Ok(Ok(())) => info!("MQTT driver shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("MQTT driver ended with error: {}", e),
                Ok(Err(_)) => {}
                Err(_) => warn!("MQTT driver did not stop in time"),
            }
        }

        let _ = self.state_tx.send(LinkState::Closed);
        Ok(())
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.driver_handle).take() {
            handle.abort();
        }
    }
}

/// Outcome of waiting for ConnAck
enum Handshake {
    Acknowledged,
    Failed(String),
    Shutdown,
}

/// Owns the event loop; the only place rumqttc is polled
struct Driver {
    client_id: String,
    endpoint: BrokerEndpoint,
    link: Arc<Mutex<Link>>,
    state_tx: Arc<watch::Sender<LinkState>>,
    inbound: Arc<Mutex<Option<mpsc::Sender<InboundMessage>>>>,
    events: Arc<dyn ConnectionEvents>,
    notices: mpsc::UnboundedSender<Notice>,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
}

impl Driver {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                DriverCommand::Connect(options) => {
                    if !self.run_connection(options).await {
                        break;
                    }
                }
                DriverCommand::Shutdown => break,
            }
        }

        self.fail_pending("transport shut down");
        lock(&self.link).client = None;
        let _ = self.state_tx.send(LinkState::Closed);
        info!(client_id = %self.client_id, "MQTT driver stopped");
    }

    /// One connection from connect request to loss.
    /// Returns false when the driver must stop.
    async fn run_connection(&mut self, options: ConnectOptions) -> bool {
        let mqtt_options = configure_mqtt_options(&self.client_id, &self.endpoint, &options);
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        {
            let mut link = lock(&self.link);
            link.client = Some(client);
            link.ledger = RequestLedger::new();
        }
        let _ = self.state_tx.send(LinkState::Connecting);
        debug!(client_id = %self.client_id, "Connecting to broker");

        match self
            .await_connack(&mut event_loop, options.connect_timeout)
            .await
        {
            Handshake::Acknowledged => {}
            Handshake::Failed(reason) => {
                lock(&self.link).client = None;
                let _ = self.state_tx.send(LinkState::Disconnected(reason.clone()));
                let result = ActionResult::untracked().with_reason(reason);
                // Fatal outcomes are already with the supervisor
                let _ = self.events.on_failure(&result);
                return true;
            }
            Handshake::Shutdown => {
                Self::disconnect_gracefully(&self.link, &mut event_loop).await;
                return false;
            }
        }

        let _ = self.state_tx.send(LinkState::Connected);
        self.events.on_success(&ActionResult::untracked());

        let _ = self.notices.send(Notice::Connected);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(DriverCommand::Connect(_)) => {
                        debug!("Connect requested while connected, ignoring");
                    }
                    Some(DriverCommand::Shutdown) | None => {
                        Self::disconnect_gracefully(&self.link, &mut event_loop).await;
                        return false;
                    }
                },
                polled = event_loop.poll() => match polled {
                    Ok(event) => self.handle_event(event),
                    Err(e) => {
                        let reason = e.to_string();
                        error!(client_id = %self.client_id, "MQTT event loop error: {}", reason);
                        lock(&self.link).client = None;
                        self.fail_pending(&reason);
                        let _ = self.state_tx.send(LinkState::Disconnected(reason.clone()));
                        let _ = self.notices.send(Notice::Lost(reason));
                        return true;
                    }
                }
            }
        }
    }

    async fn await_connack(&mut self, event_loop: &mut EventLoop, timeout: Duration) -> Handshake {
        let deadline = Instant::now() + timeout;
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(DriverCommand::Connect(_)) => {
                        debug!("Connect already in progress, ignoring");
                    }
                    Some(DriverCommand::Shutdown) | None => return Handshake::Shutdown,
                },
                polled = tokio::time::timeout_at(deadline, event_loop.poll()) => match polled {
                    Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => return Handshake::Acknowledged,
                    Ok(Ok(other)) => trace!("Event before ConnAck: {:?}", other),
                    Ok(Err(e)) => return Handshake::Failed(e.to_string()),
                    Err(_) => {
                        return Handshake::Failed(
                            "ConnAck timeout - no connection confirmation received".to_string(),
                        )
                    }
                }
            }
        }
    }

    fn handle_event(&self, event: Event) {
        match route_event(&event) {
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => self.forward_inbound(InboundMessage {
                topic,
                payload,
                retain,
                received_at: chrono::Utc::now(),
            }),
            EventRoute::Disconnected => {
                warn!(client_id = %self.client_id, "Broker sent DISCONNECT");
            }
            EventRoute::ConnectionAcknowledged => {
                debug!("Unexpected ConnAck on established connection");
            }
            EventRoute::InfrastructureEvent(event_str) => {
                trace!(target: "mqtt_transport", "MQTT event: {}", event_str);
            }
            route => {
                // Listeners run after the link is released
                let completion = lock(&self.link).ledger.resolve(&route);
                if let Some(completion) = completion {
                    completion.notify(self.events.as_ref());
                }
            }
        }
    }

    fn forward_inbound(&self, message: InboundMessage) {
        debug!(
            target: "mqtt_transport",
            topic = %message.topic,
            bytes = message.payload.len(),
            "Received MQTT message"
        );
        let sender = lock(&self.inbound).clone();
        if let Some(sender) = sender {
            if let Err(e) = sender.try_send(message) {
                warn!("Dropping inbound message: {}", e);
            }
        }
    }

    /// Resolve every unresolved request as failed
    fn fail_pending(&self, reason: &str) {
        let completions = lock(&self.link).ledger.fail_all(reason);
        for completion in completions {
            completion.notify(self.events.as_ref());
        }
    }

    async fn disconnect_gracefully(link: &Arc<Mutex<Link>>, event_loop: &mut EventLoop) {
        let client = lock(link).client.take();
        let Some(client) = client else {
            return;
        };
        if client.try_disconnect().is_err() {
            return;
        }

        let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        if flushed.is_err() {
            warn!("Broker did not take DISCONNECT in time");
        }
    }
}

async fn dispatch_notices(
    events: Arc<dyn ConnectionEvents>,
    mut notices: mpsc::UnboundedReceiver<Notice>,
) {
    while let Some(notice) = notices.recv().await {
        match notice {
            Notice::Connected => events.connected("ConnAck received").await,
            Notice::Lost(reason) => events.connection_lost(Some(&reason)),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
