//! Reconnection state machine for the broker session
//!
//! The transport calls the [`ConnectionEvents`] hooks from its own background
//! task. All state lives in one mutex-guarded record that is never held across
//! an `.await`; reconnect delays run on spawned tasks so the transport's event
//! dispatch is never the one sleeping.

use super::action::{ActionListener, ActionLogger, ActionResult};
use super::state::{can_transition, RetryDecision, RetryPolicy, SessionState};
use super::supervisor::FatalReporter;
use crate::error::{SessionError, SessionResult};
use crate::session_span;
use crate::transport::{ConnectOptions, ConnectionEvents, DeliveryToken, QoS, Transport};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// Static settings of a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Subscribe order is the order of this list
    pub topics: Vec<String>,
    pub qos: QoS,
    pub policy: RetryPolicy,
    pub connect_options: ConnectOptions,
}

impl SessionSettings {
    pub fn new(topics: Vec<String>) -> Self {
        Self {
            topics,
            qos: QoS::AtLeastOnce,
            policy: RetryPolicy::default(),
            connect_options: ConnectOptions::default(),
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    retry_count: u32,
    /// Bumped on every loss/establishment; scheduled attempts from an older generation are dropped
    generation: u64,
    connect_in_flight: bool,
}

/// Owns reconnect and re-subscribe sequencing for one broker session
pub struct SessionListener<T: Transport> {
    this: Weak<Self>,
    transport: Arc<T>,
    settings: SessionSettings,
    subscription_listener: Arc<ActionLogger>,
    fatal: FatalReporter,
    inner: Mutex<SessionInner>,
}

impl<T: Transport> SessionListener<T> {
    pub fn new(transport: Arc<T>, settings: SessionSettings, fatal: FatalReporter) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            transport,
            settings,
            subscription_listener: Arc::new(ActionLogger::new("Subscription")),
            fatal,
            inner: Mutex::new(SessionInner {
                state: SessionState::Disconnected,
                retry_count: 0,
                generation: 0,
                connect_in_flight: false,
            }),
        })
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn retry_count(&self) -> u32 {
        self.lock().retry_count
    }

    pub fn topics(&self) -> &[String] {
        &self.settings.topics
    }

    /// Issue the initial connect without delay.
    ///
    /// A no-op unless the session is Disconnected.
    pub async fn start(&self) -> SessionResult<()> {
        let generation = {
            let mut inner = self.lock();
            if inner.state != SessionState::Disconnected {
                debug!(state = %inner.state, "Session already started");
                return Ok(());
            }
            Self::transition(&mut inner, SessionState::Connecting);
            inner.generation += 1;
            inner.generation
        };

        info!(
            client_id = %self.transport.client_id(),
            topics = self.settings.topics.len(),
            max_backoff_ms = self.settings.policy.max_total_backoff().as_millis() as u64,
            "Starting broker session"
        );
        self.reconnect(generation).await
    }

    /// Issue a connect request for `generation`, if it is still current.
    ///
    /// Failing to issue the request at all is fatal.
    async fn reconnect(&self, generation: u64) -> SessionResult<()> {
        {
            let mut inner = self.lock();
            if inner.state != SessionState::Connecting || inner.generation != generation {
                debug!(
                    state = %inner.state,
                    generation,
                    current = inner.generation,
                    "Dropping stale reconnect attempt"
                );
                return Ok(());
            }
            inner.connect_in_flight = true;
        }

        if let Err(e) = self.transport.connect(&self.settings.connect_options).await {
            error!("Error: {}", e);
            {
                let mut inner = self.lock();
                inner.connect_in_flight = false;
                Self::transition(&mut inner, SessionState::Disconnected);
            }
            return Err(self.escalate(SessionError::transport_issue(e)));
        }
        Ok(())
    }

    /// Run `reconnect` after `delay` on a worker task
    fn schedule_reconnect(&self, generation: u64, delay: Duration) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let span = session_span!(client_id = %self.transport.client_id(), generation);

        tokio::spawn(
            async move {
                tokio::time::sleep(delay).await;
                // Fatal errors were already reported to the supervisor
                let _ = this.reconnect(generation).await;
            }
            .instrument(span),
        );
    }

    /// Subscribe to every configured topic in order, stopping if the
    /// connection is superseded mid-way.
    async fn subscribe_all(&self, generation: u64) {
        for topic in &self.settings.topics {
            if self.lock().generation != generation {
                warn!(topic = %topic, "Connection changed while subscribing, stopping");
                return;
            }

            info!(
                "Subscribing to topic '{}' for client {} using QoS {:?}",
                topic,
                self.transport.client_id(),
                self.settings.qos
            );

            let listener: Arc<dyn ActionListener> = self.subscription_listener.clone();
            if let Err(e) = self
                .transport
                .subscribe(topic, self.settings.qos, listener)
                .await
            {
                self.subscription_listener
                    .on_failure(&ActionResult::for_topic(0, topic).with_reason(e.to_string()));
            }
        }
    }

    fn escalate(&self, error: SessionError) -> SessionError {
        self.fatal.report(&error);
        error
    }

    fn transition(inner: &mut SessionInner, to: SessionState) {
        if !can_transition(inner.state, to) {
            debug!(from = %inner.state, to = %to, "Unusual session transition");
        }
        inner.state = to;
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        // A panic while holding the lock leaves plain data behind; keep going with it
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl<T: Transport> ConnectionEvents for SessionListener<T> {
    /// The single authoritative "connection established" hook: subscriptions
    /// are issued here and nowhere else.
    async fn connected(&self, cause: &str) {
        let generation = {
            let mut inner = self.lock();
            let never_started = inner.state == SessionState::Disconnected && inner.generation == 0;
            let awaited = inner.state == SessionState::Connecting && inner.connect_in_flight;
            if !never_started && !awaited {
                // Duplicates, and attempts a loss already superseded
                debug!(
                    state = %inner.state,
                    in_flight = inner.connect_in_flight,
                    "Ignoring connection notification without a pending connect"
                );
                return;
            }
            Self::transition(&mut inner, SessionState::Connected);
            inner.connect_in_flight = false;
            inner.generation += 1;
            inner.generation
        };

        info!(cause = %cause, "Connection success");
        self.subscribe_all(generation).await;
    }

    fn connection_lost(&self, cause: Option<&str>) {
        match cause.filter(|c| !c.is_empty()) {
            Some(cause) => warn!(cause = %cause, "Connection lost"),
            None => warn!("Connection lost"),
        }

        let generation = {
            let mut inner = self.lock();
            inner.retry_count = 0;
            inner.connect_in_flight = false;
            inner.generation += 1;
            Self::transition(&mut inner, SessionState::Connecting);
            inner.generation
        };

        let delay = self.settings.policy.reconnect_delay;
        info!(delay_ms = delay.as_millis() as u64, "Reconnecting...");
        self.schedule_reconnect(generation, delay);
    }

    fn on_failure(&self, result: &ActionResult) -> SessionResult<()> {
        let (decision, retry_count, generation) = {
            let mut inner = self.lock();
            if inner.state != SessionState::Connecting || !inner.connect_in_flight {
                debug!(state = %inner.state, "Ignoring failure from a superseded connect attempt");
                return Ok(());
            }
            inner.connect_in_flight = false;
            inner.retry_count += 1;
            let decision = self.settings.policy.decide(inner.retry_count);
            if decision == RetryDecision::Exhausted {
                Self::transition(&mut inner, SessionState::Disconnected);
            }
            (decision, inner.retry_count, inner.generation)
        };

        warn!(
            retry = retry_count,
            max_retries = self.settings.policy.max_retries,
            reason = %result.reason().unwrap_or("unspecified"),
            "Connection attempt failed"
        );

        match decision {
            RetryDecision::Retry { attempt, delay } => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retry scheduled");
                self.schedule_reconnect(generation, delay);
                Ok(())
            }
            RetryDecision::Exhausted => {
                error!(attempts = retry_count, "Giving up on reconnecting");
                Err(self.escalate(SessionError::ReconnectExhausted {
                    attempts: retry_count,
                    max_retries: self.settings.policy.max_retries,
                }))
            }
        }
    }

    fn on_success(&self, result: &ActionResult) {
        debug!(
            token = result.operation_id(),
            "Connect acknowledged; subscriptions follow the connected notification"
        );
    }

    fn delivery_complete(&self, token: Option<&DeliveryToken>) {
        let Some(token) = token else {
            return;
        };
        debug!(
            topic = %token.topic(),
            token = token.message_id(),
            "Delivery complete"
        );
    }
}
