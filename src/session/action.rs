//! Outcomes of asynchronous broker operations and the listeners that observe them

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use tracing::{info, warn};

/// Outcome record for one completed connect, subscribe or publish operation.
///
/// An `operation_id` of 0 means the operation was not tracked by packet id
/// (connect attempts, QoS 0 publishes).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionResult {
    operation_id: u16,
    topics: Option<Vec<String>>,
    reason: Option<String>,
}

impl ActionResult {
    pub fn new(operation_id: u16, topics: Option<Vec<String>>) -> Self {
        Self {
            operation_id,
            topics,
            reason: None,
        }
    }

    /// Result for an operation that carries no packet id or topics
    pub fn untracked() -> Self {
        Self::default()
    }

    /// Result for an operation on a single topic
    pub fn for_topic(operation_id: u16, topic: impl Into<String>) -> Self {
        Self::new(operation_id, Some(vec![topic.into()]))
    }

    /// Attach a human-readable failure reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn operation_id(&self) -> u16 {
        self.operation_id
    }

    pub fn topics(&self) -> Option<&[String]> {
        self.topics.as_deref()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// First topic of the result, if any
    pub fn first_topic(&self) -> Option<&str> {
        self.topics
            .as_ref()
            .and_then(|topics| topics.first())
            .map(String::as_str)
    }
}

/// Observation hooks for a completed broker operation.
///
/// Implementations must not panic on any input.
pub trait ActionListener: Send + Sync {
    fn on_success(&self, result: &ActionResult);
    fn on_failure(&self, result: &ActionResult);
}

/// Base listener: logs every outcome under a fixed label
#[derive(Debug, Clone)]
pub struct ActionLogger {
    name: String,
}

impl ActionLogger {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ActionListener for ActionLogger {
    fn on_success(&self, result: &ActionResult) {
        match result.operation_id() {
            0 => info!(listener = %self.name, "{} success", self.name),
            id => info!(listener = %self.name, token = id, "{} success", self.name),
        }
        if let Some(topic) = result.first_topic() {
            info!(listener = %self.name, topic = %topic, "token topic: '{}', ...", topic);
        }
    }

    fn on_failure(&self, result: &ActionResult) {
        let reason = result.reason().unwrap_or("unspecified");
        match result.operation_id() {
            0 => warn!(listener = %self.name, reason = %reason, "{} failure", self.name),
            id => warn!(
                listener = %self.name,
                token = id,
                reason = %reason,
                "{} failure",
                self.name
            ),
        }
    }
}

/// Tracks a single publish until it reaches a terminal state.
///
/// `is_done()` only says that an outcome arrived; the outcome itself is logged
/// by the wrapped [`ActionLogger`].
#[derive(Debug)]
pub struct DeliveryTracker {
    logger: ActionLogger,
    message_id: AtomicU16,
    done: AtomicBool,
}

impl DeliveryTracker {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            logger: ActionLogger::new(label),
            message_id: AtomicU16::new(0),
            done: AtomicBool::new(false),
        }
    }

    pub fn label(&self) -> &str {
        self.logger.name()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Broker packet id of the publish, 0 until the transport has sent it
    pub fn message_id(&self) -> u16 {
        self.message_id.load(Ordering::Acquire)
    }

    pub fn assign_message_id(&self, id: u16) {
        self.message_id.store(id, Ordering::Release);
    }

    fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }
}

impl ActionListener for DeliveryTracker {
    fn on_success(&self, result: &ActionResult) {
        self.logger.on_success(result);
        self.mark_done();
    }

    fn on_failure(&self, result: &ActionResult) {
        self.logger.on_failure(result);
        self.mark_done();
    }
}
