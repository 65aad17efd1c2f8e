//! Correlation of issued requests with broker packet ids
//!
//! rumqttc hands requests to its event loop in FIFO order and reports each
//! outgoing packet id as it is written, so the n-th outgoing Publish belongs to
//! the n-th publish request still queued here.

use super::router::EventRoute;
use crate::session::{ActionListener, ActionResult};
use crate::transport::{ConnectionEvents, DeliveryToken};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Subscribe request awaiting its SubAck
#[derive(Clone)]
pub struct PendingSubscribe {
    pub topic: String,
    pub listener: Arc<dyn ActionListener>,
}

/// A request that reached its terminal state
pub enum Completion {
    Delivery {
        token: DeliveryToken,
        result: ActionResult,
        success: bool,
    },
    Subscription {
        pending: PendingSubscribe,
        result: ActionResult,
        success: bool,
    },
}

impl Completion {
    pub fn succeeded(&self) -> bool {
        match self {
            Self::Delivery { success, .. } | Self::Subscription { success, .. } => *success,
        }
    }

    pub fn result(&self) -> &ActionResult {
        match self {
            Self::Delivery { result, .. } | Self::Subscription { result, .. } => result,
        }
    }

    /// Hand the outcome to the request's listener.
    /// Deliveries are also reported through `delivery_complete`.
    pub fn notify(&self, events: &dyn ConnectionEvents) {
        let (listener, success): (&dyn ActionListener, bool) = match self {
            Self::Delivery { token, success, .. } => {
                (token.tracker().as_ref() as &dyn ActionListener, *success)
            }
            Self::Subscription {
                pending, success, ..
            } => (pending.listener.as_ref(), *success),
        };

        if success {
            listener.on_success(self.result());
        } else {
            listener.on_failure(self.result());
        }
        if let Self::Delivery { token, .. } = self {
            events.delivery_complete(Some(token));
        }
    }
}

enum Queued {
    Publish(DeliveryToken),
    Subscribe(PendingSubscribe),
}

/// Requests issued but not yet resolved
#[derive(Default)]
pub struct RequestLedger {
    queued: VecDeque<Queued>,
    publishes: HashMap<u16, DeliveryToken>,
    subscribes: HashMap<u16, PendingSubscribe>,
}

impl RequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_publish(&mut self, token: DeliveryToken) {
        self.queued.push_back(Queued::Publish(token));
    }

    pub fn enqueue_subscribe(&mut self, pending: PendingSubscribe) {
        self.queued.push_back(Queued::Subscribe(pending));
    }

    /// A publish left the client with `pkid`.
    ///
    /// QoS 0 publishes (`pkid == 0`) get no acknowledgement, so they are
    /// returned as complete immediately.
    pub fn publish_sent(&mut self, pkid: u16) -> Option<DeliveryToken> {
        let position = self
            .queued
            .iter()
            .position(|q| matches!(q, Queued::Publish(_)));
        let Some(Queued::Publish(token)) = position.and_then(|p| self.queued.remove(p)) else {
            warn!(pkid, "Outgoing publish with no matching request");
            return None;
        };

        token.tracker().assign_message_id(pkid);
        if pkid == 0 {
            return Some(token);
        }
        self.publishes.insert(pkid, token);
        None
    }

    /// A subscribe left the client with `pkid`
    pub fn subscribe_sent(&mut self, pkid: u16) {
        let position = self
            .queued
            .iter()
            .position(|q| matches!(q, Queued::Subscribe(_)));
        match position.and_then(|p| self.queued.remove(p)) {
            Some(Queued::Subscribe(pending)) => {
                self.subscribes.insert(pkid, pending);
            }
            _ => warn!(pkid, "Outgoing subscribe with no matching request"),
        }
    }

    pub fn take_publish(&mut self, pkid: u16) -> Option<DeliveryToken> {
        self.publishes.remove(&pkid)
    }

    pub fn take_subscribe(&mut self, pkid: u16) -> Option<PendingSubscribe> {
        self.subscribes.remove(&pkid)
    }

    /// Remove everything unresolved, e.g. when the link drops
    pub fn drain(&mut self) -> (Vec<DeliveryToken>, Vec<PendingSubscribe>) {
        let mut publishes: Vec<DeliveryToken> = self.publishes.drain().map(|(_, t)| t).collect();
        let mut subscribes: Vec<PendingSubscribe> =
            self.subscribes.drain().map(|(_, s)| s).collect();

        for queued in self.queued.drain(..) {
            match queued {
                Queued::Publish(token) => publishes.push(token),
                Queued::Subscribe(pending) => subscribes.push(pending),
            }
        }
        (publishes, subscribes)
    }

    /// Apply a routed event to the ledger (pure function).
    ///
    /// Returns the request the event finished, if any. Events that do not
    /// concern issued requests leave the ledger untouched.
    pub fn resolve(&mut self, route: &EventRoute) -> Option<Completion> {
        match *route {
            EventRoute::PublishSent(pkid) => {
                let token = self.publish_sent(pkid)?;
                let result = ActionResult::for_topic(0, token.topic());
                Some(Completion::Delivery {
                    token,
                    result,
                    success: true,
                })
            }
            EventRoute::SubscribeSent(pkid) => {
                self.subscribe_sent(pkid);
                None
            }
            EventRoute::PublishAcknowledged { pkid, success } => {
                let Some(token) = self.take_publish(pkid) else {
                    debug!(pkid, "Acknowledgement for untracked publish");
                    return None;
                };
                let mut result = ActionResult::for_topic(pkid, token.topic());
                if !success {
                    result = result.with_reason("rejected by broker");
                }
                Some(Completion::Delivery {
                    token,
                    result,
                    success,
                })
            }
            EventRoute::SubscriptionAcknowledged { pkid, success } => {
                let Some(pending) = self.take_subscribe(pkid) else {
                    debug!(pkid, "SubAck for untracked subscription");
                    return None;
                };
                let mut result = ActionResult::for_topic(pkid, pending.topic.clone());
                if !success {
                    result = result.with_reason("refused by broker");
                }
                Some(Completion::Subscription {
                    pending,
                    result,
                    success,
                })
            }
            _ => None,
        }
    }

    /// Fail everything unresolved with `reason`, e.g. when the link drops
    pub fn fail_all(&mut self, reason: &str) -> Vec<Completion> {
        let (publishes, subscribes) = self.drain();

        let deliveries = publishes.into_iter().map(|token| Completion::Delivery {
            result: ActionResult::for_topic(token.message_id(), token.topic()).with_reason(reason),
            token,
            success: false,
        });
        let subscriptions = subscribes.into_iter().map(|pending| Completion::Subscription {
            result: ActionResult::for_topic(0, pending.topic.clone()).with_reason(reason),
            pending,
            success: false,
        });
        deliveries.chain(subscriptions).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.queued.len() + self.publishes.len() + self.subscribes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionResult;
    use crate::session::{ActionLogger, DeliveryTracker};
    use crate::transport::mqtt::router::{puback_succeeded, route_outgoing};
    use rumqttc::v5::mqttbytes::v5::PubAckReason;
    use rumqttc::Outgoing;
    use std::sync::Mutex;

    /// Records the topics `delivery_complete` was called with
    #[derive(Default)]
    struct RecordingEvents {
        delivered: Mutex<Vec<String>>,
    }

    impl RecordingEvents {
        fn delivered(&self) -> Vec<String> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ConnectionEvents for RecordingEvents {
        async fn connected(&self, _cause: &str) {}
        fn connection_lost(&self, _cause: Option<&str>) {}
        fn on_failure(&self, _result: &ActionResult) -> SessionResult<()> {
            Ok(())
        }
        fn on_success(&self, _result: &ActionResult) {}
        fn delivery_complete(&self, token: Option<&DeliveryToken>) {
            if let Some(token) = token {
                self.delivered.lock().unwrap().push(token.topic().to_string());
            }
        }
    }

    /// Records the outcomes a subscribe listener saw
    #[derive(Default)]
    struct RecordingListener {
        outcomes: Mutex<Vec<(bool, Option<String>)>>,
    }

    impl ActionListener for RecordingListener {
        fn on_success(&self, _result: &ActionResult) {
            self.outcomes.lock().unwrap().push((true, None));
        }

        fn on_failure(&self, result: &ActionResult) {
            let reason = result.reason().map(str::to_string);
            self.outcomes.lock().unwrap().push((false, reason));
        }
    }

    fn token(topic: &str) -> DeliveryToken {
        DeliveryToken::new(topic, Arc::new(DeliveryTracker::new("Delivery")))
    }

    fn subscribe(topic: &str) -> PendingSubscribe {
        PendingSubscribe {
            topic: topic.to_string(),
            listener: Arc::new(ActionLogger::new("Subscription")),
        }
    }

    #[test]
    fn test_qos0_publish_completes_on_send() {
        let mut ledger = RequestLedger::new();
        ledger.enqueue_publish(token("a"));

        let done = ledger.publish_sent(0).expect("QoS 0 completes immediately");
        assert_eq!(done.topic(), "a");
        assert_eq!(ledger.pending_count(), 0);
    }

    #[test]
    fn test_publish_correlated_in_request_order() {
        let mut ledger = RequestLedger::new();
        ledger.enqueue_publish(token("first"));
        ledger.enqueue_publish(token("second"));

        assert!(ledger.publish_sent(10).is_none());
        assert!(ledger.publish_sent(11).is_none());

        let second = ledger.take_publish(11).unwrap();
        assert_eq!(second.topic(), "second");
        assert_eq!(second.message_id(), 11);
        assert_eq!(ledger.take_publish(10).unwrap().topic(), "first");
        assert!(ledger.take_publish(10).is_none());
    }

    #[test]
    fn test_mixed_requests_matched_by_kind() {
        let mut ledger = RequestLedger::new();
        ledger.enqueue_subscribe(subscribe("sensors/temp"));
        ledger.enqueue_publish(token("frames"));

        assert!(ledger.publish_sent(3).is_none());
        ledger.subscribe_sent(4);

        assert_eq!(ledger.take_subscribe(4).unwrap().topic, "sensors/temp");
        assert_eq!(ledger.take_publish(3).unwrap().topic(), "frames");
    }

    #[test]
    fn test_unmatched_outgoing_is_ignored() {
        let mut ledger = RequestLedger::new();
        assert!(ledger.publish_sent(1).is_none());
        ledger.subscribe_sent(2);
        assert_eq!(ledger.pending_count(), 0);
    }

    #[test]
    fn test_drain_returns_everything_unresolved() {
        let mut ledger = RequestLedger::new();
        ledger.enqueue_publish(token("in-flight"));
        ledger.enqueue_publish(token("queued"));
        ledger.enqueue_subscribe(subscribe("s"));
        ledger.publish_sent(7);

        let (publishes, subscribes) = ledger.drain();
        assert_eq!(publishes.len(), 2);
        assert_eq!(subscribes.len(), 1);
        assert_eq!(ledger.pending_count(), 0);
    }

    #[test]
    fn test_rejected_qos1_publish_fails_its_tracker() {
        let mut ledger = RequestLedger::new();
        let events = RecordingEvents::default();
        let token = token("frames");
        ledger.enqueue_publish(token.clone());

        assert!(ledger.resolve(&route_outgoing(&Outgoing::Publish(7))).is_none());
        assert!(!token.is_done());
        assert_eq!(token.message_id(), 7);

        let rejected = EventRoute::PublishAcknowledged {
            pkid: 7,
            success: puback_succeeded(&PubAckReason::NotAuthorized),
        };
        let completion = ledger.resolve(&rejected).expect("PubAck resolves the publish");
        assert!(!completion.succeeded());
        assert_eq!(completion.result().reason(), Some("rejected by broker"));
        assert_eq!(completion.result().operation_id(), 7);

        completion.notify(&events);
        assert!(token.is_done());
        assert_eq!(events.delivered(), vec!["frames"]);
        assert_eq!(ledger.pending_count(), 0);

        // A repeated acknowledgement finds nothing to resolve
        assert!(ledger.resolve(&rejected).is_none());
    }

    #[test]
    fn test_qos0_publish_resolves_when_sent() {
        let mut ledger = RequestLedger::new();
        let events = RecordingEvents::default();
        let token = token("status");
        ledger.enqueue_publish(token.clone());

        let completion = ledger
            .resolve(&route_outgoing(&Outgoing::Publish(0)))
            .expect("QoS 0 completes on send");
        assert!(completion.succeeded());
        assert!(completion.result().reason().is_none());

        completion.notify(&events);
        assert!(token.is_done());
        assert_eq!(events.delivered(), vec!["status"]);
    }

    #[test]
    fn test_suback_outcome_reaches_subscribe_listener() {
        let mut ledger = RequestLedger::new();
        let events = RecordingEvents::default();
        let listener = Arc::new(RecordingListener::default());
        ledger.enqueue_subscribe(PendingSubscribe {
            topic: "sensors/temp".to_string(),
            listener: listener.clone(),
        });

        assert!(ledger.resolve(&EventRoute::SubscribeSent(3)).is_none());
        let completion = ledger
            .resolve(&EventRoute::SubscriptionAcknowledged {
                pkid: 3,
                success: false,
            })
            .expect("SubAck resolves the subscribe");
        completion.notify(&events);

        assert_eq!(
            *listener.outcomes.lock().unwrap(),
            vec![(false, Some("refused by broker".to_string()))]
        );
        assert!(events.delivered().is_empty());
    }

    #[test]
    fn test_link_loss_fails_every_pending_request() {
        let mut ledger = RequestLedger::new();
        let events = RecordingEvents::default();
        let listener = Arc::new(RecordingListener::default());
        let acked = token("awaiting-ack");
        let queued = token("never-sent");
        ledger.enqueue_publish(acked.clone());
        ledger.enqueue_publish(queued.clone());
        ledger.enqueue_subscribe(PendingSubscribe {
            topic: "s".to_string(),
            listener: listener.clone(),
        });
        assert!(ledger.resolve(&EventRoute::PublishSent(9)).is_none());

        let completions = ledger.fail_all("connection reset");
        assert_eq!(completions.len(), 3);
        assert!(completions.iter().all(|c| !c.succeeded()));
        for completion in &completions {
            assert_eq!(completion.result().reason(), Some("connection reset"));
            completion.notify(&events);
        }

        assert!(acked.is_done());
        assert!(queued.is_done());
        assert_eq!(
            *listener.outcomes.lock().unwrap(),
            vec![(false, Some("connection reset".to_string()))]
        );
        assert_eq!(events.delivered().len(), 2);
        assert_eq!(ledger.pending_count(), 0);
    }

    #[test]
    fn test_unrelated_routes_leave_ledger_untouched() {
        let mut ledger = RequestLedger::new();
        ledger.enqueue_publish(token("a"));

        assert!(ledger.resolve(&EventRoute::Disconnected).is_none());
        assert!(ledger.resolve(&EventRoute::OutgoingEvent).is_none());
        assert!(ledger
            .resolve(&EventRoute::PublishAcknowledged {
                pkid: 42,
                success: true
            })
            .is_none());
        assert_eq!(ledger.pending_count(), 1);
    }
}
