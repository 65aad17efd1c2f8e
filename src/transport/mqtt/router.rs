//! Pure routing of rumqttc events
//!
//! Translates raw event loop events into the handful of cases the driver acts on.

use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{Packet, PubAckReason, SubscribeReasonCode};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived {
        topic: String,
        payload: Bytes,
        retain: bool,
    },
    /// A publish request left the client with this packet id (0 for QoS 0)
    PublishSent(u16),
    /// A subscribe request left the client with this packet id
    SubscribeSent(u16),
    /// Terminal acknowledgement of a QoS 1 (PubAck) or QoS 2 (PubComp) publish
    PublishAcknowledged { pkid: u16, success: bool },
    /// SubAck for a subscribe request
    SubscriptionAcknowledged { pkid: u16, success: bool },
    /// Broker sent DISCONNECT
    Disconnected,
    /// Infrastructure event (PingResp, PubRec, ...)
    InfrastructureEvent(String),
    /// Outgoing event with nothing to correlate
    OutgoingEvent,
}

/// Route an event loop event (pure function)
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
            Packet::Publish(publish) => EventRoute::MessageReceived {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload.clone(),
                retain: publish.retain,
            },
            Packet::PubAck(puback) => EventRoute::PublishAcknowledged {
                pkid: puback.pkid,
                success: puback_succeeded(&puback.reason),
            },
            Packet::PubComp(pubcomp) => EventRoute::PublishAcknowledged {
                pkid: pubcomp.pkid,
                success: true,
            },
            Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                pkid: suback.pkid,
                success: subscription_succeeded(&suback.return_codes),
            },
            Packet::Disconnect(_) => EventRoute::Disconnected,
            other => EventRoute::InfrastructureEvent(format!("{other:?}")),
        },
        Event::Outgoing(outgoing) => route_outgoing(outgoing),
    }
}

/// Route an outgoing notification (pure function)
pub fn route_outgoing(outgoing: &Outgoing) -> EventRoute {
    match outgoing {
        Outgoing::Publish(pkid) => EventRoute::PublishSent(*pkid),
        Outgoing::Subscribe(pkid) => EventRoute::SubscribeSent(*pkid),
        _ => EventRoute::OutgoingEvent,
    }
}

/// A PubAck is a delivery success unless the broker reported an error reason
pub fn puback_succeeded(reason: &PubAckReason) -> bool {
    matches!(
        reason,
        PubAckReason::Success | PubAckReason::NoMatchingSubscribers
    )
}

/// A subscribe succeeded only if every filter was granted
pub fn subscription_succeeded(return_codes: &[SubscribeReasonCode]) -> bool {
    !return_codes.is_empty()
        && return_codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_route_outgoing_publish_and_subscribe() {
        assert_eq!(
            route_event(&Event::Outgoing(Outgoing::Publish(4))),
            EventRoute::PublishSent(4)
        );
        assert_eq!(
            route_event(&Event::Outgoing(Outgoing::Subscribe(5))),
            EventRoute::SubscribeSent(5)
        );
        assert_eq!(
            route_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        );
    }

    #[test]
    fn test_puback_reasons() {
        assert!(puback_succeeded(&PubAckReason::Success));
        assert!(puback_succeeded(&PubAckReason::NoMatchingSubscribers));
        assert!(!puback_succeeded(&PubAckReason::NotAuthorized));
        assert!(!puback_succeeded(&PubAckReason::UnspecifiedError));
    }

    #[test]
    fn test_subscription_return_codes() {
        assert!(subscription_succeeded(&[SubscribeReasonCode::Success(
            QoS::AtLeastOnce
        )]));
        assert!(!subscription_succeeded(&[SubscribeReasonCode::NotAuthorized]));
        assert!(!subscription_succeeded(&[
            SubscribeReasonCode::Success(QoS::AtMostOnce),
            SubscribeReasonCode::TopicFilterInvalid,
        ]));
        assert!(!subscription_succeeded(&[]));
    }
}
