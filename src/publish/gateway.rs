//! Outbound publish helpers

use super::frame::{encode_frame, Frame, ImageFormat};
use crate::error::{SessionError, SessionResult};
use crate::transport::{DeliveryToken, Message, QoS, Transport};
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Hands text and image payloads to the shared transport.
///
/// Holds no session state; publishing while the link is down fails fast with
/// the transport's not-connected error.
pub struct PublishGateway<T: Transport> {
    transport: Arc<T>,
    qos: QoS,
    image_format: ImageFormat,
}

impl<T: Transport> PublishGateway<T> {
    pub fn new(transport: Arc<T>, qos: QoS, image_format: ImageFormat) -> Self {
        Self {
            transport,
            qos,
            image_format,
        }
    }

    /// Publish opaque payload bytes to `topic`, retain off
    pub async fn publish_text(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
    ) -> SessionResult<DeliveryToken> {
        validate_publish_topic(topic)?;
        self.send(Message::new(topic, payload, self.qos)).await
    }

    /// Encode `frame` and publish the compressed bytes to `topic`.
    ///
    /// An unencodable frame never reaches the transport.
    pub async fn publish_image(&self, topic: &str, frame: &Frame) -> SessionResult<DeliveryToken> {
        validate_publish_topic(topic)?;
        let encoded = encode_frame(self.image_format, frame)?;
        self.send(Message::new(topic, encoded, self.qos)).await
    }

    async fn send(&self, message: Message) -> SessionResult<DeliveryToken> {
        let topic = message.topic.clone();
        let size = message.payload.len();

        let token = self
            .transport
            .publish(message)
            .await
            .map_err(SessionError::publish_failed)?;

        debug!(topic = %topic, bytes = size, "Delivering");
        Ok(token)
    }
}

/// Publish topics must be non-empty and free of wildcards
pub fn validate_publish_topic(topic: &str) -> SessionResult<()> {
    if topic.is_empty() {
        return Err(SessionError::invalid_topic(topic, "topic must not be empty"));
    }
    if topic.contains(|c: char| c == '+' || c == '#') {
        return Err(SessionError::invalid_topic(
            topic,
            "wildcards are not allowed when publishing",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_publish_topic() {
        assert!(validate_publish_topic("sensors/temp").is_ok());
        assert!(validate_publish_topic("/leading/slash").is_ok());
        assert!(matches!(
            validate_publish_topic(""),
            Err(SessionError::InvalidTopic { .. })
        ));
        assert!(validate_publish_topic("sensors/+").is_err());
        assert!(validate_publish_topic("sensors/#").is_err());
    }
}
