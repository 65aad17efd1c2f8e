//! Publish gateway tests
//!
//! Observable behavior only: what reaches the transport, and which errors the
//! caller sees.

use broker_session::error::SessionError;
use broker_session::publish::{EncodingError, Frame, ImageFormat, PixelLayout, PublishGateway};
use broker_session::testing::MockTransport;
use broker_session::transport::QoS;
use bytes::Bytes;
use std::sync::Arc;

fn gateway(transport: &Arc<MockTransport>, format: ImageFormat) -> PublishGateway<MockTransport> {
    PublishGateway::new(transport.clone(), QoS::AtLeastOnce, format)
}

fn checkerboard(width: u32, height: u32) -> Frame {
    let data: Vec<u8> = (0..width * height)
        .flat_map(|i| {
            let v = if (i / width + i % width) % 2 == 0 { 0u8 } else { 255 };
            [v, v / 2, 255 - v]
        })
        .collect();
    Frame::new(width, height, PixelLayout::Rgb8, data)
}

#[tokio::test]
async fn test_publish_text_sends_payload_unretained() {
    let transport = Arc::new(MockTransport::new());
    let token = gateway(&transport, ImageFormat::default())
        .publish_text("sensors/temp", "21.5")
        .await
        .unwrap();

    let published = transport.published_messages();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "sensors/temp");
    assert_eq!(published[0].payload, Bytes::from_static(b"21.5"));
    assert_eq!(published[0].qos, QoS::AtLeastOnce);
    assert!(!published[0].retain);

    assert_eq!(token.topic(), "sensors/temp");
    assert!(token.is_done());
}

#[tokio::test]
async fn test_publish_text_allows_empty_payload() {
    let transport = Arc::new(MockTransport::new());
    gateway(&transport, ImageFormat::default())
        .publish_text("status/heartbeat", Bytes::new())
        .await
        .unwrap();

    assert!(transport.published_messages()[0].payload.is_empty());
}

#[tokio::test]
async fn test_publish_rejects_empty_and_wildcard_topics() {
    let transport = Arc::new(MockTransport::new());
    let gateway = gateway(&transport, ImageFormat::default());

    for topic in ["", "sensors/+", "sensors/#"] {
        let result = gateway.publish_text(topic, "x").await;
        assert!(
            matches!(result, Err(SessionError::InvalidTopic { .. })),
            "expected '{topic}' to be rejected"
        );
    }
    assert!(transport.published_messages().is_empty());
}

#[tokio::test]
async fn test_publish_image_empty_frame_never_reaches_transport() {
    let transport = Arc::new(MockTransport::new());
    let empty = Frame::new(0, 0, PixelLayout::Rgb8, Vec::new());

    let result = gateway(&transport, ImageFormat::default())
        .publish_image("frames/raw", &empty)
        .await;

    assert!(matches!(
        result,
        Err(SessionError::Encoding(EncodingError::EmptyFrame))
    ));
    assert!(transport.published_messages().is_empty());
}

#[tokio::test]
async fn test_publish_image_malformed_buffer_never_reaches_transport() {
    let transport = Arc::new(MockTransport::new());
    let truncated = Frame::new(4, 4, PixelLayout::Rgb8, vec![0; 10]);

    let result = gateway(&transport, ImageFormat::Png)
        .publish_image("frames/raw", &truncated)
        .await;

    assert!(matches!(
        result,
        Err(SessionError::Encoding(EncodingError::BufferSizeMismatch {
            expected: 48,
            actual: 10
        }))
    ));
    assert!(transport.published_messages().is_empty());
}

#[tokio::test]
async fn test_publish_image_as_jpeg() {
    let transport = Arc::new(MockTransport::new());
    gateway(&transport, ImageFormat::Jpeg { quality: 80 })
        .publish_image("frames/jpeg", &checkerboard(16, 8))
        .await
        .unwrap();

    let published = transport.published_messages();
    assert_eq!(published[0].topic, "frames/jpeg");
    assert!(published[0].payload.starts_with(&[0xFF, 0xD8]));
}

#[tokio::test]
async fn test_publish_image_as_png() {
    let transport = Arc::new(MockTransport::new());
    gateway(&transport, ImageFormat::Png)
        .publish_image("frames/png", &checkerboard(8, 8))
        .await
        .unwrap();

    let published = transport.published_messages();
    assert!(published[0].payload.starts_with(&[0x89, b'P', b'N', b'G']));
}

#[tokio::test]
async fn test_publish_while_disconnected_fails_fast() {
    let transport = Arc::new(MockTransport::disconnected());
    let result = gateway(&transport, ImageFormat::default())
        .publish_text("sensors/temp", "21.5")
        .await;

    assert!(matches!(result, Err(SessionError::Publish(_))));
    assert!(transport.published_messages().is_empty());
}

#[tokio::test]
async fn test_token_tracks_pending_delivery() {
    let transport = Arc::new(MockTransport::with_pending_deliveries());
    let token = gateway(&transport, ImageFormat::default())
        .publish_text("sensors/temp", "21.5")
        .await
        .unwrap();

    assert!(!token.is_done());
    assert!(!token.wait(std::time::Duration::from_millis(30)).await);

    let tracked = transport.delivery_tokens();
    broker_session::ActionListener::on_success(
        tracked[0].tracker().as_ref(),
        &broker_session::ActionResult::untracked(),
    );
    assert!(token.is_done());
}

#[tokio::test]
async fn test_transport_refusal_surfaces_as_publish_error() {
    let transport = Arc::new(MockTransport::with_publish_failure());
    let result = gateway(&transport, ImageFormat::Png)
        .publish_image("frames/png", &checkerboard(4, 4))
        .await;

    assert!(matches!(result, Err(SessionError::Publish(_))));
    assert!(transport.published_messages().is_empty());
}

#[tokio::test]
async fn test_publish_follows_link_state() {
    let transport = Arc::new(MockTransport::new());
    let gateway = gateway(&transport, ImageFormat::default());

    transport.set_connected(false);
    let result = gateway.publish_text("sensors/temp", "21.5").await;
    assert!(matches!(result, Err(SessionError::Publish(_))));

    transport.set_connected(true);
    let token = gateway.publish_text("sensors/temp", "21.6").await.unwrap();
    assert!(token.is_done());
    assert_eq!(transport.published_messages().len(), 1);
}
