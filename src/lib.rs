//! Broker Session - MQTT connection lifecycle management
//!
//! Keeps a long-lived MQTT client session alive: reconnects with a bounded
//! retry budget, re-establishes topic subscriptions in order after every
//! (re)connect, tracks in-flight deliveries and escalates unrecoverable
//! failures to a supervisor that shuts the process down.
//!
//! # Overview
//!
//! - [`session`] - reconnection state machine, delivery tracking, fatal error supervision
//! - [`transport`] - the transport abstraction and its rumqttc based implementation
//! - [`publish`] - text and image publish helpers
//! - [`config`] - TOML configuration
//! - [`observability`] - structured logging
//!
//! # Quick Start
//!
//! ```rust
//! use broker_session::session::{SessionListener, SessionSettings, SessionSupervisor};
//! use broker_session::testing::MockTransport;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let transport = Arc::new(MockTransport::new());
//! let (reporter, _supervisor) = SessionSupervisor::channel();
//! let session = SessionListener::new(
//!     transport.clone(),
//!     SessionSettings::new(vec!["sensors/temp".to_string()]),
//!     reporter,
//! );
//!
//! session.start().await.unwrap();
//! assert_eq!(transport.connect_count(), 1);
//! # });
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod publish;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use publish::{EncodingError, Frame, ImageFormat, PixelLayout, PublishGateway};
pub use session::{
    ActionListener, ActionLogger, ActionResult, DeliveryTracker, SessionListener, SessionState,
    SessionSupervisor, SupervisorExit,
};
pub use transport::mqtt::MqttTransport;
pub use transport::{ConnectionEvents, DeliveryToken, Message, Transport};
