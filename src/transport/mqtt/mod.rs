//! MQTT v5 transport built on rumqttc
//!
//! Pure logic is kept apart from I/O so most of it can be tested without a broker.
//!
//! # Architecture
//!
//! - [`connection`] - Broker endpoint parsing, link state and option construction
//! - [`router`] - Pure routing of event loop events
//! - [`ledger`] - Correlation of issued requests with broker packet ids, and
//!   their resolution from routed events
//! - [`client`] - The transport handle and its event loop driver
//!
//! # Usage
//!
//! ```rust,no_run
//! use broker_session::config::SessionConfig;
//! use broker_session::session::{SessionListener, SessionSupervisor};
//! use broker_session::transport::mqtt::MqttTransport;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = SessionConfig::from_toml_str(r#"
//! [broker]
//! url = "mqtt://localhost:1883"
//!
//! [session]
//! topics = ["sensors/temp"]
//! "#)?;
//!
//! let transport = Arc::new(MqttTransport::from_config(&config)?);
//! let (reporter, _supervisor) = SessionSupervisor::channel();
//! let session = SessionListener::new(transport.clone(), config.session_settings()?, reporter);
//! transport.start(session.clone())?;
//! session.start().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod ledger;
pub mod router;

pub use client::MqttTransport;
pub use connection::{BrokerEndpoint, LinkState, MqttError};
pub use router::EventRoute;
