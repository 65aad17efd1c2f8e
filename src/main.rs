//! Broker Session - Main Entry Point
//!
//! Runs a supervised MQTT session, or connects just long enough to publish one
//! text or image message.

use broker_session::config::SessionConfig;
use broker_session::error::{SessionError, SessionResult};
use broker_session::observability::init_default_logging;
use broker_session::publish::{Frame, PublishGateway};
use broker_session::session::{SessionListener, SessionSupervisor, SupervisorExit};
use broker_session::transport::mqtt::{LinkState, MqttTransport};
use broker_session::transport::{DeliveryToken, InboundMessage, Transport};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// How long a one-shot publish waits for the broker's acknowledgement
const DELIVERY_WAIT: Duration = Duration::from_secs(10);

/// Capacity of the inbound message queue
const INBOUND_CAPACITY: usize = 256;

type BoxError = Box<dyn std::error::Error>;

/// MQTT session with reconnect and ordered re-subscription
#[derive(Parser)]
#[command(name = "broker-session")]
#[command(about = "Keeps an MQTT session alive and publishes text or image payloads")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "BROKER_SESSION_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe and log inbound messages until interrupted
    Run,
    /// Publish a single text message
    Publish {
        #[arg(long)]
        topic: String,
        #[arg(long)]
        message: String,
    },
    /// Encode an image file and publish it
    PublishImage {
        #[arg(long)]
        topic: String,
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    info!("Starting broker-session v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_session(config).await,
        Commands::Publish { topic, message } => publish_text(config, topic, message).await,
        Commands::PublishImage { topic, file } => publish_image(config, topic, file).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    match result {
        Ok(0) => info!("Application shutdown complete"),
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("Command failed: {}", e);
            process::exit(1);
        }
    }
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<SessionConfig, BoxError> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(SessionConfig::load_from_file(path)?);
    }

    for path_str in ["broker-session.toml", "config/session.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(SessionConfig::load_from_file(&path)?);
        }
    }

    Err(
        "No configuration file found. Provide one with -c/--config or create broker-session.toml"
            .into(),
    )
}

/// Wire transport, session and supervisor together and issue the first connect
async fn bootstrap(
    config: &SessionConfig,
) -> Result<
    (
        Arc<MqttTransport>,
        Arc<SessionListener<MqttTransport>>,
        SessionSupervisor,
    ),
    BoxError,
> {
    let transport = Arc::new(MqttTransport::from_config(config)?);
    let (reporter, supervisor) = SessionSupervisor::channel();
    let session = SessionListener::new(transport.clone(), config.session_settings()?, reporter);

    transport.start(session.clone())?;
    session.start().await?;
    Ok((transport, session, supervisor))
}

async fn run_session(config: SessionConfig) -> Result<i32, BoxError> {
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (transport, session, supervisor) = bootstrap(&config).await?;
    transport.set_inbound_sender(inbound_tx);
    tokio::spawn(log_inbound(inbound_rx));

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
    };

    info!(
        client_id = %transport.client_id(),
        topics = ?session.topics(),
        "Session running"
    );

    let exit = supervisor.supervise(transport.as_ref(), shutdown).await;
    if let SupervisorExit::Fatal(e) = &exit {
        error!("Session ended: {}", e);
    }
    Ok(exit.exit_code())
}

async fn log_inbound(mut inbound: mpsc::Receiver<InboundMessage>) {
    while let Some(message) = inbound.recv().await {
        info!(
            topic = %message.topic,
            bytes = message.payload.len(),
            retain = message.retain,
            received_at = %message.received_at,
            "Message received"
        );
    }
}

async fn publish_text(
    config: SessionConfig,
    topic: String,
    message: String,
) -> Result<i32, BoxError> {
    let (transport, _session, mut supervisor) = bootstrap(&config).await?;
    if let Some(code) = wait_for_link(&transport, &mut supervisor).await {
        return Ok(code);
    }

    let gateway = PublishGateway::new(
        transport.clone(),
        config.publish_qos()?,
        config.image_format(),
    );
    let result = gateway.publish_text(&topic, message).await;
    finish_publish(&transport, result).await
}

async fn publish_image(
    config: SessionConfig,
    topic: String,
    file: PathBuf,
) -> Result<i32, BoxError> {
    let frame = Frame::load(&file)?;
    info!(
        file = %file.display(),
        width = frame.width,
        height = frame.height,
        "Loaded image"
    );

    let (transport, _session, mut supervisor) = bootstrap(&config).await?;
    if let Some(code) = wait_for_link(&transport, &mut supervisor).await {
        return Ok(code);
    }

    let gateway = PublishGateway::new(
        transport.clone(),
        config.publish_qos()?,
        config.image_format(),
    );
    let result = gateway.publish_image(&topic, &frame).await;
    finish_publish(&transport, result).await
}

/// Wait until the link is up. Returns an exit code if the session failed first.
async fn wait_for_link(
    transport: &MqttTransport,
    supervisor: &mut SessionSupervisor,
) -> Option<i32> {
    let mut states = transport.subscribe_link_state();
    let connected = async {
        while *states.borrow_and_update() != LinkState::Connected {
            if states.changed().await.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        _ = connected => None,
        Some(e) = supervisor.next_fatal() => {
            error!("Session ended before publishing: {}", e);
            if let Err(e) = transport.shutdown().await {
                warn!("Error while closing transport: {}", e);
            }
            Some(1)
        }
    }
}

async fn finish_publish(
    transport: &MqttTransport,
    result: SessionResult<DeliveryToken>,
) -> Result<i32, BoxError> {
    let outcome = match result {
        Ok(token) => {
            // The tracker's logger already reported whether delivery succeeded
            if token.wait(DELIVERY_WAIT).await {
                info!(
                    topic = %token.topic(),
                    message_id = token.message_id(),
                    "Publish reached a terminal state"
                );
                Ok(0)
            } else {
                Err(SessionError::operation_failure(
                    "publish",
                    format!(
                        "no delivery confirmation for '{}' within {:?}",
                        token.topic(),
                        DELIVERY_WAIT
                    ),
                )
                .into())
            }
        }
        Err(e) => Err(e.into()),
    };

    if let Err(e) = transport.shutdown().await {
        warn!("Error while closing transport: {}", e);
    }
    outcome
}

fn handle_config_command(config: &SessionConfig, show: bool) -> Result<i32, BoxError> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(0)
}
