//! Fatal error supervision
//!
//! Hooks never exit the process themselves. They report fatal errors here and
//! the host decides how to stop: close the transport, log, and exit non-zero.

use crate::error::SessionError;
use crate::transport::Transport;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Sending half handed to the session; cheap to clone
#[derive(Debug, Clone)]
pub struct FatalReporter {
    tx: mpsc::UnboundedSender<SessionError>,
}

impl FatalReporter {
    pub fn report(&self, error: &SessionError) {
        if self.tx.send(error.clone()).is_err() {
            error!(error = %error, "Fatal error raised after supervisor stopped");
        }
    }
}

/// How supervision ended
#[derive(Debug)]
pub enum SupervisorExit {
    /// The host asked to stop
    Shutdown,
    /// The session hit an unrecoverable error
    Fatal(SessionError),
}

impl SupervisorExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            SupervisorExit::Shutdown => 0,
            SupervisorExit::Fatal(_) => 1,
        }
    }
}

/// Receives fatal errors from the session and performs the orderly shutdown
#[derive(Debug)]
pub struct SessionSupervisor {
    fatal_rx: mpsc::UnboundedReceiver<SessionError>,
}

impl SessionSupervisor {
    pub fn channel() -> (FatalReporter, SessionSupervisor) {
        let (tx, fatal_rx) = mpsc::unbounded_channel();
        (FatalReporter { tx }, SessionSupervisor { fatal_rx })
    }

    /// Next reported fatal error, if one is already queued
    pub fn try_fatal(&mut self) -> Option<SessionError> {
        self.fatal_rx.try_recv().ok()
    }

    /// Wait for the first fatal error
    pub async fn next_fatal(&mut self) -> Option<SessionError> {
        self.fatal_rx.recv().await
    }

    /// Wait for a fatal error or `shutdown`, then close the transport.
    pub async fn supervise<T, F>(mut self, transport: &T, shutdown: F) -> SupervisorExit
    where
        T: Transport,
        F: Future<Output = ()>,
    {
        // If every reporter is dropped the first branch disables itself
        let exit = tokio::select! {
            Some(error) = self.fatal_rx.recv() => {
                error!(error = %error, "Fatal session error, shutting down");
                SupervisorExit::Fatal(error)
            }
            _ = shutdown => {
                info!("Shutdown requested");
                SupervisorExit::Shutdown
            }
        };

        if let Err(e) = transport.shutdown().await {
            warn!("Error while closing transport: {}", e);
        }
        info!(exit_code = exit.exit_code(), "Session supervisor finished");
        exit
    }
}
