//! Session lifecycle: operation outcomes, delivery tracking, the reconnection
//! state machine and fatal error supervision.
//!
//! - [`action`] - operation results and the listeners that observe them
//! - [`state`] - pure state and retry decisions
//! - [`listener`] - the reconnection state machine
//! - [`supervisor`] - turns fatal errors into an orderly shutdown

pub mod action;
pub mod listener;
pub mod state;
pub mod supervisor;

pub use action::{ActionListener, ActionLogger, ActionResult, DeliveryTracker};
pub use listener::{SessionListener, SessionSettings};
pub use state::{RetryDecision, RetryPolicy, SessionState};
pub use supervisor::{FatalReporter, SessionSupervisor, SupervisorExit};
