//! Observability for the broker session
//!
//! Structured logging only; every hook reports through `tracing`.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macro for structured logging
pub use logging::session_span;
