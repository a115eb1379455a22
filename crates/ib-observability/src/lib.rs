//! # ib-observability
//!
//! Structured logging for ioc-bridge, built on the tracing ecosystem.

pub mod logging;

pub use logging::{init, LogFormat, LoggingConfig};
