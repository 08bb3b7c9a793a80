//! Logging setup for Warden
//!
//! Everything in the workspace logs through `tracing`. This crate only owns
//! turning a [`LoggingConfig`] into an installed global subscriber.

pub mod init;

pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing};
pub use warden_config::domains::logging::{LogFormat, LogLevel, LoggingConfig};
