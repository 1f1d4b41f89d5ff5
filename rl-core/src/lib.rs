//! rl-core - Foundation types shared by the telemetry socket crates.
//!
//! - Connection and logging configuration persisted as TOML
//! - The crate-wide error type
//! - Structured logging with tracing
//! - Platform directories and constants

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod platform;

// Re-export commonly used items at the crate root
pub use config::{AppConfig, ConfigHandle, ConnectionConfig};
pub use error::{RlError, RlResult};
pub use logging::init_logging;
pub use platform::Platform;
