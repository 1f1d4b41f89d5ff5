//! Error types shared by the telemetry socket crates.
//!
//! Every fallible operation returns `RlResult`. Conditions the socket layer
//! recovers from on its own (bad frames, dropped connections) are recorded
//! rather than returned; see `rl_socket::manager::SocketFault`.

use thiserror::Error;

/// Convenience type alias for Results using RlError.
pub type RlResult<T> = Result<T, RlError>;

/// Unified error type.
#[derive(Error, Debug)]
pub enum RlError {
    // -- Configuration errors --
    /// Failed to load or parse configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Network errors --
    /// The WebSocket handshake failed.
    #[error("connect error: {0}")]
    Connect(String),

    /// The socket is closed.
    #[error("socket closed")]
    SocketClosed,

    // -- Payload errors --
    /// An inbound frame was not valid JSON.
    #[error("decode error: {0}")]
    Decode(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for RlError {
    fn from(e: serde_json::Error) -> Self {
        RlError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for RlError {
    fn from(e: toml::de::Error) -> Self {
        RlError::Config(e.to_string())
    }
}
