//! Application-wide constants.

/// Application name, used for platform directories and log file names.
pub const APP_NAME: &str = "rl-socket";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Address of the game plugin's WebSocket server.
///
/// The plugin always listens on loopback port 49122.
pub const DEFAULT_URL: &str = "ws://localhost:49122";

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default base delay for exponential reconnect backoff.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Default upper bound on a single reconnect delay.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Default keepalive ping interval.
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 30_000;

/// Default capacity of the inbound frame channel of one socket.
pub const DEFAULT_FRAME_BUFFER: usize = 64;

/// Keepalive frame names on the wire.
pub mod keepalive {
    /// Event name of the outbound keepalive frame.
    pub const PING: &str = "ping";
    /// Event name of the producer's keepalive reply; never forwarded to the store.
    pub const PONG: &str = "pong";
}
