//! rl-socket - Live game telemetry client for the Rocket League stats plugin.
//!
//! This crate provides:
//! - A connection manager with bounded exponential backoff and keepalive
//! - Normalization of the three frame shapes the plugin emits
//! - A per-event snapshot store with change subscriptions
//! - Memoized selectors over store snapshots
//! - Typed views of the known game events

pub mod events;
pub mod manager;
pub mod normalize;
pub mod scope;
pub mod selector;
pub mod store;
pub mod transport;

// Re-export key types
pub use events::{ConnectionState, EventPayload, GameEvent};
pub use manager::{
    ConnectionManager, ConnectionStats, FaultKind, ReceivedEvent, ReconnectConfig, SocketFault,
};
pub use normalize::{classify, into_events, normalize, FrameShape};
pub use scope::{
    current, subscribe_event, try_current, use_event, use_event_selector,
    use_event_selector_with, ScopeGuard,
};
pub use selector::{deep_equal, EventSelector};
pub use store::{EventStore, Subscription};
pub use transport::{Connector, Frame, Link, LinkPeer, WsConnector};
