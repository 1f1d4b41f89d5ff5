//! Connection manager.
//!
//! Keeps a best-effort connection to the game plugin, decodes and normalizes
//! every inbound frame into the [`EventStore`], sends keepalive pings while
//! open, and reconnects with exponential backoff when the socket drops.
//!
//! All store writes for one manager happen on its single background task, in
//! the order frames arrive and, within a frame, in normalization order.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use rl_core::config::ConnectionConfig;
use rl_core::constants::keepalive;
use rl_core::error::{RlError, RlResult};

use crate::events::ConnectionState;
use crate::normalize;
use crate::store::EventStore;
use crate::transport::{Connector, Frame, Link, WsConnector};

/// Configuration for socket reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect; doubled for every further attempt.
    pub base_delay: Duration,
    /// Maximum delay cap for exponential backoff.
    pub max_delay: Duration,
    /// Reconnects allowed between two successful connections.
    pub max_attempts: u32,
    /// Jitter factor (0.0 to 1.0) added to each delay.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

impl From<&ConnectionConfig> for ReconnectConfig {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            max_attempts: config.max_reconnect_attempts,
            jitter_factor: config.jitter_factor,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect number `attempt + 1`: `base_delay * 2^attempt`,
    /// capped at `max_delay`, with optional jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();

        let exponential = (base * 2.0_f64.powi(attempt.min(62) as i32)).min(max);

        if self.jitter_factor <= 0.0 {
            return Duration::from_secs_f64(exponential);
        }

        let jitter_range = exponential * self.jitter_factor;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        Duration::from_secs_f64((exponential + jitter).max(0.0))
    }
}

/// Capacity of the broadcast tap of received events.
const TAP_CAPACITY: usize = 256;

/// One event as it was written into the store.
#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    pub event: String,
    pub payload: Arc<Value>,
    pub at: DateTime<Utc>,
}

/// What kind of fault was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultKind {
    /// An inbound frame was not valid JSON. The connection stayed open.
    Decode,
    /// The transport reported an error.
    Transport,
    /// A connection attempt failed.
    Connect,
}

/// The most recent recoverable fault, kept for inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocketFault {
    pub kind: FaultKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl std::fmt::Display for SocketFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            FaultKind::Decode => "decode",
            FaultKind::Transport => "transport",
            FaultKind::Connect => "connect",
        };
        write!(f, "{kind} error: {}", self.message)
    }
}

/// Counters since the manager was created.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStats {
    pub frames_received: u64,
    pub events_written: u64,
    pub decode_failures: u64,
    pub pings_sent: u64,
    pub pongs_received: u64,
    pub last_pong_at: Option<DateTime<Utc>>,
}

/// State shared between the manager handle and its background task.
struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    last_error: RwLock<Option<SocketFault>>,
    attempts: AtomicU32,
    exhausted: AtomicBool,
    torn_down: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    stats: Mutex<ConnectionStats>,
    tap: broadcast::Sender<ReceivedEvent>,
}

impl Shared {
    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Publish a state change. Does nothing after teardown.
    fn publish(&self, new_state: ConnectionState) -> bool {
        if self.is_torn_down() {
            return false;
        }
        self.set_state(new_state);
        true
    }

    fn set_state(&self, new_state: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == new_state {
                return false;
            }
            info!("socket state: {} -> {}", *state, new_state);
            *state = new_state;
            true
        });
    }

    fn record_fault(&self, kind: FaultKind, message: String) {
        if self.is_torn_down() {
            return;
        }
        *self.last_error.write() = Some(SocketFault {
            kind,
            message,
            at: Utc::now(),
        });
    }
}

/// How a connected link ended.
enum LinkEnd {
    Closed(Option<String>),
    Shutdown,
}

/// Persistent connection to one producer endpoint.
///
/// Each manager owns its socket, timers and background task; any number of
/// managers can run side by side. Dropping the manager aborts the task
/// without a graceful close; prefer [`ConnectionManager::shutdown`].
pub struct ConnectionManager {
    config: ConnectionConfig,
    reconnect: ReconnectConfig,
    store: EventStore,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Manager that connects over WebSocket.
    pub fn new(config: ConnectionConfig, store: EventStore) -> Self {
        let connector = WsConnector::new(config.frame_buffer);
        Self::with_connector(config, store, connector)
    }

    /// Manager that opens links through `connector`.
    pub fn with_connector(
        config: ConnectionConfig,
        store: EventStore,
        connector: impl Connector,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let (shutdown_tx, _) = watch::channel(false);
        let (tap, _) = broadcast::channel(TAP_CAPACITY);

        Self {
            reconnect: ReconnectConfig::from(&config),
            config,
            store,
            connector: Arc::new(connector),
            shared: Arc::new(Shared {
                state_tx,
                last_error: RwLock::new(None),
                attempts: AtomicU32::new(0),
                exhausted: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
                outbound: Mutex::new(None),
                stats: Mutex::new(ConnectionStats::default()),
                tap,
            }),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Start connecting in the background.
    ///
    /// Does nothing while the background task is running. After the retry
    /// budget was exhausted, starts over with a fresh budget. Must be called
    /// from within a tokio runtime.
    pub fn start(&self) -> RlResult<()> {
        self.config.validate()?;
        if self.shared.is_torn_down() {
            return Err(RlError::Internal("connection manager was shut down".into()));
        }

        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("connection manager already running, skipping");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RlError::Internal(format!("no tokio runtime: {e}")))?;

        self.shared.attempts.store(0, Ordering::Release);
        self.shared.exhausted.store(false, Ordering::Release);

        let worker = Worker {
            url: self.config.url.clone(),
            keepalive_interval: self.config.keepalive_interval(),
            reconnect: self.reconnect.clone(),
            store: self.store.clone(),
            connector: Arc::clone(&self.connector),
            shared: Arc::clone(&self.shared),
        };
        let shutdown_rx = self.shutdown_tx.subscribe();
        *task = Some(runtime.spawn(worker.run(shutdown_rx)));

        info!("connection manager started for {}", self.config.url);
        Ok(())
    }

    /// Tear the manager down.
    ///
    /// Cancels the backoff and keepalive timers, closes the socket, and
    /// waits for the background task to finish. Once this returns no store
    /// write, fault or state change is published by the task. Idempotent.
    pub async fn shutdown(&self) {
        if self.shared.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.set_state(ConnectionState::Closing);
        self.shutdown_tx.send_replace(true);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("connection task ended abnormally: {e}");
                }
            }
        }

        self.shared.outbound.lock().take();
        self.shared.set_state(ConnectionState::Closed);
        info!("connection manager shut down");
    }

    /// Send `{"event": event, "data": data}` to the producer.
    ///
    /// Returns `false`, and logs a warning, when the socket is not open.
    pub fn send(&self, event: &str, data: Value) -> bool {
        let state = self.state();
        if !state.is_open() {
            warn!("send of {event} attempted while not connected (state: {state})");
            return false;
        }

        let frame = json!({ "event": event, "data": data }).to_string();
        let sent = self
            .shared
            .outbound
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok());
        if !sent {
            warn!("send of {event} dropped: socket is closing");
        }
        sent
    }

    /// Receive every event right after it was written into the store.
    ///
    /// Slow receivers miss events (`RecvError::Lagged`); the store itself
    /// always holds the latest payload.
    pub fn events(&self) -> broadcast::Receiver<ReceivedEvent> {
        self.shared.tap.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// The most recent decode, transport or connect fault.
    pub fn last_error(&self) -> Option<SocketFault> {
        self.shared.last_error.read().clone()
    }

    /// Reconnects scheduled since the last successful connection.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::Acquire)
    }

    /// Whether the retry budget ran out. The state stays `Closed` for good
    /// until [`ConnectionManager::start`] is called again.
    pub fn is_exhausted(&self) -> bool {
        self.shared.exhausted.load(Ordering::Acquire)
    }

    /// Frame and keepalive counters.
    pub fn stats(&self) -> ConnectionStats {
        self.shared.stats.lock().clone()
    }

    /// The store this manager writes into.
    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Endpoint this manager connects to.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Backoff delay used before reconnect number `attempt + 1`.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect.delay_for(attempt)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.torn_down.store(true, Ordering::Release);
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

/// Resolves once shutdown was requested or the manager is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// The background task: connect, drive, back off, repeat.
struct Worker {
    url: String,
    keepalive_interval: Duration,
    reconnect: ReconnectConfig,
    store: EventStore,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if !self.shared.publish(ConnectionState::Connecting) {
                return;
            }
            info!("socket connecting to {}", self.url);

            let connected = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => return,
                result = self.connector.connect(&self.url) => result,
            };

            match connected {
                Ok(link) => match self.drive(link, &mut shutdown).await {
                    LinkEnd::Shutdown => return,
                    LinkEnd::Closed(reason) => {
                        info!("socket closed: {}", reason.as_deref().unwrap_or("no reason given"));
                    }
                },
                Err(e) => {
                    warn!("connection attempt failed: {e}");
                    self.shared.record_fault(FaultKind::Connect, e.to_string());
                }
            }

            let attempt = self.shared.attempts.load(Ordering::Acquire);
            let exhausted = attempt >= self.reconnect.max_attempts;
            if exhausted && !self.shared.is_torn_down() {
                self.shared.exhausted.store(true, Ordering::Release);
            }
            if !self.shared.publish(ConnectionState::Closed) {
                return;
            }
            if exhausted {
                error!(
                    "max reconnection attempts ({}) reached, giving up",
                    self.reconnect.max_attempts
                );
                return;
            }

            let delay = self.reconnect.delay_for(attempt);
            self.shared.attempts.store(attempt + 1, Ordering::Release);
            warn!(
                "reconnection attempt {}/{} in {:.1}s",
                attempt + 1,
                self.reconnect.max_attempts,
                delay.as_secs_f64()
            );

            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => {
                    info!("reconnection cancelled by shutdown");
                    return;
                }
                _ = sleep(delay) => {}
            }
        }
    }

    /// Pump one open link until it closes or shutdown is requested.
    async fn drive(&self, mut link: Link, shutdown: &mut watch::Receiver<bool>) -> LinkEnd {
        let Some(outbound) = link.sender() else {
            return LinkEnd::Closed(Some("link has no outbound channel".into()));
        };

        self.shared.attempts.store(0, Ordering::Release);
        *self.shared.outbound.lock() = Some(outbound.clone());
        if !self.shared.publish(ConnectionState::Open) {
            self.shared.outbound.lock().take();
            return LinkEnd::Shutdown;
        }

        let period = self.keepalive_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let ping = json!({ "event": keepalive::PING }).to_string();

        let end = loop {
            tokio::select! {
                biased;
                _ = cancelled(shutdown) => break LinkEnd::Shutdown,
                frame = link.recv() => match frame {
                    Some(Frame::Text(text)) => self.handle_frame(text.as_bytes()),
                    Some(Frame::Binary(bytes)) => self.handle_frame(&bytes),
                    Some(Frame::Error(message)) => {
                        warn!("socket transport error: {message}");
                        self.shared.record_fault(FaultKind::Transport, message);
                    }
                    Some(Frame::Closed(reason)) => break LinkEnd::Closed(reason),
                    None => break LinkEnd::Closed(None),
                },
                _ = ticker.tick() => {
                    if outbound.send(ping.clone()).is_ok() {
                        self.shared.stats.lock().pings_sent += 1;
                        debug!("keepalive ping sent");
                    }
                }
            }
        };

        self.shared.outbound.lock().take();
        drop(outbound);
        match end {
            LinkEnd::Shutdown => link.close().await,
            LinkEnd::Closed(_) => drop(link),
        }
        end
    }

    /// Decode one frame and write its events into the store.
    ///
    /// Binary frames must hold UTF-8 JSON; anything else is a decode failure.
    fn handle_frame(&self, bytes: &[u8]) {
        self.shared.stats.lock().frames_received += 1;

        let raw: Value = match serde_json::from_slice(bytes) {
            Ok(raw) => raw,
            Err(e) => {
                self.shared.stats.lock().decode_failures += 1;
                warn!("dropping frame that is not valid JSON: {e}");
                self.shared.record_fault(FaultKind::Decode, e.to_string());
                return;
            }
        };

        if is_keepalive_reply(&raw) {
            self.record_pong();
            return;
        }

        debug!("socket frame: {}", normalize::classify(&raw).label());
        for (event, payload) in normalize::into_events(raw) {
            if event == keepalive::PONG {
                self.record_pong();
                continue;
            }
            if self.shared.is_torn_down() {
                return;
            }
            self.store.write(&event, payload);
            self.shared.stats.lock().events_written += 1;
            self.tap(event);
        }
    }

    fn tap(&self, event: String) {
        if self.shared.tap.receiver_count() == 0 {
            return;
        }
        if let Some(payload) = self.store.read(&event) {
            let _ = self.shared.tap.send(ReceivedEvent {
                event,
                payload,
                at: Utc::now(),
            });
        }
    }

    fn record_pong(&self) {
        let mut stats = self.shared.stats.lock();
        stats.pongs_received += 1;
        stats.last_pong_at = Some(Utc::now());
        debug!("keepalive pong received");
    }
}

/// `{"event": "pong"}` with or without a `data` field.
fn is_keepalive_reply(raw: &Value) -> bool {
    raw.get("event").and_then(Value::as_str) == Some(keepalive::PONG)
}
