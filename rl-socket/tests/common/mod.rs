//! Shared test utilities for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use rl_core::config::ConnectionConfig;
use rl_socket::{ConnectionManager, ConnectionState, EventStore};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A stand-in for the game plugin's WebSocket server.
pub struct FakePlugin {
    listener: TcpListener,
    pub url: String,
}

impl FakePlugin {
    /// Listen on an ephemeral loopback port.
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("failed to bind");
        let addr = listener.local_addr().expect("no local addr");
        Self {
            listener,
            url: format!("ws://{addr}"),
        }
    }

    /// Accept the next client connection.
    pub async fn accept(&self) -> PluginConn {
        let (stream, _) = tokio::time::timeout(TIMEOUT, self.listener.accept())
            .await
            .expect("timed out waiting for a client")
            .expect("accept failed");
        let ws = accept_async(stream).await.expect("handshake failed");
        PluginConn { ws }
    }
}

/// One accepted client, seen from the plugin side.
pub struct PluginConn {
    ws: WebSocketStream<TcpStream>,
}

impl PluginConn {
    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .expect("plugin send failed");
    }

    pub async fn send_binary(&mut self, bytes: &[u8]) {
        self.ws
            .send(Message::Binary(bytes.to_vec().into()))
            .await
            .expect("plugin send failed");
    }

    /// Next text frame from the client, parsed as JSON.
    pub async fn next_json(&mut self) -> Value {
        loop {
            let message = tokio::time::timeout(TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a client frame")
                .expect("client went away")
                .expect("read failed");
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).expect("client sent invalid JSON");
            }
        }
    }

    /// Close the connection from the plugin side.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    /// Wait until the client closes or the stream ends.
    pub async fn wait_closed(mut self) {
        let _ = tokio::time::timeout(TIMEOUT, async {
            while let Some(Ok(message)) = self.ws.next().await {
                if message.is_close() {
                    break;
                }
            }
        })
        .await;
    }
}

/// Connection settings pointed at `url`, with short backoff for tests.
pub fn test_config(url: &str) -> ConnectionConfig {
    ConnectionConfig {
        url: url.to_string(),
        max_reconnect_attempts: 3,
        base_delay_ms: 50,
        ..ConnectionConfig::default()
    }
}

/// Start a manager against `plugin` and accept its connection.
pub async fn connect(plugin: &FakePlugin, config: ConnectionConfig) -> (ConnectionManager, PluginConn) {
    let manager = ConnectionManager::new(config, EventStore::new());
    manager.start().expect("start failed");
    let conn = plugin.accept().await;
    wait_for_state(&manager, ConnectionState::Open).await;
    (manager, conn)
}

pub async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
    let mut rx = manager.state_receiver();
    tokio::time::timeout(TIMEOUT, rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

/// Poll until `check` holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}
