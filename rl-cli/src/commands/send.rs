//! Send command - deliver one frame to the plugin.

use std::time::Duration;

use console::style;
use serde_json::{json, Value};
use tracing::error;

use rl_core::config::ConfigHandle;
use rl_core::error::{RlError, RlResult};
use rl_socket::{ConnectionManager, ConnectionState, EventStore};

use crate::OutputFormat;

/// How long to wait for the socket to open.
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the send command.
pub async fn run(
    config: ConfigHandle,
    event: String,
    data: Option<String>,
    url: Option<String>,
    format: OutputFormat,
) -> RlResult<()> {
    let data: Value = match data {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| RlError::Decode(format!("--data is not valid JSON: {e}")))?,
        None => Value::Null,
    };

    let mut connection = super::connection_config(&config, url).await?;
    // One-shot: do not sit through the full backoff series.
    connection.max_reconnect_attempts = 0;
    let target = connection.url.clone();

    let manager = ConnectionManager::new(connection, EventStore::new());
    let mut states = manager.state_receiver();
    manager.start()?;

    let opened = tokio::time::timeout(OPEN_TIMEOUT, async {
        loop {
            let state = *states.borrow_and_update();
            if state.is_open() {
                return true;
            }
            if state == ConnectionState::Closed && manager.is_exhausted() {
                return false;
            }
            if states.changed().await.is_err() {
                return false;
            }
        }
    })
    .await
    .unwrap_or(false);

    if !opened {
        let reason = manager
            .last_error()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "timed out".to_string());
        manager.shutdown().await;
        error!("could not connect to {target}: {reason}");
        return Err(RlError::Connect(format!("{target}: {reason}")));
    }

    let sent = manager.send(&event, data.clone());
    manager.shutdown().await;

    if !sent {
        return Err(RlError::SocketClosed);
    }

    match format {
        OutputFormat::Json => {
            println!("{}", json!({ "type": "sent", "event": event, "data": data }));
        }
        OutputFormat::Text => {
            println!(
                "  {} Sent {} to {target}",
                style("OK").green().bold(),
                style(&event).cyan()
            );
        }
    }
    Ok(())
}
