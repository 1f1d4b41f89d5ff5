//! CLI command implementations.

pub mod config;
pub mod listen;
pub mod send;
pub mod watch;

use chrono::{DateTime, Local, Utc};
use console::style;
use serde_json::{json, Value};

use rl_core::config::{AppConfig, ConfigHandle, ConnectionConfig};
use rl_core::error::RlResult;
use rl_socket::ConnectionState;

use crate::OutputFormat;

/// Connection settings from config, with an optional URL override.
pub async fn connection_config(
    config: &ConfigHandle,
    url: Option<String>,
) -> RlResult<ConnectionConfig> {
    let mut connection = config.read().await.connection.clone();
    if let Some(url) = url {
        connection.url = AppConfig::sanitize_url(&url);
    }
    connection.validate()?;
    Ok(connection)
}

/// Print a connection state change.
pub fn print_state(state: ConnectionState, detail: Option<&str>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", json!({ "type": "state", "state": state, "detail": detail }));
        }
        OutputFormat::Text => {
            let label = match state {
                ConnectionState::Open => style(state.to_string()).green().bold(),
                ConnectionState::Connecting => style(state.to_string()).cyan(),
                ConnectionState::Closing | ConnectionState::Closed => {
                    style(state.to_string()).yellow()
                }
            };
            match detail {
                Some(detail) => println!("  {} {label} ({detail})", style("STATE").dim()),
                None => println!("  {} {label}", style("STATE").dim()),
            }
        }
    }
}

/// Local wall-clock time of `at`, for text output.
pub fn clock(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S%.3f").to_string()
}

/// Compact one-line rendering of a payload.
pub fn compact(value: &Value, max_len: usize) -> String {
    truncate(&value.to_string(), max_len)
}

/// Truncate a string to a maximum number of characters, appending an
/// ellipsis if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len > 3 {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    } else {
        s.chars().take(max_len).collect()
    }
}
