//! Listen command - stream events from the plugin until interrupted.

use std::collections::HashSet;

use console::style;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;

use rl_core::config::ConfigHandle;
use rl_core::error::RlResult;
use rl_socket::{ConnectionManager, ConnectionState, EventStore, GameEvent, ReceivedEvent};

use crate::OutputFormat;

/// Longest payload printed in text mode.
const MAX_PAYLOAD_WIDTH: usize = 160;

/// Run the listen command.
pub async fn run(
    config: ConfigHandle,
    url: Option<String>,
    events: Vec<String>,
    format: OutputFormat,
) -> RlResult<()> {
    let connection = super::connection_config(&config, url).await?;
    let filter: HashSet<String> = events.into_iter().collect();

    if format == OutputFormat::Text {
        println!(
            "{} Listening on {} (Ctrl+C to stop)",
            style("[rl-socket]").bold().dim(),
            connection.url
        );
        for name in &filter {
            if matches!(GameEvent::from_name(name), GameEvent::Unknown(_)) {
                println!(
                    "  {} {name} is not a known game event",
                    style("WARN").yellow()
                );
            }
        }
    }

    let manager = ConnectionManager::new(connection, EventStore::new());
    let mut received = manager.events();
    let mut states = manager.state_receiver();
    manager.start()?;

    loop {
        tokio::select! {
            event = received.recv() => match event {
                Ok(ev) => {
                    if filter.is_empty() || filter.contains(&ev.event) {
                        print_event(&ev, format);
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    println!(
                        "  {} Missed {n} events (slow consumer)",
                        style("WARN").yellow()
                    );
                }
                Err(RecvError::Closed) => break,
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                let fault = (state == ConnectionState::Closed)
                    .then(|| manager.last_error().map(|f| f.to_string()))
                    .flatten();
                super::print_state(state, fault.as_deref(), format);
                if state == ConnectionState::Closed && manager.is_exhausted() {
                    if format == OutputFormat::Text {
                        println!(
                            "  {} Giving up after {} reconnect attempts",
                            style("FAIL").red().bold(),
                            manager.reconnect_attempts()
                        );
                    }
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if format == OutputFormat::Text {
                    println!("\n  Disconnecting...");
                }
                break;
            }
        }
    }

    manager.shutdown().await;

    if format == OutputFormat::Text {
        let stats = manager.stats();
        println!(
            "  {} frames, {} events, {} undecodable",
            stats.frames_received, stats.events_written, stats.decode_failures
        );
    }
    Ok(())
}

fn print_event(ev: &ReceivedEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                json!({
                    "type": "event",
                    "event": ev.event,
                    "data": *ev.payload,
                    "at": ev.at,
                })
            );
        }
        OutputFormat::Text => {
            println!(
                "  {} {} {}",
                style(super::clock(ev.at)).dim(),
                style(format!("[{}]", ev.event)).cyan(),
                render_payload(&ev.event, &ev.payload)
            );
        }
    }
}

/// Events whose payload is a bare string are printed unquoted.
fn render_payload(event: &str, payload: &Value) -> String {
    match payload.as_str() {
        Some(text) if GameEvent::from_name(event).has_text_payload() => {
            super::truncate(text, MAX_PAYLOAD_WIDTH)
        }
        _ => super::compact(payload, MAX_PAYLOAD_WIDTH),
    }
}
