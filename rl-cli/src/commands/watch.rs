//! Watch command - print a derived value each time it changes.

use console::style;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use rl_core::config::ConfigHandle;
use rl_core::error::RlResult;
use rl_socket::{ConnectionManager, ConnectionState, EventSelector, EventStore};

use crate::OutputFormat;

const MAX_VALUE_WIDTH: usize = 200;

/// Run the watch command.
pub async fn run(
    config: ConfigHandle,
    event: String,
    pointer: Option<String>,
    url: Option<String>,
    format: OutputFormat,
) -> RlResult<()> {
    let connection = super::connection_config(&config, url).await?;
    let store = EventStore::new();

    let selector = match pointer.as_deref() {
        Some(pointer) => EventSelector::pointer(store.clone(), &event, pointer),
        None => EventSelector::json(store.clone(), &event, |payload| {
            payload.cloned().unwrap_or(Value::Null)
        }),
    };

    // The selector callback runs on the connection task; hand off to the
    // printing loop.
    let (changed_tx, mut changed_rx) = mpsc::unbounded_channel::<()>();
    let subscription = selector.subscribe(move || {
        let _ = changed_tx.send(());
    });

    if format == OutputFormat::Text {
        println!(
            "{} Watching {}{} on {} (Ctrl+C to stop)",
            style("[rl-socket]").bold().dim(),
            style(&event).cyan(),
            pointer.as_deref().unwrap_or(""),
            connection.url
        );
    }

    let manager = ConnectionManager::new(connection, store);
    let mut states = manager.state_receiver();
    manager.start()?;

    let mut renders: u64 = 0;
    loop {
        tokio::select! {
            Some(()) = changed_rx.recv() => {
                renders += 1;
                print_value(renders, &selector.get(), format);
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                if format == OutputFormat::Text && state != ConnectionState::Connecting {
                    super::print_state(state, None, format);
                }
                if state == ConnectionState::Closed && manager.is_exhausted() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    subscription.unsubscribe();
    manager.shutdown().await;

    if format == OutputFormat::Text {
        println!("\n  {renders} change(s) of {}", style(selector.event()).cyan());
    }
    Ok(())
}

fn print_value(renders: u64, value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", json!({ "type": "value", "render": renders, "value": value }));
        }
        OutputFormat::Text => {
            println!(
                "  {} {}",
                style(format!("#{renders}")).bold(),
                super::compact(value, MAX_VALUE_WIDTH)
            );
        }
    }
}
