//! Config commands.

use clap::Subcommand;
use console::style;

use rl_core::config::{AppConfig, ConfigHandle};
use rl_core::error::RlResult;

use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration.
    Show,
    /// Write a configuration file with default values.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the configuration file path.
    Path,
}

/// Run a config command.
pub async fn run(config: ConfigHandle, action: ConfigAction, format: OutputFormat) -> RlResult<()> {
    match action {
        ConfigAction::Show => {
            let cfg = config.read().await;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&*cfg)?);
                }
                OutputFormat::Text => print_config_text(&cfg),
            }
        }
        ConfigAction::Init { force } => {
            let path = config.path()?;
            if path.exists() && !force {
                println!(
                    "  {} {} already exists (use --force to overwrite)",
                    style("SKIP").yellow(),
                    path.display()
                );
                return Ok(());
            }
            *config.write().await = AppConfig::default();
            config.save().await?;
            println!("  {} Wrote {}", style("OK").green(), path.display());
        }
        ConfigAction::Path => {
            let path = config.path()?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "path": path, "exists": path.exists() }));
                }
                OutputFormat::Text => println!("{}", path.display()),
            }
        }
    }
    Ok(())
}

fn print_config_text(cfg: &AppConfig) {
    let conn = &cfg.connection;
    println!("{}", style("Connection").bold().underlined());
    println!("  connection.url                     {}", conn.url);
    println!("  connection.max_reconnect_attempts  {}", conn.max_reconnect_attempts);
    println!("  connection.base_delay_ms           {}", conn.base_delay_ms);
    println!("  connection.max_delay_ms            {}", conn.max_delay_ms);
    println!("  connection.jitter_factor           {}", conn.jitter_factor);
    println!("  connection.keepalive_interval_ms   {}", conn.keepalive_interval_ms);
    println!("  connection.frame_buffer            {}", conn.frame_buffer);

    println!();
    println!("{}", style("Logging").bold().underlined());
    println!("  logging.level                      {}", cfg.logging.level);
    println!("  logging.directory                  {}", cfg.logging.directory);
    println!("  logging.json_output                {}", cfg.logging.json_output);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_writes_defaults_and_respects_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut custom = AppConfig::default();
        custom.connection.url = "ws://10.0.0.5:49122".into();
        let handle = ConfigHandle::new(custom).with_path(path.clone());

        run(handle.clone(), ConfigAction::Init { force: false }, OutputFormat::Text)
            .await
            .unwrap();
        let written = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(written.connection.url, "ws://localhost:49122");

        std::fs::write(&path, "[connection]\nurl = \"ws://keep.me:1\"\n").unwrap();
        run(handle.clone(), ConfigAction::Init { force: false }, OutputFormat::Text)
            .await
            .unwrap();
        assert_eq!(
            AppConfig::load_from_file(&path).unwrap().connection.url,
            "ws://keep.me:1"
        );

        run(handle, ConfigAction::Init { force: true }, OutputFormat::Text)
            .await
            .unwrap();
        assert_eq!(
            AppConfig::load_from_file(&path).unwrap().connection.url,
            "ws://localhost:49122"
        );
    }
}
