//! Configuration management commands.
//!
//! Reads and writes the persisted queue configuration document.

use anyhow::{Context, Result};
use clap::Subcommand;

use jobq_core::config::QueueConfig;

use crate::output::{self, OutputFormat};
use crate::AppContext;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show all configuration values
    Show,

    /// Get a configuration value
    Get {
        /// Configuration key (e.g. max_retries)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Value to set
        value: String,
    },

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn execute(cmd: ConfigCommands, ctx: &AppContext, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let config = &ctx.config;

            match format {
                OutputFormat::Table => {
                    output::print_header("Configuration");
                    for (key, value) in config.entries() {
                        output::print_detail(key, &value);
                    }
                }
                _ => output::print_item(config, format),
            }
        }

        ConfigCommands::Get { key } => {
            let value = ctx.config.get(&key).context("failed to read config")?;
            match format {
                OutputFormat::Table => println!("{}", value),
                _ => output::print_item(&serde_json::json!({ "key": key, "value": value }), format),
            }
        }

        ConfigCommands::Set { key, value } => {
            let mut config = ctx.config.clone();
            config
                .set(&key, &value)
                .with_context(|| format!("failed to set '{}'", key))?;
            config
                .save(&ctx.store)
                .await
                .context("failed to persist configuration")?;

            match format {
                OutputFormat::Table => output::print_success(&format!("{} = {}", key, value)),
                _ => output::print_item(&serde_json::json!({ "key": key, "value": value }), format),
            }
        }

        ConfigCommands::Reset { force } => {
            if !force {
                output::print_info("This will reset all configuration. Use --force to confirm.");
                return Ok(());
            }

            QueueConfig::reset(&ctx.store)
                .await
                .context("failed to reset configuration")?;
            output::print_success("Configuration reset to defaults");
        }
    }

    Ok(())
}
