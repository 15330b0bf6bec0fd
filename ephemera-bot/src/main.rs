#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Main entry point for the `ephemera` bot.

use std::{fs, io, path::PathBuf};

use anyhow::{Context, bail};
use bot::{Orchestrator, tracer::initialize_tracing};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use dotenv::dotenv;
use shared::config::{Config, ConfigOverrides};
use tracing::info;

/// Ephemera CLI
#[derive(Parser)]
#[command(name = "ephemera")]
#[command(about = "Deletes chat messages once they are older than a configured TTL", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to the gateway and expire messages until a fatal error
    Run {
        /// Path to the configuration file (optional)
        #[arg(
            long,
            short,
            help = "Path to the configuration file (e.g., config.yaml or config.json). If not provided, defaults and environment are used."
        )]
        config: Option<PathBuf>,

        /// Message time-to-live in milliseconds
        #[arg(long, help = "Message time-to-live in milliseconds (e.g., 10800000 for three hours)")]
        ttl_ms: Option<u64>,

        /// Channel to watch; repeat for several
        #[arg(
            long = "channel",
            value_name = "ID",
            help = "Channel id to watch. Repeat the flag to watch several channels; replaces configured channels."
        )]
        channels: Vec<String>,
    },

    /// Generate shell completion scripts for the CLI
    Completion {
        #[arg(
            long,
            short,
            help = "The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)"
        )]
        shell: Shell,
    },

    /// Generate a configuration file
    Config {
        #[arg(
            long,
            short,
            default_value = "yaml",
            help = "Format of the configuration file to generate (yaml or json). Defaults to yaml."
        )]
        format: String,
    },
}

/// Loads `.env` and parses the command line.
#[must_use]
pub fn initialize_cli() -> Cli {
    dotenv().ok();
    Cli::parse()
}

async fn handle_run_command(
    config: Option<PathBuf>,
    ttl_ms: Option<u64>,
    channels: Vec<String>,
) -> anyhow::Result<()> {
    let overrides = ConfigOverrides {
        message_ttl_ms: ttl_ms,
        channel_ids: channels,
    };
    let config = Config::load_config(config, overrides).context("failed to load configuration")?;
    initialize_tracing(&config.logging);
    info!(channels = config.channel_ids.len(), ttl_ms = config.message_ttl_ms, "configuration loaded");

    let orchestrator = Orchestrator::from_config(config).context("failed to build REST client")?;
    orchestrator.run().await.context("ephemera stopped")?;
    Ok(())
}

fn generate_config(format: &str) -> anyhow::Result<()> {
    let config = Config::with_defaults();
    let (file_name, serialized) = match format {
        "yaml" => ("config.yaml", serde_yml::to_string(&config)?),
        "json" => ("config.json", serde_json::to_string_pretty(&config)?),
        other => bail!("Unsupported format '{other}'. Use 'yaml' or 'json'."),
    };

    fs::write(file_name, serialized).with_context(|| format!("failed to write {file_name}"))?;
    println!("Configuration file '{file_name}' generated successfully.");
    Ok(())
}

/// Main application entry point.
///
/// # Errors
/// Returns an error if configuration is invalid or the bot stops.
pub async fn run_app() -> anyhow::Result<()> {
    let cli = initialize_cli();

    match cli.command {
        Commands::Run {
            config,
            ttl_ms,
            channels,
        } => handle_run_command(config, ttl_ms, channels).await?,
        Commands::Completion { shell } => {
            generate(shell, &mut Cli::command(), "ephemera", &mut io::stdout());
        }
        Commands::Config { format } => generate_config(&format)?,
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_app().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_repeated_channels() {
        let cli = Cli::try_parse_from([
            "ephemera", "run", "--ttl-ms", "60000", "--channel", "1", "--channel", "2",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                config,
                ttl_ms,
                channels,
            } => {
                assert_eq!(config, None);
                assert_eq!(ttl_ms, Some(60_000));
                assert_eq!(channels, vec!["1".to_string(), "2".to_string()]);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn completion_rejects_unknown_shell() {
        assert!(Cli::try_parse_from(["ephemera", "completion", "--shell", "cmd"]).is_err());
    }

    #[test]
    fn config_rejects_unknown_format() {
        assert!(generate_config("toml").is_err());
    }
}
