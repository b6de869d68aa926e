//! codegate - validation gate for machine-generated code
//!
//! Thin binary entry point that delegates to the handlers in `cli`.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use codegate_config::DebugConfig;

mod cli;
mod regenerator;

use cli::{Cli, Commands, SessionCommandOptions};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env (non-fatal if missing)
    dotenvy::dotenv().ok();

    let args = Cli::parse();
    let manager = cli::load_configuration(&args)?;
    let config = manager.config();

    if let Err(err) = initialize_tracing(&config.debug) {
        eprintln!("warning: tracing disabled: {err}");
    }
    if let Some(path) = manager.config_path() {
        tracing::debug!(path = %path.display(), "configuration loaded");
    }

    let success = match args.command {
        Commands::Validate { artifact, pretty } => {
            cli::handle_validate_command(config, &artifact, pretty).await?
        }
        Commands::Session {
            artifact,
            regenerate_cmd,
            regenerate_args,
            regenerate_timeout_secs,
            max_attempts,
            events,
            summary,
            pretty,
        } => {
            let options = SessionCommandOptions {
                artifact,
                regenerate_cmd,
                regenerate_args,
                regenerate_timeout: Duration::from_secs(regenerate_timeout_secs),
                max_attempts,
                events_path: events,
                summary,
                pretty,
            };
            cli::handle_session_command(config, options).await?
        }
        Commands::Rules { language, json } => {
            cli::handle_rules_command(config, language, json)?;
            true
        }
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// `RUST_LOG` wins; otherwise `[debug] trace_level` / `trace_targets`.
/// Logs go to stderr so stdout stays machine-readable.
fn initialize_tracing(debug: &DebugConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(debug.filter_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
}
