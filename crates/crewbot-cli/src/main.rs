//! Crewbot CLI — entry point.
//!
//! # Commands
//!
//! - `crewbot agent [-m MESSAGE]` — chat with the crew (single-shot or REPL)
//! - `crewbot gateway` — run the service: brokers, background processor, channels
//! - `crewbot onboard` — initialize config + workspace
//! - `crewbot configure <path> <value>` — set a config value by dotted path
//! - `crewbot status` — show configuration and provider status
//! - `crewbot memory …` — inspect and maintain the memory store
//! - `crewbot session …` — inspect and maintain room sessions
//!
//! Exit codes: 0 success, 1 error, 2 bad usage (from clap).

mod gateway;
mod helpers;
mod memory_cmd;
mod onboard;
mod repl;
mod session_cmd;
mod status;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crewbot_core::config::load_config;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// 🤖 Crewbot — a crew of assistant bots collaborating in rooms
#[derive(Parser)]
#[command(name = "crewbot", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the crew (single-shot or interactive REPL)
    Agent {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// Room to chat in
        #[arg(short, long, default_value = "general")]
        room: String,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Start the gateway (brokers + background processor + channels)
    Gateway {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Initialize configuration and workspace
    Onboard,

    /// Set a configuration value by dotted path
    Configure {
        /// Dotted config path, e.g. providers.openrouter.apiKey
        path: String,
        /// JSON-encoded or plain value
        value: String,
    },

    /// Show configuration and provider status
    Status,

    /// Inspect and maintain the memory store
    Memory {
        #[command(subcommand)]
        action: memory_cmd::MemoryCommands,
    },

    /// Inspect and maintain room sessions
    Session {
        #[command(subcommand)]
        action: session_cmd::SessionCommands,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let result = run(cli).await;
    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            helpers::print_error(&e);
            std::process::ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Agent { message, room, logs } => {
            init_logging(logs);
            run_agent(message, room).await
        }
        Commands::Gateway { logs } => {
            init_logging(logs);
            gateway::run().await
        }
        Commands::Onboard => onboard::run(),
        Commands::Configure { path, value } => configure(&path, &value),
        Commands::Status => status::run(),
        Commands::Memory { action } => {
            init_logging(false);
            memory_cmd::dispatch(action)
        }
        Commands::Session { action } => {
            init_logging(false);
            session_cmd::dispatch(action)
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

// ─────────────────────────────────────────────
// Agent command
// ─────────────────────────────────────────────

async fn run_agent(message: Option<String>, room: String) -> Result<()> {
    let config = load_config(None);
    let runtime = helpers::build_runtime(&config)?;

    match message {
        Some(msg) => {
            let response = runtime
                .agent
                .process_direct(&msg)
                .await
                .context("agent processing failed")?;
            helpers::print_response(&response);
            Ok(())
        }
        None => repl::run(runtime, &room).await,
    }
}

// ─────────────────────────────────────────────
// Configure command
// ─────────────────────────────────────────────

fn configure(path: &str, value: &str) -> Result<()> {
    use crewbot_core::config::paths::{apply, ConfigOp};
    use crewbot_core::config::save_config;

    let config = load_config(None);
    let parsed: serde_json::Value = serde_json::from_str(value)
        .unwrap_or(serde_json::Value::String(value.to_string()));

    let updated = apply(&config, path, ConfigOp::Set(parsed))?;
    save_config(&updated, None)?;
    println!("✅ Set {path}");
    Ok(())
}
