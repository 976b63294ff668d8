//! # relayprobe
//!
//! CLI for exercising a relay end to end.
//!
//! ## Commands
//!
//! - `run`: sign up, log in, write a record and read it back through the
//!   relay, then log out; exits non-zero unless every stage passed
//! - `health`: query a relay's `/health` endpoint
//!
//! ## Example
//!
//! ```bash
//! # Start a relay
//! relayprobe-relay
//!
//! # Run the harness against it
//! relayprobe run --relay ws://127.0.0.1:8765/ws
//!
//! # Machine-readable report
//! relayprobe run --relay ws://127.0.0.1:8765/ws --json
//!
//! # Without a relay, against the in-process store
//! relayprobe run --mock
//!
//! # Health check
//! relayprobe health --url http://127.0.0.1:8765/health
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{health, run};

/// CLI for exercising a relayprobe relay.
#[derive(Parser, Debug)]
#[command(name = "relayprobe")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log verbosity when RUST_LOG is unset (e.g. info, debug)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the integration harness
    Run(run::RunArgs),

    /// Query a relay's health endpoint
    Health {
        /// Health endpoint URL
        #[arg(long, env = "RELAYPROBE_HEALTH_URL", default_value = health::DEFAULT_URL)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => {
            let passed = run::run(&args).await?;
            if !passed {
                anyhow::bail!("harness failed");
            }
        }
        Commands::Health { url } => {
            health::run(&url).await?;
        }
    }

    Ok(())
}
