//! Run command - execute the integration harness against a relay.

use anyhow::{Context, Result};
use clap::Args;
use relayprobe_client::{
    GraphStore, Harness, HarnessConfig, HarnessReport, MemoryIdentity, MemoryStore, ProbeConfig,
    RelayStore, RelayStoreConfig,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default relay WebSocket endpoint.
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8765/ws";

/// Arguments for `relayprobe run`.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Relay WebSocket URL
    #[arg(long, env = "RELAYPROBE_RELAY", default_value = DEFAULT_RELAY_URL)]
    pub relay: String,

    /// Test account username (generated when omitted)
    #[arg(long)]
    pub username: Option<String>,

    /// Test account password
    #[arg(long, env = "RELAYPROBE_PASSWORD", default_value = "testpassword123")]
    pub password: String,

    /// Path the test record is written to
    #[arg(long, default_value = relayprobe_client::harness::DEFAULT_PATH)]
    pub path: String,

    /// Write acknowledgement timeout in milliseconds
    #[arg(long, default_value_t = 5_000)]
    pub write_timeout_ms: u64,

    /// Read confirmation timeout in milliseconds
    #[arg(long, default_value_t = 15_000)]
    pub read_timeout_ms: u64,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Use the in-process store instead of a relay
    #[arg(long)]
    pub mock: bool,
}

impl RunArgs {
    fn harness_config(&self) -> HarnessConfig {
        let username = self.username.clone().unwrap_or_else(generated_username);
        let probe = ProbeConfig::default()
            .with_write_timeout(Duration::from_millis(self.write_timeout_ms))
            .with_read_timeout(Duration::from_millis(self.read_timeout_ms));

        HarnessConfig::new(&username, &self.password)
            .with_path(&self.path)
            .with_probe(probe)
    }
}

/// Run the harness and print its report. Returns the overall verdict.
pub async fn run(args: &RunArgs) -> Result<bool> {
    let report = if args.mock {
        tracing::info!("Running harness against the in-process store");
        execute(MemoryStore::new(), args).await
    } else {
        tracing::info!("Connecting to {}", args.relay);
        let store = RelayStore::connect_with_config(&args.relay, RelayStoreConfig::default())
            .await
            .with_context(|| format!("Failed to connect to relay at {}", args.relay))?;
        execute(store, args).await
    };

    print_report(&report, args.json)?;
    Ok(report.success())
}

/// Run the harness over an arbitrary store.
pub async fn execute<S: GraphStore>(store: S, args: &RunArgs) -> HarnessReport {
    let identity = MemoryIdentity::new(store);
    Harness::new(identity, args.harness_config()).run().await
}

fn print_report(report: &HarnessReport, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(report).context("Failed to encode report")?;
        println!("{}", text);
    } else {
        println!("{}", report);
    }
    Ok(())
}

fn generated_username() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("testuser_{}", millis)
}
