//! Health command - query a relay's `/health` endpoint.

use anyhow::{Context, Result};
use serde_json::Value;
use std::time::Duration;

/// Default relay health endpoint.
pub const DEFAULT_URL: &str = "http://127.0.0.1:8765/health";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetch and print the relay's health. Fails unless it reports `"ok"`.
pub async fn run(url: &str) -> Result<()> {
    let body = fetch(url).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&body).context("Failed to encode health response")?
    );

    check(&body)
}

async fn fetch(url: &str) -> Result<Value> {
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("Health check returned HTTP {}", status);
    }

    response
        .json()
        .await
        .context("Health response was not valid JSON")
}

fn check(body: &Value) -> Result<()> {
    match body.get("status").and_then(Value::as_str) {
        Some("ok") => Ok(()),
        Some(other) => anyhow::bail!("Relay reported status {:?}", other),
        None => anyhow::bail!("Health response has no status field"),
    }
}
