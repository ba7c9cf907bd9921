//! The `status` command: query a running appender's /stats endpoint.

use anyhow::{Context, Result};

pub async fn run(url: &str) -> Result<()> {
    let endpoint = format!("{}/stats", url.trim_end_matches('/'));

    let stats: serde_json::Value = reqwest::get(&endpoint)
        .await
        .with_context(|| format!("Failed to reach appender at {}", endpoint))?
        .error_for_status()
        .context("Appender returned an error status")?
        .json()
        .await
        .context("Failed to parse stats payload")?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
