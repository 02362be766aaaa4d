//! Standalone asset tool binary.
//!
//! Usage:
//!   cargo run -p engine_asset_tool -- [--root assets] [--label UI] [--key UI/logo.png]... [--config cache.json]
//!
//! Batch loads every file under `<root>/<label>` through the asset cache,
//! printing progress, then loads each `--key` individually. Keys are paths
//! relative to the root (`<label>/<file>`).

use std::env;

use anyhow::Context;
use engine_asset_tool::{parse_args, run};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let args = parse_args(&args);
    info!(root = %args.root.display(), label = ?args.label, keys = args.keys.len(), "Starting asset tool");

    let summary = run(&args).await.context("asset tool run")?;

    if let Some(report) = &summary.batch {
        println!(
            "Label {}: {}/{} loaded, {} failed",
            report.label,
            report.loaded.len(),
            report.total,
            report.failed.len()
        );
    }
    println!("Cached bytes: {}", summary.cached_bytes);

    let failed = summary.batch.as_ref().is_some_and(|r| r.has_failures()) || !summary.key_errors.is_empty();
    if failed {
        std::process::exit(1);
    }
    Ok(())
}
