//! Batch load a label from a directory catalog.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use bytes::Bytes;
use engine_assets::prelude::*;
use tracing::info;

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolArgs {
    /// Catalog root directory.
    pub root: PathBuf,
    /// Label (sub-directory) to batch load.
    pub label: Option<String>,
    /// Optional JSON config file.
    pub config: Option<PathBuf>,
    /// Individual keys loaded after the batch.
    pub keys: Vec<String>,
}

impl Default for ToolArgs {
    fn default() -> Self {
        Self {
            root: PathBuf::from("assets"),
            label: None,
            config: None,
            keys: Vec::new(),
        }
    }
}

/// Parses `--root`, `--label`, `--config` and repeated `--key` flags.
/// Unknown flags are skipped.
pub fn parse_args(args: &[String]) -> ToolArgs {
    let mut out = ToolArgs::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--root" if i + 1 < args.len() => {
                out.root = PathBuf::from(&args[i + 1]);
                i += 2;
            }
            "--label" if i + 1 < args.len() => {
                out.label = Some(args[i + 1].clone());
                i += 2;
            }
            "--config" if i + 1 < args.len() => {
                out.config = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--key" if i + 1 < args.len() => {
                out.keys.push(args[i + 1].clone());
                i += 2;
            }
            _ => i += 1,
        }
    }
    out
}

/// What a run loaded.
#[derive(Debug, Default)]
pub struct ToolSummary {
    pub batch: Option<BatchReport>,
    /// `(key, size in bytes)` for each `--key` that loaded.
    pub keys: Vec<(String, usize)>,
    /// `(key, error)` for each `--key` that failed.
    pub key_errors: Vec<(String, LoadError)>,
    /// Total cached bytes at the end of the run.
    pub cached_bytes: usize,
}

async fn load_config(args: &ToolArgs) -> anyhow::Result<CacheConfig> {
    match &args.config {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("read config {}", path.display()))?;
            CacheConfig::from_json_str(&text).context("parse config")
        }
        None => Ok(CacheConfig::default()),
    }
}

/// Runs the tool. Progress lines go to stdout.
pub async fn run(args: &ToolArgs) -> anyhow::Result<ToolSummary> {
    let cfg = load_config(args).await?;
    let backend = Arc::new(DirectoryBackend::new(&args.root));
    let cache = ResourceCache::with_config(backend, cfg);
    let loader = BatchLoader::new(cache.clone());
    loader.on_loaded(|report| {
        info!(label = %report.label, total = report.total, failed = report.failed.len(), "Batch finished");
    });

    let mut summary = ToolSummary::default();

    if let Some(label) = &args.label {
        let report = loader
            .load_all_typed::<Bytes, Bytes, _>(label, |p| match &p.error {
                None => println!("[{}/{}] {}", p.completed, p.total, p.key),
                Some(e) => println!("[{}/{}] {} FAILED: {}", p.completed, p.total, p.key, e),
            })
            .await
            .with_context(|| format!("load label {label}"))?;
        summary.batch = Some(report);
    }

    for key in &args.keys {
        match cache.load::<Bytes>(key.as_str()).await {
            Ok(data) => {
                println!("{}: {} bytes", key, data.len());
                summary.keys.push((key.clone(), data.len()));
            }
            Err(e) => {
                println!("{}: {}", key, e);
                summary.key_errors.push((key.clone(), e));
            }
        }
    }

    summary.cached_bytes = cache
        .keys()
        .iter()
        .filter_map(|k| cache.try_get_cached::<Bytes>(k.as_str()))
        .map(|b| b.len())
        .sum();

    Ok(summary)
}
