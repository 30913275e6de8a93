//! `harvest run`: drive the configured aggregators and print a summary.
//!
//! Aggregators run one after another. Each prints one block:
//!
//! ```text
//! run site
//!   newsapi:press
//!     fetched: 12
//!     written: 9
//!     duplicates: 3
//!     watermark: 2024-01-02T10:00:00Z
//!   reddit:all FAILED [unsupported_query_kind] ...
//! ok
//! ```

use anyhow::{bail, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::aggregator::{RunOptions, RunReport};
use crate::config::Config;
use crate::registry::{build_aggregators, Registries};

pub(crate) fn format_watermark(w: Option<DateTime<Utc>>) -> String {
    match w {
        Some(ts) => ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        None => "never".to_string(),
    }
}

fn print_report(report: &RunReport, options: RunOptions) {
    let mut header = format!("run {}", report.aggregator);
    if options.full {
        header.push_str(" (full)");
    }
    if options.dry_run {
        header.push_str(" (dry-run)");
    }
    println!("{}", header);

    for pass in &report.passes {
        match &pass.outcome {
            Ok(stats) => {
                println!("  {}", pass.source_id);
                println!("    fetched: {}", stats.fetched);
                println!("    written: {}", stats.written);
                println!("    duplicates: {}", stats.duplicates);
                println!("    watermark: {}", format_watermark(stats.watermark));
            }
            Err(e) => println!("  {} FAILED [{}] {}", pass.source_id, e.kind(), e),
        }
    }
    if report.cancelled {
        println!("  cancelled");
    }
}

/// Run every configured aggregator once, or only `only`.
///
/// Fails when `only` names no aggregator or when any aggregator's run failed
/// as a whole. Partial source failures are reported but do not fail.
pub async fn run_harvest(
    config: &Config,
    registries: &Registries,
    only: Option<&str>,
    options: RunOptions,
    cancel: &AtomicBool,
) -> Result<()> {
    if let Some(name) = only {
        if config.aggregator(name).is_none() {
            bail!(
                "Unknown aggregator: '{}'. Available: {}",
                name,
                config.aggregator_names().join(", ")
            );
        }
    }

    let aggregators = build_aggregators(config, registries, only)?;
    let mut failed = Vec::new();

    for aggregator in &aggregators {
        if cancel.load(Ordering::SeqCst) {
            break;
        }
        let report = aggregator.run_with(options, cancel).await;
        print_report(&report, options);
        match report.check() {
            Ok(()) => println!("ok"),
            Err(e) => {
                println!("failed");
                failed.push(e.to_string());
            }
        }
    }

    if !failed.is_empty() {
        bail!("{}", failed.join("; "));
    }
    if cancel.load(Ordering::SeqCst) {
        bail!("interrupted");
    }
    Ok(())
}

/// React to interrupts while a run is in progress.
///
/// `interrupt` resolves to `true` each time an interrupt arrives. The first
/// one sets `cancel`, letting the current source finish. The second calls
/// `abort`; watermarks only move after a completed pass, so nothing is lost
/// beyond the in-flight pass.
pub async fn handle_interrupts<F, Fut>(
    mut interrupt: F,
    cancel: Arc<AtomicBool>,
    abort: impl FnOnce(),
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if !interrupt().await {
        return;
    }
    warn!("interrupt received, finishing current source (interrupt again to abort)");
    cancel.store(true, Ordering::SeqCst);

    if interrupt().await {
        warn!("second interrupt, aborting");
        abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use tempfile::TempDir;

    fn config_for(dir: &TempDir, archive: &str) -> Config {
        let archive_path = dir.path().join("archive.jsonl");
        std::fs::write(&archive_path, archive).unwrap();
        parse_config(&format!(
            r#"
[sources.archive]
type = "jsonl"
path = "{}"

[aggregators.site]
type = "posts"
output_dir = "{}"
query = {{ type = "and", keywords = ["acme"] }}
"#,
            archive_path.display(),
            dir.path().join("posts").display()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_aggregator_fails() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(&tmp, "");
        let err = run_harvest(
            &config,
            &Registries::builtin(),
            Some("nope"),
            RunOptions::default(),
            &AtomicBool::new(false),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("site"));
    }

    #[tokio::test]
    async fn test_run_writes_posts_and_checkpoint() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(
            &tmp,
            r#"{"date": "2024-01-02T10:00:00Z", "body": "acme news"}"#,
        );
        run_harvest(
            &config,
            &Registries::builtin(),
            None,
            RunOptions::default(),
            &AtomicBool::new(false),
        )
        .await
        .unwrap();

        let posts: Vec<_> = std::fs::read_dir(tmp.path().join("posts"))
            .unwrap()
            .flatten()
            .filter(|e| e.path().extension().map_or(false, |x| x == "md"))
            .collect();
        assert_eq!(posts.len(), 1);
        assert!(tmp.path().join("posts/.checkpoints.json").exists());
    }

    #[tokio::test]
    async fn test_all_sources_failing_fails_run() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(&tmp, "");
        std::fs::remove_file(tmp.path().join("archive.jsonl")).unwrap();
        let result = run_harvest(
            &config,
            &Registries::builtin(),
            None,
            RunOptions::default(),
            &AtomicBool::new(false),
        )
        .await;
        assert!(result.is_err());
    }

    fn interrupts(count: usize) -> impl FnMut() -> std::future::Ready<bool> {
        let mut delivered = 0;
        move || {
            delivered += 1;
            std::future::ready(delivered <= count)
        }
    }

    #[tokio::test]
    async fn test_first_interrupt_only_cancels() {
        let cancel = Arc::new(AtomicBool::new(false));
        let aborted = AtomicBool::new(false);
        handle_interrupts(interrupts(1), cancel.clone(), || {
            aborted.store(true, Ordering::SeqCst)
        })
        .await;
        assert!(cancel.load(Ordering::SeqCst));
        assert!(!aborted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_second_interrupt_aborts() {
        let cancel = Arc::new(AtomicBool::new(false));
        let aborted = AtomicBool::new(false);
        handle_interrupts(interrupts(2), cancel.clone(), || {
            aborted.store(true, Ordering::SeqCst)
        })
        .await;
        assert!(cancel.load(Ordering::SeqCst));
        assert!(aborted.load(Ordering::SeqCst));
    }
}
