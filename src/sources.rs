//! `harvest sources` and `harvest checkpoint show`.
//!
//! Both only read watermarks: checkpoint stores are opened through
//! [`Registries::open_checkpoints`] and no source is constructed, so API keys
//! need not be set. A file or SQLite store that does not exist yet is still
//! created on first read, with every known source unobserved.

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::ingest::format_watermark;
use crate::registry::Registries;
use crate::traits::source_label;

/// One row per configured source and aggregator using it, with the
/// watermark that aggregator has recorded.
pub async fn list_sources(config: &Config, registries: &Registries) -> Result<()> {
    let mut stores = Vec::with_capacity(config.aggregators.len());
    for agg in &config.aggregators {
        stores.push((agg, registries.open_checkpoints(config, agg)?));
    }

    println!(
        "{:<24} {:<10} {:<16} WATERMARK",
        "SOURCE", "TYPE", "AGGREGATOR"
    );
    for source in &config.sources {
        let label = source_label(&source.kind, &source.name);
        let mut used = false;
        for (agg, store) in &stores {
            if !agg.sources.contains(&source.name) {
                continue;
            }
            used = true;
            let watermark = store
                .get_watermark(&label)
                .await
                .with_context(|| format!("Failed to read checkpoints of '{}'", agg.name))?;
            println!(
                "{:<24} {:<10} {:<16} {}",
                label,
                source.kind,
                agg.name,
                format_watermark(watermark)
            );
        }
        if !used {
            println!("{:<24} {:<10} {:<16} -", label, source.kind, "-");
        }
    }

    Ok(())
}

/// Dump every stored watermark, per aggregator.
pub async fn show_checkpoints(
    config: &Config,
    registries: &Registries,
    only: Option<&str>,
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

    for agg in &config.aggregators {
        if only.map_or(false, |name| name != agg.name) {
            continue;
        }
        let watermarks = registries
            .open_checkpoints(config, agg)?
            .watermarks()
            .await
            .with_context(|| format!("Failed to read checkpoints of '{}'", agg.name))?;
        println!("checkpoints {}", agg.name);
        for (source, watermark) in watermarks {
            println!("  {}: {}", source, format_watermark(watermark));
        }
    }

    Ok(())
}
