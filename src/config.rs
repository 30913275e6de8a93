//! Configuration loading.
//!
//! The file has two top-level tables. `[sources.<name>]` declares source
//! instances and `[aggregators.<name>]` declares aggregators, each with a
//! nested `query` table. Every component carries a `type` key naming the
//! registered implementation; all other keys are handed to that
//! implementation's factory unchanged.
//!
//! ```toml
//! [sources.press]
//! type = "newsapi"
//! api_key_env = "NEWSAPI_KEY"
//!
//! [aggregators.site]
//! type = "posts"
//! output_dir = "./_posts/coverage"
//! sources = ["press"]
//!
//! [aggregators.site.query]
//! type = "and"
//! keywords = ["acme", "launch"]
//! ```
//!
//! Table order is preserved, so sources run in the order they are written.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    sources: toml::Table,
    #[serde(default)]
    aggregators: toml::Table,
}

/// A named component: its registered `type` plus the remaining keys.
#[derive(Debug, Clone)]
pub struct ComponentConfig {
    pub name: String,
    pub kind: String,
    pub props: toml::Table,
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub name: String,
    pub kind: String,
    /// Source names in run order. Defaults to every configured source.
    pub sources: Vec<String>,
    pub query: ComponentConfig,
    pub props: toml::Table,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sources: Vec<ComponentConfig>,
    pub aggregators: Vec<AggregatorConfig>,
}

impl Config {
    pub fn source(&self, name: &str) -> Option<&ComponentConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn aggregator(&self, name: &str) -> Option<&AggregatorConfig> {
        self.aggregators.iter().find(|a| a.name == name)
    }

    pub fn aggregator_names(&self) -> Vec<&str> {
        self.aggregators.iter().map(|a| a.name.as_str()).collect()
    }
}

fn take_table(value: toml::Value, what: &str) -> Result<toml::Table> {
    match value {
        toml::Value::Table(t) => Ok(t),
        other => bail!("{} must be a table, found {}", what, other.type_str()),
    }
}

fn component(name: &str, mut props: toml::Table, what: &str) -> Result<ComponentConfig> {
    let kind = match props.remove("type") {
        Some(toml::Value::String(s)) if !s.is_empty() => s,
        Some(other) => bail!("{}.type must be a non-empty string, found {}", what, other.type_str()),
        None => bail!("{} is missing required key 'type'", what),
    };
    Ok(ComponentConfig {
        name: name.to_string(),
        kind,
        props,
    })
}

fn aggregator(name: &str, value: toml::Value, all_sources: &[String]) -> Result<AggregatorConfig> {
    let what = format!("aggregators.{}", name);
    let mut props = take_table(value, &what)?;

    let query = match props.remove("query") {
        Some(q) => {
            let q_what = format!("{}.query", what);
            component(name, take_table(q, &q_what)?, &q_what)?
        }
        None => bail!("{} is missing required table 'query'", what),
    };

    let sources = match props.remove("sources") {
        Some(v) => v
            .try_into::<Vec<String>>()
            .with_context(|| format!("{}.sources must be a list of source names", what))?,
        None => all_sources.to_vec(),
    };
    if sources.is_empty() {
        bail!("{} has no sources", what);
    }
    for s in &sources {
        if !all_sources.contains(s) {
            bail!(
                "{} references unknown source '{}'. Defined: {}",
                what,
                s,
                all_sources.join(", ")
            );
        }
    }

    let ComponentConfig { kind, props, .. } = component(name, props, &what)?;
    Ok(AggregatorConfig {
        name: name.to_string(),
        kind,
        sources,
        query,
        props,
    })
}

pub fn parse_config(content: &str) -> Result<Config> {
    let raw: RawConfig = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    let mut sources = Vec::with_capacity(raw.sources.len());
    for (name, value) in raw.sources {
        let what = format!("sources.{}", name);
        let props = take_table(value, &what)?;
        sources.push(component(&name, props, &what)?);
    }
    let names: Vec<String> = sources.iter().map(|s| s.name.clone()).collect();

    if raw.aggregators.is_empty() {
        bail!("at least one [aggregators.<name>] table is required");
    }
    let mut aggregators = Vec::with_capacity(raw.aggregators.len());
    for (name, value) in raw.aggregators {
        aggregators.push(aggregator(&name, value, &names)?);
    }

    Ok(Config {
        sources,
        aggregators,
    })
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config: {}", path.display()))
}
