//! Registries mapping configured `type` names to constructors.
//!
//! There are four: sources, queries, aggregators, and checkpoints. Each is a plain map
//! from type name to factory function, populated explicitly at startup by
//! [`Registries::builtin`]. New implementations are added with
//! [`Registry::register`]; nothing is discovered implicitly.
//!
//! | Registry | Built-in types |
//! |----------|----------------|
//! | sources | `newsapi`, `reddit`, `jsonl` |
//! | queries | `and`, `or` |
//! | aggregators | `posts` |
//! | checkpoints | `posts` (keyed by aggregator type) |
//!
//! The checkpoints registry opens an aggregator's store without building its
//! sources, for commands that only read watermarks.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::aggregator::Aggregator;
use crate::checkpoint::{
    CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore,
};
use crate::config::{AggregatorConfig, ComponentConfig, Config};
use crate::models::Query;
use crate::source_jsonl::{JsonlConfig, JsonlSource};
use crate::source_newsapi::{NewsApiConfig, NewsApiSource};
use crate::source_reddit::{RedditConfig, RedditSource};
use crate::traits::{source_label, EntrySource};
use crate::writer::PostWriter;

pub type SourceFactory = fn(&str, &toml::Table) -> Result<Arc<dyn EntrySource>>;
pub type QueryFactory = fn(&toml::Table) -> Result<Query>;
pub type AggregatorFactory =
    fn(&AggregatorConfig, Vec<Arc<dyn EntrySource>>, Query) -> Result<Aggregator>;
pub type CheckpointFactory = fn(&AggregatorConfig, Vec<String>) -> Result<Box<dyn CheckpointStore>>;

/// Decode a component's keys into its typed config.
pub fn decode<T: DeserializeOwned>(props: &toml::Table) -> Result<T> {
    Ok(toml::Value::Table(props.clone()).try_into::<T>()?)
}

/// Type name → factory map for one kind of component.
pub struct Registry<F> {
    what: &'static str,
    factories: BTreeMap<String, F>,
}

impl<F: Copy> Registry<F> {
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            factories: BTreeMap::new(),
        }
    }

    /// Add or replace the factory for `kind`.
    pub fn register(&mut self, kind: &str, factory: F) -> &mut Self {
        self.factories.insert(kind.to_string(), factory);
        self
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn get(&self, kind: &str) -> Result<F> {
        match self.factories.get(kind) {
            Some(f) => Ok(*f),
            None => bail!(
                "Unknown {} type: '{}'. Available: {}",
                self.what,
                kind,
                self.kinds().join(", ")
            ),
        }
    }
}

pub struct Registries {
    pub sources: Registry<SourceFactory>,
    pub queries: Registry<QueryFactory>,
    pub aggregators: Registry<AggregatorFactory>,
    pub checkpoints: Registry<CheckpointFactory>,
}

impl Registries {
    /// Registries with every built-in implementation.
    pub fn builtin() -> Self {
        let mut sources = Registry::<SourceFactory>::new("source");
        sources
            .register("newsapi", build_newsapi)
            .register("reddit", build_reddit)
            .register("jsonl", build_jsonl);

        let mut queries = Registry::<QueryFactory>::new("query");
        queries.register("and", build_and).register("or", build_or);

        let mut aggregators = Registry::<AggregatorFactory>::new("aggregator");
        aggregators.register("posts", build_posts);

        let mut checkpoints = Registry::<CheckpointFactory>::new("aggregator");
        checkpoints.register("posts", open_posts_checkpoints);

        Self {
            sources,
            queries,
            aggregators,
            checkpoints,
        }
    }

    pub fn build_source(&self, config: &ComponentConfig) -> Result<Arc<dyn EntrySource>> {
        let factory = self.sources.get(&config.kind)?;
        factory(&config.name, &config.props)
            .with_context(|| format!("Failed to build source '{}'", config.name))
    }

    pub fn build_query(&self, config: &ComponentConfig) -> Result<Query> {
        let factory = self.queries.get(&config.kind)?;
        factory(&config.props).with_context(|| format!("Invalid query for '{}'", config.name))
    }

    /// Open an aggregator's checkpoint store. Sources are only named, never
    /// constructed, so missing credentials do not matter here.
    pub fn open_checkpoints(
        &self,
        config: &Config,
        aggregator: &AggregatorConfig,
    ) -> Result<Box<dyn CheckpointStore>> {
        let known = aggregator
            .sources
            .iter()
            .filter_map(|name| config.source(name))
            .map(|s| source_label(&s.kind, &s.name))
            .collect();
        let factory = self.checkpoints.get(&aggregator.kind)?;
        factory(aggregator, known)
            .with_context(|| format!("Failed to open checkpoints of '{}'", aggregator.name))
    }
}

/// Build the configured aggregators, or only `only` when given. Each source
/// is constructed once and shared by every aggregator that lists it.
pub fn build_aggregators(
    config: &Config,
    registries: &Registries,
    only: Option<&str>,
) -> Result<Vec<Aggregator>> {
    let mut built: BTreeMap<&str, Arc<dyn EntrySource>> = BTreeMap::new();
    let mut aggregators = Vec::new();

    for agg in &config.aggregators {
        if only.map_or(false, |name| name != agg.name) {
            continue;
        }

        let mut sources = Vec::with_capacity(agg.sources.len());
        for name in &agg.sources {
            if let Some(existing) = built.get(name.as_str()) {
                sources.push(existing.clone());
                continue;
            }
            let Some(source_config) = config.source(name) else {
                bail!("aggregator '{}' references unknown source '{}'", agg.name, name);
            };
            let source = registries.build_source(source_config)?;
            built.insert(source_config.name.as_str(), source.clone());
            sources.push(source);
        }

        let query = registries.build_query(&agg.query)?;
        let factory = registries.aggregators.get(&agg.kind)?;
        let aggregator = factory(agg, sources, query)
            .with_context(|| format!("Failed to build aggregator '{}'", agg.name))?;
        aggregators.push(aggregator);
    }

    Ok(aggregators)
}

// ═══════════════════════════════════════════════════════════════════════
// Sources
// ═══════════════════════════════════════════════════════════════════════

fn build_newsapi(name: &str, props: &toml::Table) -> Result<Arc<dyn EntrySource>> {
    let config: NewsApiConfig = decode(props)?;
    Ok(Arc::new(NewsApiSource::new(name, config)?))
}

fn build_reddit(name: &str, props: &toml::Table) -> Result<Arc<dyn EntrySource>> {
    let config: RedditConfig = decode(props)?;
    Ok(Arc::new(RedditSource::new(name, config)?))
}

fn build_jsonl(name: &str, props: &toml::Table) -> Result<Arc<dyn EntrySource>> {
    let config: JsonlConfig = decode(props)?;
    Ok(Arc::new(JsonlSource::new(name, config)))
}

// ═══════════════════════════════════════════════════════════════════════
// Queries
// ═══════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct KeywordsConfig {
    keywords: Vec<String>,
}

fn build_and(props: &toml::Table) -> Result<Query> {
    let config: KeywordsConfig = decode(props)?;
    Ok(Query::and(config.keywords)?)
}

fn build_or(props: &toml::Table) -> Result<Query> {
    let config: KeywordsConfig = decode(props)?;
    Ok(Query::or(config.keywords)?)
}

// ═══════════════════════════════════════════════════════════════════════
// Aggregators
// ═══════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct PostsConfig {
    output_dir: PathBuf,
    #[serde(default)]
    checkpoint: Option<CheckpointConfig>,
}

/// `checkpoint = { backend = "...", path = "..." }`
#[derive(Debug, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
enum CheckpointConfig {
    File {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    Sqlite {
        path: PathBuf,
    },
    Memory,
}

const DEFAULT_CHECKPOINT_FILE: &str = ".checkpoints.json";

fn build_checkpoints(
    config: Option<CheckpointConfig>,
    output_dir: &std::path::Path,
    known: Vec<String>,
) -> Box<dyn CheckpointStore> {
    match config {
        None | Some(CheckpointConfig::File { path: None }) => Box::new(FileCheckpointStore::new(
            output_dir.join(DEFAULT_CHECKPOINT_FILE),
            known,
        )),
        Some(CheckpointConfig::File { path: Some(path) }) => {
            Box::new(FileCheckpointStore::new(path, known))
        }
        Some(CheckpointConfig::Sqlite { path }) => {
            Box::new(SqliteCheckpointStore::new(path, known))
        }
        Some(CheckpointConfig::Memory) => Box::new(MemoryCheckpointStore::new(known)),
    }
}

fn open_posts_checkpoints(
    config: &AggregatorConfig,
    known: Vec<String>,
) -> Result<Box<dyn CheckpointStore>> {
    let posts: PostsConfig = decode(&config.props)?;
    Ok(build_checkpoints(posts.checkpoint, &posts.output_dir, known))
}

fn build_posts(
    config: &AggregatorConfig,
    sources: Vec<Arc<dyn EntrySource>>,
    query: Query,
) -> Result<Aggregator> {
    let posts: PostsConfig = decode(&config.props)?;
    let known = sources.iter().map(|s| s.source_id()).collect();
    let checkpoints = build_checkpoints(posts.checkpoint, &posts.output_dir, known);
    let writer = PostWriter::new(posts.output_dir);
    Ok(Aggregator::new(
        config.name.clone(),
        sources,
        query,
        checkpoints,
        Box::new(writer),
    ))
}
