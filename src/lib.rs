//! # Coverage Harvester
//!
//! Incrementally collects "coverage" (news articles, forum posts, archived
//! records) matching a keyword query from several sources, and persists each
//! item exactly once as a Markdown post.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │   Sources    │──▶│ Aggregator  │──▶│  PostWriter   │
//! │ news/reddit/ │   │ per-source  │   │ content-addr. │
//! │ jsonl        │   │   passes    │   │  .md files   │
//! └──────────────┘   └──────┬──────┘   └──────────────┘
//!                           │
//!                           ▼
//!                    ┌──────────────┐
//!                    │ Checkpoints  │
//!                    │ file/sqlite  │
//!                    └──────────────┘
//! ```
//!
//! Every source remembers a watermark: the date of the newest entry already
//! written. Each run asks a source only for entries strictly newer than that
//! and advances the watermark once the pass has been fully persisted.
//!
//! ## Quick Start
//!
//! ```bash
//! harvest run                      # run every aggregator once
//! harvest run --aggregator site    # just one
//! harvest run --full --dry-run     # ignore watermarks, write nothing
//! harvest sources                  # sources and their watermarks
//! harvest checkpoint show
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | `Entry` and `Query` |
//! | [`traits`] | `Source` contract and pagination helper |
//! | [`source_newsapi`] | NewsAPI source |
//! | [`source_reddit`] | Reddit search source |
//! | [`source_jsonl`] | JSON Lines file source |
//! | [`checkpoint`] | Watermark stores |
//! | [`writer`] | Idempotent post writer |
//! | [`aggregator`] | Fetch → persist → advance loop |
//! | [`registry`] | Type name → constructor maps |
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`db`] | SQLite connection |

pub mod aggregator;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod error;
mod http;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod registry;
pub mod source_jsonl;
pub mod source_newsapi;
pub mod source_reddit;
pub mod sources;
pub mod traits;
pub mod writer;
