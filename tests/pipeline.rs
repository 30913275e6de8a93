//! End-to-end aggregator behavior with the real file-backed stores.

use chrono::{DateTime, TimeZone, Utc};
use coverage_harvester::aggregator::Aggregator;
use coverage_harvester::checkpoint::{CheckpointStore, FileCheckpointStore, SqliteCheckpointStore};
use coverage_harvester::error::{ConversionError, FetchError, QueryError};
use coverage_harvester::models::{Entry, Query, QueryKind};
use coverage_harvester::traits::{EntrySource, Source};
use coverage_harvester::writer::PostWriter;
use futures::stream::{self, BoxStream, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap()
}

/// Yields entries for `days`, then optionally never finishes.
struct Scripted {
    name: &'static str,
    days: Vec<u32>,
    hang_after: Option<usize>,
    and_only: bool,
}

impl Scripted {
    fn new(name: &'static str, days: Vec<u32>) -> Self {
        Self {
            name,
            days,
            hang_after: None,
            and_only: false,
        }
    }
}

impl Source for Scripted {
    type Native = u32;

    fn name(&self) -> &str {
        self.name
    }

    fn source_type(&self) -> &str {
        "scripted"
    }

    fn convert_query(&self, query: &Query) -> Result<String, QueryError> {
        if self.and_only && query.kind() == QueryKind::Or {
            return Err(QueryError::UnsupportedQueryKind {
                source_id: self.source_id(),
                kind: query.kind(),
            });
        }
        Ok(query.keywords().join(" "))
    }

    fn get_query_results(
        &self,
        _native_query: String,
        watermark: Option<DateTime<Utc>>,
    ) -> BoxStream<'_, Result<u32, FetchError>> {
        let days: Vec<Result<u32, FetchError>> = self
            .days
            .iter()
            .copied()
            .filter(|d| watermark.map_or(true, |w| day(*d) > w))
            .map(Ok)
            .collect();
        match self.hang_after {
            Some(n) => stream::iter(days.into_iter().take(n))
                .chain(stream::pending())
                .boxed(),
            None => stream::iter(days).boxed(),
        }
    }

    fn result_to_entry(&self, d: u32) -> Result<Entry, ConversionError> {
        let mut entry = Entry::new(self.source_id(), day(d), format!("story {}", d));
        entry.actor_primary = Some("wire".into());
        Ok(entry)
    }
}

fn shared(source: Scripted) -> Arc<dyn EntrySource> {
    Arc::new(source)
}

fn file_aggregator(root: &Path, sources: Vec<Arc<dyn EntrySource>>, query: Query) -> Aggregator {
    let known = sources.iter().map(|s| s.source_id()).collect();
    Aggregator::new(
        "site",
        sources,
        query,
        Box::new(FileCheckpointStore::new(root.join("last_dates.json"), known)),
        Box::new(PostWriter::new(root.join("posts"))),
    )
}

fn post_count(root: &Path) -> usize {
    std::fs::read_dir(root.join("posts"))
        .map(|d| {
            d.flatten()
                .filter(|e| e.path().extension().map_or(false, |x| x == "md"))
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn test_interrupted_pass_recovers_without_duplicates() {
    let tmp = TempDir::new().unwrap();
    let query = Query::and(["acme"]).unwrap();

    let mut hanging = Scripted::new("wire", vec![1, 2, 3]);
    hanging.hang_after = Some(1);
    let agg = file_aggregator(tmp.path(), vec![shared(hanging)], query.clone());

    let interrupted = tokio::time::timeout(Duration::from_millis(300), agg.run()).await;
    assert!(interrupted.is_err(), "pass should still be waiting");
    drop(agg);

    assert_eq!(post_count(tmp.path()), 1);
    let store = FileCheckpointStore::new(tmp.path().join("last_dates.json"), vec![]);
    assert_eq!(store.get_watermark("scripted:wire").await.unwrap(), None);

    let agg = file_aggregator(
        tmp.path(),
        vec![shared(Scripted::new("wire", vec![1, 2, 3]))],
        query,
    );
    let report = agg.run().await;
    let stats = report.passes[0].outcome.as_ref().unwrap();
    assert_eq!(stats.fetched, 3);
    assert_eq!(stats.written, 2);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(post_count(tmp.path()), 3);
    assert_eq!(
        store.get_watermark("scripted:wire").await.unwrap(),
        Some(day(3))
    );
}

#[tokio::test]
async fn test_unsupported_query_does_not_block_other_sources() {
    let tmp = TempDir::new().unwrap();
    let mut strict = Scripted::new("strict", vec![1, 2]);
    strict.and_only = true;
    let relaxed = Scripted::new("relaxed", vec![4, 5]);

    let agg = file_aggregator(
        tmp.path(),
        vec![shared(strict), shared(relaxed)],
        Query::or(["acme", "launch"]).unwrap(),
    );
    let report = agg.run().await;

    assert_eq!(report.passes.len(), 2);
    let err = report.passes[0].outcome.as_ref().unwrap_err();
    assert_eq!(err.kind(), "unsupported_query_kind");
    assert_eq!(report.passes[1].outcome.as_ref().unwrap().written, 2);
    assert!(report.check().is_ok());

    let watermarks = agg.checkpoints().watermarks().await.unwrap();
    assert_eq!(watermarks["scripted:strict"], None);
    assert_eq!(watermarks["scripted:relaxed"], Some(day(5)));
}

#[tokio::test]
async fn test_every_source_failing_fails_the_run() {
    let tmp = TempDir::new().unwrap();
    let mut a = Scripted::new("a", vec![1]);
    a.and_only = true;
    let mut b = Scripted::new("b", vec![2]);
    b.and_only = true;

    let agg = file_aggregator(
        tmp.path(),
        vec![shared(a), shared(b)],
        Query::or(["acme"]).unwrap(),
    );
    let report = agg.run().await;
    assert_eq!(report.failures().count(), 2);
    assert!(report.check().is_err());
}

#[tokio::test]
async fn test_sqlite_checkpoints_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("data/checkpoints.sqlite");
    let source = shared(Scripted::new("wire", vec![1, 7, 3]));

    let store = SqliteCheckpointStore::new(&db_path, vec![source.source_id()]);
    let agg = Aggregator::new(
        "site",
        vec![source.clone()],
        Query::and(["acme"]).unwrap(),
        Box::new(store),
        Box::new(PostWriter::new(tmp.path().join("posts"))),
    );
    agg.run().await;
    drop(agg);

    let reopened = SqliteCheckpointStore::new(&db_path, vec![]);
    assert_eq!(
        reopened.get_watermark("scripted:wire").await.unwrap(),
        Some(day(7))
    );
    reopened.close().await;
}
