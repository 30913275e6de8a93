//! JSON Lines source.
//!
//! Reads coverage records from a local `.jsonl` file, one JSON object per
//! line. Useful for offline imports and for exercising aggregators without
//! network access.
//!
//! ```toml
//! [sources.archive]
//! type = "jsonl"
//! path = "./data/archive.jsonl"
//! ```
//!
//! Each line looks like:
//!
//! ```json
//! {"date": "2024-01-02T10:00:00Z", "actor_primary": "Example Times", "title": "Acme ships", "body": "..."}
//! ```
//!
//! Both query kinds are supported. A record matches when its title or body
//! contains all (AND) or any (OR) of the keywords, ignoring case. The file
//! has no ordering guarantee, so every line is scanned and filtered against
//! the watermark individually.

use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use crate::error::{ConversionError, FetchError, QueryError};
use crate::models::{Entry, Query, QueryKind};
use crate::traits::{source_label, Source};

#[derive(Debug, Clone, Deserialize)]
pub struct JsonlConfig {
    pub path: PathBuf,
}

/// One line of the input file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct JsonlRecord {
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actor_primary: Option<String>,
    #[serde(default)]
    pub actor_secondary: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub actor_logo_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Native result: a parsed line, or a line that could not be parsed.
#[derive(Debug)]
pub enum JsonlResult {
    Record { line: usize, record: JsonlRecord },
    Malformed { line: usize, error: String },
}

/// Native query form, serialized to JSON so it round-trips exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NativeQuery {
    op: QueryKind,
    keywords: Vec<String>,
}

impl NativeQuery {
    fn lowercased(mut self) -> Self {
        for k in &mut self.keywords {
            *k = k.to_lowercase();
        }
        self
    }

    fn matches(&self, record: &JsonlRecord) -> bool {
        let haystack = format!(
            "{}\n{}",
            record.title.as_deref().unwrap_or_default(),
            record.body.as_deref().unwrap_or_default()
        )
        .to_lowercase();
        let mut hits = self.keywords.iter().map(|k| haystack.contains(k.as_str()));
        match self.op {
            QueryKind::And => hits.all(|hit| hit),
            QueryKind::Or => hits.any(|hit| hit),
        }
    }
}

enum Phase {
    Pending(PathBuf),
    Reading(Lines<BufReader<File>>, usize),
}

struct Scan {
    query: NativeQuery,
    watermark: Option<DateTime<Utc>>,
    phase: Phase,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub struct JsonlSource {
    name: String,
    label: String,
    config: JsonlConfig,
}

impl JsonlSource {
    pub fn new(name: impl Into<String>, config: JsonlConfig) -> Self {
        let name = name.into();
        Self {
            label: source_label("jsonl", &name),
            name,
            config,
        }
    }

    async fn next_result(mut scan: Scan) -> Result<Option<(JsonlResult, Scan)>, FetchError> {
        let (mut lines, mut n) = match scan.phase {
            Phase::Pending(path) => {
                let file = File::open(&path).await.map_err(|e| {
                    FetchError::fetch(format!("cannot open {}: {}", path.display(), e))
                        .with_source(e)
                })?;
                (BufReader::new(file).lines(), 0)
            }
            Phase::Reading(lines, n) => (lines, n),
        };

        loop {
            let line = lines.next_line().await.map_err(|e| {
                FetchError::fetch(format!("read failed after line {}: {}", n, e)).with_source(e)
            })?;
            let Some(line) = line else {
                return Ok(None);
            };
            n += 1;
            if line.trim().is_empty() {
                continue;
            }

            let result = match serde_json::from_str::<JsonlRecord>(&line) {
                Err(e) => JsonlResult::Malformed {
                    line: n,
                    error: e.to_string(),
                },
                Ok(record) => {
                    if !scan.query.matches(&record) {
                        continue;
                    }
                    if let (Some(w), Some(date)) = (scan.watermark, record.date) {
                        if date <= w {
                            continue;
                        }
                    }
                    JsonlResult::Record { line: n, record }
                }
            };
            scan.phase = Phase::Reading(lines, n);
            return Ok(Some((result, scan)));
        }
    }
}

impl Source for JsonlSource {
    type Native = JsonlResult;

    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> &str {
        "jsonl"
    }

    fn convert_query(&self, query: &Query) -> Result<String, QueryError> {
        let native = NativeQuery {
            op: query.kind(),
            keywords: query.keywords().to_vec(),
        };
        // Serializing a string list cannot fail.
        Ok(serde_json::to_string(&native).unwrap_or_default())
    }

    fn get_query_results(
        &self,
        native_query: String,
        watermark: Option<DateTime<Utc>>,
    ) -> BoxStream<'_, Result<JsonlResult, FetchError>> {
        let query = match serde_json::from_str::<NativeQuery>(&native_query) {
            Ok(q) => q.lowercased(),
            Err(e) => {
                let err = FetchError::fetch(format!("invalid native query: {}", e)).with_source(e);
                return stream::once(future::ready(Err(err))).boxed();
            }
        };
        let scan = Scan {
            query,
            watermark,
            phase: Phase::Pending(self.config.path.clone()),
        };
        stream::try_unfold(scan, Self::next_result).boxed()
    }

    fn result_to_entry(&self, result: JsonlResult) -> Result<Entry, ConversionError> {
        let (line, record) = match result {
            JsonlResult::Record { line, record } => (line, record),
            JsonlResult::Malformed { line, error } => {
                return Err(ConversionError::new(format!("line {}: {}", line, error)));
            }
        };
        let date = record
            .date
            .ok_or_else(|| ConversionError::new(format!("line {}: missing field 'date'", line)))?;
        let title = non_empty(record.title);
        let body = non_empty(record.body)
            .or_else(|| title.clone())
            .ok_or_else(|| ConversionError::new(format!("line {}: missing field 'body'", line)))?;

        Ok(Entry {
            source_id: self.label.clone(),
            actor_primary: record.actor_primary,
            actor_secondary: record.actor_secondary,
            date,
            body,
            score: record.score,
            country: record.country,
            actor_logo_url: record.actor_logo_url,
            url: record.url,
            title,
            image_url: record.image_url,
        })
    }
}
