//! Per-source watermark storage.
//!
//! A watermark is the date of the newest entry already durably written for a
//! source. Stores only ever move a watermark forward: `set_watermark` keeps
//! the maximum of the stored and the offered value, so a stale or replayed
//! update can never regress it.
//!
//! | Backend | Medium | Update |
//! |---------|--------|--------|
//! | [`FileCheckpointStore`] | JSON map `{label: rfc3339 \| null}` | temp file + rename |
//! | [`SqliteCheckpointStore`] | `checkpoints` table | single conditional upsert |
//! | [`MemoryCheckpointStore`] | process memory | mutex |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::db;
use crate::error::CheckpointError;

pub type Watermarks = BTreeMap<String, Option<DateTime<Utc>>>;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Stored watermark for `source_id`, `None` if never observed.
    ///
    /// The first access to a brand-new store initializes it with every known
    /// source mapped to unknown.
    async fn get_watermark(&self, source_id: &str) -> Result<Option<DateTime<Utc>>, CheckpointError>;

    /// Advance the watermark to `max(stored, timestamp)`.
    async fn set_watermark(&self, source_id: &str, timestamp: DateTime<Utc>) -> Result<(), CheckpointError>;

    /// All stored watermarks, keyed by source identity.
    async fn watermarks(&self) -> Result<Watermarks, CheckpointError>;
}

/// Returns the value to store, or `None` when `offered` would not move the
/// watermark forward.
fn advance(
    source_id: &str,
    stored: Option<DateTime<Utc>>,
    offered: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match stored {
        Some(current) if offered < current => {
            warn!(
                source = source_id,
                stored = %current,
                offered = %offered,
                "ignoring watermark regression"
            );
            None
        }
        Some(current) if offered == current => None,
        _ => Some(offered),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// JSON file
// ═══════════════════════════════════════════════════════════════════════

/// Watermarks kept in a single JSON file.
///
/// Every update rewrites the whole map into a temporary file in the same
/// directory and renames it over the old one, so readers see either the old
/// or the new map, never a partial one.
pub struct FileCheckpointStore {
    path: PathBuf,
    known_sources: Vec<String>,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>, known_sources: Vec<String>) -> Self {
        Self {
            path: path.into(),
            known_sources,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn initial_map(&self) -> Watermarks {
        self.known_sources
            .iter()
            .map(|s| (s.clone(), None))
            .collect()
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Load the map, creating the file with all known sources on first use.
    fn load_or_init(&self) -> Result<Watermarks, CheckpointError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| CheckpointError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let map = self.initial_map();
                self.write_atomic(&map, false)?;
                debug!(path = %self.path.display(), "initialized checkpoint file");
                Ok(map)
            }
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Replace the file atomically. With `overwrite == false` an existing file
    /// wins, which keeps concurrent first-time initialization harmless.
    fn write_atomic(&self, map: &Watermarks, overwrite: bool) -> Result<(), CheckpointError> {
        let dir = self.parent_dir();
        std::fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let json = serde_json::to_string_pretty(map).map_err(|source| CheckpointError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| self.io_error(e))?;

        let persisted = if overwrite {
            tmp.persist(&self.path).map(|_| ())
        } else {
            tmp.persist_noclobber(&self.path).map(|_| ())
        };
        match persisted {
            Ok(()) => Ok(()),
            Err(e) if !overwrite && e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(self.io_error(e.error)),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get_watermark(&self, source_id: &str) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        let map = self.load_or_init()?;
        Ok(map.get(source_id).copied().flatten())
    }

    async fn set_watermark(&self, source_id: &str, timestamp: DateTime<Utc>) -> Result<(), CheckpointError> {
        let mut map = self.load_or_init()?;
        let stored = map.get(source_id).copied().flatten();
        if let Some(next) = advance(source_id, stored, timestamp) {
            map.insert(source_id.to_string(), Some(next));
            self.write_atomic(&map, true)?;
        }
        Ok(())
    }

    async fn watermarks(&self) -> Result<Watermarks, CheckpointError> {
        self.load_or_init()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// SQLite
// ═══════════════════════════════════════════════════════════════════════

/// Watermarks kept in the `checkpoints` table of a SQLite database.
///
/// The database is opened on first use. Advancing is one conditional upsert,
/// so the max is taken inside SQLite rather than read-modify-write.
pub struct SqliteCheckpointStore {
    path: PathBuf,
    known_sources: Vec<String>,
    pool: OnceCell<SqlitePool>,
}

impl SqliteCheckpointStore {
    pub fn new(path: impl Into<PathBuf>, known_sources: Vec<String>) -> Self {
        Self {
            path: path.into(),
            known_sources,
            pool: OnceCell::new(),
        }
    }

    async fn pool(&self) -> Result<&SqlitePool, CheckpointError> {
        self.pool
            .get_or_try_init(|| async {
                let pool = db::connect(&self.path).await?;
                db::ensure_checkpoint_schema(&pool).await?;
                let now = Utc::now().timestamp();
                for source in &self.known_sources {
                    sqlx::query(
                        "INSERT OR IGNORE INTO checkpoints (source, cursor, updated_at) VALUES (?, NULL, ?)",
                    )
                    .bind(source)
                    .bind(now)
                    .execute(&pool)
                    .await?;
                }
                Ok::<_, CheckpointError>(pool)
            })
            .await
    }

    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

fn from_micros(source_id: &str, value: i64) -> Result<DateTime<Utc>, CheckpointError> {
    DateTime::from_timestamp_micros(value).ok_or_else(|| CheckpointError::InvalidTimestamp {
        source_id: source_id.to_string(),
        value,
    })
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn get_watermark(&self, source_id: &str) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        let pool = self.pool().await?;
        let cursor: Option<Option<i64>> =
            sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
                .bind(source_id)
                .fetch_optional(pool)
                .await?;

        cursor
            .flatten()
            .map(|v| from_micros(source_id, v))
            .transpose()
    }

    async fn set_watermark(&self, source_id: &str, timestamp: DateTime<Utc>) -> Result<(), CheckpointError> {
        let pool = self.pool().await?;
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
            WHERE checkpoints.cursor IS NULL OR excluded.cursor > checkpoints.cursor
            "#,
        )
        .bind(source_id)
        .bind(timestamp.timestamp_micros())
        .bind(now)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(source = source_id, offered = %timestamp, "watermark not advanced");
        }
        Ok(())
    }

    async fn watermarks(&self) -> Result<Watermarks, CheckpointError> {
        let pool = self.pool().await?;
        let rows: Vec<(String, Option<i64>)> =
            sqlx::query_as("SELECT source, cursor FROM checkpoints ORDER BY source")
                .fetch_all(pool)
                .await?;

        rows.into_iter()
            .map(|(source, cursor)| {
                let ts = cursor.map(|v| from_micros(&source, v)).transpose()?;
                Ok((source, ts))
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Memory
// ═══════════════════════════════════════════════════════════════════════

/// In-process store for tests and dry runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    map: Mutex<Watermarks>,
}

impl MemoryCheckpointStore {
    pub fn new(known_sources: Vec<String>) -> Self {
        Self {
            map: Mutex::new(known_sources.into_iter().map(|s| (s, None)).collect()),
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get_watermark(&self, source_id: &str) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        let map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(source_id).copied().flatten())
    }

    async fn set_watermark(&self, source_id: &str, timestamp: DateTime<Utc>) -> Result<(), CheckpointError> {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        let stored = map.get(source_id).copied().flatten();
        if let Some(next) = advance(source_id, stored, timestamp) {
            map.insert(source_id.to_string(), Some(next));
        }
        Ok(())
    }

    async fn watermarks(&self) -> Result<Watermarks, CheckpointError> {
        Ok(self.map.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}
