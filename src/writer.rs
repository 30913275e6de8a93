//! Idempotent, content-addressed entry persistence.
//!
//! Each entry is stored under `{YYYY-MM-DD}-{fingerprint}.md`, where the
//! fingerprint is a SHA-256 digest over the fields that stay the same when a
//! source redelivers the same logical entry:
//!
//! 1. `source_id`
//! 2. `actor_primary`
//! 3. `actor_secondary`
//! 4. `date`
//!
//! Score, logo, URL, title, image, country, and body are left out, so a
//! refetch with slightly different incidental metadata maps to the same key
//! and is skipped.
//!
//! Records are Markdown files with TOML front matter:
//!
//! ```text
//! +++
//! source_id = "reddit:all"
//! actor_primary = "someone"
//! date = "2024-01-02T10:00:00Z"
//! fingerprint = "9f86d08…"
//! +++
//! body text
//! ```

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::WriteError;
use crate::models::Entry;

/// Result of a write attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new record was published at this path.
    Written(PathBuf),
    /// A record with the same key already existed; nothing changed.
    Duplicate,
}

#[async_trait]
pub trait EntryWriter: Send + Sync {
    /// Persist `entry` unless a record with the same key exists.
    async fn write(&self, entry: &Entry) -> Result<WriteOutcome, WriteError>;

    /// Whether a record with `entry`'s key already exists.
    async fn contains(&self, entry: &Entry) -> Result<bool, WriteError>;
}

fn hash_field(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        // Absent and empty must hash differently.
        None => hasher.update([0u8]),
        Some(v) => {
            hasher.update([1u8]);
            hasher.update((v.len() as u64).to_le_bytes());
            hasher.update(v.as_bytes());
        }
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Lowercase hex SHA-256 over the redelivery-invariant fields.
pub fn fingerprint(entry: &Entry) -> String {
    let mut hasher = Sha256::new();
    hash_field(&mut hasher, Some(&entry.source_id));
    hash_field(&mut hasher, entry.actor_primary.as_deref());
    hash_field(&mut hasher, entry.actor_secondary.as_deref());
    hash_field(&mut hasher, Some(&format_date(&entry.date)));
    hex::encode(hasher.finalize())
}

/// Deterministic file name: calendar day (UTC) plus fingerprint.
pub fn storage_key(entry: &Entry) -> String {
    format!("{}-{}.md", entry.date.format("%Y-%m-%d"), fingerprint(entry))
}

#[derive(Serialize)]
struct FrontMatter<'a> {
    source_id: &'a str,
    date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    actor_primary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    actor_secondary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    actor_logo_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    country: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<i64>,
    fingerprint: String,
}

/// Render the full record: TOML front matter followed by the body.
pub fn render_post(entry: &Entry) -> Result<String, WriteError> {
    let front = FrontMatter {
        source_id: &entry.source_id,
        date: format_date(&entry.date),
        actor_primary: entry.actor_primary.as_deref(),
        actor_secondary: entry.actor_secondary.as_deref(),
        title: entry.title.as_deref(),
        url: entry.url.as_deref(),
        image_url: entry.image_url.as_deref(),
        actor_logo_url: entry.actor_logo_url.as_deref(),
        country: entry.country.as_deref(),
        score: entry.score,
        fingerprint: fingerprint(entry),
    };
    let toml = toml::to_string(&front)?;

    let mut out = String::with_capacity(toml.len() + entry.body.len() + 16);
    out.push_str("+++\n");
    out.push_str(&toml);
    out.push_str("+++\n");
    out.push_str(&entry.body);
    if !entry.body.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

/// Writes one Markdown post per entry into a directory.
///
/// Records are written to a hidden temporary file in the target directory and
/// published with a no-clobber rename, so a half-written post is never
/// visible and a concurrent writer that wins the race turns this write into a
/// [`WriteOutcome::Duplicate`].
pub struct PostWriter {
    output_dir: PathBuf,
}

impl PostWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn io_error(path: &Path, source: std::io::Error) -> WriteError {
        WriteError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
impl EntryWriter for PostWriter {
    async fn write(&self, entry: &Entry) -> Result<WriteOutcome, WriteError> {
        let path = self.output_dir.join(storage_key(entry));
        if path.exists() {
            debug!(path = %path.display(), "record already present");
            return Ok(WriteOutcome::Duplicate);
        }

        let rendered = render_post(entry)?;

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| Self::io_error(&self.output_dir, e))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".post-")
            .tempfile_in(&self.output_dir)
            .map_err(|e| Self::io_error(&self.output_dir, e))?;
        tmp.write_all(rendered.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| Self::io_error(tmp.path(), e))?;

        match tmp.persist_noclobber(&path) {
            Ok(_) => Ok(WriteOutcome::Written(path)),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "record published concurrently");
                Ok(WriteOutcome::Duplicate)
            }
            Err(e) => Err(Self::io_error(&path, e.error)),
        }
    }

    async fn contains(&self, entry: &Entry) -> Result<bool, WriteError> {
        Ok(self.output_dir.join(storage_key(entry)).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample() -> Entry {
        let mut e = Entry::new(
            "reddit:all",
            Utc.with_ymd_and_hms(2024, 1, 2, 10, 30, 0).unwrap(),
            "Launch day thread",
        );
        e.actor_primary = Some("alice".into());
        e.actor_secondary = Some("rust".into());
        e.score = Some(42);
        e.title = Some("Acme launches".into());
        e
    }

    #[test]
    fn test_fingerprint_ignores_volatile_fields() {
        let a = sample();
        let mut b = sample();
        b.score = Some(9000);
        b.actor_logo_url = Some("https://example.com/logo.png".into());
        b.title = Some("Acme launches (edited)".into());
        b.body = "edited body".into();
        assert_eq!(storage_key(&a), storage_key(&b));
    }

    #[test]
    fn test_fingerprint_tracks_identity_fields() {
        let a = sample();

        let mut other_date = sample();
        other_date.date = a.date + chrono::Duration::seconds(1);
        assert_ne!(storage_key(&a), storage_key(&other_date));

        let mut other_actor = sample();
        other_actor.actor_primary = Some("bob".into());
        assert_ne!(storage_key(&a), storage_key(&other_actor));

        let mut other_source = sample();
        other_source.source_id = "newsapi:press".into();
        assert_ne!(fingerprint(&a), fingerprint(&other_source));
    }

    #[test]
    fn test_absent_and_empty_actor_differ() {
        let mut a = sample();
        a.actor_secondary = None;
        let mut b = sample();
        b.actor_secondary = Some(String::new());
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_storage_key_shape() {
        let key = storage_key(&sample());
        assert!(key.starts_with("2024-01-02-"));
        assert!(key.ends_with(".md"));
        assert_eq!(key.len(), "2024-01-02-".len() + 64 + ".md".len());
    }

    #[test]
    fn test_render_post_omits_absent_fields() {
        let post = render_post(&sample()).unwrap();
        assert!(post.starts_with("+++\n"));
        assert!(post.contains("source_id = \"reddit:all\""));
        assert!(post.contains("score = 42"));
        assert!(!post.contains("country"));
        assert!(post.ends_with("+++\nLaunch day thread\n"));
    }

    #[tokio::test]
    async fn test_write_twice_yields_one_record() {
        let tmp = TempDir::new().unwrap();
        let writer = PostWriter::new(tmp.path().join("posts"));
        let entry = sample();

        let first = writer.write(&entry).await.unwrap();
        let WriteOutcome::Written(path) = &first else {
            panic!("expected a new record, got {:?}", first);
        };
        let once = std::fs::read_to_string(path).unwrap();

        assert_eq!(writer.write(&entry).await.unwrap(), WriteOutcome::Duplicate);
        assert!(writer.contains(&entry).await.unwrap());

        let files: Vec<_> = std::fs::read_dir(writer.output_dir())
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(std::fs::read_to_string(path).unwrap(), once);
    }

    #[tokio::test]
    async fn test_duplicate_keeps_first_content() {
        let tmp = TempDir::new().unwrap();
        let writer = PostWriter::new(tmp.path());
        let first = sample();
        let mut refetched = sample();
        refetched.score = Some(7);

        writer.write(&first).await.unwrap();
        assert_eq!(writer.write(&refetched).await.unwrap(), WriteOutcome::Duplicate);

        let content =
            std::fs::read_to_string(tmp.path().join(storage_key(&first))).unwrap();
        assert!(content.contains("score = 42"));
    }
}
