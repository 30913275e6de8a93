//! Core data models used throughout the harvester.
//!
//! An [`Entry`] is the normalized unit of coverage every source produces; a
//! [`Query`] is the source-agnostic request each source translates into its
//! own search syntax.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

use crate::error::QueryError;

/// One piece of coverage, normalized from a source's native result.
///
/// `date` and `body` are always present. Everything else is `None` when the
/// source does not know it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Label of the producing source (e.g. `"newsapi:press"`).
    pub source_id: String,
    pub actor_primary: Option<String>,
    pub actor_secondary: Option<String>,
    pub date: DateTime<Utc>,
    pub body: String,
    pub score: Option<i64>,
    pub country: Option<String>,
    pub actor_logo_url: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub image_url: Option<String>,
}

impl Entry {
    /// Create an entry with only the required fields set.
    pub fn new(source_id: impl Into<String>, date: DateTime<Utc>, body: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            actor_primary: None,
            actor_secondary: None,
            date,
            body: body.into(),
            score: None,
            country: None,
            actor_logo_url: None,
            url: None,
            title: None,
            image_url: None,
        }
    }
}

/// Non-empty, ordered list of search keywords.
///
/// Order is kept so the native query string a source builds is
/// reproducible; it has no effect on matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keywords(Vec<String>);

impl Keywords {
    /// Trims every keyword and drops blank ones. Fails if nothing is left.
    pub fn new<I, S>(keywords: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.into().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(QueryError::EmptyKeywords);
        }
        Ok(Self(keywords))
    }
}

impl Deref for Keywords {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.0
    }
}

/// Variant tag of a [`Query`], used in error reports and config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    And,
    Or,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::And => "and",
            QueryKind::Or => "or",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Abstract search request. Each source either translates a variant into
/// its native syntax or rejects it with
/// [`QueryError::UnsupportedQueryKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Every keyword must match.
    And(Keywords),
    /// Any keyword may match.
    Or(Keywords),
}

impl Query {
    pub fn and<I, S>(keywords: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Query::And(Keywords::new(keywords)?))
    }

    pub fn or<I, S>(keywords: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Query::Or(Keywords::new(keywords)?))
    }

    pub fn kind(&self) -> QueryKind {
        match self {
            Query::And(_) => QueryKind::And,
            Query::Or(_) => QueryKind::Or,
        }
    }

    pub fn keywords(&self) -> &[String] {
        match self {
            Query::And(k) | Query::Or(k) => k,
        }
    }
}
