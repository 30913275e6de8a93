//! Reddit source.
//!
//! Uses the public search listing (`/r/{subreddit}/search.json`) sorted by
//! `new`, following the `after` cursor one page at a time.
//!
//! # Configuration
//!
//! ```toml
//! [sources.threads]
//! type = "reddit"
//! subreddit = "all"
//! user_agent = "coverage-harvester/0.1 (by u/someone)"
//! max_pages = 10
//! ```
//!
//! # Ordering assumption
//!
//! `sort=new` returns posts newest first, so once a post at or before the
//! watermark shows up every later post is older too. The stream stops there
//! instead of paging through the full history. Hitting `max_pages` before
//! that point, with the listing still offering an `after` cursor, fails the
//! fetch so the watermark stays put.

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Deserialize;

use crate::error::{ConversionError, FetchError, QueryError};
use crate::http;
use crate::models::{Entry, Query};
use crate::traits::{paginate, source_label, Page, Source};

#[derive(Debug, Clone, Deserialize)]
pub struct RedditConfig {
    #[serde(default = "default_subreddit")]
    pub subreddit: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "http::default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_subreddit() -> String {
    "all".to_string()
}
fn default_user_agent() -> String {
    http::DEFAULT_USER_AGENT.to_string()
}
fn default_base_url() -> String {
    "https://www.reddit.com".to_string()
}
fn default_limit() -> u32 {
    100
}
fn default_max_pages() -> u32 {
    10
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

/// One submission from a search listing.
#[derive(Debug, Default, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub subreddit: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub created_utc: Option<f64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub selftext: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

fn created_at(post: &Post) -> Option<DateTime<Utc>> {
    let ts = post.created_utc?;
    if !ts.is_finite() {
        return None;
    }
    let secs = ts.trunc() as i64;
    let nanos = (ts.fract() * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
    DateTime::from_timestamp(secs, nanos)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Cursor of the next listing page; `None` is the first page.
type After = Option<String>;

pub struct RedditSource {
    name: String,
    label: String,
    config: RedditConfig,
    client: reqwest::Client,
}

impl RedditSource {
    pub fn new(name: impl Into<String>, config: RedditConfig) -> anyhow::Result<Self> {
        let name = name.into();
        if config.limit == 0 || config.limit > 100 {
            anyhow::bail!("source '{}': limit must be in 1..=100", name);
        }
        let client = http::build_client(&config.user_agent, config.timeout_secs)?;
        Ok(Self {
            label: source_label("reddit", &name),
            name,
            config,
            client,
        })
    }

    async fn fetch_page(
        &self,
        query: &str,
        watermark: Option<DateTime<Utc>>,
        after: After,
        page: u32,
    ) -> Result<Page<Post, (After, u32)>, FetchError> {
        let what = format!("reddit page {}", page);
        let mut params: Vec<(&str, String)> = vec![
            ("q", query.to_string()),
            ("sort", "new".to_string()),
            ("limit", self.config.limit.to_string()),
            ("raw_json", "1".to_string()),
        ];
        if self.config.subreddit != "all" {
            params.push(("restrict_sr", "on".to_string()));
        }
        if let Some(cursor) = &after {
            params.push(("after", cursor.clone()));
        }

        let request = self
            .client
            .get(format!(
                "{}/r/{}/search.json",
                self.config.base_url.trim_end_matches('/'),
                self.config.subreddit
            ))
            .query(&params);
        let listing: Listing = http::get_json(request, &what).await?;

        let mut items = Vec::with_capacity(listing.data.children.len());
        for child in listing.data.children {
            let post = child.data;
            if let (Some(w), Some(date)) = (watermark, created_at(&post)) {
                if date <= w {
                    // Newest-first: everything after this is older still.
                    return Ok(Page::last(items));
                }
            }
            items.push(post);
        }

        let next = match listing.data.after {
            Some(_) if items.is_empty() => None,
            Some(_) if page >= self.config.max_pages => {
                // Older posts remain; stopping here would skip them.
                return Err(FetchError::fetch(format!(
                    "{}: max_pages ({}) reached with more posts pending",
                    what, self.config.max_pages
                )));
            }
            Some(cursor) => Some((Some(cursor), page + 1)),
            None => None,
        };
        Ok(Page { items, next })
    }
}

impl Source for RedditSource {
    type Native = Post;

    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> &str {
        "reddit"
    }

    fn convert_query(&self, query: &Query) -> Result<String, QueryError> {
        match query {
            Query::And(keywords) => Ok(keywords
                .iter()
                .map(|k| format!("((self:yes selftext:{k}) OR (title:{k}))"))
                .collect::<Vec<_>>()
                .join(" AND ")),
            Query::Or(_) => Err(QueryError::UnsupportedQueryKind {
                source_id: self.label.clone(),
                kind: query.kind(),
            }),
        }
    }

    fn get_query_results(
        &self,
        native_query: String,
        watermark: Option<DateTime<Utc>>,
    ) -> BoxStream<'_, Result<Post, FetchError>> {
        paginate((None, 1u32), move |(after, page): (After, u32)| {
            let query = native_query.clone();
            async move { self.fetch_page(&query, watermark, after, page).await }
        })
    }

    fn result_to_entry(&self, post: Post) -> Result<Entry, ConversionError> {
        let date = created_at(&post).ok_or_else(|| ConversionError::missing("created_utc"))?;
        let title = non_empty(post.title);
        let body = non_empty(post.selftext)
            .or_else(|| title.clone())
            .ok_or_else(|| ConversionError::missing("selftext"))?;

        let mut entry = Entry::new(self.label.clone(), date, body);
        entry.actor_primary = non_empty(post.author);
        entry.actor_secondary = non_empty(post.subreddit);
        entry.score = post.score;
        entry.title = title;
        entry.url = non_empty(post.url);
        // Reddit uses placeholders like "self" or "default" for missing thumbnails.
        entry.image_url = post.thumbnail.filter(|t| t.starts_with("http"));
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> RedditSource {
        let config: RedditConfig = toml::from_str("").unwrap();
        RedditSource::new("all", config).unwrap()
    }

    #[test]
    fn test_convert_and_query() {
        let q = Query::and(["acme", "rust"]).unwrap();
        assert_eq!(
            source().convert_query(&q).unwrap(),
            "((self:yes selftext:acme) OR (title:acme)) AND ((self:yes selftext:rust) OR (title:rust))"
        );
    }

    #[test]
    fn test_or_query_unsupported() {
        let q = Query::or(["acme"]).unwrap();
        assert!(source().convert_query(&q).is_err());
    }

    #[test]
    fn test_post_to_entry() {
        let post: Post = serde_json::from_str(
            r#"{
                "author": "alice",
                "subreddit": "rust",
                "score": 17,
                "created_utc": 1704189600.0,
                "title": "Acme released a crate",
                "selftext": "",
                "url": "https://www.reddit.com/r/rust/comments/abc",
                "thumbnail": "self"
            }"#,
        )
        .unwrap();
        let entry = source().result_to_entry(post).unwrap();
        assert_eq!(entry.source_id, "reddit:all");
        assert_eq!(entry.body, "Acme released a crate");
        assert_eq!(entry.score, Some(17));
        assert_eq!(entry.actor_secondary.as_deref(), Some("rust"));
        assert!(entry.image_url.is_none());
        assert_eq!(entry.date.timestamp(), 1_704_189_600);
    }

    #[test]
    fn test_post_without_text_fails_conversion() {
        let post = Post {
            created_utc: Some(1_704_189_600.0),
            ..Post::default()
        };
        assert!(source().result_to_entry(post).is_err());
    }

    #[test]
    fn test_limit_validated() {
        let config: RedditConfig = toml::from_str("limit = 500").unwrap();
        assert!(RedditSource::new("all", config).is_err());
    }
}
