//! NewsAPI source.
//!
//! Searches the `/v2/everything` endpoint, newest first, one page at a time.
//!
//! # Configuration
//!
//! ```toml
//! [sources.press]
//! type = "newsapi"
//! api_key_env = "NEWSAPI_KEY"     # or api_key = "..."
//! page_size = 100
//! max_pages = 5
//! # language = "en"
//! # base_url = "https://newsapi.org"
//! ```
//!
//! # Queries
//!
//! Only [`Query::And`]: keywords are joined with ` AND `.
//!
//! # Watermark
//!
//! The watermark is passed as the `from` parameter. NewsAPI treats it as
//! inclusive and at second precision, so each page is also filtered locally
//! to keep only articles strictly newer than the watermark.
//!
//! Results arrive newest first. If more than `max_pages` pages match, the
//! fetch fails instead of stopping early, so the watermark never jumps past
//! articles that were not read. Raise `max_pages` (or narrow the query) when
//! a source keeps failing this way.

use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::BoxStream;
use serde::Deserialize;

use crate::error::{ConversionError, FetchError, QueryError};
use crate::http;
use crate::models::{Entry, Query};
use crate::traits::{paginate, source_label, Page, Source};

#[derive(Debug, Clone, Deserialize)]
pub struct NewsApiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the key, read when `api_key` is unset.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "http::default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://newsapi.org".to_string()
}
fn default_page_size() -> u32 {
    100
}
fn default_max_pages() -> u32 {
    5
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EverythingResponse {
    status: String,
    #[serde(default)]
    total_results: Option<u64>,
    #[serde(default)]
    articles: Vec<Article>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ArticleSource {
    #[serde(default)]
    pub name: Option<String>,
}

/// One article as returned by NewsAPI.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    #[serde(default)]
    pub source: ArticleSource,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_to_image: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

fn parse_published(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Favicon URL of the article's site, used as the outlet logo.
fn favicon_url(article_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(article_url).ok()?;
    let host = url.host_str()?;
    Some(format!("{}://{}/favicon.ico", url.scheme(), host))
}

pub struct NewsApiSource {
    name: String,
    label: String,
    api_key: String,
    config: NewsApiConfig,
    client: reqwest::Client,
}

impl NewsApiSource {
    pub fn new(name: impl Into<String>, config: NewsApiConfig) -> anyhow::Result<Self> {
        let name = name.into();
        let api_key = match (&config.api_key, &config.api_key_env) {
            (Some(key), _) => key.clone(),
            (None, Some(var)) => std::env::var(var).map_err(|_| {
                anyhow::anyhow!("source '{}': environment variable {} is not set", name, var)
            })?,
            (None, None) => anyhow::bail!("source '{}': api_key or api_key_env is required", name),
        };
        if config.page_size == 0 || config.page_size > 100 {
            anyhow::bail!("source '{}': page_size must be in 1..=100", name);
        }
        let client = http::build_client(http::DEFAULT_USER_AGENT, config.timeout_secs)?;

        Ok(Self {
            label: source_label("newsapi", &name),
            name,
            api_key,
            config,
            client,
        })
    }

    async fn fetch_page(
        &self,
        query: &str,
        watermark: Option<DateTime<Utc>>,
        page: u32,
    ) -> Result<Page<Article, u32>, FetchError> {
        let what = format!("newsapi page {}", page);
        let mut params: Vec<(&str, String)> = vec![
            ("q", query.to_string()),
            ("sortBy", "publishedAt".to_string()),
            ("pageSize", self.config.page_size.to_string()),
            ("page", page.to_string()),
        ];
        if let Some(w) = watermark {
            params.push(("from", w.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        if let Some(lang) = &self.config.language {
            params.push(("language", lang.clone()));
        }

        let request = self
            .client
            .get(format!(
                "{}/v2/everything",
                self.config.base_url.trim_end_matches('/')
            ))
            .header("X-Api-Key", self.api_key.as_str())
            .query(&params);
        let response: EverythingResponse = http::get_json(request, &what).await?;

        if response.status != "ok" {
            return Err(FetchError::fetch(format!(
                "{}: {} {}",
                what,
                response.code.unwrap_or_default(),
                response.message.unwrap_or_default()
            )));
        }

        let received = response.articles.len() as u64;
        let seen = u64::from(page) * u64::from(self.config.page_size);
        let exhausted = received < u64::from(self.config.page_size)
            || response.total_results.map_or(false, |total| seen >= total);
        if !exhausted && page >= self.config.max_pages {
            // Older matches remain past the cap; finishing here would skip them.
            return Err(FetchError::fetch(format!(
                "{}: max_pages ({}) reached with {} of {} results fetched",
                what,
                self.config.max_pages,
                seen,
                response.total_results.unwrap_or_default()
            )));
        }

        let items = response
            .articles
            .into_iter()
            .filter(|a| match (watermark, a.published_at.as_deref().and_then(parse_published)) {
                (Some(w), Some(date)) => date > w,
                // Unparseable dates are left for result_to_entry to reject.
                _ => true,
            })
            .collect();

        Ok(Page {
            items,
            next: if exhausted { None } else { Some(page + 1) },
        })
    }
}

impl Source for NewsApiSource {
    type Native = Article;

    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> &str {
        "newsapi"
    }

    fn convert_query(&self, query: &Query) -> Result<String, QueryError> {
        match query {
            Query::And(keywords) => Ok(keywords.join(" AND ")),
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
    ) -> BoxStream<'_, Result<Article, FetchError>> {
        paginate(1u32, move |page| {
            let query = native_query.clone();
            async move { self.fetch_page(&query, watermark, page).await }
        })
    }

    fn result_to_entry(&self, article: Article) -> Result<Entry, ConversionError> {
        let published = article
            .published_at
            .as_deref()
            .ok_or_else(|| ConversionError::missing("publishedAt"))?;
        let date = parse_published(published)
            .ok_or_else(|| ConversionError::new(format!("invalid publishedAt '{}'", published)))?;

        let title = non_empty(article.title);
        let body = non_empty(article.description)
            .or_else(|| non_empty(article.content))
            .or_else(|| title.clone())
            .ok_or_else(|| ConversionError::missing("description"))?;

        let mut entry = Entry::new(self.label.clone(), date, body);
        entry.actor_primary = non_empty(article.source.name);
        entry.actor_secondary = non_empty(article.author);
        entry.actor_logo_url = article.url.as_deref().and_then(favicon_url);
        entry.url = article.url;
        entry.title = title;
        entry.image_url = non_empty(article.url_to_image);
        Ok(entry)
    }
}
