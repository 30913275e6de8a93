//! Shared HTTP plumbing for the remote sources.

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::FetchError;

pub(crate) const DEFAULT_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub(crate) fn default_timeout_secs() -> u64 {
    30
}

pub(crate) fn build_client(user_agent: &str, timeout_secs: u64) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

/// Map a transport error onto the fetch taxonomy: anything that never got a
/// usable response is connectivity, the rest is a source failure.
pub(crate) fn classify(what: &str, err: reqwest::Error) -> FetchError {
    let base = if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
        FetchError::connectivity(format!("{}: {}", what, err))
    } else {
        FetchError::fetch(format!("{}: {}", what, err))
    };
    base.with_source(err)
}

/// 429 and 5xx are transient remote conditions; other non-success statuses
/// mean the request itself was refused.
fn status_error(what: &str, status: StatusCode, body: &str) -> FetchError {
    let snippet: String = body.chars().take(200).collect();
    let message = format!("{}: HTTP {} {}", what, status.as_u16(), snippet.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        FetchError::connectivity(message)
    } else {
        FetchError::fetch(message)
    }
}

/// Send `request` and decode a JSON body.
pub(crate) async fn get_json<T: DeserializeOwned>(
    request: RequestBuilder,
    what: &str,
) -> Result<T, FetchError> {
    let response = request.send().await.map_err(|e| classify(what, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(what, status, &body));
    }

    let bytes = response.bytes().await.map_err(|e| classify(what, e))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        FetchError::fetch(format!("{}: malformed response: {}", what, e)).with_source(e)
    })
}
