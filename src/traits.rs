//! Source capability contract.
//!
//! A [`Source`] knows how to query one external provider. It implements
//! three steps: translate the abstract [`Query`], stream native results newer
//! than a watermark, and convert each native result into an [`Entry`].
//! Every `Source` is automatically an [`EntrySource`], which composes the
//! three steps into [`fetch_entries`](EntrySource::fetch_entries), the only
//! call the aggregator makes.
//!
//! ```text
//!  Query ──convert_query──▶ native query
//!                              │
//!                    get_query_results (paged, lazy)
//!                              ▼
//!                       native results ──result_to_entry──▶ Entry stream
//!                                          (failures dropped + logged)
//! ```

use chrono::{DateTime, Utc};
use futures::future::{self, Future};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use crate::error::{ConversionError, FetchError, QueryError};
use crate::models::{Entry, Query};

/// A provider adapter.
///
/// # Contract
///
/// - [`convert_query`](Source::convert_query) is pure and deterministic.
/// - [`get_query_results`](Source::get_query_results) yields only results
///   strictly newer than `watermark` when one is given. Implementations that
///   stop early at the first older result must document that the remote API
///   returns results newest first. Paging is internal: the stream fetches the
///   next page only after the current one has been consumed, and a failed page
///   ends the stream with a single error.
/// - [`result_to_entry`](Source::result_to_entry) is pure. A failure drops
///   that one result.
pub trait Source: Send + Sync {
    /// Native result type produced by the remote API.
    type Native: Send;

    /// Configured instance name (e.g. `"press"`).
    fn name(&self) -> &str;

    /// Implementation identifier (e.g. `"newsapi"`).
    fn source_type(&self) -> &str;

    fn convert_query(&self, query: &Query) -> Result<String, QueryError>;

    fn get_query_results(
        &self,
        native_query: String,
        watermark: Option<DateTime<Utc>>,
    ) -> BoxStream<'_, Result<Self::Native, FetchError>>;

    fn result_to_entry(&self, result: Self::Native) -> Result<Entry, ConversionError>;
}

/// Object-safe view of a source, used by the aggregator and registries.
pub trait EntrySource: Send + Sync {
    /// Stable identity: `"{type}:{name}"`. Used as the checkpoint key and as
    /// [`Entry::source_id`].
    fn source_id(&self) -> String;

    fn kind(&self) -> &str;

    /// Convert, fetch, and normalize. Query conversion and fetch failures end
    /// the stream with an error; per-result conversion failures are skipped.
    /// Every yielded entry is strictly newer than `watermark`.
    fn fetch_entries<'a>(
        &'a self,
        query: &Query,
        watermark: Option<DateTime<Utc>>,
    ) -> BoxStream<'a, Result<Entry, FetchError>>;
}

/// Identity label shared by every source: `"{type}:{name}"`.
pub fn source_label(source_type: &str, name: &str) -> String {
    format!("{}:{}", source_type, name)
}

impl<S: Source> EntrySource for S {
    fn source_id(&self) -> String {
        source_label(self.source_type(), self.name())
    }

    fn kind(&self) -> &str {
        self.source_type()
    }

    fn fetch_entries<'a>(
        &'a self,
        query: &Query,
        watermark: Option<DateTime<Utc>>,
    ) -> BoxStream<'a, Result<Entry, FetchError>> {
        let native_query = match self.convert_query(query) {
            Ok(q) => q,
            Err(e) => return stream::once(future::ready(Err(FetchError::from(e)))).boxed(),
        };
        debug!(source = %EntrySource::source_id(self), query = %native_query, "fetching");

        self.get_query_results(native_query, watermark)
            .filter_map(move |result| {
                let out = match result {
                    Err(e) => Some(Err(e)),
                    Ok(native) => match self.result_to_entry(native) {
                        Ok(entry) if watermark.map_or(true, |w| entry.date > w) => Some(Ok(entry)),
                        Ok(entry) => {
                            debug!(
                                source = %entry.source_id,
                                date = %entry.date,
                                "skipping entry not newer than watermark"
                            );
                            None
                        }
                        Err(err) => {
                            warn!(
                                source = %EntrySource::source_id(self),
                                error = %err,
                                "dropping result that failed conversion"
                            );
                            None
                        }
                    },
                };
                future::ready(out)
            })
            .boxed()
    }
}

/// One page of native results plus the cursor of the next page, if any.
pub struct Page<T, C> {
    pub items: Vec<T>,
    pub next: Option<C>,
}

impl<T, C> Page<T, C> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// Turn a page-fetching function into one flat, lazy stream.
///
/// `fetch` is called with `first`, then with each page's `next` cursor, but
/// only after every item of the previous page has been pulled. At most one
/// page is held in memory. The first failed page ends the stream.
///
/// A source that caps the number of pages it follows must fail the page at
/// which the cap cuts off remaining results. Ending the stream quietly would
/// let the caller treat a truncated pass as complete.
pub fn paginate<'a, C, T, F, Fut>(first: C, fetch: F) -> BoxStream<'a, Result<T, FetchError>>
where
    C: Send + 'a,
    T: Send + 'a,
    F: FnMut(C) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Page<T, C>, FetchError>> + Send + 'a,
{
    stream::try_unfold((Some(first), fetch), |(cursor, mut fetch)| async move {
        let Some(cursor) = cursor else {
            return Ok::<_, FetchError>(None);
        };
        let page = fetch(cursor).await?;
        let items = stream::iter(page.items.into_iter().map(Ok::<T, FetchError>));
        Ok(Some((items, (page.next, fetch))))
    })
    .try_flatten()
    .boxed()
}
