use std::future::Future;

use crate::error::FetchError;
use crate::outcome::{FetchOutcome, RenderResult};

/// An HTTP response body plus its status code.
///
/// The status is carried alongside the body so the classifier can treat a
/// 403/503 page with content as blocked rather than valid.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub body: String,
    pub status: u16,
}

/// Fetches a page with a plain GET, no JavaScript execution.
pub trait StaticFetch: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedPage, FetchError>> + Send;
}

/// Probes XHR/API endpoints derived from a page URL.
pub trait XhrFetch: Send + Sync + Clone {
    /// Returns the first candidate endpoint that answers 200, or `Ok(None)`
    /// when every candidate misses.
    fn fetch(&self, url: &str)
    -> impl Future<Output = Result<Option<FetchedPage>, FetchError>> + Send;
}

/// Submits a batch of URLs to one JS-rendering service instance.
pub trait RenderService: Send + Sync + Clone {
    fn render_batch(
        &self,
        endpoint: &str,
        urls: &[String],
    ) -> impl Future<Output = Result<Vec<RenderResult>, FetchError>> + Send;
}

/// Last-resort renderer for URLs every earlier tier failed on.
pub trait FallbackRenderer: Send + Sync + Clone {
    fn render_all(
        &self,
        urls: &[String],
    ) -> impl Future<Output = Result<Vec<FetchOutcome>, FetchError>> + Send;
}

/// A no-op FallbackRenderer for use when no paid fallback is configured.
#[derive(Debug, Clone)]
pub struct NullFallback;

impl FallbackRenderer for NullFallback {
    async fn render_all(&self, _urls: &[String]) -> Result<Vec<FetchOutcome>, FetchError> {
        Ok(vec![])
    }
}
