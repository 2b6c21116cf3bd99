//! Handwritten mocks for the fetch-tier traits (`StaticFetch`, `XhrFetch`,
//! `RenderService`, `FallbackRenderer`), injected into unit tests in place
//! of real network clients. Each mock records its calls behind an
//! `Arc<Mutex<_>>` so tests can assert on what was fetched, rendered, or
//! submitted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::FetchError;
use crate::outcome::{FetchMethod, FetchOutcome, RenderResult};
use crate::traits::{FallbackRenderer, FetchedPage, RenderService, StaticFetch, XhrFetch};

// ---------------------------------------------------------------------------
// MockStaticFetch
// ---------------------------------------------------------------------------

/// Mock static fetcher keyed by URL. Unknown URLs get a network error.
#[derive(Clone, Default)]
pub struct MockStaticFetch {
    pages: Arc<Mutex<HashMap<String, FetchedPage>>>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockStaticFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, body: impl Into<String>, status: u16) -> Self {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            FetchedPage {
                body: body.into(),
                status,
            },
        );
        self
    }

    /// Adds an artificial delay to every fetch, for deadline tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl StaticFetch for MockStaticFetch {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Network("no mock response".to_string()))
    }
}

// ---------------------------------------------------------------------------
// MockXhrFetch
// ---------------------------------------------------------------------------

/// Mock XHR prober keyed by page URL. Unknown URLs probe clean (`Ok(None)`).
#[derive(Clone, Default)]
pub struct MockXhrFetch {
    pages: Arc<Mutex<HashMap<String, FetchedPage>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockXhrFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, body: impl Into<String>, status: u16) -> Self {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            FetchedPage {
                body: body.into(),
                status,
            },
        );
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl XhrFetch for MockXhrFetch {
    async fn fetch(&self, url: &str) -> Result<Option<FetchedPage>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        Ok(self.pages.lock().unwrap().get(url).cloned())
    }
}

// ---------------------------------------------------------------------------
// MockRenderService
// ---------------------------------------------------------------------------

/// Recorded render call: (endpoint, urls).
pub type RenderCall = (String, Vec<String>);

/// Mock rendering service that records every batch it receives.
#[derive(Clone)]
pub struct MockRenderService {
    /// Batches dispatched so far, in dispatch order.
    pub calls: Arc<Mutex<Vec<RenderCall>>>,
    fail: bool,
    delay: Option<Duration>,
}

impl MockRenderService {
    /// Service that renders every URL successfully.
    pub fn succeeding() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail: false,
            delay: None,
        }
    }

    /// Service whose every batch errors out.
    pub fn failing() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail: true,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl RenderService for MockRenderService {
    async fn render_batch(
        &self,
        endpoint: &str,
        urls: &[String],
    ) -> Result<Vec<RenderResult>, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.to_string(), urls.to_vec()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(FetchError::Http("render service unavailable".to_string()));
        }
        Ok(urls
            .iter()
            .map(|url| RenderResult {
                url: url.clone(),
                html: Some(valid_html()),
                error: None,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockFallback
// ---------------------------------------------------------------------------

/// Mock remote renderer that records submitted URLs.
#[derive(Clone)]
pub struct MockFallback {
    pub submitted: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl MockFallback {
    pub fn succeeding() -> Self {
        Self {
            submitted: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            submitted: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        }
    }
}

impl FallbackRenderer for MockFallback {
    async fn render_all(&self, urls: &[String]) -> Result<Vec<FetchOutcome>, FetchError> {
        self.submitted.lock().unwrap().extend(urls.iter().cloned());
        if self.fail {
            return Err(FetchError::Http("remote render rejected".to_string()));
        }
        Ok(urls
            .iter()
            .map(|url| FetchOutcome::success(url.clone(), valid_html(), FetchMethod::Decodo))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// HTML that passes every classifier rule with default thresholds.
pub fn valid_html() -> String {
    let mut html = String::from("<html><body><article>");
    for i in 0..12 {
        html.push_str(&format!(
            "<p>Paragraph {i} with a reasonable amount of visible prose content \
             that a human reader would actually care about on this page.</p>"
        ));
    }
    html.push_str(r#"<img src="/hero.jpg"><a href="/about">About us</a>"#);
    html.push_str("</article></body></html>");
    html
}

/// Builds a list of numbered URLs for batch tests.
pub fn make_urls(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("https://example.com/page/{i}"))
        .collect()
}
