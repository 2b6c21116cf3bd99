//! Client for the self-hosted JS-rendering services.
//!
//! Each service exposes one endpoint taking a JSON batch of URLs and
//! returning rendered HTML per URL. A batch-level failure (non-200,
//! malformed body) is an error for the whole batch; per-URL failures come
//! back inside the response.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tierfetch_core::error::FetchError;
use tierfetch_core::outcome::RenderResult;
use tierfetch_core::traits::RenderService;

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    urls: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    results: Vec<RenderEntry>,
}

#[derive(Debug, Deserialize)]
struct RenderEntry {
    url: String,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Parses a render service response body into per-URL results.
///
/// A result counts as rendered only when the service marks it successful
/// (or carries no status at all) and includes HTML.
fn parse_render_body(body: &str) -> Result<Vec<RenderResult>, FetchError> {
    let response: RenderResponse = serde_json::from_str(body)?;
    Ok(response
        .results
        .into_iter()
        .map(|entry| {
            let marked_success = entry
                .status
                .as_deref()
                .is_none_or(|status| status == "success");
            if marked_success {
                RenderResult {
                    url: entry.url,
                    html: entry.html,
                    error: entry.error,
                }
            } else {
                let error = entry
                    .error
                    .unwrap_or_else(|| format!("remote status {}", entry.status.unwrap_or_default()));
                RenderResult {
                    url: entry.url,
                    html: None,
                    error: Some(error),
                }
            }
        })
        .collect())
}

/// HTTP client for pooled rendering endpoints.
#[derive(Clone)]
pub struct RenderClient {
    client: Client,
    timeout_secs: u64,
}

impl RenderClient {
    /// `timeout` bounds one whole batch render, not one URL.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl RenderService for RenderClient {
    async fn render_batch(
        &self,
        endpoint: &str,
        urls: &[String],
    ) -> Result<Vec<RenderResult>, FetchError> {
        tracing::debug!(endpoint, urls = urls.len(), "Submitting render batch");

        let response = self
            .client
            .post(endpoint)
            .json(&RenderRequest { urls })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    FetchError::Network(format!("Connection failed: {e}"))
                } else {
                    FetchError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http(format!(
                "render service returned HTTP {} at {}",
                status.as_u16(),
                endpoint
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Http(format!("Failed to read response body: {e}")))?;
        parse_render_body(&body)
    }
}
