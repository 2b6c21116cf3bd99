//! First two fetch tiers for a single URL: plain GET, then XHR/API probing.
//!
//! Every fetched body goes through the classifier; only a page it accepts
//! resolves the URL. Anything else escalates to the JS-rendering tier.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::classifier::Classifier;
use crate::config::PipelineConfig;
use crate::outcome::{FetchMethod, FetchOutcome};
use crate::traits::{StaticFetch, XhrFetch};

/// Result of running one URL through the cheap tiers.
#[derive(Debug, Clone)]
pub enum TierOutcome {
    /// A tier produced content the classifier accepted.
    Resolved(FetchOutcome),
    /// Both tiers came up empty; the URL needs JS rendering.
    NeedsEscalation { url: String, error: String },
}

/// Runs the static and XHR tiers with bounded concurrency.
#[derive(Clone)]
pub struct UrlPipeline<S, X> {
    static_fetch: S,
    xhr_fetch: X,
    classifier: Classifier,
    config: PipelineConfig,
}

impl<S, X> UrlPipeline<S, X>
where
    S: StaticFetch,
    X: XhrFetch,
{
    pub fn new(static_fetch: S, xhr_fetch: X, classifier: Classifier, config: PipelineConfig) -> Self {
        Self {
            static_fetch,
            xhr_fetch,
            classifier,
            config,
        }
    }

    /// Runs one URL through both tiers.
    pub async fn run_one(&self, url: &str) -> TierOutcome {
        // Tier 1: plain GET. A transport error classifies as missing content.
        let (body, status) = match self.static_fetch.fetch(url).await {
            Ok(page) => (Some(page.body), page.status),
            Err(e) => {
                // Transport errors are routine and expected to escalate;
                // anything else deserves a louder log line.
                if e.is_transport() {
                    tracing::debug!(url, error = %e, "Static fetch failed");
                } else {
                    tracing::warn!(url, error = %e, "Static fetch failed");
                }
                (None, 0)
            }
        };

        let verdict = self.classifier.classify(body.as_deref(), status);
        if !verdict.escalate {
            // body is Some here: the classifier rejects missing content.
            if let Some(html) = body {
                tracing::debug!(url, "Resolved via static fetch");
                return TierOutcome::Resolved(FetchOutcome::success(url, html, FetchMethod::Static));
            }
        }
        tracing::debug!(url, reason = %verdict.reason, "Static tier escalating");

        // Tier 2: probe derived API endpoints.
        match self.xhr_fetch.fetch(url).await {
            Ok(Some(page)) => {
                let verdict = self.classifier.classify(Some(&page.body), page.status);
                if !verdict.escalate {
                    tracing::debug!(url, "Resolved via XHR probe");
                    return TierOutcome::Resolved(FetchOutcome::success(
                        url,
                        page.body,
                        FetchMethod::Xhr,
                    ));
                }
                tracing::debug!(url, reason = %verdict.reason, "XHR tier escalating");
            }
            Ok(None) => {
                tracing::debug!(url, "No XHR candidate answered");
            }
            Err(e) => {
                tracing::debug!(url, error = %e, "XHR probing failed");
            }
        }

        TierOutcome::NeedsEscalation {
            url: url.to_string(),
            error: "static and xhr exhausted".to_string(),
        }
    }

    /// Runs all URLs concurrently, capped at the configured concurrency.
    /// Outcomes come back in input order.
    pub async fn run_all(&self, urls: &[String]) -> Vec<TierOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        let tasks = urls.iter().map(|url| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                // The semaphore lives for the whole join, so acquire cannot
                // observe a closed semaphore.
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                self.run_one(url).await
            }
        });

        futures::future::join_all(tasks).await
    }
}
