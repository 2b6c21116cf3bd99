//! Orchestrates the full tier ladder for one batch of URLs.
//!
//! Tier order: static GET, XHR probing, pooled JS rendering, then (when
//! configured) the paid remote renderer for whatever is still failing. A
//! global deadline cuts the run; everything resolved before the cut is kept.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::aggregate::{BatchSummary, ResultAggregator};
use crate::classifier::Classifier;
use crate::config::EngineConfig;
use crate::dispatch::BatchDispatcher;
use crate::outcome::FetchOutcome;
use crate::pipeline::{TierOutcome, UrlPipeline};
use crate::pool::RenderPool;
use crate::traits::{FallbackRenderer, RenderService, StaticFetch, XhrFetch};

/// Final report for one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<FetchOutcome>,
    pub summary: BatchSummary,
    /// Whether the run itself completed. Individual URL failures do not
    /// clear this; only a setup problem would.
    pub success: bool,
}

/// The batch fetch engine, generic over its tier implementations.
#[derive(Clone)]
pub struct FetchEngine<S, X, R, F> {
    pipeline: UrlPipeline<S, X>,
    dispatcher: BatchDispatcher<R>,
    fallback: Option<F>,
    config: EngineConfig,
}

impl<S, X, R, F> FetchEngine<S, X, R, F>
where
    S: StaticFetch,
    X: XhrFetch,
    R: RenderService + 'static,
    F: FallbackRenderer,
{
    pub fn new(static_fetch: S, xhr_fetch: X, render: R, fallback: Option<F>, config: EngineConfig) -> Self {
        let classifier = Classifier::new(config.classifier.clone());
        let pipeline = UrlPipeline::new(
            static_fetch,
            xhr_fetch,
            classifier,
            config.pipeline.clone(),
        );
        let pool = RenderPool::new(config.pool.clone());
        let dispatcher = BatchDispatcher::new(render, pool, config.pool.clone());
        Self {
            pipeline,
            dispatcher,
            fallback,
            config,
        }
    }

    /// Runs the batch through every tier and reports per-URL outcomes in
    /// input order.
    pub async fn run(&self, urls: &[String]) -> BatchReport {
        let started = Instant::now();
        let aggregator = ResultAggregator::new();
        let cancel = CancellationToken::new();

        tracing::info!(urls = urls.len(), "Starting batch run");

        let work = self.run_tiers(urls, &aggregator, &cancel);
        match self.config.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = work => {}
                    _ = tokio::time::sleep(deadline) => {
                        cancel.cancel();
                        tracing::warn!(
                            deadline_secs = deadline.as_secs(),
                            "Deadline reached, abandoning outstanding work"
                        );
                    }
                }
            }
            None => work.await,
        }

        let results = aggregator.finalize(urls);
        let summary = ResultAggregator::summarize(
            &results,
            self.config.pool.batch_size,
            started.elapsed().as_secs_f64(),
        );
        tracing::info!(
            total = summary.total,
            success = summary.success,
            failed = summary.failed,
            success_rate = summary.success_rate,
            elapsed_secs = summary.total_time_secs,
            "Batch run complete"
        );

        BatchReport {
            results,
            summary,
            success: true,
        }
    }

    async fn run_tiers(
        &self,
        urls: &[String],
        aggregator: &ResultAggregator,
        cancel: &CancellationToken,
    ) {
        // Tiers 1 and 2: static GET and XHR probing, concurrently per URL.
        let mut escalated: Vec<String> = Vec::new();
        for outcome in self.pipeline.run_all(urls).await {
            match outcome {
                TierOutcome::Resolved(o) => aggregator.record(o),
                TierOutcome::NeedsEscalation { url, error } => {
                    tracing::debug!(url = %url, reason = %error, "Escalating to render tier");
                    escalated.push(url);
                }
            }
        }
        tracing::info!(
            resolved = urls.len() - escalated.len(),
            escalated = escalated.len(),
            "Cheap tiers done"
        );

        // Tier 3: pooled JS rendering.
        self.dispatcher.dispatch(&escalated, aggregator, cancel).await;
        for service in self.dispatcher.pool().stats() {
            tracing::debug!(
                endpoint = %service.endpoint,
                status = %service.status,
                batches = service.batches_completed,
                failures = service.failure_count,
                "Service pool state"
            );
        }

        // Tier 4: paid remote rendering for anything still failing. The
        // renderer must be both injected and enabled in the configuration.
        let Some(fallback) = &self.fallback else {
            return;
        };
        if !self.config.fallback.enabled {
            return;
        }
        let remaining: Vec<String> = aggregator
            .unresolved(&escalated)
            .into_iter()
            .cloned()
            .collect();
        if remaining.is_empty() {
            return;
        }
        tracing::info!(urls = remaining.len(), "Escalating to remote renderer");
        match fallback.render_all(&remaining).await {
            Ok(outcomes) => aggregator.record_all(outcomes),
            Err(e) => {
                // A fallback outage must not sink results from earlier tiers.
                tracing::error!(error = %e, "Remote render fallback failed");
                let message = e.to_string();
                aggregator.record_all(
                    remaining
                        .iter()
                        .map(|url| FetchOutcome::failed(url.clone(), message.clone())),
                );
            }
        }
    }

    pub fn pool(&self) -> &RenderPool {
        self.dispatcher.pool()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{FallbackConfig, PoolConfig};
    use crate::outcome::FetchMethod;
    use crate::testutil::{
        MockFallback, MockRenderService, MockStaticFetch, MockXhrFetch, make_urls, valid_html,
    };
    use crate::traits::NullFallback;

    fn quick_pool(endpoints: &[&str], batch_size: usize) -> PoolConfig {
        PoolConfig::default()
            .with_endpoints(endpoints.iter().map(|s| s.to_string()).collect())
            .with_batch_size(batch_size)
            .with_cooldown(Duration::from_millis(1))
            .with_acquire_timeout(Duration::from_millis(200))
            .with_poll_interval(Duration::from_millis(2))
    }

    fn engine(
        static_fetch: MockStaticFetch,
        render: MockRenderService,
        endpoints: &[&str],
        batch_size: usize,
    ) -> FetchEngine<MockStaticFetch, MockXhrFetch, MockRenderService, NullFallback> {
        let config = EngineConfig {
            pool: quick_pool(endpoints, batch_size),
            ..EngineConfig::default()
        };
        FetchEngine::new(static_fetch, MockXhrFetch::new(), render, None, config)
    }

    #[tokio::test]
    async fn test_static_only_batch() {
        let mut static_fetch = MockStaticFetch::new();
        let urls = make_urls(5);
        for url in &urls {
            static_fetch = static_fetch.with_page(url, valid_html(), 200);
        }
        let render = MockRenderService::succeeding();
        let e = engine(static_fetch, render.clone(), &["a:1"], 20);

        let report = e.run(&urls).await;

        assert!(report.success);
        assert_eq!(report.summary.total, 5);
        assert_eq!(report.summary.success, 5);
        assert_eq!(report.summary.by_method.get("static"), Some(&5));
        assert_eq!(render.call_count(), 0);
    }

    #[tokio::test]
    async fn test_escalated_batch_renders_in_chunks() {
        // Nothing answers the cheap tiers, so all 45 URLs escalate.
        let render = MockRenderService::succeeding();
        let e = engine(MockStaticFetch::new(), render.clone(), &["a:1", "b:2"], 20);
        let urls = make_urls(45);

        let report = e.run(&urls).await;

        assert_eq!(render.call_count(), 3);
        assert_eq!(report.summary.success, 45);
        assert_eq!(report.summary.js_batches_processed, 3);
        assert_eq!(report.summary.by_method.get("custom_js"), Some(&45));
    }

    #[tokio::test]
    async fn test_blocked_static_reaches_renderer() {
        let static_fetch = MockStaticFetch::new().with_page(
            "https://example.com/page/0",
            valid_html(),
            503,
        );
        let render = MockRenderService::succeeding();
        let e = engine(static_fetch, render.clone(), &["a:1"], 20);

        let report = e.run(&make_urls(1)).await;

        assert_eq!(render.call_count(), 1);
        assert_eq!(report.results[0].method, Some(FetchMethod::CustomJs));
    }

    #[tokio::test]
    async fn test_fallback_rescues_render_failures() {
        let render = MockRenderService::failing();
        let fallback = MockFallback::succeeding();
        let config = EngineConfig {
            pool: quick_pool(&["a:1"], 20),
            fallback: FallbackConfig::default().with_credentials("user", "pass"),
            ..EngineConfig::default()
        };
        let e = FetchEngine::new(
            MockStaticFetch::new(),
            MockXhrFetch::new(),
            render,
            Some(fallback.clone()),
            config,
        );
        let urls = make_urls(3);

        let report = e.run(&urls).await;

        assert_eq!(fallback.submitted.lock().unwrap().len(), 3);
        assert_eq!(report.summary.success, 3);
        assert_eq!(report.summary.fallback_count, 3);
        assert_eq!(report.summary.by_method.get("decodo"), Some(&3));
    }

    #[tokio::test]
    async fn test_fallback_outage_keeps_earlier_results() {
        let static_fetch =
            MockStaticFetch::new().with_page("https://example.com/page/0", valid_html(), 200);
        let render = MockRenderService::failing();
        let fallback = MockFallback::failing();
        let config = EngineConfig {
            pool: quick_pool(&["a:1"], 20),
            fallback: FallbackConfig::default().with_credentials("user", "pass"),
            ..EngineConfig::default()
        };
        let e = FetchEngine::new(static_fetch, MockXhrFetch::new(), render, Some(fallback), config);
        let urls = make_urls(2);

        let report = e.run(&urls).await;

        assert!(report.results[0].is_success());
        assert!(!report.results[1].is_success());
        assert!(
            report.results[1]
                .error
                .as_deref()
                .unwrap()
                .contains("remote render rejected")
        );
    }

    #[tokio::test]
    async fn test_disabled_fallback_is_not_consulted() {
        let render = MockRenderService::failing();
        let fallback = MockFallback::succeeding();
        // Renderer injected but not enabled in the configuration.
        let config = EngineConfig {
            pool: quick_pool(&["a:1"], 20),
            ..EngineConfig::default()
        };
        let e = FetchEngine::new(
            MockStaticFetch::new(),
            MockXhrFetch::new(),
            render,
            Some(fallback.clone()),
            config,
        );

        let report = e.run(&make_urls(2)).await;

        assert!(fallback.submitted.lock().unwrap().is_empty());
        assert_eq!(report.summary.success, 0);
        assert_eq!(report.summary.fallback_count, 0);
    }

    #[tokio::test]
    async fn test_deadline_preserves_partial_results() {
        // Renders take 100 ms each on one service; the 150 ms deadline lets
        // roughly one chunk finish.
        let render = MockRenderService::succeeding().with_delay(Duration::from_millis(100));
        let config = EngineConfig {
            pool: quick_pool(&["a:1"], 1),
            ..EngineConfig::default()
        }
        .with_deadline(Duration::from_millis(150));
        let e = FetchEngine::<_, _, _, NullFallback>::new(
            MockStaticFetch::new(),
            MockXhrFetch::new(),
            render,
            None,
            config,
        );
        let urls = make_urls(10);

        let report = e.run(&urls).await;

        assert!(report.success);
        assert_eq!(report.summary.total, 10);
        let succeeded = report.results.iter().filter(|r| r.is_success()).count();
        assert!(succeeded >= 1, "at least one chunk should finish");
        assert!(succeeded < 10, "deadline should cut the run");
        let timed_out = report
            .results
            .iter()
            .filter(|r| r.error.as_deref() == Some("timeout"))
            .count();
        assert_eq!(timed_out, 10 - succeeded);
    }

    #[tokio::test]
    async fn test_summary_timing_is_recorded() {
        let e = engine(MockStaticFetch::new(), MockRenderService::succeeding(), &["a:1"], 20);
        let report = e.run(&make_urls(2)).await;
        assert!(report.summary.total_time_secs >= 0.0);
    }
}
