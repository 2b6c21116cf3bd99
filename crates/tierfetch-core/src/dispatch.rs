//! Splits escalated URLs into chunks and feeds them to the rendering pool.
//!
//! Worker count is `min(chunk_count, service_count)`, so every worker can
//! hold a service without starving the others. Workers pull chunks from a
//! shared queue until it drains or the run is cancelled.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregate::ResultAggregator;
use crate::config::PoolConfig;
use crate::outcome::{FetchMethod, FetchOutcome};
use crate::pool::RenderPool;
use crate::traits::RenderService;

type ChunkQueue = Arc<Mutex<VecDeque<(usize, Vec<String>)>>>;

/// Dispatches escalated URLs to pooled rendering services in batches.
#[derive(Clone)]
pub struct BatchDispatcher<R> {
    service: R,
    pool: RenderPool,
    config: PoolConfig,
}

impl<R> BatchDispatcher<R>
where
    R: RenderService + 'static,
{
    pub fn new(service: R, pool: RenderPool, config: PoolConfig) -> Self {
        Self {
            service,
            pool,
            config,
        }
    }

    pub fn pool(&self) -> &RenderPool {
        &self.pool
    }

    /// Renders all URLs, recording per-URL outcomes into the aggregator as
    /// chunks complete. Dropping the returned future aborts the workers, so
    /// a deadline cut loses only in-flight chunks.
    pub async fn dispatch(
        &self,
        urls: &[String],
        aggregator: &ResultAggregator,
        cancel: &CancellationToken,
    ) {
        if urls.is_empty() {
            return;
        }

        let service_count = self.pool.service_count();
        if service_count == 0 {
            tracing::warn!(urls = urls.len(), "No rendering services configured");
            aggregator.record_all(
                urls.iter()
                    .map(|url| FetchOutcome::failed(url.clone(), "no rendering services configured")),
            );
            return;
        }

        let chunks: Vec<(usize, Vec<String>)> = urls
            .chunks(self.config.batch_size.max(1))
            .map(|c| c.to_vec())
            .enumerate()
            .collect();
        let chunk_count = chunks.len();
        let worker_count = chunk_count.min(service_count);
        tracing::info!(
            urls = urls.len(),
            chunks = chunk_count,
            workers = worker_count,
            "Dispatching render batches"
        );

        let queue: ChunkQueue = Arc::new(Mutex::new(chunks.into()));

        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            let worker_id = format!("render-{}", &Uuid::new_v4().to_string()[..8]);
            let service = self.service.clone();
            let pool = self.pool.clone();
            let queue = Arc::clone(&queue);
            let aggregator = aggregator.clone();
            let cancel = cancel.clone();
            let acquire_timeout = self.config.acquire_timeout;

            workers.spawn(async move {
                run_worker(
                    worker_id,
                    service,
                    pool,
                    queue,
                    aggregator,
                    cancel,
                    acquire_timeout,
                )
                .await;
            });
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Render worker panicked");
            }
        }
    }
}

async fn run_worker<R: RenderService>(
    worker_id: String,
    service: R,
    pool: RenderPool,
    queue: ChunkQueue,
    aggregator: ResultAggregator,
    cancel: CancellationToken,
    acquire_timeout: std::time::Duration,
) {
    loop {
        if cancel.is_cancelled() {
            tracing::debug!(worker = %worker_id, "Worker stopping on cancellation");
            return;
        }

        let next = {
            let mut q = queue.lock().unwrap_or_else(|poisoned| {
                tracing::warn!("Recovered from poisoned chunk queue mutex");
                poisoned.into_inner()
            });
            q.pop_front()
        };
        let Some((ordinal, chunk)) = next else {
            tracing::debug!(worker = %worker_id, "Chunk queue drained");
            return;
        };

        let lease = tokio::select! {
            acquired = pool.acquire(acquire_timeout) => match acquired {
                Ok(lease) => lease,
                Err(e) => {
                    tracing::warn!(worker = %worker_id, chunk = ordinal, error = %e, "Chunk failed waiting for a service");
                    aggregator.record_all(chunk.iter().map(|url| {
                        FetchOutcome::failed(url.clone(), "no available service (timeout)")
                    }));
                    continue;
                }
            },
            _ = cancel.cancelled() => {
                aggregator.record_all(
                    chunk.iter().map(|url| FetchOutcome::failed(url.clone(), "timeout")),
                );
                return;
            }
        };

        tracing::info!(
            worker = %worker_id,
            chunk = ordinal,
            urls = chunk.len(),
            endpoint = %lease.endpoint,
            "Rendering chunk"
        );

        match service.render_batch(&lease.endpoint, &chunk).await {
            Ok(results) => {
                let mut covered = std::collections::HashSet::new();
                for result in results {
                    covered.insert(result.url.clone());
                    let outcome = match result.html {
                        Some(html) => {
                            FetchOutcome::success(result.url, html, FetchMethod::CustomJs)
                        }
                        None => FetchOutcome::failed_via(
                            result.url,
                            FetchMethod::CustomJs,
                            result.error.unwrap_or_else(|| "render failed".to_string()),
                        ),
                    };
                    aggregator.record(outcome);
                }
                // URLs the service silently dropped still need an outcome.
                aggregator.record_all(chunk.iter().filter(|u| !covered.contains(*u)).map(|url| {
                    FetchOutcome::failed_via(
                        url.clone(),
                        FetchMethod::CustomJs,
                        "missing from service response",
                    )
                }));

                if let Err(e) = pool.release_success(&lease) {
                    tracing::error!(endpoint = %lease.endpoint, error = %e, "Failed to release service");
                }
            }
            Err(e) => {
                tracing::warn!(
                    worker = %worker_id,
                    chunk = ordinal,
                    endpoint = %lease.endpoint,
                    error = %e,
                    "Render batch failed"
                );
                let message = e.to_string();
                aggregator.record_all(chunk.iter().map(|url| {
                    FetchOutcome::failed_via(url.clone(), FetchMethod::CustomJs, message.clone())
                }));

                // The service stays Failed; only an explicit try_recover on
                // the pool puts it back into rotation.
                if let Err(e) = pool.release_failure(&lease) {
                    tracing::error!(endpoint = %lease.endpoint, error = %e, "Failed to release service");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testutil::{MockRenderService, make_urls};

    fn dispatcher(
        service: MockRenderService,
        endpoints: &[&str],
        batch_size: usize,
    ) -> BatchDispatcher<MockRenderService> {
        let config = PoolConfig::default()
            .with_endpoints(endpoints.iter().map(|s| s.to_string()).collect())
            .with_batch_size(batch_size)
            .with_cooldown(Duration::from_millis(1))
            .with_acquire_timeout(Duration::from_millis(200))
            .with_poll_interval(Duration::from_millis(2));
        let pool = RenderPool::new(config.clone());
        BatchDispatcher::new(service, pool, config)
    }

    #[tokio::test]
    async fn test_chunks_are_batch_sized() {
        let service = MockRenderService::succeeding();
        let d = dispatcher(service.clone(), &["a:1", "b:2"], 20);
        let urls = make_urls(45);
        let aggregator = ResultAggregator::new();

        d.dispatch(&urls, &aggregator, &CancellationToken::new()).await;

        // 45 URLs at batch size 20 is 3 chunks.
        assert_eq!(service.call_count(), 3);
        let results = aggregator.finalize(&urls);
        assert!(results.iter().all(|r| r.is_success()));
        assert!(results.iter().all(|r| r.method == Some(FetchMethod::CustomJs)));
    }

    #[tokio::test]
    async fn test_failed_batch_fails_whole_chunk() {
        let service = MockRenderService::failing();
        let d = dispatcher(service, &["a:1"], 10);
        let urls = make_urls(10);
        let aggregator = ResultAggregator::new();

        d.dispatch(&urls, &aggregator, &CancellationToken::new()).await;

        let results = aggregator.finalize(&urls);
        assert!(results.iter().all(|r| !r.is_success()));
        assert!(results.iter().all(|r| r.method == Some(FetchMethod::CustomJs)));
        assert!(
            results[0]
                .error
                .as_deref()
                .unwrap()
                .contains("render service unavailable")
        );
    }

    #[tokio::test]
    async fn test_no_services_fails_fast() {
        let service = MockRenderService::succeeding();
        let d = dispatcher(service.clone(), &[], 10);
        let urls = make_urls(5);
        let aggregator = ResultAggregator::new();

        d.dispatch(&urls, &aggregator, &CancellationToken::new()).await;

        assert_eq!(service.call_count(), 0);
        let results = aggregator.finalize(&urls);
        assert!(results.iter().all(|r| {
            r.error.as_deref() == Some("no rendering services configured")
        }));
    }

    #[tokio::test]
    async fn test_empty_input_is_noop() {
        let service = MockRenderService::succeeding();
        let d = dispatcher(service.clone(), &["a:1"], 10);
        let aggregator = ResultAggregator::new();

        d.dispatch(&[], &aggregator, &CancellationToken::new()).await;
        assert_eq!(service.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_service_leaves_rotation() {
        let service = MockRenderService::failing();
        let d = dispatcher(service.clone(), &["a:1"], 1);
        // 3 chunks against one service: the first failure marks it Failed,
        // it is never re-acquired, and the remaining chunks time out
        // waiting for a free service.
        let urls = make_urls(3);
        let aggregator = ResultAggregator::new();

        d.dispatch(&urls, &aggregator, &CancellationToken::new()).await;

        assert_eq!(service.call_count(), 1);
        let results = aggregator.finalize(&urls);
        let timed_out = results
            .iter()
            .filter(|r| r.error.as_deref() == Some("no available service (timeout)"))
            .count();
        assert_eq!(timed_out, 2);
    }

    #[tokio::test]
    async fn test_recovered_service_rejoins_rotation() {
        let service = MockRenderService::failing();
        let d = dispatcher(service.clone(), &["a:1"], 1);
        let urls = make_urls(1);
        let aggregator = ResultAggregator::new();

        d.dispatch(&urls, &aggregator, &CancellationToken::new()).await;
        assert_eq!(service.call_count(), 1);

        // Manual reset puts the service back; the next dispatch uses it.
        assert!(d.pool().try_recover("https://a:1/render"));
        d.dispatch(&urls, &aggregator, &CancellationToken::new()).await;
        assert_eq!(service.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_dispatch() {
        let service = MockRenderService::succeeding().with_delay(Duration::from_millis(50));
        let d = dispatcher(service.clone(), &["a:1"], 1);
        let urls = make_urls(20);
        let aggregator = ResultAggregator::new();
        let cancel = CancellationToken::new();

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            cancel_clone.cancel();
        });

        d.dispatch(&urls, &aggregator, &cancel).await;

        // Far fewer than 20 chunks got through before the cut.
        assert!(service.call_count() < 20);
    }
}
