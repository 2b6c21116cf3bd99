//! Collects per-URL outcomes across fetch tiers and builds the run summary.
//!
//! Later tiers overwrite earlier failures for the same URL, so the map always
//! holds the best result seen so far. Final results come out in the caller's
//! input order regardless of which tier (or worker) produced them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::outcome::{FetchMethod, FetchOutcome};

/// Aggregate counters for one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    /// Percentage, 0.0 to 100.0.
    pub success_rate: f64,
    pub by_method: BTreeMap<String, usize>,
    pub js_batches_processed: usize,
    pub fallback_count: usize,
    pub total_time_secs: f64,
}

/// Shared, clonable store of per-URL outcomes.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    outcomes: Arc<Mutex<HashMap<String, FetchOutcome>>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_outcomes(&self) -> std::sync::MutexGuard<'_, HashMap<String, FetchOutcome>> {
        self.outcomes.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned aggregator mutex");
            poisoned.into_inner()
        })
    }

    /// Records one outcome, replacing any earlier entry for the same URL.
    pub fn record(&self, outcome: FetchOutcome) {
        self.lock_outcomes().insert(outcome.url.clone(), outcome);
    }

    pub fn record_all(&self, outcomes: impl IntoIterator<Item = FetchOutcome>) {
        let mut map = self.lock_outcomes();
        for outcome in outcomes {
            map.insert(outcome.url.clone(), outcome);
        }
    }

    /// Whether the URL currently has a successful outcome.
    pub fn is_success(&self, url: &str) -> bool {
        self.lock_outcomes()
            .get(url)
            .is_some_and(FetchOutcome::is_success)
    }

    /// URLs from `urls` that do not yet have a successful outcome,
    /// preserving order.
    pub fn unresolved<'a>(&self, urls: &'a [String]) -> Vec<&'a String> {
        let map = self.lock_outcomes();
        urls.iter()
            .filter(|url| !map.get(*url).is_some_and(FetchOutcome::is_success))
            .collect()
    }

    /// Produces results in input order. URLs with no recorded outcome (the
    /// run was cut off before reaching them) come back as failed with a
    /// timeout diagnostic.
    pub fn finalize(&self, urls: &[String]) -> Vec<FetchOutcome> {
        let map = self.lock_outcomes();
        urls.iter()
            .map(|url| {
                map.get(url)
                    .cloned()
                    .unwrap_or_else(|| FetchOutcome::failed(url.clone(), "timeout"))
            })
            .collect()
    }

    /// Builds the summary over finalized results.
    pub fn summarize(
        results: &[FetchOutcome],
        batch_size: usize,
        total_time_secs: f64,
    ) -> BatchSummary {
        let total = results.len();
        let success = results.iter().filter(|r| r.is_success()).count();
        let failed = total - success;

        let mut by_method: BTreeMap<String, usize> = BTreeMap::new();
        for result in results.iter().filter(|r| r.is_success()) {
            if let Some(method) = result.method {
                *by_method.entry(method.as_str().to_string()).or_insert(0) += 1;
            }
        }

        let js_count = by_method
            .get(FetchMethod::CustomJs.as_str())
            .copied()
            .unwrap_or(0);
        let js_batches_processed = if batch_size == 0 {
            0
        } else {
            js_count.div_ceil(batch_size)
        };
        let fallback_count = by_method
            .get(FetchMethod::Decodo.as_str())
            .copied()
            .unwrap_or(0);

        let success_rate = if total == 0 {
            0.0
        } else {
            success as f64 / total as f64 * 100.0
        };

        BatchSummary {
            total,
            success,
            failed,
            success_rate,
            by_method,
            js_batches_processed,
            fallback_count,
            total_time_secs,
        }
    }
}
