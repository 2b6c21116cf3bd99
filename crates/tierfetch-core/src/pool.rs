//! Rotating pool of JS-rendering service instances.
//!
//! Each service endpoint cycles through a small state machine as batches are
//! dispatched to it:
//!
//! ```text
//! AVAILABLE --[acquire]--> PROCESSING --[success]--> COOLDOWN --[elapsed]--> AVAILABLE
//!                               |
//!                           [failure]
//!                               |
//!                               v
//!                            FAILED --[recover, < 3 failures]--> AVAILABLE
//! ```
//!
//! A service that fails three times stays failed for the rest of the run.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::error::FetchError;

/// Failures after which a service is retired for the session.
const MAX_SERVICE_FAILURES: u32 = 3;

/// Current state of one pooled service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Idle and ready to take a batch.
    Available,
    /// Currently rendering a batch.
    Processing,
    /// Resting after a successful batch.
    Cooldown,
    /// Marked unusable after an error.
    Failed,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Available => write!(f, "available"),
            ServiceStatus::Processing => write!(f, "processing"),
            ServiceStatus::Cooldown => write!(f, "cooldown"),
            ServiceStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Bookkeeping for one service endpoint.
#[derive(Debug)]
struct ServiceRecord {
    endpoint: String,
    status: ServiceStatus,
    cooldown_until: Option<Instant>,
    failure_count: u32,
    batches_completed: u64,
}

impl ServiceRecord {
    fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            status: ServiceStatus::Available,
            cooldown_until: None,
            failure_count: 0,
            batches_completed: 0,
        }
    }
}

/// An acquired service slot. Must be returned to the pool through
/// [`RenderPool::release_success`] or [`RenderPool::release_failure`].
#[derive(Debug, Clone)]
pub struct ServiceLease {
    pub endpoint: String,
}

/// Per-service counters for logging and the run summary.
#[derive(Debug, Clone)]
pub struct ServiceStats {
    pub endpoint: String,
    pub status: ServiceStatus,
    pub failure_count: u32,
    pub batches_completed: u64,
}

/// Thread-safe rotation over a fixed set of rendering endpoints.
#[derive(Clone)]
pub struct RenderPool {
    config: PoolConfig,
    records: Arc<Mutex<Vec<ServiceRecord>>>,
}

impl RenderPool {
    pub fn new(config: PoolConfig) -> Self {
        let records = config
            .endpoints
            .iter()
            .map(|e| ServiceRecord::new(normalize_endpoint(e)))
            .collect();
        Self {
            config,
            records: Arc::new(Mutex::new(records)),
        }
    }

    pub fn service_count(&self) -> usize {
        self.lock_records().len()
    }

    /// Acquires the records lock, recovering from poison if necessary.
    fn lock_records(&self) -> std::sync::MutexGuard<'_, Vec<ServiceRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned pool mutex");
            poisoned.into_inner()
        })
    }

    /// Tries to grab an available service without waiting.
    ///
    /// Promotes any cooldown that has elapsed before scanning, so a service
    /// whose rest period just ended is picked up on the same call.
    pub fn try_acquire(&self) -> Option<ServiceLease> {
        let mut records = self.lock_records();
        let now = Instant::now();

        for record in records.iter_mut() {
            if record.status == ServiceStatus::Cooldown
                && record.cooldown_until.is_some_and(|until| now >= until)
            {
                record.status = ServiceStatus::Available;
                record.cooldown_until = None;
                tracing::debug!(endpoint = %record.endpoint, "Cooldown complete");
            }
        }

        for record in records.iter_mut() {
            if record.status == ServiceStatus::Available {
                record.status = ServiceStatus::Processing;
                tracing::debug!(endpoint = %record.endpoint, "Service acquired");
                return Some(ServiceLease {
                    endpoint: record.endpoint.clone(),
                });
            }
        }

        None
    }

    /// Waits for a service to become available, polling at the configured
    /// interval, up to `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> Result<ServiceLease, FetchError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lease) = self.try_acquire() {
                return Ok(lease);
            }
            if Instant::now() >= deadline {
                return Err(FetchError::ServiceExhausted(timeout.as_secs()));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Marks a processing service as done and puts it into cooldown.
    pub fn release_success(&self, lease: &ServiceLease) -> Result<(), FetchError> {
        let mut records = self.lock_records();
        let record = find_record(&mut records, &lease.endpoint)?;

        if record.status != ServiceStatus::Processing {
            return Err(FetchError::InvalidTransition {
                endpoint: lease.endpoint.clone(),
                detail: format!("release_success from {}", record.status),
            });
        }

        record.status = ServiceStatus::Cooldown;
        record.cooldown_until = Some(Instant::now() + self.config.cooldown);
        record.batches_completed += 1;
        tracing::info!(
            endpoint = %lease.endpoint,
            batches = record.batches_completed,
            cooldown_secs = self.config.cooldown.as_secs(),
            "Service entering cooldown"
        );
        Ok(())
    }

    /// Marks a processing service as failed.
    pub fn release_failure(&self, lease: &ServiceLease) -> Result<(), FetchError> {
        let mut records = self.lock_records();
        let record = find_record(&mut records, &lease.endpoint)?;

        if record.status != ServiceStatus::Processing {
            return Err(FetchError::InvalidTransition {
                endpoint: lease.endpoint.clone(),
                detail: format!("release_failure from {}", record.status),
            });
        }

        record.status = ServiceStatus::Failed;
        record.failure_count += 1;
        record.cooldown_until = None;
        tracing::warn!(
            endpoint = %lease.endpoint,
            failures = record.failure_count,
            "Service marked failed"
        );
        Ok(())
    }

    /// Attempts to bring a failed service back into rotation.
    ///
    /// Returns `false` once a service has hit the failure cap; the failure
    /// count is never reset, so a third failure retires the endpoint for
    /// the rest of the run.
    pub fn try_recover(&self, endpoint: &str) -> bool {
        let mut records = self.lock_records();
        let Ok(record) = find_record(&mut records, endpoint) else {
            return false;
        };

        if record.status != ServiceStatus::Failed {
            return false;
        }
        if record.failure_count >= MAX_SERVICE_FAILURES {
            tracing::warn!(
                endpoint,
                failures = record.failure_count,
                "Service retired, not recovering"
            );
            return false;
        }

        record.status = ServiceStatus::Available;
        tracing::info!(endpoint, "Service recovered");
        true
    }

    /// Snapshot of every service's counters, in configuration order.
    pub fn stats(&self) -> Vec<ServiceStats> {
        self.lock_records()
            .iter()
            .map(|r| ServiceStats {
                endpoint: r.endpoint.clone(),
                status: r.status,
                failure_count: r.failure_count,
                batches_completed: r.batches_completed,
            })
            .collect()
    }
}

fn find_record<'a>(
    records: &'a mut [ServiceRecord],
    endpoint: &str,
) -> Result<&'a mut ServiceRecord, FetchError> {
    records
        .iter_mut()
        .find(|r| r.endpoint == endpoint)
        .ok_or_else(|| FetchError::InvalidTransition {
            endpoint: endpoint.to_string(),
            detail: "unknown endpoint".to_string(),
        })
}

/// Turns a bare `host:port` into a render URL; full URLs pass through.
fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}/render")
    }
}
