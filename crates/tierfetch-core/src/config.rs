//! Explicit configuration for every component. No ambient globals: each
//! value is constructed by the caller and passed into the constructors.

use std::time::Duration;

/// Thresholds for the skeleton/blocked content classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Minimum total content length in bytes.
    pub min_content_length: usize,

    /// Minimum visible text length in characters.
    pub min_text_length: usize,

    /// Minimum number of meaningful elements (text blocks, images, links).
    pub min_meaningful_elements: usize,

    /// Minimum ratio of visible text to HTML markup.
    pub text_to_markup_ratio: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_content_length: 1000,
            min_text_length: 200,
            min_meaningful_elements: 5,
            text_to_markup_ratio: 0.001,
        }
    }
}

/// Configuration for the static/XHR pipeline tier.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum concurrent static/XHR fetches. Sized for network I/O.
    pub concurrency: usize,

    /// Per-request timeout for static and XHR fetches.
    pub timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 50,
            timeout: Duration::from_secs(30),
        }
    }
}

impl PipelineConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Configuration for the JS rendering service pool and batch dispatch.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Rendering service endpoints. Entries without a scheme are
    /// normalized to `https://{endpoint}/render`.
    pub endpoints: Vec<String>,

    /// URLs per batch sent to one service in a single call.
    pub batch_size: usize,

    /// Mandatory idle period after a service completes a batch.
    pub cooldown: Duration,

    /// How long a dispatch worker waits for a free service before it
    /// marks the batch failed.
    pub acquire_timeout: Duration,

    /// Interval between availability checks while waiting for a service.
    pub poll_interval: Duration,

    /// Timeout for one batched render request.
    pub render_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            batch_size: 20,
            cooldown: Duration::from_secs(120),
            acquire_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
            render_timeout: Duration::from_secs(300),
        }
    }
}

impl PoolConfig {
    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Configuration for the paid remote rendering fallback.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub enabled: bool,

    /// API base, e.g. `https://scraper-api.decodo.com`.
    pub base_url: String,

    pub username: String,
    pub password: String,

    /// Maximum total wait per submitted task before it is marked failed.
    pub max_wait: Duration,

    /// Maximum concurrently polled tasks.
    pub poll_concurrency: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://scraper-api.decodo.com".to_string(),
            username: String::new(),
            password: String::new(),
            max_wait: Duration::from_secs(180),
            poll_concurrency: 3,
        }
    }
}

impl FallbackConfig {
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self.enabled = true;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

/// Top-level configuration for one batch run, assembled by the caller.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub pipeline: PipelineConfig,
    pub pool: PoolConfig,
    pub fallback: FallbackConfig,
    pub classifier: ClassifierConfig,

    /// Global deadline for the whole batch. Work still outstanding when it
    /// elapses is abandoned; those URLs are reported failed with "timeout".
    pub deadline: Option<Duration>,
}

impl EngineConfig {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.pipeline.concurrency, 50);
        assert_eq!(config.pool.batch_size, 20);
        assert_eq!(config.pool.cooldown, Duration::from_secs(120));
        assert_eq!(config.pool.acquire_timeout, Duration::from_secs(300));
        assert_eq!(config.pool.poll_interval, Duration::from_millis(500));
        assert_eq!(config.classifier.min_content_length, 1000);
        assert_eq!(config.classifier.min_text_length, 200);
        assert_eq!(config.classifier.min_meaningful_elements, 5);
        assert_eq!(config.fallback.max_wait, Duration::from_secs(180));
        assert!(!config.fallback.enabled);
        assert!(config.deadline.is_none());
    }

    #[test]
    fn credentials_enable_fallback() {
        let config = FallbackConfig::default().with_credentials("user", "pass");
        assert!(config.enabled);
        assert_eq!(config.username, "user");
    }
}
