pub mod aggregate;
pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod outcome;
pub mod pipeline;
pub mod pool;
pub mod testutil;
pub mod traits;

pub use aggregate::{BatchSummary, ResultAggregator};
pub use classifier::{Classifier, Verdict};
pub use config::EngineConfig;
pub use dispatch::BatchDispatcher;
pub use engine::{BatchReport, FetchEngine};
pub use error::FetchError;
pub use outcome::{FetchMethod, FetchOutcome, FetchStatus, RenderResult};
pub use pipeline::{TierOutcome, UrlPipeline};
pub use pool::{RenderPool, ServiceLease, ServiceStatus};
pub use traits::{FallbackRenderer, FetchedPage, RenderService, StaticFetch, XhrFetch};
