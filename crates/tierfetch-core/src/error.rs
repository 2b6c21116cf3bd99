use thiserror::Error;

/// Application-wide error types for tierfetch.
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP-level failure (bad status, unreadable body, malformed response).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Network/connection error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Malformed URL supplied by the caller.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// No rendering service became available before the acquire deadline.
    #[error("no rendering service became available within {0} seconds")]
    ServiceExhausted(u64),

    /// The remote render fallback did not complete before its deadline.
    #[error("remote render timed out after {0} seconds")]
    RemoteTimeout(u64),

    /// A service pool transition was requested from the wrong state.
    #[error("invalid service transition on {endpoint}: {detail}")]
    InvalidTransition { endpoint: String, detail: String },

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Bad or missing configuration. The only error fatal to a whole run.
    #[error("configuration error: {0}")]
    Config(String),
}

impl FetchError {
    /// Returns true if this error is a transport-level failure that the
    /// tiered pipeline recovers from by escalating, never by propagating.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FetchError::Http(_) | FetchError::Network(_) | FetchError::Timeout(_)
        )
    }
}
