use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Fetch tier that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    Static,
    Xhr,
    CustomJs,
    Decodo,
}

impl FetchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMethod::Static => "static",
            FetchMethod::Xhr => "xhr",
            FetchMethod::CustomJs => "custom_js",
            FetchMethod::Decodo => "decodo",
        }
    }
}

impl fmt::Display for FetchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FetchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(FetchMethod::Static),
            "xhr" => Ok(FetchMethod::Xhr),
            "custom_js" => Ok(FetchMethod::CustomJs),
            "decodo" => Ok(FetchMethod::Decodo),
            _ => Err(format!("Unknown fetch method: {s}")),
        }
    }
}

/// Terminal status of a single URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Failed,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Final result for one URL. Produced once per URL per tier; a later tier
/// may replace an earlier failed outcome with a success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub url: String,
    pub html: Option<String>,
    pub method: Option<FetchMethod>,
    pub status: FetchStatus,
    pub error: Option<String>,
}

impl FetchOutcome {
    pub fn success(url: impl Into<String>, html: impl Into<String>, method: FetchMethod) -> Self {
        Self {
            url: url.into(),
            html: Some(html.into()),
            method: Some(method),
            status: FetchStatus::Success,
            error: None,
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: None,
            method: None,
            status: FetchStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn failed_via(
        url: impl Into<String>,
        method: FetchMethod,
        error: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            html: None,
            method: Some(method),
            status: FetchStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success && self.html.is_some()
    }
}

/// One page as returned by a JS rendering service, before it is mapped
/// into a [`FetchOutcome`]. `html` is present only on remote success.
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub url: String,
    pub html: Option<String>,
    pub error: Option<String>,
}
