//! Client for the paid remote rendering API (Decodo-style batch tasks).
//!
//! Usage pattern: submit every URL in one batch request, get back a task id
//! per URL, then poll each task until it produces rendered HTML or the wait
//! budget runs out. The batch response shape varies between API versions, so
//! parsing is defensive about where the task list and ids live.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::Value;
use tierfetch_core::config::FallbackConfig;
use tierfetch_core::error::FetchError;
use tierfetch_core::outcome::{FetchMethod, FetchOutcome};
use tierfetch_core::traits::FallbackRenderer;
use tokio::sync::Semaphore;

const INITIAL_POLL_DELAY: Duration = Duration::from_secs(2);
const MAX_POLL_DELAY: Duration = Duration::from_secs(10);
const POLL_BACKOFF_FACTOR: f64 = 1.5;

/// One submitted task: the API-assigned id and the URL it renders.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TaskRef {
    id: String,
    url: String,
}

/// Result of interpreting one poll response.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TaskPoll {
    /// Task not finished yet; poll again.
    Pending,
    /// Task finished, successfully or not.
    Completed {
        html: Option<String>,
        error: Option<String>,
    },
}

/// Extracts task references from a batch submission response.
///
/// Known shapes: `{"queries": [...]}`, `{"tasks": [...]}`, a bare task
/// array, or a single task object. Entries that do not echo their URL are
/// matched to the submitted URLs by position.
fn extract_task_entries(value: &Value, submitted: &[String]) -> Result<Vec<TaskRef>, FetchError> {
    let entries: Vec<&Value> = if let Some(list) = value.as_array() {
        list.iter().collect()
    } else if let Some(list) = value.get("queries").and_then(Value::as_array) {
        list.iter().collect()
    } else if let Some(list) = value.get("tasks").and_then(Value::as_array) {
        list.iter().collect()
    } else if value.is_object() && task_id_of(value).is_some() {
        vec![value]
    } else {
        return Err(FetchError::Http(format!(
            "unrecognized batch response shape: {}",
            truncate(&value.to_string(), 200)
        )));
    };

    let mut tasks = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let Some(id) = task_id_of(entry) else {
            return Err(FetchError::Http(format!(
                "batch response entry {index} has no task id"
            )));
        };
        let url = entry
            .get("url")
            .or_else(|| entry.get("query"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| submitted.get(index).cloned());
        let Some(url) = url else {
            return Err(FetchError::Http(format!(
                "batch response entry {index} matches no submitted URL"
            )));
        };
        tasks.push(TaskRef { id, url });
    }
    Ok(tasks)
}

fn task_id_of(entry: &Value) -> Option<String> {
    ["id", "task_id", "query_id"].iter().find_map(|key| {
        let v = entry.get(key)?;
        match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    })
}

/// Decides whether a poll response is terminal and what it carries.
///
/// 404 and 204 mean the task is not ready yet, as does a non-JSON or empty
/// body. Anything else is terminal: an explicit "done" status, a
/// `result`/`data` field, or any non-empty payload.
fn interpret_poll(status: u16, body: &str) -> TaskPoll {
    if status == 404 || status == 204 {
        return TaskPoll::Pending;
    }
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return TaskPoll::Pending;
    };

    if let Some(task_status) = value.get("status").and_then(Value::as_str) {
        match task_status {
            "pending" | "running" | "in_progress" | "queued" => return TaskPoll::Pending,
            "failed" | "faulted" | "error" => {
                return TaskPoll::Completed {
                    html: None,
                    error: Some(format!("task status {task_status}")),
                };
            }
            _ => {}
        }
    }

    let html = value
        .get("results")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .and_then(|first| first.get("content"))
        .or_else(|| value.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string);

    match html {
        Some(html) => TaskPoll::Completed {
            html: Some(html),
            error: None,
        },
        // A terminal response without content is a failure, not a retry.
        None if is_terminal(&value) => TaskPoll::Completed {
            html: None,
            error: Some("no content in completed task".to_string()),
        },
        None => TaskPoll::Pending,
    }
}

/// A task is finished once its status is "done", the body carries a
/// `result` or `data` field, or the body is any non-empty payload. Only
/// empty bodies mean the task is still running.
fn is_terminal(value: &Value) -> bool {
    if value.get("status").and_then(Value::as_str) == Some("done") {
        return true;
    }
    if value.get("result").is_some() || value.get("data").is_some() {
        return true;
    }
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(list) => !list.is_empty(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((index, _)) => &s[..index],
        None => s,
    }
}

/// Client for the remote batch rendering API.
#[derive(Clone, Debug)]
pub struct DecodoClient {
    client: Client,
    config: FallbackConfig,
}

impl DecodoClient {
    pub fn new(config: FallbackConfig) -> Result<Self, FetchError> {
        if config.username.is_empty() || config.password.is_empty() {
            return Err(FetchError::Config(
                "remote render credentials are not set".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn submit_batch(&self, urls: &[String]) -> Result<Vec<TaskRef>, FetchError> {
        let endpoint = format!("{}/v2/task/batch", self.config.base_url);
        let body = serde_json::json!({
            "url": urls,
            "target": "universal",
            "render_js": true,
            "device_type": "desktop",
        });

        tracing::info!(urls = urls.len(), "Submitting remote render batch");
        let response = self
            .client
            .post(&endpoint)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::Network(format!("batch submission failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http(format!(
                "remote render API returned HTTP {}",
                status.as_u16()
            )));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Http(format!("Failed to read batch response: {e}")))?;
        extract_task_entries(&value, urls)
    }

    /// Polls one task until it completes or the wait budget elapses.
    async fn poll_task(&self, task: TaskRef) -> FetchOutcome {
        let endpoint = format!("{}/v2/task/{}/results", self.config.base_url, task.id);
        let deadline = Instant::now() + self.config.max_wait;
        let mut delay = INITIAL_POLL_DELAY;

        loop {
            let poll = match self
                .client
                .get(&endpoint)
                .basic_auth(&self.config.username, Some(&self.config.password))
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status().as_u16();
                    match response.text().await {
                        Ok(body) => interpret_poll(status, &body),
                        Err(e) => {
                            tracing::debug!(task = %task.id, error = %e, "Poll body read failed");
                            TaskPoll::Pending
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(task = %task.id, error = %e, "Poll request failed");
                    TaskPoll::Pending
                }
            };

            match poll {
                TaskPoll::Completed {
                    html: Some(html), ..
                } => {
                    tracing::debug!(task = %task.id, url = %task.url, "Remote render complete");
                    return FetchOutcome::success(task.url, html, FetchMethod::Decodo);
                }
                TaskPoll::Completed { error, .. } => {
                    let message = error.unwrap_or_else(|| "remote render failed".to_string());
                    tracing::warn!(task = %task.id, url = %task.url, error = %message, "Remote render failed");
                    return FetchOutcome::failed_via(task.url, FetchMethod::Decodo, message);
                }
                TaskPoll::Pending => {}
            }

            if Instant::now() + delay > deadline {
                let waited = self.config.max_wait.as_secs();
                tracing::warn!(task = %task.id, url = %task.url, waited_secs = waited, "Remote render timed out");
                return FetchOutcome::failed_via(
                    task.url,
                    FetchMethod::Decodo,
                    FetchError::RemoteTimeout(waited).to_string(),
                );
            }
            tokio::time::sleep(delay).await;
            delay = delay.mul_f64(POLL_BACKOFF_FACTOR).min(MAX_POLL_DELAY);
        }
    }
}

impl FallbackRenderer for DecodoClient {
    async fn render_all(&self, urls: &[String]) -> Result<Vec<FetchOutcome>, FetchError> {
        if urls.is_empty() {
            return Ok(vec![]);
        }

        let tasks = self.submit_batch(urls).await?;
        let semaphore = Arc::new(Semaphore::new(self.config.poll_concurrency.max(1)));

        let polls = tasks.into_iter().map(|task| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                // The semaphore outlives every poll, so acquire cannot fail.
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                self.poll_task(task).await
            }
        });

        Ok(futures::future::join_all(polls).await)
    }
}
