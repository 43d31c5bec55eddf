//! Task data fetch.
//!
//! Tasks are JSON documents served from `<base_url>/<folder>/<task>.json`.
//! A fetch failure is fatal for that task and is not retried here.

use ps_core::{Task, TaskRef};

/// Public ARC-AGI-2 data directory.
pub const DEFAULT_BASE_URL: &str =
    "https://raw.githubusercontent.com/arcprize/ARC-AGI-2/refs/heads/main/data";

/// Fetches task documents over HTTP.
#[derive(Debug, Clone)]
pub struct TaskFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl Default for TaskFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl TaskFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// URL of a task document.
    pub fn task_url(&self, task: &TaskRef) -> String {
        format!(
            "{}/{}/{}.json",
            self.base_url.trim_end_matches('/'),
            task.folder,
            task.id
        )
    }

    /// Fetch and decode a task document.
    pub async fn fetch(&self, task: &TaskRef) -> Result<Task, FetchError> {
        let url = self.task_url(task);
        tracing::info!(%task, url = %url, "fetching task");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let task = Task::from_json(&body).map_err(|source| FetchError::Decode { url, source })?;
        tracing::debug!(train = task.train.len(), test = task.test.len(), "task fetched");
        Ok(task)
    }
}

/// Task fetch errors.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Task request {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Task document {url} is not valid: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}
