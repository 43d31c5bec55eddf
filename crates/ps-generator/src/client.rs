//! Text model clients.
//!
//! The model is an opaque `(model, prompt) -> text` function. The default
//! client shells out to a local runner (`ollama run <model> <prompt>`);
//! [`ReplayClient`] serves a previously persisted response instead.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// Model used when neither configuration nor `PS_MODEL` names one.
pub const DEFAULT_MODEL: &str = "gpt-oss:20b";

/// An opaque text-in/text-out model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Complete `prompt` with `model`, returning the raw output text.
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, ClientError>;
}

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Runner binary
    pub binary: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            binary: "ollama".to_string(),
        }
    }
}

/// Invokes a local model runner as a subprocess.
#[derive(Debug, Clone, Default)]
pub struct OllamaClient {
    config: ClientConfig,
}

impl OllamaClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, ClientError> {
        let output = Command::new(&self.config.binary)
            .args(["run", model, prompt])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ClientError::Spawn {
                binary: self.config.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ClientError::Exit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Serves a persisted model output instead of calling a model.
#[derive(Debug, Clone)]
pub struct ReplayClient {
    path: PathBuf,
}

impl ReplayClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ModelClient for ReplayClient {
    async fn complete(&self, _model: &str, _prompt: &str) -> Result<String, ClientError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ClientError::Replay {
                path: self.path.display().to_string(),
                source,
            })
    }
}

/// Model client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to start model runner {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Model runner exited with code {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to read replayed output {path}: {source}")]
    Replay {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
