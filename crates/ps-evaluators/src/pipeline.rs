//! Build → evaluate pipeline orchestration.
//!
//! Runs the external stages in order, stopping at the first failure.
//! Each stage is bounded by an optional timeout and raced against a
//! cancellation token; expiry and cancellation are reported as stage
//! failures so the caller can treat them like a non-zero exit.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use ps_core::TaskRef;
use tokio_util::sync::CancellationToken;

use crate::build::{BuildConfig, ContainerBuilder};
use crate::engine::{EngineBinary, EngineConfig};
use crate::result::{PipelineResult, StageResult};

/// Builds the artifact the engine runs.
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self) -> StageResult;
}

/// Evaluates a task at a depth bound with the built artifact.
///
/// A passing result carries the [`EngineReport`](crate::EngineReport).
#[async_trait]
pub trait Engine: Send + Sync {
    async fn evaluate(&self, task: &TaskRef, depth: u32) -> StageResult;
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Containerized build of the engine target
    Build,
    /// Engine run on the task
    Evaluate,
}

impl Stage {
    /// Name used in stage results.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Build => "build",
            Stage::Evaluate => "engine",
        }
    }
}

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Timeout for the build stage (None = unbounded)
    pub build_timeout: Option<Duration>,
    /// Timeout for the evaluate stage (None = unbounded)
    pub engine_timeout: Option<Duration>,
    /// Skip evaluation when the build fails
    pub fail_fast: bool,
    /// Build settings for the default builder
    pub build: BuildConfig,
    /// Engine settings for the default engine
    pub engine: EngineConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            build_timeout: None,
            engine_timeout: None,
            fail_fast: true,
            build: BuildConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// The build → evaluate pipeline.
pub struct Pipeline {
    builder: Box<dyn Builder>,
    engine: Box<dyn Engine>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline from explicit collaborators.
    pub fn new(builder: Box<dyn Builder>, engine: Box<dyn Engine>, config: PipelineConfig) -> Self {
        Self {
            builder,
            engine,
            config,
        }
    }

    /// Create the container build + engine binary pipeline.
    pub fn from_config(config: PipelineConfig) -> Self {
        let builder = ContainerBuilder::new(config.build.clone());
        let engine = EngineBinary::new(config.engine.clone());
        Self::new(Box::new(builder), Box::new(engine), config)
    }

    /// Build, then evaluate `task` with the given depth bound.
    pub async fn run(&self, task: &TaskRef, depth: u32, cancel: &CancellationToken) -> PipelineResult {
        let mut results = Vec::new();

        for stage in [Stage::Build, Stage::Evaluate] {
            if cancel.is_cancelled() {
                return PipelineResult::aborted(results);
            }

            let result = match stage {
                Stage::Build => {
                    bounded(stage, self.config.build_timeout, cancel, self.builder.build()).await
                }
                Stage::Evaluate => {
                    bounded(
                        stage,
                        self.config.engine_timeout,
                        cancel,
                        self.engine.evaluate(task, depth),
                    )
                    .await
                }
            };

            let failed = !result.passed;
            if failed {
                tracing::warn!(
                    stage = stage.name(),
                    error = result.error.as_deref().unwrap_or("unknown"),
                    output = %tail(&result.output, 40),
                    "pipeline stage failed"
                );
            } else {
                tracing::debug!(stage = stage.name(), duration_ms = result.duration.as_millis() as u64, "pipeline stage passed");
            }
            results.push(result);

            if cancel.is_cancelled() {
                return PipelineResult::aborted(results);
            }
            if failed && self.config.fail_fast {
                break;
            }
        }

        PipelineResult::from_results(results)
    }

    /// Get the current config.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

/// Run a stage future under an optional timeout, racing cancellation.
///
/// Dropping the stage future terminates any child process it spawned.
async fn bounded<F>(
    stage: Stage,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    future: F,
) -> StageResult
where
    F: std::future::Future<Output = StageResult>,
{
    let start = Instant::now();

    let timed = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, future).await.map_err(|_| limit),
            None => Ok(future.await),
        }
    };

    tokio::select! {
        outcome = timed => match outcome {
            Ok(result) => result,
            Err(limit) => StageResult::fail(
                stage.name(),
                format!("Timeout after {:?}", limit),
                start.elapsed(),
                String::new(),
            ),
        },
        _ = cancel.cancelled() => StageResult::fail(
            stage.name(),
            "Cancelled",
            start.elapsed(),
            String::new(),
        ),
    }
}

/// Last `lines` lines of captured output, for logging.
pub fn tail(output: &str, lines: usize) -> String {
    let all: Vec<&str> = output.lines().collect();
    let from = all.len().saturating_sub(lines);
    all[from..].join("\n")
}
