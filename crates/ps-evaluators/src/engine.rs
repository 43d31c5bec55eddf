//! The compiled search engine.
//!
//! CLI contract: `engine <taskFolder> <taskId> <depthLevel>`. On success the
//! first stdout line is the best cost and the second line the expression.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use ps_core::TaskRef;
use tokio::process::Command;

use crate::pipeline::Engine;
use crate::result::{EngineReport, StageResult};

const STAGE: &str = "engine";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the compiled engine binary
    pub binary: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("../build/engine"),
        }
    }
}

/// Runs the compiled engine binary.
#[derive(Debug, Clone, Default)]
pub struct EngineBinary {
    config: EngineConfig,
}

impl EngineBinary {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Engine for EngineBinary {
    async fn evaluate(&self, task: &TaskRef, depth: u32) -> StageResult {
        run(&self.config, task, depth).await
    }
}

/// Run the engine on a task with the given depth bound.
pub async fn run(config: &EngineConfig, task: &TaskRef, depth: u32) -> StageResult {
    let start = Instant::now();

    let result = Command::new(&config.binary)
        .arg(&task.folder)
        .arg(&task.id)
        .arg(depth.to_string())
        .kill_on_drop(true)
        .output()
        .await;

    let duration = start.elapsed();

    match result {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let combined = format!("{}\n{}", stdout, stderr);

            if !output.status.success() {
                let error = match output.status.code() {
                    Some(c) => format!("engine exited with code {}", c),
                    None => "engine terminated by signal".to_string(),
                };
                return StageResult::fail(STAGE, error, duration, combined);
            }

            match parse_engine_output(&stdout) {
                Ok(report) => StageResult::pass_with_report(STAGE, report, duration, combined),
                Err(e) => StageResult::fail(STAGE, e.to_string(), duration, combined),
            }
        }
        Err(e) => StageResult::fail(
            STAGE,
            format!("Failed to run {}: {}", config.binary.display(), e),
            duration,
            String::new(),
        ),
    }
}

/// Parse the engine's two-line report.
pub fn parse_engine_output(stdout: &str) -> Result<EngineReport, EngineOutputError> {
    let mut lines = stdout.lines();

    let cost_line = lines.next().map(str::trim).unwrap_or("");
    if cost_line.is_empty() {
        return Err(EngineOutputError::MissingCost);
    }
    let cost: f64 = cost_line
        .parse()
        .map_err(|_| EngineOutputError::InvalidCost(cost_line.to_string()))?;

    let expression = lines.next().map(str::trim).unwrap_or("").to_string();

    Ok(EngineReport { cost, expression })
}

/// Engine output errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineOutputError {
    #[error("Engine produced no cost line")]
    MissingCost,

    #[error("Engine cost is not a number: {0}")]
    InvalidCost(String),
}
