//! Refinement loop controller.
//!
//! Each iteration runs
//! `BUILD_PROMPT → INVOKE_MODEL → PARSE_RESPONSE → GENERATE_MODULE →
//! EXTERNAL_BUILD → EXTERNAL_EVALUATE → DECIDE`.
//! Any failure along the way ends the iteration and the next one starts
//! from a fresh prompt, with the last engine result as feedback. The loop
//! stops when the engine reports a cost of exactly zero, when a configured
//! budget runs out, or when it is cancelled.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use ps_core::{Catalogue, Task, TaskRef};
use ps_evaluators::{EngineReport, Pipeline, Stage};
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactStore;
use crate::client::{ClientError, ModelClient, DEFAULT_MODEL};
use crate::codegen::{EngineTemplate, ModuleGenerator, ModuleLayout};
use crate::prompt::{Feedback, PromptBuilder};
use crate::response::parse_response;

/// Loop configuration.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Model identifier passed to the client
    pub model: String,
    /// Maximum iterations (None = unbounded)
    pub max_iterations: Option<u32>,
    /// Wall-clock budget checked between iterations (None = unbounded)
    pub time_budget: Option<Duration>,
    /// Timeout for one model call (None = unbounded)
    pub model_timeout: Option<Duration>,
    /// Directory for prompt/output artifacts
    pub artifact_dir: PathBuf,
    /// Iteration records kept in the outcome; older ones are dropped
    pub history_limit: usize,
}

/// Records kept by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 64;

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_iterations: None,
            time_budget: None,
            model_timeout: None,
            artifact_dir: PathBuf::from("."),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl LoopConfig {
    /// At most `max_iterations` iterations.
    pub fn bounded(max_iterations: u32) -> Self {
        Self {
            max_iterations: Some(max_iterations),
            ..Default::default()
        }
    }
}

/// Mutable state of one task run.
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    /// Most recent engine cost, unset until the first evaluation
    pub best_cost: Option<f64>,
    /// Most recent engine expression
    pub best_expression: String,
    /// Iterations started
    pub iteration: u32,
    /// Model invocations made
    pub model_calls: u32,
}

impl LoopState {
    /// Feedback for the next prompt, once a non-zero cost is known.
    pub fn feedback(&self) -> Option<Feedback> {
        self.best_cost
            .filter(|cost| *cost != 0.0)
            .map(|cost| Feedback::new(cost, self.best_expression.clone()))
    }

    /// Overwrite with the latest engine report.
    pub fn record(&mut self, report: &EngineReport) {
        self.best_cost = Some(report.cost);
        self.best_expression = report.expression.clone();
    }
}

/// Loop states, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BuildPrompt,
    InvokeModel,
    ParseResponse,
    GenerateModule,
    ExternalBuild,
    ExternalEvaluate,
    Decide,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::BuildPrompt => "BUILD_PROMPT",
            Phase::InvokeModel => "INVOKE_MODEL",
            Phase::ParseResponse => "PARSE_RESPONSE",
            Phase::GenerateModule => "GENERATE_MODULE",
            Phase::ExternalBuild => "EXTERNAL_BUILD",
            Phase::ExternalEvaluate => "EXTERNAL_EVALUATE",
            Phase::Decide => "DECIDE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How one iteration ended.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    ModelFailed(String),
    ParseFailed(String),
    WriteFailed(String),
    BuildFailed(String),
    EngineFailed(String),
    Evaluated { cost: f64, expression: String },
    Cancelled,
}

impl IterationOutcome {
    /// Phase the iteration ended in.
    pub fn phase(&self) -> Phase {
        match self {
            IterationOutcome::ModelFailed(_) => Phase::InvokeModel,
            IterationOutcome::ParseFailed(_) => Phase::ParseResponse,
            IterationOutcome::WriteFailed(_) => Phase::GenerateModule,
            IterationOutcome::BuildFailed(_) => Phase::ExternalBuild,
            IterationOutcome::EngineFailed(_) => Phase::ExternalEvaluate,
            IterationOutcome::Evaluated { .. } | IterationOutcome::Cancelled => Phase::Decide,
        }
    }

    pub fn is_solved(&self) -> bool {
        matches!(self, IterationOutcome::Evaluated { cost, .. } if *cost == 0.0)
    }
}

impl fmt::Display for IterationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationOutcome::ModelFailed(e) => write!(f, "model failed - {}", e),
            IterationOutcome::ParseFailed(e) => write!(f, "response rejected - {}", e),
            IterationOutcome::WriteFailed(e) => write!(f, "module write failed - {}", e),
            IterationOutcome::BuildFailed(e) => write!(f, "build failed - {}", e),
            IterationOutcome::EngineFailed(e) => write!(f, "engine failed - {}", e),
            IterationOutcome::Evaluated { cost, expression } => {
                write!(f, "cost {:?}, expression {}", cost, expression)
            }
            IterationOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Record of one iteration.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    /// Iteration number (1-indexed)
    pub iteration: u32,
    pub outcome: IterationOutcome,
    pub duration: Duration,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// The engine reported a zero cost
    Solved,
    /// Iteration cap or time budget reached
    Exhausted,
    /// Cancelled by the caller
    Cancelled,
}

/// Result of one task run.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub task: TaskRef,
    pub status: LoopStatus,
    pub iterations: u32,
    pub model_calls: u32,
    pub best_cost: Option<f64>,
    pub best_expression: String,
    /// The most recent iterations, at most `history_limit` of them
    pub history: Vec<IterationRecord>,
    pub duration: Duration,
}

impl LoopOutcome {
    pub fn is_solved(&self) -> bool {
        self.status == LoopStatus::Solved
    }

    /// Format as a summary string.
    pub fn format_summary(&self) -> String {
        let status = match self.status {
            LoopStatus::Solved => "SOLVED",
            LoopStatus::Exhausted => "EXHAUSTED",
            LoopStatus::Cancelled => "CANCELLED",
        };
        let mut summary = format!(
            "[{}] {} in {:.2}s\n",
            status,
            self.task,
            self.duration.as_secs_f64()
        );

        summary.push_str(&format!("  Iterations: {}\n", self.iterations));
        summary.push_str(&format!("  Model calls: {}\n", self.model_calls));
        match self.best_cost {
            Some(cost) => {
                summary.push_str(&format!("  Best cost: {:?}\n", cost));
                summary.push_str(&format!("  Expression: {}\n", self.best_expression));
            }
            None => summary.push_str("  No engine result\n"),
        }

        if !self.is_solved() {
            for record in &self.history {
                summary.push_str(&format!(
                    "  #{} ({:.2}s): {}\n",
                    record.iteration,
                    record.duration.as_secs_f64(),
                    record.outcome
                ));
            }
        }

        summary
    }
}

/// Drives the model → module → build → engine cycle for one task at a time.
pub struct RefinementLoop {
    client: Box<dyn ModelClient>,
    pipeline: Pipeline,
    generator: ModuleGenerator,
    layout: ModuleLayout,
    config: LoopConfig,
    cancel: CancellationToken,
}

impl RefinementLoop {
    pub fn new(
        client: Box<dyn ModelClient>,
        pipeline: Pipeline,
        layout: ModuleLayout,
        config: LoopConfig,
    ) -> Self {
        Self {
            client,
            pipeline,
            generator: ModuleGenerator::default(),
            layout,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` to abort runs.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run the loop for one task until it is solved, exhausted or cancelled.
    ///
    /// Only an unreadable engine template is an error; every per-iteration
    /// failure is recorded and retried.
    pub async fn run(
        &self,
        task_ref: &TaskRef,
        task: &Task,
        catalogue: &Catalogue,
    ) -> Result<LoopOutcome, LoopError> {
        let start = Instant::now();
        let template = EngineTemplate::load(&self.layout)
            .await
            .map_err(|(path, source)| LoopError::Template { path, source })?;
        let artifacts = ArtifactStore::new(&self.config.artifact_dir);

        tracing::info!(
            task = %task_ref,
            primitives = catalogue.len(),
            model = %self.config.model,
            "starting refinement loop"
        );

        let mut state = LoopState::default();
        let mut history = VecDeque::new();

        let status = loop {
            if self.cancel.is_cancelled() {
                break LoopStatus::Cancelled;
            }
            if let Some(max) = self.config.max_iterations {
                if state.iteration >= max {
                    tracing::info!(task = %task_ref, max, "iteration cap reached");
                    break LoopStatus::Exhausted;
                }
            }
            if let Some(budget) = self.config.time_budget {
                if start.elapsed() >= budget {
                    tracing::info!(task = %task_ref, budget_secs = budget.as_secs(), "time budget spent");
                    break LoopStatus::Exhausted;
                }
            }

            state.iteration += 1;
            let iteration_start = Instant::now();
            let outcome = self
                .iterate(task_ref, task, catalogue, &template, &artifacts, &mut state)
                .await;

            match outcome {
                IterationOutcome::Evaluated { cost, ref expression } => tracing::info!(
                    task = %task_ref,
                    iteration = state.iteration,
                    cost,
                    expression = %expression,
                    "engine result"
                ),
                IterationOutcome::Cancelled => {}
                ref failure => tracing::warn!(
                    task = %task_ref,
                    iteration = state.iteration,
                    phase = %failure.phase(),
                    "iteration failed: {}",
                    failure
                ),
            }

            let solved = outcome.is_solved();
            let cancelled = outcome == IterationOutcome::Cancelled;
            history.push_back(IterationRecord {
                iteration: state.iteration,
                outcome,
                duration: iteration_start.elapsed(),
            });
            if history.len() > self.config.history_limit {
                history.pop_front();
            }

            if solved {
                break LoopStatus::Solved;
            }
            if cancelled {
                break LoopStatus::Cancelled;
            }
        };

        let outcome = LoopOutcome {
            task: task_ref.clone(),
            status,
            iterations: state.iteration,
            model_calls: state.model_calls,
            best_cost: state.best_cost,
            best_expression: state.best_expression,
            history: history.into(),
            duration: start.elapsed(),
        };

        tracing::info!(
            task = %task_ref,
            status = ?outcome.status,
            iterations = outcome.iterations,
            "refinement loop finished"
        );

        Ok(outcome)
    }

    async fn iterate(
        &self,
        task_ref: &TaskRef,
        task: &Task,
        catalogue: &Catalogue,
        template: &EngineTemplate,
        artifacts: &ArtifactStore,
        state: &mut LoopState,
    ) -> IterationOutcome {
        self.enter(Phase::BuildPrompt, state.iteration);
        let prompt = PromptBuilder::build_prompt(task, catalogue, state.feedback().as_ref());
        if let Err(e) = artifacts.write_prompt(&task_ref.id, &prompt).await {
            tracing::warn!(error = %e, "failed to persist prompt");
        }

        if self.cancel.is_cancelled() {
            return IterationOutcome::Cancelled;
        }
        self.enter(Phase::InvokeModel, state.iteration);
        state.model_calls += 1;
        let text = tokio::select! {
            result = self.complete(&prompt) => match result {
                Ok(text) => text,
                Err(e) => return IterationOutcome::ModelFailed(e.to_string()),
            },
            _ = self.cancel.cancelled() => return IterationOutcome::Cancelled,
        };
        if let Err(e) = artifacts.write_output(&task_ref.id, &text).await {
            tracing::warn!(error = %e, "failed to persist model output");
        }

        self.enter(Phase::ParseResponse, state.iteration);
        let response = match parse_response(&text, catalogue) {
            Ok(response) => response,
            Err(e) => return IterationOutcome::ParseFailed(e.to_string()),
        };

        if self.cancel.is_cancelled() {
            return IterationOutcome::Cancelled;
        }
        self.enter(Phase::GenerateModule, state.iteration);
        let module = self.generator.render(catalogue, &response, template);
        if let Err(e) = module.write(&self.layout).await {
            return IterationOutcome::WriteFailed(e.to_string());
        }
        tracing::debug!(
            registrations = module.registrations.len(),
            deferred = module.deferred.len(),
            depth = response.depth,
            "module written"
        );

        self.enter(Phase::ExternalBuild, state.iteration);
        let result = self.pipeline.run(task_ref, response.depth, &self.cancel).await;
        if result.cancelled {
            return IterationOutcome::Cancelled;
        }
        if let Some(failure) = result.first_failure {
            let error = failure.error.unwrap_or_else(|| "unknown".to_string());
            return if failure.stage == Stage::Build.name() {
                IterationOutcome::BuildFailed(error)
            } else {
                IterationOutcome::EngineFailed(error)
            };
        }
        let Some(report) = result.report else {
            return IterationOutcome::EngineFailed("no engine report".to_string());
        };

        self.enter(Phase::Decide, state.iteration);
        state.record(&report);
        IterationOutcome::Evaluated {
            cost: report.cost,
            expression: report.expression,
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, ClientError> {
        let call = self.client.complete(&self.config.model, prompt);
        match self.config.model_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(ClientError::Timeout(limit))),
            None => call.await,
        }
    }

    fn enter(&self, phase: Phase, iteration: u32) {
        tracing::debug!(iteration, phase = %phase, "entering phase");
    }
}

/// Fatal controller errors.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("Failed to read engine template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
