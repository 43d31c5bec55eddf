//! Refinement loop scenarios with scripted model, build and engine.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ps_core::{Catalogue, Example, Task, TaskRef};
use ps_evaluators::{Builder, Engine, EngineReport, Pipeline, PipelineConfig, StageResult};
use ps_generator::{
    ClientError, IterationOutcome, LoopConfig, LoopError, LoopStatus, ModelClient, ModuleLayout,
    RefinementLoop,
};
use tokio_util::sync::CancellationToken;

const CATALOGUE: &str = r#"
/// Annotated primitives
///std::vector<Eigen::MatrixXi> flipud(std::vector<Eigen::MatrixXi> arg0); // Flip up and down rows
///std::vector<Eigen::MatrixXi> fliplr(std::vector<Eigen::MatrixXi> arg0); // Flip left and right columns
///std::vector<Eigen::MatrixXi> recolor(std::vector<Eigen::MatrixXi> arg0, int arg1, int arg2); // Replace a color
"#;

const VALID: &str = r#"Thinking...
SELECTED_PRIMITIVES:
std::vector<Eigen::MatrixXi> flipud(std::vector<Eigen::MatrixXi> arg0);
std::vector<Eigen::MatrixXi> fliplr(std::vector<Eigen::MatrixXi> arg0);

PARTIAL_PARAMETERIZATIONS:
std::vector<Eigen::MatrixXi> recolor_12(std::vector<Eigen::MatrixXi> arg0) { return recolor(arg0, 1, 2); }

DEPTH_LEVEL: 2
"#;

const MISSING_PARTIAL: &str = r#"
SELECTED_PRIMITIVES:
std::vector<Eigen::MatrixXi> flipud(std::vector<Eigen::MatrixXi> arg0);
DEPTH_LEVEL: 2
"#;

struct ScriptedModel {
    script: Mutex<VecDeque<Option<String>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    delay: Duration,
}

impl ScriptedModel {
    /// `None` entries fail the call. The last entry repeats.
    fn new(script: Vec<Option<&str>>) -> (Self, Arc<Mutex<Vec<String>>>) {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let model = Self {
            script: Mutex::new(script.into_iter().map(|s| s.map(str::to_string)).collect()),
            prompts: prompts.clone(),
            delay: Duration::ZERO,
        };
        (model, prompts)
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, _model: &str, prompt: &str) -> Result<String, ClientError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().flatten()
            } else {
                script.front().cloned().flatten()
            }
        };
        tokio::time::sleep(self.delay).await;
        next.ok_or(ClientError::Exit {
            code: Some(1),
            stderr: "model unavailable".to_string(),
        })
    }
}

struct ScriptedBuilder {
    passes: bool,
    calls: Arc<Mutex<u32>>,
}

#[async_trait]
impl Builder for ScriptedBuilder {
    async fn build(&self) -> StageResult {
        *self.calls.lock().unwrap() += 1;
        if self.passes {
            StageResult::pass("build", Duration::ZERO)
        } else {
            StageResult::fail(
                "build",
                "partials.h:12: error: 'recolor_12' was not declared",
                Duration::ZERO,
                String::new(),
            )
        }
    }
}

struct ScriptedEngine {
    reports: Mutex<VecDeque<(f64, &'static str)>>,
    depths: Arc<Mutex<Vec<u32>>>,
    /// Evaluations that exit non-zero before reports are served
    failures: Mutex<u32>,
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn evaluate(&self, _task: &TaskRef, depth: u32) -> StageResult {
        self.depths.lock().unwrap().push(depth);
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return StageResult::fail(
                    "engine",
                    "engine exited with code 3",
                    Duration::ZERO,
                    String::new(),
                );
            }
        }
        let (cost, expression) = {
            let mut reports = self.reports.lock().unwrap();
            if reports.len() > 1 {
                reports.pop_front()
            } else {
                reports.front().copied()
            }
        }
        .unwrap_or((1.0, "input"));
        StageResult::pass_with_report(
            "engine",
            EngineReport::new(cost, expression),
            Duration::ZERO,
            format!("{}\n{}\n", cost, expression),
        )
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    layout: ModuleLayout,
    artifact_dir: std::path::PathBuf,
    builds: Arc<Mutex<u32>>,
    depths: Arc<Mutex<Vec<u32>>>,
    engine_failures: u32,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let layout = ModuleLayout::rooted(dir.path());
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(&layout.prologue, "int main() {\n    std::vector<Neuron> neurons;\n").unwrap();
    std::fs::write(&layout.epilogue, "    return run(neurons);\n}\n").unwrap();
    let artifact_dir = dir.path().join("scripts");
    Harness {
        _dir: dir,
        layout,
        artifact_dir,
        builds: Arc::new(Mutex::new(0)),
        depths: Arc::new(Mutex::new(Vec::new())),
        engine_failures: 0,
    }
}

impl Harness {
    fn refinement(
        &self,
        model: ScriptedModel,
        build_passes: bool,
        reports: Vec<(f64, &'static str)>,
        config: LoopConfig,
    ) -> RefinementLoop {
        let pipeline = Pipeline::new(
            Box::new(ScriptedBuilder {
                passes: build_passes,
                calls: self.builds.clone(),
            }),
            Box::new(ScriptedEngine {
                reports: Mutex::new(reports.into()),
                depths: self.depths.clone(),
                failures: Mutex::new(self.engine_failures),
            }),
            PipelineConfig::default(),
        );
        let config = LoopConfig {
            artifact_dir: self.artifact_dir.clone(),
            ..config
        };
        RefinementLoop::new(Box::new(model), pipeline, self.layout.clone(), config)
    }
}

fn task() -> (TaskRef, Task) {
    let task = Task {
        train: vec![Example {
            input: vec![vec![2, 2, 1], vec![2, 1, 2], vec![2, 8, 1]],
            output: vec![vec![1, 8, 2], vec![2, 1, 2], vec![1, 2, 2]],
        }],
        test: vec![],
    };
    (TaskRef::new("training", "3c9b0459"), task)
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[tokio::test]
async fn test_terminates_after_zero_cost() {
    let h = harness();
    let (model, prompts) = ScriptedModel::new(vec![Some(VALID)]);
    let refinement = h.refinement(
        model,
        true,
        vec![(0.0, "flipud(flip(input))")],
        LoopConfig::bounded(10),
    );
    let (task_ref, task) = task();

    let outcome = refinement
        .run(&task_ref, &task, &Catalogue::parse(CATALOGUE))
        .await
        .unwrap();

    assert_eq!(outcome.status, LoopStatus::Solved);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.model_calls, 1);
    assert_eq!(outcome.best_cost, Some(0.0));
    assert_eq!(outcome.best_expression, "flipud(flip(input))");
    assert_eq!(prompts.lock().unwrap().len(), 1);
    assert_eq!(*h.depths.lock().unwrap(), vec![2]);
}

#[tokio::test]
async fn test_retries_after_missing_marker() {
    let h = harness();
    let (model, prompts) = ScriptedModel::new(vec![Some(MISSING_PARTIAL), Some(VALID)]);
    let refinement = h.refinement(
        model,
        true,
        vec![(0.0, "flipud(flip(input))")],
        LoopConfig::bounded(10),
    );
    let (task_ref, task) = task();

    let outcome = refinement
        .run(&task_ref, &task, &Catalogue::parse(CATALOGUE))
        .await
        .unwrap();

    assert_eq!(outcome.status, LoopStatus::Solved);
    assert_eq!(outcome.model_calls, 2);
    assert_eq!(prompts.lock().unwrap().len(), 2);
    assert!(matches!(
        outcome.history[0].outcome,
        IterationOutcome::ParseFailed(_)
    ));
    // The failed parse never reached the build.
    assert_eq!(*h.builds.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_engine_result_fed_back_into_prompt() {
    let h = harness();
    let (model, prompts) = ScriptedModel::new(vec![Some(VALID)]);
    let refinement = h.refinement(
        model,
        true,
        vec![(3.0, "flip(input)"), (0.0, "flipud(fliplr(input))")],
        LoopConfig::bounded(10),
    );
    let (task_ref, task) = task();

    let outcome = refinement
        .run(&task_ref, &task, &Catalogue::parse(CATALOGUE))
        .await
        .unwrap();

    assert_eq!(outcome.status, LoopStatus::Solved);
    assert_eq!(outcome.iterations, 2);

    let prompts = prompts.lock().unwrap();
    assert!(!prompts[0].contains("best found connection"));
    assert!(prompts[1].contains(
        "The best found connection from the engine has a cost of 3.0 and its expression is: flip(input)."
    ));
}

#[tokio::test]
async fn test_build_failures_exhaust_bounded_loop() {
    let h = harness();
    let (model, _) = ScriptedModel::new(vec![Some(VALID)]);
    let refinement = h.refinement(model, false, vec![(0.0, "x")], LoopConfig::bounded(2));
    let (task_ref, task) = task();

    let outcome = refinement
        .run(&task_ref, &task, &Catalogue::parse(CATALOGUE))
        .await
        .unwrap();

    assert_eq!(outcome.status, LoopStatus::Exhausted);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.best_cost, None);
    assert!(h.depths.lock().unwrap().is_empty());
    assert!(outcome
        .history
        .iter()
        .all(|r| matches!(r.outcome, IterationOutcome::BuildFailed(ref e) if e.contains("error"))));
    assert!(outcome.format_summary().starts_with("[EXHAUSTED] training/3c9b0459"));
}

#[tokio::test]
async fn test_engine_failure_is_retried() {
    let mut h = harness();
    h.engine_failures = 1;
    let (model, prompts) = ScriptedModel::new(vec![Some(VALID)]);
    let refinement = h.refinement(
        model,
        true,
        vec![(0.0, "flipud(fliplr(input))")],
        LoopConfig::bounded(5),
    );
    let (task_ref, task) = task();

    let outcome = refinement
        .run(&task_ref, &task, &Catalogue::parse(CATALOGUE))
        .await
        .unwrap();

    assert_eq!(outcome.status, LoopStatus::Solved);
    assert_eq!(outcome.model_calls, 2);
    assert_eq!(*h.builds.lock().unwrap(), 2);
    assert_eq!(*h.depths.lock().unwrap(), vec![2, 2]);
    match outcome.history[0].outcome {
        IterationOutcome::EngineFailed(ref e) => assert!(e.contains("code 3")),
        ref other => panic!("unexpected outcome: {:?}", other),
    }

    // A failed evaluation leaves no cost to report back.
    let prompts = prompts.lock().unwrap();
    assert!(!prompts[1].contains("best found connection"));
}

#[tokio::test]
async fn test_history_keeps_latest_records() {
    let h = harness();
    let (model, _) = ScriptedModel::new(vec![Some(VALID)]);
    let config = LoopConfig {
        history_limit: 2,
        ..LoopConfig::bounded(5)
    };
    let refinement = h.refinement(model, false, vec![], config);
    let (task_ref, task) = task();

    let outcome = refinement
        .run(&task_ref, &task, &Catalogue::parse(CATALOGUE))
        .await
        .unwrap();

    assert_eq!(outcome.status, LoopStatus::Exhausted);
    assert_eq!(outcome.iterations, 5);
    let kept: Vec<u32> = outcome.history.iter().map(|r| r.iteration).collect();
    assert_eq!(kept, vec![4, 5]);
}

#[tokio::test]
async fn test_model_failure_is_retried() {
    let h = harness();
    let (model, _) = ScriptedModel::new(vec![None, Some(VALID)]);
    let refinement = h.refinement(model, true, vec![(0.0, "fliplr(input)")], LoopConfig::bounded(5));
    let (task_ref, task) = task();

    let outcome = refinement
        .run(&task_ref, &task, &Catalogue::parse(CATALOGUE))
        .await
        .unwrap();

    assert_eq!(outcome.status, LoopStatus::Solved);
    assert!(matches!(
        outcome.history[0].outcome,
        IterationOutcome::ModelFailed(_)
    ));
}

#[tokio::test]
async fn test_model_timeout_is_a_failed_iteration() {
    let h = harness();
    let (model, _) = ScriptedModel::new(vec![Some(VALID)]);
    let config = LoopConfig {
        model_timeout: Some(Duration::from_millis(20)),
        ..LoopConfig::bounded(1)
    };
    let refinement = h.refinement(model.slow(Duration::from_secs(5)), true, vec![], config);
    let (task_ref, task) = task();

    let outcome = refinement
        .run(&task_ref, &task, &Catalogue::parse(CATALOGUE))
        .await
        .unwrap();

    assert_eq!(outcome.status, LoopStatus::Exhausted);
    match outcome.history[0].outcome {
        IterationOutcome::ModelFailed(ref e) => assert!(e.contains("timed out")),
        ref other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = harness();
    let (model, prompts) = ScriptedModel::new(vec![Some(VALID)]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let refinement = h
        .refinement(model, true, vec![(0.0, "x")], LoopConfig::default())
        .with_cancellation(cancel);
    let (task_ref, task) = task();

    let outcome = refinement
        .run(&task_ref, &task, &Catalogue::parse(CATALOGUE))
        .await
        .unwrap();

    assert_eq!(outcome.status, LoopStatus::Cancelled);
    assert_eq!(outcome.iterations, 0);
    assert!(prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_during_model_call() {
    let h = harness();
    let (model, _) = ScriptedModel::new(vec![Some(VALID)]);
    let refinement = h.refinement(
        model.slow(Duration::from_secs(30)),
        true,
        vec![(1.0, "x")],
        LoopConfig::default(),
    );
    let cancel = refinement.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let (task_ref, task) = task();

    let outcome = refinement
        .run(&task_ref, &task, &Catalogue::parse(CATALOGUE))
        .await
        .unwrap();

    assert_eq!(outcome.status, LoopStatus::Cancelled);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.history[0].outcome, IterationOutcome::Cancelled);
    assert_eq!(*h.builds.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_generated_files_and_artifacts() {
    let h = harness();
    let (model, _) = ScriptedModel::new(vec![Some(VALID)]);
    let refinement = h.refinement(
        model,
        true,
        vec![(0.0, "flipud(fliplr(input))")],
        LoopConfig::bounded(1),
    );
    let (task_ref, task) = task();

    refinement
        .run(&task_ref, &task, &Catalogue::parse(CATALOGUE))
        .await
        .unwrap();

    let header = read(&h.layout.header);
    assert_eq!(header.matches("inline std::any ").count(), 3);
    assert!(header.contains("        using primitives::flipud;\n        using primitives::fliplr;\n"));
    assert!(!header.contains("recolor_12"));

    let engine = read(&h.layout.engine_source);
    assert!(engine.starts_with("int main() {\n    std::vector<Neuron> neurons;\n"));
    assert!(engine.contains(
        "    Neuron flipud_neuron{\"flipud\", fulls::flipud, {typeid(std::vector<Eigen::MatrixXi>)}, typeid(std::vector<Eigen::MatrixXi>)};\n    neurons.emplace_back(flipud_neuron);\n"
    ));
    assert!(engine.ends_with("    return run(neurons);\n}\n"));
    assert!(!engine.contains("recolor"));

    assert!(read(&h.artifact_dir.join("prompt3c9b0459.txt")).contains("([[2, 2, 1], [2, 1, 2], [2, 8, 1]]"));
    assert_eq!(read(&h.artifact_dir.join("output3c9b0459.txt")), VALID);
}

#[tokio::test]
async fn test_missing_engine_template_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let (model, prompts) = ScriptedModel::new(vec![Some(VALID)]);
    let pipeline = Pipeline::new(
        Box::new(ScriptedBuilder {
            passes: true,
            calls: Arc::new(Mutex::new(0)),
        }),
        Box::new(ScriptedEngine {
            reports: Mutex::new(VecDeque::new()),
            depths: Arc::new(Mutex::new(Vec::new())),
            failures: Mutex::new(0),
        }),
        PipelineConfig::default(),
    );
    let refinement = RefinementLoop::new(
        Box::new(model),
        pipeline,
        ModuleLayout::rooted(dir.path()),
        LoopConfig::bounded(1),
    );
    let (task_ref, task) = task();

    let err = refinement
        .run(&task_ref, &task, &Catalogue::parse(CATALOGUE))
        .await
        .unwrap_err();

    assert!(matches!(err, LoopError::Template { .. }));
    assert!(prompts.lock().unwrap().is_empty());
}
