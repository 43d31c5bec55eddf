//! Stage and pipeline results.

use std::time::Duration;

/// Best result reported by the search engine for one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineReport {
    /// Lower is better; exactly zero means every demonstration pair matched
    pub cost: f64,
    /// Rendering of the best composed primitive-call chain
    pub expression: String,
}

impl EngineReport {
    pub fn new(cost: f64, expression: impl Into<String>) -> Self {
        Self {
            cost,
            expression: expression.into(),
        }
    }

    /// Whether the engine found an exact solution.
    pub fn is_exact(&self) -> bool {
        self.cost == 0.0
    }
}

/// Result of one external stage (build or evaluate).
#[derive(Debug, Clone)]
pub struct StageResult {
    /// Stage name ("build", "engine")
    pub stage: &'static str,
    /// Whether the stage succeeded
    pub passed: bool,
    /// Short error summary on failure
    pub error: Option<String>,
    /// Captured stdout and stderr
    pub output: String,
    /// Wall-clock duration
    pub duration: Duration,
    /// Engine report, set by a successful evaluate stage
    pub report: Option<EngineReport>,
}

impl StageResult {
    /// A passing result without output.
    pub fn pass(stage: &'static str, duration: Duration) -> Self {
        Self {
            stage,
            passed: true,
            error: None,
            output: String::new(),
            duration,
            report: None,
        }
    }

    /// A passing result with captured output.
    pub fn pass_with_output(stage: &'static str, duration: Duration, output: String) -> Self {
        Self {
            output,
            ..Self::pass(stage, duration)
        }
    }

    /// A passing evaluate result carrying the engine's report.
    pub fn pass_with_report(
        stage: &'static str,
        report: EngineReport,
        duration: Duration,
        output: String,
    ) -> Self {
        Self {
            report: Some(report),
            ..Self::pass_with_output(stage, duration, output)
        }
    }

    /// A failing result.
    pub fn fail(
        stage: &'static str,
        error: impl Into<String>,
        duration: Duration,
        output: String,
    ) -> Self {
        Self {
            stage,
            passed: false,
            error: Some(error.into()),
            output,
            duration,
            report: None,
        }
    }

    /// Single-line status.
    pub fn format_status(&self) -> String {
        if self.passed {
            format!("[PASS] {} ({:.2}s)", self.stage, self.duration.as_secs_f64())
        } else {
            format!(
                "[FAIL] {} ({:.2}s): {}",
                self.stage,
                self.duration.as_secs_f64(),
                self.error.as_deref().unwrap_or("unknown")
            )
        }
    }
}

/// Result of a build → evaluate pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Per-stage results in execution order
    pub results: Vec<StageResult>,
    /// Whether every stage that ran passed
    pub all_passed: bool,
    /// First failing stage, if any
    pub first_failure: Option<StageResult>,
    /// Engine report from a successful evaluation
    pub report: Option<EngineReport>,
    /// Whether the run was aborted by cancellation
    pub cancelled: bool,
}

impl PipelineResult {
    /// Collect stage results.
    pub fn from_results(results: Vec<StageResult>) -> Self {
        let first_failure = results.iter().find(|r| !r.passed).cloned();
        let report = results.iter().find_map(|r| r.report.clone());
        Self {
            all_passed: first_failure.is_none(),
            first_failure,
            report,
            results,
            cancelled: false,
        }
    }

    /// A run aborted before completion.
    pub fn aborted(results: Vec<StageResult>) -> Self {
        Self {
            cancelled: true,
            all_passed: false,
            ..Self::from_results(results)
        }
    }

    /// Multi-line report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();
        for result in &self.results {
            report.push_str(&result.format_status());
            report.push('\n');
        }
        if self.cancelled {
            report.push_str("Pipeline cancelled\n");
        }
        if let Some(ref engine) = self.report {
            report.push_str(&format!(
                "Cost: {}\nExpression: {}\n",
                engine.cost, engine.expression
            ));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_result_first_failure() {
        let result = PipelineResult::from_results(vec![
            StageResult::pass("build", Duration::from_millis(10)),
            StageResult::fail("engine", "exit code 3", Duration::ZERO, String::new()),
        ]);
        assert!(!result.all_passed);
        assert_eq!(result.first_failure.unwrap().stage, "engine");
        assert!(result.report.is_none());
    }

    #[test]
    fn test_pipeline_result_carries_report() {
        let result = PipelineResult::from_results(vec![
            StageResult::pass("build", Duration::ZERO),
            StageResult::pass_with_report(
                "engine",
                EngineReport::new(0.0, "flipud(fliplr(input))"),
                Duration::ZERO,
                String::new(),
            ),
        ]);
        assert!(result.all_passed);
        assert!(result.report.as_ref().unwrap().is_exact());
        assert!(result.format_report().contains("flipud(fliplr(input))"));
    }

    #[test]
    fn test_format_status() {
        assert!(StageResult::pass("build", Duration::ZERO)
            .format_status()
            .starts_with("[PASS] build"));
        let fail = StageResult::fail("build", "missing header", Duration::ZERO, String::new());
        assert!(fail.format_status().contains("missing header"));
    }
}
