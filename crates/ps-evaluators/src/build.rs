//! Containerized build of the engine target.
//!
//! Mounts the source tree into a container and runs a cmake build of a
//! single target. The container image's entrypoint is expected to be a
//! shell taking `-c <script>`.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;

use crate::pipeline::Builder;
use crate::result::StageResult;

const STAGE: &str = "build";

/// Build configuration.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Container runtime binary
    pub runtime: String,
    /// Image with the toolchain installed
    pub image: String,
    /// Host source root, mounted read-write
    pub source_root: PathBuf,
    /// Mount point inside the container
    pub mount_point: String,
    /// Build target
    pub target: String,
    /// Parallel build jobs
    pub parallelism: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: "aicpp".to_string(),
            source_root: PathBuf::from(".."),
            mount_point: "/app/aicpp".to_string(),
            target: "engine".to_string(),
            parallelism: num_cpus::get(),
        }
    }
}

impl BuildConfig {
    /// Shell script run inside the container.
    pub fn script(&self) -> String {
        format!(
            "mkdir -p build && cmake . -B build && cmake --build build --target {} -- -j{}",
            self.target, self.parallelism
        )
    }

    /// Full argument list passed to the runtime binary.
    pub fn command_args(&self) -> Vec<String> {
        let root = if self.source_root.is_absolute() {
            self.source_root.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&self.source_root))
                .unwrap_or_else(|_| self.source_root.clone())
        };
        vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:{}", root.display(), self.mount_point),
            self.image.clone(),
            "-c".to_string(),
            self.script(),
        ]
    }
}

/// Builds the engine inside a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerBuilder {
    config: BuildConfig,
}

impl ContainerBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }
}

#[async_trait]
impl Builder for ContainerBuilder {
    async fn build(&self) -> StageResult {
        run(&self.config).await
    }
}

/// Run the containerized build.
///
/// The child is killed if the returned future is dropped, so callers may
/// wrap this in a timeout or race it against cancellation.
pub async fn run(config: &BuildConfig) -> StageResult {
    let start = Instant::now();

    let result = Command::new(&config.runtime)
        .args(config.command_args())
        .kill_on_drop(true)
        .output()
        .await;

    let duration = start.elapsed();

    match result {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let combined = format!("{}\n{}", stdout, stderr);

            if output.status.success() {
                StageResult::pass_with_output(STAGE, duration, combined)
            } else {
                let error = extract_build_error(&stderr, &stdout, output.status.code());
                StageResult::fail(STAGE, error, duration, combined)
            }
        }
        Err(e) => StageResult::fail(
            STAGE,
            format!("Failed to run {}: {}", config.runtime, e),
            duration,
            String::new(),
        ),
    }
}

/// Extract the first compiler or cmake error from build output.
fn extract_build_error(stderr: &str, stdout: &str, code: Option<i32>) -> String {
    for line in stderr.lines().chain(stdout.lines()) {
        let trimmed = line.trim();
        if trimmed.contains("error:") || trimmed.starts_with("CMake Error") {
            return trimmed.to_string();
        }
    }

    stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| match code {
            Some(c) => format!("build exited with code {}", c),
            None => "build terminated by signal".to_string(),
        })
}
