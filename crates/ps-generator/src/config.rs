//! File configuration.
//!
//! A JSON document whose every field is optional; unset fields keep the
//! in-code defaults. Precedence, highest first: command line, environment
//! (`PS_MODEL`, `OLLAMA_BIN`), file, defaults.
//!
//! ```json
//! {
//!   "model": "gpt-oss:20b",
//!   "max_iterations": 10,
//!   "source_root": "..",
//!   "build": { "image": "aicpp", "timeout_secs": 900 },
//!   "engine": { "timeout_secs": 1800 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ps_evaluators::{BuildConfig, EngineConfig, PipelineConfig};
use serde::{Deserialize, Serialize};

use crate::client::ClientConfig;
use crate::codegen::ModuleLayout;
use crate::controller::LoopConfig;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefineConfig {
    pub model: Option<String>,
    pub max_iterations: Option<u32>,
    pub time_budget_secs: Option<u64>,
    pub model_timeout_secs: Option<u64>,
    /// Iteration records kept per task
    pub history_limit: Option<usize>,
    pub artifact_dir: Option<PathBuf>,
    /// Engine source tree (generated files, templates, build root)
    pub source_root: Option<PathBuf>,
    /// Model runner binary
    pub ollama_bin: Option<String>,
    /// Task data base URL
    pub task_base_url: Option<String>,
    pub build: BuildSection,
    pub engine: EngineSection,
}

/// `build` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSection {
    pub runtime: Option<String>,
    pub image: Option<String>,
    pub mount_point: Option<String>,
    pub target: Option<String>,
    pub parallelism: Option<usize>,
    pub timeout_secs: Option<u64>,
}

/// `engine` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub binary: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

impl RefineConfig {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Apply `PS_MODEL` and `OLLAMA_BIN` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides from an arbitrary lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(model) = set("PS_MODEL") {
            self.model = Some(model);
        }
        if let Some(binary) = set("OLLAMA_BIN") {
            self.ollama_bin = Some(binary);
        }
    }

    fn source_root(&self) -> PathBuf {
        self.source_root.clone().unwrap_or_else(|| PathBuf::from(".."))
    }

    pub fn loop_config(&self) -> LoopConfig {
        let mut config = LoopConfig::default();
        if let Some(ref model) = self.model {
            config.model = model.clone();
        }
        config.max_iterations = self.max_iterations;
        config.time_budget = self.time_budget_secs.map(Duration::from_secs);
        config.model_timeout = self.model_timeout_secs.map(Duration::from_secs);
        if let Some(limit) = self.history_limit {
            config.history_limit = limit;
        }
        if let Some(ref dir) = self.artifact_dir {
            config.artifact_dir = dir.clone();
        }
        config
    }

    pub fn layout(&self) -> ModuleLayout {
        ModuleLayout::rooted(self.source_root())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let root = self.source_root();

        let mut build = BuildConfig {
            source_root: root.clone(),
            ..Default::default()
        };
        let section = &self.build;
        if let Some(ref runtime) = section.runtime {
            build.runtime = runtime.clone();
        }
        if let Some(ref image) = section.image {
            build.image = image.clone();
        }
        if let Some(ref mount_point) = section.mount_point {
            build.mount_point = mount_point.clone();
        }
        if let Some(ref target) = section.target {
            build.target = target.clone();
        }
        if let Some(parallelism) = section.parallelism {
            build.parallelism = parallelism.max(1);
        }

        let engine = EngineConfig {
            binary: self
                .engine
                .binary
                .clone()
                .unwrap_or_else(|| root.join("build").join(&build.target)),
        };

        PipelineConfig {
            build_timeout: self.build.timeout_secs.map(Duration::from_secs),
            engine_timeout: self.engine.timeout_secs.map(Duration::from_secs),
            build,
            engine,
            ..Default::default()
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        if let Some(ref binary) = self.ollama_bin {
            config.binary = binary.clone();
        }
        config
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
