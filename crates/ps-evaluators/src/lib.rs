//! # ps-evaluators
//!
//! External stages for partial-specialization synthesis.
//!
//! After the generator writes a new module, the pipeline runs:
//!
//! | Stage | Tool | Produces |
//! |-------|------|----------|
//! | build | containerized cmake | the engine binary |
//! | engine | `engine <folder> <task> <depth>` | best cost + expression |
//!
//! The pipeline stops at the first failure. Failures, timeouts and
//! cancellation are all reported as failed [`StageResult`]s; none of them
//! is an error, because the refinement loop simply tries again.

pub mod build;
pub mod engine;
pub mod pipeline;
pub mod result;

pub use build::{BuildConfig, ContainerBuilder};
pub use engine::{parse_engine_output, EngineBinary, EngineConfig, EngineOutputError};
pub use pipeline::{Builder, Engine, Pipeline, PipelineConfig, Stage};
pub use result::{EngineReport, PipelineResult, StageResult};
