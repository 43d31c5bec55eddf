//! # ps-generator
//!
//! Model-guided refinement loop for partial-specialization synthesis.
//!
//! The model is shown a task's demonstration pairs and the primitive
//! catalogue. It answers with the primitives it considers useful, a few
//! partially parameterized wrappers, and a search depth. The answer is
//! turned into a C++ module, the engine is rebuilt and run, and its best
//! cost and expression go back into the next prompt until the cost is zero.
//!
//! # Usage
//!
//! ```bash
//! # Run the default tasks against a local model
//! cargo run -p ps-generator --bin ps-refine -- --source-root ..
//!
//! # One task, at most five iterations
//! cargo run -p ps-generator --bin ps-refine -- --task 3c9b0459 --max-iterations 5
//!
//! # Re-run the last persisted model output instead of calling the model
//! cargo run -p ps-generator --bin ps-refine -- --task 3c9b0459 --replay output3c9b0459.txt
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Task + Cat. │ ──> │   Prompt    │ ──> │    Model    │
//! └─────────────┘     └──────▲──────┘     └──────┬──────┘
//!                            │                   ▼
//!                     (cost, expression)  ┌─────────────┐
//!                            │            │  Response   │
//!                            │            │   Parser    │
//!                            │            └──────┬──────┘
//!                     ┌──────┴──────┐     ┌──────▼──────┐
//!                     │   Engine    │ <── │   Module    │
//!                     │  (build+run)│     │  Generator  │
//!                     └─────────────┘     └─────────────┘
//! ```

pub mod artifacts;
pub mod client;
pub mod codegen;
pub mod config;
pub mod controller;
pub mod fetch;
pub mod prompt;
pub mod response;

pub use artifacts::ArtifactStore;
pub use client::{ClientConfig, ClientError, ModelClient, OllamaClient, ReplayClient, DEFAULT_MODEL};
pub use codegen::{
    validate_proposal, DeferredProposal, EngineTemplate, GeneratedModule, ModuleGenerator,
    ModuleLayout, ModuleTemplate, ProposalIssue, Registration,
};
pub use config::{ConfigError, RefineConfig};
pub use controller::{
    IterationOutcome, IterationRecord, LoopConfig, LoopError, LoopOutcome, LoopState, LoopStatus,
    Phase, RefinementLoop, DEFAULT_HISTORY_LIMIT,
};
pub use fetch::{FetchError, TaskFetcher};
pub use prompt::{Feedback, PromptBuilder};
pub use response::{
    parse_response, ModelResponse, ProposedSpecialization, ResponseError, DEPTH_MARKER,
    PARTIAL_MARKER, SELECTED_MARKER,
};
