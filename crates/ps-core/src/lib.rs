//! # ps-core
//!
//! Core types for partial-specialization program synthesis.
//!
//! - [`Signature`]: a structured function declaration (return type, name,
//!   typed arguments, description), parsed with generic-aware argument
//!   splitting.
//! - [`Catalogue`]: the ordered, unique set of primitive signatures recovered
//!   from an annotated source file.
//! - [`Task`]: the demonstration grids a synthesis run is trying to explain.
//!
//! ## Annotation format
//!
//! ```text
//! ///<return-type> <name>(<type> <arg>, ...); // <description>
//! ```
//!
//! ```rust
//! use ps_core::Catalogue;
//!
//! let catalogue = Catalogue::parse(
//!     "///std::vector<Eigen::MatrixXi> flipud(std::vector<Eigen::MatrixXi> arg0); // Flip up and down rows",
//! );
//! assert_eq!(catalogue.len(), 1);
//! assert!(catalogue.get_by_name("flipud").is_some());
//! ```

pub mod catalogue;
pub mod signature;
pub mod task;

pub use catalogue::{Catalogue, CatalogueEntry, CatalogueError, ANNOTATION_SENTINEL};
pub use signature::{is_identifier, split_arguments, split_type_name, Parameter, Signature, TypeTag};
pub use task::{grid_json, Example, Grid, Task, TaskRef};
