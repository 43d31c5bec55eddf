//! ARC task data: demonstration pairs of integer grids.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 2-D grid of color indices, row-major.
pub type Grid = Vec<Vec<i64>>;

/// One input/output demonstration pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub input: Grid,
    pub output: Grid,
}

/// A task document: `train` pairs shown to the model, `test` pairs held out.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub train: Vec<Example>,
    #[serde(default)]
    pub test: Vec<Example>,
}

impl Task {
    /// Parse a task document from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Identifies a task inside a dataset folder (e.g. `training/3c9b0459`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskRef {
    /// Dataset folder, e.g. `training` or `evaluation`
    pub folder: String,
    /// Task identifier, e.g. `3c9b0459`
    pub id: String,
}

impl TaskRef {
    pub fn new(folder: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.folder, self.id)
    }
}

/// Render a grid as JSON with a space after each comma (`[[1, 2], [3, 4]]`).
pub fn grid_json(grid: &Grid) -> String {
    let rows: Vec<String> = grid
        .iter()
        .map(|row| {
            let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
            format!("[{}]", cells.join(", "))
        })
        .collect();
    format!("[{}]", rows.join(", "))
}
