//! Diagnostic artifacts: the last prompt and raw model output of each task.

use std::io;
use std::path::{Path, PathBuf};

/// Writes `prompt<task>.txt` and `output<task>.txt` into one directory.
///
/// Files are overwritten every iteration.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prompt_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("prompt{}.txt", task_id))
    }

    pub fn output_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("output{}.txt", task_id))
    }

    pub async fn write_prompt(&self, task_id: &str, prompt: &str) -> io::Result<()> {
        self.write(self.prompt_path(task_id), prompt).await
    }

    pub async fn write_output(&self, task_id: &str, output: &str) -> io::Result<()> {
        self.write(self.output_path(task_id), output).await
    }

    async fn write(&self, path: PathBuf, contents: &str) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(path, contents).await
    }
}
