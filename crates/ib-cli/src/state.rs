//! Pull checkpoints persisted between runs.

use anyhow::{Context, Result};
use ib_plugins::PullCheckpoint;
use std::path::PathBuf;

/// Stores one checkpoint file per plugin configuration.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.checkpoint.json", name))
    }

    /// Loads the checkpoint for `name`. A missing file means the plugin never ran.
    pub fn load(&self, name: &str) -> Result<PullCheckpoint> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(PullCheckpoint::default());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read checkpoint: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse checkpoint: {}", path.display()))
    }

    /// Writes the checkpoint to a temporary file and renames it into place.
    pub fn save(&self, name: &str, checkpoint: &PullCheckpoint) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create state directory: {}", self.dir.display()))?;

        let path = self.path_for(name);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(checkpoint)?;
        std::fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write checkpoint: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace checkpoint: {}", path.display()))?;
        Ok(())
    }
}
