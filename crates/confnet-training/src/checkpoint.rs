//! Model checkpointing.
//!
//! One checkpoint per run, overwritten after every epoch: the network
//! parameters as a burn record plus a JSON sidecar describing the run.

use burn::{
    module::Module,
    record::CompactRecorder,
    tensor::backend::Backend,
};
use confnet_core::{ArchitectureSpec, DatasetKind, Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Metadata stored next to the model record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    pub run_name: String,
    /// Last completed epoch (0-based)
    pub epoch: usize,
    pub architecture: String,
    pub dataset: DatasetKind,
    pub num_classes: usize,
    pub test_accuracy: f64,
    pub lambda: f64,
    pub timestamp: String,
}

impl CheckpointMetadata {
    pub fn new(
        run_name: &str,
        epoch: usize,
        architecture: &ArchitectureSpec,
        dataset: DatasetKind,
        test_accuracy: f64,
        lambda: f64,
    ) -> Self {
        Self {
            run_name: run_name.to_string(),
            epoch,
            architecture: architecture.to_string(),
            dataset,
            num_classes: dataset.num_classes(),
            test_accuracy,
            lambda,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Save metadata to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load metadata from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Writes the per-run checkpoint into a directory
#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    dir: PathBuf,
    run_name: String,
}

impl CheckpointWriter {
    /// Create the checkpoint directory if needed
    pub fn new(dir: impl Into<PathBuf>, run_name: &str) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            run_name: run_name.to_string(),
        })
    }

    /// Path of the model record.
    ///
    /// The extension is spelled out because run names contain a decimal
    /// point that the recorder would otherwise treat as one.
    pub fn model_path(&self) -> PathBuf {
        self.dir.join(format!("{}.mpk", self.run_name))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.run_name))
    }

    /// Overwrite the checkpoint with the current model state
    pub fn save<B, M>(&self, model: &M, metadata: &CheckpointMetadata) -> Result<PathBuf>
    where
        B: Backend,
        M: Module<B> + Clone,
    {
        let path = self.model_path();
        model
            .clone()
            .save_file(path.clone(), &CompactRecorder::new())
            .map_err(|e| Error::Serialization(format!("Failed to save model: {:?}", e)))?;
        metadata.save(&self.metadata_path())?;

        debug!("Checkpoint written to {:?}", path);
        Ok(path)
    }

    /// Load a previously saved record into `model`
    pub fn load<B, M>(&self, model: M, device: &B::Device) -> Result<M>
    where
        B: Backend,
        M: Module<B>,
    {
        model
            .load_file(self.model_path(), &CompactRecorder::new(), device)
            .map_err(|e| Error::Serialization(format!("Failed to load model: {:?}", e)))
    }
}
