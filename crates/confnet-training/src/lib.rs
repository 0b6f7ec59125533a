//! Training infrastructure for confidence-gated classifiers.
//!
//! This module provides:
//! - Classifier architectures with a confidence head (VGG-13, WRN, DenseNet-BC)
//! - The hint-mixed loss and its budget controller
//! - Training loop, evaluation and learning rate scheduling
//! - Checkpoints, CSV logs and live metrics

pub mod model;
pub mod loss;
pub mod budget;
pub mod trainer;
pub mod evaluator;
pub mod lr_schedule;
pub mod checkpoint;
pub mod csv_log;
pub mod live_metrics;

pub use model::{ClassifierOutput, ConfidenceClassifier, ConfidenceNet, ModeGuard, ModeSwitch};
pub use loss::{ConfidenceLoss, LossOutput};
pub use budget::BudgetController;
pub use trainer::{build_optimizer, BatchReport, Trainer, TrainerConfig, TrainingState};
pub use evaluator::{evaluate, EvaluationResult, SampleOutcome};
pub use lr_schedule::{LearningRateScheduler, SchedulerType};
pub use checkpoint::{CheckpointMetadata, CheckpointWriter};
pub use csv_log::CsvLogger;
pub use live_metrics::{EventLog, ScalarRecord};

/// Re-export commonly used types
pub mod prelude {
    pub use super::model::{ConfidenceClassifier, ConfidenceNet, ModeSwitch};
    pub use super::trainer::{build_optimizer, Trainer, TrainerConfig};
    pub use super::evaluator::EvaluationResult;
    pub use super::checkpoint::{CheckpointMetadata, CheckpointWriter};
    pub use super::csv_log::CsvLogger;
    pub use super::live_metrics::{EventLog, ScalarRecord};
}
