//! Run configuration for confidence-gated training.
//!
//! A [`RunConfig`] can be read from TOML and is then overridden by command
//! line flags. It is read-only once training starts.

use crate::types::{ArchitectureSpec, DatasetKind, ModelKind};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Initial value of the confidence penalty weight
pub const INITIAL_LAMBDA: f64 = 0.1;

/// Complete configuration of one training run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Dataset to train and evaluate on
    pub dataset: DatasetKind,
    /// Network family
    pub model: ModelKind,
    /// Mini-batch size
    pub batch_size: usize,
    /// Number of training epochs
    pub epochs: usize,
    /// Random seed for weights, hint masks and augmentation
    pub seed: u64,
    /// Initial learning rate
    pub learning_rate: f64,
    /// Random crop (and flip, where allowed) on training images
    pub data_augmentation: bool,
    /// Cutout patch size, 0 disables cutout
    pub cutout: usize,
    /// Target mean of the confidence penalty
    pub budget: f64,
    /// Train without the confidence branch
    pub baseline: bool,
    /// Compute device, negative selects the CPU
    pub device: i32,
    /// Directory for the live-metrics event log
    pub log_dir: Option<PathBuf>,
    /// Write live metrics to `log_dir`
    pub live_metrics: bool,
    /// Use 1% of the train and test splits
    pub subsample: bool,
    /// Directory holding the dataset files
    pub data_dir: PathBuf,
    /// Directory for per-epoch CSV logs
    pub csv_dir: PathBuf,
    /// Directory for model checkpoints
    pub checkpoint_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetKind::Cifar10,
            model: ModelKind::Vgg13,
            batch_size: 128,
            epochs: 200,
            seed: 0,
            learning_rate: 0.1,
            data_augmentation: false,
            cutout: 16,
            budget: 0.3,
            baseline: false,
            device: -1,
            log_dir: None,
            live_metrics: false,
            subsample: false,
            data_dir: PathBuf::from("data"),
            csv_dir: PathBuf::from("logs"),
            checkpoint_dir: PathBuf::from("checkpoints"),
        }
    }
}

/// SGD hyperparameters for a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerSettings {
    pub momentum: f64,
    pub nesterov: bool,
    pub weight_decay: f32,
}

/// Piecewise-constant learning rate decay
#[derive(Debug, Clone, PartialEq)]
pub struct DecaySchedule {
    /// Epochs after which the learning rate is multiplied by `gamma`
    pub milestones: Vec<usize>,
    pub gamma: f64,
}

/// Configuration after run-time normalization
#[derive(Debug, Clone)]
pub struct ResolvedRun {
    pub config: RunConfig,
    /// Stem shared by the CSV log and checkpoint file names
    pub run_name: String,
    pub architecture: ArchitectureSpec,
    pub num_classes: usize,
}

impl RunConfig {
    /// Reject configurations that cannot start a run
    pub fn validate(&self) -> Result<()> {
        if self.live_metrics && self.log_dir.is_none() {
            return Err(Error::Config(
                "please provide a directory to save event files: '--log-dir'".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("Batch size must be greater than 0".to_string()));
        }
        if self.epochs == 0 {
            return Err(Error::Config("Number of epochs must be greater than 0".to_string()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::Config("Learning rate must be positive".to_string()));
        }
        if !(self.budget >= 0.0) {
            return Err(Error::Config("Budget must be non-negative".to_string()));
        }
        Ok(())
    }

    /// Apply the baseline budget override and derive run name and architecture
    pub fn resolve(mut self) -> ResolvedRun {
        if self.baseline {
            self.budget = 0.0;
        }

        let run_name = format!(
            "{}_{}_budget_{}_seed_{}",
            self.dataset,
            self.model,
            format_float(self.budget),
            self.seed
        );
        let architecture = ArchitectureSpec::resolve(self.model, self.dataset);
        let num_classes = self.dataset.num_classes();

        ResolvedRun {
            config: self,
            run_name,
            architecture,
            num_classes,
        }
    }

    /// SGD settings; DenseNet uses a lighter weight decay
    pub fn optimizer_settings(&self) -> OptimizerSettings {
        let weight_decay = match self.model {
            ModelKind::DenseNet => 1e-4,
            _ => 5e-4,
        };
        OptimizerSettings {
            momentum: 0.9,
            nesterov: true,
            weight_decay,
        }
    }

    /// Learning rate milestones for the dataset/model pair
    pub fn decay_schedule(&self) -> DecaySchedule {
        match (self.model, self.dataset) {
            (ModelKind::DenseNet, _) => DecaySchedule {
                milestones: vec![150, 225],
                gamma: 0.1,
            },
            (_, DatasetKind::Svhn) => DecaySchedule {
                milestones: vec![80, 120],
                gamma: 0.1,
            },
            (_, DatasetKind::Cifar10) => DecaySchedule {
                milestones: vec![60, 120, 160],
                gamma: 0.2,
            },
        }
    }
}

/// Format a float the way run names have always spelled them ("0.3", "0.0")
fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.epochs, 200);
        assert_eq!(config.budget, 0.3);
        assert_eq!(config.cutout, 16);
    }

    #[test]
    fn test_live_metrics_require_log_dir() {
        let config = RunConfig {
            live_metrics: true,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config = RunConfig {
            live_metrics: true,
            log_dir: Some(PathBuf::from("runs")),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero_batch = RunConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(zero_batch.validate().is_err());

        let bad_lr = RunConfig {
            learning_rate: 0.0,
            ..Default::default()
        };
        assert!(bad_lr.validate().is_err());

        let bad_budget = RunConfig {
            budget: -0.1,
            ..Default::default()
        };
        assert!(bad_budget.validate().is_err());
    }

    #[test]
    fn test_run_name() {
        let resolved = RunConfig::default().resolve();
        assert_eq!(resolved.run_name, "cifar10_vgg13_budget_0.3_seed_0");
        assert_eq!(resolved.num_classes, 10);
    }

    #[test]
    fn test_baseline_zeroes_budget() {
        let resolved = RunConfig {
            baseline: true,
            seed: 3,
            ..Default::default()
        }
        .resolve();
        assert_eq!(resolved.config.budget, 0.0);
        assert_eq!(resolved.run_name, "cifar10_vgg13_budget_0.0_seed_3");
    }

    #[test]
    fn test_svhn_wideresnet_keeps_requested_name() {
        let resolved = RunConfig {
            dataset: DatasetKind::Svhn,
            model: ModelKind::WideResNet,
            ..Default::default()
        }
        .resolve();
        assert_eq!(resolved.run_name, "svhn_wideresnet_budget_0.3_seed_0");
        assert_eq!(
            resolved.architecture,
            ArchitectureSpec::WideResNet {
                depth: 16,
                widen_factor: 8
            }
        );
    }

    #[test]
    fn test_decay_schedules() {
        let cifar = RunConfig::default().decay_schedule();
        assert_eq!(cifar.milestones, vec![60, 120, 160]);
        assert_eq!(cifar.gamma, 0.2);

        let svhn = RunConfig {
            dataset: DatasetKind::Svhn,
            ..Default::default()
        }
        .decay_schedule();
        assert_eq!(svhn.milestones, vec![80, 120]);

        let densenet = RunConfig {
            dataset: DatasetKind::Svhn,
            model: ModelKind::DenseNet,
            ..Default::default()
        };
        assert_eq!(densenet.decay_schedule().milestones, vec![150, 225]);
        assert_eq!(densenet.optimizer_settings().weight_decay, 1e-4);
    }

    #[test]
    fn test_toml_partial_config() {
        let config: RunConfig = toml::from_str(
            r#"
            dataset = "svhn"
            model = "densenet"
            budget = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.dataset, DatasetKind::Svhn);
        assert_eq!(config.model, ModelKind::DenseNet);
        assert_eq!(config.budget, 0.5);
        assert_eq!(config.batch_size, 128);
    }
}
