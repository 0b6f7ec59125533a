//! Core type definitions: dataset and architecture choices, model mode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Supported datasets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    /// CIFAR-10, 32x32 RGB, 10 classes
    Cifar10,
    /// Street View House Numbers, 32x32 RGB, 10 classes
    Svhn,
}

impl DatasetKind {
    /// Number of output classes
    pub fn num_classes(&self) -> usize {
        match self {
            DatasetKind::Cifar10 | DatasetKind::Svhn => 10,
        }
    }

    /// Per-channel normalization mean (RGB, 0..1 scale)
    pub fn mean(&self) -> [f32; 3] {
        match self {
            DatasetKind::Cifar10 => [125.3 / 255.0, 123.0 / 255.0, 113.9 / 255.0],
            DatasetKind::Svhn => [109.9 / 255.0, 109.7 / 255.0, 113.8 / 255.0],
        }
    }

    /// Per-channel normalization standard deviation (RGB, 0..1 scale)
    pub fn std(&self) -> [f32; 3] {
        match self {
            DatasetKind::Cifar10 => [63.0 / 255.0, 62.1 / 255.0, 66.7 / 255.0],
            DatasetKind::Svhn => [50.1 / 255.0, 50.6 / 255.0, 50.8 / 255.0],
        }
    }

    /// Whether random horizontal flips are label preserving
    pub fn allows_horizontal_flip(&self) -> bool {
        // Flipped digits are different digits
        !matches!(self, DatasetKind::Svhn)
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetKind::Cifar10 => write!(f, "cifar10"),
            DatasetKind::Svhn => write!(f, "svhn"),
        }
    }
}

impl FromStr for DatasetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cifar10" => Ok(DatasetKind::Cifar10),
            "svhn" => Ok(DatasetKind::Svhn),
            other => Err(Error::Config(format!(
                "Unknown dataset '{other}'. Valid options: cifar10, svhn"
            ))),
        }
    }
}

/// Network family selected at configuration time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Wide residual network
    WideResNet,
    /// DenseNet-BC
    DenseNet,
    /// VGG-13 with batch norm
    Vgg13,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::WideResNet => write!(f, "wideresnet"),
            ModelKind::DenseNet => write!(f, "densenet"),
            ModelKind::Vgg13 => write!(f, "vgg13"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wideresnet" => Ok(ModelKind::WideResNet),
            "densenet" => Ok(ModelKind::DenseNet),
            "vgg13" => Ok(ModelKind::Vgg13),
            other => Err(Error::Config(format!(
                "Unknown model '{other}'. Valid options: wideresnet, densenet, vgg13"
            ))),
        }
    }
}

/// Concrete architecture after dataset-dependent substitution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ArchitectureSpec {
    /// WRN-depth-widen
    WideResNet { depth: usize, widen_factor: usize },
    /// DenseNet-BC
    DenseNet {
        depth: usize,
        growth_rate: usize,
        reduction: f64,
    },
    /// VGG-13
    Vgg13,
}

impl ArchitectureSpec {
    /// Resolve the architecture used for a model/dataset pair
    pub fn resolve(model: ModelKind, dataset: DatasetKind) -> Self {
        match (model, dataset) {
            (ModelKind::WideResNet, DatasetKind::Svhn) => ArchitectureSpec::WideResNet {
                depth: 16,
                widen_factor: 8,
            },
            (ModelKind::WideResNet, _) => ArchitectureSpec::WideResNet {
                depth: 28,
                widen_factor: 10,
            },
            (ModelKind::DenseNet, _) => ArchitectureSpec::DenseNet {
                depth: 100,
                growth_rate: 12,
                reduction: 0.5,
            },
            (ModelKind::Vgg13, _) => ArchitectureSpec::Vgg13,
        }
    }
}

impl fmt::Display for ArchitectureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchitectureSpec::WideResNet {
                depth,
                widen_factor,
            } => write!(f, "WRN-{depth}-{widen_factor}"),
            ArchitectureSpec::DenseNet {
                depth, growth_rate, ..
            } => write!(f, "DenseNet-BC-{depth}-{growth_rate}"),
            ArchitectureSpec::Vgg13 => write!(f, "VGG-13"),
        }
    }
}

/// Whether a model is being trained or only run for inference
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ModelMode {
    #[default]
    Train,
    Eval,
}
