//! Running metrics accumulated during an epoch.

use serde::{Deserialize, Serialize};

/// Mean of a stream of scalar observations
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Mean so far, 0 before the first observation
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Fraction of correct predictions seen so far
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccuracyCounter {
    correct: usize,
    total: usize,
}

impl AccuracyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, correct: usize, total: usize) {
        self.correct += correct;
        self.total += total;
    }

    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Metrics reported for a finished training epoch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub xentropy_loss: f64,
    pub confidence_loss: f64,
    pub train_accuracy: f64,
    pub lambda: f64,
    pub learning_rate: f64,
}
