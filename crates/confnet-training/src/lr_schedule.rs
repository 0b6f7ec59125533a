//! Learning rate scheduling.
//!
//! Schedules are evaluated in closed form from the index of the last
//! completed epoch, so stepping is idempotent and can resume anywhere.

use confnet_core::DecaySchedule;
use serde::{Deserialize, Serialize};

/// Learning rate scheduler type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum SchedulerType {
    /// Constant learning rate (no scheduling)
    #[default]
    Constant,

    /// Multiply the base LR by `gamma` once per milestone reached
    MultiStep { milestones: Vec<usize>, gamma: f64 },
}

impl From<DecaySchedule> for SchedulerType {
    fn from(schedule: DecaySchedule) -> Self {
        if schedule.milestones.is_empty() {
            Self::Constant
        } else {
            Self::MultiStep {
                milestones: schedule.milestones,
                gamma: schedule.gamma,
            }
        }
    }
}

/// Learning rate scheduler
#[derive(Debug, Clone)]
pub struct LearningRateScheduler {
    scheduler_type: SchedulerType,
    base_lr: f64,
    current_lr: f64,
    completed_epochs: usize,
}

impl LearningRateScheduler {
    pub fn new(scheduler_type: SchedulerType, base_lr: f64) -> Self {
        Self {
            scheduler_type,
            base_lr,
            current_lr: base_lr,
            completed_epochs: 0,
        }
    }

    /// Get the current learning rate
    pub fn get_lr(&self) -> f64 {
        self.current_lr
    }

    /// Recompute the LR after epoch `epoch` (0-based) has finished.
    ///
    /// A milestone `m` is counted once `epoch >= m`, so with milestone 60 the
    /// decayed rate first applies to epoch index 61.
    pub fn step(&mut self, epoch: usize) -> f64 {
        self.completed_epochs = epoch + 1;
        self.current_lr = match &self.scheduler_type {
            SchedulerType::Constant => self.base_lr,
            SchedulerType::MultiStep { milestones, gamma } => {
                let reached = milestones.iter().filter(|&&m| m <= epoch).count();
                self.base_lr * gamma.powi(reached as i32)
            }
        };
        self.current_lr
    }

    /// Reset the scheduler
    pub fn reset(&mut self) {
        self.current_lr = self.base_lr;
        self.completed_epochs = 0;
    }

    /// Number of epochs the scheduler has been stepped through
    pub fn completed_epochs(&self) -> usize {
        self.completed_epochs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cifar_schedule() -> LearningRateScheduler {
        LearningRateScheduler::new(
            SchedulerType::MultiStep {
                milestones: vec![60, 120, 160],
                gamma: 0.2,
            },
            0.1,
        )
    }

    #[test]
    fn test_constant_scheduler() {
        let mut scheduler = LearningRateScheduler::new(SchedulerType::Constant, 0.001);
        assert_eq!(scheduler.get_lr(), 0.001);
        assert_eq!(scheduler.step(0), 0.001);
        assert_eq!(scheduler.step(500), 0.001);
    }

    #[test]
    fn test_multistep_boundaries() {
        let mut scheduler = cifar_schedule();
        assert!((scheduler.step(59) - 0.1).abs() < 1e-12);
        assert!((scheduler.step(60) - 0.02).abs() < 1e-12);
        assert!((scheduler.step(119) - 0.02).abs() < 1e-12);
        assert!((scheduler.step(120) - 0.004).abs() < 1e-12);
        assert!((scheduler.step(199) - 0.0008).abs() < 1e-12);
        assert_eq!(scheduler.completed_epochs(), 200);
    }

    #[test]
    fn test_step_is_idempotent() {
        let mut scheduler = cifar_schedule();
        let first = scheduler.step(130);
        let second = scheduler.step(130);
        assert_eq!(first, second);

        scheduler.reset();
        assert_eq!(scheduler.get_lr(), 0.1);
        assert_eq!(scheduler.completed_epochs(), 0);
    }

    #[test]
    fn test_from_decay_schedule() {
        let schedule = DecaySchedule {
            milestones: vec![80, 120],
            gamma: 0.1,
        };
        assert_eq!(
            SchedulerType::from(schedule),
            SchedulerType::MultiStep {
                milestones: vec![80, 120],
                gamma: 0.1
            }
        );

        let empty = DecaySchedule {
            milestones: vec![],
            gamma: 0.5,
        };
        assert_eq!(SchedulerType::from(empty), SchedulerType::Constant);
    }
}
