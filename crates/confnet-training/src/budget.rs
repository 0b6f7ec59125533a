//! Multiplicative controller for the confidence penalty weight.

use confnet_core::INITIAL_LAMBDA;
use serde::{Deserialize, Serialize};

/// Keeps the confidence loss near a target budget by rescaling lambda.
///
/// When the observed confidence loss is under budget the weight shrinks by
/// a factor of 1.01; otherwise it grows by 1/0.99. Lambda stays positive
/// but is otherwise unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetController {
    lambda: f64,
    budget: f64,
}

impl BudgetController {
    pub fn new(budget: f64) -> Self {
        Self::with_lambda(budget, INITIAL_LAMBDA)
    }

    pub fn with_lambda(budget: f64, lambda: f64) -> Self {
        Self { lambda, budget }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn budget(&self) -> f64 {
        self.budget
    }

    /// Adjust lambda from the last batch's confidence loss and return it
    pub fn update(&mut self, confidence_loss: f64) -> f64 {
        if self.budget > confidence_loss {
            self.lambda /= 1.01;
        } else {
            self.lambda /= 0.99;
        }
        self.lambda
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_initial_lambda() {
        let controller = BudgetController::new(0.3);
        assert_eq!(controller.lambda(), 0.1);
        assert_eq!(controller.budget(), 0.3);
    }

    #[test]
    fn test_over_budget_grows_lambda() {
        let mut controller = BudgetController::new(0.3);
        for _ in 0..3 {
            controller.update(0.5);
        }
        assert!((controller.lambda() - 0.1031).abs() < 1e-4);
    }

    #[test]
    fn test_under_budget_shrinks_lambda() {
        let mut controller = BudgetController::new(0.3);
        for _ in 0..2 {
            controller.update(0.1);
        }
        assert!((controller.lambda() - 0.09803).abs() < 1e-5);
    }

    #[test]
    fn test_equal_to_budget_counts_as_over() {
        let mut controller = BudgetController::new(0.3);
        assert!(controller.update(0.3) > 0.1);
    }

    #[test]
    fn test_monotone_under_constant_signal() {
        let mut controller = BudgetController::new(0.0);
        let mut previous = controller.lambda();
        for _ in 0..100 {
            let next = controller.update(0.2);
            assert!(next > previous);
            previous = next;
        }

        let mut controller = BudgetController::new(10.0);
        let mut previous = controller.lambda();
        for _ in 0..100 {
            let next = controller.update(0.2);
            assert!(next < previous && next > 0.0);
            previous = next;
        }
    }

    #[test]
    fn test_update_sequence_is_deterministic() {
        let losses = [0.1, 0.5, 0.29, 0.31, 0.0];
        let run = || {
            let mut controller = BudgetController::new(0.3);
            losses.iter().map(|&l| controller.update(l)).collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
