//! Confidence-gated loss.
//!
//! The network's class distribution `p` is interpolated toward the one-hot
//! target by a per-sample gate built from the confidence `c`: samples drawn
//! into the hint set (Bernoulli 0.5) get `g = c`, the rest keep `g = 1`.
//! The mixed distribution `p' = g * p + (1 - g) * y` feeds a negative
//! log-likelihood; `-mean(log c)` is the confidence penalty weighted by
//! lambda.

use burn::tensor::{
    activation::{sigmoid, softmax},
    backend::Backend,
    ElementConversion, Int, Tensor, TensorData,
};
use rand::Rng;

/// Clamp margin keeping logarithms finite
pub const EPS: f64 = 1e-12;

/// Softmax over classes, clamped to `[EPS, 1 - EPS]`
pub fn squash_prediction<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 2> {
    softmax(logits, 1).clamp(EPS, 1.0 - EPS)
}

/// Sigmoid of the confidence logit, clamped to `[EPS, 1 - EPS]`
pub fn squash_confidence<B: Backend>(pre_confidence: Tensor<B, 2>) -> Tensor<B, 2> {
    sigmoid(pre_confidence).clamp(EPS, 1.0 - EPS)
}

/// Draw one fair Bernoulli value per sample (1.0 = hinted)
pub fn sample_hint_mask<R: Rng + ?Sized>(rng: &mut R, batch_size: usize) -> Vec<f32> {
    (0..batch_size)
        .map(|_| if rng.gen_bool(0.5) { 1.0 } else { 0.0 })
        .collect()
}

/// `g = c * b + (1 - b)`
pub fn hint_gate<B: Backend>(confidence: Tensor<B, 2>, mask: Tensor<B, 2>) -> Tensor<B, 2> {
    confidence.mul(mask.clone()) + mask.neg().add_scalar(1.0)
}

/// `p' = g * p + (1 - g) * y`, broadcasting the `[N, 1]` gate over classes
pub fn mix_with_targets<B: Backend>(
    prediction: Tensor<B, 2>,
    one_hot: Tensor<B, 2>,
    gate: Tensor<B, 2>,
) -> Tensor<B, 2> {
    prediction.mul(gate.clone()) + one_hot.mul(gate.neg().add_scalar(1.0))
}

/// One-hot encoding `[N, C]` of integer labels
pub fn one_hot<B: Backend>(targets: &Tensor<B, 1, Int>, num_classes: usize) -> Tensor<B, 2> {
    let labels: Vec<i64> = targets.to_data().iter::<i64>().collect();
    let mut values = vec![0.0f32; labels.len() * num_classes];
    for (row, &label) in labels.iter().enumerate() {
        debug_assert!(
            (0..num_classes as i64).contains(&label),
            "label {} out of range for {} classes",
            label,
            num_classes
        );
        if let Ok(label) = usize::try_from(label) {
            if label < num_classes {
                values[row * num_classes + label] = 1.0;
            }
        }
    }

    Tensor::from_data(
        TensorData::new(values, [labels.len(), num_classes]),
        &targets.device(),
    )
}

/// Mean negative log-likelihood of the target classes
pub fn nll_loss<B: Backend>(log_probs: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    let [batch_size, _] = log_probs.dims();
    let indices = targets.reshape([batch_size, 1]);
    log_probs.gather(1, indices).neg().mean()
}

/// All tensors produced for one batch
#[derive(Debug, Clone)]
pub struct LossOutput<B: Backend> {
    /// `xentropy + lambda * confidence_loss` (baseline: `xentropy`)
    pub total: Tensor<B, 1>,
    pub xentropy: Tensor<B, 1>,
    pub confidence_loss: Tensor<B, 1>,
    /// Clamped class distribution before mixing
    pub prediction: Tensor<B, 2>,
    /// Distribution the likelihood was taken of
    pub mixed_prediction: Tensor<B, 2>,
    /// Clamped confidence `[N, 1]`
    pub confidence: Tensor<B, 2>,
    /// Hint draw, absent in baseline mode
    pub hint_mask: Option<Vec<f32>>,
}

impl<B: Backend> LossOutput<B> {
    pub fn xentropy_value(&self) -> f64 {
        self.xentropy.clone().into_scalar().elem::<f64>()
    }

    pub fn confidence_value(&self) -> f64 {
        self.confidence_loss.clone().into_scalar().elem::<f64>()
    }
}

/// Builds the training loss for a batch
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceLoss {
    baseline: bool,
}

impl ConfidenceLoss {
    pub fn new(baseline: bool) -> Self {
        Self { baseline }
    }

    pub fn is_baseline(&self) -> bool {
        self.baseline
    }

    /// Compute the loss terms; draws the hint mask from `rng` unless baseline
    pub fn forward<B: Backend, R: Rng + ?Sized>(
        &self,
        logits: Tensor<B, 2>,
        pre_confidence: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
        lambda: f64,
        rng: &mut R,
    ) -> LossOutput<B> {
        let [batch_size, num_classes] = logits.dims();
        let device = logits.device();

        let prediction = squash_prediction(logits);
        let confidence = squash_confidence(pre_confidence);

        let (mixed_prediction, hint_mask) = if self.baseline {
            (prediction.clone(), None)
        } else {
            let mask = sample_hint_mask(rng, batch_size);
            let mask_tensor = Tensor::<B, 2>::from_data(
                TensorData::new(mask.clone(), [batch_size, 1]),
                &device,
            );
            let gate = hint_gate(confidence.clone(), mask_tensor);
            let labels = one_hot(&targets, num_classes);
            (mix_with_targets(prediction.clone(), labels, gate), Some(mask))
        };

        let xentropy = nll_loss(mixed_prediction.clone().log(), targets);
        let confidence_loss = confidence.clone().log().neg().mean();

        let total = if self.baseline {
            xentropy.clone()
        } else {
            xentropy.clone() + confidence_loss.clone().mul_scalar(lambda)
        };

        LossOutput {
            total,
            xentropy,
            confidence_loss,
            prediction,
            mixed_prediction,
            confidence,
            hint_mask,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    type TestBackend = NdArray;

    fn floats(values: Vec<f32>, shape: [usize; 2]) -> Tensor<TestBackend, 2> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    fn labels(values: Vec<i64>) -> Tensor<TestBackend, 1, Int> {
        let len = values.len();
        Tensor::from_data(TensorData::new(values, [len]), &Default::default())
    }

    fn host(tensor: Tensor<TestBackend, 2>) -> Vec<f32> {
        tensor.to_data().iter::<f32>().collect()
    }

    #[test]
    fn test_extreme_logits_stay_finite() {
        let logits = floats(vec![50.0, -50.0, -50.0, 50.0], [2, 2]);
        let pre_confidence = floats(vec![-50.0, 50.0], [2, 1]);
        let targets = labels(vec![1, 1]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let output = ConfidenceLoss::new(false).forward(logits, pre_confidence, targets, 0.1, &mut rng);
        assert!(output.xentropy_value().is_finite());
        assert!(output.confidence_value().is_finite());
        assert!(output.total.into_scalar().is_finite());

        for value in host(output.prediction) {
            assert!(value >= 1e-12 && value <= 1.0);
        }
    }

    #[test]
    fn test_baseline_keeps_prediction_unmixed() {
        let logits = floats(vec![1.0, 2.0, 0.5, -1.0, 0.0, 3.0], [2, 3]);
        let pre_confidence = floats(vec![0.0, 1.0], [2, 1]);
        let targets = labels(vec![0, 2]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let output = ConfidenceLoss::new(true).forward(logits, pre_confidence, targets, 5.0, &mut rng);
        assert!(output.hint_mask.is_none());
        assert_eq!(host(output.prediction.clone()), host(output.mixed_prediction.clone()));

        let total = output.total.into_scalar();
        let xentropy = output.xentropy.into_scalar();
        assert_eq!(total, xentropy);
    }

    #[test]
    fn test_gate_follows_hint_mask() {
        let logits = floats(vec![0.0; 8 * 4], [8, 4]);
        let pre_confidence = floats(vec![0.0; 8], [8, 1]);
        let targets = labels(vec![0, 1, 2, 3, 0, 1, 2, 3]);
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        let output = ConfidenceLoss::new(false).forward(logits, pre_confidence, targets, 0.1, &mut rng);
        let mask = output.hint_mask.clone().unwrap();
        assert_eq!(mask, sample_hint_mask(&mut ChaCha8Rng::seed_from_u64(11), 8));

        // p = 0.25 everywhere, c = 0.5: hinted rows mix halfway toward y
        let mixed = host(output.mixed_prediction);
        for (row, &b) in mask.iter().enumerate() {
            let target = row % 4;
            for class in 0..4 {
                let value = mixed[row * 4 + class];
                let expected = match (b == 1.0, class == target) {
                    (true, true) => 0.625,
                    (true, false) => 0.125,
                    (false, _) => 0.25,
                };
                assert!((value - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_hint_gate_formula() {
        let confidence = floats(vec![0.2, 0.7], [2, 1]);
        let mask = floats(vec![1.0, 0.0], [2, 1]);
        let gate = host(hint_gate(confidence, mask));
        assert!((gate[0] - 0.2).abs() < 1e-6);
        assert!((gate[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_total_includes_weighted_penalty() {
        let logits = floats(vec![2.0, 0.0, 0.0, 2.0], [2, 2]);
        let pre_confidence = floats(vec![0.0, 0.0], [2, 1]);
        let targets = labels(vec![0, 1]);
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let output = ConfidenceLoss::new(false).forward(logits, pre_confidence, targets, 0.5, &mut rng);
        // c = 0.5 for both samples
        assert!((output.confidence_value() - std::f64::consts::LN_2).abs() < 1e-5);

        let total = output.total.clone().into_scalar() as f64;
        let expected = output.xentropy_value() + 0.5 * output.confidence_value();
        assert!((total - expected).abs() < 1e-5);
    }

    #[test]
    fn test_one_hot_rows() {
        let encoded = host(one_hot(&labels(vec![2, 0]), 3));
        assert_eq!(encoded, vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "out of range")]
    fn test_one_hot_rejects_label_past_classes() {
        one_hot(&labels(vec![0, 3]), 3);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "out of range")]
    fn test_one_hot_rejects_negative_label() {
        one_hot(&labels(vec![-1]), 3);
    }
}
