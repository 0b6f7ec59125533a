//! Test-set evaluation with confidence statistics.

use burn::tensor::{
    activation::{sigmoid, softmax},
    backend::Backend,
};
use confnet_core::{AccuracyCounter, Error, ModelMode, Result};
use confnet_dataset::ImageBatch;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{ConfidenceClassifier, ModeGuard, ModeSwitch};

/// Per-sample record kept for the confidence histogram
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleOutcome {
    pub correct: bool,
    /// Highest softmax probability
    pub probability: f32,
    /// Unclamped sigmoid of the confidence logit
    pub confidence: f32,
}

/// Result of one pass over the test split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub accuracy: f64,
    pub conf_min: f64,
    pub conf_max: f64,
    pub conf_avg: f64,
    pub outcomes: Vec<SampleOutcome>,
}

impl EvaluationResult {
    pub fn total_samples(&self) -> usize {
        self.outcomes.len()
    }

    /// Histogram inputs split into (correct, incorrect).
    ///
    /// Baseline runs have no trained confidence head, so the max class
    /// probability is used instead.
    pub fn histogram_values(&self, baseline: bool) -> (Vec<f32>, Vec<f32>) {
        let value = |o: &SampleOutcome| if baseline { o.probability } else { o.confidence };
        let correct = self.outcomes.iter().filter(|o| o.correct).map(value).collect();
        let incorrect = self.outcomes.iter().filter(|o| !o.correct).map(value).collect();
        (correct, incorrect)
    }
}

/// Run `model` over every batch in eval mode.
///
/// The model's previous mode is restored on return, including on error.
pub fn evaluate<B, M, I>(model: &mut M, batches: I) -> Result<EvaluationResult>
where
    B: Backend,
    M: ConfidenceClassifier<B> + ModeSwitch,
    I: IntoIterator<Item = ImageBatch<B>>,
{
    let model = ModeGuard::new(model, ModelMode::Eval);

    let mut accuracy = AccuracyCounter::new();
    let mut outcomes = Vec::new();

    for batch in batches {
        let batch_size = batch.len();
        let output = model.forward(batch.images);

        let probabilities = softmax(output.logits, 1);
        let predicted = probabilities.clone().argmax(1).reshape([batch_size]);
        let max_probability = probabilities.max_dim(1).reshape([batch_size]);
        let confidence = sigmoid(output.pre_confidence).reshape([batch_size]);

        let predicted: Vec<i64> = predicted.to_data().iter::<i64>().collect();
        let labels: Vec<i64> = batch.targets.to_data().iter::<i64>().collect();
        let max_probability: Vec<f32> = max_probability.to_data().iter::<f32>().collect();
        let confidence: Vec<f32> = confidence.to_data().iter::<f32>().collect();

        let mut batch_correct = 0;
        for i in 0..batch_size {
            let correct = predicted[i] == labels[i];
            batch_correct += usize::from(correct);
            outcomes.push(SampleOutcome {
                correct,
                probability: max_probability[i],
                confidence: confidence[i],
            });
        }
        accuracy.add(batch_correct, batch_size);
    }

    if outcomes.is_empty() {
        return Err(Error::Training("Cannot evaluate on an empty test set".to_string()));
    }

    let (conf_min, conf_max, conf_sum) = outcomes.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, 0.0),
        |(min, max, sum), o| {
            let c = f64::from(o.confidence);
            (min.min(c), max.max(c), sum + c)
        },
    );

    debug!("Evaluated {} samples", outcomes.len());

    Ok(EvaluationResult {
        accuracy: accuracy.accuracy(),
        conf_min,
        conf_max,
        conf_avg: conf_sum / outcomes.len() as f64,
        outcomes,
    })
}
