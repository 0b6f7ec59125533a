//! Training loop for confidence-gated classifiers.
//!
//! Per batch: forward, loss, backward, optimizer step, then (outside
//! baseline mode) a budget update of lambda from the batch's confidence
//! loss. The learning rate only changes between epochs.

use burn::{
    module::AutodiffModule,
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, GradientsParams, Optimizer, SgdConfig,
    },
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use confnet_core::{
    AccuracyCounter, DecaySchedule, EpochSummary, Error, OptimizerSettings, ResolvedRun, Result,
    RunningMean,
};
use confnet_dataset::ImageBatch;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::budget::BudgetController;
use crate::evaluator::{self, EvaluationResult};
use crate::loss::ConfidenceLoss;
use crate::lr_schedule::{LearningRateScheduler, SchedulerType};
use crate::model::ConfidenceNet;

/// Progress of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingState {
    /// Epochs completed so far
    pub epoch: usize,
    /// Batches processed across all epochs
    pub global_step: usize,
    pub history: Vec<EpochSummary>,
}

/// Configuration for the trainer
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub learning_rate: f64,
    pub baseline: bool,
    pub budget: f64,
    pub schedule: DecaySchedule,
    pub seed: u64,
}

impl From<&ResolvedRun> for TrainerConfig {
    fn from(run: &ResolvedRun) -> Self {
        Self {
            learning_rate: run.config.learning_rate,
            baseline: run.config.baseline,
            budget: run.config.budget,
            schedule: run.config.decay_schedule(),
            seed: run.config.seed,
        }
    }
}

/// Running figures reported after every batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchReport {
    /// Index of the batch within the epoch
    pub batch: usize,
    /// Global batch counter, 1-based
    pub step: usize,
    pub xentropy_avg: f64,
    pub confidence_avg: f64,
    pub accuracy: f64,
    pub lambda: f64,
}

/// SGD with Nesterov momentum and weight decay
pub fn build_optimizer<B: AutodiffBackend>(
    settings: &OptimizerSettings,
) -> impl Optimizer<ConfidenceNet<B>, B> {
    let momentum = MomentumConfig::new()
        .with_momentum(settings.momentum)
        .with_dampening(0.0)
        .with_nesterov(settings.nesterov);

    SgdConfig::new()
        .with_momentum(Some(momentum))
        .with_weight_decay(Some(WeightDecayConfig::new(settings.weight_decay)))
        .init()
}

/// Owns the model, optimizer, budget controller and loss randomness
pub struct Trainer<B: AutodiffBackend, O: Optimizer<ConfidenceNet<B>, B>> {
    model: ConfidenceNet<B>,
    optimizer: O,
    loss: ConfidenceLoss,
    controller: BudgetController,
    scheduler: LearningRateScheduler,
    rng: ChaCha8Rng,
    state: TrainingState,
}

/// ChaCha stream for hint masks; the batchers draw augmentation from stream 0
const HINT_STREAM: u64 = 1;

fn hint_rng(seed: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(HINT_STREAM);
    rng
}

impl<B, O> Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<ConfidenceNet<B>, B>,
{
    pub fn new(model: ConfidenceNet<B>, optimizer: O, config: TrainerConfig) -> Self {
        Self {
            model,
            optimizer,
            loss: ConfidenceLoss::new(config.baseline),
            controller: BudgetController::new(config.budget),
            scheduler: LearningRateScheduler::new(
                SchedulerType::from(config.schedule),
                config.learning_rate,
            ),
            rng: hint_rng(config.seed),
            state: TrainingState::default(),
        }
    }

    pub fn model(&self) -> &ConfidenceNet<B> {
        &self.model
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn lambda(&self) -> f64 {
        self.controller.lambda()
    }

    pub fn learning_rate(&self) -> f64 {
        self.scheduler.get_lr()
    }

    /// Train over one epoch of batches, calling `on_batch` after each step
    pub fn train_epoch<I, F>(&mut self, batches: I, mut on_batch: F) -> Result<EpochSummary>
    where
        I: IntoIterator<Item = ImageBatch<B>>,
        F: FnMut(&BatchReport),
    {
        let learning_rate = self.scheduler.get_lr();
        let mut xentropy = RunningMean::new();
        let mut confidence = RunningMean::new();
        let mut accuracy = AccuracyCounter::new();

        for (index, batch) in batches.into_iter().enumerate() {
            let batch_size = batch.len();
            let output = self.model.forward(batch.images);
            let loss = self.loss.forward(
                output.logits,
                output.pre_confidence,
                batch.targets.clone(),
                self.controller.lambda(),
                &mut self.rng,
            );

            let xentropy_value = loss.xentropy_value();
            let confidence_value = loss.confidence_value();

            let correct: i64 = loss
                .prediction
                .clone()
                .argmax(1)
                .reshape([batch_size])
                .equal(batch.targets)
                .int()
                .sum()
                .into_scalar()
                .elem();

            let grads = loss.total.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = self.optimizer.step(learning_rate, self.model.clone(), grads);

            if !self.loss.is_baseline() {
                self.controller.update(confidence_value);
            }

            xentropy.push(xentropy_value);
            confidence.push(confidence_value);
            accuracy.add(correct.max(0) as usize, batch_size);
            self.state.global_step += 1;

            on_batch(&BatchReport {
                batch: index,
                step: self.state.global_step,
                xentropy_avg: xentropy.mean(),
                confidence_avg: confidence.mean(),
                accuracy: accuracy.accuracy(),
                lambda: self.controller.lambda(),
            });
        }

        if accuracy.total() == 0 {
            return Err(Error::Training(format!(
                "Epoch {} produced no training batches",
                self.state.epoch
            )));
        }

        let summary = EpochSummary {
            epoch: self.state.epoch,
            xentropy_loss: xentropy.mean(),
            confidence_loss: confidence.mean(),
            train_accuracy: accuracy.accuracy(),
            lambda: self.controller.lambda(),
            learning_rate,
        };
        debug!(
            "Epoch {} trained on {} samples",
            summary.epoch,
            accuracy.total()
        );
        Ok(summary)
    }

    /// Close the current epoch: record it and advance the LR schedule
    pub fn finish_epoch(&mut self, summary: EpochSummary) -> f64 {
        let lr = self.scheduler.step(self.state.epoch);
        self.state.history.push(summary);
        self.state.epoch += 1;
        lr
    }

    /// Evaluate an inference copy of the current model
    pub fn evaluate<I>(&self, batches: I) -> Result<EvaluationResult>
    where
        I: IntoIterator<Item = ImageBatch<B::InnerBackend>>,
    {
        let mut model = self.model.valid();
        evaluator::evaluate(&mut model, batches)
    }
}
