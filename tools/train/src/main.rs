//! Training CLI Tool
//!
//! Trains an image classifier together with a learned confidence estimate
//! whose penalty weight is steered toward a budget.

use anyhow::{Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, Autodiff, NdArray},
    tensor::backend::Backend,
};
use clap::Parser;
use confnet_core::{
    init_device, load_toml_config, setup_cli_logging, DatasetKind, Device, ModelKind, ResolvedRun,
    RunConfig,
};
use confnet_dataset::{AugmentationConfig, Augmenter, BatchLoader, ImageBatcher, ImageDataset, Split};
use confnet_training::{
    build_optimizer, CheckpointMetadata, CheckpointWriter, ConfidenceNet, CsvLogger, EventLog,
    ScalarRecord, Trainer, TrainerConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::info;

/// Confidence-gated classifier training
#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train a classifier with a learned confidence estimate",
    long_about = "Train VGG-13, WideResNet or DenseNet-BC on CIFAR-10 or SVHN with a \
                  confidence branch whose penalty is kept near a budget."
)]
struct Args {
    /// Path to a run configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Dataset: cifar10 or svhn
    #[arg(long)]
    dataset: Option<DatasetKind>,

    /// Model: wideresnet, densenet or vgg13
    #[arg(long)]
    model: Option<ModelKind>,

    #[arg(long, value_name = "SIZE")]
    batch_size: Option<usize>,

    #[arg(long, value_name = "N")]
    epochs: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_name = "LR")]
    learning_rate: Option<f64>,

    /// Random crop and flip on training images
    #[arg(long)]
    data_augmentation: bool,

    /// Cutout patch size (0 disables)
    #[arg(long, value_name = "SIZE")]
    cutout: Option<usize>,

    /// Target confidence penalty
    #[arg(long)]
    budget: Option<f64>,

    /// Train without confidence estimation
    #[arg(long)]
    baseline: bool,

    /// Device index, -1 for CPU
    #[arg(long, allow_negative_numbers = true)]
    device: Option<i32>,

    /// Directory for live metrics
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Write per-batch scalars and per-epoch histograms to --log-dir
    #[arg(long)]
    live_metrics: bool,

    /// Use 1% of the data
    #[arg(long)]
    subsample: bool,

    /// Directory holding the dataset files
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    setup_cli_logging(args.verbose)?;

    let mut config = match &args.config {
        Some(path) => load_toml_config::<RunConfig>(path)
            .context("Failed to load configuration file")?,
        None => RunConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    let resolved = config.resolve();
    print_config_summary(&resolved);

    match init_device(resolved.config.device, cfg!(feature = "wgpu"))? {
        Device::Cpu => run_training::<NdArray>(&resolved, NdArrayDevice::Cpu),
        #[cfg(feature = "wgpu")]
        Device::Gpu(id) => run_training::<burn::backend::Wgpu>(
            &resolved,
            burn::backend::wgpu::WgpuDevice::DiscreteGpu(id),
        ),
        #[cfg(not(feature = "wgpu"))]
        Device::Gpu(id) => anyhow::bail!("GPU {} is not available in this build", id),
    }
}

fn apply_overrides(config: &mut RunConfig, args: &Args) {
    if let Some(dataset) = args.dataset {
        config.dataset = dataset;
    }
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(lr) = args.learning_rate {
        config.learning_rate = lr;
    }
    if let Some(cutout) = args.cutout {
        config.cutout = cutout;
    }
    if let Some(budget) = args.budget {
        config.budget = budget;
    }
    if let Some(device) = args.device {
        config.device = device;
    }
    if let Some(ref log_dir) = args.log_dir {
        config.log_dir = Some(log_dir.clone());
    }
    if let Some(ref data_dir) = args.data_dir {
        config.data_dir = data_dir.clone();
    }
    config.data_augmentation |= args.data_augmentation;
    config.baseline |= args.baseline;
    config.live_metrics |= args.live_metrics;
    config.subsample |= args.subsample;
}

fn print_config_summary(run: &ResolvedRun) {
    let config = &run.config;
    info!("Configuration Summary:");
    info!("  Run: {}", run.run_name);
    info!("  Dataset: {}", config.dataset);
    info!("  Model: {}", run.architecture);
    info!("  Epochs: {}", config.epochs);
    info!("  Batch size: {}", config.batch_size);
    info!("  Learning rate: {}", config.learning_rate);
    info!("  Augmentation: {} (cutout {})", config.data_augmentation, config.cutout);
    info!("  Budget: {}{}", config.budget, if config.baseline { " (baseline)" } else { "" });
    info!("  Seed: {}", config.seed);
    info!("  Subsample: {}", config.subsample);
}

fn build_loader(
    config: &RunConfig,
    split: Split,
    augmentation: AugmentationConfig,
    seed: u64,
) -> Result<BatchLoader> {
    let dataset = ImageDataset::load(config.dataset, &config.data_dir, split)
        .with_context(|| format!("Failed to load {} {:?} split", config.dataset, split))?;
    info!("Loaded {} {:?} samples", dataset.items().len(), split);

    let batcher = ImageBatcher::new(Augmenter::new(augmentation, config.dataset), seed);
    Ok(BatchLoader::new(
        dataset,
        batcher,
        config.batch_size,
        config.subsample,
        seed,
    )?)
}

fn run_training<B: Backend>(resolved: &ResolvedRun, device: B::Device) -> Result<()> {
    let config = &resolved.config;
    Autodiff::<B>::seed(config.seed);

    let mut train_loader = build_loader(
        config,
        Split::Train,
        AugmentationConfig::for_training(config),
        config.seed,
    )?;
    let mut test_loader = build_loader(
        config,
        Split::Test,
        AugmentationConfig::none(),
        config.seed.wrapping_add(1),
    )?;

    let model = ConfidenceNet::<Autodiff<B>>::new(resolved.architecture, resolved.num_classes, &device);
    let optimizer = build_optimizer::<Autodiff<B>>(&config.optimizer_settings());
    let mut trainer = Trainer::new(model, optimizer, TrainerConfig::from(resolved));

    let mut csv = CsvLogger::create(config.csv_dir.join(format!("{}.csv", resolved.run_name)))
        .context("Failed to create CSV log")?;
    let checkpoints = CheckpointWriter::new(&config.checkpoint_dir, &resolved.run_name)?;
    let mut event_log = match (&config.log_dir, config.live_metrics) {
        (Some(dir), true) => Some(EventLog::create(dir).context("Failed to create event log")?),
        _ => None,
    };

    let style = ProgressStyle::default_bar()
        .template("{prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
        .progress_chars("=>-");

    for epoch in 0..config.epochs {
        let progress = ProgressBar::new(train_loader.num_batches() as u64);
        progress.set_style(style.clone());
        progress.set_prefix(format!("Epoch {}", epoch));

        let mut live_error = None;
        let summary = trainer.train_epoch(train_loader.epoch::<Autodiff<B>>(&device), |report| {
            progress.inc(1);
            progress.set_message(format!(
                "xentropy {:.3} confidence {:.3} acc {:.3}",
                report.xentropy_avg, report.confidence_avg, report.accuracy
            ));
            if let Some(log) = event_log.as_mut() {
                let record = ScalarRecord {
                    step: report.step,
                    xentropy_loss: report.xentropy_avg,
                    confidence_loss: report.confidence_avg,
                    lambda: report.lambda,
                };
                if let Err(e) = log.log_scalars(&record) {
                    live_error.get_or_insert(e);
                }
            }
        })?;
        progress.finish_and_clear();
        if let Some(e) = live_error {
            return Err(e).context("Failed to write live metrics");
        }

        let next_lr = trainer.finish_epoch(summary.clone());
        let result = trainer.evaluate(test_loader.epoch::<B>(&device))?;

        info!(
            "Epoch {}: xentropy={:.4}, confidence={:.4}, train_acc={:.4}, lambda={:.4}, lr={}",
            epoch,
            summary.xentropy_loss,
            summary.confidence_loss,
            summary.train_accuracy,
            summary.lambda,
            next_lr
        );
        info!(
            "test_acc: {:.3}, conf_min: {:.3}, conf_max: {:.3}, conf_avg: {:.3}",
            result.accuracy, result.conf_min, result.conf_max, result.conf_avg
        );

        if let Some(log) = event_log.as_mut() {
            let (correct, incorrect) = result.histogram_values(config.baseline);
            log.log_histogram(epoch, &correct, &incorrect)?;
        }

        csv.write_row(epoch, summary.train_accuracy, result.accuracy)?;

        let metadata = CheckpointMetadata::new(
            &resolved.run_name,
            epoch,
            &resolved.architecture,
            config.dataset,
            result.accuracy,
            trainer.lambda(),
        );
        checkpoints.save(trainer.model(), &metadata)?;
    }

    if let Some(mut log) = event_log {
        log.flush()?;
    }
    csv.close()?;

    info!("Training completed");
    info!("  CSV log: {}", config.csv_dir.join(format!("{}.csv", resolved.run_name)).display());
    info!("  Checkpoint: {}", checkpoints.model_path().display());

    Ok(())
}
