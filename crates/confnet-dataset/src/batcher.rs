//! Burn batcher turning image items into tensors.

use std::sync::atomic::{AtomicU64, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::augmentation::Augmenter;
use crate::dataset::ImageItem;
use crate::{CHANNELS, IMAGE_SIZE};

/// A batch of images and their labels
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Images with shape `[batch_size, 3, 32, 32]`
    pub images: Tensor<B, 4>,
    /// Labels with shape `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Batcher applying augmentation and normalization per item
///
/// Every batch draws its randomness from a generator seeded with the run
/// seed and a batch counter, so runs with the same seed see the same
/// augmentation.
pub struct ImageBatcher {
    augmenter: Augmenter,
    seed: u64,
    batches_built: AtomicU64,
}

impl Clone for ImageBatcher {
    fn clone(&self) -> Self {
        Self {
            augmenter: self.augmenter.clone(),
            seed: self.seed,
            batches_built: AtomicU64::new(self.batches_built.load(Ordering::Relaxed)),
        }
    }
}

impl std::fmt::Debug for ImageBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBatcher")
            .field("augmentation", self.augmenter.config())
            .field("seed", &self.seed)
            .finish()
    }
}

impl ImageBatcher {
    pub fn new(augmenter: Augmenter, seed: u64) -> Self {
        Self {
            augmenter,
            seed,
            batches_built: AtomicU64::new(0),
        }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let counter = self.batches_built.fetch_add(1, Ordering::Relaxed);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(counter));

        let mut images_data = Vec::with_capacity(batch_size * CHANNELS * IMAGE_SIZE * IMAGE_SIZE);
        let mut targets_data = Vec::with_capacity(batch_size);

        for item in items {
            images_data.extend(self.augmenter.preprocess(&item.pixels, &mut rng));
            targets_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, CHANNELS, IMAGE_SIZE, IMAGE_SIZE]),
            device,
        );
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ImageBatch { images, targets }
    }
}
