//! Epoch-wise batch iteration over an image dataset.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use confnet_core::{Error, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::batcher::{ImageBatch, ImageBatcher};
use crate::dataset::{ImageDataset, ImageItem};

/// Fraction of a split kept when subsampling (1 in 100)
const SUBSAMPLE_DIVISOR: usize = 100;

/// Serves batches of a dataset, one epoch at a time
///
/// Without subsampling the dataset is visited in storage order. With
/// subsampling only the first 1% is used and it is reshuffled every epoch.
pub struct BatchLoader {
    dataset: ImageDataset,
    batcher: ImageBatcher,
    batch_size: usize,
    subsample: bool,
    rng: ChaCha8Rng,
}

impl BatchLoader {
    pub fn new(
        dataset: ImageDataset,
        batcher: ImageBatcher,
        batch_size: usize,
        subsample: bool,
        seed: u64,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config("Batch size must be greater than 0".to_string()));
        }
        let loader = Self {
            dataset,
            batcher,
            batch_size,
            subsample,
            rng: ChaCha8Rng::seed_from_u64(seed),
        };
        if loader.num_samples() == 0 {
            return Err(Error::Dataset(format!(
                "No {} samples left to iterate{}",
                loader.dataset.kind(),
                if subsample { " after subsampling" } else { "" }
            )));
        }
        Ok(loader)
    }

    /// Samples visited per epoch
    pub fn num_samples(&self) -> usize {
        if self.subsample {
            self.dataset.len() / SUBSAMPLE_DIVISOR
        } else {
            self.dataset.len()
        }
    }

    /// Batches per epoch
    pub fn num_batches(&self) -> usize {
        self.num_samples().div_ceil(self.batch_size)
    }

    /// Sample order for the next epoch
    pub fn epoch_order(&mut self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.num_samples()).collect();
        if self.subsample {
            indices.shuffle(&mut self.rng);
        }
        indices
    }

    /// Iterate the batches of one epoch
    pub fn epoch<'a, B: Backend>(&'a mut self, device: &'a B::Device) -> EpochBatches<'a, B> {
        let order = self.epoch_order();
        debug!(
            "Epoch plan: {} samples in {} batches",
            order.len(),
            self.num_batches()
        );
        EpochBatches {
            loader: self,
            order,
            position: 0,
            device,
        }
    }
}

/// Iterator over the batches of one epoch
pub struct EpochBatches<'a, B: Backend> {
    loader: &'a BatchLoader,
    order: Vec<usize>,
    position: usize,
    device: &'a B::Device,
}

impl<B: Backend> Iterator for EpochBatches<'_, B> {
    type Item = ImageBatch<B>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.loader.batch_size).min(self.order.len());
        let items: Vec<_> = self.order[self.position..end]
            .iter()
            .filter_map(|&i| self.loader.dataset.get(i))
            .collect();
        self.position = end;

        Some(<ImageBatcher as Batcher<B, ImageItem, ImageBatch<B>>>::batch(
            &self.loader.batcher,
            items,
            self.device,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augmentation::{AugmentationConfig, Augmenter};
    use crate::{CHANNELS, IMAGE_SIZE};
    use burn_ndarray::NdArray;
    use confnet_core::DatasetKind;

    type TestBackend = NdArray;

    fn dataset(n: usize) -> ImageDataset {
        let items = (0..n)
            .map(|i| ImageItem {
                pixels: vec![0u8; CHANNELS * IMAGE_SIZE * IMAGE_SIZE],
                label: i % 10,
            })
            .collect();
        ImageDataset::new(DatasetKind::Cifar10, items)
    }

    fn batcher() -> ImageBatcher {
        ImageBatcher::new(
            Augmenter::new(AugmentationConfig::none(), DatasetKind::Cifar10),
            0,
        )
    }

    #[test]
    fn test_sequential_epoch() {
        let mut loader = BatchLoader::new(dataset(10), batcher(), 4, false, 0).unwrap();
        assert_eq!(loader.num_batches(), 3);
        assert_eq!(loader.epoch_order(), (0..10).collect::<Vec<_>>());

        let device = <TestBackend as Backend>::Device::default();
        let sizes: Vec<usize> = loader
            .epoch::<TestBackend>(&device)
            .map(|batch| batch.len())
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_subsample_keeps_first_percent_shuffled() {
        let mut loader = BatchLoader::new(dataset(1000), batcher(), 4, true, 5).unwrap();
        assert_eq!(loader.num_samples(), 10);

        let mut first = loader.epoch_order();
        let second = loader.epoch_order();
        assert_ne!(first, second);

        first.sort_unstable();
        assert_eq!(first, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_subsample_is_an_error() {
        let result = BatchLoader::new(dataset(50), batcher(), 4, true, 0);
        assert!(matches!(result, Err(Error::Dataset(_))));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(BatchLoader::new(dataset(10), batcher(), 0, false, 0).is_err());
    }
}
