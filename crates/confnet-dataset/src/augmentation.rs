//! Training-time augmentation for 32x32 images.
//!
//! Images are handled as CHW `f32` planes. Spatial augmentation (random
//! crop with zero padding, horizontal flip) runs on the `[0, 1]` image;
//! cutout runs after normalization so the erased patch is exactly zero.

use confnet_core::{DatasetKind, RunConfig};
use rand::Rng;

use crate::{CHANNELS, IMAGE_SIZE};

/// Augmentation configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentationConfig {
    /// Zero padding for random crops, `None` disables cropping
    pub crop_padding: Option<usize>,
    /// Random horizontal flip with probability 0.5
    pub horizontal_flip: bool,
    /// Cutout patch length, 0 disables cutout
    pub cutout: usize,
}

impl AugmentationConfig {
    /// No augmentation at all (evaluation)
    pub fn none() -> Self {
        Self {
            crop_padding: None,
            horizontal_flip: false,
            cutout: 0,
        }
    }

    /// Training pipeline for a run
    pub fn for_training(config: &RunConfig) -> Self {
        let (crop_padding, horizontal_flip) = if config.data_augmentation {
            (Some(4), config.dataset.allows_horizontal_flip())
        } else {
            (None, false)
        };
        Self {
            crop_padding,
            horizontal_flip,
            cutout: config.cutout,
        }
    }
}

/// Applies augmentation and normalization to single images
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentationConfig,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Augmenter {
    pub fn new(config: AugmentationConfig, dataset: DatasetKind) -> Self {
        Self {
            config,
            mean: dataset.mean(),
            std: dataset.std(),
        }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Turn raw CHW bytes into a normalized, augmented CHW float image
    pub fn preprocess<R: Rng + ?Sized>(&self, pixels: &[u8], rng: &mut R) -> Vec<f32> {
        let mut image: Vec<f32> = pixels.iter().map(|&p| p as f32 / 255.0).collect();

        if let Some(padding) = self.config.crop_padding {
            image = random_crop(&image, padding, rng);
        }
        if self.config.horizontal_flip && rng.gen_bool(0.5) {
            flip_horizontal(&mut image);
        }

        self.normalize(&mut image);

        if self.config.cutout > 0 {
            cutout(&mut image, self.config.cutout, rng);
        }
        image
    }

    fn normalize(&self, image: &mut [f32]) {
        let plane = IMAGE_SIZE * IMAGE_SIZE;
        for (c, channel) in image.chunks_mut(plane).enumerate().take(CHANNELS) {
            for value in channel.iter_mut() {
                *value = (*value - self.mean[c]) / self.std[c];
            }
        }
    }
}

/// Crop a 32x32 window out of the image padded with `padding` zeros per side
pub fn random_crop<R: Rng + ?Sized>(image: &[f32], padding: usize, rng: &mut R) -> Vec<f32> {
    let size = IMAGE_SIZE as isize;
    let pad = padding as isize;
    let dy = rng.gen_range(0..=2 * padding) as isize - pad;
    let dx = rng.gen_range(0..=2 * padding) as isize - pad;

    let mut out = vec![0.0f32; image.len()];
    for c in 0..CHANNELS as isize {
        for y in 0..size {
            let src_y = y + dy;
            if !(0..size).contains(&src_y) {
                continue;
            }
            for x in 0..size {
                let src_x = x + dx;
                if !(0..size).contains(&src_x) {
                    continue;
                }
                let dst = (c * size * size + y * size + x) as usize;
                let src = (c * size * size + src_y * size + src_x) as usize;
                out[dst] = image[src];
            }
        }
    }
    out
}

/// Mirror every row of every channel
pub fn flip_horizontal(image: &mut [f32]) {
    for row in image.chunks_mut(IMAGE_SIZE) {
        row.reverse();
    }
}

/// Zero a `length` square centred on a random pixel, clipped at the borders
pub fn cutout<R: Rng + ?Sized>(image: &mut [f32], length: usize, rng: &mut R) {
    let center_y = rng.gen_range(0..IMAGE_SIZE);
    let center_x = rng.gen_range(0..IMAGE_SIZE);
    erase_patch(image, center_y, center_x, length);
}

fn erase_patch(image: &mut [f32], center_y: usize, center_x: usize, length: usize) {
    let half = length / 2;
    let y1 = center_y.saturating_sub(half);
    let y2 = (center_y + half).min(IMAGE_SIZE);
    let x1 = center_x.saturating_sub(half);
    let x2 = (center_x + half).min(IMAGE_SIZE);

    let plane = IMAGE_SIZE * IMAGE_SIZE;
    for c in 0..CHANNELS {
        for y in y1..y2 {
            let row = c * plane + y * IMAGE_SIZE;
            image[row + x1..row + x2].fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const LEN: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;

    fn ramp() -> Vec<f32> {
        (0..LEN).map(|i| (i % 251) as f32 + 1.0).collect()
    }

    #[test]
    fn test_flip_twice_is_identity() {
        let original = ramp();
        let mut image = original.clone();
        flip_horizontal(&mut image);
        assert_ne!(image, original);
        assert_eq!(image[0], original[IMAGE_SIZE - 1]);
        flip_horizontal(&mut image);
        assert_eq!(image, original);
    }

    #[test]
    fn test_random_crop_preserves_shape_and_values() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let original = ramp();
        let cropped = random_crop(&original, 4, &mut rng);
        assert_eq!(cropped.len(), LEN);
        // every non-zero value must come from the source image
        assert!(cropped
            .iter()
            .filter(|&&v| v != 0.0)
            .all(|v| original.contains(v)));
    }

    #[test]
    fn test_zero_padding_crop_is_identity() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let original = ramp();
        assert_eq!(random_crop(&original, 0, &mut rng), original);
    }

    #[test]
    fn test_erase_patch_clips_at_border() {
        let mut image = vec![1.0f32; LEN];
        erase_patch(&mut image, 0, 0, 16);
        let zeros = image.iter().filter(|&&v| v == 0.0).count();
        // 8x8 window per channel survives the clip
        assert_eq!(zeros, CHANNELS * 8 * 8);
        assert_eq!(image[0], 0.0);
        assert_eq!(image[8], 1.0);
    }

    #[test]
    fn test_erase_patch_interior() {
        let mut image = vec![1.0f32; LEN];
        erase_patch(&mut image, 16, 16, 16);
        let zeros = image.iter().filter(|&&v| v == 0.0).count();
        assert_eq!(zeros, CHANNELS * 16 * 16);
    }

    #[test]
    fn test_preprocess_normalizes_without_augmentation() {
        let augmenter = Augmenter::new(AugmentationConfig::none(), DatasetKind::Cifar10);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let pixels = vec![255u8; LEN];
        let image = augmenter.preprocess(&pixels, &mut rng);

        let mean = DatasetKind::Cifar10.mean();
        let std = DatasetKind::Cifar10.std();
        let expected_red = (1.0 - mean[0]) / std[0];
        assert!((image[0] - expected_red).abs() < 1e-5);
        let expected_blue = (1.0 - mean[2]) / std[2];
        assert!((image[LEN - 1] - expected_blue).abs() < 1e-5);
    }

    #[test]
    fn test_training_config_mapping() {
        let config = RunConfig {
            data_augmentation: true,
            dataset: DatasetKind::Svhn,
            cutout: 20,
            ..Default::default()
        };
        let aug = AugmentationConfig::for_training(&config);
        assert_eq!(aug.crop_padding, Some(4));
        assert!(!aug.horizontal_flip);
        assert_eq!(aug.cutout, 20);

        let plain = AugmentationConfig::for_training(&RunConfig::default());
        assert_eq!(plain.crop_padding, None);
        assert_eq!(plain.cutout, 16);
    }

    #[test]
    fn test_preprocess_is_deterministic_for_seed() {
        let config = AugmentationConfig {
            crop_padding: Some(4),
            horizontal_flip: true,
            cutout: 16,
        };
        let augmenter = Augmenter::new(config, DatasetKind::Cifar10);
        let pixels: Vec<u8> = (0..LEN).map(|i| (i % 256) as u8).collect();

        let a = augmenter.preprocess(&pixels, &mut ChaCha8Rng::seed_from_u64(42));
        let b = augmenter.preprocess(&pixels, &mut ChaCha8Rng::seed_from_u64(42));
        assert_eq!(a, b);
    }
}
