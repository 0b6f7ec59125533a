//! Image dataset loading, augmentation and batching.
//!
//! This crate reads the CIFAR-10 and SVHN binary record files, applies the
//! training-time augmentation pipeline and turns items into burn tensors.

pub mod augmentation;
pub mod batcher;
pub mod dataset;
pub mod loader;

pub use augmentation::{Augmenter, AugmentationConfig};
pub use batcher::{ImageBatch, ImageBatcher};
pub use dataset::{ImageDataset, ImageItem, Split};
pub use loader::{BatchLoader, EpochBatches};

/// Side length of the square input images
pub const IMAGE_SIZE: usize = 32;

/// Number of color channels
pub const CHANNELS: usize = 3;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::augmentation::*;
    pub use crate::batcher::*;
    pub use crate::dataset::*;
    pub use crate::loader::*;
}
