//! CIFAR-10 and SVHN binary record datasets.
//!
//! Both datasets are read from the CIFAR binary layout: every record is one
//! label byte followed by 3072 pixel bytes stored plane by plane
//! (1024 red, 1024 green, 1024 blue). SVHN is expected pre-converted to this
//! layout with digit `0` labelled `0`.

use std::fs;
use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use confnet_core::{DatasetKind, Error, Result};
use tracing::info;

use crate::{CHANNELS, IMAGE_SIZE};

const PIXELS_PER_IMAGE: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;
const RECORD_SIZE: usize = 1 + PIXELS_PER_IMAGE;

/// Dataset split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Split::Train => write!(f, "train"),
            Split::Test => write!(f, "test"),
        }
    }
}

/// A single labelled image in CHW byte layout
#[derive(Debug, Clone, PartialEq)]
pub struct ImageItem {
    /// Pixel values, `[3, 32, 32]` row-major
    pub pixels: Vec<u8>,
    /// Class label
    pub label: usize,
}

/// In-memory image dataset
#[derive(Debug, Clone)]
pub struct ImageDataset {
    kind: DatasetKind,
    items: Vec<ImageItem>,
}

impl ImageDataset {
    /// Wrap already decoded items
    pub fn new(kind: DatasetKind, items: Vec<ImageItem>) -> Self {
        Self { kind, items }
    }

    /// Load a split from `data_dir`
    pub fn load(kind: DatasetKind, data_dir: &Path, split: Split) -> Result<Self> {
        let files = record_files(kind, data_dir, split);
        let mut items = Vec::new();

        for file in &files {
            if !file.exists() {
                return Err(Error::Dataset(format!(
                    "Missing {} {} file: {}",
                    kind,
                    split,
                    file.display()
                )));
            }
            let bytes = fs::read(file)?;
            items.extend(parse_records(&bytes, kind.num_classes())?);
        }

        info!("Loaded {} {} {} images", items.len(), kind, split);
        Ok(Self { kind, items })
    }

    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    pub fn items(&self) -> &[ImageItem] {
        &self.items
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Files that make up a split
fn record_files(kind: DatasetKind, data_dir: &Path, split: Split) -> Vec<PathBuf> {
    match (kind, split) {
        (DatasetKind::Cifar10, Split::Train) => {
            let dir = data_dir.join("cifar-10-batches-bin");
            (1..=5)
                .map(|i| dir.join(format!("data_batch_{}.bin", i)))
                .collect()
        }
        (DatasetKind::Cifar10, Split::Test) => {
            vec![data_dir.join("cifar-10-batches-bin").join("test_batch.bin")]
        }
        (DatasetKind::Svhn, Split::Train) => vec![data_dir.join("svhn").join("train.bin")],
        (DatasetKind::Svhn, Split::Test) => vec![data_dir.join("svhn").join("test.bin")],
    }
}

/// Decode a buffer of fixed-size records
pub fn parse_records(bytes: &[u8], num_classes: usize) -> Result<Vec<ImageItem>> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(Error::Dataset(format!(
            "Invalid record file size {}: not a multiple of {}",
            bytes.len(),
            RECORD_SIZE
        )));
    }

    bytes
        .chunks_exact(RECORD_SIZE)
        .map(|record| {
            let label = record[0] as usize;
            if label >= num_classes {
                return Err(Error::Dataset(format!(
                    "Label {} out of range for {} classes",
                    label, num_classes
                )));
            }
            Ok(ImageItem {
                pixels: record[1..].to_vec(),
                label,
            })
        })
        .collect()
}
