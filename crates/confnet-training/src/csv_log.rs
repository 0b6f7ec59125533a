//! Per-epoch CSV log.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use confnet_core::{Error, Result};

/// Column names written as the header row
pub const FIELDNAMES: [&str; 3] = ["epoch", "train_acc", "test_acc"];

/// Appends one `epoch,train_acc,test_acc` row per epoch.
///
/// Rows are flushed as they are written so an interrupted run keeps every
/// finished epoch.
pub struct CsvLogger {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: usize,
}

impl CsvLogger {
    /// Create (or truncate) the file and write the header
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "{}", FIELDNAMES.join(","))?;
        writer.flush()?;

        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn write_row(&mut self, epoch: usize, train_acc: f64, test_acc: f64) -> Result<()> {
        if !train_acc.is_finite() || !test_acc.is_finite() {
            return Err(Error::Training(format!(
                "Refusing to log non-finite accuracy for epoch {}",
                epoch
            )));
        }
        writeln!(self.writer, "{},{},{}", epoch, train_acc, test_acc)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and close the file
    pub fn close(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
