//! Live run telemetry written under a log directory.
//!
//! Scalars are appended as JSON lines (`scalars.jsonl`); the per-epoch
//! confidence histograms are rendered to PNG files.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use confnet_core::Result;
use image::{Rgb, RgbImage};
use serde::Serialize;
use tracing::debug;

/// Bins per histogram
pub const HISTOGRAM_BINS: usize = 50;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const MARGIN: u32 = 40;
const CORRECT_COLOR: [u8; 3] = [31, 119, 180];
const INCORRECT_COLOR: [u8; 3] = [255, 127, 14];

/// One line of `scalars.jsonl`
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScalarRecord {
    pub step: usize,
    pub xentropy_loss: f64,
    pub confidence_loss: f64,
    pub lambda: f64,
}

/// Event sink for a run with live metrics enabled
pub struct EventLog {
    dir: PathBuf,
    scalars: BufWriter<File>,
}

impl EventLog {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let scalars = BufWriter::new(File::create(dir.join("scalars.jsonl"))?);
        Ok(Self { dir, scalars })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_scalars(&mut self, record: &ScalarRecord) -> Result<()> {
        serde_json::to_writer(&mut self.scalars, record)?;
        self.scalars.write_all(b"\n")?;
        Ok(())
    }

    /// Render the confidence histogram of `epoch` to a PNG file
    pub fn log_histogram(&mut self, epoch: usize, correct: &[f32], incorrect: &[f32]) -> Result<PathBuf> {
        self.scalars.flush()?;
        let path = self.dir.join(format!("confidence_histogram_epoch_{:03}.png", epoch));
        render_histogram(correct, incorrect).save(&path)?;
        debug!("Histogram written to {:?}", path);
        Ok(path)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.scalars.flush()?;
        Ok(())
    }
}

/// Normalized densities over `[0, 1]`; empty input gives all zeros
pub fn bin_densities(values: &[f32], bins: usize) -> Vec<f64> {
    let mut counts = vec![0usize; bins];
    let mut total = 0usize;
    for &v in values.iter().filter(|v| v.is_finite()) {
        let bin = ((v.clamp(0.0, 1.0) as f64) * bins as f64) as usize;
        counts[bin.min(bins - 1)] += 1;
        total += 1;
    }
    if total == 0 {
        return vec![0.0; bins];
    }

    let width = 1.0 / bins as f64;
    counts
        .into_iter()
        .map(|c| c as f64 / (total as f64 * width))
        .collect()
}

fn blend(pixel: &mut Rgb<u8>, color: [u8; 3]) {
    for (channel, &target) in pixel.0.iter_mut().zip(color.iter()) {
        *channel = ((*channel as u16 + target as u16) / 2) as u8;
    }
}

/// Overlayed density histograms of correct and incorrect samples
pub fn render_histogram(correct: &[f32], incorrect: &[f32]) -> RgbImage {
    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([255, 255, 255]));
    let plot_w = WIDTH - 2 * MARGIN;
    let plot_h = HEIGHT - 2 * MARGIN;
    let baseline_y = HEIGHT - MARGIN;

    let series = [
        (bin_densities(correct, HISTOGRAM_BINS), CORRECT_COLOR),
        (bin_densities(incorrect, HISTOGRAM_BINS), INCORRECT_COLOR),
    ];
    let peak = series
        .iter()
        .flat_map(|(d, _)| d.iter().copied())
        .fold(0.0f64, f64::max);

    if peak > 0.0 {
        for (densities, color) in &series {
            for (bin, &density) in densities.iter().enumerate() {
                let x0 = MARGIN + (bin as u32 * plot_w) / HISTOGRAM_BINS as u32;
                let x1 = MARGIN + ((bin as u32 + 1) * plot_w) / HISTOGRAM_BINS as u32;
                let bar = ((density / peak) * plot_h as f64).round() as u32;
                for x in x0..x1 {
                    for y in (baseline_y - bar)..baseline_y {
                        blend(img.get_pixel_mut(x, y), *color);
                    }
                }
            }
        }
    }

    // axes
    for x in MARGIN..=(WIDTH - MARGIN) {
        img.put_pixel(x, baseline_y, Rgb([0, 0, 0]));
    }
    for y in MARGIN..=baseline_y {
        img.put_pixel(MARGIN, y, Rgb([0, 0, 0]));
    }

    img
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_densities_integrate_to_one() {
        let values: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0).collect();
        let densities = bin_densities(&values, HISTOGRAM_BINS);
        let area: f64 = densities.iter().sum::<f64>() / HISTOGRAM_BINS as f64;
        assert!((area - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_edge_values_land_in_last_bin() {
        let densities = bin_densities(&[1.0, 1.0], 10);
        assert!(densities[9] > 0.0);
        assert_eq!(bin_densities(&[], 10), vec![0.0; 10]);
    }

    #[test]
    fn test_render_marks_bars() {
        // 0.01 lands in bin 0 and 0.99 in bin 49
        let img = render_histogram(&[0.99; 20], &[0.01; 5]);
        assert_eq!(img.dimensions(), (WIDTH, HEIGHT));
        // just above the x axis inside the first and last bins
        assert_ne!(*img.get_pixel(MARGIN + 2, HEIGHT - MARGIN - 1), Rgb([255, 255, 255]));
        assert_ne!(*img.get_pixel(WIDTH - MARGIN - 2, HEIGHT - MARGIN - 1), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_event_log_writes_files() {
        let dir = tempdir().unwrap();
        let mut log = EventLog::create(dir.path().join("events")).unwrap();
        log.log_scalars(&ScalarRecord {
            step: 1,
            xentropy_loss: 2.3,
            confidence_loss: 0.7,
            lambda: 0.1,
        })
        .unwrap();
        let png = log.log_histogram(0, &[0.9, 0.8], &[0.2]).unwrap();
        log.flush().unwrap();

        assert!(png.ends_with("confidence_histogram_epoch_000.png"));
        assert!(png.exists());

        let scalars = fs::read_to_string(log.dir().join("scalars.jsonl")).unwrap();
        let line: serde_json::Value = serde_json::from_str(scalars.lines().next().unwrap()).unwrap();
        assert_eq!(line["step"], 1);
        assert_eq!(line["lambda"], 0.1);
    }
}
