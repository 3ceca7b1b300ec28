//! Baseline comparison of captured screenshots

use image::{GenericImageView, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{CheckError, CheckResult};

/// Per-channel difference tolerated before a pixel counts as changed
/// (anti-aliasing and compression noise).
const CHANNEL_TOLERANCE: i32 = 5;

/// Result of a visual comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualDiff {
    /// Baseline file name
    pub name: String,

    /// Whether the images match (within threshold)
    pub matches: bool,

    /// Percentage of pixels that differ
    pub diff_percent: f64,

    pub diff_pixels: u64,
    pub total_pixels: u64,

    /// Path to the diff image (if generated)
    pub diff_image_path: Option<PathBuf>,

    pub actual_hash: String,
    pub baseline_hash: String,
}

impl VisualDiff {
    fn identical(name: String, hash: String, total_pixels: u64) -> Self {
        Self {
            name,
            matches: true,
            diff_percent: 0.0,
            diff_pixels: 0,
            total_pixels,
            diff_image_path: None,
            baseline_hash: hash.clone(),
            actual_hash: hash,
        }
    }
}

/// Compares screenshots against a directory of baselines
pub struct VisualTester {
    baseline_dir: PathBuf,
    diff_dir: PathBuf,

    /// Allowed differing pixels, in percent
    threshold: f64,

}

impl VisualTester {
    /// A comparing tester needs an existing baseline directory; one that
    /// writes baselines creates it.
    pub fn new(config: VisualConfig) -> CheckResult<Self> {
        if config.update {
            std::fs::create_dir_all(&config.baseline_dir)?;
        } else if !config.baseline_dir.is_dir() {
            return Err(CheckError::Config(format!(
                "baseline directory {} does not exist (create it with --update-baselines)",
                config.baseline_dir.display()
            )));
        }
        std::fs::create_dir_all(&config.diff_dir)?;

        Ok(Self {
            baseline_dir: config.baseline_dir,
            diff_dir: config.diff_dir,
            threshold: config.threshold,
        })
    }

    fn baseline_for(&self, actual: &Path) -> CheckResult<(String, PathBuf)> {
        let name = actual
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                CheckError::VisualRegression(format!(
                    "Screenshot path has no file name: {}",
                    actual.display()
                ))
            })?;
        let baseline = self.baseline_dir.join(&name);
        Ok((name, baseline))
    }

    /// Compare a screenshot against the baseline with the same file name
    pub fn compare(&self, actual_path: &Path) -> CheckResult<VisualDiff> {
        let (name, baseline_path) = self.baseline_for(actual_path)?;
        if !actual_path.exists() {
            return Err(CheckError::VisualRegression(format!(
                "Actual screenshot not found: {}",
                actual_path.display()
            )));
        }

        if !baseline_path.exists() {
            return Err(CheckError::BaselineNotFound(
                baseline_path.to_string_lossy().to_string(),
            ));
        }

        let actual_hash = hash_file(actual_path)?;

        let actual = image::open(actual_path)?;
        let baseline_hash = hash_file(&baseline_path)?;
        if baseline_hash == actual_hash {
            debug!("'{}' matches its baseline byte for byte", name);
            let (w, h) = actual.dimensions();
            return Ok(VisualDiff::identical(name, actual_hash, w as u64 * h as u64));
        }

        let baseline = image::open(&baseline_path)?;
        if actual.dimensions() != baseline.dimensions() {
            warn!(
                "'{}' changed size: {:?} -> {:?}",
                name,
                baseline.dimensions(),
                actual.dimensions()
            );
        }

        let (overlay, diff_pixels, total_pixels) =
            pixel_diff(&actual.to_rgba8(), &baseline.to_rgba8());
        let diff_percent = percent(diff_pixels, total_pixels);
        let matches = diff_percent <= self.threshold;

        let diff_image_path = match diff_pixels {
            0 => None,
            _ => {
                let path = self.diff_path(&name);
                overlay.save(&path)?;
                Some(path)
            }
        };

        if !matches {
            warn!(
                "'{}' differs from its baseline: {:.2}% of pixels (allowed {:.2}%)",
                name, diff_percent, self.threshold
            );
        }

        Ok(VisualDiff {
            name,
            matches,
            diff_percent,
            diff_pixels,
            total_pixels,
            diff_image_path,
            actual_hash,
            baseline_hash,
        })
    }

    /// `<diff_dir>/<stem>-diff.png`
    fn diff_path(&self, name: &str) -> PathBuf {
        let stem = Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| name.to_string());
        self.diff_dir.join(format!("{}-diff.png", stem))
    }

    /// Replace the baseline with the given screenshot
    pub fn update_baseline(&self, actual_path: &Path) -> CheckResult<()> {
        let (name, baseline_path) = self.baseline_for(actual_path)?;

        if !actual_path.exists() {
            return Err(CheckError::VisualRegression(format!(
                "Cannot update baseline: screenshot not found: {}",
                actual_path.display()
            )));
        }

        std::fs::copy(actual_path, &baseline_path)?;
        info!("Updated baseline for '{}'", name);

        Ok(())
    }

    /// Remove diff images left by an earlier run
    pub fn clean_diffs(&self) -> CheckResult<()> {
        for entry in std::fs::read_dir(&self.diff_dir)? {
            let path = entry?.path();
            let is_diff = path
                .file_name()
                .map(|n| n.to_string_lossy().ends_with("-diff.png"))
                .unwrap_or(false);
            if is_diff {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// Compare two images pixel by pixel over the union of their areas.
/// Pixels outside the overlap always count as different.
fn pixel_diff(actual: &RgbaImage, baseline: &RgbaImage) -> (RgbaImage, u64, u64) {
    let width = actual.width().max(baseline.width());
    let height = actual.height().max(baseline.height());
    let overlap_w = actual.width().min(baseline.width());
    let overlap_h = actual.height().min(baseline.height());

    let mut diff_img = RgbaImage::new(width, height);
    let mut diff_pixels = 0u64;

    for y in 0..height {
        for x in 0..width {
            if x >= overlap_w || y >= overlap_h {
                diff_pixels += 1;
                diff_img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
                continue;
            }

            let a = actual.get_pixel(x, y);
            let b = baseline.get_pixel(x, y);
            if pixels_differ(a, b) {
                diff_pixels += 1;
                diff_img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            } else {
                // Dimmed original
                diff_img.put_pixel(x, y, Rgba([a[0] / 2, a[1] / 2, a[2] / 2, 128]));
            }
        }
    }

    (diff_img, diff_pixels, width as u64 * height as u64)
}

fn pixels_differ(a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
    a.0.iter()
        .zip(b.0.iter())
        .any(|(x, y)| (*x as i32 - *y as i32).abs() > CHANNEL_TOLERANCE)
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

fn hash_file(path: &Path) -> CheckResult<String> {
    let data = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&data)))
}

/// Configuration for visual testing
#[derive(Debug, Clone)]
pub struct VisualConfig {
    pub baseline_dir: PathBuf,
    pub diff_dir: PathBuf,
    pub threshold: f64,
    /// Writes baselines instead of only reading them
    pub update: bool,
}
