//! Visual regression testing against per-step baselines.
//!
//! Baselines live at `<baseline_dir>/<test_id>/<step_id>.png` and diff images
//! at `<diff_dir>/<test_id>/<step_id>_diff.png`. The first comparison for a
//! key establishes its baseline; a failing comparison never replaces it.

use crate::result::{ComprobarError, ComprobarResult};
use image::{GenericImageView, ImageEncoder, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default similarity a comparison must reach to pass
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.95;

/// Default per-channel difference (0.0-1.0) above which a pixel counts as changed
pub const DEFAULT_CHANNEL_THRESHOLD: f64 = 0.1;

/// Configuration for visual regression testing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualRegressionConfig {
    /// Minimum similarity (0.0-1.0) for a comparison to pass
    pub threshold: f64,
    /// Per-channel color difference threshold on a 0.0-1.0 scale
    pub channel_threshold: f64,
    /// Directory to store baseline images
    pub baseline_dir: PathBuf,
    /// Directory to store diff images on failure
    pub diff_dir: PathBuf,
}

impl Default for VisualRegressionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            channel_threshold: DEFAULT_CHANNEL_THRESHOLD,
            baseline_dir: PathBuf::from("__baselines__"),
            diff_dir: PathBuf::from("__diffs__"),
        }
    }
}

impl VisualRegressionConfig {
    /// Set the similarity threshold
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the per-channel threshold
    #[must_use]
    pub const fn with_channel_threshold(mut self, threshold: f64) -> Self {
        self.channel_threshold = threshold;
        self
    }

    /// Set the baseline directory
    #[must_use]
    pub fn with_baseline_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.baseline_dir = dir.into();
        self
    }

    /// Set the diff directory
    #[must_use]
    pub fn with_diff_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diff_dir = dir.into();
        self
    }
}

/// Result of comparing a screenshot with its baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualDiffResult {
    /// Whether similarity reached the threshold
    pub passed: bool,
    /// Share of unchanged pixels (0.0-1.0)
    pub similarity: f64,
    /// Diff image written for a failed comparison
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_path: Option<PathBuf>,
    /// Number of changed pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_count: Option<u64>,
    /// Number of pixels compared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pixels: Option<u64>,
    /// Summary line
    pub message: String,
}

impl VisualDiffResult {
    pub(crate) fn closed(message: String) -> Self {
        Self {
            passed: false,
            similarity: 0.0,
            diff_path: None,
            diff_count: None,
            total_pixels: None,
            message,
        }
    }
}

/// Pixel statistics of two same-sized images
#[derive(Debug, Clone)]
pub struct ImageDiff {
    /// Number of pixels that differ
    pub diff_pixel_count: u64,
    /// Total number of pixels compared
    pub total_pixels: u64,
    /// Changed pixels in red over a dimmed copy of the current image
    pub diff_image: RgbaImage,
}

impl ImageDiff {
    /// Share of unchanged pixels; an empty image is fully similar
    #[must_use]
    pub fn similarity(&self) -> f64 {
        if self.total_pixels == 0 {
            return 1.0;
        }
        (self.total_pixels - self.diff_pixel_count) as f64 / self.total_pixels as f64
    }
}

/// Visual regression tester
#[derive(Debug, Clone, Default)]
pub struct VisualRegressionTester {
    config: VisualRegressionConfig,
}

impl VisualRegressionTester {
    /// Create a new tester with configuration
    #[must_use]
    pub const fn new(config: VisualRegressionConfig) -> Self {
        Self { config }
    }

    /// Get configuration
    #[must_use]
    pub const fn config(&self) -> &VisualRegressionConfig {
        &self.config
    }

    /// Baseline location for a key
    #[must_use]
    pub fn baseline_path(&self, test_id: &str, step_id: &str) -> PathBuf {
        self.config
            .baseline_dir
            .join(sanitize(test_id))
            .join(format!("{}.png", sanitize(step_id)))
    }

    /// Diff image location for a key
    #[must_use]
    pub fn diff_path(&self, test_id: &str, step_id: &str) -> PathBuf {
        self.config
            .diff_dir
            .join(sanitize(test_id))
            .join(format!("{}_diff.png", sanitize(step_id)))
    }

    /// Store `screenshot` as the baseline for a key, replacing any previous one
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be copied
    pub fn save_baseline(
        &self,
        test_id: &str,
        step_id: &str,
        screenshot: &Path,
    ) -> ComprobarResult<PathBuf> {
        let target = self.baseline_path(test_id, step_id);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(screenshot, &target)?;
        info!(test_id, step_id, path = %target.display(), "baseline saved");
        Ok(target)
    }

    /// Compare the image at `current` with the baseline for a key using the
    /// configured threshold
    #[must_use]
    pub fn compare_with_baseline(
        &self,
        test_id: &str,
        step_id: &str,
        current: &Path,
    ) -> VisualDiffResult {
        self.compare_with_threshold(test_id, step_id, current, self.config.threshold)
    }

    /// Compare the image at `current` with the baseline for a key.
    ///
    /// Never fails: unreadable or corrupt images produce a failed result with
    /// similarity 0.
    #[must_use]
    pub fn compare_with_threshold(
        &self,
        test_id: &str,
        step_id: &str,
        current: &Path,
        threshold: f64,
    ) -> VisualDiffResult {
        let baseline_path = self.baseline_path(test_id, step_id);

        if !baseline_path.exists() {
            return match self.save_baseline(test_id, step_id, current) {
                Ok(path) => VisualDiffResult {
                    passed: true,
                    similarity: 1.0,
                    diff_path: None,
                    diff_count: Some(0),
                    total_pixels: None,
                    message: format!("No baseline found; created {}", path.display()),
                },
                Err(e) => {
                    warn!(test_id, step_id, error = %e, "could not create baseline");
                    VisualDiffResult::closed(format!("Failed to create baseline: {e}"))
                }
            };
        }

        let baseline = match image::open(&baseline_path) {
            Ok(img) => img,
            Err(e) => return VisualDiffResult::closed(format!("Failed to read baseline: {e}")),
        };
        let actual = match image::open(current) {
            Ok(img) => img,
            Err(e) => return VisualDiffResult::closed(format!("Failed to read screenshot: {e}")),
        };

        let (bw, bh) = baseline.dimensions();
        let (aw, ah) = actual.dimensions();
        if (bw, bh) != (aw, ah) {
            let larger = (u64::from(bw) * u64::from(bh)).max(u64::from(aw) * u64::from(ah));
            return VisualDiffResult {
                passed: false,
                similarity: 0.0,
                diff_path: None,
                diff_count: Some(larger),
                total_pixels: Some(larger),
                message: format!("Image dimensions differ: baseline {bw}x{bh}, current {aw}x{ah}"),
            };
        }

        let diff = self.diff_images(&actual.to_rgba8(), &baseline.to_rgba8());
        let similarity = diff.similarity();
        let passed = similarity >= threshold;
        debug!(test_id, step_id, similarity, threshold, "visual comparison");

        if passed {
            return VisualDiffResult {
                passed,
                similarity,
                diff_path: None,
                diff_count: Some(diff.diff_pixel_count),
                total_pixels: Some(diff.total_pixels),
                message: format!(
                    "Similarity {:.2}% meets threshold {:.2}%",
                    similarity * 100.0,
                    threshold * 100.0
                ),
            };
        }

        let target = self.diff_path(test_id, step_id);
        let diff_path = match write_png(&target, &diff.diff_image) {
            Ok(()) => Some(target),
            Err(e) => {
                warn!(test_id, step_id, error = %e, "could not write diff image");
                None
            }
        };

        VisualDiffResult {
            passed,
            similarity,
            diff_path,
            diff_count: Some(diff.diff_pixel_count),
            total_pixels: Some(diff.total_pixels),
            message: format!(
                "Similarity {:.2}% below threshold {:.2}% ({} of {} pixels differ)",
                similarity * 100.0,
                threshold * 100.0,
                diff.diff_pixel_count,
                diff.total_pixels
            ),
        }
    }

    /// Per-pixel comparison of two same-sized images
    #[must_use]
    pub fn diff_images(&self, actual: &RgbaImage, expected: &RgbaImage) -> ImageDiff {
        let (width, height) = actual.dimensions();
        let mut diff_image = RgbaImage::new(width, height);
        let mut diff_pixel_count = 0u64;

        for (x, y, actual_pixel) in actual.enumerate_pixels() {
            let expected_pixel = expected.get_pixel(x, y);
            if channel_distance(*actual_pixel, *expected_pixel) > self.config.channel_threshold {
                diff_pixel_count += 1;
                diff_image.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            } else {
                let Rgba([r, g, b, _]) = *actual_pixel;
                diff_image.put_pixel(x, y, Rgba([r / 2, g / 2, b / 2, 128]));
            }
        }

        ImageDiff {
            diff_pixel_count,
            total_pixels: u64::from(width) * u64::from(height),
            diff_image,
        }
    }
}

/// Largest per-channel difference between two pixels, normalized to 0.0-1.0
fn channel_distance(a: Rgba<u8>, b: Rgba<u8>) -> f64 {
    a.0.iter()
        .zip(b.0.iter())
        .map(|(x, y)| f64::from(x.abs_diff(*y)) / 255.0)
        .fold(0.0, f64::max)
}

fn write_png(path: &Path, img: &RgbaImage) -> ComprobarResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut buffer = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buffer)
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| ComprobarError::ImageComparisonError {
            message: format!("Failed to encode diff image: {e}"),
        })?;
    std::fs::write(path, buffer)?;
    Ok(())
}

/// Keep keys usable as single path components
fn sanitize(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(color))
    }

    fn with_changed_pixels(base: &RgbaImage, count: u32) -> RgbaImage {
        let mut img = base.clone();
        let width = img.width();
        for i in 0..count {
            img.put_pixel(i % width, i / width, Rgba([255, 255, 255, 255]));
        }
        img
    }

    fn save(dir: &Path, name: &str, img: &RgbaImage) -> PathBuf {
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    fn tester(dir: &TempDir) -> VisualRegressionTester {
        VisualRegressionTester::new(
            VisualRegressionConfig::default()
                .with_baseline_dir(dir.path().join("baselines"))
                .with_diff_dir(dir.path().join("diffs")),
        )
    }

    mod config_tests {
        use super::*;

        #[test]
        fn test_config_defaults() {
            let config = VisualRegressionConfig::default();
            assert_eq!(config.threshold, 0.95);
            assert_eq!(config.channel_threshold, 0.1);
            assert_eq!(config.baseline_dir, PathBuf::from("__baselines__"));
        }

        #[test]
        fn test_keyed_paths() {
            let tester = VisualRegressionTester::new(
                VisualRegressionConfig::default()
                    .with_baseline_dir("/b")
                    .with_diff_dir("/d"),
            );
            assert_eq!(tester.baseline_path("t1", "s2"), PathBuf::from("/b/t1/s2.png"));
            assert_eq!(tester.diff_path("t1", "s2"), PathBuf::from("/d/t1/s2_diff.png"));
            assert_eq!(
                tester.baseline_path("../up", "a/b"),
                PathBuf::from("/b/.._up/a_b.png")
            );
        }
    }

    mod compare_tests {
        use super::*;

        #[test]
        fn test_first_comparison_bootstraps_baseline() {
            let dir = TempDir::new().unwrap();
            let tester = tester(&dir);
            let current = save(dir.path(), "cur.png", &solid(4, 4, [9, 9, 9, 255]));

            let result = tester.compare_with_baseline("t", "s", &current);
            assert!(result.passed);
            assert_eq!(result.similarity, 1.0);
            assert!(tester.baseline_path("t", "s").exists());
        }

        #[test]
        fn test_identical_images() {
            let dir = TempDir::new().unwrap();
            let tester = tester(&dir);
            let img = solid(8, 8, [10, 20, 30, 255]);
            let current = save(dir.path(), "cur.png", &img);
            tester.save_baseline("t", "s", &current).unwrap();

            let result = tester.compare_with_baseline("t", "s", &current);
            assert!(result.passed);
            assert_eq!(result.similarity, 1.0);
            assert_eq!(result.diff_count, Some(0));
            assert!(result.diff_path.is_none());
        }

        #[test]
        fn test_threshold_boundary_is_inclusive() {
            let dir = TempDir::new().unwrap();
            let tester = tester(&dir);
            let base = solid(10, 10, [0, 0, 0, 255]);
            let baseline = save(dir.path(), "base.png", &base);
            tester.save_baseline("t", "s", &baseline).unwrap();

            let five = save(dir.path(), "five.png", &with_changed_pixels(&base, 5));
            let result = tester.compare_with_baseline("t", "s", &five);
            assert_eq!(result.similarity, 0.95);
            assert!(result.passed);

            let six = save(dir.path(), "six.png", &with_changed_pixels(&base, 6));
            let result = tester.compare_with_baseline("t", "s", &six);
            assert_eq!(result.similarity, 0.94);
            assert!(!result.passed);
            assert_eq!(result.diff_count, Some(6));
            assert!(result.diff_path.as_ref().unwrap().exists());
        }

        #[test]
        fn test_failed_comparison_keeps_baseline() {
            let dir = TempDir::new().unwrap();
            let tester = tester(&dir);
            let base = solid(4, 4, [0, 0, 0, 255]);
            let baseline = save(dir.path(), "base.png", &base);
            tester.save_baseline("t", "s", &baseline).unwrap();
            let before = std::fs::read(tester.baseline_path("t", "s")).unwrap();

            let other = save(dir.path(), "other.png", &solid(4, 4, [255, 0, 0, 255]));
            let result = tester.compare_with_baseline("t", "s", &other);
            assert!(!result.passed);
            assert_eq!(std::fs::read(tester.baseline_path("t", "s")).unwrap(), before);
        }

        #[test]
        fn test_dimension_mismatch_always_fails() {
            let dir = TempDir::new().unwrap();
            let tester = tester(&dir);
            let baseline = save(dir.path(), "base.png", &solid(2, 2, [0, 0, 0, 255]));
            tester.save_baseline("t", "s", &baseline).unwrap();

            let bigger = save(dir.path(), "big.png", &solid(3, 5, [0, 0, 0, 255]));
            let result = tester.compare_with_threshold("t", "s", &bigger, 0.0);
            assert!(!result.passed);
            assert_eq!(result.similarity, 0.0);
            assert_eq!(result.diff_count, Some(15));
        }

        #[test]
        fn test_small_channel_change_is_not_a_difference() {
            let tester = VisualRegressionTester::default();
            let a = solid(2, 2, [100, 100, 100, 255]);
            let b = solid(2, 2, [120, 100, 100, 255]); // 20/255 < 0.1
            assert_eq!(tester.diff_images(&a, &b).diff_pixel_count, 0);

            let c = solid(2, 2, [130, 100, 100, 255]); // 30/255 > 0.1
            assert_eq!(tester.diff_images(&a, &c).diff_pixel_count, 4);
        }

        #[test]
        fn test_corrupt_current_fails_closed() {
            let dir = TempDir::new().unwrap();
            let tester = tester(&dir);
            let baseline = save(dir.path(), "base.png", &solid(2, 2, [0, 0, 0, 255]));
            tester.save_baseline("t", "s", &baseline).unwrap();

            let corrupt = dir.path().join("corrupt.png");
            std::fs::write(&corrupt, b"not a png").unwrap();
            let result = tester.compare_with_baseline("t", "s", &corrupt);
            assert!(!result.passed);
            assert_eq!(result.similarity, 0.0);
        }

        #[test]
        fn test_missing_current_without_baseline_fails_closed() {
            let dir = TempDir::new().unwrap();
            let tester = tester(&dir);
            let result = tester.compare_with_baseline("t", "s", &dir.path().join("nope.png"));
            assert!(!result.passed);
            assert_eq!(result.similarity, 0.0);
            assert!(!tester.baseline_path("t", "s").exists());
        }

        #[test]
        fn test_save_baseline_overwrites_when_called() {
            let dir = TempDir::new().unwrap();
            let tester = tester(&dir);
            let first = save(dir.path(), "a.png", &solid(2, 2, [0, 0, 0, 255]));
            let second = save(dir.path(), "b.png", &solid(2, 2, [255, 255, 255, 255]));
            tester.save_baseline("t", "s", &first).unwrap();
            tester.save_baseline("t", "s", &second).unwrap();

            let result = tester.compare_with_baseline("t", "s", &second);
            assert!(result.passed);
        }
    }
}
