//! Visual Diff Demo
//!
//! Demonstrates the pixel comparator:
//! - Baseline bootstrap on first comparison
//! - Similarity scoring against a threshold
//! - Diff images for failed comparisons
//! - Dimension mismatch handling
//!
//! Run with: cargo run --example visual_diff_demo -p comprobar

use comprobar::{VisualRegressionConfig, VisualRegressionTester};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};

fn main() {
    println!("=== Visual Diff Demo ===\n");

    let workdir = std::env::temp_dir().join("comprobar-visual-demo");
    let _ = std::fs::remove_dir_all(&workdir);

    let config = VisualRegressionConfig::default()
        .with_baseline_dir(workdir.join("baselines"))
        .with_diff_dir(workdir.join("diffs"));
    println!("1. Configuration");
    println!("   Similarity threshold: {}", config.threshold);
    println!("   Channel threshold: {}", config.channel_threshold);
    println!("   Baselines: {}\n", config.baseline_dir.display());
    let tester = VisualRegressionTester::new(config);

    println!("2. First comparison bootstraps the baseline");
    let original = write(&workdir, "original.png", &banner(100, 100, 0));
    let result = tester.compare_with_baseline("landing", "hero", &original);
    println!("   passed={} message={}", result.passed, result.message);
    println!(
        "   baseline exists: {}\n",
        tester.baseline_path("landing", "hero").exists()
    );

    println!("3. Small change stays above the threshold");
    let nudged = write(&workdir, "nudged.png", &banner(100, 100, 4));
    let result = tester.compare_with_baseline("landing", "hero", &nudged);
    println!(
        "   passed={} similarity={:.4}\n",
        result.passed, result.similarity
    );

    println!("4. Large change fails and writes a diff image");
    let shifted = write(&workdir, "shifted.png", &banner(100, 100, 40));
    let result = tester.compare_with_baseline("landing", "hero", &shifted);
    println!(
        "   passed={} similarity={:.4} diff={:?}\n",
        result.passed,
        result.similarity,
        result.diff_path.as_deref().map(Path::display).map(|d| d.to_string())
    );

    println!("5. Dimension mismatch always fails");
    let wide = write(&workdir, "wide.png", &banner(120, 100, 0));
    let result = tester.compare_with_baseline("landing", "hero", &wide);
    println!(
        "   passed={} diffCount={:?} message={}\n",
        result.passed, result.diff_count, result.message
    );

    println!("6. Explicit baseline update");
    match tester.save_baseline("landing", "hero", &shifted) {
        Ok(path) => println!("   baseline replaced at {}", path.display()),
        Err(e) => println!("   baseline not saved: {e}"),
    }
    let result = tester.compare_with_baseline("landing", "hero", &shifted);
    println!("   passed={} similarity={}", result.passed, result.similarity);

    println!("\n=== Demo Complete ===");
}

/// Solid background with a bar whose top edge moves by `offset` rows
fn banner(width: u32, height: u32, offset: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |_, y| {
        if (10 + offset..30 + offset).contains(&y) {
            Rgba([220, 40, 40, 255])
        } else {
            Rgba([245, 245, 245, 255])
        }
    })
}

fn write(dir: &Path, name: &str, img: &RgbaImage) -> PathBuf {
    std::fs::create_dir_all(dir).expect("create demo dir");
    let path = dir.join(name);
    img.save(&path).expect("write demo image");
    path
}
