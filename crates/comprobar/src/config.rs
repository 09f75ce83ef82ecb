//! Engine configuration.
//!
//! Every field has a default, so a YAML file only needs the keys it changes.
//! Precedence, lowest first: defaults, file, environment, explicit `with_*`
//! calls (the CLI applies its flags that way).

use crate::recording::RecordingConfig;
use crate::result::ComprobarResult;
use crate::visual_regression::{
    VisualRegressionConfig, DEFAULT_CHANNEL_THRESHOLD, DEFAULT_SIMILARITY_THRESHOLD,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the Chromium executable
pub const ENV_CHROMIUM_PATH: &str = "CHROMIUM_PATH";

/// Environment variable overriding the artifacts directory
pub const ENV_ARTIFACTS_DIR: &str = "COMPROBAR_ARTIFACTS_DIR";

/// How the browser is launched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrowserOptions {
    /// Run without a window
    pub headless: bool,
    /// Keep the Chromium sandbox on for the first launch attempt
    pub sandbox: bool,
    /// Executable to use instead of auto-detection
    pub chromium_path: Option<PathBuf>,
    /// Extra command-line switches
    pub extra_args: Vec<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: true,
            chromium_path: None,
            extra_args: Vec::new(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Hard ceiling on one run, in milliseconds
    pub watchdog_ms: u64,
    /// Attempts for a terminal status write
    pub status_write_attempts: u32,
    /// Fixed pause between status write attempts, in milliseconds
    pub status_write_backoff_ms: u64,
    /// Root for per-run artifacts
    pub artifacts_dir: PathBuf,
    /// Baseline store; `<artifacts>/baselines` when unset
    pub baselines_dir: Option<PathBuf>,
    /// Diff image store; `<artifacts>/diffs` when unset
    pub diffs_dir: Option<PathBuf>,
    /// Default `waitForSelector` timeout, in milliseconds
    pub wait_timeout_ms: u64,
    /// Navigation timeout, in seconds
    pub navigation_timeout_secs: u64,
    /// Default similarity threshold for visual screenshot steps
    pub visual_threshold: f64,
    /// Per-channel pixel threshold
    pub channel_threshold: f64,
    /// Browser launch options
    pub browser: BrowserOptions,
    /// Session recording options
    pub recording: RecordingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            watchdog_ms: 600_000,
            status_write_attempts: 3,
            status_write_backoff_ms: 500,
            artifacts_dir: PathBuf::from("comprobar-artifacts"),
            baselines_dir: None,
            diffs_dir: None,
            wait_timeout_ms: 5000,
            navigation_timeout_secs: 30,
            visual_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            channel_threshold: DEFAULT_CHANNEL_THRESHOLD,
            browser: BrowserOptions::default(),
            recording: RecordingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse YAML
    pub fn from_yaml(source: &str) -> ComprobarResult<Self> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml_ng::from_str(source)?)
    }

    /// Load a YAML file and apply environment overrides
    pub fn load(path: &Path) -> ComprobarResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&source)?.with_env())
    }

    /// Apply `CHROMIUM_PATH` and `COMPROBAR_ARTIFACTS_DIR`
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    #[must_use]
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = lookup(ENV_CHROMIUM_PATH).filter(|v| !v.is_empty()) {
            self.browser.chromium_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = lookup(ENV_ARTIFACTS_DIR).filter(|v| !v.is_empty()) {
            self.artifacts_dir = PathBuf::from(dir);
        }
        self
    }

    /// Set the watchdog ceiling
    #[must_use]
    pub fn with_watchdog(mut self, ceiling: Duration) -> Self {
        self.watchdog_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set status write retry policy
    #[must_use]
    pub const fn with_status_retry(mut self, attempts: u32, backoff_ms: u64) -> Self {
        self.status_write_attempts = attempts;
        self.status_write_backoff_ms = backoff_ms;
        self
    }

    /// Set the artifacts directory
    #[must_use]
    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = dir.into();
        self
    }

    /// Set the baselines directory
    #[must_use]
    pub fn with_baselines_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.baselines_dir = Some(dir.into());
        self
    }

    /// Set the diffs directory
    #[must_use]
    pub fn with_diffs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diffs_dir = Some(dir.into());
        self
    }

    /// Set the visual similarity threshold
    #[must_use]
    pub const fn with_visual_threshold(mut self, threshold: f64) -> Self {
        self.visual_threshold = threshold;
        self
    }

    /// Set browser options
    #[must_use]
    pub fn with_browser(mut self, browser: BrowserOptions) -> Self {
        self.browser = browser;
        self
    }

    /// Watchdog ceiling
    #[must_use]
    pub const fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    /// Pause between status write attempts
    #[must_use]
    pub const fn status_write_backoff(&self) -> Duration {
        Duration::from_millis(self.status_write_backoff_ms)
    }

    /// Default wait timeout
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Navigation timeout
    #[must_use]
    pub const fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    /// Baseline store location
    #[must_use]
    pub fn baselines_dir(&self) -> PathBuf {
        self.baselines_dir
            .clone()
            .unwrap_or_else(|| self.artifacts_dir.join("baselines"))
    }

    /// Diff store location
    #[must_use]
    pub fn diffs_dir(&self) -> PathBuf {
        self.diffs_dir
            .clone()
            .unwrap_or_else(|| self.artifacts_dir.join("diffs"))
    }

    /// Artifact directory of one run
    #[must_use]
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.artifacts_dir.join("runs").join(run_id)
    }

    /// Pixel comparator settings derived from this configuration
    #[must_use]
    pub fn visual_config(&self) -> VisualRegressionConfig {
        VisualRegressionConfig::default()
            .with_threshold(self.visual_threshold)
            .with_channel_threshold(self.channel_threshold)
            .with_baseline_dir(self.baselines_dir())
            .with_diff_dir(self.diffs_dir())
    }
}
