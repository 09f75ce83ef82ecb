//! Per-run execution state.

use crate::driver::BrowserSession;
use crate::recording::SessionRecorder;
use crate::result::{ComprobarError, ComprobarResult};
use crate::visual_regression::VisualRegressionTester;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

const PLACEHOLDER_PATTERN: &str = r"\{\{\s*([^{}\s]+)\s*\}\}";

/// State owned by one run for its whole duration.
///
/// `extracted_values` only grows: an `extract` step adds a key and later
/// steps read it through `{{key}}` placeholders.
pub struct ExecutionContext<'s> {
    /// Values captured by `extract` steps
    pub extracted_values: HashMap<String, Value>,
    /// The live page
    pub session: &'s mut dyn BrowserSession,
    /// Per-run artifact directory
    pub run_dir: PathBuf,
    /// Test being executed; baselines are keyed by it
    pub test_id: String,
    /// Frames for the run's video
    pub recorder: SessionRecorder,
    /// Comparator for visual screenshot steps
    pub comparator: VisualRegressionTester,
    /// Default `waitForSelector` timeout
    pub wait_timeout: Duration,
}

impl std::fmt::Debug for ExecutionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("extracted_values", &self.extracted_values)
            .field("run_dir", &self.run_dir)
            .field("test_id", &self.test_id)
            .field("frames", &self.recorder.frame_count())
            .finish_non_exhaustive()
    }
}

impl<'s> ExecutionContext<'s> {
    /// Fresh context over `session`
    pub fn new(
        session: &'s mut dyn BrowserSession,
        run_dir: PathBuf,
        test_id: impl Into<String>,
        comparator: VisualRegressionTester,
    ) -> Self {
        Self {
            extracted_values: HashMap::new(),
            session,
            run_dir,
            test_id: test_id.into(),
            recorder: SessionRecorder::default(),
            comparator,
            wait_timeout: Duration::from_millis(5000),
        }
    }

    /// Use `recorder` for the run's video
    #[must_use]
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    /// Set the default wait timeout
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Store an extracted value
    pub fn set_value(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        debug!(key = %key, "value extracted");
        let _ = self.extracted_values.insert(key, value);
    }

    /// Replace every `{{key}}` in `template` with the string form of the
    /// extracted value. Placeholders without a value are left as written.
    pub fn substitute(&self, template: &str) -> ComprobarResult<String> {
        if !template.contains("{{") {
            return Ok(template.to_string());
        }
        let placeholder = Regex::new(PLACEHOLDER_PATTERN).map_err(|e| ComprobarError::InputError {
            message: format!("placeholder pattern: {e}"),
        })?;
        let substituted = placeholder.replace_all(template, |caps: &Captures<'_>| {
            match self.extracted_values.get(&caps[1]) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => {
                    warn!(key = &caps[1], "no extracted value for placeholder");
                    caps[0].to_string()
                }
            }
        });
        Ok(substituted.into_owned())
    }

    /// Add a video frame. Capture failures only cost the frame.
    pub async fn capture_frame(&mut self, label: &str) {
        if let Err(e) = self.recorder.capture(&mut *self.session, label).await {
            debug!(label, error = %e, "frame skipped");
        }
    }
}
