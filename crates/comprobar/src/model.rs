//! Test definitions and persisted run records.
//!
//! Every record serializes with camelCase keys so definitions can be written
//! by hand in YAML or JSON and handed to the engine unchanged.

use crate::result::{ComprobarError, ComprobarResult};
use crate::ux::UxMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The closed set of step types.
///
/// Unknown type strings are rejected while a definition is parsed, so a typo
/// never reaches the step loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StepKind {
    /// Click the first matching element
    Click,
    /// Type into an element
    Input,
    /// Choose an option of a `<select>`
    Select,
    /// Scroll an element, by deltas, or to the bottom
    Scroll,
    /// Wait for an element to appear
    WaitForSelector,
    /// Capture a PNG
    Screenshot,
    /// Read a value from the page into the extraction map
    Extract,
    /// Check an element against an expectation
    Assert,
    /// Drag one element onto another
    DragAndDrop,
    /// Set files on a file input
    FileUpload,
}

impl StepKind {
    /// All step kinds in declaration order
    pub const ALL: [Self; 10] = [
        Self::Click,
        Self::Input,
        Self::Select,
        Self::Scroll,
        Self::WaitForSelector,
        Self::Screenshot,
        Self::Extract,
        Self::Assert,
        Self::DragAndDrop,
        Self::FileUpload,
    ];

    /// Wire name of the kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Input => "input",
            Self::Select => "select",
            Self::Scroll => "scroll",
            Self::WaitForSelector => "waitForSelector",
            Self::Screenshot => "screenshot",
            Self::Extract => "extract",
            Self::Assert => "assert",
            Self::DragAndDrop => "dragAndDrop",
            Self::FileUpload => "fileUpload",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = ComprobarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ComprobarError::UnknownStepType {
                step_type: s.to_string(),
            })
    }
}

impl TryFrom<String> for StepKind {
    type Error = ComprobarError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StepKind> for String {
    fn from(kind: StepKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Assertion performed by an `assert` step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssertionKind {
    /// At least one element matches
    Exists,
    /// No element matches
    NotExists,
    /// Trimmed text equals the expectation
    Equals,
    /// Text contains the expectation
    Contains,
}

/// Per-step options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMeta {
    /// Wait timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Screenshot file name (without extension)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Attribute to extract
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    /// DOM property to extract
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    /// Compare a screenshot against its baseline
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub visual_regression: bool,
    /// Similarity threshold for the visual comparison
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Keys this engine does not interpret
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One declarative action or assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStep {
    /// Stable step id; the order index stands in when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Position in the definition, starting at 0
    pub order_index: usize,
    /// Step type
    #[serde(rename = "type")]
    pub kind: StepKind,
    /// CSS selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Type-dependent value (text, option, target selector, path, key)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Assertion to perform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion_type: Option<AssertionKind>,
    /// Expected text for `equals` / `contains`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion_expected: Option<String>,
    /// Options
    #[serde(default)]
    pub meta: StepMeta,
}

impl TestStep {
    /// Create a step with only a kind and index
    #[must_use]
    pub fn new(order_index: usize, kind: StepKind) -> Self {
        Self {
            id: None,
            order_index,
            kind,
            selector: None,
            value: None,
            assertion_type: None,
            assertion_expected: None,
            meta: StepMeta::default(),
        }
    }

    /// Set the selector
    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    /// Set the value
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Set the assertion
    #[must_use]
    pub fn with_assertion(mut self, kind: AssertionKind, expected: Option<&str>) -> Self {
        self.assertion_type = Some(kind);
        self.assertion_expected = expected.map(str::to_string);
        self
    }

    /// Set the options
    #[must_use]
    pub fn with_meta(mut self, meta: StepMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Key used for baselines and diffs
    #[must_use]
    pub fn step_key(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| self.order_index.to_string())
    }
}

/// An ordered sequence of steps against a target page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDefinition {
    /// Test id
    pub id: String,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Page the run navigates to first
    pub target_url: String,
    /// Steps
    #[serde(default)]
    pub steps: Vec<TestStep>,
}

impl TestDefinition {
    /// Parse a definition from YAML (JSON is valid YAML)
    pub fn from_yaml(source: &str) -> ComprobarResult<Self> {
        Ok(serde_yaml_ng::from_str(source)?)
    }

    /// Load a definition file
    pub fn load(path: &Path) -> ComprobarResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml(&source)
    }

    /// Steps sorted by order index.
    ///
    /// # Errors
    ///
    /// Fails when there are no steps or the indices are not exactly
    /// `0..len` without duplicates.
    pub fn ordered_steps(&self) -> ComprobarResult<Vec<TestStep>> {
        if self.steps.is_empty() {
            return Err(ComprobarError::InvalidDefinition {
                message: format!("test '{}' has no steps", self.id),
            });
        }

        let mut steps = self.steps.clone();
        steps.sort_by_key(|s| s.order_index);

        for (expected, step) in steps.iter().enumerate() {
            if step.order_index != expected {
                return Err(ComprobarError::InvalidDefinition {
                    message: format!(
                        "step order indices must be contiguous from 0; expected {expected}, found {}",
                        step.order_index
                    ),
                });
            }
        }

        Ok(steps)
    }
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    /// Created, not started
    Pending,
    /// Orchestrator is executing
    Running,
    /// Every step succeeded
    Passed,
    /// A step, the environment, or the watchdog failed the run
    Failed,
}

impl RunStatus {
    /// Whether the status is final
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }

    /// Monotonic transition rule: pending -> running -> passed|failed, and a
    /// pending run may fail before it ever starts.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Passed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One execution of a test definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    /// Run id
    pub id: String,
    /// Definition this run executes
    pub test_id: String,
    /// Current status
    pub status: RunStatus,
    /// When the run was created
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Named device profile
    pub device_profile: String,
    /// Measurements collected during the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ux_metrics: Option<UxMetrics>,
}

impl TestRun {
    /// Create a pending run
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        test_id: impl Into<String>,
        device_profile: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            test_id: test_id.into(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            device_profile: device_profile.into(),
            ux_metrics: None,
        }
    }
}

/// Run plus the definition it executes, as loaded by the orchestrator
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// The run record
    pub run: TestRun,
    /// The definition
    pub definition: TestDefinition,
}

/// Severity of a persisted log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    /// Progress
    Info,
    /// Degraded but continuing
    Warn,
    /// Failure
    Error,
}

/// A persisted run log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Run id
    pub run_id: String,
    /// Severity
    pub level: LogLevel,
    /// Step the line belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    /// Message
    pub message: String,
    /// When it was written
    pub timestamp: DateTime<Utc>,
}

/// Kind of evidence file attached to a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentKind {
    /// PNG written by a screenshot step
    Screenshot,
    /// Session recording
    Video,
    /// HTML captured when a step fails
    DomSnapshot,
}

/// Evidence file registered against a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Run id
    pub run_id: String,
    /// Kind
    pub kind: AttachmentKind,
    /// File location
    pub path: PathBuf,
    /// Step that produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
}
