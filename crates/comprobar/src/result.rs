//! Result and error types for Comprobar.

use thiserror::Error;

/// Result type for Comprobar operations
pub type ComprobarResult<T> = Result<T, ComprobarError>;

/// Errors that can occur in Comprobar
#[derive(Debug, Error)]
pub enum ComprobarError {
    /// Browser executable not found
    #[error("Browser not found: {message}. Install Chromium or set CHROMIUM_PATH")]
    BrowserNotFound {
        /// Error message
        message: String,
    },

    /// Browser launch error
    #[error("Failed to launch browser: {message}")]
    BrowserLaunchError {
        /// Error message
        message: String,
    },

    /// Page error
    #[error("Page error: {message}")]
    PageError {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    NavigationError {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// No element matched a selector
    #[error("Element not found: {selector}")]
    ElementNotFound {
        /// Selector that matched nothing
        selector: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Input simulation error
    #[error("Input simulation failed: {message}")]
    InputError {
        /// Error message
        message: String,
    },

    /// Screenshot error
    #[error("Screenshot failed: {message}")]
    ScreenshotError {
        /// Error message
        message: String,
    },

    /// Step type string outside the closed set
    #[error("Unknown step type: {step_type}")]
    UnknownStepType {
        /// The rejected type string
        step_type: String,
    },

    /// Test definition failed validation
    #[error("Invalid test definition: {message}")]
    InvalidDefinition {
        /// Error message
        message: String,
    },

    /// A step failed and aborted the run
    #[error("Step {index} ({kind}) failed: {message}")]
    StepFailed {
        /// Order index of the failing step
        index: usize,
        /// Step type
        kind: String,
        /// Failure description
        message: String,
    },

    /// Run exceeded the watchdog ceiling
    #[error("Run {run_id} exceeded the {ms}ms watchdog ceiling")]
    WatchdogExpired {
        /// Run id
        run_id: String,
        /// Ceiling in milliseconds
        ms: u64,
    },

    /// Run id unknown to the store
    #[error("Run not found: {run_id}")]
    RunNotFound {
        /// Run id
        run_id: String,
    },

    /// Persistence collaborator failure
    #[error("Store error: {message}")]
    Store {
        /// Error message
        message: String,
    },

    /// Session recording error
    #[error("Recording failed: {message}")]
    Recording {
        /// Error message
        message: String,
    },

    /// Image comparison error
    #[error("Image comparison failed: {message}")]
    ImageComparisonError {
        /// Error message
        message: String,
    },

    /// HTTP source error
    #[error("HTTP request to {url} failed: {message}")]
    Http {
        /// Requested URL
        url: String,
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl ComprobarError {
    /// Create a store error
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a page error
    #[must_use]
    pub fn page(message: impl Into<String>) -> Self {
        Self::PageError {
            message: message.into(),
        }
    }

    /// Errors a step handler reports as an ordinary failed step rather than
    /// letting them escape as unexpected faults.
    #[must_use]
    pub const fn is_step_failure(&self) -> bool {
        matches!(
            self,
            Self::ElementNotFound { .. } | Self::Timeout { .. } | Self::InputError { .. }
        )
    }

    /// Whether this launch error means no browser binary is installed, as
    /// opposed to a browser that started and then crashed.
    #[must_use]
    pub const fn is_missing_browser(&self) -> bool {
        matches!(self, Self::BrowserNotFound { .. })
    }
}
