//! Comprobar: browser test execution and verification engine
//!
//! Comprobar (Spanish: "to check/verify") drives a headless browser through a
//! declarative list of steps against a target page, captures evidence and
//! decides pass/fail with two comparators: a pixel diff for screenshots and
//! a structural diff for JSON documents.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   COMPROBAR Architecture                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌──────────────┐    ┌────────────┐          │
//! │   │ RunStore   │───►│ Run          │───►│ Browser    │          │
//! │   │ (runs,logs)│◄───│ Orchestrator │    │ Session    │          │
//! │   └────────────┘    └──────┬───────┘    └────────────┘          │
//! │                            │                                     │
//! │              ┌─────────────┼──────────────┐                      │
//! │              ▼             ▼              ▼                      │
//! │        ┌──────────┐  ┌──────────┐  ┌────────────┐               │
//! │        │ Step     │  │ Pixel    │  │ Structural │               │
//! │        │ Handlers │  │ Diff     │  │ Diff       │               │
//! │        └──────────┘  └──────────┘  └────────────┘               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use comprobar::{EngineConfig, MemoryStore, MockLauncher, MockSession, RunOrchestrator};
//! use std::sync::Arc;
//!
//! # async fn demo() -> comprobar::ComprobarResult<()> {
//! let store = Arc::new(MemoryStore::new());
//! let launcher = Arc::new(MockLauncher::new(MockSession::new()));
//! let orchestrator = RunOrchestrator::new(store.clone(), launcher, EngineConfig::default());
//! let run_id = store.create_run("checkout", "mobile");
//! orchestrator.run_test(&run_id).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

#[allow(clippy::missing_errors_doc)]
pub mod admin;
#[cfg(feature = "browser")]
#[allow(clippy::missing_errors_doc, clippy::significant_drop_tightening)]
pub mod browser;
pub mod config;
#[allow(clippy::missing_errors_doc)]
pub mod context;
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
pub mod driver;
/// Device emulation profiles
pub mod emulation;
#[allow(clippy::missing_errors_doc)]
pub mod handlers;
#[allow(clippy::missing_errors_doc)]
pub mod model;
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
pub mod orchestrator;
#[allow(clippy::missing_errors_doc, clippy::cast_possible_truncation)]
pub mod recording;
mod result;
#[allow(clippy::missing_errors_doc)]
pub mod store;
pub mod structural;
#[allow(clippy::missing_errors_doc, clippy::cast_precision_loss)]
pub mod ux;
#[allow(
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub mod visual_regression;

pub use admin::{AdminCheck, AdminVerifier, CheckMode, CheckStatus, JsonSource};
#[cfg(feature = "http")]
pub use admin::HttpJsonSource;
#[cfg(feature = "browser")]
pub use browser::{ChromiumLauncher, ChromiumSession};
pub use config::{BrowserOptions, EngineConfig};
pub use context::ExecutionContext;
pub use driver::{
    BrowserSession, Capture, MockElement, MockLauncher, MockSession, SessionLauncher,
};
pub use emulation::{DeviceProfile, Viewport, DEFAULT_PROFILE};
pub use handlers::{execute_step, StepExecutionResult};
pub use model::{
    AssertionKind, Attachment, AttachmentKind, LogEntry, LogLevel, RunPlan, RunStatus, StepKind,
    StepMeta, TestDefinition, TestRun, TestStep,
};
pub use orchestrator::{RunLog, RunOrchestrator, StatusWriter};
pub use recording::{RecordingConfig, SessionRecorder};
pub use result::{ComprobarError, ComprobarResult};
pub use store::{MemoryStore, RunReport, RunStore};
pub use structural::{compare_objects, ComparisonResult, Difference};
pub use ux::{
    collect_timing, collect_ux, AccessibilityAudit, AccessibilityAuditor, AccessibilityIssue,
    DomAccessibilityAuditor, Severity, UxMetrics,
};
pub use visual_regression::{
    ImageDiff, VisualDiffResult, VisualRegressionConfig, VisualRegressionTester,
    DEFAULT_CHANNEL_THRESHOLD, DEFAULT_SIMILARITY_THRESHOLD,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::admin::*;
    #[cfg(feature = "browser")]
    pub use super::browser::*;
    pub use super::config::*;
    pub use super::driver::*;
    pub use super::emulation::*;
    pub use super::handlers::*;
    pub use super::model::*;
    pub use super::orchestrator::*;
    pub use super::result::*;
    pub use super::store::*;
    pub use super::structural::*;
    pub use super::ux::*;
    pub use super::visual_regression::*;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod error_tests {
        use super::*;

        #[test]
        fn test_browser_not_found_mentions_env() {
            let err = ComprobarError::BrowserNotFound {
                message: "chrome".into(),
            };
            assert!(err.to_string().contains("CHROMIUM_PATH"));
            assert!(err.is_missing_browser());
        }

        #[test]
        fn test_timeout_is_step_failure() {
            let err = ComprobarError::Timeout { ms: 5000 };
            assert!(err.to_string().contains("5000"));
            assert!(err.is_step_failure());
        }

        #[test]
        fn test_page_error_is_unexpected() {
            assert!(!ComprobarError::page("target crashed").is_step_failure());
        }
    }

    mod reexport_tests {
        use super::*;

        #[test]
        fn test_default_profile_is_desktop() {
            assert_eq!(DeviceProfile::resolve(DEFAULT_PROFILE).viewport, Viewport::new(1920, 1080));
        }

        #[test]
        fn test_step_kinds_round_trip_through_wire_names() {
            for kind in StepKind::ALL {
                let wire: String = kind.into();
                assert_eq!(wire.parse::<StepKind>().unwrap(), kind);
            }
        }
    }
}
