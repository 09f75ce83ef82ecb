//! Run orchestration.
//!
//! [`RunOrchestrator::run_test`] owns one run from `pending` to a terminal
//! status: it loads the definition, launches one browser session, collects
//! UX metrics, runs the steps in order, captures evidence on the first
//! failure and always releases the session.
//!
//! ```text
//!   load ─► mark running ─► launch ─► navigate ─► ux ─► steps ─► ux ─► passed
//!    │                        │          │                 │
//!    └────────── failed ◄─────┴──────────┴── evidence ◄────┘
//! ```
//!
//! The whole path races a watchdog timer. When the timer wins, the run
//! future is dropped at whatever it was awaiting, the run is written
//! `failed` and the session is closed as on every other path.

use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::driver::{BrowserSession, SessionLauncher};
use crate::emulation::DeviceProfile;
use crate::handlers::execute_step;
use crate::model::{Attachment, AttachmentKind, LogEntry, LogLevel, RunStatus, TestStep};
use crate::recording::SessionRecorder;
use crate::result::{ComprobarError, ComprobarResult};
use crate::store::RunStore;
use crate::ux::{collect_ux, AccessibilityAuditor, DomAccessibilityAuditor, UxMetrics};
use crate::visual_regression::VisualRegressionTester;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, error, info, warn};

const HINT_MISSING_BROWSER: &str =
    "no browser binaries available; install Chromium or point CHROMIUM_PATH at one";
const HINT_BROWSER_CRASHED: &str =
    "the browser was found but crashed or refused the connection; check sandbox flags and shared memory";

/// Best-effort writer for a run's log lines and attachments.
///
/// Store failures never reach the run. The first one is reported through
/// `tracing`, later ones only at debug level.
pub struct RunLog {
    store: Arc<dyn RunStore>,
    run_id: String,
    reported: AtomicBool,
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLog")
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

impl RunLog {
    /// Log writer for `run_id`
    pub fn new(store: Arc<dyn RunStore>, run_id: impl Into<String>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
            reported: AtomicBool::new(false),
        }
    }

    /// Append an info line
    pub async fn info(&self, step_index: Option<usize>, message: impl Into<String>) {
        self.write(LogLevel::Info, step_index, message.into()).await;
    }

    /// Append a warning line
    pub async fn warn(&self, step_index: Option<usize>, message: impl Into<String>) {
        self.write(LogLevel::Warn, step_index, message.into()).await;
    }

    /// Append an error line
    pub async fn error(&self, step_index: Option<usize>, message: impl Into<String>) {
        self.write(LogLevel::Error, step_index, message.into()).await;
    }

    /// Register an evidence file
    pub async fn attach(&self, kind: AttachmentKind, path: PathBuf, step_index: Option<usize>) {
        let attachment = Attachment {
            run_id: self.run_id.clone(),
            kind,
            path,
            step_index,
        };
        if let Err(e) = self.store.add_attachment(attachment).await {
            self.swallow("attachment", &e);
        }
    }

    async fn write(&self, level: LogLevel, step_index: Option<usize>, message: String) {
        let entry = LogEntry {
            run_id: self.run_id.clone(),
            level,
            step_index,
            message,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.append_log(entry).await {
            self.swallow("log", &e);
        }
    }

    fn swallow(&self, what: &str, e: &ComprobarError) {
        if self.reported.swap(true, Ordering::Relaxed) {
            debug!(run_id = %self.run_id, what, error = %e, "run record dropped");
        } else {
            warn!(run_id = %self.run_id, what, error = %e, "run records are not being persisted");
        }
    }
}

/// Terminal status writer with bounded retries.
///
/// The store only accepts a terminal status for a run that is not terminal
/// yet, so whichever writer lands first decides the verdict.
pub struct StatusWriter {
    store: Arc<dyn RunStore>,
    run_id: String,
    test_id: OnceLock<String>,
    attempts: u32,
    backoff: std::time::Duration,
}

impl std::fmt::Debug for StatusWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusWriter")
            .field("run_id", &self.run_id)
            .field("attempts", &self.attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl StatusWriter {
    /// Writer for `run_id` using the retry policy in `config`
    pub fn new(store: Arc<dyn RunStore>, run_id: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            store,
            run_id: run_id.into(),
            test_id: OnceLock::new(),
            attempts: config.status_write_attempts.max(1),
            backoff: config.status_write_backoff(),
        }
    }

    /// Parent test to update after the terminal write
    pub fn set_test(&self, test_id: &str) {
        let _ = self.test_id.set(test_id.to_string());
    }

    /// Write `status`. Returns `true` if this call made the run terminal.
    pub async fn finish(&self, status: RunStatus) -> bool {
        for attempt in 1..=self.attempts {
            match self.store.finish_run(&self.run_id, status).await {
                Ok(true) => {
                    info!(run_id = %self.run_id, %status, "run finished");
                    self.update_parent(status).await;
                    return true;
                }
                Ok(false) => {
                    debug!(run_id = %self.run_id, %status, "run already terminal");
                    return false;
                }
                Err(e) if attempt < self.attempts => {
                    warn!(
                        run_id = %self.run_id,
                        attempt,
                        max = self.attempts,
                        error = %e,
                        "status write failed, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => {
                    error!(
                        run_id = %self.run_id,
                        %status,
                        attempts = self.attempts,
                        error = %e,
                        "giving up on terminal status write; run is left non-terminal"
                    );
                }
            }
        }
        false
    }

    async fn update_parent(&self, status: RunStatus) {
        let Some(test_id) = self.test_id.get() else {
            return;
        };
        if let Err(e) = self.store.update_test_status(test_id, status).await {
            warn!(run_id = %self.run_id, test_id, error = %e, "test status not updated");
        }
    }
}

/// Executes test runs
#[derive(Clone)]
pub struct RunOrchestrator {
    store: Arc<dyn RunStore>,
    launcher: Arc<dyn SessionLauncher>,
    auditor: Arc<dyn AccessibilityAuditor>,
    config: EngineConfig,
}

impl std::fmt::Debug for RunOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RunOrchestrator {
    /// Orchestrator using the in-page DOM accessibility audit
    pub fn new(
        store: Arc<dyn RunStore>,
        launcher: Arc<dyn SessionLauncher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            launcher,
            auditor: Arc::new(DomAccessibilityAuditor),
            config,
        }
    }

    /// Use a different accessibility auditor
    #[must_use]
    pub fn with_auditor(mut self, auditor: Arc<dyn AccessibilityAuditor>) -> Self {
        self.auditor = auditor;
        self
    }

    /// Engine configuration
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute one run to a terminal status.
    ///
    /// The persisted status is authoritative; the returned error says why
    /// the run failed.
    pub async fn run_test(&self, run_id: &str) -> ComprobarResult<()> {
        let started = Instant::now();
        let log = RunLog::new(self.store.clone(), run_id);
        let status = StatusWriter::new(self.store.clone(), run_id, &self.config);
        let mut slot: Option<Box<dyn BrowserSession>> = None;
        let ceiling = self.config.watchdog();

        info!(run_id, watchdog_ms = self.config.watchdog_ms, "run starting");
        let outcome = tokio::select! {
            outcome = self.execute(run_id, &log, &status, &mut slot) => outcome,
            () = tokio::time::sleep(ceiling) => {
                let expired = ComprobarError::WatchdogExpired {
                    run_id: run_id.to_string(),
                    ms: self.config.watchdog_ms,
                };
                error!(run_id, ms = self.config.watchdog_ms, "watchdog fired");
                log.error(None, format!("{expired}; the run was cancelled at its current step"))
                    .await;
                let _ = status.finish(RunStatus::Failed).await;
                Err(expired)
            }
        };

        release(&log, slot).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &outcome {
            Ok(()) => info!(run_id, elapsed_ms, "run passed"),
            Err(e) => warn!(run_id, elapsed_ms, error = %e, "run failed"),
        }
        outcome
    }

    async fn execute(
        &self,
        run_id: &str,
        log: &RunLog,
        status: &StatusWriter,
        slot: &mut Option<Box<dyn BrowserSession>>,
    ) -> ComprobarResult<()> {
        let plan = match self.store.load_run(run_id).await {
            Ok(plan) => plan,
            // No record to write a status to.
            Err(e @ ComprobarError::RunNotFound { .. }) => {
                error!(run_id, error = %e, "run could not be loaded");
                return Err(e);
            }
            Err(e) => return abort(log, status, e).await,
        };
        status.set_test(&plan.run.test_id);

        let steps = match plan.definition.ordered_steps() {
            Ok(steps) => steps,
            Err(e) => return abort(log, status, e).await,
        };

        match self.store.mark_running(run_id).await {
            Ok(true) => {}
            Ok(false) => {
                let current = plan.run.status;
                warn!(run_id, %current, "run is not pending, not starting it");
                return Err(ComprobarError::store(format!(
                    "run {run_id} is {current}, expected pending"
                )));
            }
            Err(e) => return abort(log, status, e).await,
        }

        let profile = DeviceProfile::resolve(&plan.run.device_profile);
        if !profile.name.eq_ignore_ascii_case(&plan.run.device_profile) {
            log.warn(
                None,
                format!(
                    "Unknown device profile '{}', using {}",
                    plan.run.device_profile, profile.name
                ),
            )
            .await;
        }

        let session = match self.launcher.launch(&profile).await {
            Ok(session) => slot.insert(session),
            Err(e) => {
                let hint = if e.is_missing_browser() {
                    HINT_MISSING_BROWSER
                } else {
                    HINT_BROWSER_CRASHED
                };
                log.error(None, format!("{e} (hint: {hint})")).await;
                let _ = status.finish(RunStatus::Failed).await;
                return Err(e);
            }
        };
        let session: &mut dyn BrowserSession = session.as_mut();
        log.info(
            None,
            format!(
                "Browser session opened ({} {}x{})",
                profile.name, profile.viewport.width, profile.viewport.height
            ),
        )
        .await;

        let target = &plan.definition.target_url;
        if let Err(e) = session.navigate(target).await {
            return abort(log, status, e).await;
        }
        log.info(None, format!("Navigated to {target}")).await;

        let mut metrics = collect_ux(session, self.auditor.as_ref()).await;
        self.save_metrics(run_id, log, &metrics).await;

        let comparator = VisualRegressionTester::new(self.config.visual_config());
        let mut ctx = ExecutionContext::new(
            session,
            self.config.run_dir(run_id),
            plan.run.test_id.clone(),
            comparator,
        )
        .with_recorder(SessionRecorder::new(self.config.recording.clone()))
        .with_wait_timeout(self.config.wait_timeout());
        ctx.capture_frame("navigation").await;

        for step in &steps {
            if let Err(failure) = run_step(step, &mut ctx, log).await {
                capture_evidence(&mut ctx, step.order_index, log).await;
                let _ = status.finish(RunStatus::Failed).await;
                return Err(failure);
            }
        }

        let later = collect_ux(&mut *ctx.session, self.auditor.as_ref()).await;
        metrics.merge(later);
        self.save_metrics(run_id, log, &metrics).await;
        save_video(&mut ctx, log).await;

        log.info(None, format!("All {} steps passed", steps.len())).await;
        let _ = status.finish(RunStatus::Passed).await;
        Ok(())
    }

    async fn save_metrics(&self, run_id: &str, log: &RunLog, metrics: &UxMetrics) {
        if let Err(e) = self.store.save_ux_metrics(run_id, metrics).await {
            warn!(run_id, error = %e, "ux metrics not persisted");
            log.warn(None, format!("UX metrics not persisted: {e}")).await;
        }
    }
}

/// Log a fatal pre-step error and write `failed`
async fn abort(log: &RunLog, status: &StatusWriter, e: ComprobarError) -> ComprobarResult<()> {
    log.error(None, e.to_string()).await;
    let _ = status.finish(RunStatus::Failed).await;
    Err(e)
}

/// Run one step and write its log line. `Err` means the run must stop.
async fn run_step(
    step: &TestStep,
    ctx: &mut ExecutionContext<'_>,
    log: &RunLog,
) -> ComprobarResult<()> {
    let index = step.order_index;
    let target = step.selector.as_deref().unwrap_or("-");

    let message = match execute_step(step, ctx).await {
        Ok(result) => {
            if let Some(path) = &result.screenshot_path {
                log.attach(AttachmentKind::Screenshot, path.clone(), Some(index))
                    .await;
            }
            if result.success {
                log.info(Some(index), format!("Step {index} ({}) on {target} passed", step.kind))
                    .await;
                ctx.capture_frame(&format!("step-{index}")).await;
                return Ok(());
            }
            result
                .error
                .unwrap_or_else(|| "step reported failure".to_string())
        }
        Err(e) => format!("unexpected error: {e}"),
    };

    log.error(
        Some(index),
        format!("Step {index} ({}) on {target} failed: {message}", step.kind),
    )
    .await;
    Err(ComprobarError::StepFailed {
        index,
        kind: step.kind.to_string(),
        message,
    })
}

/// DOM snapshot and session video for a failed step
async fn capture_evidence(ctx: &mut ExecutionContext<'_>, index: usize, log: &RunLog) {
    ctx.capture_frame(&format!("step-{index}-failed")).await;

    match ctx.session.dom_snapshot().await {
        Ok(html) => {
            let path = ctx.run_dir.join(format!("dom-snapshot-step-{index}.html"));
            match write_file(&path, html.as_bytes()).await {
                Ok(()) => log.attach(AttachmentKind::DomSnapshot, path, Some(index)).await,
                Err(e) => log.warn(Some(index), format!("DOM snapshot not saved: {e}")).await,
            }
        }
        Err(e) => log.warn(Some(index), format!("DOM snapshot failed: {e}")).await,
    }

    save_video(ctx, log).await;
}

/// Encode the recording off the async workers; it is not used afterwards
async fn save_video(ctx: &mut ExecutionContext<'_>, log: &RunLog) {
    let path = ctx.run_dir.join("session.gif");
    let recorder = std::mem::take(&mut ctx.recorder);
    let target = path.clone();
    let saved = tokio::task::spawn_blocking(move || recorder.save(&target))
        .await
        .unwrap_or_else(|e| {
            Err(ComprobarError::Recording {
                message: format!("Encoder task failed: {e}"),
            })
        });
    match saved {
        Ok(()) => log.attach(AttachmentKind::Video, path, None).await,
        Err(e) => log.warn(None, format!("Session recording not saved: {e}")).await,
    }
}

async fn write_file(path: &Path, data: &[u8]) -> ComprobarResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await?;
    Ok(())
}

/// Close the page, then the browser. Errors are logged, never returned.
async fn release(log: &RunLog, slot: Option<Box<dyn BrowserSession>>) {
    let Some(mut session) = slot else {
        return;
    };
    if let Err(e) = session.close_page().await {
        warn!(error = %e, "page close failed");
        log.warn(None, format!("Page close failed: {e}")).await;
    }
    if let Err(e) = session.close().await {
        warn!(error = %e, "browser close failed");
        log.warn(None, format!("Browser close failed: {e}")).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::driver::{MockElement, MockLauncher, MockSession};
    use crate::model::{StepKind, TestDefinition};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        store: Arc<MemoryStore>,
        launcher: Arc<MockLauncher>,
        orchestrator: RunOrchestrator,
    }

    impl Harness {
        fn new(steps: Vec<TestStep>) -> Self {
            Self::with(steps, MockLauncher::new(MockSession::new()), |c| c)
        }

        fn with(
            steps: Vec<TestStep>,
            launcher: MockLauncher,
            tune: impl FnOnce(EngineConfig) -> EngineConfig,
        ) -> Self {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(MemoryStore::new());
            store.insert_definition(TestDefinition {
                id: "checkout".into(),
                name: "Checkout".into(),
                target_url: "https://shop.test/cart".into(),
                steps,
            });
            let launcher = Arc::new(launcher);
            let config = tune(
                EngineConfig::default()
                    .with_artifacts_dir(dir.path())
                    .with_status_retry(3, 1),
            );
            let orchestrator = RunOrchestrator::new(store.clone(), launcher.clone(), config);
            Self {
                _dir: dir,
                store,
                launcher,
                orchestrator,
            }
        }

        fn session(&self) -> &MockSession {
            self.launcher.session()
        }

        fn new_run(&self, profile: &str) -> String {
            self.store.create_run("checkout", profile)
        }

        fn status(&self, run_id: &str) -> RunStatus {
            self.store.run(run_id).unwrap().status
        }

        fn logged_steps(&self, run_id: &str) -> Vec<usize> {
            self.store
                .logs(run_id)
                .iter()
                .filter_map(|l| l.step_index)
                .collect()
        }

        fn attachments_of(&self, run_id: &str, kind: AttachmentKind) -> Vec<Attachment> {
            self.store
                .attachments(run_id)
                .into_iter()
                .filter(|a| a.kind == kind)
                .collect()
        }
    }

    fn click(index: usize, selector: &str) -> TestStep {
        TestStep::new(index, StepKind::Click).with_selector(selector)
    }

    mod lifecycle_tests {
        use super::*;

        #[tokio::test]
        async fn test_all_steps_pass() {
            let h = Harness::new(vec![click(0, "#add"), click(1, "#checkout")]);
            h.session().add_element("#add", MockElement::default());
            h.session().add_element("#checkout", MockElement::default());
            let run_id = h.new_run("desktop");

            h.orchestrator.run_test(&run_id).await.unwrap();

            assert_eq!(h.status(&run_id), RunStatus::Passed);
            assert_eq!(h.store.test_status("checkout"), Some(RunStatus::Passed));
            assert_eq!(h.logged_steps(&run_id), vec![0, 1]);
            assert_eq!(h.attachments_of(&run_id, AttachmentKind::Video).len(), 1);
            assert!(h.attachments_of(&run_id, AttachmentKind::DomSnapshot).is_empty());
            assert_eq!(
                h.session().current_url().as_deref(),
                Some("https://shop.test/cart")
            );
            assert!(h.session().page_closed());
            assert!(h.session().browser_closed());
        }

        #[tokio::test]
        async fn test_failing_step_stops_run_with_evidence() {
            let h = Harness::new(vec![
                click(0, "#add"),
                click(1, "#missing"),
                click(2, "#checkout"),
            ]);
            h.session().add_element("#add", MockElement::default());
            h.session().add_element("#checkout", MockElement::default());
            let run_id = h.new_run("desktop");

            let outcome = h.orchestrator.run_test(&run_id).await;

            assert!(matches!(
                outcome,
                Err(ComprobarError::StepFailed { index: 1, .. })
            ));
            assert_eq!(h.status(&run_id), RunStatus::Failed);
            assert_eq!(h.store.test_status("checkout"), Some(RunStatus::Failed));
            assert_eq!(h.logged_steps(&run_id), vec![0, 1]);

            let snapshots = h.attachments_of(&run_id, AttachmentKind::DomSnapshot);
            assert_eq!(snapshots.len(), 1);
            assert_eq!(snapshots[0].step_index, Some(1));
            assert!(snapshots[0].path.exists());
            assert_eq!(h.attachments_of(&run_id, AttachmentKind::Video).len(), 1);

            let history = h.session().history();
            assert_eq!(history.iter().filter(|c| *c == "click:#add").count(), 1);
            assert!(!history.iter().any(|c| c == "click:#checkout"));
            assert!(h.session().browser_closed());
        }

        #[tokio::test]
        async fn test_failure_log_names_step_and_selector() {
            let h = Harness::new(vec![click(0, "#gone")]);
            let run_id = h.new_run("desktop");
            let _ = h.orchestrator.run_test(&run_id).await;
            let logs = h.store.logs(&run_id);
            let failure = logs.iter().find(|l| l.step_index == Some(0)).unwrap();
            assert_eq!(failure.level, LogLevel::Error);
            assert!(failure.message.contains("Step 0 (click) on #gone failed"));
        }

        #[tokio::test]
        async fn test_unexpected_handler_error_fails_run() {
            let h = Harness::new(vec![click(0, "#boom")]);
            h.session().add_element("#boom", MockElement::default());
            h.session().fail_on("#boom");
            let run_id = h.new_run("desktop");
            let outcome = h.orchestrator.run_test(&run_id).await;
            assert!(outcome.is_err());
            assert_eq!(h.status(&run_id), RunStatus::Failed);
            let logs = h.store.logs(&run_id);
            assert!(logs.iter().any(|l| l.message.contains("unexpected error")));
        }

        #[tokio::test]
        async fn test_step_throwing_mid_run_stops_with_evidence() {
            let h = Harness::new(vec![click(0, "#a"), click(1, "#boom"), click(2, "#c")]);
            for target in ["#a", "#boom", "#c"] {
                h.session().add_element(target, MockElement::default());
            }
            h.session().fail_on("#boom");
            let run_id = h.new_run("desktop");

            let outcome = h.orchestrator.run_test(&run_id).await;

            assert!(matches!(
                outcome,
                Err(ComprobarError::StepFailed { index: 1, .. })
            ));
            assert_eq!(h.status(&run_id), RunStatus::Failed);
            assert_eq!(h.logged_steps(&run_id), vec![0, 1]);
            let snapshots = h.attachments_of(&run_id, AttachmentKind::DomSnapshot);
            assert_eq!(snapshots.len(), 1);
            assert_eq!(snapshots[0].step_index, Some(1));
            assert_eq!(h.attachments_of(&run_id, AttachmentKind::Video).len(), 1);
            assert!(!h.session().history().iter().any(|c| c == "click:#c"));
            assert!(h.session().browser_closed());
        }

        #[tokio::test]
        async fn test_extracted_value_flows_to_later_step() {
            let h = Harness::new(vec![
                TestStep::new(0, StepKind::Extract)
                    .with_selector("h1")
                    .with_value("greeting"),
                TestStep::new(1, StepKind::Input)
                    .with_selector("#note")
                    .with_value("{{greeting}} world"),
            ]);
            h.session().add_element("h1", MockElement::with_text(" hello "));
            h.session().add_element("#note", MockElement::default());
            let run_id = h.new_run("desktop");
            h.orchestrator.run_test(&run_id).await.unwrap();
            assert_eq!(h.session().text_of("#note").as_deref(), Some("hello world"));
        }

        #[tokio::test]
        async fn test_screenshot_step_is_attached() {
            let h = Harness::new(vec![TestStep::new(0, StepKind::Screenshot)]);
            let run_id = h.new_run("desktop");
            h.orchestrator.run_test(&run_id).await.unwrap();
            let shots = h.attachments_of(&run_id, AttachmentKind::Screenshot);
            assert_eq!(shots.len(), 1);
            assert_eq!(shots[0].step_index, Some(0));
            assert!(shots[0].path.starts_with(h.orchestrator.config().run_dir(&run_id)));
        }

        #[tokio::test]
        async fn test_ux_metrics_merged_and_persisted() {
            let h = Harness::new(vec![click(0, "#add")]);
            h.session().add_element("#add", MockElement::default());
            h.session().set_eval_result(
                "getEntriesByType('navigation')",
                json!({"ttfb": 42.0, "domContentLoaded": 310.0, "load": 800.0, "lcp": null}),
            );
            h.session().set_eval_result(
                "image-alt",
                json!([{"rule": "image-alt", "target": "img.hero"}]),
            );
            let run_id = h.new_run("desktop");
            h.orchestrator.run_test(&run_id).await.unwrap();

            let metrics = h.store.run(&run_id).unwrap().ux_metrics.unwrap();
            assert_eq!(metrics.ttfb_ms, Some(42.0));
            assert_eq!(metrics.load_time_ms, Some(800.0));
            assert_eq!(metrics.accessibility_violations, 1);
            assert_eq!(
                metrics.notes.iter().filter(|n| n.contains("img.hero")).count(),
                2
            );
        }

        #[tokio::test]
        async fn test_unknown_profile_falls_back_to_desktop() {
            let h = Harness::new(vec![click(0, "#add")]);
            h.session().add_element("#add", MockElement::default());
            let run_id = h.new_run("smart-fridge");
            h.orchestrator.run_test(&run_id).await.unwrap();
            let launches = h.launcher.launches();
            assert_eq!(launches.len(), 1);
            assert_eq!(launches[0].name, "desktop");
            assert_eq!(launches[0].viewport.width, 1920);
        }

        #[tokio::test]
        async fn test_run_not_pending_is_left_alone() {
            let h = Harness::new(vec![click(0, "#add")]);
            let run_id = h.new_run("desktop");
            assert!(h.store.finish_run(&run_id, RunStatus::Failed).await.unwrap());
            assert!(h.orchestrator.run_test(&run_id).await.is_err());
            assert!(h.launcher.launches().is_empty());
            assert_eq!(h.store.status_writes(&run_id), vec![RunStatus::Failed]);
        }
    }

    mod fatal_tests {
        use super::*;

        #[tokio::test]
        async fn test_empty_definition_never_launches() {
            let h = Harness::new(Vec::new());
            let run_id = h.new_run("desktop");
            let outcome = h.orchestrator.run_test(&run_id).await;
            assert!(matches!(outcome, Err(ComprobarError::InvalidDefinition { .. })));
            assert_eq!(h.status(&run_id), RunStatus::Failed);
            assert!(h.launcher.launches().is_empty());
        }

        #[tokio::test]
        async fn test_unknown_run_writes_nothing() {
            let h = Harness::with(
                vec![click(0, "#a")],
                MockLauncher::new(MockSession::new()),
                |c| c.with_status_retry(3, 60_000),
            );
            let outcome = tokio::time::timeout(
                Duration::from_secs(5),
                h.orchestrator.run_test("run-that-never-was"),
            )
            .await
            .expect("no status retries for a run that does not exist");
            assert!(matches!(outcome, Err(ComprobarError::RunNotFound { .. })));
            assert!(h.store.status_writes("run-that-never-was").is_empty());
            assert!(h.store.logs("run-that-never-was").is_empty());
            assert!(h.launcher.launches().is_empty());
        }

        #[tokio::test]
        async fn test_gapped_indices_never_launch() {
            let h = Harness::new(vec![click(0, "#a"), click(2, "#b")]);
            let run_id = h.new_run("desktop");
            assert!(h.orchestrator.run_test(&run_id).await.is_err());
            assert_eq!(h.status(&run_id), RunStatus::Failed);
            assert!(h.launcher.launches().is_empty());
        }

        #[tokio::test]
        async fn test_missing_browser_hint() {
            let h = Harness::with(
                vec![click(0, "#a")],
                MockLauncher::failing(true, "chrome executable not found"),
                |c| c,
            );
            let run_id = h.new_run("desktop");
            let outcome = h.orchestrator.run_test(&run_id).await;
            assert!(matches!(outcome, Err(ComprobarError::BrowserNotFound { .. })));
            assert_eq!(h.status(&run_id), RunStatus::Failed);
            assert!(!h.session().was_called("navigate"));
            let logs = h.store.logs(&run_id);
            assert!(logs.iter().any(|l| l.message.contains("no browser binaries")));
        }

        #[tokio::test]
        async fn test_crashed_browser_hint() {
            let h = Harness::with(
                vec![click(0, "#a")],
                MockLauncher::failing(false, "websocket closed"),
                |c| c,
            );
            let run_id = h.new_run("desktop");
            let _ = h.orchestrator.run_test(&run_id).await;
            let logs = h.store.logs(&run_id);
            assert!(logs.iter().any(|l| l.message.contains("crashed")));
            assert!(!h.session().was_called("navigate"));
        }

        #[tokio::test]
        async fn test_navigation_failure_closes_session() {
            let h = Harness::new(vec![click(0, "#a")]);
            h.session().fail_navigation("net::ERR_NAME_NOT_RESOLVED");
            let run_id = h.new_run("desktop");
            let outcome = h.orchestrator.run_test(&run_id).await;
            assert!(matches!(outcome, Err(ComprobarError::NavigationError { .. })));
            assert_eq!(h.status(&run_id), RunStatus::Failed);
            assert!(h.session().browser_closed());
        }
    }

    mod watchdog_tests {
        use super::*;

        #[tokio::test]
        async fn test_hanging_step_is_cut_off() {
            let h = Harness::with(
                vec![
                    click(0, "#add"),
                    TestStep::new(1, StepKind::WaitForSelector).with_selector("#spinner"),
                ],
                MockLauncher::new(MockSession::new()),
                |c| c.with_watchdog(Duration::from_millis(100)),
            );
            h.session().add_element("#add", MockElement::default());
            h.session().hang_on("#spinner");
            let run_id = h.new_run("desktop");

            let outcome = h.orchestrator.run_test(&run_id).await;

            assert!(matches!(
                outcome,
                Err(ComprobarError::WatchdogExpired { ms: 100, .. })
            ));
            assert_eq!(h.status(&run_id), RunStatus::Failed);
            assert!(h.session().page_closed());
            assert_eq!(h.session().close_calls(), 1);
            let logs = h.store.logs(&run_id);
            assert!(logs.iter().any(|l| l.message.contains("watchdog")));

            // A late writer cannot flip the verdict
            assert!(!h.store.finish_run(&run_id, RunStatus::Passed).await.unwrap());
            assert_eq!(h.status(&run_id), RunStatus::Failed);
        }
    }

    mod status_write_tests {
        use super::*;

        #[tokio::test]
        async fn test_transient_failures_are_retried() {
            let h = Harness::new(vec![click(0, "#add")]);
            h.session().add_element("#add", MockElement::default());
            let run_id = h.new_run("desktop");
            h.store.fail_next_status_writes(2);
            h.orchestrator.run_test(&run_id).await.unwrap();
            assert_eq!(h.status(&run_id), RunStatus::Passed);
            assert_eq!(h.store.status_writes(&run_id), vec![RunStatus::Passed]);
        }

        #[tokio::test]
        async fn test_exhausted_retries_leave_run_running() {
            let h = Harness::new(vec![click(0, "#add")]);
            h.session().add_element("#add", MockElement::default());
            let run_id = h.new_run("desktop");
            h.store.fail_next_status_writes(3);
            let _ = h.orchestrator.run_test(&run_id).await;
            assert_eq!(h.status(&run_id), RunStatus::Running);
            assert!(h.store.test_status("checkout").is_none());
        }

        #[tokio::test]
        async fn test_log_store_outage_does_not_change_verdict() {
            let h = Harness::new(vec![click(0, "#add")]);
            h.session().add_element("#add", MockElement::default());
            let run_id = h.new_run("desktop");
            h.store.fail_log_writes(true);
            h.orchestrator.run_test(&run_id).await.unwrap();
            assert_eq!(h.status(&run_id), RunStatus::Passed);
            assert!(h.store.logs(&run_id).is_empty());
        }

        #[tokio::test]
        async fn test_first_terminal_writer_wins() {
            let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
            store.insert_run(crate::model::TestRun::new("r1", "t1", "desktop"));
            let _ = store.mark_running("r1").await.unwrap();
            let config = EngineConfig::default().with_status_retry(1, 1);
            let first = StatusWriter::new(store.clone(), "r1", &config);
            let second = StatusWriter::new(store.clone(), "r1", &config);
            assert!(first.finish(RunStatus::Failed).await);
            assert!(!second.finish(RunStatus::Passed).await);
            assert_eq!(store.run("r1").unwrap().status, RunStatus::Failed);
        }
    }
}
