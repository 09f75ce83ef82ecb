//! Persistence collaborator.
//!
//! [`RunStore`] is the seam between the engine and whatever database holds
//! runs. [`MemoryStore`] keeps everything in process; the CLI uses it and
//! dumps a [`RunReport`] when a run ends, and the tests use its failure
//! injection to exercise the retry paths.

use crate::admin::AdminCheck;
use crate::model::{Attachment, LogEntry, RunPlan, RunStatus, TestDefinition, TestRun};
use crate::result::{ComprobarError, ComprobarResult};
use crate::ux::UxMetrics;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Storage operations the engine needs
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Load a run and the definition it executes
    async fn load_run(&self, run_id: &str) -> ComprobarResult<RunPlan>;

    /// Move a pending run to `running`. Returns `false` if the run was not
    /// pending.
    async fn mark_running(&self, run_id: &str) -> ComprobarResult<bool>;

    /// Write a terminal status if, and only if, the run is not terminal yet.
    /// Returns `false` when another writer got there first.
    async fn finish_run(&self, run_id: &str, status: RunStatus) -> ComprobarResult<bool>;

    /// Record the latest verdict on the parent test
    async fn update_test_status(&self, test_id: &str, status: RunStatus) -> ComprobarResult<()>;

    /// Append a log line
    async fn append_log(&self, entry: LogEntry) -> ComprobarResult<()>;

    /// Register an evidence file
    async fn add_attachment(&self, attachment: Attachment) -> ComprobarResult<()>;

    /// Store the run's UX metrics, replacing earlier ones
    async fn save_ux_metrics(&self, run_id: &str, metrics: &UxMetrics) -> ComprobarResult<()>;

    /// Store an admin verification result
    async fn save_admin_check(&self, check: &AdminCheck) -> ComprobarResult<()>;
}

/// Everything recorded about one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// The run record
    pub run: TestRun,
    /// Log trail in write order
    pub logs: Vec<LogEntry>,
    /// Evidence files
    pub attachments: Vec<Attachment>,
    /// Admin checks tied to the run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admin_checks: Vec<AdminCheck>,
}

#[derive(Debug, Default)]
struct Inner {
    definitions: HashMap<String, TestDefinition>,
    runs: HashMap<String, TestRun>,
    test_status: HashMap<String, RunStatus>,
    logs: Vec<LogEntry>,
    attachments: Vec<Attachment>,
    admin_checks: Vec<AdminCheck>,
    status_writes: Vec<(String, RunStatus)>,
    failing_status_writes: usize,
    failing_logs: bool,
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a definition
    pub fn insert_definition(&self, definition: TestDefinition) {
        let _ = self
            .inner()
            .definitions
            .insert(definition.id.clone(), definition);
    }

    /// Add or replace a run
    pub fn insert_run(&self, run: TestRun) {
        let _ = self.inner().runs.insert(run.id.clone(), run);
    }

    /// Create a pending run of a stored definition and return its id
    pub fn create_run(&self, test_id: &str, device_profile: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.insert_run(TestRun::new(id.clone(), test_id, device_profile));
        id
    }

    /// Current run record
    #[must_use]
    pub fn run(&self, run_id: &str) -> Option<TestRun> {
        self.inner().runs.get(run_id).cloned()
    }

    /// Latest verdict recorded on a test
    #[must_use]
    pub fn test_status(&self, test_id: &str) -> Option<RunStatus> {
        self.inner().test_status.get(test_id).copied()
    }

    /// Log lines of a run
    #[must_use]
    pub fn logs(&self, run_id: &str) -> Vec<LogEntry> {
        self.inner()
            .logs
            .iter()
            .filter(|l| l.run_id == run_id)
            .cloned()
            .collect()
    }

    /// Attachments of a run
    #[must_use]
    pub fn attachments(&self, run_id: &str) -> Vec<Attachment> {
        self.inner()
            .attachments
            .iter()
            .filter(|a| a.run_id == run_id)
            .cloned()
            .collect()
    }

    /// Every stored admin check
    #[must_use]
    pub fn admin_checks(&self) -> Vec<AdminCheck> {
        self.inner().admin_checks.clone()
    }

    /// Terminal writes that changed a run, in order
    #[must_use]
    pub fn status_writes(&self, run_id: &str) -> Vec<RunStatus> {
        self.inner()
            .status_writes
            .iter()
            .filter(|(id, _)| id == run_id)
            .map(|(_, s)| *s)
            .collect()
    }

    /// Make the next `n` terminal writes fail
    pub fn fail_next_status_writes(&self, n: usize) {
        self.inner().failing_status_writes = n;
    }

    /// Make log appends fail
    pub fn fail_log_writes(&self, failing: bool) {
        self.inner().failing_logs = failing;
    }

    /// Snapshot of everything recorded about a run
    pub fn report(&self, run_id: &str) -> ComprobarResult<RunReport> {
        let inner = self.inner();
        let run = inner
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| ComprobarError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        Ok(RunReport {
            run,
            logs: inner
                .logs
                .iter()
                .filter(|l| l.run_id == run_id)
                .cloned()
                .collect(),
            attachments: inner
                .attachments
                .iter()
                .filter(|a| a.run_id == run_id)
                .cloned()
                .collect(),
            admin_checks: inner
                .admin_checks
                .iter()
                .filter(|c| c.run_id.as_deref() == Some(run_id))
                .cloned()
                .collect(),
        })
    }
}

fn missing_run(run_id: &str) -> ComprobarError {
    ComprobarError::RunNotFound {
        run_id: run_id.to_string(),
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn load_run(&self, run_id: &str) -> ComprobarResult<RunPlan> {
        let inner = self.inner();
        let run = inner
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| missing_run(run_id))?;
        let definition = inner.definitions.get(&run.test_id).cloned().ok_or_else(|| {
            ComprobarError::InvalidDefinition {
                message: format!("test '{}' not found", run.test_id),
            }
        })?;
        Ok(RunPlan { run, definition })
    }

    async fn mark_running(&self, run_id: &str) -> ComprobarResult<bool> {
        let mut inner = self.inner();
        let run = inner.runs.get_mut(run_id).ok_or_else(|| missing_run(run_id))?;
        if !run.status.can_transition_to(RunStatus::Running) {
            return Ok(false);
        }
        run.status = RunStatus::Running;
        Ok(true)
    }

    async fn finish_run(&self, run_id: &str, status: RunStatus) -> ComprobarResult<bool> {
        let mut inner = self.inner();
        if inner.failing_status_writes > 0 {
            inner.failing_status_writes -= 1;
            return Err(ComprobarError::store("connection reset during status write"));
        }
        let run = inner.runs.get_mut(run_id).ok_or_else(|| missing_run(run_id))?;
        if !run.status.can_transition_to(status) {
            debug!(run_id, current = %run.status, requested = %status, "terminal write skipped");
            return Ok(false);
        }
        run.status = status;
        run.finished_at = Some(Utc::now());
        inner.status_writes.push((run_id.to_string(), status));
        Ok(true)
    }

    async fn update_test_status(&self, test_id: &str, status: RunStatus) -> ComprobarResult<()> {
        let _ = self.inner().test_status.insert(test_id.to_string(), status);
        Ok(())
    }

    async fn append_log(&self, entry: LogEntry) -> ComprobarResult<()> {
        let mut inner = self.inner();
        if inner.failing_logs {
            return Err(ComprobarError::store("log table unavailable"));
        }
        inner.logs.push(entry);
        Ok(())
    }

    async fn add_attachment(&self, attachment: Attachment) -> ComprobarResult<()> {
        self.inner().attachments.push(attachment);
        Ok(())
    }

    async fn save_ux_metrics(&self, run_id: &str, metrics: &UxMetrics) -> ComprobarResult<()> {
        let mut inner = self.inner();
        let run = inner.runs.get_mut(run_id).ok_or_else(|| missing_run(run_id))?;
        run.ux_metrics = Some(metrics.clone());
        Ok(())
    }

    async fn save_admin_check(&self, check: &AdminCheck) -> ComprobarResult<()> {
        self.inner().admin_checks.push(check.clone());
        Ok(())
    }
}
