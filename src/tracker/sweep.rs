//! Sweep runner: drive one planned batch through an external executor.
//!
//! For each scheduled test, in order: check the stop signal, execute,
//! classify the raw outcome, record it, then mark the tracker. A failed
//! record is reported and the sweep moves on; the tracker only advances
//! past tests whose result is durably stored. A tracker save that fails
//! after the result landed is reported the same way.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::classify::{RawOutcome, classify};
use super::recorder::{RecordRequest, ResultRecorder};
use super::schedule::{BatchPlan, ScheduledTest};
use super::state::{SessionTracker, TrackerStatus};
use super::stop::{StopReason, StopSignal};
use crate::core::errors::{QatError, Result};
use crate::logger::jsonl::{ActivityLog, EventType, LogEntry, Severity};
use crate::store::bugs::BugUpdate;
use crate::store::sessions::TestStatus;

/// What the automation driver observed for one test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Raw outcome text such as `PASS` or `FAIL: button missing`.
    pub outcome: Option<String>,
    pub screenshot_path: Option<String>,
    pub console_errors: Vec<String>,
}

/// The external driver that actually runs a test.
pub trait TestExecutor {
    fn execute(&mut self, test: &ScheduledTest) -> ExecutionReport;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepEntry {
    pub identifier: String,
    pub code: String,
    pub status: TestStatus,
    pub reason: String,
    pub needs_screenshot: bool,
    pub bug_update: Option<BugUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub identifier: String,
    pub code: String,
    pub error_code: String,
    pub message: String,
}

impl SweepFailure {
    fn new(test: &ScheduledTest, error: &QatError) -> Self {
        Self {
            identifier: test.candidate.identifier.clone(),
            code: test.candidate.code.clone(),
            error_code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub recorded: Vec<SweepEntry>,
    pub failures: Vec<SweepFailure>,
    /// Set when the sweep ended early on a stop request.
    pub stopped: Option<String>,
    /// Tests of the batch never started because of a stop request or the limit.
    pub not_started: usize,
    /// The tracker queue has no remaining tests.
    pub exhausted: bool,
}

/// One sweep over a batch.
pub struct Sweep<'r, 's> {
    recorder: &'r ResultRecorder<'s>,
    stop: StopSignal,
    log: ActivityLog,
    limit: Option<usize>,
}

impl<'r, 's> Sweep<'r, 's> {
    #[must_use]
    pub fn new(recorder: &'r ResultRecorder<'s>, stop: StopSignal) -> Self {
        Self {
            recorder,
            stop,
            log: ActivityLog::disabled(),
            limit: None,
        }
    }

    #[must_use]
    pub fn with_log(mut self, log: ActivityLog) -> Self {
        self.log = log;
        self
    }

    /// Execute at most `limit` tests of the batch.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Run `plan` inside `session_id`, advancing `tracker` as results land.
    pub fn run<E: TestExecutor + ?Sized>(
        &self,
        session_id: &str,
        plan: &BatchPlan,
        tracker: &mut SessionTracker,
        executor: &mut E,
    ) -> Result<SweepReport> {
        if tracker.state().status != TrackerStatus::Running {
            return Err(QatError::transition("run sweep", tracker.state().status));
        }

        let mut report = SweepReport::default();
        let limit = self.limit.unwrap_or(usize::MAX);

        for (position, test) in plan.batch.iter().enumerate() {
            if position >= limit {
                report.not_started = plan.batch.len() - position;
                break;
            }
            if let Some(reason) = self.stop.should_stop() {
                let label = match reason {
                    StopReason::StopFile => "stop file",
                    StopReason::Signal => "signal",
                };
                self.log.record(
                    &LogEntry::new(EventType::StopRequested, Severity::Info)
                        .session(session_id)
                        .details(label),
                );
                report.stopped = Some(label.to_string());
                report.not_started = plan.batch.len() - position;
                break;
            }

            let execution = executor.execute(test);
            let classification = classify(&RawOutcome {
                text: execution.outcome.as_deref(),
                screenshot_path: execution.screenshot_path.as_deref(),
                console_errors: &execution.console_errors,
            });
            let passed = classification.status == TestStatus::Passed;
            let request = RecordRequest {
                session_id: session_id.to_string(),
                code: test.candidate.code.clone(),
                status: classification.status,
                started_at: execution.started_at,
                finished_at: execution.finished_at,
                error_message: (!passed).then(|| classification.reason.clone()),
                screenshot_path: execution.screenshot_path.clone(),
                notes: passed.then(|| classification.reason.clone()),
            };

            let receipt = match self.recorder.record(&request) {
                Ok(receipt) => receipt,
                Err(error) => {
                    eprintln!(
                        "[QAT-SWEEP] could not record {} ({}): {error}",
                        test.candidate.code, test.candidate.identifier
                    );
                    report.failures.push(SweepFailure::new(test, &error));
                    continue;
                }
            };
            report.recorded.push(SweepEntry {
                identifier: test.candidate.identifier.clone(),
                code: receipt.code,
                status: receipt.status,
                reason: classification.reason,
                needs_screenshot: classification.needs_screenshot,
                bug_update: receipt.bug_update,
            });
            // The result is stored; a tracker write failure only leaves the
            // test queued for the next batch.
            if let Err(error) = tracker.mark_completed(&test.candidate.identifier) {
                eprintln!(
                    "[QAT-SWEEP] recorded {} but could not save tracker progress: {error}",
                    test.candidate.identifier
                );
                report.failures.push(SweepFailure::new(test, &error));
            }
        }

        report.exhausted = tracker.is_exhausted();
        Ok(report)
    }
}
