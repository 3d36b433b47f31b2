//! Result recorder: the only writer of result rows and the only automatic
//! trigger for known-bug updates.
//!
//! One `record` call is one immediate transaction covering test-case
//! creation, the result row, the session counters and the bug registry.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::{TestCase, TestCode};
use crate::core::config::RecordingConfig;
use crate::core::errors::{QatError, Result};
use crate::logger::jsonl::{ActivityLog, EventType, LogEntry, Severity};
use crate::store::Store;
use crate::store::bugs::{BugReport, BugSeverity, BugUpdate, record_occurrence_in};
use crate::store::catalog::{find_case, insert_case};
use crate::store::sessions::{NewResult, SessionStatus, TestStatus, insert_result_in, require_session_in};

/// One outcome to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRequest {
    pub session_id: String,
    pub code: String,
    pub status: TestStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub screenshot_path: Option<String>,
    pub notes: Option<String>,
}

/// What a successful `record` wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordReceipt {
    pub session_id: String,
    pub code: String,
    pub result_id: i64,
    pub status: TestStatus,
    pub duration_ms: u64,
    /// The test case did not exist and was created on the fly.
    pub created_test_case: bool,
    /// Registry effect; `None` unless the result failed with a message.
    pub bug_update: Option<BugUpdate>,
}

pub struct ResultRecorder<'a> {
    store: &'a Store,
    description_limit: usize,
    default_severity: BugSeverity,
    log: ActivityLog,
}

impl<'a> ResultRecorder<'a> {
    #[must_use]
    pub fn new(store: &'a Store, recording: &RecordingConfig) -> Self {
        Self {
            store,
            description_limit: recording.bug_description_limit,
            default_severity: recording.default_severity,
            log: ActivityLog::disabled(),
        }
    }

    #[must_use]
    pub fn with_log(mut self, log: ActivityLog) -> Self {
        self.log = log;
        self
    }

    /// Persist one outcome; all or nothing.
    pub fn record(&self, request: &RecordRequest) -> Result<RecordReceipt> {
        let outcome = self.record_inner(request);
        match &outcome {
            Ok(receipt) => self.log_receipt(receipt),
            Err(error) => self.log.record(
                &LogEntry::from_error(error)
                    .session(&request.session_id)
                    .code(&request.code),
            ),
        }
        outcome
    }

    fn record_inner(&self, request: &RecordRequest) -> Result<RecordReceipt> {
        let code = TestCode::parse(&request.code)?;
        let duration_ms = duration_ms(request.started_at, request.finished_at);
        let today = request.finished_at.date_naive();

        self.store.write(|conn| {
            let (session_row, session) = require_session_in(conn, &request.session_id)?;
            if session.status != SessionStatus::Running {
                return Err(QatError::transition("record result", session.status));
            }

            let (case_row, case, created_test_case) = match find_case(conn, code.as_str())? {
                Some((row, case)) => (row, case, false),
                None => {
                    let case = TestCase::placeholder(&code);
                    (insert_case(conn, &case)?, case, true)
                }
            };

            let result_id = insert_result_in(
                conn,
                session_row,
                case_row,
                &NewResult {
                    status: request.status,
                    started_at: request.started_at,
                    finished_at: request.finished_at,
                    duration_ms,
                    error_message: request.error_message.as_deref(),
                    screenshot_path: request.screenshot_path.as_deref(),
                    notes: request.notes.as_deref(),
                },
            )?;

            let message = request
                .error_message
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty());
            let bug_update = match (request.status, message) {
                (TestStatus::Failed, Some(message)) => {
                    let report = BugReport {
                        category: Some(case.category),
                        description: truncate_chars(message, self.description_limit),
                        severity: self.default_severity,
                        external_ref: case.external_ref.clone(),
                    };
                    Some(record_occurrence_in(conn, code.as_str(), &report, today)?)
                }
                _ => None,
            };

            Ok(RecordReceipt {
                session_id: session.session_id,
                code: code.to_string(),
                result_id,
                status: request.status,
                duration_ms,
                created_test_case,
                bug_update,
            })
        })
    }

    fn log_receipt(&self, receipt: &RecordReceipt) {
        let mut entry = LogEntry::new(EventType::ResultRecorded, Severity::Info)
            .session(&receipt.session_id)
            .code(&receipt.code)
            .status(receipt.status.as_str());
        entry.duration_ms = Some(receipt.duration_ms);
        entry.ok = Some(true);
        self.log.record(&entry);

        let bug_event = match receipt.bug_update {
            Some(BugUpdate::Opened) => Some(EventType::BugOpened),
            Some(BugUpdate::Seen) => Some(EventType::BugSeen),
            Some(BugUpdate::AlreadySeenToday | BugUpdate::Stale) | None => None,
        };
        if let Some(event) = bug_event {
            self.log.record(
                &LogEntry::new(event, Severity::Warning)
                    .session(&receipt.session_id)
                    .code(&receipt.code),
            );
        }
    }
}

/// `max(0, finished - started)` in milliseconds.
fn duration_ms(started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> u64 {
    u64::try_from((finished_at - started_at).num_milliseconds()).unwrap_or(0)
}

/// First `limit` characters of `text` (not bytes).
#[must_use]
pub fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Category;
    use crate::store::bugs::KnownBugRegistry;
    use crate::store::catalog::TestCatalog;
    use crate::store::sessions::SessionLedger;
    use chrono::{NaiveDate, TimeZone};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Store,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("recorder.sqlite3")).unwrap();
        Fixture { _dir: dir, store }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, day, hour, 0, 0).unwrap()
    }

    fn request(session_id: &str, code: &str, status: TestStatus, day: u32) -> RecordRequest {
        RecordRequest {
            session_id: session_id.to_string(),
            code: code.to_string(),
            status,
            started_at: at(day, 10),
            finished_at: at(day, 10) + chrono::Duration::milliseconds(1500),
            error_message: None,
            screenshot_path: None,
            notes: None,
        }
    }

    fn recorder(store: &Store) -> ResultRecorder<'_> {
        ResultRecorder::new(store, &RecordingConfig::default())
    }

    #[test]
    fn records_pass_and_creates_missing_case() {
        let fx = fixture();
        let session = SessionLedger::new(&fx.store).start(at(4, 9), None).unwrap();
        let receipt = recorder(&fx.store)
            .record(&request(&session.session_id, "TC-LOGIN-001", TestStatus::Passed, 4))
            .unwrap();
        assert!(receipt.created_test_case);
        assert_eq!(receipt.duration_ms, 1500);
        assert_eq!(receipt.bug_update, None);

        let case = TestCatalog::new(&fx.store).require("TC-LOGIN-001").unwrap();
        assert_eq!(case.name, "TC-LOGIN-001");
        assert_eq!(case.category, Category::Login);
        let counters = SessionLedger::new(&fx.store)
            .get(&session.session_id)
            .unwrap()
            .counters;
        assert_eq!((counters.total, counters.passed), (1, 1));
    }

    #[test]
    fn failure_with_message_opens_then_dedups_bug() {
        let fx = fixture();
        let session = SessionLedger::new(&fx.store).start(at(3, 9), None).unwrap();
        let rec = recorder(&fx.store);

        let mut failed = request(&session.session_id, "TC-PROJ-004", TestStatus::Failed, 3);
        failed.error_message = Some("x".repeat(250));
        let first = rec.record(&failed).unwrap();
        assert_eq!(first.bug_update, Some(BugUpdate::Opened));

        let second = rec.record(&failed).unwrap();
        assert_eq!(second.bug_update, Some(BugUpdate::AlreadySeenToday));

        let mut next_day = request(&session.session_id, "TC-PROJ-004", TestStatus::Failed, 4);
        next_day.error_message = Some("still broken".to_string());
        assert_eq!(rec.record(&next_day).unwrap().bug_update, Some(BugUpdate::Seen));

        let registry = KnownBugRegistry::new(&fx.store);
        let bugs = registry.list(None).unwrap();
        assert_eq!(bugs.len(), 1);
        assert_eq!(bugs[0].description.chars().count(), 100);
        assert_eq!(bugs[0].last_seen, NaiveDate::from_ymd_opt(2026, 2, 4).unwrap());
        assert_eq!(bugs[0].category, Some(Category::Projects));
    }

    #[test]
    fn non_failures_never_touch_registry() {
        let fx = fixture();
        let session = SessionLedger::new(&fx.store).start(at(4, 9), None).unwrap();
        let rec = recorder(&fx.store);
        for status in [TestStatus::Passed, TestStatus::Blocked, TestStatus::Skipped] {
            let mut req = request(&session.session_id, "TC-UI-001", status, 4);
            req.error_message = Some("something odd".to_string());
            assert_eq!(rec.record(&req).unwrap().bug_update, None);
        }
        // Failure without a message does not open a bug either.
        let req = request(&session.session_id, "TC-UI-001", TestStatus::Failed, 4);
        assert_eq!(rec.record(&req).unwrap().bug_update, None);
        assert!(KnownBugRegistry::new(&fx.store).list(None).unwrap().is_empty());
    }

    #[test]
    fn negative_duration_clamps_to_zero() {
        let fx = fixture();
        let session = SessionLedger::new(&fx.store).start(at(4, 9), None).unwrap();
        let mut req = request(&session.session_id, "TC-NAV-001", TestStatus::Passed, 4);
        req.finished_at = req.started_at - chrono::Duration::seconds(5);
        assert_eq!(recorder(&fx.store).record(&req).unwrap().duration_ms, 0);
    }

    #[test]
    fn unknown_or_closed_session_is_rejected_without_side_effects() {
        let fx = fixture();
        let rec = recorder(&fx.store);
        let err = rec
            .record(&request("run-404", "TC-NAV-001", TestStatus::Passed, 4))
            .unwrap_err();
        assert!(matches!(err, QatError::UnknownSession { .. }));

        let ledger = SessionLedger::new(&fx.store);
        let session = ledger.start(at(4, 9), None).unwrap();
        ledger.complete(&session.session_id, at(4, 11), None).unwrap();
        let mut failed = request(&session.session_id, "TC-NAV-001", TestStatus::Failed, 4);
        failed.error_message = Some("boom".to_string());
        let err = rec.record(&failed).unwrap_err();
        assert!(matches!(err, QatError::InvalidStateTransition { .. }));

        // Rolled back: no case, no bug.
        assert!(TestCatalog::new(&fx.store).get("TC-NAV-001").unwrap().is_none());
        assert!(KnownBugRegistry::new(&fx.store).list(None).unwrap().is_empty());
    }

    #[test]
    fn malformed_code_is_rejected() {
        let fx = fixture();
        let session = SessionLedger::new(&fx.store).start(at(4, 9), None).unwrap();
        let err = recorder(&fx.store)
            .record(&request(&session.session_id, "UNKNOWN", TestStatus::Passed, 4))
            .unwrap_err();
        assert_eq!(err.code(), "QAT-2001");
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("żółw", 2), "żó");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
