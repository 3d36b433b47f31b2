//! Session ledger: execution runs and the results recorded against them.
//!
//! Counters on a running session are bumped per result. Completing a session
//! recounts them from its result rows and freezes them.

#![allow(missing_docs)]

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::Store;
use crate::catalog::Category;
use crate::core::errors::{QatError, Result};

// ──────────────────── types ────────────────────

/// Outcome of one executed test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Blocked,
    Skipped,
}

impl TestStatus {
    pub const ALL: [Self; 4] = [Self::Passed, Self::Failed, Self::Blocked, Self::Skipped];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Skipped => "skipped",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "passed" | "pass" => Some(Self::Passed),
            "failed" | "fail" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            "skipped" | "skip" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-status result counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SessionCounters {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub blocked: u64,
    pub skipped: u64,
}

impl SessionCounters {
    /// Count of one status.
    #[must_use]
    pub const fn get(&self, status: TestStatus) -> u64 {
        match status {
            TestStatus::Passed => self.passed,
            TestStatus::Failed => self.failed,
            TestStatus::Blocked => self.blocked,
            TestStatus::Skipped => self.skipped,
        }
    }

    /// `passed / total`, or `None` when nothing was recorded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pass_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.passed as f64 / self.total as f64)
    }
}

/// One execution run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub session_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: SessionStatus,
    pub counters: SessionCounters,
    pub mode: Option<String>,
    pub notes: String,
}

/// A stored result joined with its test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultDetail {
    pub code: String,
    pub name: String,
    pub category: Category,
    pub status: TestStatus,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub screenshot_path: Option<String>,
    pub notes: Option<String>,
}

/// Values for one new `results` row.
#[derive(Debug, Clone)]
pub(crate) struct NewResult<'r> {
    pub status: TestStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error_message: Option<&'r str>,
    pub screenshot_path: Option<&'r str>,
    pub notes: Option<&'r str>,
}

// ──────────────────── ledger ────────────────────

/// Session operations over a borrowed [`Store`].
pub struct SessionLedger<'a> {
    store: &'a Store,
}

impl<'a> SessionLedger<'a> {
    #[must_use]
    pub const fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Open a running session with id `run-<unix-millis>` of `started_at`.
    pub fn start(&self, started_at: DateTime<Utc>, mode: Option<&str>) -> Result<Session> {
        self.store.write(|conn| {
            // Two starts within the same millisecond take the next free id.
            let mut millis = started_at.timestamp_millis();
            let session_id = loop {
                let candidate = format!("run-{millis}");
                if find_session_in(conn, &candidate)?.is_none() {
                    break candidate;
                }
                millis += 1;
            };
            conn.prepare_cached(
                "INSERT INTO sessions (session_id, started_at, status, mode)
                 VALUES (?1, ?2, 'running', ?3)",
            )?
            .execute(params![session_id, timestamp(started_at), mode])?;
            require_session_in(conn, &session_id).map(|(_, session)| session)
        })
    }

    pub fn find(&self, session_id: &str) -> Result<Option<Session>> {
        self.store
            .read(|conn| Ok(find_session_in(conn, session_id)?.map(|(_, session)| session)))
    }

    /// Session by id; a miss is `UnknownSession`.
    pub fn get(&self, session_id: &str) -> Result<Session> {
        self.store
            .read(|conn| require_session_in(conn, session_id).map(|(_, session)| session))
    }

    /// Finish a running session. Counters are recomputed from stored results.
    pub fn complete(
        &self,
        session_id: &str,
        finished_at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<Session> {
        self.store.write(|conn| {
            let (row_id, session) = require_session_in(conn, session_id)?;
            if session.status != SessionStatus::Running {
                return Err(QatError::transition("complete session", session.status));
            }
            conn.prepare_cached(
                "UPDATE sessions SET
                    status = 'completed',
                    finished_at = ?2,
                    notes = COALESCE(?3, notes),
                    total = (SELECT COUNT(*) FROM results WHERE session_id = ?1),
                    passed = (SELECT COUNT(*) FROM results WHERE session_id = ?1 AND status = 'passed'),
                    failed = (SELECT COUNT(*) FROM results WHERE session_id = ?1 AND status = 'failed'),
                    blocked = (SELECT COUNT(*) FROM results WHERE session_id = ?1 AND status = 'blocked'),
                    skipped = (SELECT COUNT(*) FROM results WHERE session_id = ?1 AND status = 'skipped')
                 WHERE id = ?1",
            )?
            .execute(params![row_id, timestamp(finished_at), notes])?;
            require_session_in(conn, session_id).map(|(_, session)| session)
        })
    }

    /// Most recent sessions first.
    pub fn list(&self, limit: u32) -> Result<Vec<Session>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, session_id, started_at, finished_at, status, total, passed,
                        failed, blocked, skipped, mode, notes
                 FROM sessions ORDER BY started_at DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], session_from_row)?
                .map(|row| row.map(|(_, session)| session))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Results of one session in recording order.
    pub fn results(&self, session_id: &str) -> Result<Vec<ResultDetail>> {
        self.store.read(|conn| {
            let (row_id, _) = require_session_in(conn, session_id)?;
            results_in(conn, row_id)
        })
    }
}

// ──────────────────── connection-level helpers ────────────────────

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn find_session_in(
    conn: &Connection,
    session_id: &str,
) -> Result<Option<(i64, Session)>> {
    let found = conn
        .prepare_cached(
            "SELECT id, session_id, started_at, finished_at, status, total, passed,
                    failed, blocked, skipped, mode, notes
             FROM sessions WHERE session_id = ?1",
        )?
        .query_row(params![session_id.trim()], session_from_row)
        .optional()?;
    Ok(found)
}

pub(crate) fn require_session_in(conn: &Connection, session_id: &str) -> Result<(i64, Session)> {
    find_session_in(conn, session_id)?.ok_or_else(|| QatError::UnknownSession {
        session_id: session_id.to_string(),
    })
}

/// Insert one result row and bump the session's running counters.
pub(crate) fn insert_result_in(
    conn: &Connection,
    session_row: i64,
    case_row: i64,
    result: &NewResult<'_>,
) -> Result<i64> {
    conn.prepare_cached(
        "INSERT INTO results (
            session_id, test_case_id, status, started_at, finished_at,
            duration_ms, error_message, screenshot_path, notes
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
    )?
    .execute(params![
        session_row,
        case_row,
        result.status.as_str(),
        timestamp(result.started_at),
        timestamp(result.finished_at),
        i64::try_from(result.duration_ms).unwrap_or(i64::MAX),
        result.error_message,
        result.screenshot_path,
        result.notes,
    ])?;
    let result_id = conn.last_insert_rowid();

    conn.prepare_cached(
        "UPDATE sessions SET
            total = total + 1,
            passed = passed + (?2 = 'passed'),
            failed = failed + (?2 = 'failed'),
            blocked = blocked + (?2 = 'blocked'),
            skipped = skipped + (?2 = 'skipped')
         WHERE id = ?1",
    )?
    .execute(params![session_row, result.status.as_str()])?;
    Ok(result_id)
}

pub(crate) fn results_in(conn: &Connection, session_row: i64) -> Result<Vec<ResultDetail>> {
    let mut stmt = conn.prepare_cached(
        "SELECT tc.code, tc.name, tc.category, r.status, r.started_at, r.finished_at,
                r.duration_ms, r.error_message, r.screenshot_path, r.notes
         FROM results r JOIN test_cases tc ON tc.id = r.test_case_id
         WHERE r.session_id = ?1
         ORDER BY r.id ASC",
    )?;
    let rows = stmt
        .query_map(params![session_row], |row| {
            let category: String = row.get(2)?;
            let status: String = row.get(3)?;
            let duration: i64 = row.get(6)?;
            Ok(ResultDetail {
                code: row.get(0)?,
                name: row.get(1)?,
                category: Category::parse(&category).unwrap_or(Category::Unknown),
                status: TestStatus::parse(&status).unwrap_or(TestStatus::Failed),
                started_at: row.get(4)?,
                finished_at: row.get(5)?,
                duration_ms: u64::try_from(duration).unwrap_or(0),
                error_message: row.get(7)?,
                screenshot_path: row.get(8)?,
                notes: row.get(9)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn count(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    Ok(u64::try_from(value).unwrap_or(0))
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, Session)> {
    let status: String = row.get(4)?;
    Ok((
        row.get(0)?,
        Session {
            session_id: row.get(1)?,
            started_at: row.get(2)?,
            finished_at: row.get(3)?,
            status: if status == "completed" {
                SessionStatus::Completed
            } else {
                SessionStatus::Running
            },
            counters: SessionCounters {
                total: count(row, 5)?,
                passed: count(row, 6)?,
                failed: count(row, 7)?,
                blocked: count(row, 8)?,
                skipped: count(row, 9)?,
            },
            mode: row.get(10)?,
            notes: row.get(11)?,
        },
    ))
}
