//! Known-bug registry: durable record of diagnosed failures per test code.
//!
//! At most one bug per code is open at a time (a partial unique index backs
//! this). A repeated failure bumps `last_seen` on the open bug instead of
//! inserting a second row; `occurrences` counts distinct days seen.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Days, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::Store;
use crate::catalog::{Category, TestCode};
use crate::core::errors::{QatError, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

const BUG_COLUMNS: &str = "id, test_case_code, description, severity, status, category,
     external_ref, first_seen, last_seen, occurrences, resolved_at";

// ──────────────────── types ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BugSeverity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl BugSeverity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for BugSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BugStatus {
    Open,
    Closed,
}

impl BugStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for BugStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `known_bugs` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnownBug {
    pub id: i64,
    pub test_case_code: String,
    pub description: String,
    pub severity: BugSeverity,
    pub status: BugStatus,
    pub category: Option<Category>,
    pub external_ref: Option<String>,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
    pub occurrences: u32,
    pub resolved_at: Option<String>,
}

/// Metadata attached to a newly observed failure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BugReport {
    pub category: Option<Category>,
    pub description: String,
    pub severity: BugSeverity,
    pub external_ref: Option<String>,
}

/// What [`KnownBugRegistry::record_occurrence`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BugUpdate {
    /// No open bug existed; a new one was inserted.
    Opened,
    /// The open bug's `last_seen` moved to today.
    Seen,
    /// The open bug was already stamped on this day; nothing changed.
    AlreadySeenToday,
    /// The failure predates the open bug's `last_seen` (a late result);
    /// nothing changed.
    Stale,
}

/// Code → `last_seen` for every open bug; the scheduling input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KnownBugIndex {
    entries: BTreeMap<String, NaiveDate>,
}

impl KnownBugIndex {
    #[must_use]
    pub fn get(&self, code: &str) -> Option<NaiveDate> {
        self.entries.get(code).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, NaiveDate)> for KnownBugIndex {
    fn from_iter<I: IntoIterator<Item = (String, NaiveDate)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// ──────────────────── registry ────────────────────

/// Known-bug operations over a borrowed [`Store`].
pub struct KnownBugRegistry<'a> {
    store: &'a Store,
}

impl<'a> KnownBugRegistry<'a> {
    #[must_use]
    pub const fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// The open bug for `code`, else the most recently closed one.
    pub fn lookup(&self, code: &str) -> Result<Option<KnownBug>> {
        self.store.read(|conn| {
            let sql = format!(
                "SELECT {BUG_COLUMNS} FROM known_bugs WHERE test_case_code = ?1
                 ORDER BY (status = 'open') DESC, COALESCE(resolved_at, '') DESC, id DESC
                 LIMIT 1"
            );
            let bug = conn
                .prepare_cached(&sql)?
                .query_row(params![code.trim()], bug_from_row)
                .optional()?;
            Ok(bug)
        })
    }

    /// Codes of open bugs seen within `max_age_days` of `today`.
    pub fn list_recent(&self, today: NaiveDate, max_age_days: u32) -> Result<BTreeSet<String>> {
        let cutoff = today
            .checked_sub_days(Days::new(u64::from(max_age_days)))
            .unwrap_or(NaiveDate::MIN);
        self.store.read(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT test_case_code FROM known_bugs
                 WHERE status = 'open' AND last_seen >= ?1",
            )?;
            let codes = stmt
                .query_map(params![format_date(cutoff)], |row| row.get(0))?
                .collect::<std::result::Result<BTreeSet<String>, _>>()?;
            Ok(codes)
        })
    }

    /// Codes of open bugs in one category.
    pub fn list_by_category(&self, category: Category) -> Result<BTreeSet<String>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT test_case_code FROM known_bugs
                 WHERE status = 'open' AND category = ?1",
            )?;
            let codes = stmt
                .query_map(params![category.as_str()], |row| row.get(0))?
                .collect::<std::result::Result<BTreeSet<String>, _>>()?;
            Ok(codes)
        })
    }

    /// Record a failure of `code` observed on `today`.
    pub fn record_occurrence(
        &self,
        code: &TestCode,
        report: &BugReport,
        today: NaiveDate,
    ) -> Result<BugUpdate> {
        self.store
            .write(|conn| record_occurrence_in(conn, code.as_str(), report, today))
    }

    /// Close the open bug for `code`, stamping `resolved_at`.
    pub fn close(&self, code: &str, at: DateTime<Utc>) -> Result<KnownBug> {
        self.store.write(|conn| {
            let Some(open) = find_open(conn, code.trim())? else {
                return Err(QatError::UnknownBug {
                    code: code.to_string(),
                });
            };
            let resolved_at = at.to_rfc3339_opts(SecondsFormat::Millis, true);
            conn.prepare_cached(
                "UPDATE known_bugs SET status = 'closed', resolved_at = ?1 WHERE id = ?2",
            )?
            .execute(params![resolved_at, open.id])?;
            Ok(KnownBug {
                status: BugStatus::Closed,
                resolved_at: Some(resolved_at),
                ..open
            })
        })
    }

    /// Snapshot of open bugs for scheduling.
    pub fn snapshot(&self) -> Result<KnownBugIndex> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT test_case_code, last_seen FROM known_bugs WHERE status = 'open'",
            )?;
            let index = stmt
                .query_map([], |row| {
                    let code: String = row.get(0)?;
                    let last_seen: String = row.get(1)?;
                    Ok((code, parse_date(1, &last_seen)?))
                })?
                .collect::<std::result::Result<KnownBugIndex, _>>()?;
            Ok(index)
        })
    }

    /// All bugs, optionally filtered by status, most recently seen first.
    pub fn list(&self, status: Option<BugStatus>) -> Result<Vec<KnownBug>> {
        self.store.read(|conn| {
            let sql = format!(
                "SELECT {BUG_COLUMNS} FROM known_bugs
                 WHERE ?1 IS NULL OR status = ?1
                 ORDER BY last_seen DESC, test_case_code ASC, id DESC"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let bugs = stmt
                .query_map(params![status.map(BugStatus::as_str)], bug_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(bugs)
        })
    }

    pub fn count_open(&self) -> Result<u64> {
        self.store.read(count_open_in)
    }
}

// ──────────────────── connection-level helpers ────────────────────

/// Dedup-or-insert for one failure; shared with the result recorder so both
/// run inside the caller's transaction.
pub(crate) fn record_occurrence_in(
    conn: &Connection,
    code: &str,
    report: &BugReport,
    today: NaiveDate,
) -> Result<BugUpdate> {
    if let Some(open) = find_open(conn, code)? {
        if open.last_seen == today {
            return Ok(BugUpdate::AlreadySeenToday);
        }
        if open.last_seen > today {
            return Ok(BugUpdate::Stale);
        }
        conn.prepare_cached(
            "UPDATE known_bugs SET last_seen = ?1, occurrences = occurrences + 1 WHERE id = ?2",
        )?
        .execute(params![format_date(today), open.id])?;
        return Ok(BugUpdate::Seen);
    }

    let day = format_date(today);
    conn.prepare_cached(
        "INSERT INTO known_bugs (
            test_case_code, description, severity, status, category,
            external_ref, first_seen, last_seen, occurrences
        ) VALUES (?1, ?2, ?3, 'open', ?4, ?5, ?6, ?6, 1)",
    )?
    .execute(params![
        code,
        report.description,
        report.severity.as_str(),
        report.category.map(Category::as_str),
        report.external_ref,
        day,
    ])?;
    Ok(BugUpdate::Opened)
}

pub(crate) fn count_open_in(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM known_bugs WHERE status = 'open'",
        [],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(count).unwrap_or(0))
}

fn find_open(conn: &Connection, code: &str) -> Result<Option<KnownBug>> {
    let sql = format!(
        "SELECT {BUG_COLUMNS} FROM known_bugs WHERE test_case_code = ?1 AND status = 'open'"
    );
    let bug = conn
        .prepare_cached(&sql)?
        .query_row(params![code], bug_from_row)
        .optional()?;
    Ok(bug)
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error)))
}

fn bug_from_row(row: &Row<'_>) -> rusqlite::Result<KnownBug> {
    let severity: String = row.get(3)?;
    let status: String = row.get(4)?;
    let category: Option<String> = row.get(5)?;
    let first_seen: String = row.get(7)?;
    let last_seen: String = row.get(8)?;
    let occurrences: i64 = row.get(9)?;
    Ok(KnownBug {
        id: row.get(0)?,
        test_case_code: row.get(1)?,
        description: row.get(2)?,
        severity: BugSeverity::parse(&severity).unwrap_or_default(),
        status: BugStatus::parse(&status).unwrap_or(BugStatus::Open),
        category: category.as_deref().and_then(Category::parse),
        external_ref: row.get(6)?,
        first_seen: parse_date(7, &first_seen)?,
        last_seen: parse_date(8, &last_seen)?,
        occurrences: u32::try_from(occurrences).unwrap_or(u32::MAX),
        resolved_at: row.get(10)?,
    })
}
