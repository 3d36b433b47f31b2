//! Stats query engine: read-only rollups across catalog, sessions, results and
//! known bugs.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::Serialize;

use super::Store;
use super::bugs::count_open_in;
use super::sessions::{ResultDetail, Session, SessionCounters, TestStatus, require_session_in, results_in};
use crate::catalog::Category;
use crate::core::errors::Result;

// ──────────────────── stat types ────────────────────

/// Totals across the whole database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalStats {
    pub test_case_count: u64,
    pub session_count: u64,
    pub total_results: u64,
    pub open_bug_count: u64,
    pub results_by_status: BTreeMap<TestStatus, u64>,
    pub pass_rate: Option<f64>,
}

/// One session with its results joined to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session: Session,
    pub results: Vec<ResultDetail>,
    pub pass_rate: Option<f64>,
}

/// Result counts for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryStat {
    pub category: Category,
    pub counters: SessionCounters,
}

// ──────────────────── stats engine ────────────────────

/// Read-only query engine over the tracker database.
pub struct StatsEngine<'a> {
    store: &'a Store,
}

impl<'a> StatsEngine<'a> {
    #[must_use]
    pub const fn new(store: &'a Store) -> Self {
        Self { store }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn global_stats(&self) -> Result<GlobalStats> {
        self.store.read(|conn| {
            let test_case_count = scalar(conn, "SELECT COUNT(*) FROM test_cases")?;
            let session_count = scalar(conn, "SELECT COUNT(*) FROM sessions")?;
            let open_bug_count = count_open_in(conn)?;

            // Every status is present, zero-filled.
            let mut results_by_status: BTreeMap<TestStatus, u64> =
                TestStatus::ALL.iter().map(|status| (*status, 0)).collect();
            let mut stmt =
                conn.prepare_cached("SELECT status, COUNT(*) FROM results GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                if let Some(status) = TestStatus::parse(&status) {
                    *results_by_status.entry(status).or_insert(0) += u64::try_from(count).unwrap_or(0);
                }
            }

            let total_results: u64 = results_by_status.values().sum();
            let passed = results_by_status
                .get(&TestStatus::Passed)
                .copied()
                .unwrap_or(0);
            let pass_rate = (total_results > 0).then(|| passed as f64 / total_results as f64);

            Ok(GlobalStats {
                test_case_count,
                session_count,
                total_results,
                open_bug_count,
                results_by_status,
                pass_rate,
            })
        })
    }

    /// Session row plus its ordered, catalog-joined results.
    pub fn session_summary(&self, session_id: &str) -> Result<SessionSummary> {
        self.store.read(|conn| {
            let (row_id, session) = require_session_in(conn, session_id)?;
            let results = results_in(conn, row_id)?;
            let pass_rate = session.counters.pass_rate();
            Ok(SessionSummary {
                session,
                results,
                pass_rate,
            })
        })
    }

    /// Result counts per category, in category order. Categories without
    /// results are omitted.
    pub fn category_breakdown(&self) -> Result<Vec<CategoryStat>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT tc.category, r.status, COUNT(*)
                 FROM results r JOIN test_cases tc ON tc.id = r.test_case_id
                 GROUP BY tc.category, r.status",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            let mut by_category: BTreeMap<Category, SessionCounters> = BTreeMap::new();
            for row in rows {
                let (category, status, count) = row?;
                let category = Category::parse(&category).unwrap_or(Category::Unknown);
                let count = u64::try_from(count).unwrap_or(0);
                let counters = by_category.entry(category).or_default();
                counters.total += count;
                match TestStatus::parse(&status) {
                    Some(TestStatus::Passed) => counters.passed += count,
                    Some(TestStatus::Failed) => counters.failed += count,
                    Some(TestStatus::Blocked) => counters.blocked += count,
                    Some(TestStatus::Skipped) => counters.skipped += count,
                    None => {}
                }
            }

            Ok(by_category
                .into_iter()
                .map(|(category, counters)| CategoryStat { category, counters })
                .collect())
        })
    }

    /// Export global stats and the category breakdown as JSON for agent consumption.
    pub fn export_json(&self) -> Result<serde_json::Value> {
        let global = self.global_stats()?;
        let categories: Vec<serde_json::Value> = self
            .category_breakdown()?
            .iter()
            .map(|stat| {
                serde_json::json!({
                    "category": stat.category.as_str(),
                    "label": stat.category.label(),
                    "total": stat.counters.total,
                    "passed": stat.counters.passed,
                    "failed": stat.counters.failed,
                    "blocked": stat.counters.blocked,
                    "skipped": stat.counters.skipped,
                    "pass_rate": stat.counters.pass_rate(),
                })
            })
            .collect();

        Ok(serde_json::json!({
            "test_cases": global.test_case_count,
            "sessions": global.session_count,
            "results": {
                "total": global.total_results,
                "by_status": global.results_by_status,
                "pass_rate": global.pass_rate,
            },
            "open_bugs": global.open_bug_count,
            "categories": categories,
        }))
    }
}

fn scalar(conn: &Connection, sql: &str) -> Result<u64> {
    let value: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(u64::try_from(value).unwrap_or(0))
}
