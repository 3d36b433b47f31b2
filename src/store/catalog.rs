//! Test catalog persistence: durable test-case definitions keyed by code.

#![allow(missing_docs)]

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use super::{Store, timestamp_now};
use crate::catalog::intake::{ImportTask, TaskParser};
use crate::catalog::{Category, Priority, TestCase, TestCode};
use crate::core::errors::{QatError, Result};

const CASE_COLUMNS: &str = "id, code, name, category, priority, description, preconditions,
     steps, expected_result, external_ref";

/// Catalog operations over a borrowed [`Store`].
pub struct TestCatalog<'a> {
    store: &'a Store,
}

/// Outcome of a bulk task import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub added: Vec<String>,
    pub skipped: Vec<String>,
    /// `(task title, reason)` for tasks that could not be turned into a case.
    pub rejected: Vec<(String, String)>,
}

impl<'a> TestCatalog<'a> {
    #[must_use]
    pub const fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Add a new case. Existing codes fail with `DuplicateCode`.
    pub fn add(&self, case: &TestCase) -> Result<()> {
        self.store.write(|conn| insert_case(conn, case).map(|_| ()))
    }

    pub fn get(&self, code: &str) -> Result<Option<TestCase>> {
        self.store
            .read(|conn| Ok(find_case(conn, code)?.map(|(_, case)| case)))
    }

    /// Like [`TestCatalog::get`] but a miss is an `UnknownTestCase` error.
    pub fn require(&self, code: &str) -> Result<TestCase> {
        self.get(code)?.ok_or_else(|| QatError::UnknownTestCase {
            code: code.to_string(),
        })
    }

    /// Existing case for `code`, or a freshly stored placeholder.
    pub fn get_or_create(&self, code: &TestCode) -> Result<TestCase> {
        self.store.write(|conn| {
            let id = get_or_create_in(conn, code)?;
            load_by_id(conn, id)
        })
    }

    pub fn list_by_category(&self, category: Category) -> Result<Vec<TestCase>> {
        self.store.read(|conn| {
            let sql = format!(
                "SELECT {CASE_COLUMNS} FROM test_cases WHERE category = ?1
                 ORDER BY priority ASC, code ASC"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(params![category.as_str()], case_from_row)?
                .map(|row| row.map(|(_, case)| case))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Whole catalog ordered by category enum order, then priority, then code.
    pub fn list_all(&self) -> Result<Vec<TestCase>> {
        self.store.read(|conn| {
            let sql = format!(
                "SELECT {CASE_COLUMNS} FROM test_cases
                 ORDER BY category_rank(category) ASC, priority ASC, code ASC"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map([], case_from_row)?
                .map(|row| row.map(|(_, case)| case))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count(&self) -> Result<u64> {
        self.store.read(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM test_cases", [], |row| row.get(0))?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
    }

    /// Import exported tasks in one transaction. Known codes are skipped and
    /// unparsable titles are reported, neither aborts the import.
    pub fn import(&self, tasks: &[ImportTask], parser: &TaskParser) -> Result<ImportSummary> {
        self.store.write(|conn| {
            let mut summary = ImportSummary::default();
            for task in tasks {
                let parsed = match parser.parse(task) {
                    Ok(parsed) => parsed,
                    Err(error) => {
                        summary.rejected.push((task.name.clone(), error.to_string()));
                        continue;
                    }
                };
                let code = parsed.code.to_string();
                if find_case(conn, &code)?.is_some() {
                    summary.skipped.push(code);
                    continue;
                }
                insert_case(conn, &parsed.into_test_case())?;
                summary.added.push(code);
            }
            Ok(summary)
        })
    }
}

// ──────────────────── connection-level helpers ────────────────────

/// Insert a validated case and return its row id.
pub(crate) fn insert_case(conn: &Connection, case: &TestCase) -> Result<i64> {
    case.validate()?;
    if find_case(conn, case.code.as_str())?.is_some() {
        return Err(QatError::DuplicateCode {
            code: case.code.to_string(),
        });
    }
    let steps = serde_json::to_string(&case.steps)?;
    conn.prepare_cached(
        "INSERT INTO test_cases (
            code, name, category, priority, description, preconditions,
            steps, expected_result, external_ref, created_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
    )?
    .execute(params![
        case.code.as_str(),
        case.name,
        case.category.as_str(),
        case.priority.as_str(),
        case.description,
        case.preconditions,
        steps,
        case.expected_result,
        case.external_ref,
        timestamp_now(),
    ])?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn find_case(conn: &Connection, code: &str) -> Result<Option<(i64, TestCase)>> {
    let sql = format!("SELECT {CASE_COLUMNS} FROM test_cases WHERE code = ?1");
    let found = conn
        .prepare_cached(&sql)?
        .query_row(params![code.trim()], case_from_row)
        .optional()?;
    Ok(found)
}

/// Row id for `code`, inserting a placeholder case when it is not catalogued.
pub(crate) fn get_or_create_in(conn: &Connection, code: &TestCode) -> Result<i64> {
    if let Some((id, _)) = find_case(conn, code.as_str())? {
        return Ok(id);
    }
    insert_case(conn, &TestCase::placeholder(code))
}

fn load_by_id(conn: &Connection, id: i64) -> Result<TestCase> {
    let sql = format!("SELECT {CASE_COLUMNS} FROM test_cases WHERE id = ?1");
    let (_, case) = conn
        .prepare_cached(&sql)?
        .query_row(params![id], case_from_row)?;
    Ok(case)
}

fn case_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, TestCase)> {
    let raw_code: String = row.get(1)?;
    let code = TestCode::parse(&raw_code)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(error)))?;
    let category: String = row.get(3)?;
    let priority: String = row.get(4)?;
    let steps_json: String = row.get(7)?;
    let steps: Vec<String> = serde_json::from_str(&steps_json)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(error)))?;
    Ok((
        row.get(0)?,
        TestCase {
            code,
            name: row.get(2)?,
            category: Category::parse(&category).unwrap_or(Category::Unknown),
            priority: Priority::parse(&priority).unwrap_or_default(),
            description: row.get(5)?,
            preconditions: row.get(6)?,
            steps,
            expected_result: row.get(8)?,
            external_ref: row.get(9)?,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("catalog.sqlite3")).unwrap();
        (dir, store)
    }

    fn case(code: &str, name: &str, priority: Priority) -> TestCase {
        let mut case = TestCase::new(TestCode::parse(code).unwrap(), name);
        case.priority = priority;
        case
    }

    #[test]
    fn add_and_get_round_trip() {
        let (_dir, store) = temp_store();
        let catalog = TestCatalog::new(&store);
        let mut login = case("TC-LOGIN-001", "Valid login", Priority::P1);
        login.steps = vec!["Open page".to_string(), "Submit form".to_string()];
        login.expected_result = "Dashboard visible".to_string();
        login.external_ref = Some("1212837504116076".to_string());
        catalog.add(&login).unwrap();

        let loaded = catalog.get("TC-LOGIN-001").unwrap().unwrap();
        assert_eq!(loaded, login);
        assert!(catalog.get("TC-LOGIN-999").unwrap().is_none());
    }

    #[test]
    fn duplicate_code_rejected() {
        let (_dir, store) = temp_store();
        let catalog = TestCatalog::new(&store);
        catalog.add(&case("TC-PROJ-001", "Create", Priority::P2)).unwrap();
        let err = catalog
            .add(&case("TC-PROJ-001", "Create again", Priority::P0))
            .unwrap_err();
        assert!(matches!(err, QatError::DuplicateCode { .. }));
        assert_eq!(catalog.count().unwrap(), 1);
    }

    #[test]
    fn mismatched_category_rejected() {
        let (_dir, store) = temp_store();
        let catalog = TestCatalog::new(&store);
        let mut bad = case("TC-PROJ-001", "Create", Priority::P2);
        bad.category = Category::Login;
        let err = catalog.add(&bad).unwrap_err();
        assert_eq!(err.code(), "QAT-2002");
    }

    #[test]
    fn require_reports_unknown_case() {
        let (_dir, store) = temp_store();
        let err = TestCatalog::new(&store).require("TC-NAV-001").unwrap_err();
        assert!(matches!(err, QatError::UnknownTestCase { .. }));
    }

    #[test]
    fn get_or_create_inserts_placeholder_once() {
        let (_dir, store) = temp_store();
        let catalog = TestCatalog::new(&store);
        let code = TestCode::parse("TC-IMPORT-009").unwrap();
        let created = catalog.get_or_create(&code).unwrap();
        assert_eq!(created.name, "TC-IMPORT-009");
        assert_eq!(created.category, Category::LayerImport);

        let again = catalog.get_or_create(&code).unwrap();
        assert_eq!(again, created);
        assert_eq!(catalog.count().unwrap(), 1);
    }

    #[test]
    fn list_all_orders_by_category_then_priority_then_code() {
        let (_dir, store) = temp_store();
        let catalog = TestCatalog::new(&store);
        for (code, priority) in [
            ("TC-BUG-001", Priority::P0),
            ("TC-PROJ-002", Priority::P2),
            ("TC-LOGIN-002", Priority::P3),
            ("TC-PROJ-001", Priority::P2),
            ("TC-LOGIN-003", Priority::P0),
            ("TC-ZZZ-001", Priority::P0),
            ("TC-PROJ-003", Priority::P1),
        ] {
            catalog.add(&case(code, "case", priority)).unwrap();
        }

        let codes: Vec<String> = catalog
            .list_all()
            .unwrap()
            .into_iter()
            .map(|case| case.code.to_string())
            .collect();
        assert_eq!(
            codes,
            vec![
                "TC-LOGIN-003",
                "TC-LOGIN-002",
                "TC-PROJ-003",
                "TC-PROJ-001",
                "TC-PROJ-002",
                "TC-BUG-001",
                "TC-ZZZ-001",
            ]
        );
    }

    #[test]
    fn list_by_category_filters() {
        let (_dir, store) = temp_store();
        let catalog = TestCatalog::new(&store);
        catalog.add(&case("TC-NAV-001", "Pan", Priority::P2)).unwrap();
        catalog.add(&case("TC-NAV-002", "Zoom", Priority::P1)).unwrap();
        catalog.add(&case("TC-TOOL-001", "Measure", Priority::P2)).unwrap();

        let nav = catalog.list_by_category(Category::MapNavigation).unwrap();
        assert_eq!(nav.len(), 2);
        assert_eq!(nav[0].code.as_str(), "TC-NAV-002");
        assert!(catalog.list_by_category(Category::Login).unwrap().is_empty());
    }

    #[test]
    fn import_adds_new_skips_known_and_reports_rejects() {
        let (_dir, store) = temp_store();
        let catalog = TestCatalog::new(&store);
        catalog.add(&case("TC-UI-001", "Menu", Priority::P2)).unwrap();

        let tasks = vec![
            ImportTask {
                name: "[P1] TC-UI-001: Menu".to_string(),
                ..ImportTask::default()
            },
            ImportTask {
                name: "[P0] TC-UI-002: Toolbar".to_string(),
                notes: "## Steps\n1. Hover toolbar".to_string(),
                gid: Some("77".to_string()),
            },
            ImportTask {
                name: "Write the release notes".to_string(),
                ..ImportTask::default()
            },
        ];
        let summary = catalog
            .import(&tasks, &TaskParser::new().unwrap())
            .unwrap();
        assert_eq!(summary.added, vec!["TC-UI-002"]);
        assert_eq!(summary.skipped, vec!["TC-UI-001"]);
        assert_eq!(summary.rejected.len(), 1);

        let toolbar = catalog.require("TC-UI-002").unwrap();
        assert_eq!(toolbar.priority, Priority::P0);
        assert_eq!(toolbar.steps, vec!["Hover toolbar"]);
        assert_eq!(toolbar.external_ref.as_deref(), Some("77"));
    }
}
