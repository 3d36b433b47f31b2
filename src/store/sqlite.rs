//! SQLite store: one WAL-mode connection holding catalog, sessions, results,
//! known bugs, and operator settings.
//!
//! Every mutation runs inside an immediate transaction and commits with
//! `synchronous = FULL`, so a returned `Ok` means the write is on disk.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;

use crate::catalog::Category;
use crate::core::errors::{QatError, Result};

/// Handle over the tracker database.
///
/// The connection sits behind a mutex: all reads and writes are serialized.
pub struct Store {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Store {
    /// Open (or create) the database at `path`, applying schema, PRAGMAs and
    /// default settings.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| QatError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        register_functions(&conn)?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;
        seed_settings(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a read-only closure against the connection.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside one immediate transaction; any error rolls everything back.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ──────────────────── settings ────────────────────

    /// All settings rows, ordered by key.
    pub fn settings(&self) -> Result<Vec<SettingRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT key, value, description FROM settings ORDER BY key ASC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(SettingRow {
                        key: row.get(0)?,
                        value: row.get(1)?,
                        description: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        self.read(|conn| {
            let value = conn
                .prepare_cached("SELECT value FROM settings WHERE key = ?1")?
                .query_row(params![key], |row| row.get(0))
                .optional()?;
            Ok(value)
        })
    }

    /// Set a known setting. Values are validated against the typed model first.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let def = SETTING_DEFAULTS
            .iter()
            .find(|def| def.key == key)
            .ok_or_else(|| QatError::InvalidValue {
                field: "settings.key",
                details: format!("unknown setting {key:?}"),
            })?;
        (def.check)(value)?;
        self.write(|conn| {
            conn.prepare_cached(
                "INSERT INTO settings (key, value, description) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?
            .execute(params![key, value.trim(), def.description])?;
            Ok(())
        })
    }

    /// Typed view of the settings table; unparsable rows fall back to defaults.
    pub fn app_settings(&self) -> Result<AppSettings> {
        let mut settings = AppSettings::default();
        for row in self.settings()? {
            settings.apply(&row.key, &row.value);
        }
        Ok(settings)
    }

    // ──────────────────── diagnostics ────────────────────

    /// Check that WAL mode is active (for diagnostics).
    pub fn is_wal_mode(&self) -> bool {
        self.read(|conn| {
            let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
            Ok(mode.eq_ignore_ascii_case("wal"))
        })
        .unwrap_or(false)
    }

    /// Checkpoint the WAL and release the connection.
    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        conn.close().map_err(|(_, error)| QatError::from(error))
    }
}

// ──────────────────── settings model ────────────────────

/// One row of the `settings` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
}

/// Operator settings handed to the automation driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppSettings {
    pub app_url: String,
    pub max_tests_per_session: u32,
    pub screenshot_on_failure: bool,
    pub timeout_ms: u64,
    pub retry_failed: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            app_url: "https://universe.mapmaker.pl".to_string(),
            max_tests_per_session: 20,
            screenshot_on_failure: true,
            timeout_ms: 30_000,
            retry_failed: false,
        }
    }
}

impl AppSettings {
    fn apply(&mut self, key: &str, value: &str) {
        let value = value.trim();
        match key {
            "app_url" => self.app_url = value.to_string(),
            "max_tests_per_session" => {
                if let Ok(parsed) = value.parse() {
                    self.max_tests_per_session = parsed;
                }
            }
            "screenshot_on_failure" => {
                if let Some(parsed) = parse_flag(value) {
                    self.screenshot_on_failure = parsed;
                }
            }
            "timeout_ms" => {
                if let Ok(parsed) = value.parse() {
                    self.timeout_ms = parsed;
                }
            }
            "retry_failed" => {
                if let Some(parsed) = parse_flag(value) {
                    self.retry_failed = parsed;
                }
            }
            _ => {}
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

struct SettingSpec {
    key: &'static str,
    default: &'static str,
    description: &'static str,
    check: fn(&str) -> Result<()>,
}

const SETTING_DEFAULTS: &[SettingSpec] = &[
    SettingSpec {
        key: "app_url",
        default: "https://universe.mapmaker.pl",
        description: "Base URL of the application under test",
        check: check_url,
    },
    SettingSpec {
        key: "max_tests_per_session",
        default: "20",
        description: "Upper bound of tests executed in one session",
        check: check_count,
    },
    SettingSpec {
        key: "screenshot_on_failure",
        default: "true",
        description: "Capture a screenshot when a test fails",
        check: check_flag,
    },
    SettingSpec {
        key: "timeout_ms",
        default: "30000",
        description: "Per-action timeout for the automation driver",
        check: check_count,
    },
    SettingSpec {
        key: "retry_failed",
        default: "false",
        description: "Re-run failed tests once before recording",
        check: check_flag,
    },
];

fn check_url(value: &str) -> Result<()> {
    let value = value.trim();
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(QatError::InvalidValue {
            field: "app_url",
            details: format!("{value:?} is not an http(s) URL"),
        })
    }
}

fn check_count(value: &str) -> Result<()> {
    match value.trim().parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(()),
        _ => Err(QatError::InvalidValue {
            field: "settings.value",
            details: format!("{value:?} must be a positive integer"),
        }),
    }
}

fn check_flag(value: &str) -> Result<()> {
    parse_flag(value.trim())
        .map(|_| ())
        .ok_or_else(|| QatError::InvalidValue {
            field: "settings.value",
            details: format!("{value:?} must be true or false"),
        })
}

// ──────────────────── schema & pragmas ────────────────────

fn register_functions(conn: &Connection) -> Result<()> {
    // Catalog ordering follows the category enum, not the stored names.
    conn.create_scalar_function(
        "category_rank",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let name: String = ctx.get(0)?;
            let rank = Category::parse(&name).unwrap_or(Category::Unknown).rank();
            Ok(i64::from(rank))
        },
    )?;
    Ok(())
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;
         PRAGMA foreign_keys = ON;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[QAT-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS test_cases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            priority TEXT NOT NULL DEFAULT 'P2',
            description TEXT NOT NULL DEFAULT '',
            preconditions TEXT NOT NULL DEFAULT '',
            steps TEXT NOT NULL DEFAULT '[]',
            expected_result TEXT NOT NULL DEFAULT '',
            external_ref TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL UNIQUE,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL DEFAULT 'running',
            total INTEGER NOT NULL DEFAULT 0,
            passed INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            blocked INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            mode TEXT,
            notes TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL REFERENCES sessions(id),
            test_case_id INTEGER NOT NULL REFERENCES test_cases(id),
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            screenshot_path TEXT,
            notes TEXT
        );

        CREATE TABLE IF NOT EXISTS known_bugs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            test_case_code TEXT NOT NULL,
            description TEXT NOT NULL,
            severity TEXT NOT NULL DEFAULT 'medium',
            status TEXT NOT NULL DEFAULT 'open',
            category TEXT,
            external_ref TEXT,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            occurrences INTEGER NOT NULL DEFAULT 1,
            resolved_at TEXT
        );

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            description TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_test_cases_category ON test_cases(category);
        CREATE INDEX IF NOT EXISTS idx_results_session ON results(session_id);
        CREATE INDEX IF NOT EXISTS idx_results_test_case ON results(test_case_id);
        CREATE INDEX IF NOT EXISTS idx_known_bugs_code ON known_bugs(test_case_code);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_known_bugs_one_open
            ON known_bugs(test_case_code) WHERE status = 'open';",
    )?;
    Ok(())
}

fn seed_settings(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO settings (key, value, description) VALUES (?1, ?2, ?3)",
    )?;
    for def in SETTING_DEFAULTS {
        stmt.execute(params![def.key, def.default, def.description])?;
    }
    Ok(())
}

// ──────────────────── tests ────────────────────
