//! QAT-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, QatError>;

/// Top-level error type for the test-session tracker.
#[derive(Debug, Error)]
pub enum QatError {
    #[error("[QAT-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[QAT-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[QAT-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[QAT-2001] invalid test code {code:?}: expected TC-<SEGMENT>-<NNN>")]
    InvalidTestCode { code: String },

    #[error("[QAT-2002] invalid test case {code}: {details}")]
    InvalidTestCase { code: String, details: String },

    #[error("[QAT-2003] test case {code} already exists in the catalog")]
    DuplicateCode { code: String },

    #[error("[QAT-2004] unknown test case: {code}")]
    UnknownTestCase { code: String },

    #[error("[QAT-2005] unknown session: {session_id}")]
    UnknownSession { session_id: String },

    #[error("[QAT-2006] no open known bug for {code}")]
    UnknownBug { code: String },

    #[error("[QAT-2101] invalid state transition: cannot {operation} while {state}")]
    InvalidStateTransition {
        operation: &'static str,
        state: String,
    },

    #[error("[QAT-2102] invalid value for {field}: {details}")]
    InvalidValue {
        field: &'static str,
        details: String,
    },

    #[error("[QAT-3001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[QAT-3002] persistence failure in {context}: {details}")]
    Persistence {
        context: &'static str,
        details: String,
    },

    #[error("[QAT-3003] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[QAT-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl QatError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "QAT-1001",
            Self::MissingConfig { .. } => "QAT-1002",
            Self::ConfigParse { .. } => "QAT-1003",
            Self::InvalidTestCode { .. } => "QAT-2001",
            Self::InvalidTestCase { .. } => "QAT-2002",
            Self::DuplicateCode { .. } => "QAT-2003",
            Self::UnknownTestCase { .. } => "QAT-2004",
            Self::UnknownSession { .. } => "QAT-2005",
            Self::UnknownBug { .. } => "QAT-2006",
            Self::InvalidStateTransition { .. } => "QAT-2101",
            Self::InvalidValue { .. } => "QAT-2102",
            Self::Serialization { .. } => "QAT-3001",
            Self::Persistence { .. } => "QAT-3002",
            Self::Io { .. } => "QAT-3003",
            Self::Runtime { .. } => "QAT-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Persistence { .. } | Self::Runtime { .. }
        )
    }

    /// Whether the result is a "not found" answer rather than a failure.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UnknownTestCase { .. } | Self::UnknownSession { .. } | Self::UnknownBug { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn transition(operation: &'static str, state: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            operation,
            state: state.to_string(),
        }
    }
}

impl From<rusqlite::Error> for QatError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Persistence {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for QatError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for QatError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<QatError> {
        vec![
            QatError::InvalidConfig {
                details: String::new(),
            },
            QatError::MissingConfig {
                path: PathBuf::new(),
            },
            QatError::ConfigParse {
                context: "",
                details: String::new(),
            },
            QatError::InvalidTestCode {
                code: String::new(),
            },
            QatError::InvalidTestCase {
                code: String::new(),
                details: String::new(),
            },
            QatError::DuplicateCode {
                code: String::new(),
            },
            QatError::UnknownTestCase {
                code: String::new(),
            },
            QatError::UnknownSession {
                session_id: String::new(),
            },
            QatError::UnknownBug {
                code: String::new(),
            },
            QatError::transition("mark completed", "idle"),
            QatError::InvalidValue {
                field: "",
                details: String::new(),
            },
            QatError::Serialization {
                context: "",
                details: String::new(),
            },
            QatError::Persistence {
                context: "",
                details: String::new(),
            },
            QatError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            QatError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(QatError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_display_includes_code() {
        for err in all_variants() {
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain error code: {msg}"
            );
        }
    }

    #[test]
    fn transition_error_names_operation_and_state() {
        let err = QatError::transition("mark completed", "idle");
        let msg = err.to_string();
        assert!(msg.contains("mark completed"));
        assert!(msg.contains("idle"));
    }

    #[test]
    fn retryable_and_not_found_partition() {
        assert!(
            QatError::Persistence {
                context: "",
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            !QatError::DuplicateCode {
                code: "TC-LOGIN-001".to_string()
            }
            .is_retryable()
        );
        assert!(
            QatError::UnknownSession {
                session_id: "run-1".to_string()
            }
            .is_not_found()
        );
        assert!(!QatError::transition("finish", "idle").is_not_found());
    }

    #[test]
    fn from_rusqlite_error_is_persistence_failure() {
        let sql_err =
            rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(1), Some("test".to_string()));
        let err: QatError = sql_err.into();
        assert_eq!(err.code(), "QAT-3002");
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: QatError = json_err.into();
        assert_eq!(err.code(), "QAT-3001");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: QatError = toml_err.into();
        assert_eq!(err.code(), "QAT-1003");
    }
}
