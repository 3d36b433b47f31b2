//! Candidate queue as written by the fetch step: `{"tests": [...]}`.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::catalog::Category;
use crate::core::errors::{QatError, Result};

/// One test waiting to be executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// External task identifier, unique within a queue.
    pub identifier: String,
    pub code: String,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Candidate {
    /// Candidate with the category derived from `code`.
    #[must_use]
    pub fn new(identifier: impl Into<String>, code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            identifier: identifier.into(),
            category: Category::from_code(&code),
            code,
            name: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueueEntry {
    #[serde(alias = "identifier")]
    gid: String,
    code: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    completed: bool,
}

#[derive(Debug, Deserialize)]
struct QueueFile {
    #[serde(default)]
    tests: Vec<QueueEntry>,
}

/// Parse queue JSON. Entries already marked `completed` are dropped; the
/// category always comes from the code, never from the exported label.
pub fn parse_queue(raw: &str) -> Result<Vec<Candidate>> {
    let file: QueueFile = serde_json::from_str(raw)?;
    let mut seen = std::collections::HashSet::new();
    let mut candidates = Vec::with_capacity(file.tests.len());
    for entry in file.tests {
        if entry.completed {
            continue;
        }
        if !seen.insert(entry.gid.clone()) {
            return Err(QatError::InvalidValue {
                field: "queue.tests.gid",
                details: format!("identifier {} appears more than once", entry.gid),
            });
        }
        let mut candidate = Candidate::new(entry.gid, entry.code.trim());
        candidate.name = entry.name;
        candidates.push(candidate);
    }
    Ok(candidates)
}

pub fn load_queue(path: &Path) -> Result<Vec<Candidate>> {
    let raw = fs::read_to_string(path).map_err(|source| QatError::io(path, source))?;
    parse_queue(&raw)
}
