//! Task intake: turn project-management task exports into catalog entries.
//!
//! Task titles look like `[P1] TC-LOGIN-001: Login with valid credentials`.
//! Steps come from the task notes, preferably from a `## Steps` section
//! (`## Kroki` and `## Procedura` are accepted too).

#![allow(missing_docs)]

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Category, Priority, TestCase, TestCode};
use crate::core::errors::{QatError, Result};

/// One task as exported by the fetch step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportTask {
    pub name: String,
    pub notes: String,
    pub gid: Option<String>,
}

/// Structured view of a task title and notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedTask {
    pub code: TestCode,
    pub name: String,
    pub priority: Priority,
    pub category: Category,
    pub steps: Vec<String>,
    pub external_ref: Option<String>,
}

impl ParsedTask {
    #[must_use]
    pub fn into_test_case(self) -> TestCase {
        let mut case = TestCase::new(self.code, self.name);
        case.priority = self.priority;
        case.steps = self.steps;
        case.external_ref = self.external_ref;
        case
    }
}

/// Compiled title and notes patterns.
pub struct TaskParser {
    code: Regex,
    priority: Regex,
    titled_name: Regex,
    steps_heading: Regex,
    section_step: Regex,
    numbered_step: Regex,
}

impl TaskParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            code: compile(r"TC-[A-Z]+-\d+")?,
            priority: compile(r"\[P(\d)\]")?,
            titled_name: compile(r"TC-[A-Z]+-\d+:\s*(.+)")?,
            steps_heading: compile(r"(?i)^#{1,2}\s*(?:steps|kroki|procedura)\s*:?\s*$")?,
            section_step: compile(r"^(?:\d+[.)]|[-*])\s*(.+)$")?,
            numbered_step: compile(r"^\d+[.)]\s*(.+)$")?,
        })
    }

    /// Parse one exported task. Titles without a test code are rejected.
    pub fn parse(&self, task: &ImportTask) -> Result<ParsedTask> {
        let title = task.name.trim();
        let raw_code = self
            .code
            .find(title)
            .map(|m| m.as_str())
            .ok_or_else(|| QatError::InvalidTestCode {
                code: title.to_string(),
            })?;
        let code = TestCode::parse(raw_code)?;

        // Untagged titles fall to the lowest priority; P4+ tags are treated the same.
        let priority = self
            .priority
            .captures(title)
            .and_then(|caps| caps.get(1))
            .and_then(|digit| Priority::parse(digit.as_str()))
            .unwrap_or(Priority::P3);

        let name = self
            .titled_name
            .captures(title)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| {
                if title.is_empty() {
                    code.to_string()
                } else {
                    title.to_string()
                }
            });

        let category = code.category();
        Ok(ParsedTask {
            code,
            name,
            priority,
            category,
            steps: self.extract_steps(&task.notes),
            external_ref: task.gid.clone().filter(|gid| !gid.trim().is_empty()),
        })
    }

    /// Ordered step texts from task notes.
    #[must_use]
    pub fn extract_steps(&self, notes: &str) -> Vec<String> {
        let mut steps = Vec::new();
        let mut in_section = false;
        for line in notes.lines() {
            let line = line.trim();
            if self.steps_heading.is_match(line) {
                in_section = true;
                continue;
            }
            if in_section {
                if line.starts_with("##") || line.starts_with("**") {
                    break;
                }
                if let Some(step) = capture_text(&self.section_step, line) {
                    steps.push(step);
                }
            }
        }

        if steps.is_empty() {
            steps = notes
                .lines()
                .filter_map(|line| capture_text(&self.numbered_step, line.trim()))
                .collect();
        }
        steps
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|error| QatError::Runtime {
        details: format!("intake pattern {pattern:?} failed to compile: {error}"),
    })
}

fn capture_text(re: &Regex, line: &str) -> Option<String> {
    re.captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Read a JSON array of exported tasks.
pub fn parse_task_export(raw: &str) -> Result<Vec<ImportTask>> {
    Ok(serde_json::from_str(raw)?)
}
