//! Raw outcome classification.
//!
//! The automation driver reports free text. Rules are checked in order,
//! case-insensitively, and the first match wins:
//!
//! 1. empty → blocked, `no result`
//! 2. starts with `PASS` → passed, text after `PASS`/`PASS:` (or `test passed`)
//! 3. starts with `FAIL` → failed, text after `FAIL`/`FAIL:` (or `test failed`)
//! 4. contains `TIMEOUT` or `TIMED OUT` → failed, `timeout waiting for element`
//! 5. contains `NOT FOUND` or `NO ELEMENT` → failed, `element not found on page`
//! 6. contains `BLOCKED` or `SKIP` → blocked, the original text
//! 7. anything else → failed, `unexpected result: <text>`
//!
//! Classification never drops a result: every input maps to a status.
//!
//! Surrounding whitespace is trimmed before any rule runs. Driver output
//! often arrives with a trailing newline or leading indentation, so
//! `"  PASS\n"` is a pass and whitespace-only text counts as empty.

#![allow(missing_docs)]

use serde::Serialize;

use crate::store::sessions::TestStatus;

/// Console errors appended to a failure reason.
const MAX_CONSOLE_ERRORS: usize = 2;

/// Status and reason derived from a raw outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub status: TestStatus,
    pub reason: String,
    /// Not passed and no screenshot was captured.
    pub needs_screenshot: bool,
}

/// Everything the driver reported for one test.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawOutcome<'a> {
    pub text: Option<&'a str>,
    pub screenshot_path: Option<&'a str>,
    pub console_errors: &'a [String],
}

/// Apply the ordered rules to `text` alone.
#[must_use]
pub fn classify_text(text: Option<&str>) -> (TestStatus, String) {
    let Some(original) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return (TestStatus::Blocked, "no result".to_string());
    };
    let upper = original.to_ascii_uppercase();

    if upper.starts_with("PASS") {
        return (TestStatus::Passed, after_prefix(original, 4, "test passed"));
    }
    if upper.starts_with("FAIL") {
        return (TestStatus::Failed, after_prefix(original, 4, "test failed"));
    }
    if upper.contains("TIMEOUT") || upper.contains("TIMED OUT") {
        return (TestStatus::Failed, "timeout waiting for element".to_string());
    }
    if upper.contains("NOT FOUND") || upper.contains("NO ELEMENT") {
        return (TestStatus::Failed, "element not found on page".to_string());
    }
    if upper.contains("BLOCKED") || upper.contains("SKIP") {
        return (TestStatus::Blocked, original.to_string());
    }
    (TestStatus::Failed, format!("unexpected result: {original}"))
}

/// Full classification including console errors and the screenshot hint.
#[must_use]
pub fn classify(outcome: &RawOutcome<'_>) -> Classification {
    let (status, mut reason) = classify_text(outcome.text);

    if status == TestStatus::Failed && !outcome.console_errors.is_empty() {
        let shown: Vec<&str> = outcome
            .console_errors
            .iter()
            .take(MAX_CONSOLE_ERRORS)
            .map(String::as_str)
            .collect();
        reason.push_str(" | console errors: ");
        reason.push_str(&shown.join(", "));
    }

    let has_screenshot = outcome.screenshot_path.is_some_and(|p| !p.trim().is_empty());
    Classification {
        status,
        reason,
        needs_screenshot: status != TestStatus::Passed && !has_screenshot,
    }
}

/// Text after a 4-letter ASCII prefix, an optional colon and whitespace.
fn after_prefix(original: &str, prefix_len: usize, fallback: &str) -> String {
    // The prefix matched case-insensitively on ASCII, so byte slicing is safe.
    let rest = original[prefix_len..].trim_start();
    let rest = rest.strip_prefix(':').unwrap_or(rest).trim();
    if rest.is_empty() {
        fallback.to_string()
    } else {
        rest.to_string()
    }
}
