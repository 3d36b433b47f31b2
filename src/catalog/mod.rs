//! Test-case domain types: codes, categories, priorities, and the case record.
//!
//! A test code has the shape `TC-<SEGMENT>-<NNN>`. The middle segment selects
//! one of a fixed set of functional areas; segments outside that set map to
//! [`Category::Unknown`] rather than being rejected.

#![allow(missing_docs)]

pub mod intake;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::{QatError, Result};

// ──────────────────── TestCode ────────────────────

/// Validated test-case code such as `TC-LOGIN-001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TestCode(String);

impl TestCode {
    /// Parse and validate a code. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if split_code(trimmed).is_none() {
            return Err(QatError::InvalidTestCode {
                code: raw.to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Middle segment, e.g. `LOGIN` for `TC-LOGIN-001`.
    #[must_use]
    pub fn segment(&self) -> &str {
        split_code(&self.0).map_or("", |(segment, _)| segment)
    }

    #[must_use]
    pub fn category(&self) -> Category {
        Category::from_segment(self.segment())
    }
}

/// Split `TC-SEG-NNN` into `(SEG, NNN)` when the shape is valid.
fn split_code(code: &str) -> Option<(&str, &str)> {
    let rest = code.strip_prefix("TC-")?;
    let (segment, number) = rest.rsplit_once('-')?;
    let segment_ok = !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_uppercase());
    let number_ok = !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit());
    (segment_ok && number_ok).then_some((segment, number))
}

impl fmt::Display for TestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TestCode {
    type Error = QatError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TestCode> for String {
    fn from(value: TestCode) -> Self {
        value.0
    }
}

impl AsRef<str> for TestCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ──────────────────── Category ────────────────────

/// Functional area of the application under test.
///
/// Declaration order is the catalog sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Login,
    Projects,
    LayerImport,
    LayerManagement,
    LayerProperties,
    AttributeTable,
    MapNavigation,
    Tools,
    Publishing,
    Interface,
    Performance,
    Errors,
    Unknown,
}

impl Category {
    pub const ALL: [Self; 13] = [
        Self::Login,
        Self::Projects,
        Self::LayerImport,
        Self::LayerManagement,
        Self::LayerProperties,
        Self::AttributeTable,
        Self::MapNavigation,
        Self::Tools,
        Self::Publishing,
        Self::Interface,
        Self::Performance,
        Self::Errors,
        Self::Unknown,
    ];

    /// Stable storage name (snake_case).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Projects => "projects",
            Self::LayerImport => "layer_import",
            Self::LayerManagement => "layer_management",
            Self::LayerProperties => "layer_properties",
            Self::AttributeTable => "attribute_table",
            Self::MapNavigation => "map_navigation",
            Self::Tools => "tools",
            Self::Publishing => "publishing",
            Self::Interface => "interface",
            Self::Performance => "performance",
            Self::Errors => "errors",
            Self::Unknown => "unknown",
        }
    }

    /// Code segment for this category; `None` for [`Category::Unknown`].
    #[must_use]
    pub const fn segment(self) -> Option<&'static str> {
        match self {
            Self::Login => Some("LOGIN"),
            Self::Projects => Some("PROJ"),
            Self::LayerImport => Some("IMPORT"),
            Self::LayerManagement => Some("LAYER"),
            Self::LayerProperties => Some("PROP"),
            Self::AttributeTable => Some("ATTR"),
            Self::MapNavigation => Some("NAV"),
            Self::Tools => Some("TOOL"),
            Self::Publishing => Some("PUB"),
            Self::Interface => Some("UI"),
            Self::Performance => Some("PERF"),
            Self::Errors => Some("BUG"),
            Self::Unknown => None,
        }
    }

    /// Human-readable label used in reports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Projects => "projects",
            Self::LayerImport => "layer import",
            Self::LayerManagement => "layer management",
            Self::LayerProperties => "layer properties",
            Self::AttributeTable => "attribute table",
            Self::MapNavigation => "map navigation",
            Self::Tools => "tools",
            Self::Publishing => "publishing",
            Self::Interface => "interface",
            Self::Performance => "performance",
            Self::Errors => "error handling",
            Self::Unknown => "unknown",
        }
    }

    /// Position in the catalog sort order (0-based).
    #[must_use]
    pub const fn rank(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_segment(segment: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|category| category.segment() == Some(segment))
            .unwrap_or(Self::Unknown)
    }

    /// Category derived from a raw code string; malformed codes are `Unknown`.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        split_code(code.trim()).map_or(Self::Unknown, |(segment, _)| Self::from_segment(segment))
    }

    /// Lenient parse accepting the storage name, the code segment, or the label.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let needle = raw.trim();
        Self::ALL.into_iter().find(|category| {
            category.as_str().eq_ignore_ascii_case(needle)
                || category.label().eq_ignore_ascii_case(needle)
                || category
                    .segment()
                    .is_some_and(|segment| segment.eq_ignore_ascii_case(needle))
        })
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────── Priority ────────────────────

/// Execution priority, `P0` most urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum Priority {
    P0,
    P1,
    #[default]
    P2,
    P3,
}

impl Priority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "P0" | "0" => Some(Self::P0),
            "P1" | "1" => Some(Self::P1),
            "P2" | "2" => Some(Self::P2),
            "P3" | "3" => Some(Self::P3),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────── TestCase ────────────────────

/// One manual test-case definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub code: TestCode,
    pub name: String,
    pub category: Category,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub preconditions: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub expected_result: String,
    #[serde(default)]
    pub external_ref: Option<String>,
}

impl TestCase {
    /// Minimal case with the category derived from the code.
    #[must_use]
    pub fn new(code: TestCode, name: impl Into<String>) -> Self {
        let category = code.category();
        Self {
            code,
            name: name.into(),
            category,
            priority: Priority::default(),
            description: String::new(),
            preconditions: String::new(),
            steps: Vec::new(),
            expected_result: String::new(),
            external_ref: None,
        }
    }

    /// Placeholder created when a result arrives for an uncatalogued code.
    #[must_use]
    pub fn placeholder(code: &TestCode) -> Self {
        Self::new(code.clone(), code.as_str())
    }

    /// Check the case is storable: non-empty name, category matching the code.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(QatError::InvalidTestCase {
                code: self.code.to_string(),
                details: "name must not be empty".to_string(),
            });
        }
        let derived = self.code.category();
        if self.category != derived {
            return Err(QatError::InvalidTestCase {
                code: self.code.to_string(),
                details: format!(
                    "category {} does not match code segment {} ({derived})",
                    self.category,
                    self.code.segment()
                ),
            });
        }
        Ok(())
    }
}
