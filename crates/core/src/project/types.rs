//! Core project data types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Integer key assigned to a project at creation. Never reused.
pub type ProjectId = i64;

/// Stage-defined payload attached to a project.
///
/// Keys are ordered so that the persisted JSON is stable between writes.
pub type FieldMap = BTreeMap<String, FieldValue>;

// ============================================================================
// Field Values
// ============================================================================

/// A single stage-defined field value.
///
/// The set of kinds is closed on purpose: stages add keys, they never
/// restructure existing ones, so the store only has to round-trip these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Borrow the value as text, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an integer, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the value as a timestamp, if it is one.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Name of the value kind, as persisted.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Integer(_) => "integer",
            FieldValue::Real(_) => "real",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Timestamp(_) => "timestamp",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Integer(n) => write!(f, "{}", n),
            FieldValue::Real(x) => write!(f, "{}", x),
            FieldValue::Boolean(b) => write!(f, "{}", b),
            FieldValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Real(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

// ============================================================================
// Append-only Lists
// ============================================================================

/// The two append-only message lists on a project.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProjectList {
    /// Blocking: a non-empty list excludes the project from every stage.
    Errors,
    /// Informational only.
    Warnings,
}

impl ProjectList {
    /// Column holding the list.
    pub fn column(&self) -> &'static str {
        match self {
            ProjectList::Errors => "errors",
            ProjectList::Warnings => "warnings",
        }
    }
}

impl fmt::Display for ProjectList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

// ============================================================================
// Project
// ============================================================================

/// One unit of work moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    /// Unique, monotonically assigned id.
    pub id: ProjectId,
    /// Name of the last stage that completed successfully, if any.
    pub status: Option<String>,
    /// Error messages, oldest first.
    pub errors: Vec<String>,
    /// Warning messages, oldest first.
    pub warnings: Vec<String>,
    /// Stage-defined payload.
    pub fields: FieldMap,
    /// When the project was created.
    pub created_at: DateTime<Utc>,
    /// When the project was last written.
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// True when the project may enter the stage whose prerequisite is `prerequisite`.
    pub fn is_eligible_for(&self, prerequisite: &str) -> bool {
        self.errors.is_empty() && self.status.as_deref() == Some(prerequisite)
    }

    /// True when at least one error has been recorded.
    pub fn is_blocked(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Look up a stage-defined field.
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Look up a text field.
    pub fn text_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(FieldValue::as_str)
    }

    /// Borrow one of the message lists.
    pub fn list(&self, list: ProjectList) -> &[String] {
        match list {
            ProjectList::Errors => &self.errors,
            ProjectList::Warnings => &self.warnings,
        }
    }
}

/// Number of projects sharing one status value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCount {
    /// Status value; `None` for projects no stage has completed yet.
    pub status: Option<String>,
    /// Projects with this status and no errors.
    pub clean: u64,
    /// Projects with this status that carry at least one error.
    pub blocked: u64,
}

impl StatusCount {
    /// Total projects with this status.
    pub fn total(&self) -> u64 {
        self.clean + self.blocked
    }
}
