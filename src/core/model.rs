// NetSleuth - core/model.rs
//
// Core data model types. Pure data definitions with no I/O and no
// platform dependencies.
//
// These types are the shared vocabulary across all layers.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

use crate::core::aggregate::DeviceViews;

// =============================================================================
// Template key
// =============================================================================

/// Address of a template in a store: one platform, one command.
///
/// Commands are kept in their canonical spelling (`show version`,
/// `display cpu-usage`); `file_stem` derives the on-disk name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TemplateKey {
    pub platform: String,
    pub command: String,
}

impl TemplateKey {
    pub fn new(platform: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            command: command.into(),
        }
    }

    /// File stem used by directory-backed stores:
    /// `<platform>_<command with spaces and dashes as underscores>`.
    pub fn file_stem(&self) -> String {
        let command: String = self
            .command
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .replace('-', "_");
        format!("{}_{}", self.platform, command)
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.platform, self.command)
    }
}

// =============================================================================
// Parse hint
// =============================================================================

/// Caller-supplied knowledge about a capture.
///
/// A platform hint skips signature detection; a command hint skips
/// command-line inference. Either may be given alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseHint {
    pub platform: Option<String>,
    pub command: Option<String>,
}

impl ParseHint {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn platform(platform: impl Into<String>) -> Self {
        Self {
            platform: Some(platform.into()),
            command: None,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}

// =============================================================================
// Records
// =============================================================================

/// A captured value: a scalar for ordinary values, a sequence for `List`
/// values. Unset scalars are the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(String),
    List(Vec<String>),
}

impl FieldValue {
    /// The scalar text, or `None` for a list.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => Some(s),
            Self::List(_) => None,
        }
    }

    /// True for an empty string or an empty list.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Scalar(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
        }
    }

    /// Flattened text form: scalars as-is, lists joined with ", ".
    pub fn to_text(&self) -> String {
        match self {
            Self::Scalar(s) => s.clone(),
            Self::List(items) => items.join(", "),
        }
    }
}

/// One emitted row: value names in template declaration order with their
/// captured values.
///
/// The name table is shared by every record of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    names: Arc<[String]>,
    values: Vec<FieldValue>,
}

impl Record {
    /// Build a record. `values` are in the same order as `names`; a name
    /// without a value reads as absent.
    pub fn new(names: Arc<[String]>, values: Vec<FieldValue>) -> Self {
        Self { names, values }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Scalar value by name; `None` for unknown names and list values.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.names.len().min(self.values.len())))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

// =============================================================================
// Parse result
// =============================================================================

/// Output of one template run over one input, with provenance.
#[derive(Debug, Clone, Serialize)]
pub struct ParseResult {
    /// Caller-supplied identifier of the input (file path, upload id).
    pub source: String,

    /// Platform id the template was selected for.
    pub platform: String,

    /// Canonical command the template parses.
    pub command: String,

    /// Store key of the template (`platform/command`), empty when no
    /// template was run.
    pub template: String,

    /// Checksum of the template source the records were produced with.
    pub template_version: String,

    pub parsed_at: DateTime<Utc>,

    /// Number of input lines consumed by the run.
    pub lines_processed: usize,

    /// Names of the template's `Key` values, used for de-duplication.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub key_fields: Vec<String>,

    pub records: Vec<Record>,

    /// Set when a template `Error` action stopped the run early; the
    /// records emitted before the abort are kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl ParseResult {
    /// A result with no records and no template, for inputs with no text.
    pub fn empty(source: &str, platform: &str, command: &str) -> Self {
        Self {
            source: source.to_string(),
            platform: platform.to_string(),
            command: command.to_string(),
            template: String::new(),
            template_version: String::new(),
            parsed_at: Utc::now(),
            lines_processed: 0,
            key_fields: Vec::new(),
            records: Vec::new(),
            aborted: None,
        }
    }
}

// =============================================================================
// Device report
// =============================================================================

/// Everything parsed from one capture: one result per recognised command
/// section plus the aggregated domain views.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub source: String,
    pub platform: String,
    pub parsed_at: DateTime<Utc>,
    pub results: Vec<ParseResult>,
    pub views: DeviceViews,

    /// Non-fatal per-section problems (missing template, timeout).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DeviceReport {
    /// The result for `command`, if that section was parsed.
    pub fn result_for(&self, command: &str) -> Option<&ParseResult> {
        self.results.iter().find(|r| r.command == command)
    }
}
