// NetSleuth - core/aggregate.rs
//
// Result aggregation: maps raw template records onto platform-neutral
// domain views (CPU/memory, inventory, interfaces, summary).
//
// Field names are never guessed. Each platform profile declares which
// command feeds a view and which template values feed each canonical field.
// Missing inputs never fail aggregation; the affected view or metric is
// marked unavailable with a reason.

use crate::core::model::{FieldValue, ParseResult, Record};
use crate::core::profile::{
    CpuHistoryMapping, CpuMemoryMapping, FieldSource, PlatformProfile, TableMapping, ViewMappings,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Canonical summary fields.
pub const SUMMARY_FIELDS: &[&str] = &["hostname", "version", "hardware", "serial", "uptime"];

/// Canonical inventory row fields.
pub const INVENTORY_FIELDS: &[&str] = &["name", "description", "part_id", "serial", "version"];

/// Canonical interface row fields.
pub const INTERFACE_FIELDS: &[&str] = &[
    "name",
    "link_status",
    "protocol_status",
    "description",
    "speed",
    "duplex",
    "mtu",
    "in_packets",
    "out_packets",
    "in_errors",
    "out_errors",
];

/// Histogram bucket for an empty status or speed.
const UNKNOWN_BUCKET: &str = "unknown";

// =============================================================================
// View types
// =============================================================================

/// Which domain view to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    CpuMemory,
    Inventory,
    Interfaces,
    Summary,
}

impl ViewKind {
    pub fn all() -> &'static [ViewKind] {
        &[
            ViewKind::CpuMemory,
            ViewKind::Inventory,
            ViewKind::Interfaces,
            ViewKind::Summary,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            ViewKind::CpuMemory => "cpu_memory",
            ViewKind::Inventory => "inventory",
            ViewKind::Interfaces => "interfaces",
            ViewKind::Summary => "summary",
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ViewKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "cpu_memory" => Ok(ViewKind::CpuMemory),
            "inventory" => Ok(ViewKind::Inventory),
            "interfaces" => Ok(ViewKind::Interfaces),
            "summary" => Ok(ViewKind::Summary),
            other => Err(format!(
                "unknown view '{other}' (expected cpu_memory, inventory, interfaces or summary)"
            )),
        }
    }
}

/// Completeness of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewStatus {
    /// Every canonical field or metric is populated.
    Complete,
    /// Some fields or metrics are missing.
    Partial,
    /// No source data at all.
    Unavailable,
}

/// A numeric figure or the reason it could not be produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Metric {
    Available { value: f64 },
    Unavailable { reason: String },
}

impl Metric {
    fn unavailable(reason: impl Into<String>) -> Self {
        Metric::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Metric::Available { value } => Some(*value),
            Metric::Unavailable { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuMemoryView {
    pub status: ViewStatus,
    pub cpu_max: Metric,
    pub cpu_avg: Metric,
    pub memory_usage_percent: Metric,
}

/// Rows of canonical fields built from one command's records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableView {
    pub status: ViewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_command: Option<String>,
    pub rows: Vec<BTreeMap<String, String>>,
    /// Canonical fields never populated in any row.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TableView {
    fn unavailable(reason: String) -> Self {
        Self {
            status: ViewStatus::Unavailable,
            source_command: None,
            rows: Vec::new(),
            missing_fields: Vec::new(),
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfacesView {
    #[serde(flatten)]
    pub table: TableView,
    pub link_status_counts: BTreeMap<String, usize>,
    pub speed_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryView {
    pub status: ViewStatus,
    pub platform: String,
    pub fields: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One aggregated view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum DomainView {
    CpuMemory(CpuMemoryView),
    Inventory(TableView),
    Interfaces(InterfacesView),
    Summary(SummaryView),
}

impl DomainView {
    pub fn status(&self) -> ViewStatus {
        match self {
            DomainView::CpuMemory(v) => v.status,
            DomainView::Inventory(v) => v.status,
            DomainView::Interfaces(v) => v.table.status,
            DomainView::Summary(v) => v.status,
        }
    }
}

/// All four views of one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceViews {
    pub summary: SummaryView,
    pub cpu_memory: CpuMemoryView,
    pub inventory: TableView,
    pub interfaces: InterfacesView,
}

// =============================================================================
// Field helpers
// =============================================================================

/// Text of a record value: trimmed scalars, lists de-duplicated in order
/// and joined with ", ".
fn value_text(value: &FieldValue) -> String {
    match value {
        FieldValue::Scalar(s) => s.trim().to_string(),
        FieldValue::List(items) => {
            let mut seen = HashSet::new();
            items
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty() && seen.insert(*s))
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

/// First non-empty candidate field of `record`.
fn field_text(record: &Record, source: &FieldSource) -> Option<String> {
    source
        .candidates()
        .iter()
        .filter_map(|name| record.get(name))
        .map(value_text)
        .find(|s| !s.is_empty())
}

/// Parse a figure such as `42`, `42%`, `1,024` or ` 3.5 `.
fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    cleaned.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn numeric_field(records: &[Record], field: &str) -> Option<f64> {
    records
        .iter()
        .filter_map(|r| r.get(field))
        .find_map(|v| parse_number(&value_text(v)))
}

fn status_from(present: usize, total: usize) -> ViewStatus {
    if present == 0 {
        ViewStatus::Unavailable
    } else if present == total {
        ViewStatus::Complete
    } else {
        ViewStatus::Partial
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// Builds domain views from parse results using the profiles' mapping
/// tables.
#[derive(Debug, Clone, Copy)]
pub struct Aggregator<'p> {
    profiles: &'p [PlatformProfile],
}

impl<'p> Aggregator<'p> {
    pub fn new(profiles: &'p [PlatformProfile]) -> Self {
        Self { profiles }
    }

    fn profile(&self, id: &str) -> Option<&'p PlatformProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Every result carrying the command `pick` names for the platform of
    /// the first such result, in input order. Never empty on success.
    fn source<'r, M>(
        &self,
        results: &'r [ParseResult],
        pick: impl Fn(&'p ViewMappings) -> Option<M>,
        command_of: impl Fn(&M) -> Option<&str>,
    ) -> Result<(Vec<&'r ParseResult>, M), String> {
        if results.is_empty() {
            return Err("no parse results".to_string());
        }
        let mut wanted: Vec<String> = Vec::new();
        for result in results {
            let Some(profile) = self.profile(&result.platform) else {
                continue;
            };
            let Some(mapping) = pick(&profile.views) else {
                continue;
            };
            match command_of(&mapping) {
                Some(command) if command == result.command => {
                    let matched = results
                        .iter()
                        .filter(|r| r.platform == result.platform && r.command == result.command)
                        .collect();
                    return Ok((matched, mapping));
                }
                Some(command) => {
                    if !wanted.iter().any(|w| w == command) {
                        wanted.push(command.to_string());
                    }
                }
                None => {}
            }
        }
        if wanted.is_empty() {
            Err(format!(
                "platform '{}' declares no mapping for this view",
                results[0].platform
            ))
        } else {
            Err(format!("no '{}' output parsed", wanted.join("' or '")))
        }
    }

    /// Build the requested view.
    pub fn aggregate(&self, results: &[ParseResult], kind: ViewKind) -> DomainView {
        match kind {
            ViewKind::CpuMemory => DomainView::CpuMemory(self.cpu_memory(results)),
            ViewKind::Inventory => DomainView::Inventory(self.inventory(results)),
            ViewKind::Interfaces => DomainView::Interfaces(self.interfaces(results)),
            ViewKind::Summary => DomainView::Summary(self.summary(results)),
        }
    }

    /// Build every view.
    pub fn device_views(&self, results: &[ParseResult]) -> DeviceViews {
        DeviceViews {
            summary: self.summary(results),
            cpu_memory: self.cpu_memory(results),
            inventory: self.inventory(results),
            interfaces: self.interfaces(results),
        }
    }

    // -------------------------------------------------------------------------
    // Summary
    // -------------------------------------------------------------------------

    pub fn summary(&self, results: &[ParseResult]) -> SummaryView {
        let platform = results
            .first()
            .map(|r| r.platform.trim().to_string())
            .unwrap_or_default();

        let (sources, mapping) =
            match self.source(results, |v| v.summary.as_ref(), |m| Some(m.command.as_str())) {
                Ok(found) => found,
                Err(reason) => {
                    return SummaryView {
                        status: ViewStatus::Unavailable,
                        platform,
                        fields: BTreeMap::new(),
                        missing_fields: SUMMARY_FIELDS.iter().map(|f| f.to_string()).collect(),
                        reason: Some(reason),
                    }
                }
            };

        let mut fields = BTreeMap::new();
        for (canonical, source) in &mapping.fields {
            if let Some(text) = sources
                .iter()
                .flat_map(|r| &r.records)
                .find_map(|r| field_text(r, source))
            {
                fields.insert(canonical.clone(), text);
            }
        }

        let missing_fields: Vec<String> = SUMMARY_FIELDS
            .iter()
            .filter(|f| !fields.contains_key(**f))
            .map(|f| f.to_string())
            .collect();
        let present = SUMMARY_FIELDS.len() - missing_fields.len();

        SummaryView {
            status: status_from(present, SUMMARY_FIELDS.len()),
            platform,
            fields,
            missing_fields,
            reason: sources
                .iter()
                .all(|r| r.records.is_empty())
                .then(|| format!("'{}' produced no records", mapping.command)),
        }
    }

    // -------------------------------------------------------------------------
    // Row tables
    // -------------------------------------------------------------------------

    fn table(
        &self,
        results: &[ParseResult],
        pick: impl Fn(&'p ViewMappings) -> Option<&'p TableMapping>,
        canonical: &[&str],
        dedupe: bool,
    ) -> TableView {
        let (sources, mapping) = match self.source(results, pick, |m| Some(m.command.as_str())) {
            Ok(found) => found,
            Err(reason) => return TableView::unavailable(reason),
        };

        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut rows = Vec::new();
        let records = sources
            .iter()
            .flat_map(|result| result.records.iter().map(move |record| (*result, record)));
        for (result, record) in records {
            let row: BTreeMap<String, String> = mapping
                .fields
                .iter()
                .filter_map(|(name, source)| field_text(record, source).map(|t| (name.clone(), t)))
                .collect();
            if row.is_empty() {
                continue;
            }
            if dedupe {
                let key: Vec<String> = if result.key_fields.is_empty() {
                    row.iter().map(|(k, v)| format!("{k}={v}")).collect()
                } else {
                    result
                        .key_fields
                        .iter()
                        .map(|k| record.get(k).map(value_text).unwrap_or_default())
                        .collect()
                };
                if !seen.insert(key) {
                    continue;
                }
            }
            rows.push(row);
        }

        let missing_fields: Vec<String> = canonical
            .iter()
            .filter(|f| !rows.iter().any(|r| r.contains_key(**f)))
            .map(|f| f.to_string())
            .collect();

        let (status, reason) = if rows.is_empty() {
            (
                ViewStatus::Partial,
                Some(format!("'{}' produced no rows", mapping.command)),
            )
        } else if missing_fields.is_empty() {
            (ViewStatus::Complete, None)
        } else {
            (ViewStatus::Partial, None)
        };

        TableView {
            status,
            source_command: Some(mapping.command.clone()),
            rows,
            missing_fields,
            reason,
        }
    }

    /// Inventory rows, de-duplicated by the template's `Key` values (or by
    /// the whole row when it declares none).
    pub fn inventory(&self, results: &[ParseResult]) -> TableView {
        self.table(results, |v| v.inventory.as_ref(), INVENTORY_FIELDS, true)
    }

    /// Interface rows with link-status and speed histograms.
    pub fn interfaces(&self, results: &[ParseResult]) -> InterfacesView {
        let table = self.table(results, |v| v.interfaces.as_ref(), INTERFACE_FIELDS, false);

        let mut link_status_counts = BTreeMap::new();
        let mut speed_counts = BTreeMap::new();
        for row in &table.rows {
            for (field, counts) in [
                ("link_status", &mut link_status_counts),
                ("speed", &mut speed_counts),
            ] {
                let bucket = row
                    .get(field)
                    .map(|v| v.to_lowercase())
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| UNKNOWN_BUCKET.to_string());
                *counts.entry(bucket).or_insert(0usize) += 1;
            }
        }

        InterfacesView {
            table,
            link_status_counts,
            speed_counts,
        }
    }

    // -------------------------------------------------------------------------
    // CPU / memory
    // -------------------------------------------------------------------------

    /// CPU and memory metrics. Each metric reads the first matching
    /// capture. A captured utilisation graph takes precedence over the
    /// plain CPU command.
    pub fn cpu_memory(&self, results: &[ParseResult]) -> CpuMemoryView {
        let history = self
            .source(
                results,
                |v| v.cpu_memory.as_ref(),
                |m: &&CpuMemoryMapping| m.cpu_history.as_ref().map(|h| h.command.as_str()),
            )
            .ok()
            .and_then(|(found, mapping)| {
                let history = mapping.cpu_history.as_ref()?;
                Some(history_metrics(found[0], history))
            });

        let (cpu_max, cpu_avg) = match history {
            Some(Ok(metrics)) => metrics,
            history_failure => match self.source(
                results,
                |v| v.cpu_memory.as_ref(),
                |m: &&CpuMemoryMapping| m.cpu_command.as_deref(),
            ) {
                Ok((found, mapping)) => cpu_metrics(found[0], mapping),
                Err(reason) => {
                    let reason = match history_failure {
                        Some(Err(history_reason)) => history_reason,
                        _ => reason,
                    };
                    (Metric::unavailable(&reason), Metric::unavailable(reason))
                }
            },
        };

        let memory_usage_percent = match self.source(
            results,
            |v| v.cpu_memory.as_ref(),
            |m: &&CpuMemoryMapping| m.memory_command.as_deref(),
        ) {
            Ok((found, mapping)) => memory_metric(found[0], mapping),
            Err(reason) => Metric::unavailable(reason),
        };

        let present = [&cpu_max, &cpu_avg, &memory_usage_percent]
            .iter()
            .filter(|m| m.value().is_some())
            .count();

        CpuMemoryView {
            status: status_from(present, 3),
            cpu_max,
            cpu_avg,
            memory_usage_percent,
        }
    }
}

fn cpu_metrics(result: &ParseResult, mapping: &CpuMemoryMapping) -> (Metric, Metric) {
    let records = &result.records;
    let avg = match (&mapping.cpu_avg_field, &mapping.cpu_idle_field) {
        (Some(field), _) if numeric_field(records, field).is_some() => {
            numeric_field(records, field).map(round2)
        }
        (_, Some(idle)) => numeric_field(records, idle).map(|v| round2(100.0 - v)),
        _ => None,
    };
    let cpu_avg = match avg {
        Some(value) => Metric::Available { value },
        None => Metric::unavailable(format!(
            "no numeric CPU average in '{}' output",
            result.command
        )),
    };

    let cpu_max = if mapping.cpu_max_fields.is_empty() {
        cpu_avg.clone()
    } else {
        mapping
            .cpu_max_fields
            .iter()
            .flat_map(|field| {
                records
                    .iter()
                    .filter_map(move |r| r.get(field))
                    .filter_map(|v| parse_number(&value_text(v)))
            })
            .reduce(f64::max)
            .map(|value| Metric::Available {
                value: round2(value),
            })
            .unwrap_or_else(|| {
                Metric::unavailable(format!(
                    "no numeric CPU peak in '{}' output",
                    result.command
                ))
            })
    };

    (cpu_max, cpu_avg)
}

/// Peak and average from a utilisation graph.
///
/// The peak of each sample is read down its column of the digit rows. The
/// average is the highest gridline marked `#`; averages below the lowest
/// gridline draw no `#` and read as 1.
fn history_metrics(
    result: &ParseResult,
    mapping: &CpuHistoryMapping,
) -> Result<(Metric, Metric), String> {
    let record = result
        .records
        .first()
        .ok_or_else(|| format!("'{}' produced no records", result.command))?;

    let rows: Vec<&str> = match record.get(&mapping.peak_rows_field) {
        Some(FieldValue::List(items)) => items.iter().map(String::as_str).collect(),
        Some(FieldValue::Scalar(row)) => vec![row.as_str()],
        None => Vec::new(),
    };
    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    let peak = (0..width)
        .filter_map(|col| {
            let digits: String = rows
                .iter()
                .filter_map(|r| r.as_bytes().get(col))
                .filter(|b| b.is_ascii_digit())
                .map(|b| char::from(*b))
                .collect();
            digits.parse::<u32>().ok()
        })
        .max()
        .ok_or_else(|| format!("no CPU peak values in '{}' graph", result.command))?;

    let average = match record.get(&mapping.average_levels_field) {
        Some(FieldValue::List(items)) => items.first().and_then(|v| parse_number(v)),
        Some(FieldValue::Scalar(level)) => parse_number(level),
        None => None,
    }
    .filter(|level| *level >= 10.0)
    .unwrap_or(1.0);

    Ok((
        Metric::Available {
            value: f64::from(peak),
        },
        Metric::Available { value: average },
    ))
}

fn memory_metric(result: &ParseResult, mapping: &CpuMemoryMapping) -> Metric {
    let records = &result.records;

    if let Some(value) = mapping
        .memory_percent_field
        .as_deref()
        .and_then(|f| numeric_field(records, f))
    {
        return Metric::Available {
            value: round2(value),
        };
    }

    let total = mapping
        .memory_total_field
        .as_deref()
        .and_then(|f| numeric_field(records, f));
    let used = mapping
        .memory_used_field
        .as_deref()
        .and_then(|f| numeric_field(records, f))
        .or_else(|| {
            let free = mapping
                .memory_free_field
                .as_deref()
                .and_then(|f| numeric_field(records, f))?;
            Some(total? - free)
        });

    match (total, used) {
        (Some(total), _) if total == 0.0 => Metric::unavailable("memory total is 0"),
        (Some(total), Some(used)) => Metric::Available {
            value: round2(used / total * 100.0),
        },
        _ => Metric::unavailable(format!(
            "no numeric memory figures in '{}' output",
            result.command
        )),
    }
}

// =============================================================================
// Tests
// =============================================================================
