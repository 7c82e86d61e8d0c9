// NetSleuth - core/export.rs
//
// JSON export of device reports and CSV export of record tables.
// Core layer: writes to any Write trait object.

use crate::core::model::{DeviceReport, ParseResult};
use crate::util::error::ExportError;
use std::io::Write;
use std::path::PathBuf;

/// Export the records of `results` to CSV.
///
/// Columns: source, platform, command, then every value name in order of
/// first appearance. List values are joined with ", ". Returns the number
/// of data rows written.
pub fn export_csv<W: Write>(
    results: &[&ParseResult],
    writer: W,
    export_path: &PathBuf,
) -> Result<usize, ExportError> {
    let csv_err = |e: csv::Error| ExportError::Csv {
        path: export_path.clone(),
        source: e,
    };

    let mut columns: Vec<&str> = Vec::new();
    for record in results.iter().flat_map(|r| r.records.iter()) {
        for name in record.names() {
            if !columns.contains(&name.as_str()) {
                columns.push(name);
            }
        }
    }

    let mut csv_writer = csv::Writer::from_writer(writer);

    let header: Vec<&str> = ["source", "platform", "command"]
        .into_iter()
        .chain(columns.iter().copied())
        .collect();
    csv_writer.write_record(&header).map_err(csv_err)?;

    let mut count = 0;
    for result in results {
        for record in &result.records {
            let mut row: Vec<String> = vec![
                result.source.clone(),
                result.platform.clone(),
                result.command.clone(),
            ];
            row.extend(
                columns
                    .iter()
                    .map(|c| record.get(c).map(|v| v.to_text()).unwrap_or_default()),
            );
            csv_writer.write_record(&row).map_err(csv_err)?;
            count += 1;
        }
    }

    csv_writer.flush().map_err(|e| ExportError::Io {
        path: export_path.clone(),
        source: e,
    })?;

    Ok(count)
}

/// Export device reports as a pretty-printed JSON array.
pub fn export_json<W: Write>(
    reports: &[DeviceReport],
    writer: W,
    export_path: &PathBuf,
) -> Result<usize, ExportError> {
    serde_json::to_writer_pretty(writer, reports).map_err(|e| ExportError::Json {
        path: export_path.clone(),
        source: e,
    })?;
    Ok(reports.len())
}
