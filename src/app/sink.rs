// NetSleuth - app/sink.rs
//
// Persistence collaborator for device reports.

use crate::core::export;
use crate::core::model::DeviceReport;
use crate::util::error::ExportError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Where a sink put the reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultHandle {
    pub location: String,
    pub reports: usize,
}

/// Accepts finished device reports for storage.
pub trait ResultSink: Send + Sync {
    fn persist(&self, reports: &[DeviceReport]) -> Result<ResultHandle, ExportError>;
}

/// Writes reports as a pretty-printed JSON array to one file, replacing it.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ResultSink for JsonFileSink {
    fn persist(&self, reports: &[DeviceReport]) -> Result<ResultHandle, ExportError> {
        let io_err = |e: std::io::Error| ExportError::Io {
            path: self.path.clone(),
            source: e,
        };
        let file = File::create(&self.path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        let count = export::export_json(reports, &mut writer, &self.path)?;
        writer.write_all(b"\n").map_err(io_err)?;
        writer.flush().map_err(io_err)?;

        tracing::info!(path = %self.path.display(), reports = count, "Reports written");
        Ok(ResultHandle {
            location: self.path.display().to_string(),
            reports: count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aggregate::Aggregator;
    use crate::core::model::ParseResult;
    use chrono::Utc;

    fn report(source: &str) -> DeviceReport {
        let results = vec![ParseResult::empty(source, "cisco_ios", "show version")];
        DeviceReport {
            source: source.to_string(),
            platform: "cisco_ios".into(),
            parsed_at: Utc::now(),
            views: Aggregator::new(&[]).device_views(&results),
            results,
            warnings: vec!["line 9 'show clock': no template".into()],
        }
    }

    #[test]
    fn test_json_sink_writes_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let sink = JsonFileSink::new(&path);

        let handle = sink.persist(&[report("r1.txt"), report("r2.txt")]).unwrap();
        assert_eq!(handle.reports, 2);
        assert_eq!(handle.location, path.display().to_string());

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(2));
        assert_eq!(value[1]["source"], "r2.txt");
        assert_eq!(value[0]["warnings"][0], "line 9 'show clock': no template");
    }

    #[test]
    fn test_json_sink_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path().join("missing_dir").join("out.json"));
        assert!(matches!(sink.persist(&[]), Err(ExportError::Io { .. })));
    }
}
