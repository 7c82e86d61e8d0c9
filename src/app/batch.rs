// NetSleuth - app/batch.rs
//
// Batch parsing: discover capture files under a directory and parse them
// in parallel on a bounded rayon pool.
//
// Every file is parsed independently. A file that cannot be read or whose
// platform cannot be resolved is recorded as a failure; the batch goes on.

use crate::app::parser::Parser;
use crate::core::discovery::{discover_captures, CaptureFile, DiscoveryConfig};
use crate::core::model::{DeviceReport, ParseHint};
use crate::platform::fs::read_capture;
use crate::util::constants;
use crate::util::error::{NetSleuthError, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Settings for one batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub discovery: DiscoveryConfig,
    /// Worker threads; 0 = number of CPUs.
    pub max_concurrency: usize,
    /// Applied to every file.
    pub hint: ParseHint,
}

/// A capture that produced no report.
#[derive(Debug)]
pub struct BatchFailure {
    pub path: PathBuf,
    pub error: NetSleuthError,
}

/// Reports in discovery (path) order plus per-file failures.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub reports: Vec<DeviceReport>,
    pub failures: Vec<BatchFailure>,
    /// Discovery warnings (inaccessible entries, truncation).
    pub warnings: Vec<String>,
    pub total_found: usize,
}

/// Read and parse one capture file. The report's source is the path.
pub fn parse_file(parser: &Parser, path: &Path, hint: &ParseHint) -> Result<DeviceReport> {
    let text = read_capture(path).map_err(|source| NetSleuthError::Io {
        path: path.to_path_buf(),
        operation: "read capture",
        source,
    })?;
    parser.parse_capture(&path.display().to_string(), &text, hint)
}

/// Discover captures under `root` and parse them in parallel.
pub fn run_batch(parser: &Parser, root: &Path, options: &BatchOptions) -> Result<BatchOutcome> {
    let discovered = discover_captures(root, &options.discovery)?;

    let threads = options
        .max_concurrency
        .min(constants::ABSOLUTE_MAX_CONCURRENCY);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("netsleuth-worker-{i}"))
        .build()?;

    tracing::info!(
        root = %root.display(),
        files = discovered.files.len(),
        threads = pool.current_num_threads(),
        "Batch parse starting"
    );

    let parsed: Vec<(&CaptureFile, Result<DeviceReport>)> = pool.install(|| {
        discovered
            .files
            .par_iter()
            .map(|file| (file, parse_file(parser, &file.path, &options.hint)))
            .collect()
    });

    let mut outcome = BatchOutcome {
        warnings: discovered.warnings.clone(),
        total_found: discovered.total_found,
        ..BatchOutcome::default()
    };
    for (file, result) in parsed {
        match result {
            Ok(report) => outcome.reports.push(report),
            Err(error) => {
                tracing::warn!(file = %file.path.display(), error = %error, "Capture not parsed");
                outcome.failures.push(BatchFailure {
                    path: file.path.clone(),
                    error,
                });
            }
        }
    }

    tracing::info!(
        reports = outcome.reports.len(),
        failures = outcome.failures.len(),
        "Batch parse complete"
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::parser::ParserOptions;
    use crate::core::model::TemplateKey;
    use crate::core::profile::{parse_profile_toml, validate_and_compile};
    use crate::core::store::MemoryTemplateStore;
    use std::fs;

    fn parser() -> Parser {
        let path = PathBuf::from("lab.toml");
        let toml = "[platform]\nid = \"lab_os\"\nname = \"Lab OS\"\n\n[detection]\nsignatures = [\"^Lab OS\"]\n\n[commands]\nknown = [\"show version\"]\n";
        let profile = validate_and_compile(parse_profile_toml(toml, &path).unwrap(), &path, false).unwrap();
        let store = MemoryTemplateStore::new();
        store.insert(
            TemplateKey::new("lab_os", "show version"),
            "Value Required Version (\\S+)\n\nStart\n  ^Version ${Version} -> Record\n",
        );
        Parser::new(vec![profile], Box::new(store), ParserOptions::default())
    }

    #[test]
    fn test_batch_yields_one_report_per_capture() {
        let dir = tempfile::tempdir().unwrap();
        for (name, version) in [("a.txt", "1.0"), ("b.log", "2.0"), ("c.txt", "3.0")] {
            fs::write(
                dir.path().join(name),
                format!("dev#show version\nLab OS\nVersion {version}\n"),
            )
            .unwrap();
        }
        fs::write(dir.path().join("unknown.txt"), "nothing to see\n").unwrap();

        let options = BatchOptions {
            max_concurrency: 2,
            ..BatchOptions::default()
        };
        let outcome = run_batch(&parser(), dir.path(), &options).unwrap();

        assert_eq!(outcome.total_found, 4);
        assert_eq!(outcome.reports.len(), 3);
        let versions: Vec<_> = outcome
            .reports
            .iter()
            .map(|r| r.results[0].records[0].get_str("Version").unwrap_or("").to_string())
            .collect();
        assert_eq!(versions, vec!["1.0", "2.0", "3.0"]);

        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].path.ends_with("unknown.txt"));
        assert!(matches!(outcome.failures[0].error, NetSleuthError::Detection(_)));
    }

    #[test]
    fn test_batch_missing_root_is_error() {
        let err = run_batch(
            &parser(),
            Path::new("/nonexistent/netsleuth/batch"),
            &BatchOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, NetSleuthError::Discovery(_)));
    }

    #[test]
    fn test_parse_file_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_file(&parser(), &dir.path().join("gone.txt"), &ParseHint::none()).unwrap_err();
        assert!(matches!(err, NetSleuthError::Io { operation: "read capture", .. }));
    }
}
