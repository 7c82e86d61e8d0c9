// NetSleuth - core/discovery.rs
//
// Recursive directory traversal and capture file discovery.
//
// Uses `walkdir` for traversal and reads only file metadata, never file
// contents; reading is owned by platform::fs.
//
//   - Per-entry I/O errors are non-fatal and collected as warnings.
//   - max_files and max_depth are clamped to named absolute bounds.
//   - Literal exclude patterns (`.git`) prune whole directories via
//     filter_entry; wildcard patterns apply to file names only.

use crate::util::constants;
use crate::util::error::DiscoveryError;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a discovery operation.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Maximum directory recursion depth (1 = root files only).
    pub max_depth: usize,

    /// Maximum number of captures to return.
    pub max_files: usize,

    /// Glob patterns (file name only) a file must match to be included.
    /// An empty list includes everything that is not excluded.
    pub include_patterns: Vec<String>,

    /// Glob patterns matched against file names and directory names.
    pub exclude_patterns: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_depth: constants::DEFAULT_MAX_DEPTH,
            max_files: constants::DEFAULT_MAX_FILES,
            include_patterns: constants::DEFAULT_INCLUDE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            exclude_patterns: constants::DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

/// A capture file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Files found, sorted by path, plus non-fatal warnings.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    pub files: Vec<CaptureFile>,
    pub warnings: Vec<String>,
    /// Matching files before the `max_files` cut.
    pub total_found: usize,
}

// =============================================================================
// Discovery
// =============================================================================

/// Discover capture files under `root`.
///
/// Returns `Err` only for an invalid root or an invalid glob pattern.
/// When more than `max_files` match, the first `max_files` by path are kept
/// and a warning is recorded.
pub fn discover_captures(
    root: &Path,
    config: &DiscoveryConfig,
) -> Result<DiscoveryOutcome, DiscoveryError> {
    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(DiscoveryError::NotADirectory {
                path: root.to_path_buf(),
            })
        }
        Err(_) => {
            return Err(DiscoveryError::RootNotFound {
                path: root.to_path_buf(),
            })
        }
    }

    let max_files = config
        .max_files
        .clamp(constants::MIN_MAX_FILES, constants::ABSOLUTE_MAX_FILES);
    let max_depth = config.max_depth.min(constants::ABSOLUTE_MAX_DEPTH);

    let include_pats = compile_patterns(&config.include_patterns)?;
    let exclude_pats = compile_patterns(&config.exclude_patterns)?;

    tracing::debug!(
        root = %root.display(),
        max_depth,
        max_files,
        include = ?config.include_patterns,
        exclude = ?config.exclude_patterns,
        "Discovery starting"
    );

    let mut files: Vec<CaptureFile> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    let walker = walkdir::WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let name = e.file_name().to_str().unwrap_or("");
            !is_excluded_component(name, &exclude_pats)
        });

    for entry_result in walker {
        let entry = match entry_result {
            Ok(e) => e,
            Err(e) => {
                if e.depth() == 0 {
                    return Err(DiscoveryError::Traversal {
                        path: root.to_path_buf(),
                        source: e,
                    });
                }
                let path_str = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<unknown>".to_string());
                let msg = format!("Cannot access '{path_str}': {e}");
                tracing::debug!(warning = %msg, "Discovery warning");
                warnings.push(msg);
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            warnings.push(format!("Skipping '{}': non-UTF-8 filename", path.display()));
            continue;
        };

        if exclude_pats.iter().any(|p| p.matches(file_name)) {
            tracing::trace!(file = file_name, "Excluded by pattern");
            continue;
        }
        if !include_pats.is_empty() && !include_pats.iter().any(|p| p.matches(file_name)) {
            tracing::trace!(file = file_name, "Not matched by include patterns");
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                let msg = format!("Cannot read metadata for '{}': {e}", path.display());
                tracing::debug!(warning = %msg, "Discovery warning");
                warnings.push(msg);
                continue;
            }
        };

        files.push(CaptureFile {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    let total_found = files.len();

    if total_found > max_files {
        files.truncate(max_files);
        warnings.push(format!(
            "{total_found} capture files were found but the limit is {max_files}; \
             only the first {max_files} by path are parsed"
        ));
        tracing::info!(total_found, limit = max_files, "Capture list truncated");
    }

    tracing::debug!(
        total_found,
        files = files.len(),
        warnings = warnings.len(),
        "Discovery complete"
    );

    Ok(DiscoveryOutcome {
        files,
        warnings,
        total_found,
    })
}

// =============================================================================
// Glob helpers
// =============================================================================

fn compile_patterns(patterns: &[String]) -> Result<Vec<glob::Pattern>, DiscoveryError> {
    patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|source| DiscoveryError::InvalidPattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

/// True if `dir_name` matches an exclude pattern without wildcards.
fn is_excluded_component(dir_name: &str, exclude_pats: &[glob::Pattern]) -> bool {
    exclude_pats.iter().any(|p| {
        let s = p.as_str();
        !s.contains('*') && !s.contains('?') && !s.contains('[') && p.matches(dir_name)
    })
}

// =============================================================================
// Tests
// =============================================================================
