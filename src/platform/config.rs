// NetSleuth - platform/config.rs
//
// Configuration directory resolution and config.toml loading with startup
// validation.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows),
// Library (macOS) compliance.

use crate::util::constants;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Accepted `[detection] tie_break` values.
pub const TIE_BREAK_VALUES: &[&str] = &["specificity", "strict"];

/// Resolved platform paths for NetSleuth configuration and user definitions.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/netsleuth/).
    pub config_dir: PathBuf,

    /// User template directory (e.g. ~/.config/netsleuth/templates/).
    pub user_templates_dir: PathBuf,

    /// User platform-profile directory (e.g. ~/.config/netsleuth/platforms/).
    pub user_platforms_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to the current directory if platform dirs cannot be
    /// determined.
    pub fn resolve() -> Self {
        let config_dir = match ProjectDirs::from("", "", constants::APP_ID) {
            Some(proj_dirs) => proj_dirs.config_dir().to_path_buf(),
            None => {
                tracing::warn!("Could not determine platform directories, using current directory");
                PathBuf::from(".")
            }
        };
        let paths = Self::under(config_dir);
        tracing::debug!(
            config = %paths.config_dir.display(),
            templates = %paths.user_templates_dir.display(),
            platforms = %paths.user_platforms_dir.display(),
            "Platform paths resolved"
        );
        paths
    }

    /// Paths rooted at an explicit configuration directory.
    pub fn under(config_dir: PathBuf) -> Self {
        Self {
            user_templates_dir: config_dir.join(constants::TEMPLATES_DIR_NAME),
            user_platforms_dir: config_dir.join(constants::PLATFORMS_DIR_NAME),
            config_dir,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(constants::CONFIG_FILE_NAME)
    }
}

// =============================================================================
// config.toml loading and validation
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are ignored so a newer config file still loads.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub detection: DetectionSection,
    pub engine: EngineSection,
    pub batch: BatchSection,
    pub templates: TemplatesSection,
    pub logging: LoggingSection,
}

/// `[detection]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct DetectionSection {
    /// Lines inspected for signatures and the command line.
    pub scan_lines: Option<usize>,
    /// "specificity" or "strict".
    pub tie_break: Option<String>,
}

/// `[engine]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_lines: Option<usize>,
    pub max_run_millis: Option<u64>,
}

/// `[batch]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct BatchSection {
    /// Worker threads (0 = number of CPUs).
    pub max_concurrency: Option<usize>,
    pub max_files: Option<usize>,
    pub max_depth: Option<usize>,
    pub include_patterns: Option<Vec<String>>,
    pub exclude_patterns: Option<Vec<String>>,
}

/// `[templates]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct TemplatesSection {
    pub user_template_directory: Option<String>,
    pub user_platform_directory: Option<String>,
}

/// `[logging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
    /// Log file path (empty = stderr only).
    pub file: Option<String>,
}

/// Validated application configuration derived from `config.toml`.
///
/// Invalid values produce warnings and fall back to defaults.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // -- Detection --
    pub scan_lines: usize,
    /// Lower-cased, one of `TIE_BREAK_VALUES`.
    pub tie_break: String,

    // -- Engine --
    pub max_run_lines: usize,
    pub max_run_millis: u64,

    // -- Batch --
    pub max_concurrency: usize,
    pub max_files: usize,
    pub max_depth: usize,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,

    // -- Templates --
    /// Overrides the default user template directory.
    pub user_template_dir: Option<PathBuf>,
    /// Overrides the default user platform-profile directory.
    pub user_platform_dir: Option<PathBuf>,

    // -- Logging --
    pub log_level: Option<String>,
    pub log_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scan_lines: constants::DEFAULT_DETECTION_SCAN_LINES,
            tie_break: TIE_BREAK_VALUES[0].to_string(),
            max_run_lines: constants::DEFAULT_MAX_RUN_LINES,
            max_run_millis: constants::DEFAULT_MAX_RUN_MILLIS,
            max_concurrency: constants::DEFAULT_MAX_CONCURRENCY,
            max_files: constants::DEFAULT_MAX_FILES,
            max_depth: constants::DEFAULT_MAX_DEPTH,
            include_patterns: constants::DEFAULT_INCLUDE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            exclude_patterns: constants::DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            user_template_dir: None,
            user_platform_dir: None,
            log_level: None,
            log_file: None,
        }
    }
}

/// Load and validate the config file at `config_path`.
///
/// Returns the validated config and a list of non-fatal warnings. A missing
/// file yields defaults with no warnings; an unreadable or unparseable file
/// yields defaults with one warning.
pub fn load_config(config_path: &Path) -> (AppConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config.toml found; using defaults");
        return (AppConfig::default(), warnings);
    }

    let content = match std::fs::read_to_string(config_path) {
        Ok(c) => c,
        Err(e) => {
            let msg = format!(
                "Could not read config file '{}': {e}. Using defaults.",
                config_path.display()
            );
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return (AppConfig::default(), warnings);
        }
    };

    let raw: RawConfig = match toml::from_str(&content) {
        Ok(r) => r,
        Err(e) => {
            let msg = format!(
                "Failed to parse config file '{}': {e}. Using defaults.",
                config_path.display()
            );
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return (AppConfig::default(), warnings);
        }
    };

    tracing::info!(path = %config_path.display(), "Loaded config.toml");

    let (config, validation_warnings) = validate(raw);
    warnings.extend(validation_warnings);

    if !warnings.is_empty() {
        tracing::warn!(count = warnings.len(), "Config validation produced warnings");
    }

    (config, warnings)
}

fn check_range<T>(
    section: &str,
    field: &str,
    value: T,
    range: std::ops::RangeInclusive<T>,
    default: T,
    target: &mut T,
    warnings: &mut Vec<String>,
) where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if range.contains(&value) {
        *target = value;
    } else {
        warnings.push(format!(
            "[{section}] {field} = {value} is out of range ({}-{}). Using default ({default}).",
            range.start(),
            range.end(),
        ));
    }
}

/// Validate each field of `raw` against named constants, accumulating every
/// problem rather than stopping at the first.
pub fn validate(raw: RawConfig) -> (AppConfig, Vec<String>) {
    let mut config = AppConfig::default();
    let mut warnings: Vec<String> = Vec::new();

    // -- Detection --
    if let Some(lines) = raw.detection.scan_lines {
        check_range(
            "detection",
            "scan_lines",
            lines,
            constants::MIN_DETECTION_SCAN_LINES..=constants::MAX_DETECTION_SCAN_LINES,
            constants::DEFAULT_DETECTION_SCAN_LINES,
            &mut config.scan_lines,
            &mut warnings,
        );
    }
    if let Some(ref tie_break) = raw.detection.tie_break {
        let lowered = tie_break.trim().to_lowercase();
        if TIE_BREAK_VALUES.contains(&lowered.as_str()) {
            config.tie_break = lowered;
        } else {
            warnings.push(format!(
                "[detection] tie_break = \"{tie_break}\" is not recognised. \
                 Valid values: specificity, strict. Using default (specificity).",
            ));
        }
    }

    // -- Engine --
    if let Some(lines) = raw.engine.max_lines {
        check_range(
            "engine",
            "max_lines",
            lines,
            1..=constants::ABSOLUTE_MAX_RUN_LINES,
            constants::DEFAULT_MAX_RUN_LINES,
            &mut config.max_run_lines,
            &mut warnings,
        );
    }
    if let Some(millis) = raw.engine.max_run_millis {
        check_range(
            "engine",
            "max_run_millis",
            millis,
            constants::MIN_MAX_RUN_MILLIS..=constants::ABSOLUTE_MAX_RUN_MILLIS,
            constants::DEFAULT_MAX_RUN_MILLIS,
            &mut config.max_run_millis,
            &mut warnings,
        );
    }

    // -- Batch --
    if let Some(threads) = raw.batch.max_concurrency {
        check_range(
            "batch",
            "max_concurrency",
            threads,
            0..=constants::ABSOLUTE_MAX_CONCURRENCY,
            constants::DEFAULT_MAX_CONCURRENCY,
            &mut config.max_concurrency,
            &mut warnings,
        );
    }
    if let Some(files) = raw.batch.max_files {
        check_range(
            "batch",
            "max_files",
            files,
            constants::MIN_MAX_FILES..=constants::ABSOLUTE_MAX_FILES,
            constants::DEFAULT_MAX_FILES,
            &mut config.max_files,
            &mut warnings,
        );
    }
    if let Some(depth) = raw.batch.max_depth {
        check_range(
            "batch",
            "max_depth",
            depth,
            1..=constants::ABSOLUTE_MAX_DEPTH,
            constants::DEFAULT_MAX_DEPTH,
            &mut config.max_depth,
            &mut warnings,
        );
    }
    for (field, patterns, target) in [
        ("include_patterns", raw.batch.include_patterns, &mut config.include_patterns),
        ("exclude_patterns", raw.batch.exclude_patterns, &mut config.exclude_patterns),
    ] {
        let Some(patterns) = patterns else { continue };
        let invalid: Vec<&String> = patterns
            .iter()
            .filter(|p| glob::Pattern::new(p).is_err())
            .collect();
        if invalid.is_empty() {
            *target = patterns;
        } else {
            warnings.push(format!(
                "[batch] {field} contains invalid glob pattern(s) {invalid:?}. Using defaults.",
            ));
        }
    }

    // -- Templates --
    config.user_template_dir = raw
        .templates
        .user_template_directory
        .filter(|d| !d.trim().is_empty())
        .map(PathBuf::from);
    config.user_platform_dir = raw
        .templates
        .user_platform_directory
        .filter(|d| !d.trim().is_empty())
        .map(PathBuf::from);

    // -- Logging --
    if let Some(ref level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level.to_lowercase());
        } else {
            warnings.push(format!(
                "[logging] level = \"{level}\" is not recognised. \
                 Valid values: error, warn, info, debug, trace. Using default (info).",
            ));
        }
    }
    if let Some(ref file) = raw.logging.file {
        if !file.is_empty() {
            config.log_file = Some(file.clone());
        }
    }

    (config, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> (AppConfig, Vec<String>) {
        validate(toml::from_str(toml_text).unwrap())
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, warnings) = load_config(&dir.path().join("config.toml"));
        assert!(warnings.is_empty());
        assert_eq!(config.scan_lines, constants::DEFAULT_DETECTION_SCAN_LINES);
        assert_eq!(config.tie_break, "specificity");
    }

    #[test]
    fn test_valid_values_applied() {
        let (config, warnings) = parse(
            r#"
[detection]
scan_lines = 80
tie_break = "Strict"

[engine]
max_lines = 5000
max_run_millis = 250

[batch]
max_concurrency = 4
include_patterns = ["*.cap"]

[templates]
user_template_directory = "/srv/templates"

[logging]
level = "DEBUG"
"#,
        );
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(config.scan_lines, 80);
        assert_eq!(config.tie_break, "strict");
        assert_eq!(config.max_run_lines, 5000);
        assert_eq!(config.max_run_millis, 250);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.include_patterns, vec!["*.cap".to_string()]);
        assert_eq!(config.user_template_dir, Some(PathBuf::from("/srv/templates")));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_out_of_range_values_warn_and_default() {
        let (config, warnings) = parse(
            r#"
[detection]
scan_lines = 0
tie_break = "coin-flip"

[engine]
max_run_millis = 1

[batch]
max_depth = 999
exclude_patterns = ["["]
"#,
        );
        assert_eq!(warnings.len(), 5, "{warnings:?}");
        assert_eq!(config.scan_lines, constants::DEFAULT_DETECTION_SCAN_LINES);
        assert_eq!(config.tie_break, "specificity");
        assert_eq!(config.max_run_millis, constants::DEFAULT_MAX_RUN_MILLIS);
        assert_eq!(config.max_depth, constants::DEFAULT_MAX_DEPTH);
        assert!(config.exclude_patterns.contains(&".git".to_string()));
    }

    #[test]
    fn test_unparseable_file_warns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[detection\nscan_lines = ").unwrap();
        let (config, warnings) = load_config(&path);
        assert_eq!(warnings.len(), 1);
        assert_eq!(config.max_files, constants::DEFAULT_MAX_FILES);
    }

    #[test]
    fn test_paths_under_config_dir() {
        let paths = PlatformPaths::under(PathBuf::from("/etc/netsleuth"));
        assert_eq!(paths.user_templates_dir, PathBuf::from("/etc/netsleuth/templates"));
        assert_eq!(paths.user_platforms_dir, PathBuf::from("/etc/netsleuth/platforms"));
        assert_eq!(paths.config_file(), PathBuf::from("/etc/netsleuth/config.toml"));
    }
}
