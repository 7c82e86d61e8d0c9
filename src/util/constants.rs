// NetSleuth - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.
// Every configurable limit has a default, a lower bound and a hard upper bound.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "NetSleuth";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "NetSleuth";

/// Current application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Platform detection
// =============================================================================

/// Number of lines from the start of a capture inspected for platform
/// signatures and the invoked command line.
pub const DEFAULT_DETECTION_SCAN_LINES: usize = 50;

/// Minimum user-configurable scan window.
pub const MIN_DETECTION_SCAN_LINES: usize = 1;

/// Maximum user-configurable scan window.
pub const MAX_DETECTION_SCAN_LINES: usize = 10_000;

/// Platform id reported when a capture carries no usable text and no hint.
pub const UNKNOWN_PLATFORM_ID: &str = "unknown";

// =============================================================================
// Execution engine budgets
// =============================================================================

/// Default maximum number of input lines a single parse run may consume.
pub const DEFAULT_MAX_RUN_LINES: usize = 1_000_000;

/// Hard upper bound on the per-run line budget.
pub const ABSOLUTE_MAX_RUN_LINES: usize = 50_000_000;

/// Default wall-clock budget for a single parse run (milliseconds).
pub const DEFAULT_MAX_RUN_MILLIS: u64 = 10_000;

/// Minimum user-configurable wall-clock budget (milliseconds).
pub const MIN_MAX_RUN_MILLIS: u64 = 10;

/// Maximum user-configurable wall-clock budget (milliseconds).
pub const ABSOLUTE_MAX_RUN_MILLIS: u64 = 600_000; // 10 min

/// The engine reads the clock once every this many input lines.
pub const TIME_CHECK_INTERVAL_LINES: usize = 256;

// =============================================================================
// Template limits
// =============================================================================

/// Maximum size of a template source file in bytes.
pub const MAX_TEMPLATE_FILE_SIZE: u64 = 256 * 1024; // 256 KB

/// Maximum length of a single value or rule regex, after placeholder
/// substitution, to bound regex compile cost.
pub const MAX_REGEX_PATTERN_LENGTH: usize = 4_096;

/// Maximum length of a value name.
pub const MAX_VALUE_NAME_LENGTH: usize = 48;

/// Maximum length of a state name.
pub const MAX_STATE_NAME_LENGTH: usize = 32;

/// Template source file extension.
pub const TEMPLATE_FILE_EXTENSION: &str = "textfsm";

/// Maximum number of template files scanned in a user template directory.
pub const MAX_USER_TEMPLATES: usize = 2_000;

// =============================================================================
// Platform profile limits
// =============================================================================

/// Maximum number of platform profiles that can be loaded (built-in + user).
pub const MAX_PROFILES: usize = 100;

/// Maximum size of a platform profile TOML file in bytes.
pub const MAX_PROFILE_FILE_SIZE: u64 = 64 * 1024; // 64 KB

// =============================================================================
// Batch limits
// =============================================================================

/// Default number of worker threads for batch parsing.
/// 0 means auto-detect (use available CPU cores).
pub const DEFAULT_MAX_CONCURRENCY: usize = 0;

/// Hard upper bound on batch worker threads.
pub const ABSOLUTE_MAX_CONCURRENCY: usize = 256;

/// Maximum directory recursion depth during capture discovery.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Hard upper bound on max depth.
pub const ABSOLUTE_MAX_DEPTH: usize = 50;

/// Minimum sensible value for the max-files limit.
pub const MIN_MAX_FILES: usize = 1;

/// Maximum number of capture files discovered in a single batch.
pub const DEFAULT_MAX_FILES: usize = 500;

/// Hard upper bound on max files.
pub const ABSOLUTE_MAX_FILES: usize = 10_000;

/// Captures larger than this are memory-mapped instead of read into a buffer.
pub const MMAP_THRESHOLD_BYTES: u64 = 1024 * 1024; // 1 MB

/// Back-off delays for transient read failures (file locked by a collector).
pub const READ_RETRY_DELAYS_MS: &[u64] = &[50, 200, 500];

/// Default include glob patterns for capture discovery.
pub const DEFAULT_INCLUDE_PATTERNS: &[&str] = &["*.txt", "*.log"];

/// Default exclude glob patterns for capture discovery.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &["*.gz", "*.zip", "*.bak", "*.tmp", ".git"];

/// Maximum number of warnings attached to a single device report.
pub const MAX_REPORT_WARNINGS: usize = 200;

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Maximum length of a capture line included in debug output.
pub const DEBUG_MAX_LINE_PREVIEW: usize = 200;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// User templates subdirectory name.
pub const TEMPLATES_DIR_NAME: &str = "templates";

/// User platform profiles subdirectory name.
pub const PLATFORMS_DIR_NAME: &str = "platforms";
