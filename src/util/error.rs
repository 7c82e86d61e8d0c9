// NetSleuth - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// One enum per subsystem; every variant that wraps a lower-level error
// exposes it through `source()` so the full chain reaches the log.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all NetSleuth operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum NetSleuthError {
    /// A template source failed to compile.
    Template(TemplateCompileError),

    /// Platform or command could not be determined from the capture.
    Detection(DetectionError),

    /// The template store could not supply a template.
    Store(StoreError),

    /// A parse run exceeded its budget or hit a template `Error` action.
    Engine(EngineError),

    /// Platform profile loading or validation failed.
    Profile(ProfileError),

    /// Capture discovery failed.
    Discovery(DiscoveryError),

    /// Export operation failed.
    Export(ExportError),

    /// Configuration loading or validation failed.
    Config(ConfigError),

    /// The batch worker pool could not be created.
    WorkerPool(rayon::ThreadPoolBuildError),

    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },
}

impl fmt::Display for NetSleuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(e) => write!(f, "Template error: {e}"),
            Self::Detection(e) => write!(f, "Detection error: {e}"),
            Self::Store(e) => write!(f, "Template store error: {e}"),
            Self::Engine(e) => write!(f, "Parse error: {e}"),
            Self::Profile(e) => write!(f, "Platform profile error: {e}"),
            Self::Discovery(e) => write!(f, "Discovery error: {e}"),
            Self::Export(e) => write!(f, "Export error: {e}"),
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::WorkerPool(e) => write!(f, "Could not start worker pool: {e}"),
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for NetSleuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Template(e) => Some(e),
            Self::Detection(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Engine(e) => Some(e),
            Self::Profile(e) => Some(e),
            Self::Discovery(e) => Some(e),
            Self::Export(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::WorkerPool(e) => Some(e),
            Self::Io { source, .. } => Some(source),
        }
    }
}

impl From<rayon::ThreadPoolBuildError> for NetSleuthError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Self::WorkerPool(e)
    }
}

// ---------------------------------------------------------------------------
// Template compile errors
// ---------------------------------------------------------------------------

/// A template source could not be compiled.
///
/// `line` is the 1-based line of the offending definition, or `None` when
/// the problem concerns the template as a whole (no states, no `Start`).
#[derive(Debug)]
pub struct TemplateCompileError {
    pub template: String,
    pub line: Option<usize>,
    pub kind: CompileErrorKind,
}

/// Reason a template failed to compile.
#[derive(Debug)]
pub enum CompileErrorKind {
    /// A `Value` line does not have the `Value [options] Name (regex)` shape.
    MalformedValue(String),

    /// A value option is not one of Required, List, Filldown, Key, Fillup.
    UnknownOption(String),

    /// The same option appears twice on one value.
    DuplicateOption(String),

    /// A value name is not a word or is too long.
    InvalidValueName(String),

    /// Two values share a name.
    DuplicateValue(String),

    /// A value or rule regex does not compile.
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },

    /// A value or rule regex exceeds the configured maximum length.
    RegexTooLong { length: usize, max_length: usize },

    /// A rule references `${Name}` for an undeclared value.
    UnknownPlaceholder(String),

    /// A state name is not a word, is too long, or is a reserved action word.
    InvalidStateName(String),

    /// Two states share a name.
    DuplicateState(String),

    /// A rule line is not `^regex [-> action]` or its action is malformed.
    MalformedRule(String),

    /// `Continue` combined with a state transition.
    ContinueWithTransition,

    /// A rule transitions to a state that is never defined.
    UnknownState(String),

    /// The reserved `End` or `EOF` state declares rules.
    NonEmptyTerminalState(String),

    /// No `Start` state is defined.
    MissingStartState,

    /// The template defines no states at all.
    NoStates,
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedValue(reason) => write!(f, "malformed value definition: {reason}"),
            Self::UnknownOption(opt) => write!(f, "unknown value option '{opt}'"),
            Self::DuplicateOption(opt) => write!(f, "duplicate value option '{opt}'"),
            Self::InvalidValueName(name) => write!(f, "invalid value name '{name}'"),
            Self::DuplicateValue(name) => write!(f, "duplicate value declaration '{name}'"),
            Self::InvalidRegex { pattern, source } => {
                write!(f, "invalid regex '{pattern}': {source}")
            }
            Self::RegexTooLong { length, max_length } => write!(
                f,
                "regex is {length} chars, exceeds maximum of {max_length}"
            ),
            Self::UnknownPlaceholder(name) => {
                write!(f, "rule references undeclared value '{name}'")
            }
            Self::InvalidStateName(name) => write!(f, "invalid state name '{name}'"),
            Self::DuplicateState(name) => write!(f, "duplicate state '{name}'"),
            Self::MalformedRule(reason) => write!(f, "malformed rule: {reason}"),
            Self::ContinueWithTransition => {
                write!(f, "'Continue' cannot be combined with a state change")
            }
            Self::UnknownState(name) => write!(f, "transition to undefined state '{name}'"),
            Self::NonEmptyTerminalState(name) => {
                write!(f, "reserved state '{name}' must not contain rules")
            }
            Self::MissingStartState => write!(f, "missing required 'Start' state"),
            Self::NoStates => write!(f, "template defines no states"),
        }
    }
}

impl fmt::Display for TemplateCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "'{}' line {line}: {}", self.template, self.kind),
            None => write!(f, "'{}': {}", self.template, self.kind),
        }
    }
}

impl std::error::Error for TemplateCompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            CompileErrorKind::InvalidRegex { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<TemplateCompileError> for NetSleuthError {
    fn from(e: TemplateCompileError) -> Self {
        Self::Template(e)
    }
}

// ---------------------------------------------------------------------------
// Detection errors
// ---------------------------------------------------------------------------

/// The selector could not resolve a (platform, command) key.
/// All variants are recoverable: the caller may retry with an explicit hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionError {
    /// No registered platform signature matched the scan window.
    NoSignatureMatched { scanned_lines: usize },

    /// More than one platform matched with equal specificity.
    Ambiguous { candidates: Vec<String> },

    /// The caller-supplied platform hint names no registered profile.
    UnknownPlatform { platform: String },

    /// The platform is known but no window line invokes one of its commands.
    CommandNotInferred { platform: String },

    /// No platform profiles are registered.
    NoProfiles,
}

impl fmt::Display for DetectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSignatureMatched { scanned_lines } => write!(
                f,
                "no platform signature matched in the first {scanned_lines} lines; \
                 supply a platform hint"
            ),
            Self::Ambiguous { candidates } => write!(
                f,
                "platform is ambiguous between {}; supply a platform hint",
                candidates.join(", ")
            ),
            Self::UnknownPlatform { platform } => {
                write!(f, "unknown platform '{platform}'")
            }
            Self::CommandNotInferred { platform } => write!(
                f,
                "no known '{platform}' command line found; supply a command hint"
            ),
            Self::NoProfiles => write!(f, "no platform profiles are loaded"),
        }
    }
}

impl std::error::Error for DetectionError {}

impl From<DetectionError> for NetSleuthError {
    fn from(e: DetectionError) -> Self {
        Self::Detection(e)
    }
}

// ---------------------------------------------------------------------------
// Template store errors
// ---------------------------------------------------------------------------

/// Errors raised by a template store.
#[derive(Debug)]
pub enum StoreError {
    /// The store has no template for the resolved key.
    NotFound { platform: String, command: String },

    /// Template source file exceeds the maximum allowed size.
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    /// I/O error reading a template source.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { platform, command } => write!(
                f,
                "unsupported platform/command: no template for '{platform}' '{command}'"
            ),
            Self::FileTooLarge {
                path,
                size,
                max_size,
            } => write!(
                f,
                "Template '{}' is {size} bytes, exceeds maximum of {max_size} bytes",
                path.display()
            ),
            Self::Io { path, source } => {
                write!(
                    f,
                    "I/O error reading template '{}': {source}",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<StoreError> for NetSleuthError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

/// Which per-run budget was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutBudget {
    Lines(usize),
    Time(Duration),
}

/// A parse run exceeded its line or wall-clock budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeout {
    pub template: String,
    pub lines_processed: usize,
    pub budget: TimeoutBudget,
}

impl fmt::Display for ParseTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.budget {
            TimeoutBudget::Lines(max) => write!(
                f,
                "'{}' stopped after {} lines: line budget of {max} exceeded",
                self.template, self.lines_processed
            ),
            TimeoutBudget::Time(max) => write!(
                f,
                "'{}' stopped after {} lines: time budget of {} ms exceeded",
                self.template,
                self.lines_processed,
                max.as_millis()
            ),
        }
    }
}

/// Errors raised while running a compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The run exceeded its line or time budget.
    Timeout(ParseTimeout),

    /// A rule with the `Error` line action fired.
    ErrorAction {
        template: String,
        message: Option<String>,
        rule_line: usize,
        input_line: usize,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(t) => write!(f, "parse timeout: {t}"),
            Self::ErrorAction {
                template,
                message,
                rule_line,
                input_line,
            } => {
                write!(
                    f,
                    "'{template}' rule at line {rule_line} aborted on input line {input_line}"
                )?;
                if let Some(msg) = message {
                    write!(f, ": {msg}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ParseTimeout> for EngineError {
    fn from(t: ParseTimeout) -> Self {
        Self::Timeout(t)
    }
}

impl From<EngineError> for NetSleuthError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

// ---------------------------------------------------------------------------
// Profile errors
// ---------------------------------------------------------------------------

/// Errors related to platform profile loading and validation.
#[derive(Debug)]
pub enum ProfileError {
    /// TOML file could not be parsed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Profile file exceeds the maximum allowed size.
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    /// A required field is missing or empty.
    MissingField {
        profile_id: String,
        field: &'static str,
    },

    /// A detection signature regex is invalid.
    InvalidRegex {
        profile_id: String,
        field: &'static str,
        pattern: String,
        source: regex::Error,
    },

    /// A regex pattern exceeds the maximum allowed length.
    RegexTooLong {
        profile_id: String,
        field: &'static str,
        length: usize,
        max_length: usize,
    },

    /// A view mapping references a command the profile does not list.
    UnknownViewCommand {
        profile_id: String,
        view: &'static str,
        command: String,
    },

    /// Two user profiles declare the same id.
    DuplicateId {
        id: String,
        path1: PathBuf,
        path2: PathBuf,
    },

    /// Maximum number of profiles exceeded.
    TooManyProfiles { count: usize, max: usize },

    /// I/O error reading a profile file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Failed to parse TOML '{}': {source}", path.display())
            }
            Self::FileTooLarge {
                path,
                size,
                max_size,
            } => write!(
                f,
                "Profile '{}' is {size} bytes, exceeds maximum of {max_size} bytes",
                path.display()
            ),
            Self::MissingField { profile_id, field } => {
                write!(
                    f,
                    "Profile '{profile_id}': missing required field '{field}'"
                )
            }
            Self::InvalidRegex {
                profile_id,
                field,
                pattern,
                source,
            } => write!(
                f,
                "Profile '{profile_id}': invalid regex in '{field}' ('{pattern}'): {source}"
            ),
            Self::RegexTooLong {
                profile_id,
                field,
                length,
                max_length,
            } => write!(
                f,
                "Profile '{profile_id}': regex in '{field}' is {length} chars, \
                 exceeds maximum of {max_length}"
            ),
            Self::UnknownViewCommand {
                profile_id,
                view,
                command,
            } => write!(
                f,
                "Profile '{profile_id}': view '{view}' uses command '{command}' \
                 which is not in [commands]"
            ),
            Self::DuplicateId { id, path1, path2 } => write!(
                f,
                "Duplicate platform id '{id}' in '{}' and '{}'",
                path1.display(),
                path2.display()
            ),
            Self::TooManyProfiles { count, max } => {
                write!(f, "Too many profiles loaded ({count}), maximum is {max}")
            }
            Self::Io { path, source } => {
                write!(
                    f,
                    "I/O error reading profile '{}': {source}",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for ProfileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::InvalidRegex { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ProfileError> for NetSleuthError {
    fn from(e: ProfileError) -> Self {
        Self::Profile(e)
    }
}

// ---------------------------------------------------------------------------
// Discovery errors
// ---------------------------------------------------------------------------

/// Errors related to capture file discovery.
#[derive(Debug)]
pub enum DiscoveryError {
    /// The root path does not exist or is not accessible.
    RootNotFound { path: PathBuf },

    /// The root path is not a directory.
    NotADirectory { path: PathBuf },

    /// An include or exclude glob pattern is invalid.
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },

    /// Walkdir traversal error on the root itself.
    Traversal {
        path: PathBuf,
        source: walkdir::Error,
    },
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootNotFound { path } => {
                write!(f, "Capture path '{}' does not exist", path.display())
            }
            Self::NotADirectory { path } => {
                write!(f, "Capture path '{}' is not a directory", path.display())
            }
            Self::InvalidPattern { pattern, source } => {
                write!(f, "Invalid glob pattern '{pattern}': {source}")
            }
            Self::Traversal { path, source } => {
                write!(f, "Error traversing '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidPattern { source, .. } => Some(source),
            Self::Traversal { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<DiscoveryError> for NetSleuthError {
    fn from(e: DiscoveryError) -> Self {
        Self::Discovery(e)
    }
}

// ---------------------------------------------------------------------------
// Export errors
// ---------------------------------------------------------------------------

/// Errors related to export and result persistence.
#[derive(Debug)]
pub enum ExportError {
    /// I/O error writing the export file.
    Io { path: PathBuf, source: io::Error },

    /// CSV serialisation error.
    Csv { path: PathBuf, source: csv::Error },

    /// JSON serialisation error.
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "Export I/O error '{}': {source}", path.display())
            }
            Self::Csv { path, source } => {
                write!(f, "CSV export error '{}': {source}", path.display())
            }
            Self::Json { path, source } => {
                write!(f, "JSON export error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Csv { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
        }
    }
}

impl From<ExportError> for NetSleuthError {
    fn from(e: ExportError) -> Self {
        Self::Export(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// I/O error reading config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for NetSleuthError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Convenience type alias for NetSleuth results.
pub type Result<T> = std::result::Result<T, NetSleuthError>;
