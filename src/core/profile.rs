// NetSleuth - core/profile.rs
//
// Platform profile loading and validation.
// Core layer: accepts TOML strings, never touches the filesystem.
// I/O is handled by app::profile_mgr which feeds content here.
//
// A platform profile declares how to recognise a device family (banner
// signatures, command verbs), which commands it knows, where its templates
// live, and how raw template fields map onto the domain views.

use crate::core::selector::normalize_command;
use crate::util::constants;
use crate::util::error::ProfileError;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

// =============================================================================
// TOML deserialization structures (raw input)
// =============================================================================

/// Raw TOML profile definition as deserialized from a .toml file.
/// This is validated and compiled into a `PlatformProfile` for runtime use.
#[derive(Debug, Deserialize)]
pub struct ProfileDefinition {
    pub platform: PlatformMeta,
    pub detection: DetectionDef,
    pub commands: CommandsDef,
    #[serde(default)]
    pub views: ViewMappings,
}

#[derive(Debug, Deserialize)]
pub struct PlatformMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Reuse another platform's templates (e.g. a rebranded OS).
    #[serde(default)]
    pub templates_from: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DetectionDef {
    /// Regexes tested against the capture's first lines.
    pub signatures: Vec<String>,
    /// Words every command of the platform starts with (`show`, `display`).
    #[serde(default)]
    pub command_verbs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommandsDef {
    pub known: Vec<String>,
}

// =============================================================================
// View mapping tables
// =============================================================================

/// Template field(s) feeding one canonical view field. With several
/// candidates the first non-empty one wins.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FieldSource {
    One(String),
    Many(Vec<String>),
}

impl FieldSource {
    pub fn candidates(&self) -> &[String] {
        match self {
            Self::One(name) => std::slice::from_ref(name),
            Self::Many(names) => names,
        }
    }
}

/// Maps the records of one command onto a row-shaped view.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableMapping {
    pub command: String,
    /// Canonical field name -> template value name(s).
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSource>,
}

/// Where the CPU and memory figures come from.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuMemoryMapping {
    #[serde(default)]
    pub cpu_command: Option<String>,
    /// Field holding the average utilisation percentage.
    #[serde(default)]
    pub cpu_avg_field: Option<String>,
    /// Fields whose maximum is the peak utilisation; empty means the
    /// average doubles as the peak.
    #[serde(default)]
    pub cpu_max_fields: Vec<String>,
    /// Field holding idle percentage; utilisation is 100 - idle.
    #[serde(default)]
    pub cpu_idle_field: Option<String>,

    #[serde(default)]
    pub memory_command: Option<String>,
    #[serde(default)]
    pub memory_percent_field: Option<String>,
    #[serde(default)]
    pub memory_total_field: Option<String>,
    #[serde(default)]
    pub memory_used_field: Option<String>,
    #[serde(default)]
    pub memory_free_field: Option<String>,

    /// Utilisation graph preferred over `cpu_command` when its output was
    /// captured.
    #[serde(default)]
    pub cpu_history: Option<CpuHistoryMapping>,
}

/// An ASCII CPU utilisation graph. Peak values are printed as digit rows
/// above the plot, one column per sample; averages are the gridlines
/// holding a `#`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuHistoryMapping {
    pub command: String,
    /// List value holding the untrimmed digit rows, most significant first.
    pub peak_rows_field: String,
    /// List value holding the gridline labels of rows marked `#`, top down.
    pub average_levels_field: String,
}

/// Per-platform field normalisation for every domain view.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewMappings {
    #[serde(default)]
    pub summary: Option<TableMapping>,
    #[serde(default)]
    pub inventory: Option<TableMapping>,
    #[serde(default)]
    pub interfaces: Option<TableMapping>,
    #[serde(default)]
    pub cpu_memory: Option<CpuMemoryMapping>,
}

// =============================================================================
// Compiled profile
// =============================================================================

/// A compiled detection signature.
#[derive(Debug, Clone)]
pub struct Signature {
    pub pattern: String,
    pub regex: Regex,
}

impl Signature {
    /// True when the pattern is anchored at line start. A leading inline
    /// flag group such as `(?i)` is skipped.
    pub fn is_anchored(&self) -> bool {
        let mut rest = self.pattern.as_str();
        while let Some(flags) = rest.strip_prefix("(?") {
            match flags.find(')') {
                Some(end) if flags[..end].chars().all(|c| c.is_ascii_alphabetic() || c == '-') => {
                    rest = &flags[end + 1..];
                }
                _ => break,
            }
        }
        rest.starts_with('^')
    }
}

/// A validated platform profile ready for detection and aggregation.
#[derive(Debug, Clone)]
pub struct PlatformProfile {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Platform id under which this profile's templates are stored.
    pub template_platform: String,
    pub signatures: Vec<Signature>,
    /// Lower-cased command verbs.
    pub command_verbs: Vec<String>,
    /// Normalised known commands, in declaration order.
    pub commands: Vec<String>,
    pub views: ViewMappings,
    pub is_builtin: bool,
}

impl PlatformProfile {
    pub fn knows_command(&self, command: &str) -> bool {
        self.commands.iter().any(|c| c == command)
    }
}

/// Parse a TOML string into a `ProfileDefinition`.
///
/// `source_path` is used for error messages only (not for I/O).
pub fn parse_profile_toml(
    toml_content: &str,
    source_path: &PathBuf,
) -> Result<ProfileDefinition, ProfileError> {
    toml::from_str(toml_content).map_err(|e| ProfileError::TomlParse {
        path: source_path.clone(),
        source: e,
    })
}

/// Validate a `ProfileDefinition` and compile it into a `PlatformProfile`.
///
/// Validates:
/// - Required fields are present and non-empty
/// - Signature regexes are valid and within size limits
/// - Every view mapping uses a command listed in `[commands]`
pub fn validate_and_compile(
    def: ProfileDefinition,
    source_path: &PathBuf,
    is_builtin: bool,
) -> Result<PlatformProfile, ProfileError> {
    let id = &def.platform.id;

    if id.is_empty() {
        return Err(ProfileError::MissingField {
            profile_id: "(empty)".to_string(),
            field: "platform.id",
        });
    }
    if def.platform.name.is_empty() {
        return Err(ProfileError::MissingField {
            profile_id: id.clone(),
            field: "platform.name",
        });
    }
    if def.detection.signatures.is_empty() {
        return Err(ProfileError::MissingField {
            profile_id: id.clone(),
            field: "detection.signatures",
        });
    }
    if def.commands.known.is_empty() {
        return Err(ProfileError::MissingField {
            profile_id: id.clone(),
            field: "commands.known",
        });
    }

    let signatures = def
        .detection
        .signatures
        .iter()
        .map(|pattern| {
            compile_regex(id, "detection.signatures", pattern).map(|regex| Signature {
                pattern: pattern.clone(),
                regex,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut commands: Vec<String> = Vec::with_capacity(def.commands.known.len());
    for raw in &def.commands.known {
        let command = normalize_command(raw);
        if command.is_empty() {
            return Err(ProfileError::MissingField {
                profile_id: id.clone(),
                field: "commands.known",
            });
        }
        if !commands.contains(&command) {
            commands.push(command);
        }
    }

    let mut views = def.views;
    normalize_view_commands(&mut views);
    check_view_commands(id, &views, &commands)?;

    let template_platform = match def.platform.templates_from {
        Some(alias) if !alias.is_empty() => alias,
        _ => id.clone(),
    };

    tracing::debug!(
        profile_id = %id,
        source = %source_path.display(),
        signatures = signatures.len(),
        commands = commands.len(),
        "Compiled platform profile"
    );

    Ok(PlatformProfile {
        id: id.clone(),
        name: def.platform.name,
        description: def.platform.description,
        template_platform,
        signatures,
        command_verbs: def
            .detection
            .command_verbs
            .iter()
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .collect(),
        commands,
        views,
        is_builtin,
    })
}

fn normalize_view_commands(views: &mut ViewMappings) {
    for table in [&mut views.summary, &mut views.inventory, &mut views.interfaces]
        .into_iter()
        .flatten()
    {
        table.command = normalize_command(&table.command);
    }
    if let Some(cm) = views.cpu_memory.as_mut() {
        for cmd in [&mut cm.cpu_command, &mut cm.memory_command]
            .into_iter()
            .flatten()
        {
            *cmd = normalize_command(cmd);
        }
        if let Some(history) = cm.cpu_history.as_mut() {
            history.command = normalize_command(&history.command);
        }
    }
}

fn check_view_commands(
    id: &str,
    views: &ViewMappings,
    commands: &[String],
) -> Result<(), ProfileError> {
    let mut used: Vec<(&'static str, &str)> = Vec::new();
    if let Some(t) = &views.summary {
        used.push(("summary", &t.command));
    }
    if let Some(t) = &views.inventory {
        used.push(("inventory", &t.command));
    }
    if let Some(t) = &views.interfaces {
        used.push(("interfaces", &t.command));
    }
    if let Some(cm) = &views.cpu_memory {
        if let Some(c) = &cm.cpu_command {
            used.push(("cpu_memory", c));
        }
        if let Some(c) = &cm.memory_command {
            used.push(("cpu_memory", c));
        }
        if let Some(h) = &cm.cpu_history {
            used.push(("cpu_memory", &h.command));
        }
    }

    for (view, command) in used {
        if !commands.iter().any(|c| c == command) {
            return Err(ProfileError::UnknownViewCommand {
                profile_id: id.to_string(),
                view,
                command: command.to_string(),
            });
        }
    }
    Ok(())
}

/// Compile a detection signature with length validation. Signatures always
/// match case-insensitively.
fn compile_regex(
    profile_id: &str,
    field: &'static str,
    pattern: &str,
) -> Result<Regex, ProfileError> {
    if pattern.len() > constants::MAX_REGEX_PATTERN_LENGTH {
        return Err(ProfileError::RegexTooLong {
            profile_id: profile_id.to_string(),
            field,
            length: pattern.len(),
            max_length: constants::MAX_REGEX_PATTERN_LENGTH,
        });
    }

    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| ProfileError::InvalidRegex {
            profile_id: profile_id.to_string(),
            field,
            pattern: pattern.to_string(),
            source: e,
        })
}

// =============================================================================
// Built-in profiles (embedded at compile time)
// =============================================================================

/// Embedded TOML content for built-in platform profiles.
/// Each tuple is (filename, TOML content).
pub fn builtin_profile_sources() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "cisco_ios.toml",
            include_str!("../../platforms/cisco_ios.toml"),
        ),
        (
            "cisco_nxos.toml",
            include_str!("../../platforms/cisco_nxos.toml"),
        ),
        (
            "aruba_aoscx.toml",
            include_str!("../../platforms/aruba_aoscx.toml"),
        ),
        (
            "huawei_vrp.toml",
            include_str!("../../platforms/huawei_vrp.toml"),
        ),
        (
            "huawei_yunshan.toml",
            include_str!("../../platforms/huawei_yunshan.toml"),
        ),
    ]
}

/// Load and validate all built-in profiles.
///
/// Invalid profiles are logged and skipped (non-fatal).
pub fn load_builtin_profiles() -> Vec<PlatformProfile> {
    let mut profiles = Vec::new();
    let mut failures = 0usize;

    for (filename, content) in builtin_profile_sources() {
        let path = PathBuf::from(format!("<builtin>/{filename}"));
        match parse_profile_toml(content, &path)
            .and_then(|def| validate_and_compile(def, &path, true))
        {
            Ok(profile) => {
                tracing::debug!(profile_id = %profile.id, "Loaded built-in platform profile");
                profiles.push(profile);
            }
            Err(e) => {
                tracing::error!(file = filename, error = %e, "Failed to load built-in platform profile");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        tracing::warn!(count = failures, "Some built-in platform profiles failed to load");
    }

    profiles
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_PROFILE_TOML: &str = r#"
[platform]
id = "lab_os"
name = "Lab OS"
description = "A test platform"

[detection]
signatures = ['^Lab OS Software', 'LabOS']
command_verbs = ["Show"]

[commands]
known = ["show version", "show  Interfaces", "show version"]

[views.summary]
command = "show version"
[views.summary.fields]
hostname = "HOSTNAME"
serial = ["SERIAL", "CHASSIS_SERIAL"]

[views.cpu_memory]
cpu_command = "show version"
cpu_avg_field = "CPU"
"#;

    fn compile(toml: &str) -> Result<PlatformProfile, ProfileError> {
        let path = PathBuf::from("test.toml");
        let def = parse_profile_toml(toml, &path)?;
        validate_and_compile(def, &path, false)
    }

    #[test]
    fn test_compile_valid_profile() {
        let profile = compile(VALID_PROFILE_TOML).unwrap();
        assert_eq!(profile.id, "lab_os");
        assert_eq!(profile.template_platform, "lab_os");
        assert!(!profile.is_builtin);
        assert_eq!(profile.signatures.len(), 2);
        assert!(profile.signatures[0].is_anchored());
        assert!(!profile.signatures[1].is_anchored());
        assert_eq!(profile.command_verbs, vec!["show"]);
        // Normalised and de-duplicated.
        assert_eq!(profile.commands, vec!["show version", "show interfaces"]);
        assert!(profile.knows_command("show interfaces"));
    }

    #[test]
    fn test_field_source_candidates() {
        let profile = compile(VALID_PROFILE_TOML).unwrap();
        let summary = profile.views.summary.unwrap();
        assert_eq!(summary.fields["hostname"].candidates(), ["HOSTNAME"]);
        assert_eq!(
            summary.fields["serial"].candidates(),
            ["SERIAL", "CHASSIS_SERIAL"]
        );
    }

    #[test]
    fn test_templates_from_alias() {
        let toml = VALID_PROFILE_TOML.replace(
            "description = \"A test platform\"",
            "templates_from = \"other_os\"",
        );
        let profile = compile(&toml).unwrap();
        assert_eq!(profile.template_platform, "other_os");
    }

    #[test]
    fn test_missing_required_field() {
        let toml = r#"
[platform]
id = ""
name = "Empty ID"

[detection]
signatures = ["x"]

[commands]
known = ["show x"]
"#;
        match compile(toml).unwrap_err() {
            ProfileError::MissingField { field, .. } => assert_eq!(field, "platform.id"),
            other => panic!("Expected MissingField, got: {other:?}"),
        }
    }

    #[test]
    fn test_empty_signatures_rejected() {
        let toml = r#"
[platform]
id = "p"
name = "P"

[detection]
signatures = []

[commands]
known = ["show x"]
"#;
        assert!(matches!(
            compile(toml).unwrap_err(),
            ProfileError::MissingField { field: "detection.signatures", .. }
        ));
    }

    #[test]
    fn test_invalid_regex() {
        let toml = r#"
[platform]
id = "bad-regex"
name = "Bad Regex"

[detection]
signatures = ["[invalid"]

[commands]
known = ["show x"]
"#;
        assert!(matches!(
            compile(toml).unwrap_err(),
            ProfileError::InvalidRegex { .. }
        ));
    }

    #[test]
    fn test_regex_too_long() {
        let long_pattern = "a".repeat(constants::MAX_REGEX_PATTERN_LENGTH + 1);
        let toml = format!(
            r#"
[platform]
id = "long-regex"
name = "Long Regex"

[detection]
signatures = ['{long_pattern}']

[commands]
known = ["show x"]
"#
        );
        assert!(matches!(
            compile(&toml).unwrap_err(),
            ProfileError::RegexTooLong { .. }
        ));
    }

    #[test]
    fn test_view_with_unknown_command_rejected() {
        let toml = VALID_PROFILE_TOML.replace(
            "cpu_command = \"show version\"",
            "cpu_command = \"show processes cpu\"",
        );
        match compile(&toml).unwrap_err() {
            ProfileError::UnknownViewCommand { view, command, .. } => {
                assert_eq!(view, "cpu_memory");
                assert_eq!(command, "show processes cpu");
            }
            other => panic!("Expected UnknownViewCommand, got: {other:?}"),
        }
    }

    #[test]
    fn test_cpu_history_command_normalised_and_checked() {
        let history = "\n[views.cpu_memory.cpu_history]\ncommand = \"SHOW  Version\"\npeak_rows_field = \"PEAK\"\naverage_levels_field = \"AVG\"\n";
        let profile = compile(&format!("{VALID_PROFILE_TOML}{history}")).unwrap();
        let mapping = profile.views.cpu_memory.unwrap().cpu_history.unwrap();
        assert_eq!(mapping.command, "show version");
        assert_eq!(mapping.peak_rows_field, "PEAK");

        let unknown = history.replace("SHOW  Version", "show processes cpu history");
        match compile(&format!("{VALID_PROFILE_TOML}{unknown}")).unwrap_err() {
            ProfileError::UnknownViewCommand { command, .. } => {
                assert_eq!(command, "show processes cpu history");
            }
            other => panic!("Expected UnknownViewCommand, got: {other:?}"),
        }
    }

    #[test]
    fn test_signatures_match_any_case() {
        let profile = compile(VALID_PROFILE_TOML).unwrap();
        assert!(profile.signatures[0].regex.is_match("LAB OS SOFTWARE, Version 1"));
        assert!(profile.signatures[1].regex.is_match("running labos 2.0"));
    }

    #[test]
    fn test_inline_flags_keep_anchor() {
        let toml = VALID_PROFILE_TOML.replace("'^Lab OS Software'", "'(?i)^Lab OS Software'");
        let profile = compile(&toml).unwrap();
        assert!(profile.signatures[0].is_anchored());
        assert!(profile.signatures[0].regex.is_match("lab os software"));
    }

    #[test]
    fn test_toml_parse_error() {
        assert!(matches!(
            compile("[platform\nid = 1").unwrap_err(),
            ProfileError::TomlParse { .. }
        ));
    }

    #[test]
    fn test_load_builtin_profiles() {
        let profiles = load_builtin_profiles();
        assert_eq!(
            profiles.len(),
            builtin_profile_sources().len(),
            "every built-in profile should load"
        );
        assert!(profiles.iter().all(|p| p.is_builtin));
        let yunshan = profiles
            .iter()
            .find(|p| p.id == "huawei_yunshan")
            .expect("huawei_yunshan profile not found");
        assert_eq!(yunshan.template_platform, "huawei_vrp");
    }
}
