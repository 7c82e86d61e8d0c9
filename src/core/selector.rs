// NetSleuth - core/selector.rs
//
// Platform and command selection for unlabeled captures.
//
// Only the first `scan_lines` lines are inspected. A platform matches when
// one of its signatures hits a window line and, if it declares command verbs,
// some window line invokes one of them. Competing matches are ranked by
// specificity (anchored beats unanchored, then longer matched text); a tie is
// reported as ambiguous rather than guessed.

use crate::core::model::{ParseHint, TemplateKey};
use crate::core::profile::PlatformProfile;
use crate::util::constants;
use crate::util::error::DetectionError;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Configuration
// =============================================================================

/// How competing platform matches are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    /// The strictly most specific match wins; equal scores are ambiguous.
    #[default]
    Specificity,
    /// Any second match is ambiguous.
    Strict,
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "specificity" => Ok(Self::Specificity),
            "strict" => Ok(Self::Strict),
            other => Err(format!(
                "unknown tie-break '{other}' (expected 'specificity' or 'strict')"
            )),
        }
    }
}

impl fmt::Display for TieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Specificity => "specificity",
            Self::Strict => "strict",
        })
    }
}

/// Selector tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorConfig {
    pub scan_lines: usize,
    pub tie_break: TieBreak,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            scan_lines: constants::DEFAULT_DETECTION_SCAN_LINES,
            tie_break: TieBreak::default(),
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Strength of a signature match. Field order is the comparison order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    pub anchored: bool,
    pub matched_len: usize,
}

/// A platform whose signatures matched the scan window.
#[derive(Debug, Clone)]
pub struct PlatformMatch<'a> {
    pub profile: &'a PlatformProfile,
    pub specificity: Specificity,
}

/// A resolved (platform, command) pair and the template key it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub platform: String,
    pub command: String,
    pub key: TemplateKey,
}

/// One command's output inside a multi-command capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSection<'a> {
    /// Canonical known command.
    pub command: String,
    /// 1-based line number of the command line.
    pub start_line: usize,
    /// Output lines following the command line, up to the next command.
    pub body: &'a str,
}

// =============================================================================
// Command-line helpers
// =============================================================================

fn is_prompt_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | ':' | '@' | '/' | '(' | ')')
}

/// Split an optional device prompt (`Router#`, `switch>`, `<HUAWEI>`,
/// `[HUAWEI]`, `user@host$`) off the start of a line.
/// Returns whether a prompt was present and the remaining text.
pub fn strip_prompt(line: &str) -> (bool, &str) {
    let s = line.trim_start();
    let closing = match s.chars().next() {
        Some('<') => Some('>'),
        Some('[') => Some(']'),
        _ => None,
    };
    if let Some(close) = closing {
        if let Some(end) = s.find(close).filter(|&end| end > 1) {
            return (true, s[end + 1..].trim_start());
        }
    }

    let host_end = s.find(|c: char| !is_prompt_char(c)).unwrap_or(s.len());
    match s[host_end..].chars().next() {
        Some(c @ ('#' | '>' | '$')) => (true, s[host_end + c.len_utf8()..].trim_start()),
        _ => (false, s),
    }
}

/// Canonical command spelling: output modifiers (`| include ...`) dropped,
/// whitespace collapsed, lower-cased.
pub fn normalize_command(raw: &str) -> String {
    let head = raw.split('|').next().unwrap_or("");
    head.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// The longest known command that `command` invokes, exactly or followed by
/// arguments (`show interfaces` beats `show interface`).
pub fn match_known_command<'p>(profile: &'p PlatformProfile, command: &str) -> Option<&'p str> {
    profile
        .commands
        .iter()
        .filter(|known| {
            command == known.as_str()
                || (command.starts_with(known.as_str())
                    && command[known.len()..].starts_with(' '))
        })
        .max_by_key(|known| known.len())
        .map(String::as_str)
}

/// The known command invoked on `line`, if the line is a command line.
fn known_command_on_line<'p>(profile: &'p PlatformProfile, line: &str) -> Option<&'p str> {
    let (_, rest) = strip_prompt(line);
    match_known_command(profile, &normalize_command(rest))
}

fn invokes_verb(profile: &PlatformProfile, line: &str) -> bool {
    let (_, rest) = strip_prompt(line);
    let command = normalize_command(rest);
    profile.command_verbs.iter().any(|verb| {
        command == *verb
            || (command.starts_with(verb.as_str()) && command[verb.len()..].starts_with(' '))
    })
}

/// Split a capture into per-command sections.
///
/// A section starts at each line invoking a command the profile knows. A
/// prompted line invoking any other command ends the current section without
/// starting a new one. Lines before the first known command are ignored.
pub fn split_sections<'a>(text: &'a str, profile: &PlatformProfile) -> Vec<CommandSection<'a>> {
    let mut sections = Vec::new();
    let mut open: Option<(String, usize, usize)> = None; // (command, line, body start)
    let mut offset = 0usize;

    for (idx, raw_line) in text.split_inclusive('\n').enumerate() {
        let line_start = offset;
        offset += raw_line.len();
        let line = raw_line.trim_end_matches(|c: char| c == '\n' || c == '\r');

        let known = known_command_on_line(profile, line);
        let ends_section = known.is_some() || {
            let (prompted, rest) = strip_prompt(line);
            prompted && invokes_verb(profile, rest)
        };
        if !ends_section {
            continue;
        }

        if let Some((command, start_line, body_start)) = open.take() {
            sections.push(CommandSection {
                command,
                start_line,
                body: &text[body_start..line_start],
            });
        }
        if let Some(command) = known {
            open = Some((command.to_string(), idx + 1, offset));
        }
    }

    if let Some((command, start_line, body_start)) = open {
        sections.push(CommandSection {
            command,
            start_line,
            body: &text[body_start..],
        });
    }
    sections
}

// =============================================================================
// Selector
// =============================================================================

/// Chooses the platform profile and command for a capture.
#[derive(Debug, Clone)]
pub struct Selector {
    profiles: Vec<PlatformProfile>,
    config: SelectorConfig,
}

impl Selector {
    pub fn new(profiles: Vec<PlatformProfile>, config: SelectorConfig) -> Self {
        Self { profiles, config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn profiles(&self) -> &[PlatformProfile] {
        &self.profiles
    }

    pub fn profile(&self, id: &str) -> Option<&PlatformProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    fn window<'t>(&self, text: &'t str) -> Vec<&'t str> {
        text.lines().take(self.config.scan_lines).collect()
    }

    fn score(profile: &PlatformProfile, window: &[&str]) -> Option<Specificity> {
        let best = profile
            .signatures
            .iter()
            .flat_map(|sig| {
                window.iter().filter_map(move |line| {
                    sig.regex.find(line).map(|m| Specificity {
                        anchored: sig.is_anchored(),
                        matched_len: m.as_str().len(),
                    })
                })
            })
            .max()?;

        if !profile.command_verbs.is_empty()
            && !window.iter().any(|line| invokes_verb(profile, line))
        {
            return None;
        }
        Some(best)
    }

    /// Every profile matching the scan window, most specific first.
    pub fn candidates<'s>(&'s self, text: &str) -> Vec<PlatformMatch<'s>> {
        let window = self.window(text);
        let mut matches: Vec<PlatformMatch<'s>> = self
            .profiles
            .iter()
            .filter_map(|profile| {
                Self::score(profile, &window).map(|specificity| PlatformMatch {
                    profile,
                    specificity,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.specificity
                .cmp(&a.specificity)
                .then_with(|| a.profile.id.cmp(&b.profile.id))
        });
        matches
    }

    /// Detect the platform from the capture's first lines.
    pub fn detect_platform(&self, text: &str) -> Result<&PlatformProfile, DetectionError> {
        if self.profiles.is_empty() {
            return Err(DetectionError::NoProfiles);
        }
        let matches = self.candidates(text);

        let result = match matches.as_slice() {
            [] => Err(DetectionError::NoSignatureMatched {
                scanned_lines: text.lines().take(self.config.scan_lines).count(),
            }),
            [only] => Ok(only.profile),
            [first, second, ..] => match self.config.tie_break {
                TieBreak::Specificity if first.specificity > second.specificity => {
                    Ok(first.profile)
                }
                TieBreak::Specificity => Err(DetectionError::Ambiguous {
                    candidates: matches
                        .iter()
                        .filter(|m| m.specificity == first.specificity)
                        .map(|m| m.profile.id.clone())
                        .collect(),
                }),
                TieBreak::Strict => Err(DetectionError::Ambiguous {
                    candidates: matches.iter().map(|m| m.profile.id.clone()).collect(),
                }),
            },
        };

        match &result {
            Ok(profile) => tracing::debug!(platform = %profile.id, "Platform detected"),
            Err(e) => tracing::debug!(error = %e, "Platform detection failed"),
        }
        result
    }

    /// The profile named by the hint, or the detected one.
    pub fn resolve_platform(
        &self,
        text: &str,
        hint: &ParseHint,
    ) -> Result<&PlatformProfile, DetectionError> {
        match hint.platform.as_deref() {
            Some(id) => self
                .profile(id)
                .ok_or_else(|| DetectionError::UnknownPlatform {
                    platform: id.to_string(),
                }),
            None => self.detect_platform(text),
        }
    }

    /// Find the first command line in the scan window and map it onto the
    /// platform's command table.
    pub fn infer_command(
        &self,
        profile: &PlatformProfile,
        text: &str,
    ) -> Result<String, DetectionError> {
        self.window(text)
            .iter()
            .find_map(|line| known_command_on_line(profile, line))
            .map(str::to_string)
            .ok_or_else(|| DetectionError::CommandNotInferred {
                platform: profile.id.clone(),
            })
    }

    /// Resolve the (platform, command) key for `text`.
    pub fn select(&self, text: &str, hint: &ParseHint) -> Result<Selection, DetectionError> {
        let profile = self.resolve_platform(text, hint)?;
        let command = match hint.command.as_deref() {
            Some(raw) => {
                let normalized = normalize_command(raw);
                match_known_command(profile, &normalized)
                    .map(str::to_string)
                    .unwrap_or(normalized)
            }
            None => self.infer_command(profile, text)?,
        };
        Ok(Selection {
            platform: profile.id.clone(),
            key: TemplateKey::new(profile.template_platform.clone(), command.clone()),
            command,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile::{parse_profile_toml, validate_and_compile};
    use std::path::PathBuf;

    fn profile(id: &str, signatures: &[&str], verbs: &[&str], commands: &[&str]) -> PlatformProfile {
        let quote = |items: &[&str]| {
            items
                .iter()
                .map(|s| format!("'{s}'"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let toml = format!(
            "[platform]\nid = \"{id}\"\nname = \"{id}\"\n\n[detection]\nsignatures = [{}]\ncommand_verbs = [{}]\n\n[commands]\nknown = [{}]\n",
            quote(signatures),
            quote(verbs),
            quote(commands)
        );
        let path = PathBuf::from("test.toml");
        validate_and_compile(parse_profile_toml(&toml, &path).unwrap(), &path, false).unwrap()
    }

    fn selector(config: SelectorConfig) -> Selector {
        Selector::new(
            vec![
                profile(
                    "ios",
                    &["Cisco IOS Software"],
                    &["show"],
                    &["show version", "show interface", "show interfaces"],
                ),
                profile(
                    "vrp",
                    &["Huawei Versatile Routing Platform"],
                    &["display"],
                    &["display version", "display cpu-usage"],
                ),
                profile("yunshan", &["^Huawei YunShan OS"], &["display"], &["display version"]),
                profile("yunshan_loose", &["Huawei YunShan OS"], &["display"], &["display version"]),
            ],
            config,
        )
    }

    #[test]
    fn test_strip_prompt_variants() {
        assert_eq!(strip_prompt("Router#show version"), (true, "show version"));
        assert_eq!(strip_prompt("switch> show ver"), (true, "show ver"));
        assert_eq!(strip_prompt("<HUAWEI>display version"), (true, "display version"));
        assert_eq!(strip_prompt("[~HUAWEI-GE0/0/1]display this"), (true, "display this"));
        assert_eq!(strip_prompt("sw1(config)# show run"), (true, "show run"));
        assert_eq!(strip_prompt("show version"), (false, "show version"));
        assert_eq!(strip_prompt("  Cisco IOS Software"), (false, "Cisco IOS Software"));
    }

    #[test]
    fn test_normalize_command() {
        assert_eq!(normalize_command("  Show   Interfaces  | include up"), "show interfaces");
        assert_eq!(normalize_command("display cpu-usage"), "display cpu-usage");
    }

    #[test]
    fn test_longest_known_command_wins() {
        let s = selector(SelectorConfig::default());
        let ios = s.profile("ios").unwrap();
        assert_eq!(match_known_command(ios, "show interfaces"), Some("show interfaces"));
        assert_eq!(match_known_command(ios, "show interface gi0/1"), Some("show interface"));
        assert_eq!(match_known_command(ios, "show interfacesx"), None);
        assert_eq!(match_known_command(ios, "show clock"), None);
    }

    #[test]
    fn test_detects_platform_and_command() {
        let s = selector(SelectorConfig::default());
        let text = "Router#show version\nCisco IOS Software, C2960 Software\nuptime is 3 days\n";
        let sel = s.select(text, &ParseHint::none()).unwrap();
        assert_eq!(sel.platform, "ios");
        assert_eq!(sel.command, "show version");
        assert_eq!(sel.key, TemplateKey::new("ios", "show version"));
    }

    #[test]
    fn test_banner_case_does_not_matter() {
        let s = selector(SelectorConfig::default());
        let text = "<ce1>display version\nHUAWEI YUNSHAN OS\nVersion 1.22\n";
        assert_eq!(s.detect_platform(text).unwrap().id, "yunshan");
        let text = "r1#show version\ncisco ios software, c2960 software\n";
        assert_eq!(s.detect_platform(text).unwrap().id, "ios");
    }

    #[test]
    fn test_no_banner_is_detection_failure() {
        let s = selector(SelectorConfig::default());
        let err = s.select("hello\nworld\n", &ParseHint::none()).unwrap_err();
        assert_eq!(err, DetectionError::NoSignatureMatched { scanned_lines: 2 });
    }

    #[test]
    fn test_signature_without_verb_does_not_match() {
        let s = selector(SelectorConfig::default());
        let err = s
            .detect_platform("Cisco IOS Software, but no command line\n")
            .unwrap_err();
        assert!(matches!(err, DetectionError::NoSignatureMatched { .. }));
    }

    #[test]
    fn test_anchored_signature_is_more_specific() {
        let s = selector(SelectorConfig::default());
        let text = "<HUAWEI>display version\nHuawei YunShan OS\nVersion 1.22\n";
        assert_eq!(s.detect_platform(text).unwrap().id, "yunshan");
    }

    #[test]
    fn test_strict_tie_break_reports_ambiguity() {
        let s = selector(SelectorConfig {
            tie_break: TieBreak::Strict,
            ..SelectorConfig::default()
        });
        let text = "<HUAWEI>display version\nHuawei YunShan OS\n";
        match s.detect_platform(text).unwrap_err() {
            DetectionError::Ambiguous { candidates } => {
                assert_eq!(candidates, vec!["yunshan", "yunshan_loose"]);
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_equal_specificity_is_ambiguous() {
        let s = Selector::new(
            vec![
                profile("a", &["Common Banner"], &[], &["show x"]),
                profile("b", &["Common Banner"], &[], &["show x"]),
            ],
            SelectorConfig::default(),
        );
        let err = s.detect_platform("Common Banner\n").unwrap_err();
        assert_eq!(
            err,
            DetectionError::Ambiguous {
                candidates: vec!["a".into(), "b".into()]
            }
        );
    }

    #[test]
    fn test_scan_window_is_bounded() {
        let s = selector(SelectorConfig {
            scan_lines: 3,
            ..SelectorConfig::default()
        });
        let text = "Router#show version\n\n\nCisco IOS Software\n";
        assert!(matches!(
            s.detect_platform(text),
            Err(DetectionError::NoSignatureMatched { scanned_lines: 3 })
        ));
    }

    #[test]
    fn test_platform_hint_short_circuits_detection() {
        let s = selector(SelectorConfig::default());
        let sel = s
            .select("<HUAWEI>display cpu-usage\n", &ParseHint::platform("vrp"))
            .unwrap();
        assert_eq!(sel.platform, "vrp");
        assert_eq!(sel.command, "display cpu-usage");

        let err = s
            .select("anything", &ParseHint::platform("junos"))
            .unwrap_err();
        assert_eq!(
            err,
            DetectionError::UnknownPlatform {
                platform: "junos".into()
            }
        );
    }

    #[test]
    fn test_command_hint_skips_inference() {
        let s = selector(SelectorConfig::default());
        let hint = ParseHint::platform("ios").with_command("Show Interfaces | i up");
        let sel = s.select("no command line here", &hint).unwrap();
        assert_eq!(sel.command, "show interfaces");
    }

    #[test]
    fn test_command_not_inferred() {
        let s = selector(SelectorConfig::default());
        let err = s
            .select("Cisco IOS Software\nRouter#show clock\n", &ParseHint::platform("ios"))
            .unwrap_err();
        assert_eq!(
            err,
            DetectionError::CommandNotInferred {
                platform: "ios".into()
            }
        );
    }

    #[test]
    fn test_split_sections() {
        let s = selector(SelectorConfig::default());
        let ios = s.profile("ios").unwrap();
        let text = "banner line\nR1#show version\nCisco IOS Software\nR1#show clock\n10:00\nR1#show interfaces\nGi0/1 is up\r\nGi0/2 is down\n";
        let sections = split_sections(text, ios);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].command, "show version");
        assert_eq!(sections[0].start_line, 2);
        assert_eq!(sections[0].body, "Cisco IOS Software\n");
        assert_eq!(sections[1].command, "show interfaces");
        assert_eq!(sections[1].start_line, 6);
        assert_eq!(sections[1].body, "Gi0/1 is up\r\nGi0/2 is down\n");
    }
}
