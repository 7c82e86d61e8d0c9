// NetSleuth - app/parser.rs
//
// Parser facade: wires Selector -> TemplateStore -> TemplateCache -> engine
// and hands results to the Aggregator.
//
// The Parser owns its compiled-template cache. It is `Send + Sync` and is
// shared by reference across batch workers.

use crate::app::template_mgr::profile_template_keys;
use crate::core::aggregate::Aggregator;
use crate::core::cache::TemplateCache;
use crate::core::engine::{self, RunLimits};
use crate::core::model::{DeviceReport, ParseHint, ParseResult, TemplateKey};
use crate::core::profile::PlatformProfile;
use crate::core::selector::{normalize_command, split_sections, Selection, Selector, SelectorConfig, TieBreak};
use crate::core::store::TemplateStore;
use crate::core::template::Template;
use crate::platform::config::AppConfig;
use crate::util::constants;
use crate::util::error::{DetectionError, EngineError, NetSleuthError, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Source identifier used by `parse` for anonymous input.
pub const INLINE_SOURCE: &str = "<input>";

/// Detection and engine settings for a Parser.
#[derive(Debug, Clone, Default)]
pub struct ParserOptions {
    pub selector: SelectorConfig,
    pub limits: RunLimits,
}

impl ParserOptions {
    /// Options from a validated config.
    pub fn from_config(config: &AppConfig) -> Self {
        let tie_break = config.tie_break.parse::<TieBreak>().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid tie_break reached the parser; using default");
            TieBreak::default()
        });
        Self {
            selector: SelectorConfig {
                scan_lines: config.scan_lines,
                tie_break,
            },
            limits: RunLimits {
                max_lines: config.max_run_lines,
                max_duration: Duration::from_millis(config.max_run_millis),
            },
        }
    }
}

/// Turns raw device text into parse results and device reports.
pub struct Parser {
    selector: Selector,
    store: Box<dyn TemplateStore>,
    cache: TemplateCache,
    limits: RunLimits,
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("profiles", &self.selector.profiles().len())
            .field("cached_templates", &self.cache.len())
            .field("limits", &self.limits)
            .finish()
    }
}

impl Parser {
    pub fn new(
        profiles: Vec<PlatformProfile>,
        store: Box<dyn TemplateStore>,
        options: ParserOptions,
    ) -> Self {
        Self {
            selector: Selector::new(profiles, options.selector),
            store,
            cache: TemplateCache::new(),
            limits: options.limits,
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn store(&self) -> &dyn TemplateStore {
        self.store.as_ref()
    }

    pub fn limits(&self) -> &RunLimits {
        &self.limits
    }

    pub fn aggregator(&self) -> Aggregator<'_> {
        Aggregator::new(self.selector.profiles())
    }

    /// The compiled template for `key`, from the cache when current.
    pub fn template(&self, key: &TemplateKey) -> Result<Arc<Template>> {
        self.cache.get_or_compile(self.store.as_ref(), key)
    }

    /// Parse anonymous input. See `parse_source`.
    pub fn parse(&self, text: &str, hint: &ParseHint) -> Result<ParseResult> {
        self.parse_source(INLINE_SOURCE, text, hint)
    }

    /// Select a template for `text` and run it.
    ///
    /// Input with no non-blank text yields an empty result without
    /// detection. Device text that matches no rule yields fewer records,
    /// never an error; a template `Error` action keeps the records emitted
    /// before it and sets `aborted`.
    pub fn parse_source(&self, source: &str, text: &str, hint: &ParseHint) -> Result<ParseResult> {
        if text.trim().is_empty() {
            let platform = hint
                .platform
                .as_deref()
                .unwrap_or(constants::UNKNOWN_PLATFORM_ID);
            let command = hint
                .command
                .as_deref()
                .map(normalize_command)
                .unwrap_or_default();
            tracing::debug!(source, "Empty input; nothing to parse");
            return Ok(ParseResult::empty(source, platform, &command));
        }

        let selection = self.selector.select(text, hint)?;
        self.run_selection(source, text, &selection)
    }

    fn run_selection(&self, source: &str, text: &str, selection: &Selection) -> Result<ParseResult> {
        let template = self.template(&selection.key)?;
        let output = engine::run(&template, text, &self.limits).map_err(EngineError::from)?;

        let aborted = output.aborted.map(|abort| {
            let err = EngineError::from(abort);
            tracing::warn!(source, template = %selection.key, error = %err, "Template aborted the run");
            err.to_string()
        });

        tracing::debug!(
            source,
            platform = %selection.platform,
            command = %selection.command,
            records = output.records.len(),
            lines = output.lines_processed,
            "Parsed"
        );

        Ok(ParseResult {
            source: source.to_string(),
            platform: selection.platform.clone(),
            command: selection.command.clone(),
            template: selection.key.to_string(),
            template_version: template.checksum().to_string(),
            parsed_at: Utc::now(),
            lines_processed: output.lines_processed,
            key_fields: template.key_fields(),
            records: output.records,
            aborted,
        })
    }

    /// Parse every recognised command section of a capture and aggregate
    /// the results into a device report.
    ///
    /// Platform resolution failures are errors. Per-section problems (no
    /// template, compile failure, timeout) become report warnings. A
    /// command hint restricts parsing to that command; when the capture has
    /// no prompt lines at all, the whole text is parsed as that command.
    pub fn parse_capture(&self, source: &str, text: &str, hint: &ParseHint) -> Result<DeviceReport> {
        let profile = self.selector.resolve_platform(text, hint)?;
        let wanted = hint.command.as_deref().map(normalize_command);

        let mut sections: Vec<(String, usize, &str)> = split_sections(text, profile)
            .into_iter()
            .filter(|s| wanted.as_deref().map_or(true, |w| s.command == w))
            .map(|s| (s.command, s.start_line, s.body))
            .collect();

        if sections.is_empty() {
            match wanted {
                Some(command) => sections.push((command, 1, text)),
                None if text.trim().is_empty() => {}
                None => {
                    return Err(NetSleuthError::Detection(DetectionError::CommandNotInferred {
                        platform: profile.id.clone(),
                    }))
                }
            }
        }

        let mut results = Vec::with_capacity(sections.len());
        let mut warnings = Vec::new();

        for (command, start_line, body) in sections {
            let selection = Selection {
                platform: profile.id.clone(),
                key: TemplateKey::new(profile.template_platform.clone(), command.clone()),
                command,
            };
            match self.run_selection(source, body, &selection) {
                Ok(result) => {
                    if let Some(reason) = &result.aborted {
                        push_warning(&mut warnings, format!("line {start_line}: {reason}"));
                    }
                    results.push(result);
                }
                Err(e) => {
                    tracing::debug!(source, command = %selection.command, error = %e, "Section skipped");
                    push_warning(
                        &mut warnings,
                        format!("line {start_line} '{}': {e}", selection.command),
                    );
                }
            }
        }

        let views = self.aggregator().device_views(&results);

        tracing::info!(
            source,
            platform = %profile.id,
            sections = results.len(),
            warnings = warnings.len(),
            "Capture parsed"
        );

        Ok(DeviceReport {
            source: source.to_string(),
            platform: profile.id.clone(),
            parsed_at: Utc::now(),
            results,
            views,
            warnings,
        })
    }

    /// Compile every template the loaded profiles can use. Returns the keys
    /// that failed, with their errors; keys the store lacks are skipped.
    pub fn warm_cache(&self) -> Vec<(TemplateKey, NetSleuthError)> {
        let mut failures = Vec::new();
        let mut compiled = 0usize;
        for key in profile_template_keys(self.selector.profiles()) {
            if !self.store.contains(&key) {
                continue;
            }
            match self.template(&key) {
                Ok(_) => compiled += 1,
                Err(e) => {
                    tracing::warn!(template = %key, error = %e, "Template failed to compile");
                    failures.push((key, e));
                }
            }
        }
        tracing::info!(compiled, failed = failures.len(), "Template cache warmed");
        failures
    }
}

fn push_warning(warnings: &mut Vec<String>, warning: String) {
    if warnings.len() < constants::MAX_REPORT_WARNINGS {
        warnings.push(warning);
    } else if warnings.len() == constants::MAX_REPORT_WARNINGS {
        warnings.push("further warnings suppressed".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aggregate::ViewStatus;
    use crate::core::model::FieldValue;
    use crate::core::profile::{parse_profile_toml, validate_and_compile};
    use crate::core::store::MemoryTemplateStore;
    use crate::util::error::TimeoutBudget;
    use std::path::PathBuf;

    const LAB_PROFILE: &str = r#"
[platform]
id = "lab_os"
name = "Lab OS"

[detection]
signatures = ["^Lab OS Software"]
command_verbs = ["show"]

[commands]
known = ["show version", "show clock"]

[views.summary]
command = "show version"
[views.summary.fields]
version = "Version"
"#;

    const VERSION_TEMPLATE: &str = "Value Required Version (\\S+)\n\nStart\n  ^Version ${Version}$$ -> Record\n";

    fn lab_parser(store: MemoryTemplateStore, options: ParserOptions) -> Parser {
        let path = PathBuf::from("lab.toml");
        let profile =
            validate_and_compile(parse_profile_toml(LAB_PROFILE, &path).unwrap(), &path, false)
                .unwrap();
        Parser::new(vec![profile], Box::new(store), options)
    }

    fn version_store() -> MemoryTemplateStore {
        let store = MemoryTemplateStore::new();
        store.insert(TemplateKey::new("lab_os", "show version"), VERSION_TEMPLATE);
        store
    }

    #[test]
    fn test_parse_with_hint_yields_record() {
        let parser = lab_parser(version_store(), ParserOptions::default());
        let hint = ParseHint::platform("lab_os").with_command("show version");
        let result = parser.parse("Version 15.2\nUptime 3d", &hint).unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].get_str("Version"), Some("15.2"));
        assert_eq!(result.template, "lab_os/show version");
        assert_eq!(result.template_version.len(), 64);
        assert!(result.aborted.is_none());
    }

    #[test]
    fn test_parse_detects_platform_and_command() {
        let parser = lab_parser(version_store(), ParserOptions::default());
        let text = "lab1#show version\nLab OS Software\nVersion 2.1\n";
        let result = parser.parse(text, &ParseHint::none()).unwrap();
        assert_eq!(result.platform, "lab_os");
        assert_eq!(result.command, "show version");
        assert_eq!(result.records[0].get("Version"), Some(&FieldValue::Scalar("2.1".into())));
    }

    #[test]
    fn test_parse_empty_input_is_empty_result() {
        let parser = lab_parser(version_store(), ParserOptions::default());
        let hint = ParseHint::platform("lab_os").with_command("Show  Version");
        let result = parser.parse("", &hint).unwrap();
        assert!(result.records.is_empty());
        assert_eq!(result.platform, "lab_os");
        assert_eq!(result.command, "show version");
    }

    #[test]
    fn test_parse_without_banner_is_detection_failure() {
        let parser = lab_parser(version_store(), ParserOptions::default());
        let err = parser
            .parse("some unrelated text\nmore text\n", &ParseHint::none())
            .unwrap_err();
        assert!(matches!(
            err,
            NetSleuthError::Detection(DetectionError::NoSignatureMatched { .. })
        ));
    }

    #[test]
    fn test_parse_missing_template_is_store_error() {
        let parser = lab_parser(version_store(), ParserOptions::default());
        let hint = ParseHint::platform("lab_os").with_command("show clock");
        let err = parser.parse("12:00:00 UTC", &hint).unwrap_err();
        assert!(matches!(err, NetSleuthError::Store(_)));
        assert!(err.to_string().contains("unsupported platform/command"));
    }

    #[test]
    fn test_parse_line_budget_times_out() {
        let options = ParserOptions {
            limits: RunLimits {
                max_lines: 2,
                ..RunLimits::default()
            },
            ..ParserOptions::default()
        };
        let parser = lab_parser(version_store(), options);
        let hint = ParseHint::platform("lab_os").with_command("show version");
        let err = parser.parse("a\nb\nc\nd\n", &hint).unwrap_err();
        match err {
            NetSleuthError::Engine(EngineError::Timeout(t)) => {
                assert_eq!(t.budget, TimeoutBudget::Lines(2));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_error_action_keeps_partial_records() {
        let store = MemoryTemplateStore::new();
        store.insert(
            TemplateKey::new("lab_os", "show version"),
            "Value Required Version (\\S+)\n\nStart\n  ^Version ${Version} -> Record\n  ^PANIC -> Error \"device panic\"\n",
        );
        let parser = lab_parser(store, ParserOptions::default());
        let hint = ParseHint::platform("lab_os").with_command("show version");
        let result = parser.parse("Version 1\nPANIC\nVersion 2\n", &hint).unwrap();
        assert_eq!(result.records.len(), 1);
        assert!(result.aborted.as_deref().unwrap_or("").contains("device panic"));
    }

    #[test]
    fn test_parse_capture_splits_sections_and_warns() {
        let parser = lab_parser(version_store(), ParserOptions::default());
        let text = "\
lab1#show version
Lab OS Software
Version 3.0
lab1#show clock
12:00:00 UTC
";
        let report = parser.parse_capture("lab1.txt", text, &ParseHint::none()).unwrap();
        assert_eq!(report.platform, "lab_os");
        assert_eq!(report.results.len(), 1);
        assert_eq!(
            report.result_for("show version").unwrap().records[0].get_str("Version"),
            Some("3.0")
        );
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("show clock"));
        assert_eq!(report.views.summary.fields["version"], "3.0");
        assert_eq!(report.views.summary.status, ViewStatus::Partial);
    }

    #[test]
    fn test_parse_capture_with_command_hint_and_no_prompt() {
        let parser = lab_parser(version_store(), ParserOptions::default());
        let hint = ParseHint::platform("lab_os").with_command("show version");
        let report = parser.parse_capture("raw.txt", "Version 9.9\n", &hint).unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].records[0].get_str("Version"), Some("9.9"));
    }

    #[test]
    fn test_cache_reused_across_parses() {
        let parser = lab_parser(version_store(), ParserOptions::default());
        let key = TemplateKey::new("lab_os", "show version");
        let a = parser.template(&key).unwrap();
        let hint = ParseHint::platform("lab_os").with_command("show version");
        parser.parse("Version 1", &hint).unwrap();
        let b = parser.template(&key).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_warm_cache_reports_broken_templates() {
        let store = version_store();
        store.insert(TemplateKey::new("lab_os", "show clock"), "Value X (\\S+)\n\nStart\n  ^x -> Next Nowhere\n");
        let parser = lab_parser(store, ParserOptions::default());
        let failures = parser.warm_cache();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, TemplateKey::new("lab_os", "show clock"));
        assert!(matches!(failures[0].1, NetSleuthError::Template(_)));
    }

    #[test]
    fn test_options_from_config() {
        let config = AppConfig {
            scan_lines: 7,
            tie_break: "strict".into(),
            max_run_lines: 99,
            max_run_millis: 1234,
            ..AppConfig::default()
        };
        let options = ParserOptions::from_config(&config);
        assert_eq!(options.selector.scan_lines, 7);
        assert_eq!(options.selector.tie_break, TieBreak::Strict);
        assert_eq!(options.limits.max_lines, 99);
        assert_eq!(options.limits.max_duration, Duration::from_millis(1234));
    }
}
