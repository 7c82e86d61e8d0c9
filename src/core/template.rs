// NetSleuth - core/template.rs
//
// Template compiler: turns template source text into an immutable automaton.
// Core layer: accepts source strings only, never touches the filesystem.
//
// Source format:
//
//   Value [Option[,Option...]] Name (regex)     one per line, blank line ends
//
//   StateName                                    word on its own line
//     ^regex [-> [LineOp[.RecordOp]] [NewState]] indented rules, blank line ends
//
// Lines whose first non-blank character is '#' are comments.
//
// Compilation happens in two phases. The line parser fills a mutable
// `TemplateBuilder`; `TemplateBuilder::build` validates cross references and
// freezes the result into a `Template` that carries no per-run state.

use crate::core::store::{source_checksum, TemplateSource};
use crate::util::constants;
use crate::util::error::{CompileErrorKind, TemplateCompileError};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// Reserved state that stops the run without the implicit final record.
pub const END_STATE: &str = "End";

/// Reserved state that stops the run; declaring it explicitly suppresses
/// the implicit final record.
pub const EOF_STATE: &str = "EOF";

/// Mandatory initial state.
pub const START_STATE: &str = "Start";

// Words that may not be used as state names.
const RESERVED_WORDS: &[&str] = &[
    "Next", "Continue", "Error", "NoRecord", "Record", "Clear", "Clearall",
];

// =============================================================================
// Values
// =============================================================================

/// Modifiers attached to a value declaration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueOptions {
    pub required: bool,
    pub list: bool,
    pub filldown: bool,
    pub key: bool,
    pub fillup: bool,
}

impl ValueOptions {
    fn set(&mut self, option: &str) -> Result<(), CompileErrorKind> {
        let flag = match option {
            "Required" => &mut self.required,
            "List" => &mut self.list,
            "Filldown" => &mut self.filldown,
            "Key" => &mut self.key,
            "Fillup" => &mut self.fillup,
            other => return Err(CompileErrorKind::UnknownOption(other.to_string())),
        };
        if *flag {
            return Err(CompileErrorKind::DuplicateOption(option.to_string()));
        }
        *flag = true;
        Ok(())
    }
}

/// A compiled `Value` declaration.
#[derive(Debug, Clone)]
pub struct ValueDef {
    pub name: String,

    /// Regex as written, including the outer parentheses.
    pub pattern: String,

    pub options: ValueOptions,

    /// Pattern with the outer group renamed to the value name; this is what
    /// rule placeholders expand to.
    group_pattern: String,

    /// 1-based template line of the declaration.
    pub line: usize,
}

impl ValueDef {
    pub fn group_pattern(&self) -> &str {
        &self.group_pattern
    }
}

// =============================================================================
// Rules and actions
// =============================================================================

/// What happens to the input line after a rule matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineOp {
    /// Consume the line and continue with the next one.
    #[default]
    Next,
    /// Keep testing the remaining rules of the state against this line.
    Continue,
    /// Abort the run.
    Error,
}

impl LineOp {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "Next" => Some(Self::Next),
            "Continue" => Some(Self::Continue),
            "Error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// What happens to the value buffer after a rule matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordOp {
    #[default]
    NoRecord,
    /// Emit the buffer as a record, then clear non-Filldown values.
    Record,
    /// Clear non-Filldown values.
    Clear,
    /// Clear every value, Filldown included.
    Clearall,
}

impl RecordOp {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "NoRecord" => Some(Self::NoRecord),
            "Record" => Some(Self::Record),
            "Clear" => Some(Self::Clear),
            "Clearall" => Some(Self::Clearall),
            _ => None,
        }
    }
}

/// Resolved state change of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stay,
    /// Index into `Template::states`.
    Goto(usize),
    End,
    Eof,
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// 1-based template line of the rule.
    pub line: usize,

    /// Regex as written, placeholders unexpanded.
    pub pattern: String,

    pub line_op: LineOp,
    pub record_op: RecordOp,
    pub transition: Transition,

    /// Message of an `Error` action.
    pub error_message: Option<String>,

    regex: Regex,

    /// (capture group index, value index) for every placeholder in the rule.
    bindings: Vec<(usize, usize)>,
}

impl Rule {
    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub(crate) fn bindings(&self) -> &[(usize, usize)] {
        &self.bindings
    }
}

/// A named, ordered list of rules.
#[derive(Debug, Clone)]
pub struct State {
    pub name: String,
    pub rules: Vec<Rule>,
}

// =============================================================================
// Template
// =============================================================================

/// An immutable compiled template. Share it behind an `Arc`; every parse run
/// keeps its own buffers.
#[derive(Debug)]
pub struct Template {
    name: String,
    checksum: String,
    values: Vec<ValueDef>,
    value_names: Arc<[String]>,
    states: Vec<State>,
    start: usize,
    explicit_eof: bool,
}

impl Template {
    /// Compile `text`. `name` is used in error messages and parse results.
    pub fn compile(name: &str, text: &str) -> Result<Self, TemplateCompileError> {
        let checksum = source_checksum(text);
        parse_source(name, text)?.build(name, checksum)
    }

    /// Compile a store-provided source, keeping the store's checksum.
    pub fn from_source(source: &TemplateSource) -> Result<Self, TemplateCompileError> {
        let name = source.key.to_string();
        parse_source(&name, &source.text)?.build(&name, source.checksum.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checksum of the source this template was compiled from.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn values(&self) -> &[ValueDef] {
        &self.values
    }

    /// Value names in declaration order; shared by every emitted record.
    pub fn value_names(&self) -> &Arc<[String]> {
        &self.value_names
    }

    pub fn value_index(&self, name: &str) -> Option<usize> {
        self.values.iter().position(|v| v.name == name)
    }

    /// Names of values declared with the `Key` option.
    pub fn key_fields(&self) -> Vec<String> {
        self.values
            .iter()
            .filter(|v| v.options.key)
            .map(|v| v.name.clone())
            .collect()
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|s| s.name == name)
    }

    pub(crate) fn state_at(&self, idx: usize) -> &State {
        &self.states[idx]
    }

    pub(crate) fn start_index(&self) -> usize {
        self.start
    }

    /// True when the source declares an (empty) `EOF` state, which turns
    /// off the implicit record at end of input.
    pub fn has_explicit_eof(&self) -> bool {
        self.explicit_eof
    }
}

// =============================================================================
// Builder
// =============================================================================

#[derive(Debug)]
struct RuleDraft {
    line: usize,
    pattern: String,
    regex: Regex,
    line_op: LineOp,
    record_op: RecordOp,
    new_state: Option<String>,
    error_message: Option<String>,
    bindings: Vec<(usize, usize)>,
}

#[derive(Debug)]
struct StateDraft {
    name: String,
    line: usize,
    rules: Vec<RuleDraft>,
}

/// Mutable compile-time representation, frozen by `build`.
#[derive(Debug, Default)]
struct TemplateBuilder {
    values: Vec<ValueDef>,
    states: Vec<StateDraft>,
}

impl TemplateBuilder {
    fn add_value(&mut self, value: ValueDef) -> Result<(), CompileErrorKind> {
        if self.values.iter().any(|v| v.name == value.name) {
            return Err(CompileErrorKind::DuplicateValue(value.name));
        }
        self.values.push(value);
        Ok(())
    }

    fn add_state(&mut self, state: StateDraft) -> Result<(), CompileErrorKind> {
        if self.states.iter().any(|s| s.name == state.name) {
            return Err(CompileErrorKind::DuplicateState(state.name));
        }
        self.states.push(state);
        Ok(())
    }

    fn build(self, name: &str, checksum: String) -> Result<Template, TemplateCompileError> {
        let err = |line: Option<usize>, kind| TemplateCompileError {
            template: name.to_string(),
            line,
            kind,
        };

        if self.states.is_empty() {
            return Err(err(None, CompileErrorKind::NoStates));
        }

        let mut explicit_eof = false;
        let mut drafts = Vec::with_capacity(self.states.len());
        for state in self.states {
            let reserved = state.name == END_STATE || state.name == EOF_STATE;
            if reserved && !state.rules.is_empty() {
                return Err(err(
                    Some(state.line),
                    CompileErrorKind::NonEmptyTerminalState(state.name),
                ));
            }
            if state.name == EOF_STATE {
                explicit_eof = true;
            }
            if !reserved {
                drafts.push(state);
            }
        }

        let index: HashMap<&str, usize> = drafts
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();
        let start = *index
            .get(START_STATE)
            .ok_or_else(|| err(None, CompileErrorKind::MissingStartState))?;

        let mut resolved: Vec<Vec<Transition>> = Vec::with_capacity(drafts.len());
        for state in &drafts {
            let mut transitions = Vec::with_capacity(state.rules.len());
            for rule in &state.rules {
                let transition = match (rule.line_op, rule.new_state.as_deref()) {
                    (LineOp::Error, _) | (_, None) => Transition::Stay,
                    (_, Some(END_STATE)) => Transition::End,
                    (_, Some(EOF_STATE)) => Transition::Eof,
                    (_, Some(target)) => match index.get(target) {
                        Some(&i) => Transition::Goto(i),
                        None => {
                            return Err(err(
                                Some(rule.line),
                                CompileErrorKind::UnknownState(target.to_string()),
                            ))
                        }
                    },
                };
                transitions.push(transition);
            }
            resolved.push(transitions);
        }

        let states = drafts
            .into_iter()
            .zip(resolved)
            .map(|(state, transitions)| State {
                name: state.name,
                rules: state
                    .rules
                    .into_iter()
                    .zip(transitions)
                    .map(|(r, transition)| Rule {
                        line: r.line,
                        pattern: r.pattern,
                        line_op: r.line_op,
                        record_op: r.record_op,
                        transition,
                        error_message: r.error_message,
                        regex: r.regex,
                        bindings: r.bindings,
                    })
                    .collect(),
            })
            .collect();

        let value_names: Arc<[String]> = self
            .values
            .iter()
            .map(|v| v.name.clone())
            .collect::<Vec<_>>()
            .into();

        Ok(Template {
            name: name.to_string(),
            checksum,
            values: self.values,
            value_names,
            states,
            start,
            explicit_eof,
        })
    }
}

// =============================================================================
// Line parser
// =============================================================================

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

fn is_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split off the first whitespace-delimited token; the rest is left-trimmed.
fn next_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

fn parse_source(name: &str, text: &str) -> Result<TemplateBuilder, TemplateCompileError> {
    let err = |line: usize, kind| TemplateCompileError {
        template: name.to_string(),
        line: Some(line),
        kind,
    };

    let mut builder = TemplateBuilder::default();
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l.trim_end()));

    // Value section: ends at the first blank line.
    for (line_no, line) in lines.by_ref() {
        if line.is_empty() {
            break;
        }
        if is_comment(line) {
            continue;
        }
        let value = parse_value_line(line, line_no).map_err(|k| err(line_no, k))?;
        builder.add_value(value).map_err(|k| err(line_no, k))?;
    }

    let placeholders: HashMap<&str, (usize, &str)> = builder
        .values
        .iter()
        .enumerate()
        .map(|(i, v)| (v.name.as_str(), (i, v.group_pattern.as_str())))
        .collect();

    // State section.
    let mut current: Option<StateDraft> = None;
    let mut finished: Vec<StateDraft> = Vec::new();
    for (line_no, line) in lines {
        if is_comment(line) {
            continue;
        }
        if line.trim().is_empty() {
            if let Some(state) = current.take() {
                finished.push(state);
            }
            continue;
        }
        match current.as_mut() {
            None => {
                if !is_word(line)
                    || line.len() > constants::MAX_STATE_NAME_LENGTH
                    || RESERVED_WORDS.contains(&line)
                {
                    return Err(err(
                        line_no,
                        CompileErrorKind::InvalidStateName(line.trim().to_string()),
                    ));
                }
                if finished.iter().any(|s| s.name == line) {
                    return Err(err(
                        line_no,
                        CompileErrorKind::DuplicateState(line.to_string()),
                    ));
                }
                current = Some(StateDraft {
                    name: line.to_string(),
                    line: line_no,
                    rules: Vec::new(),
                });
            }
            Some(state) => {
                let rule =
                    parse_rule_line(line, line_no, &placeholders).map_err(|k| err(line_no, k))?;
                state.rules.push(rule);
            }
        }
    }
    if let Some(state) = current.take() {
        finished.push(state);
    }

    for state in finished {
        let line = state.line;
        builder.add_state(state).map_err(|k| err(line, k))?;
    }
    Ok(builder)
}

fn parse_value_line(line: &str, line_no: usize) -> Result<ValueDef, CompileErrorKind> {
    let rest = line
        .strip_prefix("Value ")
        .ok_or_else(|| {
            CompileErrorKind::MalformedValue(
                "expected 'Value' declaration or a blank line ending the value section"
                    .to_string(),
            )
        })?
        .trim_start();

    let (first, after_first) = next_token(rest);
    let (options_word, name, pattern) = if after_first.starts_with('(') {
        (None, first, after_first)
    } else {
        let (name, pattern) = next_token(after_first);
        (Some(first), name, pattern)
    };

    if name.is_empty() || pattern.is_empty() {
        return Err(CompileErrorKind::MalformedValue(
            "expected 'Value [options] Name (regex)'".to_string(),
        ));
    }
    if !is_word(name) || name.len() > constants::MAX_VALUE_NAME_LENGTH {
        return Err(CompileErrorKind::InvalidValueName(name.to_string()));
    }

    let mut options = ValueOptions::default();
    if let Some(words) = options_word {
        for option in words.split(',') {
            options.set(option)?;
        }
    }

    if !(pattern.starts_with('(') && pattern.ends_with(')')) || pattern.len() < 2 {
        return Err(CompileErrorKind::MalformedValue(format!(
            "regex of '{name}' must be enclosed in parentheses"
        )));
    }
    if pattern.len() > constants::MAX_REGEX_PATTERN_LENGTH {
        return Err(CompileErrorKind::RegexTooLong {
            length: pattern.len(),
            max_length: constants::MAX_REGEX_PATTERN_LENGTH,
        });
    }

    let group_pattern = format!("(?P<{name}>{}", &pattern[1..]);
    Regex::new(&group_pattern).map_err(|e| CompileErrorKind::InvalidRegex {
        pattern: pattern.to_string(),
        source: e,
    })?;

    Ok(ValueDef {
        name: name.to_string(),
        pattern: pattern.to_string(),
        options,
        group_pattern,
        line: line_no,
    })
}

/// Split a rule at the last `->` that is preceded by whitespace.
/// Exactly one whitespace character before the arrow belongs to the arrow.
fn split_action(rule: &str) -> (&str, Option<&str>) {
    let mut end = rule.len();
    while let Some(pos) = rule[..end].rfind("->") {
        if let Some(ws) = rule[..pos].chars().next_back().filter(|c| c.is_whitespace()) {
            return (&rule[..pos - ws.len_utf8()], Some(&rule[pos + 2..]));
        }
        end = pos;
    }
    (rule, None)
}

/// Expand `${Name}` and `$Name` placeholders. `$$` is a literal `$`; any
/// other `$` is kept as-is.
fn substitute(
    pattern: &str,
    placeholders: &HashMap<&str, (usize, &str)>,
) -> Result<String, CompileErrorKind> {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut rest = pattern;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        } else if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(close) => (&braced[..close], close + 2),
                None => ("", 0),
            }
        } else if after.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            let len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..len], len)
        } else {
            ("", 0)
        };

        if consumed == 0 {
            out.push('$');
            rest = after;
            continue;
        }

        let (_, group) = placeholders
            .get(name)
            .ok_or_else(|| CompileErrorKind::UnknownPlaceholder(name.to_string()))?;
        out.push_str(group);
        rest = &after[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}

fn parse_rule_line(
    line: &str,
    line_no: usize,
    placeholders: &HashMap<&str, (usize, &str)>,
) -> Result<RuleDraft, CompileErrorKind> {
    let indented = line.starts_with(|c: char| c.is_whitespace());
    let rule = line.trim();
    if !indented || !rule.starts_with('^') {
        return Err(CompileErrorKind::MalformedRule(
            "rules must be indented and start with '^'".to_string(),
        ));
    }

    let (pattern, action) = split_action(rule);

    let expanded = substitute(pattern, placeholders)?;
    let anchored = format!("^(?:{expanded})");
    if anchored.len() > constants::MAX_REGEX_PATTERN_LENGTH {
        return Err(CompileErrorKind::RegexTooLong {
            length: anchored.len(),
            max_length: constants::MAX_REGEX_PATTERN_LENGTH,
        });
    }
    let regex = Regex::new(&anchored).map_err(|e| CompileErrorKind::InvalidRegex {
        pattern: pattern.to_string(),
        source: e,
    })?;

    // Any group named after a value assigns it, expanded or hand-written.
    let bindings = regex
        .capture_names()
        .enumerate()
        .filter_map(|(group, name)| placeholders.get(name?).map(|(idx, _)| (group, *idx)))
        .collect();

    let (line_op, record_op, new_state) = match action {
        Some(action) => parse_action(action)?,
        None => (LineOp::Next, RecordOp::NoRecord, None),
    };

    let (new_state, error_message) = if line_op == LineOp::Error {
        (None, new_state.map(|s| s.trim_matches('"').to_string()))
    } else {
        if let Some(state) = new_state.as_deref() {
            if !is_word(state) {
                return Err(CompileErrorKind::MalformedRule(format!(
                    "invalid state name '{state}'; quoted messages need 'Error'"
                )));
            }
        }
        (new_state, None)
    };

    if line_op == LineOp::Continue && new_state.is_some() {
        return Err(CompileErrorKind::ContinueWithTransition);
    }

    Ok(RuleDraft {
        line: line_no,
        pattern: pattern.to_string(),
        regex,
        line_op,
        record_op,
        new_state,
        error_message,
        bindings,
    })
}

/// Parse the text after `->`.
fn parse_action(action: &str) -> Result<(LineOp, RecordOp, Option<String>), CompileErrorKind> {
    let malformed = || CompileErrorKind::MalformedRule(format!("bad action '{}'", action.trim()));

    if action.is_empty() {
        return Ok((LineOp::Next, RecordOp::NoRecord, None));
    }
    if !action.starts_with(char::is_whitespace) || action.trim().is_empty() {
        return Err(malformed());
    }

    let (first, rest) = next_token(action);
    let mut line_op = LineOp::Next;
    let mut record_op = RecordOp::NoRecord;

    let new_state = if let Some((line_word, record_word)) = first.split_once('.') {
        line_op = LineOp::parse(line_word).ok_or_else(malformed)?;
        record_op = RecordOp::parse(record_word).ok_or_else(malformed)?;
        rest
    } else if let Some(op) = LineOp::parse(first) {
        line_op = op;
        rest
    } else if let Some(op) = RecordOp::parse(first) {
        record_op = op;
        rest
    } else {
        // Bare new state (or a quoted message, rejected by the caller).
        action.trim()
    };

    let new_state = new_state.trim();
    if new_state.is_empty() {
        return Ok((line_op, record_op, None));
    }
    let quoted = new_state.len() >= 2 && new_state.starts_with('"') && new_state.ends_with('"');
    if !quoted && !is_word(new_state) {
        return Err(malformed());
    }
    Ok((line_op, record_op, Some(new_state.to_string())))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const VERSION_TEMPLATE: &str = "\
Value Required Version (\\S+)
Value Filldown Hostname (\\S+)
Value List Serial (\\w+)

Start
  ^${Hostname} uptime
  ^Version ${Version}$$ -> Record
  ^Serial $Serial -> Continue
  ^Done -> Next.Record Done

Done
  ^.* -> End
";

    fn compile_err(text: &str) -> TemplateCompileError {
        Template::compile("test", text).unwrap_err()
    }

    #[test]
    fn test_compile_valid_template() {
        let t = Template::compile("test", VERSION_TEMPLATE).unwrap();
        assert_eq!(t.values().len(), 3);
        assert_eq!(&t.value_names()[..], &["Version", "Hostname", "Serial"]);
        assert!(t.values()[0].options.required);
        assert!(t.values()[1].options.filldown);
        assert!(t.values()[2].options.list);
        assert_eq!(t.states().len(), 2);
        assert_eq!(t.state("Start").unwrap().rules.len(), 4);
        assert!(!t.has_explicit_eof());
        assert_eq!(t.checksum(), source_checksum(VERSION_TEMPLATE));
    }

    #[test]
    fn test_rule_actions_parsed() {
        let t = Template::compile("test", VERSION_TEMPLATE).unwrap();
        let start = t.state("Start").unwrap();
        assert_eq!(start.rules[0].line_op, LineOp::Next);
        assert_eq!(start.rules[0].record_op, RecordOp::NoRecord);
        assert_eq!(start.rules[1].record_op, RecordOp::Record);
        assert_eq!(start.rules[2].line_op, LineOp::Continue);
        assert_eq!(start.rules[3].record_op, RecordOp::Record);
        assert_eq!(start.rules[3].transition, Transition::Goto(1));
        let done = t.state("Done").unwrap();
        assert_eq!(done.rules[0].transition, Transition::End);
    }

    #[test]
    fn test_placeholder_expansion_and_literal_dollar() {
        let t = Template::compile("test", VERSION_TEMPLATE).unwrap();
        let rule = &t.state("Start").unwrap().rules[1];
        assert_eq!(rule.regex().as_str(), "^(?:^Version (?P<Version>\\S+)$)");
        assert!(rule.regex().is_match("Version 15.2"));
        assert!(!rule.regex().is_match("Version 15.2 extra"));
    }

    #[test]
    fn test_rule_line_numbers_are_one_based() {
        let t = Template::compile("test", VERSION_TEMPLATE).unwrap();
        let start = t.state("Start").unwrap();
        assert_eq!(start.rules[0].line, 6);
        assert_eq!(t.values()[2].line, 3);
    }

    #[test]
    fn test_unknown_state_reports_rule_line() {
        let err = compile_err("Value A (\\S+)\n\nStart\n  ^${A} -> Next missing_state\n");
        assert_eq!(err.line, Some(4));
        assert!(matches!(err.kind, CompileErrorKind::UnknownState(ref s) if s == "missing_state"));
    }

    #[test]
    fn test_missing_start_state() {
        let err = compile_err("Value A (\\S+)\n\nBegin\n  ^${A} -> Record\n");
        assert!(matches!(err.kind, CompileErrorKind::MissingStartState));
        assert_eq!(err.line, None);
    }

    #[test]
    fn test_no_states() {
        let err = compile_err("Value A (\\S+)\n\n");
        assert!(matches!(err.kind, CompileErrorKind::NoStates));
    }

    #[test]
    fn test_duplicate_value() {
        let err = compile_err("Value A (\\S+)\nValue A (\\d+)\n\nStart\n  ^${A}\n");
        assert_eq!(err.line, Some(2));
        assert!(matches!(err.kind, CompileErrorKind::DuplicateValue(_)));
    }

    #[test]
    fn test_unknown_and_duplicate_options() {
        let err = compile_err("Value Bogus A (\\S+)\n\nStart\n  ^${A}\n");
        assert!(matches!(err.kind, CompileErrorKind::UnknownOption(ref o) if o == "Bogus"));
        let err = compile_err("Value List,List A (\\S+)\n\nStart\n  ^${A}\n");
        assert!(matches!(err.kind, CompileErrorKind::DuplicateOption(_)));
    }

    #[test]
    fn test_value_regex_must_be_parenthesised() {
        let err = compile_err("Value A \\S+\n\nStart\n  ^x\n");
        assert!(matches!(err.kind, CompileErrorKind::MalformedValue(_)));
    }

    #[test]
    fn test_invalid_value_regex() {
        let err = compile_err("Value A ([a-)\n\nStart\n  ^x\n");
        assert!(matches!(err.kind, CompileErrorKind::InvalidRegex { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_regex_too_long() {
        let long = format!("Value A ({})\n\nStart\n  ^x\n", "a".repeat(constants::MAX_REGEX_PATTERN_LENGTH));
        let err = compile_err(&long);
        assert!(matches!(err.kind, CompileErrorKind::RegexTooLong { .. }));
    }

    #[test]
    fn test_unknown_placeholder() {
        let err = compile_err("Value A (\\S+)\n\nStart\n  ^${B} -> Record\n");
        assert_eq!(err.line, Some(4));
        assert!(matches!(err.kind, CompileErrorKind::UnknownPlaceholder(ref n) if n == "B"));
    }

    #[test]
    fn test_continue_with_transition_rejected() {
        let err = compile_err("Value A (\\S+)\n\nStart\n  ^${A} -> Continue Other\n\nOther\n  ^x\n");
        assert!(matches!(err.kind, CompileErrorKind::ContinueWithTransition));
    }

    #[test]
    fn test_duplicate_state() {
        let err = compile_err("Value A (\\S+)\n\nStart\n  ^${A}\n\nStart\n  ^x\n");
        assert_eq!(err.line, Some(6));
        assert!(matches!(err.kind, CompileErrorKind::DuplicateState(_)));
    }

    #[test]
    fn test_reserved_word_state_name_rejected() {
        let err = compile_err("Value A (\\S+)\n\nRecord\n  ^x\n");
        assert!(matches!(err.kind, CompileErrorKind::InvalidStateName(_)));
    }

    #[test]
    fn test_non_empty_terminal_states_rejected() {
        let err = compile_err("Value A (\\S+)\n\nStart\n  ^x\n\nEOF\n  ^y\n");
        assert!(matches!(err.kind, CompileErrorKind::NonEmptyTerminalState(ref s) if s == "EOF"));
        let err = compile_err("Value A (\\S+)\n\nStart\n  ^x\n\nEnd\n  ^y\n");
        assert!(matches!(err.kind, CompileErrorKind::NonEmptyTerminalState(ref s) if s == "End"));
    }

    #[test]
    fn test_explicit_eof_state_is_recorded() {
        let t = Template::compile("test", "Value A (\\S+)\n\nStart\n  ^${A} -> Record\n\nEOF\n").unwrap();
        assert!(t.has_explicit_eof());
        assert_eq!(t.states().len(), 1);
    }

    #[test]
    fn test_rule_without_caret_rejected() {
        let err = compile_err("Value A (\\S+)\n\nStart\n  ${A} -> Record\n");
        assert!(matches!(err.kind, CompileErrorKind::MalformedRule(_)));
    }

    #[test]
    fn test_error_action_with_message() {
        let t = Template::compile(
            "test",
            "Value A (\\S+)\n\nStart\n  ^bad line -> Error \"unexpected output\"\n",
        )
        .unwrap();
        let rule = &t.state("Start").unwrap().rules[0];
        assert_eq!(rule.line_op, LineOp::Error);
        assert_eq!(rule.transition, Transition::Stay);
        assert_eq!(rule.error_message.as_deref(), Some("unexpected output"));
    }

    #[test]
    fn test_quoted_state_without_error_rejected() {
        let err = compile_err("Value A (\\S+)\n\nStart\n  ^x -> Next \"msg\"\n");
        assert!(matches!(err.kind, CompileErrorKind::MalformedRule(_)));
    }

    #[test]
    fn test_split_action_uses_last_arrow() {
        assert_eq!(split_action("^a -> b -> Record"), ("^a -> b", Some(" Record")));
        assert_eq!(split_action("^a->b"), ("^a->b", None));
        assert_eq!(split_action("^a"), ("^a", None));
    }

    #[test]
    fn test_comments_and_key_fields() {
        let t = Template::compile(
            "test",
            "# header comment\nValue Key Name (\\S+)\nValue Descr (.*)\n\n# state comment\nStart\n  # rule comment\n  ^${Name} ${Descr} -> Record\n",
        )
        .unwrap();
        assert_eq!(t.key_fields(), vec!["Name".to_string()]);
        assert_eq!(t.state("Start").unwrap().rules.len(), 1);
    }
}
