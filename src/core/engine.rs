// NetSleuth - core/engine.rs
//
// Execution engine: runs a compiled template over line-oriented text.
//
// A `ParseRun` owns every piece of mutable state (current state, value
// buffer, emitted rows) for exactly one input; the `Template` is only read.
// Device text that matches no rule is never an error. The only failure is an
// exhausted line or time budget; a template `Error` action ends the run early
// and is reported on the output alongside the records emitted so far.

use crate::core::model::{FieldValue, Record};
use crate::core::template::{LineOp, RecordOp, Template, Transition, EOF_STATE, END_STATE};
use crate::util::constants;
use crate::util::error::{EngineError, ParseTimeout, TimeoutBudget};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Per-run resource budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub max_lines: usize,
    pub max_duration: Duration,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_lines: constants::DEFAULT_MAX_RUN_LINES,
            max_duration: Duration::from_millis(constants::DEFAULT_MAX_RUN_MILLIS),
        }
    }
}

/// Filldown values carried from one run into the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilldownSeed {
    pub values: BTreeMap<String, FieldValue>,
}

/// Where and why a template `Error` action stopped a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunAbort {
    pub template: String,
    pub message: Option<String>,
    /// Template line of the rule that fired.
    pub rule_line: usize,
    /// 1-based input line that matched it.
    pub input_line: usize,
}

impl From<RunAbort> for EngineError {
    fn from(a: RunAbort) -> Self {
        EngineError::ErrorAction {
            template: a.template,
            message: a.message,
            rule_line: a.rule_line,
            input_line: a.input_line,
        }
    }
}

/// Result of a completed (or aborted) run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub records: Vec<Record>,
    pub lines_processed: usize,
    /// Name of the state the run finished in (`End`/`EOF` when it stopped
    /// on a terminal transition).
    pub final_state: String,
    pub aborted: Option<RunAbort>,
    /// Filldown values still set when the run finished; pass to
    /// `run_chained` to continue them into the next input.
    pub filldown: FilldownSeed,
}

impl RunOutput {
    /// The records, or the `Error` action that stopped the run.
    pub fn into_records(self) -> Result<Vec<Record>, EngineError> {
        match self.aborted {
            Some(abort) => Err(abort.into()),
            None => Ok(self.records),
        }
    }
}

/// Run `template` over `text` from a clean buffer.
pub fn run(template: &Template, text: &str, limits: &RunLimits) -> Result<RunOutput, ParseTimeout> {
    ParseRun::new(template, *limits).execute(text)
}

/// Run `template` over `text` with Filldown values seeded from an earlier run.
pub fn run_chained(
    template: &Template,
    text: &str,
    limits: &RunLimits,
    seed: &FilldownSeed,
) -> Result<RunOutput, ParseTimeout> {
    ParseRun::new(template, *limits).with_seed(seed).execute(text)
}

// =============================================================================
// Parse run
// =============================================================================

#[derive(Debug, Clone)]
enum Slot {
    Scalar(Option<String>),
    List(Vec<String>),
}

impl Slot {
    fn empty_for(list: bool) -> Self {
        if list {
            Slot::List(Vec::new())
        } else {
            Slot::Scalar(None)
        }
    }

    /// Never matched (or cleared). A matched empty string counts as set.
    fn is_unset(&self) -> bool {
        match self {
            Slot::Scalar(v) => v.is_none(),
            Slot::List(items) => items.is_empty(),
        }
    }

    /// Unset or matched empty.
    fn is_blank(&self) -> bool {
        match self {
            Slot::Scalar(v) => v.as_deref().map_or(true, str::is_empty),
            Slot::List(items) => items.is_empty(),
        }
    }

    fn snapshot(&self) -> FieldValue {
        match self {
            Slot::Scalar(v) => FieldValue::Scalar(v.clone().unwrap_or_default()),
            Slot::List(items) => FieldValue::List(items.clone()),
        }
    }
}

enum LineOutcome {
    Consumed,
    Stop(Transition),
    Abort(RunAbort),
}

/// Mutable state of one engine execution.
pub struct ParseRun<'t> {
    template: &'t Template,
    limits: RunLimits,
    state: usize,
    slots: Vec<Slot>,
    rows: Vec<Vec<FieldValue>>,
    lines: usize,
}

impl<'t> ParseRun<'t> {
    pub fn new(template: &'t Template, limits: RunLimits) -> Self {
        let slots = template
            .values()
            .iter()
            .map(|v| Slot::empty_for(v.options.list))
            .collect();
        Self {
            template,
            limits,
            state: template.start_index(),
            slots,
            rows: Vec::new(),
            lines: 0,
        }
    }

    /// Pre-load Filldown values. Names the template does not declare as
    /// Filldown are ignored.
    pub fn with_seed(mut self, seed: &FilldownSeed) -> Self {
        for (name, value) in &seed.values {
            let Some(idx) = self.template.value_index(name) else {
                continue;
            };
            if !self.template.values()[idx].options.filldown {
                continue;
            }
            self.slots[idx] = match (value, &self.slots[idx]) {
                (FieldValue::List(items), Slot::List(_)) => Slot::List(items.clone()),
                (FieldValue::Scalar(s), Slot::Scalar(_)) => Slot::Scalar(Some(s.clone())),
                _ => continue,
            };
        }
        self
    }

    pub fn execute(mut self, text: &str) -> Result<RunOutput, ParseTimeout> {
        let started = Instant::now();
        let mut stopped: Option<Transition> = None;
        let mut aborted: Option<RunAbort> = None;

        for (idx, line) in text.lines().enumerate() {
            if self.lines >= self.limits.max_lines {
                return Err(self.timeout(TimeoutBudget::Lines(self.limits.max_lines)));
            }
            self.lines += 1;
            if self.lines % constants::TIME_CHECK_INTERVAL_LINES == 0
                && started.elapsed() > self.limits.max_duration
            {
                return Err(self.timeout(TimeoutBudget::Time(self.limits.max_duration)));
            }

            match self.check_line(line, idx + 1) {
                LineOutcome::Consumed => {}
                LineOutcome::Stop(terminal) => {
                    stopped = Some(terminal);
                    break;
                }
                LineOutcome::Abort(abort) => {
                    tracing::debug!(
                        template = self.template.name(),
                        rule_line = abort.rule_line,
                        input_line = abort.input_line,
                        "Template Error action stopped the run"
                    );
                    aborted = Some(abort);
                    break;
                }
            }
        }

        let ended = stopped == Some(Transition::End);
        if aborted.is_none() && !ended && !self.template.has_explicit_eof() {
            self.append_record();
        }

        let final_state = match stopped {
            Some(Transition::End) => END_STATE.to_string(),
            Some(Transition::Eof) => EOF_STATE.to_string(),
            _ => self.template.state_at(self.state).name.clone(),
        };
        let filldown = self.filldown_snapshot();
        let names = self.template.value_names();
        let records = self
            .rows
            .into_iter()
            .map(|values| Record::new(names.clone(), values))
            .collect();

        Ok(RunOutput {
            records,
            lines_processed: self.lines,
            final_state,
            aborted,
            filldown,
        })
    }

    fn timeout(&self, budget: TimeoutBudget) -> ParseTimeout {
        ParseTimeout {
            template: self.template.name().to_string(),
            lines_processed: self.lines,
            budget,
        }
    }

    fn check_line(&mut self, line: &str, line_no: usize) -> LineOutcome {
        let template = self.template;
        let state = template.state_at(self.state);

        for rule in &state.rules {
            let Some(caps) = rule.regex().captures(line) else {
                continue;
            };
            for &(group, value_idx) in rule.bindings() {
                self.assign(value_idx, caps.get(group).map(|m| m.as_str()));
            }

            match rule.record_op {
                RecordOp::NoRecord => {}
                RecordOp::Record => self.append_record(),
                RecordOp::Clear => self.clear(),
                RecordOp::Clearall => self.clear_all(),
            }

            match rule.line_op {
                LineOp::Continue => continue,
                LineOp::Error => {
                    return LineOutcome::Abort(RunAbort {
                        template: template.name().to_string(),
                        message: rule.error_message.clone(),
                        rule_line: rule.line,
                        input_line: line_no,
                    })
                }
                LineOp::Next => {
                    return match rule.transition {
                        Transition::Stay => LineOutcome::Consumed,
                        Transition::Goto(next) => {
                            self.state = next;
                            LineOutcome::Consumed
                        }
                        terminal => LineOutcome::Stop(terminal),
                    };
                }
            }
        }
        LineOutcome::Consumed
    }

    fn assign(&mut self, idx: usize, matched: Option<&str>) {
        match &mut self.slots[idx] {
            Slot::Scalar(v) => *v = matched.map(str::to_string),
            Slot::List(items) => {
                if let Some(s) = matched {
                    items.push(s.to_string());
                }
            }
        }

        if self.template.values()[idx].options.fillup && matched.is_some_and(|s| !s.is_empty()) {
            let value = self.slots[idx].snapshot();
            for row in self.rows.iter_mut().rev() {
                if !row[idx].is_empty() {
                    break;
                }
                row[idx] = value.clone();
            }
        }
    }

    fn append_record(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        let values = self.template.values();
        if values
            .iter()
            .zip(&self.slots)
            .any(|(v, slot)| v.options.required && slot.is_blank())
        {
            self.clear();
            return;
        }
        if self.slots.iter().all(Slot::is_unset) {
            return;
        }
        let row = self.slots.iter().map(Slot::snapshot).collect();
        self.rows.push(row);
        self.clear();
    }

    fn clear(&mut self) {
        for (value, slot) in self.template.values().iter().zip(self.slots.iter_mut()) {
            if !value.options.filldown {
                *slot = Slot::empty_for(value.options.list);
            }
        }
    }

    fn clear_all(&mut self) {
        for (value, slot) in self.template.values().iter().zip(self.slots.iter_mut()) {
            *slot = Slot::empty_for(value.options.list);
        }
    }

    fn filldown_snapshot(&self) -> FilldownSeed {
        let values = self
            .template
            .values()
            .iter()
            .zip(&self.slots)
            .filter(|(v, slot)| v.options.filldown && !slot.is_unset())
            .map(|(v, slot)| (v.name.clone(), slot.snapshot()))
            .collect();
        FilldownSeed { values }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(text: &str) -> Template {
        Template::compile("test", text).unwrap()
    }

    fn parse(template: &Template, input: &str) -> RunOutput {
        run(template, input, &RunLimits::default()).unwrap()
    }

    fn column(out: &RunOutput, name: &str) -> Vec<String> {
        out.records
            .iter()
            .map(|r| r.get(name).map(FieldValue::to_text).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_single_record_with_literal_dollar_anchor() {
        let t = compile("Value Required Version (\\S+)\n\nStart\n  ^Version ${Version}$$ -> Record\n");
        let out = parse(&t, "Version 15.2\nUptime 3d");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].get_str("Version"), Some("15.2"));
        assert_eq!(out.lines_processed, 2);
        assert!(out.aborted.is_none());
    }

    #[test]
    fn test_required_value_excludes_record() {
        let t = compile(
            "Value Required Name (\\S+)\nValue Speed (\\d+)\n\nStart\n  ^name ${Name}\n  ^speed ${Speed}\n  ^end -> Record\n",
        );
        let out = parse(&t, "speed 100\nend\nname eth0\nspeed 10\nend\n");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].get_str("Name"), Some("eth0"));
        assert_eq!(out.records[0].get_str("Speed"), Some("10"));
    }

    #[test]
    fn test_filldown_persists_across_records() {
        let t = compile(
            "Value Filldown Chassis (\\S+)\nValue Required Port (\\S+)\n\nStart\n  ^chassis ${Chassis}\n  ^port ${Port} -> Record\n",
        );
        let out = parse(&t, "chassis C1\nport p1\nport p2\nchassis C2\nport p3\n");
        assert_eq!(column(&out, "Chassis"), vec!["C1", "C1", "C2"]);
        assert_eq!(column(&out, "Port"), vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn test_filldown_only_row_is_dropped_at_eof() {
        let t = compile(
            "Value Filldown Chassis (\\S+)\nValue Required Port (\\S+)\n\nStart\n  ^chassis ${Chassis}\n  ^port ${Port} -> Record\n",
        );
        let out = parse(&t, "chassis C1\nport p1\n");
        assert_eq!(out.records.len(), 1);
        assert_eq!(
            out.filldown.values.get("Chassis"),
            Some(&FieldValue::Scalar("C1".into()))
        );
    }

    #[test]
    fn test_list_accumulates_in_order() {
        let t = compile(
            "Value Name (\\S+)\nValue List Addr (\\S+)\n\nStart\n  ^iface ${Name}\n  ^  addr ${Addr}\n  ^end -> Record\n",
        );
        let out = parse(&t, "iface e0\n  addr a\n  addr b\n  addr c\nend\n");
        assert_eq!(out.records.len(), 1);
        assert_eq!(
            out.records[0].get("Addr"),
            Some(&FieldValue::List(vec!["a".into(), "b".into(), "c".into()]))
        );
    }

    #[test]
    fn test_continue_lets_later_rule_see_same_line() {
        let t = compile(
            "Value A (\\w+)\nValue B (\\w+)\n\nStart\n  ^${A} -> Continue\n  ^\\w+ ${B} -> Record\n",
        );
        let out = parse(&t, "one two\n");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].get_str("A"), Some("one"));
        assert_eq!(out.records[0].get_str("B"), Some("two"));
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let t = compile(
            "Value A (\\w+)\nValue B (\\w+)\n\nStart\n  ^${A}\n  ^${B} -> Record\n",
        );
        let out = parse(&t, "one\n");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].get_str("A"), Some("one"));
        assert_eq!(out.records[0].get_str("B"), Some(""));
    }

    #[test]
    fn test_state_transition() {
        let t = compile(
            "Value Item (\\S+)\n\nStart\n  ^BEGIN -> Body\n\nBody\n  ^item ${Item} -> Record\n",
        );
        let out = parse(&t, "item ignored\nBEGIN\nitem x\nitem y\n");
        assert_eq!(column(&out, "Item"), vec!["x", "y"]);
        assert_eq!(out.final_state, "Body");
    }

    #[test]
    fn test_end_suppresses_implicit_record() {
        let t = compile("Value A (\\S+)\n\nStart\n  ^a ${A}\n  ^stop -> End\n");
        let out = parse(&t, "a 1\nstop\na 2\n");
        assert!(out.records.is_empty());
        assert_eq!(out.final_state, "End");
        assert_eq!(out.lines_processed, 2);
    }

    #[test]
    fn test_eof_transition_keeps_implicit_record() {
        let t = compile("Value A (\\S+)\n\nStart\n  ^a ${A}\n  ^stop -> EOF\n");
        let out = parse(&t, "a 1\nstop\na 2\n");
        assert_eq!(column(&out, "A"), vec!["1"]);
        assert_eq!(out.final_state, "EOF");
    }

    #[test]
    fn test_explicit_eof_state_suppresses_implicit_record() {
        let t = compile("Value A (\\S+)\n\nStart\n  ^a ${A}\n\nEOF\n");
        let out = parse(&t, "a 1\n");
        assert!(out.records.is_empty());
    }

    #[test]
    fn test_clearall_drops_filldown() {
        let t = compile(
            "Value Filldown F (\\S+)\nValue V (\\S+)\n\nStart\n  ^f ${F}\n  ^v ${V} -> Record\n  ^reset -> Clearall\n",
        );
        let out = parse(&t, "f X\nv 1\nreset\nv 2\n");
        assert_eq!(column(&out, "F"), vec!["X", ""]);
        assert_eq!(column(&out, "V"), vec!["1", "2"]);
    }

    #[test]
    fn test_clear_keeps_filldown() {
        let t = compile(
            "Value Filldown F (\\S+)\nValue V (\\S+)\n\nStart\n  ^f ${F}\n  ^v ${V}\n  ^drop -> Clear\n  ^emit -> Record\n",
        );
        let out = parse(&t, "f X\nv 1\ndrop\nemit\nv 2\nemit\n");
        // The buffer still holds F at end of input, so the implicit record
        // is emitted as well.
        assert_eq!(column(&out, "F"), vec!["X", "X", "X"]);
        assert_eq!(column(&out, "V"), vec!["", "2", ""]);
    }

    #[test]
    fn test_required_value_suppresses_filldown_only_record() {
        let t = compile(
            "Value Filldown F (\\S+)\nValue Required V (\\S+)\n\nStart\n  ^f ${F}\n  ^v ${V}\n  ^drop -> Clear\n  ^emit -> Record\n",
        );
        let out = parse(&t, "f X\nv 1\ndrop\nemit\nv 2\nemit\n");
        assert_eq!(column(&out, "F"), vec!["X"]);
        assert_eq!(column(&out, "V"), vec!["2"]);
    }

    #[test]
    fn test_filldown_only_buffer_emits_implicit_record() {
        let t = compile("Value Filldown F (\\S+)\nValue V (\\S+)\n\nStart\n  ^f ${F}\n");
        let out = parse(&t, "f X\nnoise\n");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].get_str("F"), Some("X"));
        assert_eq!(out.records[0].get_str("V"), Some(""));
    }

    const FILLUP_TEMPLATE: &str = "Value Required Item (\\S+)\nValue Fillup Group (\\S+)\n\nStart\n  ^item ${Item} -> Record\n  ^group ${Group}\n";

    #[test]
    fn test_fillup_backfills_earlier_records() {
        let t = compile(FILLUP_TEMPLATE);
        let out = parse(&t, "item a\nitem b\ngroup G1\n");
        assert_eq!(column(&out, "Item"), vec!["a", "b"]);
        assert_eq!(column(&out, "Group"), vec!["G1", "G1"]);
    }

    #[test]
    fn test_fillup_stops_at_filled_record() {
        let t = compile(FILLUP_TEMPLATE);
        let out = parse(&t, "item a\ngroup G1\nitem b\nitem c\ngroup G2\n");
        assert_eq!(column(&out, "Item"), vec!["a", "b", "c"]);
        assert_eq!(column(&out, "Group"), vec!["G1", "G1", "G2"]);
    }

    #[test]
    fn test_optional_group_resets_scalar() {
        let t = compile(
            "Value A (\\w+)\nValue B (\\w+)\n\nStart\n  ^x ${A}(?: ${B})? -> Record\n",
        );
        let out = parse(&t, "x one two\nx three\n");
        assert_eq!(column(&out, "B"), vec!["two", ""]);
    }

    #[test]
    fn test_error_action_keeps_partial_records() {
        let t = compile(
            "Value A (\\S+)\n\nStart\n  ^a ${A} -> Record\n  ^% Invalid -> Error \"device rejected command\"\n",
        );
        let out = parse(&t, "a 1\n% Invalid input\na 2\n");
        assert_eq!(column(&out, "A"), vec!["1"]);
        let abort = out.aborted.clone().unwrap();
        assert_eq!(abort.input_line, 2);
        assert_eq!(abort.rule_line, 5);
        assert_eq!(abort.message.as_deref(), Some("device rejected command"));
        assert!(matches!(
            out.into_records(),
            Err(EngineError::ErrorAction { input_line: 2, .. })
        ));
    }

    #[test]
    fn test_line_budget_trips_timeout() {
        let t = compile("Value A (\\S+)\n\nStart\n  ^${A} -> Record\n");
        let limits = RunLimits {
            max_lines: 3,
            ..RunLimits::default()
        };
        let err = run(&t, "a\nb\nc\nd\n", &limits).unwrap_err();
        assert_eq!(err.budget, TimeoutBudget::Lines(3));
        assert_eq!(err.lines_processed, 3);

        assert!(run(&t, "a\nb\nc\n", &limits).is_ok());
    }

    #[test]
    fn test_time_budget_trips_timeout() {
        let t = compile("Value A (\\S+)\n\nStart\n  ^${A} -> Record\n");
        let limits = RunLimits {
            max_lines: usize::MAX,
            max_duration: Duration::ZERO,
        };
        let input = "x\n".repeat(constants::TIME_CHECK_INTERVAL_LINES * 2);
        let err = run(&t, &input, &limits).unwrap_err();
        assert!(matches!(err.budget, TimeoutBudget::Time(_)));
    }

    #[test]
    fn test_run_is_deterministic() {
        let t = compile(
            "Value Filldown F (\\S+)\nValue List L (\\S+)\nValue Required V (\\S+)\n\nStart\n  ^f ${F}\n  ^l ${L}\n  ^v ${V} -> Record\n",
        );
        let input = "f A\nl 1\nl 2\nv x\nv y\nf B\nl 3\nv z\n";
        let first = parse(&t, input);
        let second = parse(&t, input);
        assert_eq!(first.records, second.records);
        assert_eq!(first.records.len(), 3);
    }

    #[test]
    fn test_empty_input_yields_no_records() {
        let t = compile("Value A (\\S+)\n\nStart\n  ^${A} -> Record\n");
        let out = parse(&t, "");
        assert!(out.records.is_empty());
        assert_eq!(out.lines_processed, 0);
    }

    #[test]
    fn test_template_without_values_emits_nothing() {
        let t = compile("\nStart\n  ^.* -> Record\n");
        let out = parse(&t, "anything\n");
        assert!(out.records.is_empty());
    }

    #[test]
    fn test_chained_run_seeds_filldown() {
        let t = compile(
            "Value Filldown Host (\\S+)\nValue Required Port (\\S+)\n\nStart\n  ^host ${Host}\n  ^port ${Port} -> Record\n",
        );
        let first = parse(&t, "host R1\nport p1\n");
        let second = run_chained(&t, "port p2\n", &RunLimits::default(), &first.filldown).unwrap();
        assert_eq!(column(&second, "Host"), vec!["R1"]);

        let unseeded = parse(&t, "port p2\n");
        assert_eq!(column(&unseeded, "Host"), vec![""]);
    }
}
