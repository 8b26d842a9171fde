//! The render descriptor.
//!
//! Every command result, success or failure, becomes one [`Report`]: a
//! variant name, an ordered set of fields, and an exit code. The text,
//! JSON and XML emitters read nothing else, so the three shapes cannot
//! drift apart.

use crate::aggregate::{Current, EventView, FailingTest, Handoff, Overview, Pending};
use crate::clock::format_timestamp;
use crate::config::Config;
use crate::error::CoreError;
use crate::model::Event;
use crate::service::{
    InitOutcome, NextOutcome, Shown, SwitchOutcome, TransitionOutcome, ValidationOutcome,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub variant: String,
    pub fields: Map<String, Value>,
    pub exit_code: i32,
}

impl Report {
    pub fn new(variant: impl Into<String>, message: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("message".to_string(), Value::String(message.into()));
        Self {
            variant: variant.into(),
            fields,
            exit_code: 0,
        }
    }

    pub fn field(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Copy every key of a serialisable struct into the report.
    pub fn fields_of(mut self, value: impl Serialize) -> Self {
        if let Ok(Value::Object(map)) = serde_json::to_value(value) {
            self.fields.extend(map);
        }
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn message(&self) -> &str {
        self.fields
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// `{ "<variant>": { ...fields } }`
    pub fn to_json(&self) -> Value {
        let mut root = Map::new();
        root.insert(self.variant.clone(), Value::Object(self.fields.clone()));
        Value::Object(root)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

impl From<&CoreError> for Report {
    fn from(err: &CoreError) -> Self {
        let report = Report::new("error", err.to_string())
            .field("type", err.kind().as_str())
            .exit_code(err.exit_code());
        match err {
            CoreError::EntityNotFound { kind, id } => report.field("entity", kind).field("id", id),
            CoreError::DocumentNotFound(path) => report.field("path", path),
            CoreError::ConfigExists(path) => report.field("path", path),
            CoreError::InvalidTransition {
                kind, id, from, to, ..
            } => report
                .field("entity", kind)
                .field("id", id)
                .field("current_status", from)
                .field("target_status", to),
            CoreError::Completion(diag) => report
                .field("entity", diag.kind)
                .field("id", &diag.id)
                .field("pending_phases", &diag.pending_phases)
                .field("pending_tasks", &diag.pending_tasks)
                .field("pending_tests", &diag.pending_tests)
                .field("failing_tests", &diag.failing_tests)
                .field("percent", diag.progress.percent)
                .field("progress", diag.progress),
            CoreError::Validation { id: Some(id), .. } => report.field("id", id),
            _ => report,
        }
    }
}

impl Report {
    /// Report for a failure that never reached the core, such as a
    /// broken stdout. Classified as I/O.
    pub fn io_failure(message: impl Into<String>) -> Self {
        Report::new("error", message).field("type", "io").exit_code(2)
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

impl From<&TransitionOutcome> for Report {
    fn from(o: &TransitionOutcome) -> Self {
        let message = match o.already {
            Some(already) => format!("{} {} is {}", o.kind.title(), o.id, already.describe()),
            None => match &o.note {
                Some(note) => format!(
                    "{} {} {}: {note}",
                    o.kind.title(),
                    o.id,
                    o.verb.past_tense()
                ),
                None => format!("{} {} {}", o.kind.title(), o.id, o.verb.past_tense()),
            },
        };
        let mut report = Report::new(o.event_type.as_str(), message)
            .field("entity", o.kind)
            .field("id", &o.id)
            .field("name", &o.name)
            .field("previous_status", o.previous)
            .field("status", o.status)
            .field("changed", o.changed());
        if let Some(already) = o.already {
            report = report.field(already.flag(), true);
        }
        if let Some(ts) = &o.timestamp {
            report = report.field("timestamp", format_timestamp(ts));
        }
        if let Some(requested) = &o.requested_at {
            report = report.field("requested_timestamp", format_timestamp(requested));
        }
        if let Some(result) = o.test_result {
            report = report.field("test_result", result);
        }
        if let Some(note) = &o.note {
            report = report.field("note", note);
        }
        report
            .field("percent", o.progress.percent)
            .field("progress", o.progress)
    }
}

impl From<&NextOutcome> for Report {
    fn from(o: &NextOutcome) -> Self {
        match o {
            NextOutcome::Started { phase, task } => {
                let primary = task.as_ref().or(phase.as_ref());
                let mut report = match primary {
                    Some(p) => Report::from(p),
                    None => Report::new("no_pending_work", "Nothing to start"),
                };
                if let (Some(phase), Some(_)) = (phase, task) {
                    report = report.field(
                        "started_phase",
                        serde_json::json!({ "id": phase.id, "name": phase.name }),
                    );
                    let message = format!("Phase {} started; {}", phase.id, report.message());
                    report.fields.insert("message".into(), Value::String(message));
                }
                report
            }
            NextOutcome::NoPendingTasks { phase_id } => Report::new(
                "no_pending_tasks",
                format!("Phase {phase_id} has no pending tasks"),
            )
            .field("phase_id", phase_id),
            NextOutcome::NoPendingWork => {
                Report::new("no_pending_work", "No pending phases or tasks remain")
            }
        }
    }
}

impl From<&Event> for Report {
    fn from(e: &Event) -> Self {
        Report::new("event_logged", format!("Logged {} event", e.event_type))
            .field("type", e.event_type.as_str())
            .field("event", EventView::from(e))
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

impl From<&Overview> for Report {
    fn from(o: &Overview) -> Self {
        let p = &o.progress;
        Report::new(
            "status",
            format!(
                "Epic {} ({}) is {}: {}% complete ({}/{} phases, {}/{} tasks, {}/{} tests)",
                o.epic.id,
                o.epic.name,
                o.epic.status,
                p.percent,
                p.done_phases,
                p.total_phases,
                p.done_tasks,
                p.total_tasks,
                p.done_tests,
                p.total_tests
            ),
        )
        .fields_of(o)
    }
}

impl From<&Current> for Report {
    fn from(c: &Current) -> Self {
        let message = match (&c.current_phase, &c.current_task) {
            (Some(p), Some(t)) => format!("Working on task {} in phase {}", t.id, p.id),
            (Some(p), None) => format!("Phase {} is in progress with no active task", p.id),
            _ => "No phase in progress".to_string(),
        };
        Report::new("current", message).fields_of(c)
    }
}

pub fn failing_report(tests: &[FailingTest]) -> Report {
    Report::new("failing", format!("{} failing test(s)", tests.len()))
        .field("count", tests.len())
        .field("failing_tests", tests)
}

impl From<&Pending> for Report {
    fn from(p: &Pending) -> Self {
        Report::new(
            "pending",
            format!(
                "{} pending phase(s), {} pending task(s)",
                p.pending_phases.len(),
                p.pending_tasks.len()
            ),
        )
        .fields_of(p)
    }
}

pub fn events_report(events: &[EventView]) -> Report {
    Report::new("events", format!("{} event(s)", events.len()))
        .field("count", events.len())
        .field("events", events)
}

impl From<&Handoff> for Report {
    fn from(h: &Handoff) -> Self {
        Report::new(
            "handoff",
            format!(
                "Handoff for epic {} ({}%, {} blocker(s))",
                h.epic.id,
                h.progress.percent,
                h.blockers.len()
            ),
        )
        .fields_of(h)
    }
}

impl From<&Shown> for Report {
    fn from(s: &Shown) -> Self {
        match s {
            Shown::Epic(e) => Report::new("epic", format!("Epic {}: {}", e.id, e.name)).fields_of(e),
            Shown::Phase(p) => {
                Report::new("phase", format!("Phase {}: {}", p.id, p.name)).fields_of(p)
            }
            Shown::Task(t) => Report::new("task", format!("Task {}: {}", t.id, t.name)).fields_of(t),
            Shown::Test(t) => Report::new("test", format!("Test {}: {}", t.id, t.name)).fields_of(t),
            Shown::Phases(v) => Report::new("phases", format!("{} phase(s)", v.len()))
                .field("count", v.len())
                .field("phases", v),
            Shown::Tasks(v) => Report::new("tasks", format!("{} task(s)", v.len()))
                .field("count", v.len())
                .field("tasks", v),
            Shown::Tests(v) => Report::new("tests", format!("{} test(s)", v.len()))
                .field("count", v.len())
                .field("tests", v),
        }
    }
}

impl From<&ValidationOutcome> for Report {
    fn from(v: &ValidationOutcome) -> Self {
        use crate::validate::Severity;
        let errors = v
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count();
        let warnings = v.findings.len() - errors;
        let message = if v.findings.is_empty() {
            format!("Epic {} is valid", v.epic_id)
        } else {
            format!(
                "Epic {}: {errors} error(s), {warnings} warning(s)",
                v.epic_id
            )
        };
        Report::new("validation", message)
            .field("document", &v.document)
            .field("valid", v.is_valid())
            .field("error_count", errors)
            .field("warning_count", warnings)
            .field("findings", &v.findings)
            .exit_code(if v.is_valid() { 0 } else { 1 })
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

impl From<&InitOutcome> for Report {
    fn from(o: &InitOutcome) -> Self {
        Report::new(
            "initialized",
            format!("Wrote {} for {}", o.config_path.display(), o.document.display()),
        )
        .field("config_path", &o.config_path)
        .field("document", &o.document)
        .field("current_epic", &o.config.current_epic)
        .field("project_name", &o.config.project_name)
        .field("default_assignee", &o.config.default_assignee)
    }
}

impl From<&SwitchOutcome> for Report {
    fn from(o: &SwitchOutcome) -> Self {
        Report::new("switched", format!("Current epic is now {}", o.current))
            .field("config_path", &o.config_path)
            .field("document", &o.document)
            .field("previous_epic", &o.previous)
            .field("current_epic", &o.current)
            .field("created", o.created)
    }
}

/// `config` output: where the config lives, what it says, and what it
/// resolves to for this invocation.
pub fn config_report(
    config_path: &Path,
    config: Option<&Config>,
    document: Option<&Path>,
) -> Report {
    let message = match config {
        Some(_) => format!("Config at {}", config_path.display()),
        None => format!("No config at {}", config_path.display()),
    };
    let agent = config.map_or(crate::config::DEFAULT_AGENT, Config::agent);
    Report::new("config", message)
        .field("config_path", config_path)
        .field("exists", config.is_some())
        .field("current_epic", config.and_then(|c| c.current_epic.as_ref()))
        .field("project_name", config.and_then(|c| c.project_name.as_ref()))
        .field("default_assignee", config.and_then(|c| c.default_assignee.as_ref()))
        .field("document", document)
        .field("agent", agent)
}
