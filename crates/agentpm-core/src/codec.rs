//! Epic document codec: XML on disk <-> [`Epic`] in memory.
//!
//! Reading is tolerant (legacy status names, a test carrying only the old
//! single `status` attribute, unknown elements); writing is canonical, so a
//! second write of any accepted document is byte-identical to the first.

use crate::clock::{format_timestamp, parse_timestamp};
use crate::error::{CoreError, Result};
use crate::model::{CurrentState, Epic, Event, FileChange, Phase, Task, Test};
use crate::types::{EventType, Status, TestResult};
use crate::validate::{self, Severity};
use crate::xml::{self, XmlNode};
use chrono::{DateTime, Utc};
use std::path::Path;

// ---------------------------------------------------------------------------
// File-level API
// ---------------------------------------------------------------------------

/// Read and decode a document without enforcing invariants.
pub fn load(path: &Path) -> Result<Epic> {
    let data = crate::io::read_document(path)?;
    decode(&data)
}

/// Read, decode, and refuse documents with error-severity findings.
pub fn load_checked(path: &Path) -> Result<Epic> {
    let epic = load(path)?;
    let findings = validate::check(&epic);
    for warning in findings.iter().filter(|f| f.severity == Severity::Warning) {
        tracing::debug!(code = warning.code, "{}", warning.message);
    }
    if let Some(first) = findings.iter().find(|f| f.severity == Severity::Error) {
        let count = findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count();
        return Err(CoreError::validation(
            first.id.as_deref(),
            format!(
                "document {} has {count} invariant violation(s); first: {} (run 'agentpm validate')",
                path.display(),
                first.message
            ),
        ));
    }
    Ok(epic)
}

/// Check invariants and write the document atomically.
pub fn save(path: &Path, epic: &Epic) -> Result<()> {
    if let Some(err) = validate::check(epic)
        .into_iter()
        .find(|f| f.severity == Severity::Error)
    {
        return Err(CoreError::validation(err.id.as_deref(), err.message));
    }
    let data = encode(epic)?;
    crate::io::atomic_write(path, data.as_bytes())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

pub fn decode(input: &str) -> Result<Epic> {
    let root = xml::parse(input)?;
    if root.name != "epic" {
        return Err(CoreError::Parse(format!(
            "root element is <{}>, expected <epic>",
            root.name
        )));
    }

    let mut epic = Epic::new(root.require("id")?, root.get("name").unwrap_or_default());
    epic.status = status_attr(&root, "status")?;
    epic.description = root.child_text("description");
    epic.created_at = ts_attr(&root, "created_at")?;
    epic.started_at = ts_attr(&root, "started")?;
    epic.completed_at = ts_attr(&root, "completed_at")?;
    epic.paused_at = ts_attr(&root, "paused_at")?;
    epic.cancelled_at = ts_attr(&root, "cancelled_at")?;
    epic.cancellation_reason = root.child_text("cancellation_reason");
    epic.outline = root.child_text("outline");

    if let Some(phases) = root.find("phases") {
        epic.phases = phases
            .children_named("phase")
            .map(decode_phase)
            .collect::<Result<_>>()?;
    }
    if let Some(tasks) = root.find("tasks") {
        epic.tasks = tasks
            .children_named("task")
            .map(decode_task)
            .collect::<Result<_>>()?;
    }
    if let Some(tests) = root.find("tests") {
        epic.tests = tests
            .children_named("test")
            .map(decode_test)
            .collect::<Result<_>>()?;
    }
    if let Some(events) = root.find("events") {
        epic.events = events
            .children_named("event")
            .map(decode_event)
            .collect::<Result<_>>()?;
    }
    if let Some(state) = root.find("current_state") {
        epic.current_state = CurrentState {
            next_action: state.child_text("next_action"),
        };
    }
    Ok(epic)
}

fn decode_phase(node: &XmlNode) -> Result<Phase> {
    Ok(Phase {
        id: node.require("id")?.to_string(),
        name: node.get("name").unwrap_or_default().to_string(),
        status: status_attr(node, "status")?,
        description: node.child_text("description"),
        started_at: ts_attr(node, "started_at")?,
        completed_at: ts_attr(node, "completed_at")?,
        cancelled_at: ts_attr(node, "cancelled_at")?,
        cancellation_reason: node.child_text("cancellation_reason"),
    })
}

fn decode_task(node: &XmlNode) -> Result<Task> {
    Ok(Task {
        id: node.require("id")?.to_string(),
        phase_id: node.require("phase_id")?.to_string(),
        name: node.get("name").unwrap_or_default().to_string(),
        status: status_attr(node, "status")?,
        description: node.child_text("description"),
        started_at: ts_attr(node, "started_at")?,
        completed_at: ts_attr(node, "completed_at")?,
        cancelled_at: ts_attr(node, "cancelled_at")?,
        cancellation_reason: node.child_text("cancellation_reason"),
    })
}

fn decode_test(node: &XmlNode) -> Result<Test> {
    let coarse = node.get("status");
    let status = match (node.get("test_status"), coarse) {
        (Some(lifecycle), _) => parse_status(node, lifecycle)?,
        (None, Some("passed")) => Status::Done,
        (None, Some("failed")) => Status::Wip,
        (None, Some(s)) => parse_status(node, s)?,
        (None, None) => {
            return Err(CoreError::Parse(format!(
                "<test id=\"{}\"> has neither test_status nor status",
                node.get("id").unwrap_or("?")
            )))
        }
    };
    let result = match node.get("test_result") {
        Some(r) => Some(TestResult::parse(r).ok_or_else(|| {
            CoreError::Parse(format!("unknown test_result '{r}'"))
        })?),
        None => match coarse {
            Some("passed") => Some(TestResult::Passing),
            Some("failed") => Some(TestResult::Failing),
            _ => None,
        },
    };

    Ok(Test {
        id: node.require("id")?.to_string(),
        task_id: node.require("task_id")?.to_string(),
        phase_id: node.get("phase_id").map(str::to_string),
        name: node.get("name").unwrap_or_default().to_string(),
        description: node.child_text("description"),
        given: node.child_text("given"),
        when: node.child_text("when"),
        then: node.child_text("then"),
        status,
        result,
        started_at: ts_attr(node, "started_at")?,
        passed_at: ts_attr(node, "passed_at")?,
        failed_at: ts_attr(node, "failed_at")?,
        cancelled_at: ts_attr(node, "cancelled_at")?,
        failure_note: node.child_text("failure_note"),
        cancellation_reason: node.child_text("cancellation_reason"),
    })
}

fn decode_event(node: &XmlNode) -> Result<Event> {
    let timestamp = ts_attr(node, "timestamp")?
        .ok_or_else(|| CoreError::Parse("<event> is missing attribute 'timestamp'".to_string()))?;
    let files = match node.find("files") {
        Some(files) => files
            .children_named("file")
            .map(|f| {
                Ok(FileChange {
                    path: f.require("path")?.to_string(),
                    action: f.get("action").unwrap_or("modified").to_string(),
                })
            })
            .collect::<Result<_>>()?,
        None => Vec::new(),
    };
    Ok(Event {
        timestamp,
        requested_at: ts_attr(node, "requested_timestamp")?,
        agent: node.get("agent").unwrap_or_default().to_string(),
        event_type: EventType::from_name(node.require("type")?),
        phase_id: node.get("phase_id").map(str::to_string),
        task_id: node.get("task_id").map(str::to_string),
        test_id: node.get("test_id").map(str::to_string),
        message: node.child_text("message").unwrap_or_default(),
        files,
    })
}

fn status_attr(node: &XmlNode, key: &str) -> Result<Status> {
    parse_status(node, node.require(key)?)
}

fn parse_status(node: &XmlNode, value: &str) -> Result<Status> {
    Status::parse(value).ok_or_else(|| {
        CoreError::Parse(format!(
            "<{} id=\"{}\"> has unknown status '{value}'",
            node.name,
            node.get("id").unwrap_or("?")
        ))
    })
}

fn ts_attr(node: &XmlNode, key: &str) -> Result<Option<DateTime<Utc>>> {
    match node.get(key) {
        None | Some("") => Ok(None),
        Some(raw) => parse_timestamp(raw).map(Some).ok_or_else(|| {
            CoreError::Parse(format!(
                "<{}> attribute {key}='{raw}' is not an ISO-8601 timestamp",
                node.name
            ))
        }),
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

pub fn encode(epic: &Epic) -> Result<String> {
    xml::to_string(&epic_node(epic))
}

fn epic_node(epic: &Epic) -> XmlNode {
    let phases = epic
        .phases
        .iter()
        .fold(XmlNode::new("phases"), |acc, p| acc.child(phase_node(p)));
    let tasks = epic
        .tasks
        .iter()
        .fold(XmlNode::new("tasks"), |acc, t| acc.child(task_node(t)));
    let tests = epic
        .tests
        .iter()
        .fold(XmlNode::new("tests"), |acc, t| acc.child(test_node(t)));
    let events = epic
        .events
        .iter()
        .fold(XmlNode::new("events"), |acc, e| acc.child(event_node(e)));
    let current_state = XmlNode::new("current_state")
        .text_child("next_action", epic.current_state.next_action.as_deref());

    XmlNode::new("epic")
        .attr("id", &epic.id)
        .attr("name", &epic.name)
        .attr("status", epic.status.as_str())
        .attr_opt("created_at", epic.created_at.as_ref().map(format_timestamp))
        .attr_opt("started", epic.started_at.as_ref().map(format_timestamp))
        .attr_opt("completed_at", epic.completed_at.as_ref().map(format_timestamp))
        .attr_opt("paused_at", epic.paused_at.as_ref().map(format_timestamp))
        .attr_opt("cancelled_at", epic.cancelled_at.as_ref().map(format_timestamp))
        .text_child("description", epic.description.as_deref())
        .text_child("cancellation_reason", epic.cancellation_reason.as_deref())
        .text_child("outline", epic.outline.as_deref())
        .child(phases)
        .child(tasks)
        .child(tests)
        .child(events)
        .child(current_state)
}

fn phase_node(p: &Phase) -> XmlNode {
    XmlNode::new("phase")
        .attr("id", &p.id)
        .attr("name", &p.name)
        .attr("status", p.status.as_str())
        .attr_opt("started_at", p.started_at.as_ref().map(format_timestamp))
        .attr_opt("completed_at", p.completed_at.as_ref().map(format_timestamp))
        .attr_opt("cancelled_at", p.cancelled_at.as_ref().map(format_timestamp))
        .text_child("description", p.description.as_deref())
        .text_child("cancellation_reason", p.cancellation_reason.as_deref())
}

fn task_node(t: &Task) -> XmlNode {
    XmlNode::new("task")
        .attr("id", &t.id)
        .attr("phase_id", &t.phase_id)
        .attr("name", &t.name)
        .attr("status", t.status.as_str())
        .attr_opt("started_at", t.started_at.as_ref().map(format_timestamp))
        .attr_opt("completed_at", t.completed_at.as_ref().map(format_timestamp))
        .attr_opt("cancelled_at", t.cancelled_at.as_ref().map(format_timestamp))
        .text_child("description", t.description.as_deref())
        .text_child("cancellation_reason", t.cancellation_reason.as_deref())
}

fn test_node(t: &Test) -> XmlNode {
    // `status` is the coarse field kept for older readers; it always
    // mirrors the lifecycle.
    XmlNode::new("test")
        .attr("id", &t.id)
        .attr("task_id", &t.task_id)
        .attr_opt("phase_id", t.phase_id.as_deref())
        .attr("name", &t.name)
        .attr("status", t.status.as_str())
        .attr("test_status", t.status.as_str())
        .attr_opt("test_result", t.result.map(TestResult::as_str))
        .attr_opt("started_at", t.started_at.as_ref().map(format_timestamp))
        .attr_opt("passed_at", t.passed_at.as_ref().map(format_timestamp))
        .attr_opt("failed_at", t.failed_at.as_ref().map(format_timestamp))
        .attr_opt("cancelled_at", t.cancelled_at.as_ref().map(format_timestamp))
        .text_child("description", t.description.as_deref())
        .text_child("given", t.given.as_deref())
        .text_child("when", t.when.as_deref())
        .text_child("then", t.then.as_deref())
        .text_child("failure_note", t.failure_note.as_deref())
        .text_child("cancellation_reason", t.cancellation_reason.as_deref())
}

fn event_node(e: &Event) -> XmlNode {
    let mut node = XmlNode::new("event")
        .attr("timestamp", format_timestamp(&e.timestamp))
        .attr_opt("requested_timestamp", e.requested_at.as_ref().map(format_timestamp))
        .attr("agent", &e.agent)
        .attr("type", e.event_type.as_str())
        .attr_opt("phase_id", e.phase_id.as_deref())
        .attr_opt("task_id", e.task_id.as_deref())
        .attr_opt("test_id", e.test_id.as_deref())
        .text_child("message", Some(e.message.as_str()).filter(|m| !m.is_empty()));
    if !e.files.is_empty() {
        let files = e.files.iter().fold(XmlNode::new("files"), |acc, f| {
            acc.child(
                XmlNode::new("file")
                    .attr("path", &f.path)
                    .attr("action", &f.action),
            )
        });
        node = node.child(files);
    }
    node
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LEGACY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<epic id="epic-1" name="Legacy" status="active" created_at="2025-08-01T09:00:00Z" started="2025-08-01T10:00:00Z">
  <outline>Setup, then build</outline>
  <phases>
    <phase id="p1" name="Setup" status="completed" started_at="2025-08-01T10:00:00Z" completed_at="2025-08-01T11:00:00Z"/>
    <phase id="p2" name="Build" status="planning"/>
  </phases>
  <tasks>
    <task id="t1" phase_id="p1" name="Init repo" status="completed" started_at="2025-08-01T10:00:00Z" completed_at="2025-08-01T10:30:00Z"/>
  </tasks>
  <tests>
    <test id="x1" task_id="t1" name="Repo exists" status="passed" started_at="2025-08-01T10:05:00Z" passed_at="2025-08-01T10:20:00Z">
      <given>an empty dir</given>
      <when>init runs</when>
      <then>a repo exists</then>
    </test>
  </tests>
  <events>
    <event timestamp="2025-08-01T10:00:00Z" agent="bot" type="epic_started"><message>go</message></event>
  </events>
  <current_state><next_action>Start p2</next_action></current_state>
</epic>
"#;

    #[test]
    fn legacy_statuses_load_and_normalize() {
        let epic = decode(LEGACY).unwrap();
        assert_eq!(epic.status, Status::Wip);
        assert_eq!(epic.phases[0].status, Status::Done);
        assert_eq!(epic.phases[1].status, Status::Pending);
        assert_eq!(epic.tests[0].status, Status::Done);
        assert_eq!(epic.tests[0].result, Some(TestResult::Passing));
        assert_eq!(epic.current_state.next_action.as_deref(), Some("Start p2"));

        let out = encode(&epic).unwrap();
        assert!(out.contains(r#"status="wip""#));
        assert!(out.contains(r#"status="done""#));
        assert!(out.contains(r#"test_status="done""#));
        assert!(out.contains(r#"test_result="passing""#));
        assert!(!out.contains("active"));
        assert!(!out.contains("planning"));
        assert!(!out.contains("completed\""));
        // Semantics are unchanged by the rewrite.
        assert_eq!(decode(&out).unwrap(), epic);
    }

    #[test]
    fn second_write_is_byte_identical() {
        let first = encode(&decode(LEGACY).unwrap()).unwrap();
        let second = encode(&decode(&first).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn legacy_failed_test_is_wip_and_failing() {
        let doc = r#"<epic id="e" name="E" status="wip">
            <tasks><task id="t1" phase_id="p1" name="T" status="wip"/></tasks>
            <tests><test id="x1" task_id="t1" name="X" status="failed"/></tests>
        </epic>"#;
        let epic = decode(doc).unwrap();
        assert_eq!(epic.tests[0].status, Status::Wip);
        assert_eq!(epic.tests[0].result, Some(TestResult::Failing));
    }

    #[test]
    fn unknown_status_is_parse_error() {
        let err = decode(r#"<epic id="e" name="E" status="someday"/>"#).unwrap_err();
        assert!(matches!(err, CoreError::Parse(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn wrong_root_is_parse_error() {
        assert!(matches!(
            decode("<project id=\"x\"/>"),
            Err(CoreError::Parse(_))
        ));
    }

    #[test]
    fn load_checked_rejects_broken_references() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("epic.xml");
        std::fs::write(
            &path,
            r#"<epic id="e" name="E" status="wip">
                 <tasks><task id="t1" phase_id="ghost" name="T" status="pending"/></tasks>
               </epic>"#,
        )
        .unwrap();
        assert!(load(&path).is_ok());
        let err = load_checked(&path).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn load_checked_tolerates_status_timestamp_warnings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("epic.xml");
        std::fs::write(
            &path,
            r#"<epic id="e" name="E" status="wip">
                 <phases><phase id="p1" name="P" status="done"/></phases>
                 <tasks><task id="t1" phase_id="p1" name="T" status="done"/></tasks>
                 <tests><test id="x1" task_id="t1" name="X" test_status="pending" test_result="passing"/></tests>
               </epic>"#,
        )
        .unwrap();

        let epic = load_checked(&path).unwrap();
        let warnings: Vec<&str> = validate::check(&epic)
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .map(|f| f.code)
            .collect();
        assert!(warnings.contains(&"status_timestamp_mismatch"), "{warnings:?}");
        assert!(warnings.contains(&"result_on_pending"), "{warnings:?}");
        assert!(!validate::has_errors(&validate::check(&epic)));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("epic.xml");
        let epic = decode(LEGACY).unwrap();
        save(&path, &epic).unwrap();
        assert_eq!(load_checked(&path).unwrap(), epic);
    }
}
