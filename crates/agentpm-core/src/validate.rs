//! Whole-document consistency pass.
//!
//! Error findings make a document unusable for every command except
//! `validate`; warnings are reported but never block.

use crate::clock::format_timestamp;
use crate::model::{Epic, Test};
use crate::types::{EntityKind, Status, TestResult};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub code: &'static str,
    pub entity: EntityKind,
    pub id: Option<String>,
    pub message: String,
}

/// Collects findings for one pass.
#[derive(Default)]
struct Findings(Vec<Finding>);

impl Findings {
    fn push(
        &mut self,
        severity: Severity,
        code: &'static str,
        entity: EntityKind,
        id: &str,
        message: String,
    ) {
        self.0.push(Finding {
            severity,
            code,
            entity,
            id: Some(id.to_string()),
            message,
        });
    }

    fn error(&mut self, code: &'static str, entity: EntityKind, id: &str, message: String) {
        self.push(Severity::Error, code, entity, id, message);
    }

    fn warn(&mut self, code: &'static str, entity: EntityKind, id: &str, message: String) {
        self.push(Severity::Warning, code, entity, id, message);
    }
}

/// Run every check. Errors come first, each group in document order.
pub fn check(epic: &Epic) -> Vec<Finding> {
    let mut f = Findings::default();
    check_ids(epic, &mut f);
    check_references(epic, &mut f);
    check_statuses(epic, &mut f);
    check_timestamps(epic, &mut f);
    check_events(epic, &mut f);
    check_children(epic, &mut f);

    let mut findings = f.0;
    findings.sort_by_key(|finding| finding.severity != Severity::Error);
    findings
}

pub fn has_errors(findings: &[Finding]) -> bool {
    findings.iter().any(|f| f.severity == Severity::Error)
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// Ids are alphanumeric plus `.`, `_` and `-`, starting alphanumeric.
/// Without a compiled pattern every id is accepted.
fn well_formed_id(id: &str) -> bool {
    ID_RE
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*$").ok())
        .as_ref()
        .map_or(true, |re| re.is_match(id))
}

fn check_ids(epic: &Epic, f: &mut Findings) {
    let collections: [(EntityKind, Vec<&str>); 3] = [
        (EntityKind::Phase, epic.phases.iter().map(|p| p.id.as_str()).collect()),
        (EntityKind::Task, epic.tasks.iter().map(|t| t.id.as_str()).collect()),
        (EntityKind::Test, epic.tests.iter().map(|t| t.id.as_str()).collect()),
    ];
    if !well_formed_id(&epic.id) {
        f.warn(
            "id_format",
            EntityKind::Epic,
            &epic.id,
            format!("epic id '{}' should be alphanumeric with . _ -", epic.id),
        );
    }
    for (kind, ids) in collections {
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id) {
                f.error(
                    "duplicate_id",
                    kind,
                    id,
                    format!("{kind} id '{id}' appears more than once"),
                );
            }
            if !well_formed_id(id) {
                f.warn(
                    "id_format",
                    kind,
                    id,
                    format!("{kind} id '{id}' should be alphanumeric with . _ -"),
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

fn check_references(epic: &Epic, f: &mut Findings) {
    for task in &epic.tasks {
        if epic.phase(&task.phase_id).is_err() {
            f.error(
                "broken_reference",
                EntityKind::Task,
                &task.id,
                format!("task {} references missing phase {}", task.id, task.phase_id),
            );
        }
    }
    for test in &epic.tests {
        let Ok(task) = epic.task(&test.task_id) else {
            f.error(
                "orphan_test",
                EntityKind::Test,
                &test.id,
                format!("test {} references missing task {}", test.id, test.task_id),
            );
            continue;
        };
        if let Some(stored) = &test.phase_id {
            if *stored != task.phase_id {
                f.error(
                    "phase_mismatch",
                    EntityKind::Test,
                    &test.id,
                    format!(
                        "test {} says phase {stored} but its task {} is in phase {}",
                        test.id, task.id, task.phase_id
                    ),
                );
            }
        }
    }
    for (i, event) in epic.events.iter().enumerate() {
        let refs = [
            (EntityKind::Phase, &event.phase_id, epic.phase_ref(event.phase_id.as_deref())),
            (EntityKind::Task, &event.task_id, epic.task_ref(event.task_id.as_deref())),
            (EntityKind::Test, &event.test_id, epic.test_ref(event.test_id.as_deref())),
        ];
        for (kind, id, exists) in refs {
            if let (Some(id), false) = (id, exists) {
                f.warn(
                    "dangling_event_reference",
                    kind,
                    id,
                    format!("event #{} ({}) references missing {kind} {id}", i + 1, event.event_type),
                );
            }
        }
    }
}

impl Epic {
    fn phase_ref(&self, id: Option<&str>) -> bool {
        id.map_or(true, |id| self.phases.iter().any(|p| p.id == id))
    }

    fn task_ref(&self, id: Option<&str>) -> bool {
        id.map_or(true, |id| self.tasks.iter().any(|t| t.id == id))
    }

    fn test_ref(&self, id: Option<&str>) -> bool {
        id.map_or(true, |id| self.tests.iter().any(|t| t.id == id))
    }
}

// ---------------------------------------------------------------------------
// Status / timestamp combinations
// ---------------------------------------------------------------------------

struct Stamps {
    kind: EntityKind,
    id: String,
    status: Status,
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
}

fn stamps(epic: &Epic) -> Vec<Stamps> {
    let mut out = vec![Stamps {
        kind: EntityKind::Epic,
        id: epic.id.clone(),
        status: epic.status,
        started: epic.started_at,
        finished: epic.completed_at,
    }];
    out.extend(epic.phases.iter().map(|p| Stamps {
        kind: EntityKind::Phase,
        id: p.id.clone(),
        status: p.status,
        started: p.started_at,
        finished: p.completed_at,
    }));
    out.extend(epic.tasks.iter().map(|t| Stamps {
        kind: EntityKind::Task,
        id: t.id.clone(),
        status: t.status,
        started: t.started_at,
        finished: t.completed_at,
    }));
    out.extend(epic.tests.iter().map(|t| Stamps {
        kind: EntityKind::Test,
        id: t.id.clone(),
        status: t.status,
        started: t.started_at,
        finished: t.passed_at,
    }));
    out
}

fn check_statuses(epic: &Epic, f: &mut Findings) {
    for s in stamps(epic) {
        if s.status == Status::Paused && s.kind != EntityKind::Epic {
            f.error(
                "status_not_allowed",
                s.kind,
                &s.id,
                format!("{} {} is paused; only the epic can pause", s.kind, s.id),
            );
            continue;
        }
        let finish = if s.kind == EntityKind::Test { "passed_at" } else { "completed_at" };
        let problem = match (s.status, s.started.is_some(), s.finished.is_some()) {
            (Status::Pending, true, _) | (Status::Pending, _, true) => {
                Some("is pending but has started or finished timestamps".to_string())
            }
            (Status::Wip | Status::Paused, false, _) => Some(format!("is {} without started_at", s.status)),
            (Status::Wip | Status::Paused, _, true) => Some(format!("is {} but has {finish}", s.status)),
            (Status::Done, _, false) => Some(format!("is done without {finish}")),
            _ => None,
        };
        if let Some(problem) = problem {
            f.warn(
                "status_timestamp_mismatch",
                s.kind,
                &s.id,
                format!("{} {} {problem}", s.kind, s.id),
            );
        }
    }

    for test in &epic.tests {
        if test.status == Status::Done && test.result == Some(TestResult::Failing) {
            f.error(
                "done_while_failing",
                EntityKind::Test,
                &test.id,
                format!("test {} is done but its result is failing", test.id),
            );
        }
        if test.status == Status::Pending && test.result.is_some() {
            f.warn(
                "result_on_pending",
                EntityKind::Test,
                &test.id,
                format!("test {} is pending but carries a result", test.id),
            );
        }
    }
}

fn check_timestamps(epic: &Epic, f: &mut Findings) {
    for s in stamps(epic) {
        if let (Some(start), Some(end)) = (s.started, s.finished) {
            if end < start {
                f.error(
                    "timestamp_regression",
                    s.kind,
                    &s.id,
                    format!(
                        "{} {} finished at {} before it started at {}",
                        s.kind,
                        s.id,
                        format_timestamp(&end),
                        format_timestamp(&start)
                    ),
                );
            }
        }
    }
    for test in &epic.tests {
        if let (Some(start), Some(failed)) = (test.started_at, test.failed_at) {
            if failed < start {
                f.error(
                    "timestamp_regression",
                    EntityKind::Test,
                    &test.id,
                    format!(
                        "test {} failed at {} before it started at {}",
                        test.id,
                        format_timestamp(&failed),
                        format_timestamp(&start)
                    ),
                );
            }
        }
    }
}

fn check_events(epic: &Epic, f: &mut Findings) {
    for (i, pair) in epic.events.windows(2).enumerate() {
        if pair[1].timestamp < pair[0].timestamp {
            f.error(
                "event_order",
                EntityKind::Epic,
                &epic.id,
                format!(
                    "event #{} at {} is earlier than event #{} at {}",
                    i + 2,
                    format_timestamp(&pair[1].timestamp),
                    i + 1,
                    format_timestamp(&pair[0].timestamp)
                ),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Parent / child consistency
// ---------------------------------------------------------------------------

fn check_children(epic: &Epic, f: &mut Findings) {
    if epic.status == Status::Done {
        for phase in epic.phases.iter().filter(|p| !p.status.is_closed()) {
            f.warn(
                "child_inconsistency",
                EntityKind::Phase,
                &phase.id,
                format!("epic is done but phase {} is {}", phase.id, phase.status),
            );
        }
    }
    for phase in &epic.phases {
        for task in epic.tasks_in_phase(&phase.id) {
            let open_child_of_done = phase.status == Status::Done && !task.status.is_closed();
            let started_under_pending = phase.status == Status::Pending
                && matches!(task.status, Status::Wip | Status::Done);
            if open_child_of_done || started_under_pending {
                f.warn(
                    "child_inconsistency",
                    EntityKind::Task,
                    &task.id,
                    format!(
                        "task {} is {} but its phase {} is {}",
                        task.id, task.status, phase.id, phase.status
                    ),
                );
            }
        }
    }
    for task in epic.tasks.iter().filter(|t| t.status == Status::Done) {
        for test in epic.tests_for_task(&task.id).filter(|t| unsettled(t)) {
            f.warn(
                "child_inconsistency",
                EntityKind::Test,
                &test.id,
                format!(
                    "task {} is done but test {} is {}",
                    task.id,
                    test.id,
                    test_label(test)
                ),
            );
        }
    }
}

fn unsettled(test: &Test) -> bool {
    !test.is_settled()
}

fn test_label(test: &Test) -> String {
    match test.result {
        Some(result) => format!("{} ({result})", test.status),
        None => test.status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;

    fn codes(findings: &[Finding], severity: Severity) -> Vec<&'static str> {
        findings
            .iter()
            .filter(|f| f.severity == severity)
            .map(|f| f.code)
            .collect()
    }

    #[test]
    fn clean_document_has_no_findings() {
        let epic = decode(
            r#"<epic id="epic-1" name="E" status="wip" started="2025-01-01T10:00:00Z">
                 <phases><phase id="p1" name="P" status="wip" started_at="2025-01-01T10:00:00Z"/></phases>
                 <tasks><task id="t1" phase_id="p1" name="T" status="pending"/></tasks>
                 <tests><test id="x1" task_id="t1" name="X" test_status="pending"/></tests>
                 <events><event timestamp="2025-01-01T10:00:00Z" agent="a" type="epic_started"/></events>
               </epic>"#,
        )
        .unwrap();
        assert!(check(&epic).is_empty(), "{:?}", check(&epic));
    }

    #[test]
    fn reports_broken_structure_as_errors() {
        let epic = decode(
            r#"<epic id="e" name="E" status="wip" started="2025-01-01T10:00:00Z">
                 <phases>
                   <phase id="p1" name="P" status="wip" started_at="2025-01-01T10:00:00Z"/>
                   <phase id="p1" name="Dup" status="pending"/>
                   <phase id="p2" name="Q" status="pending"/>
                 </phases>
                 <tasks>
                   <task id="t1" phase_id="p1" name="T" status="pending"/>
                   <task id="t2" phase_id="nope" name="U" status="pending"/>
                 </tasks>
                 <tests>
                   <test id="x1" task_id="ghost" name="X" test_status="pending"/>
                   <test id="x2" task_id="t1" phase_id="p2" name="Y" test_status="pending"/>
                 </tests>
                 <events>
                   <event timestamp="2025-01-01T11:00:00Z" agent="a" type="note"/>
                   <event timestamp="2025-01-01T10:00:00Z" agent="a" type="note"/>
                 </events>
               </epic>"#,
        )
        .unwrap();
        let findings = check(&epic);
        let errors = codes(&findings, Severity::Error);
        for code in ["duplicate_id", "broken_reference", "orphan_test", "phase_mismatch", "event_order"] {
            assert!(errors.contains(&code), "missing {code} in {errors:?}");
        }
        assert!(has_errors(&findings));
        assert_eq!(findings[0].severity, Severity::Error);
    }

    #[test]
    fn done_while_failing_and_paused_phase_are_errors() {
        let epic = decode(
            r#"<epic id="e" name="E" status="wip" started="2025-01-01T10:00:00Z">
                 <phases><phase id="p1" name="P" status="paused" started_at="2025-01-01T10:00:00Z"/></phases>
                 <tasks><task id="t1" phase_id="p1" name="T" status="wip" started_at="2025-01-01T10:00:00Z"/></tasks>
                 <tests><test id="x1" task_id="t1" name="X" test_status="done" test_result="failing"
                   started_at="2025-01-01T10:00:00Z" passed_at="2025-01-01T10:10:00Z"/></tests>
               </epic>"#,
        )
        .unwrap();
        let errors = codes(&check(&epic), Severity::Error);
        assert!(errors.contains(&"done_while_failing"));
        assert!(errors.contains(&"status_not_allowed"));
    }

    #[test]
    fn timestamp_regression_is_error() {
        let epic = decode(
            r#"<epic id="e" name="E" status="wip" started="2025-01-01T10:00:00Z">
                 <phases><phase id="p1" name="P" status="done"
                   started_at="2025-01-02T10:00:00Z" completed_at="2025-01-01T10:00:00Z"/></phases>
               </epic>"#,
        )
        .unwrap();
        let findings = check(&epic);
        assert_eq!(codes(&findings, Severity::Error), ["timestamp_regression"]);
        assert_eq!(findings[0].id.as_deref(), Some("p1"));
    }

    #[test]
    fn soft_problems_are_warnings() {
        let epic = decode(
            r#"<epic id="e" name="E" status="wip">
                 <phases><phase id="p1" name="P" status="done"/></phases>
                 <tasks><task id="t1" phase_id="p1" name="T" status="wip" started_at="2025-01-01T10:00:00Z"/></tasks>
                 <tests><test id="bad id" task_id="t1" name="X" test_status="pending" test_result="passing"/></tests>
                 <events><event timestamp="2025-01-01T10:00:00Z" agent="a" type="note" task_id="t9"/></events>
               </epic>"#,
        )
        .unwrap();
        let findings = check(&epic);
        assert!(!has_errors(&findings), "{findings:?}");
        let warnings = codes(&findings, Severity::Warning);
        for code in [
            "status_timestamp_mismatch",
            "result_on_pending",
            "child_inconsistency",
            "dangling_event_reference",
            "id_format",
        ] {
            assert!(warnings.contains(&code), "missing {code} in {warnings:?}");
        }
    }

    #[test]
    fn id_pattern_accepts_common_ids_only() {
        for ok in ["p1", "epic-1", "T_2.b", "0"] {
            assert!(well_formed_id(ok), "{ok}");
        }
        for bad in ["", "-p1", ".x", "a b", "t/1"] {
            assert!(!well_formed_id(bad), "{bad}");
        }
    }
}
