//! Cross-entity preconditions, evaluated after the status machine has
//! accepted a verb and before anything is mutated.

use crate::aggregate::{self, Progress};
use crate::error::{CoreError, Result};
use crate::machine::Transition;
use crate::model::{Epic, Test};
use crate::types::{EntityKind, Status};
use serde::Serialize;
use std::fmt;

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A child entity blocking its parent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildRef {
    pub id: String,
    pub name: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ChildRef {
    fn from_test(t: &Test) -> Self {
        Self {
            id: t.id.clone(),
            name: t.name.clone(),
            status: t.status,
            description: t.description.clone(),
        }
    }
}

/// Why a `done-*` command was refused, with enough context for an agent to
/// act on it without re-querying.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionDiagnostic {
    pub kind: EntityKind,
    pub id: String,
    pub pending_phases: Vec<ChildRef>,
    pub pending_tasks: Vec<ChildRef>,
    pub pending_tests: Vec<ChildRef>,
    pub failing_tests: Vec<ChildRef>,
    pub progress: Progress,
}

impl CompletionDiagnostic {
    fn new(kind: EntityKind, id: &str, epic: &Epic) -> Self {
        Self {
            kind,
            id: id.to_string(),
            pending_phases: Vec::new(),
            pending_tasks: Vec::new(),
            pending_tests: Vec::new(),
            failing_tests: Vec::new(),
            progress: aggregate::progress(epic),
        }
    }

    fn is_blocking(&self) -> bool {
        !(self.pending_phases.is_empty()
            && self.pending_tasks.is_empty()
            && self.pending_tests.is_empty()
            && self.failing_tests.is_empty())
    }

    fn into_result(self) -> Result<()> {
        if self.is_blocking() {
            Err(CoreError::Completion(Box::new(self)))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for CompletionDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EntityKind::Epic => write!(f, "Epic cannot be completed: ")?,
            kind => write!(f, "{} {} cannot be completed: ", kind.title(), self.id)?,
        }
        let mut parts = Vec::new();
        if self.kind == EntityKind::Epic || !self.pending_phases.is_empty() {
            parts.push(plural(self.pending_phases.len(), "pending phase"));
        }
        if !self.pending_tasks.is_empty() {
            parts.push(plural(self.pending_tasks.len(), "pending task"));
        }
        if !self.pending_tests.is_empty() {
            parts.push(plural(self.pending_tests.len(), "pending test"));
        }
        if self.kind == EntityKind::Epic || !self.failing_tests.is_empty() {
            parts.push(plural(self.failing_tests.len(), "failing test"));
        }
        let p = &self.progress;
        write!(
            f,
            "{}; {}% complete ({}/{} phases, {}/{} tasks, {}/{} tests)",
            parts.join(", "),
            p.percent,
            p.done_phases,
            p.total_phases,
            p.done_tasks,
            p.total_tasks,
            p.done_tests,
            p.total_tests
        )
    }
}

fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// Run the guards for `verb` on the entity `kind`/`id`. `note` is the
/// failure note for `fail`.
pub fn check(
    epic: &Epic,
    kind: EntityKind,
    id: &str,
    verb: Transition,
    note: Option<&str>,
) -> Result<()> {
    match (kind, verb) {
        (EntityKind::Epic, Transition::Complete) => done_epic(epic),
        (EntityKind::Phase, Transition::Start) => start_phase(epic, id),
        (EntityKind::Phase, Transition::Complete) => done_phase(epic, id),
        (EntityKind::Task, Transition::Start) => start_task(epic, id),
        (EntityKind::Task, Transition::Complete) => done_task(epic, id),
        (EntityKind::Test, Transition::Start) => start_test(epic, id),
        (EntityKind::Test, Transition::Fail) => fail_test(id, note),
        _ => Ok(()),
    }
}

pub fn start_phase(epic: &Epic, id: &str) -> Result<()> {
    if epic.status != Status::Wip {
        return Err(CoreError::validation(
            Some(id),
            format!(
                "cannot start phase {id}: epic {} is {}, not wip",
                epic.id, epic.status
            ),
        ));
    }
    Ok(())
}

pub fn start_task(epic: &Epic, id: &str) -> Result<()> {
    let task = epic.task(id)?;
    let phase = epic.phase(&task.phase_id)?;
    if phase.status != Status::Wip {
        return Err(CoreError::validation(
            Some(id),
            format!(
                "cannot start task {id}: phase {} is {}, not wip",
                phase.id, phase.status
            ),
        ));
    }
    Ok(())
}

pub fn start_test(epic: &Epic, id: &str) -> Result<()> {
    let test = epic.test(id)?;
    let task = epic.task(&test.task_id)?;
    if !matches!(task.status, Status::Wip | Status::Done) {
        return Err(CoreError::validation(
            Some(id),
            format!(
                "cannot start test {id}: task {} is {}, must be wip or done",
                task.id, task.status
            ),
        ));
    }
    let phase_id = epic.test_phase_id(test).unwrap_or(task.phase_id.as_str());
    let phase = epic.phase(phase_id)?;
    if !matches!(phase.status, Status::Wip | Status::Done) {
        return Err(CoreError::validation(
            Some(id),
            format!(
                "cannot start test {id}: phase {} is {}, must be wip or done",
                phase.id, phase.status
            ),
        ));
    }
    Ok(())
}

pub fn fail_test(id: &str, note: Option<&str>) -> Result<()> {
    match note.map(str::trim) {
        Some(n) if !n.is_empty() => Ok(()),
        _ => Err(CoreError::validation(
            Some(id),
            format!("cannot fail test {id}: a non-empty failure note is required"),
        )),
    }
}

pub fn done_task(epic: &Epic, id: &str) -> Result<()> {
    let mut diag = CompletionDiagnostic::new(EntityKind::Task, id, epic);
    for test in epic.tests_for_task(id).filter(|t| !t.is_settled()) {
        push_test(&mut diag, test);
    }
    diag.into_result()
}

pub fn done_phase(epic: &Epic, id: &str) -> Result<()> {
    let mut diag = CompletionDiagnostic::new(EntityKind::Phase, id, epic);
    diag.pending_tasks = epic
        .tasks_in_phase(id)
        .filter(|t| !t.status.is_closed())
        .map(|t| ChildRef {
            id: t.id.clone(),
            name: t.name.clone(),
            status: t.status,
            description: None,
        })
        .collect();
    for test in epic.tests_in_phase(id).filter(|t| !t.is_settled()) {
        push_test(&mut diag, test);
    }
    diag.into_result()
}

pub fn done_epic(epic: &Epic) -> Result<()> {
    let mut diag = CompletionDiagnostic::new(EntityKind::Epic, &epic.id, epic);
    diag.pending_phases = epic
        .phases
        .iter()
        .filter(|p| matches!(p.status, Status::Pending | Status::Wip))
        .map(|p| ChildRef {
            id: p.id.clone(),
            name: p.name.clone(),
            status: p.status,
            description: None,
        })
        .collect();
    diag.failing_tests = epic
        .tests
        .iter()
        .filter(|t| t.is_failing())
        .map(ChildRef::from_test)
        .collect();
    diag.into_result()
}

fn push_test(diag: &mut CompletionDiagnostic, test: &Test) {
    if test.is_failing() {
        diag.failing_tests.push(ChildRef::from_test(test));
    } else {
        diag.pending_tests.push(ChildRef::from_test(test));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;

    fn epic(xml: &str) -> Epic {
        decode(xml).unwrap()
    }

    #[test]
    fn done_epic_blocked_by_pending_phase() {
        let e = epic(
            r#"<epic id="epic-1" name="E" status="wip">
                 <phases>
                   <phase id="p0" name="Done" status="done"/>
                   <phase id="p1" name="Later" status="pending"/>
                 </phases>
                 <tasks><task id="t0" phase_id="p0" name="T" status="done"/></tasks>
                 <tests><test id="x0" task_id="t0" name="X" test_status="done" test_result="passing"/></tests>
               </epic>"#,
        );
        let err = done_epic(&e).unwrap_err();
        let CoreError::Completion(diag) = err else {
            panic!("expected completion error");
        };
        assert_eq!(diag.pending_phases.len(), 1);
        assert_eq!(diag.pending_phases[0].id, "p1");
        assert!(diag.failing_tests.is_empty());
        assert_eq!(
            diag.to_string(),
            "Epic cannot be completed: 1 pending phase, 0 failing tests; \
             83% complete (1/2 phases, 1/1 tasks, 1/1 tests)"
        );
    }

    #[test]
    fn done_epic_blocked_by_failing_test() {
        let e = epic(
            r#"<epic id="epic-1" name="E" status="wip">
                 <phases><phase id="p1" name="P" status="done"/></phases>
                 <tasks><task id="t1" phase_id="p1" name="T" status="done"/></tasks>
                 <tests><test id="x1" task_id="t1" name="X" test_status="wip" test_result="failing">
                   <description>login works</description>
                 </test></tests>
               </epic>"#,
        );
        let Err(CoreError::Completion(diag)) = done_epic(&e) else {
            panic!("expected completion error");
        };
        assert_eq!(diag.failing_tests[0].id, "x1");
        assert_eq!(diag.failing_tests[0].description.as_deref(), Some("login works"));
        assert!(diag.to_string().contains("67% complete"));
    }

    #[test]
    fn done_phase_lists_open_tasks_and_tests() {
        let e = epic(
            r#"<epic id="e" name="E" status="wip">
                 <phases><phase id="p1" name="P" status="wip"/></phases>
                 <tasks>
                   <task id="t1" phase_id="p1" name="A" status="done"/>
                   <task id="t2" phase_id="p1" name="B" status="wip"/>
                   <task id="t3" phase_id="p1" name="C" status="cancelled"/>
                 </tasks>
                 <tests>
                   <test id="x1" task_id="t1" name="X" test_status="pending"/>
                   <test id="x2" task_id="t1" name="Y" test_status="cancelled"/>
                 </tests>
               </epic>"#,
        );
        let Err(CoreError::Completion(diag)) = done_phase(&e, "p1") else {
            panic!("expected completion error");
        };
        assert_eq!(diag.pending_tasks.len(), 1);
        assert_eq!(diag.pending_tasks[0].id, "t2");
        assert_eq!(diag.pending_tests.len(), 1);
        assert!(diag.to_string().starts_with("Phase p1 cannot be completed: 1 pending task, 1 pending test;"));
    }

    #[test]
    fn start_guards_check_parents() {
        let e = epic(
            r#"<epic id="e" name="E" status="pending">
                 <phases><phase id="p1" name="P" status="pending"/></phases>
                 <tasks><task id="t1" phase_id="p1" name="T" status="pending"/></tasks>
                 <tests><test id="x1" task_id="t1" name="X" test_status="pending"/></tests>
               </epic>"#,
        );
        assert!(matches!(start_phase(&e, "p1"), Err(CoreError::Validation { .. })));
        assert!(matches!(start_task(&e, "t1"), Err(CoreError::Validation { .. })));
        assert!(matches!(start_test(&e, "x1"), Err(CoreError::Validation { .. })));
    }

    #[test]
    fn fail_requires_note() {
        assert!(fail_test("x1", Some("broke")).is_ok());
        assert!(fail_test("x1", Some("   ")).is_err());
        assert!(fail_test("x1", None).is_err());
    }
}
