//! Per-entity lifecycle tables.
//!
//! ```text
//! pending ─► wip ─► done            (phase, task, epic)
//!    │        │
//!    └► cancelled ◄┘
//! wip ─► paused ─► wip              (epic only; paused may also cancel)
//!
//! pending ─► wip ─(pass)─► done     (test, result := passing)
//!             ├─(fail)──► wip       (result := failing)
//!             └► cancelled
//! done ─(fail)─► wip
//! ```
//!
//! Everything here is pure: no I/O, no clock, no cross-entity checks.

use crate::model::{Epic, Phase, Task, Test};
use crate::types::{EntityKind, EventType, Status, TestResult};
use chrono::{DateTime, Utc};
use std::fmt;

// ---------------------------------------------------------------------------
// Transition (verb)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Start,
    Complete,
    Pause,
    Resume,
    Cancel,
    Pass,
    Fail,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Complete => "done",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Cancel => "cancel",
            Transition::Pass => "pass",
            Transition::Fail => "fail",
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            Transition::Start => "started",
            Transition::Complete => "completed",
            Transition::Pause => "paused",
            Transition::Resume => "resumed",
            Transition::Cancel => "cancelled",
            Transition::Pass => "passed",
            Transition::Fail => "failed",
        }
    }

    /// The lifecycle status this verb moves an entity into.
    pub fn target(self) -> Status {
        match self {
            Transition::Start | Transition::Resume | Transition::Fail => Status::Wip,
            Transition::Complete | Transition::Pass => Status::Done,
            Transition::Pause => Status::Paused,
            Transition::Cancel => Status::Cancelled,
        }
    }

    /// Whether `kind` supports this verb at all.
    pub fn applies_to(self, kind: EntityKind) -> bool {
        match self {
            Transition::Start | Transition::Cancel => true,
            Transition::Complete => kind != EntityKind::Test,
            Transition::Pause | Transition::Resume => kind == EntityKind::Epic,
            Transition::Pass | Transition::Fail => kind == EntityKind::Test,
        }
    }

    /// Event recorded when this verb succeeds on `kind`.
    pub fn event_type(self, kind: EntityKind) -> EventType {
        use EntityKind as K;
        use Transition as T;
        match (kind, self) {
            (K::Epic, T::Start) => EventType::EpicStarted,
            (K::Epic, T::Complete) => EventType::EpicCompleted,
            (K::Epic, T::Pause) => EventType::EpicPaused,
            (K::Epic, T::Resume) => EventType::EpicResumed,
            (K::Epic, _) => EventType::EpicCancelled,
            (K::Phase, T::Start) => EventType::PhaseStarted,
            (K::Phase, T::Complete) => EventType::PhaseCompleted,
            (K::Phase, _) => EventType::PhaseCancelled,
            (K::Task, T::Start) => EventType::TaskStarted,
            (K::Task, T::Complete) => EventType::TaskCompleted,
            (K::Task, _) => EventType::TaskCancelled,
            (K::Test, T::Start) => EventType::TestStarted,
            (K::Test, T::Pass) => EventType::TestPassed,
            (K::Test, T::Fail) => EventType::TestFailed,
            (K::Test, _) => EventType::TestCancelled,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Already-in-state
// ---------------------------------------------------------------------------

/// Reported instead of an error when a verb finds its entity already where
/// the verb would leave it. Rendered as `is_already_<state>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlreadyIn {
    Started,
    Completed,
    Passed,
    Paused,
    Cancelled,
}

impl AlreadyIn {
    pub fn flag(self) -> &'static str {
        match self {
            AlreadyIn::Started => "is_already_started",
            AlreadyIn::Completed => "is_already_completed",
            AlreadyIn::Passed => "is_already_passed",
            AlreadyIn::Paused => "is_already_paused",
            AlreadyIn::Cancelled => "is_already_cancelled",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            AlreadyIn::Started => "already started",
            AlreadyIn::Completed => "already completed",
            AlreadyIn::Passed => "already passing",
            AlreadyIn::Paused => "already paused",
            AlreadyIn::Cancelled => "already cancelled",
        }
    }
}

/// `Some` when applying `verb` to an entity in `from` is a no-op success.
/// `start` on a finished entity counts: re-running a start command after
/// the work is done must not fail.
pub fn already(kind: EntityKind, from: Status, verb: Transition) -> Option<AlreadyIn> {
    match (verb, from) {
        (Transition::Start, Status::Wip) | (Transition::Resume, Status::Wip) => {
            Some(AlreadyIn::Started)
        }
        (Transition::Start, Status::Done) => Some(AlreadyIn::Completed),
        (Transition::Complete, Status::Done) => Some(AlreadyIn::Completed),
        (Transition::Pass, Status::Done) if kind == EntityKind::Test => Some(AlreadyIn::Passed),
        (Transition::Pause, Status::Paused) => Some(AlreadyIn::Paused),
        (Transition::Cancel, Status::Cancelled) => Some(AlreadyIn::Cancelled),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Legality
// ---------------------------------------------------------------------------

/// Pure legality predicate over the lifecycle graph of `kind`.
pub fn can_transition(kind: EntityKind, from: Status, to: Status) -> bool {
    use Status::*;
    match kind {
        EntityKind::Epic => matches!(
            (from, to),
            (Pending, Wip)
                | (Wip, Done)
                | (Wip, Paused)
                | (Paused, Wip)
                | (Pending, Cancelled)
                | (Wip, Cancelled)
                | (Paused, Cancelled)
        ),
        EntityKind::Phase | EntityKind::Task => matches!(
            (from, to),
            (Pending, Wip) | (Wip, Done) | (Pending, Cancelled) | (Wip, Cancelled)
        ),
        EntityKind::Test => matches!(
            (from, to),
            (Pending, Wip)
                | (Wip, Done)
                | (Wip, Wip)
                | (Done, Wip)
                | (Pending, Cancelled)
                | (Wip, Cancelled)
        ),
    }
}

/// Legality of a specific verb, which is narrower than the status graph:
/// `resume` only leaves `paused`, `start` only leaves `pending`, and
/// `wip -> wip` on a test is only reachable through `fail`.
pub fn can_apply(kind: EntityKind, from: Status, verb: Transition) -> bool {
    if !verb.applies_to(kind) || !can_transition(kind, from, verb.target()) {
        return false;
    }
    match verb {
        Transition::Start => from == Status::Pending,
        Transition::Resume => from == Status::Paused,
        Transition::Fail => matches!(from, Status::Wip | Status::Done),
        Transition::Pass | Transition::Complete => from == Status::Wip,
        Transition::Pause => from == Status::Wip,
        Transition::Cancel => true,
    }
}

/// Human-readable reason for an illegal verb.
pub fn rejection_reason(kind: EntityKind, from: Status, verb: Transition) -> String {
    if !verb.applies_to(kind) {
        return format!("'{verb}' does not apply to a {kind}");
    }
    match (from, verb) {
        (Status::Pending, Transition::Complete | Transition::Pass) => {
            format!("a pending {kind} must be started first")
        }
        (Status::Done, _) => format!("{kind} is done, which is terminal"),
        (Status::Cancelled, _) => format!("{kind} is cancelled, which is terminal"),
        (Status::Paused, _) => "epic is paused; resume it first".to_string(),
        _ => format!("{kind} is {from}"),
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// Mutable handle to one entity inside an epic; the dispatch point for
/// per-kind effects.
pub enum EntityMut<'a> {
    Epic(&'a mut Epic),
    Phase(&'a mut Phase),
    Task(&'a mut Task),
    Test(&'a mut Test),
}

impl EntityMut<'_> {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityMut::Epic(_) => EntityKind::Epic,
            EntityMut::Phase(_) => EntityKind::Phase,
            EntityMut::Task(_) => EntityKind::Task,
            EntityMut::Test(_) => EntityKind::Test,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            EntityMut::Epic(e) => e.status,
            EntityMut::Phase(p) => p.status,
            EntityMut::Task(t) => t.status,
            EntityMut::Test(t) => t.status,
        }
    }
}

/// Apply `verb` at `ts`: set the new status and the matching timestamp
/// slot. `note` is the failure note for `fail` and the reason for `cancel`.
/// Callers must have checked [`can_apply`].
pub fn apply(entity: EntityMut<'_>, verb: Transition, ts: DateTime<Utc>, note: Option<&str>) {
    let note = note.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string);
    match entity {
        EntityMut::Epic(e) => {
            match verb {
                Transition::Start => e.started_at = Some(ts),
                Transition::Complete => e.completed_at = Some(ts),
                Transition::Pause => e.paused_at = Some(ts),
                Transition::Resume => e.paused_at = None,
                Transition::Cancel => {
                    e.cancelled_at = Some(ts);
                    e.cancellation_reason = note;
                }
                Transition::Pass | Transition::Fail => {}
            }
            e.status = verb.target();
        }
        EntityMut::Phase(p) => {
            match verb {
                Transition::Start => p.started_at = Some(ts),
                Transition::Complete => p.completed_at = Some(ts),
                Transition::Cancel => {
                    p.cancelled_at = Some(ts);
                    p.cancellation_reason = note;
                }
                _ => {}
            }
            p.status = verb.target();
        }
        EntityMut::Task(t) => {
            match verb {
                Transition::Start => t.started_at = Some(ts),
                Transition::Complete => t.completed_at = Some(ts),
                Transition::Cancel => {
                    t.cancelled_at = Some(ts);
                    t.cancellation_reason = note;
                }
                _ => {}
            }
            t.status = verb.target();
        }
        EntityMut::Test(t) => {
            match verb {
                Transition::Start => t.started_at = Some(ts),
                Transition::Pass => {
                    t.result = Some(TestResult::Passing);
                    t.passed_at = Some(ts);
                    t.failure_note = None;
                }
                Transition::Fail => {
                    // started_at is kept when re-opening a passed test.
                    t.result = Some(TestResult::Failing);
                    t.failed_at = Some(ts);
                    t.passed_at = None;
                    t.failure_note = note;
                }
                Transition::Cancel => {
                    t.cancelled_at = Some(ts);
                    t.cancellation_reason = note;
                }
                _ => {}
            }
            t.status = verb.target();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::parse_timestamp;

    fn ts(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    fn test_entity() -> Test {
        Test {
            id: "x1".into(),
            task_id: "t1".into(),
            phase_id: None,
            name: "X".into(),
            description: None,
            given: None,
            when: None,
            then: None,
            status: Status::Pending,
            result: None,
            started_at: None,
            passed_at: None,
            failed_at: None,
            cancelled_at: None,
            failure_note: None,
            cancellation_reason: None,
        }
    }

    #[test]
    fn pending_to_done_is_forbidden() {
        for kind in [EntityKind::Epic, EntityKind::Phase, EntityKind::Task, EntityKind::Test] {
            assert!(!can_transition(kind, Status::Pending, Status::Done), "{kind}");
        }
    }

    #[test]
    fn done_is_terminal_except_test_reopen() {
        for to in Status::all() {
            assert!(!can_transition(EntityKind::Phase, Status::Done, *to));
            assert!(!can_transition(EntityKind::Epic, Status::Done, *to));
        }
        assert!(can_transition(EntityKind::Test, Status::Done, Status::Wip));
        assert!(!can_transition(EntityKind::Test, Status::Done, Status::Cancelled));
    }

    #[test]
    fn only_epic_pauses() {
        assert!(can_apply(EntityKind::Epic, Status::Wip, Transition::Pause));
        assert!(can_apply(EntityKind::Epic, Status::Paused, Transition::Resume));
        assert!(!can_apply(EntityKind::Phase, Status::Wip, Transition::Pause));
        assert!(!can_transition(EntityKind::Task, Status::Wip, Status::Paused));
    }

    #[test]
    fn verbs_are_narrower_than_graph() {
        // wip -> wip exists in the test graph, but only `fail` reaches it.
        assert!(!can_apply(EntityKind::Test, Status::Wip, Transition::Start));
        assert!(can_apply(EntityKind::Test, Status::Wip, Transition::Fail));
        assert!(can_apply(EntityKind::Test, Status::Done, Transition::Fail));
        assert!(!can_apply(EntityKind::Test, Status::Pending, Transition::Fail));
        assert!(!can_apply(EntityKind::Test, Status::Pending, Transition::Pass));
        assert!(!can_apply(EntityKind::Epic, Status::Paused, Transition::Complete));
        assert!(can_apply(EntityKind::Epic, Status::Paused, Transition::Cancel));
        assert!(!can_apply(EntityKind::Task, Status::Done, Transition::Cancel));
    }

    #[test]
    fn already_in_state_detection() {
        assert_eq!(
            already(EntityKind::Epic, Status::Done, Transition::Start),
            Some(AlreadyIn::Completed)
        );
        assert_eq!(
            already(EntityKind::Phase, Status::Wip, Transition::Start),
            Some(AlreadyIn::Started)
        );
        assert_eq!(
            already(EntityKind::Test, Status::Done, Transition::Pass),
            Some(AlreadyIn::Passed)
        );
        assert_eq!(already(EntityKind::Test, Status::Wip, Transition::Fail), None);
        assert_eq!(already(EntityKind::Task, Status::Cancelled, Transition::Start), None);
    }

    #[test]
    fn pass_then_fail_reopens_without_touching_started_at() {
        let mut t = test_entity();
        apply(EntityMut::Test(&mut t), Transition::Start, ts("2025-01-01T10:00:00Z"), None);
        apply(EntityMut::Test(&mut t), Transition::Pass, ts("2025-01-01T11:00:00Z"), None);
        assert_eq!(t.status, Status::Done);
        assert_eq!(t.result, Some(TestResult::Passing));

        apply(
            EntityMut::Test(&mut t),
            Transition::Fail,
            ts("2025-01-01T12:00:00Z"),
            Some("regressed"),
        );
        assert_eq!(t.status, Status::Wip);
        assert_eq!(t.result, Some(TestResult::Failing));
        assert_eq!(t.started_at, Some(ts("2025-01-01T10:00:00Z")));
        assert_eq!(t.failed_at, Some(ts("2025-01-01T12:00:00Z")));
        assert_eq!(t.passed_at, None);
        assert_eq!(t.failure_note.as_deref(), Some("regressed"));
    }

    #[test]
    fn epic_pause_resume_clears_paused_at() {
        let mut e = Epic::new("e", "E");
        apply(EntityMut::Epic(&mut e), Transition::Start, ts("2025-01-01T10:00:00Z"), None);
        apply(EntityMut::Epic(&mut e), Transition::Pause, ts("2025-01-01T11:00:00Z"), None);
        assert_eq!(e.status, Status::Paused);
        assert!(e.paused_at.is_some());
        apply(EntityMut::Epic(&mut e), Transition::Resume, ts("2025-01-01T12:00:00Z"), None);
        assert_eq!(e.status, Status::Wip);
        assert!(e.paused_at.is_none());
    }

    #[test]
    fn empty_cancel_reason_is_stored_as_absent() {
        let mut e = Epic::new("e", "E");
        apply(EntityMut::Epic(&mut e), Transition::Cancel, ts("2025-01-01T10:00:00Z"), Some("  "));
        assert_eq!(e.status, Status::Cancelled);
        assert_eq!(e.cancellation_reason, None);
    }
}
