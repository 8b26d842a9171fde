//! Read-only views derived from an in-memory epic.

use crate::clock::format_timestamp;
use crate::model::{Epic, Event, FileChange, Phase, Task, Test};
use crate::types::{EventType, Status, TestResult};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_EVENT_LIMIT: usize = 3;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Completion counters. Cancelled entities count towards neither side of
/// a ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Progress {
    pub done_phases: usize,
    pub total_phases: usize,
    pub done_tasks: usize,
    pub total_tasks: usize,
    pub done_tests: usize,
    pub passing_tests: usize,
    pub failing_tests: usize,
    pub total_tests: usize,
    pub percent: u32,
}

pub fn progress(epic: &Epic) -> Progress {
    fn tally(statuses: impl Iterator<Item = Status>) -> (usize, usize) {
        statuses
            .filter(|s| *s != Status::Cancelled)
            .fold((0, 0), |(done, total), s| {
                (done + usize::from(s == Status::Done), total + 1)
            })
    }

    let (done_phases, total_phases) = tally(epic.phases.iter().map(|p| p.status));
    let (done_tasks, total_tasks) = tally(epic.tasks.iter().map(|t| t.status));
    let (done_tests, total_tests) = tally(epic.tests.iter().map(|t| t.status));
    let live_tests = || epic.tests.iter().filter(|t| t.status != Status::Cancelled);
    let passing_tests = live_tests()
        .filter(|t| t.result == Some(TestResult::Passing))
        .count();
    let failing_tests = live_tests()
        .filter(|t| t.result == Some(TestResult::Failing))
        .count();

    Progress {
        done_phases,
        total_phases,
        done_tasks,
        total_tasks,
        done_tests,
        passing_tests,
        failing_tests,
        total_tests,
        percent: completion_percent(&[
            (done_phases, total_phases),
            (done_tasks, total_tasks),
            (done_tests, total_tests),
        ]),
    }
}

/// Mean of the ratios with a non-zero denominator, rounded half up.
/// With no defined ratio the result is 0.
pub fn completion_percent(ratios: &[(usize, usize)]) -> u32 {
    let defined: Vec<f64> = ratios
        .iter()
        .filter(|(_, total)| *total > 0)
        .map(|(done, total)| *done as f64 / *total as f64)
        .collect();
    if defined.is_empty() {
        return 0;
    }
    let mean = defined.iter().sum::<f64>() / defined.len() as f64;
    // Nudge before flooring so 12.5 rounds to 13 despite binary noise.
    (mean * 100.0 + 0.5 + 1e-9).floor() as u32
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySummary {
    pub id: String,
    pub name: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

impl EntitySummary {
    pub fn phase(p: &Phase) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            status: p.status,
            phase_id: None,
            started_at: p.started_at.as_ref().map(format_timestamp),
        }
    }

    pub fn task(t: &Task) -> Self {
        Self {
            id: t.id.clone(),
            name: t.name.clone(),
            status: t.status,
            phase_id: Some(t.phase_id.clone()),
            started_at: t.started_at.as_ref().map(format_timestamp),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Current {
    pub epic_id: String,
    pub epic_status: Status,
    pub current_phase: Option<EntitySummary>,
    pub current_task: Option<EntitySummary>,
    pub next_action: Option<String>,
}

/// First wip phase, first wip task inside it, and the stored next action.
pub fn current(epic: &Epic) -> Current {
    let phase = epic.phases.iter().find(|p| p.status == Status::Wip);
    let task = phase.and_then(|p| {
        epic.tasks_in_phase(&p.id)
            .find(|t| t.status == Status::Wip)
    });
    Current {
        epic_id: epic.id.clone(),
        epic_status: epic.status,
        current_phase: phase.map(EntitySummary::phase),
        current_task: task.map(EntitySummary::task),
        next_action: epic.current_state.next_action.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailingTest {
    pub id: String,
    pub name: String,
    pub phase_id: Option<String>,
    pub task_id: String,
    pub description: Option<String>,
    pub given: Option<String>,
    pub when: Option<String>,
    pub then: Option<String>,
    pub failure_note: Option<String>,
    pub failed_at: Option<String>,
}

pub fn failing(epic: &Epic) -> Vec<FailingTest> {
    epic.tests
        .iter()
        .filter(|t| t.is_failing())
        .map(|t| FailingTest {
            id: t.id.clone(),
            name: t.name.clone(),
            phase_id: epic.test_phase_id(t).map(str::to_string),
            task_id: t.task_id.clone(),
            description: t.description.clone(),
            given: t.given.clone(),
            when: t.when.clone(),
            then: t.then.clone(),
            failure_note: t.failure_note.clone(),
            failed_at: t.failed_at.as_ref().map(format_timestamp),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pending {
    pub pending_phases: Vec<EntitySummary>,
    pub pending_tasks: Vec<EntitySummary>,
}

/// Phases and tasks still pending, in document order.
pub fn pending(epic: &Epic) -> Pending {
    Pending {
        pending_phases: epic
            .phases
            .iter()
            .filter(|p| p.status == Status::Pending)
            .map(EntitySummary::phase)
            .collect(),
        pending_tasks: epic
            .tasks
            .iter()
            .filter(|t| t.status == Status::Pending)
            .map(EntitySummary::task)
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventView {
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_timestamp: Option<String>,
    pub agent: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileChange>,
}

impl From<&Event> for EventView {
    fn from(e: &Event) -> Self {
        Self {
            timestamp: format_timestamp(&e.timestamp),
            requested_timestamp: e.requested_at.as_ref().map(format_timestamp),
            agent: e.agent.clone(),
            event_type: e.event_type.as_str().to_string(),
            phase_id: e.phase_id.clone(),
            task_id: e.task_id.clone(),
            test_id: e.test_id.clone(),
            message: e.message.clone(),
            files: e.files.clone(),
        }
    }
}

/// The last `limit` events, oldest first. `limit == 0` means all.
pub fn recent_events(epic: &Epic, limit: usize) -> Vec<EventView> {
    let skip = match limit {
        0 => 0,
        n => epic.events.len().saturating_sub(n),
    };
    epic.events.iter().skip(skip).map(EventView::from).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpicHeader {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub created_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl From<&Epic> for EpicHeader {
    fn from(e: &Epic) -> Self {
        Self {
            id: e.id.clone(),
            name: e.name.clone(),
            status: e.status,
            created_at: e.created_at.as_ref().map(format_timestamp),
            started_at: e.started_at.as_ref().map(format_timestamp),
            completed_at: e.completed_at.as_ref().map(format_timestamp),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Handoff {
    pub epic: EpicHeader,
    pub current: Current,
    pub progress: Progress,
    pub recent_events: Vec<EventView>,
    pub blockers: Vec<EventView>,
}

/// Snapshot for the next agent picking up the epic.
pub fn handoff(epic: &Epic, limit: usize) -> Handoff {
    Handoff {
        epic: EpicHeader::from(epic),
        current: current(epic),
        progress: progress(epic),
        recent_events: recent_events(epic, limit),
        blockers: epic
            .events
            .iter()
            .filter(|e| e.event_type == EventType::Blocker)
            .map(EventView::from)
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub epic: EpicHeader,
    pub progress: Progress,
    pub current_phase: Option<EntitySummary>,
    pub current_task: Option<EntitySummary>,
    pub phases: Vec<EntitySummary>,
}

pub fn overview(epic: &Epic) -> Overview {
    let Current {
        current_phase,
        current_task,
        ..
    } = current(epic);
    Overview {
        epic: EpicHeader::from(epic),
        progress: progress(epic),
        current_phase,
        current_task,
        phases: epic.phases.iter().map(EntitySummary::phase).collect(),
    }
}

// ---------------------------------------------------------------------------
// Full entity views (`show`)
// ---------------------------------------------------------------------------

fn ts(t: &Option<DateTime<Utc>>) -> Option<String> {
    t.as_ref().map(format_timestamp)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpicView {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub description: Option<String>,
    pub outline: Option<String>,
    pub created_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub paused_at: Option<String>,
    pub cancelled_at: Option<String>,
    pub cancellation_reason: Option<String>,
    pub next_action: Option<String>,
    pub progress: Progress,
}

impl From<&Epic> for EpicView {
    fn from(e: &Epic) -> Self {
        Self {
            id: e.id.clone(),
            name: e.name.clone(),
            status: e.status,
            description: e.description.clone(),
            outline: e.outline.clone(),
            created_at: ts(&e.created_at),
            started_at: ts(&e.started_at),
            completed_at: ts(&e.completed_at),
            paused_at: ts(&e.paused_at),
            cancelled_at: ts(&e.cancelled_at),
            cancellation_reason: e.cancellation_reason.clone(),
            next_action: e.current_state.next_action.clone(),
            progress: progress(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseView {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub description: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub cancelled_at: Option<String>,
    pub cancellation_reason: Option<String>,
    pub tasks: Vec<EntitySummary>,
}

impl PhaseView {
    pub fn new(epic: &Epic, p: &Phase) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            status: p.status,
            description: p.description.clone(),
            started_at: ts(&p.started_at),
            completed_at: ts(&p.completed_at),
            cancelled_at: ts(&p.cancelled_at),
            cancellation_reason: p.cancellation_reason.clone(),
            tasks: epic.tasks_in_phase(&p.id).map(EntitySummary::task).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestSummary {
    pub id: String,
    pub name: String,
    pub test_status: Status,
    pub test_result: Option<TestResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    pub id: String,
    pub phase_id: String,
    pub name: String,
    pub status: Status,
    pub description: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub cancelled_at: Option<String>,
    pub cancellation_reason: Option<String>,
    pub tests: Vec<TestSummary>,
}

impl TaskView {
    pub fn new(epic: &Epic, t: &Task) -> Self {
        Self {
            id: t.id.clone(),
            phase_id: t.phase_id.clone(),
            name: t.name.clone(),
            status: t.status,
            description: t.description.clone(),
            started_at: ts(&t.started_at),
            completed_at: ts(&t.completed_at),
            cancelled_at: ts(&t.cancelled_at),
            cancellation_reason: t.cancellation_reason.clone(),
            tests: epic
                .tests_for_task(&t.id)
                .map(|x| TestSummary {
                    id: x.id.clone(),
                    name: x.name.clone(),
                    test_status: x.status,
                    test_result: x.result,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestView {
    pub id: String,
    pub task_id: String,
    pub phase_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub given: Option<String>,
    pub when: Option<String>,
    pub then: Option<String>,
    pub test_status: Status,
    pub test_result: Option<TestResult>,
    pub started_at: Option<String>,
    pub passed_at: Option<String>,
    pub failed_at: Option<String>,
    pub cancelled_at: Option<String>,
    pub failure_note: Option<String>,
    pub cancellation_reason: Option<String>,
}

impl TestView {
    pub fn new(epic: &Epic, t: &Test) -> Self {
        Self {
            id: t.id.clone(),
            task_id: t.task_id.clone(),
            phase_id: epic.test_phase_id(t).map(str::to_string),
            name: t.name.clone(),
            description: t.description.clone(),
            given: t.given.clone(),
            when: t.when.clone(),
            then: t.then.clone(),
            test_status: t.status,
            test_result: t.result,
            started_at: ts(&t.started_at),
            passed_at: ts(&t.passed_at),
            failed_at: ts(&t.failed_at),
            cancelled_at: ts(&t.cancelled_at),
            failure_note: t.failure_note.clone(),
            cancellation_reason: t.cancellation_reason.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;

    const DOC: &str = r#"<epic id="e" name="E" status="wip">
      <phases>
        <phase id="p1" name="One" status="done"/>
        <phase id="p2" name="Two" status="wip"/>
        <phase id="p3" name="Three" status="pending"/>
        <phase id="p4" name="Dropped" status="cancelled"/>
      </phases>
      <tasks>
        <task id="t1" phase_id="p1" name="A" status="done"/>
        <task id="t2" phase_id="p2" name="B" status="done"/>
        <task id="t3" phase_id="p2" name="C" status="wip"/>
        <task id="t4" phase_id="p3" name="D" status="pending"/>
      </tasks>
      <tests>
        <test id="x1" task_id="t1" name="X1" test_status="done" test_result="passing"/>
        <test id="x2" task_id="t3" name="X2" test_status="wip" test_result="failing">
          <given>g</given><when>w</when><then>t</then>
          <failure_note>boom</failure_note>
        </test>
      </tests>
      <events>
        <event timestamp="2025-01-01T10:00:00Z" agent="a" type="epic_started"/>
        <event timestamp="2025-01-01T11:00:00Z" agent="a" type="blocker"><message>waiting on keys</message></event>
        <event timestamp="2025-01-01T12:00:00Z" agent="a" type="implementation"/>
        <event timestamp="2025-01-01T13:00:00Z" agent="a" type="task_started" task_id="t3"/>
      </events>
      <current_state><next_action>fix x2</next_action></current_state>
    </epic>"#;

    #[test]
    fn progress_matches_hand_computed_ratios() {
        let p = progress(&decode(DOC).unwrap());
        assert_eq!((p.done_phases, p.total_phases), (1, 3));
        assert_eq!((p.done_tasks, p.total_tasks), (2, 4));
        assert_eq!((p.done_tests, p.total_tests), (1, 2));
        assert_eq!((p.passing_tests, p.failing_tests), (1, 1));
        // (1/3 + 1/2 + 1/2) / 3 = 0.4444
        assert_eq!(p.percent, 44);
    }

    #[test]
    fn percent_rounds_half_up() {
        // (1/2 + 1/4 + 0/1) / 3 = 0.25 exactly
        assert_eq!(completion_percent(&[(1, 2), (1, 4), (0, 1)]), 25);
        // 1/8 = 12.5%
        assert_eq!(completion_percent(&[(1, 8)]), 13);
        // (1/2 + 1/4) / 2 = 37.5%
        assert_eq!(completion_percent(&[(1, 2), (1, 4), (0, 0)]), 38);
        assert_eq!(completion_percent(&[(0, 0), (0, 0), (0, 0)]), 0);
        assert_eq!(completion_percent(&[(3, 3), (2, 2), (0, 0)]), 100);
    }

    #[test]
    fn current_picks_first_wip_phase_and_task() {
        let c = current(&decode(DOC).unwrap());
        assert_eq!(c.current_phase.unwrap().id, "p2");
        assert_eq!(c.current_task.unwrap().id, "t3");
        assert_eq!(c.next_action.as_deref(), Some("fix x2"));
    }

    #[test]
    fn failing_projects_gwt_and_note() {
        let f = failing(&decode(DOC).unwrap());
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].id, "x2");
        assert_eq!(f[0].phase_id.as_deref(), Some("p2"));
        assert_eq!(f[0].then.as_deref(), Some("t"));
        assert_eq!(f[0].failure_note.as_deref(), Some("boom"));
    }

    #[test]
    fn pending_in_document_order() {
        let p = pending(&decode(DOC).unwrap());
        let phases: Vec<_> = p.pending_phases.iter().map(|s| s.id.as_str()).collect();
        let tasks: Vec<_> = p.pending_tasks.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(phases, ["p3"]);
        assert_eq!(tasks, ["t4"]);
    }

    #[test]
    fn overview_lists_phases_with_current_pointers() {
        let o = overview(&decode(DOC).unwrap());
        assert_eq!(o.phases.len(), 4);
        assert_eq!(o.current_task.unwrap().id, "t3");
        assert_eq!(o.progress.percent, 44);
    }

    #[test]
    fn task_view_lists_its_tests() {
        let epic = decode(DOC).unwrap();
        let view = TaskView::new(&epic, epic.task("t3").unwrap());
        assert_eq!(view.tests.len(), 1);
        assert_eq!(view.tests[0].test_result, Some(TestResult::Failing));
    }

    #[test]
    fn handoff_bundles_recent_events_and_blockers() {
        let epic = decode(DOC).unwrap();
        let h = handoff(&epic, DEFAULT_EVENT_LIMIT);
        assert_eq!(h.recent_events.len(), 3);
        assert_eq!(h.recent_events[0].event_type, "blocker");
        assert_eq!(h.blockers.len(), 1);
        assert_eq!(h.blockers[0].message, "waiting on keys");
        assert_eq!(handoff(&epic, 0).recent_events.len(), 4);
        assert_eq!(handoff(&epic, 10).recent_events.len(), 4);
    }
}
