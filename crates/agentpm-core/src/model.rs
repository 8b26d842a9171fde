use crate::error::{CoreError, Result};
use crate::types::{EntityKind, EventType, Status, TestResult};
use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Epic (aggregate root)
// ---------------------------------------------------------------------------

/// The single aggregate root of a document. Phases, tasks, tests and events
/// live only inside their epic.
#[derive(Debug, Clone, PartialEq)]
pub struct Epic {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub outline: Option<String>,
    pub phases: Vec<Phase>,
    pub tasks: Vec<Task>,
    pub tests: Vec<Test>,
    pub events: Vec<Event>,
    pub current_state: CurrentState,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentState {
    pub next_action: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Phase {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub description: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub phase_id: String,
    pub name: String,
    pub status: Status,
    pub description: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

/// A verification attached to a task. `status` is the lifecycle;
/// `result` is the orthogonal pass/fail axis and stays `None` until the
/// test has been passed or failed at least once.
#[derive(Debug, Clone, PartialEq)]
pub struct Test {
    pub id: String,
    pub task_id: String,
    pub phase_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub given: Option<String>,
    pub when: Option<String>,
    pub then: Option<String>,
    pub status: Status,
    pub result: Option<TestResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub passed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failure_note: Option<String>,
    pub cancellation_reason: Option<String>,
}

impl Test {
    /// Failing and not cancelled.
    pub fn is_failing(&self) -> bool {
        self.result == Some(TestResult::Failing) && self.status != Status::Cancelled
    }

    /// Done (which implies passing) or cancelled.
    pub fn is_settled(&self) -> bool {
        match self.status {
            Status::Done => !self.is_failing(),
            Status::Cancelled => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    /// Caller-supplied time when it had to be clamped forward.
    pub requested_at: Option<DateTime<Utc>>,
    pub agent: String,
    pub event_type: EventType,
    pub phase_id: Option<String>,
    pub task_id: Option<String>,
    pub test_id: Option<String>,
    pub message: String,
    pub files: Vec<FileChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileChange {
    pub path: String,
    pub action: String,
}

impl FileChange {
    /// Parse `path[:action]`; the action defaults to `modified`.
    pub fn parse(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        let (path, action) = match entry.rsplit_once(':') {
            Some((path, action)) if matches!(action, "added" | "modified" | "deleted") => {
                (path, action)
            }
            _ => (entry, "modified"),
        };
        if path.is_empty() {
            return Err(CoreError::Usage(format!("empty file path in '{entry}'")));
        }
        Ok(Self {
            path: path.to_string(),
            action: action.to_string(),
        })
    }

    /// Parse a comma-separated `--files` list.
    pub fn parse_list(list: &str) -> Result<Vec<Self>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Construction and lookup
// ---------------------------------------------------------------------------

impl Epic {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: Status::Pending,
            description: None,
            created_at: None,
            started_at: None,
            completed_at: None,
            paused_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            outline: None,
            phases: Vec::new(),
            tasks: Vec::new(),
            tests: Vec::new(),
            events: Vec::new(),
            current_state: CurrentState::default(),
        }
    }

    pub fn phase(&self, id: &str) -> Result<&Phase> {
        self.phases
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| not_found(EntityKind::Phase, id))
    }

    pub fn task(&self, id: &str) -> Result<&Task> {
        self.tasks
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| not_found(EntityKind::Task, id))
    }

    pub fn test(&self, id: &str) -> Result<&Test> {
        self.tests
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| not_found(EntityKind::Test, id))
    }

    /// The phase a test belongs to: the stored `phase_id` when present,
    /// otherwise the phase of its task.
    pub fn test_phase_id<'a>(&'a self, test: &'a Test) -> Option<&'a str> {
        test.phase_id.as_deref().or_else(|| {
            self.tasks
                .iter()
                .find(|t| t.id == test.task_id)
                .map(|t| t.phase_id.as_str())
        })
    }

    pub fn tasks_in_phase<'a>(&'a self, phase_id: &'a str) -> impl Iterator<Item = &'a Task> {
        self.tasks.iter().filter(move |t| t.phase_id == phase_id)
    }

    pub fn tests_for_task<'a>(&'a self, task_id: &'a str) -> impl Iterator<Item = &'a Test> {
        self.tests.iter().filter(move |t| t.task_id == task_id)
    }

    pub fn tests_in_phase<'a>(&'a self, phase_id: &'a str) -> impl Iterator<Item = &'a Test> {
        self.tests
            .iter()
            .filter(move |t| self.test_phase_id(t) == Some(phase_id))
    }

    pub fn last_event_time(&self) -> Option<DateTime<Utc>> {
        self.events.last().map(|e| e.timestamp)
    }
}

fn not_found(kind: EntityKind, id: &str) -> CoreError {
    CoreError::EntityNotFound {
        kind,
        id: id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_change_parse_defaults_to_modified() {
        let f = FileChange::parse("src/main.rs").unwrap();
        assert_eq!(f.path, "src/main.rs");
        assert_eq!(f.action, "modified");

        let f = FileChange::parse("src/lib.rs:added").unwrap();
        assert_eq!(f.action, "added");

        // A colon that is not an action stays part of the path.
        let f = FileChange::parse("C:/repo/x.rs").unwrap();
        assert_eq!(f.path, "C:/repo/x.rs");
    }

    #[test]
    fn file_change_list() {
        let files = FileChange::parse_list("a.rs:added, b.rs ,,c.rs:deleted").unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[2].action, "deleted");
        assert!(FileChange::parse_list(":added").is_err());
    }

    #[test]
    fn test_phase_is_derived_from_task() {
        let mut epic = Epic::new("e", "E");
        epic.tasks.push(Task {
            id: "t1".into(),
            phase_id: "p1".into(),
            name: "T".into(),
            status: Status::Pending,
            description: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        });
        epic.tests.push(Test {
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
        });
        assert_eq!(epic.test_phase_id(&epic.tests[0]), Some("p1"));
        assert_eq!(epic.tests_in_phase("p1").count(), 1);
        assert!(matches!(
            epic.task("nope"),
            Err(CoreError::EntityNotFound { kind: EntityKind::Task, .. })
        ));
    }
}
