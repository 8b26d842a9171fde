use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status shared by the epic, phases, tasks and (as the test
/// lifecycle) tests. `Paused` is only reachable by the epic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Wip,
    Paused,
    Done,
    Cancelled,
}

impl Status {
    pub fn all() -> &'static [Status] {
        &[
            Status::Pending,
            Status::Wip,
            Status::Paused,
            Status::Done,
            Status::Cancelled,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Wip => "wip",
            Status::Paused => "paused",
            Status::Done => "done",
            Status::Cancelled => "cancelled",
        }
    }

    /// Parse a status name, accepting the legacy vocabulary
    /// (`planning`, `active`, `completed`).
    pub fn parse(s: &str) -> Option<Status> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" | "planning" => Some(Status::Pending),
            "wip" | "active" | "in_progress" => Some(Status::Wip),
            "paused" | "on_hold" => Some(Status::Paused),
            "done" | "completed" => Some(Status::Done),
            "cancelled" | "canceled" => Some(Status::Cancelled),
            _ => None,
        }
    }

    /// Whether `s` is a legacy alias rather than a canonical name.
    pub fn is_legacy_name(s: &str) -> bool {
        Status::parse(s).is_some_and(|st| st.as_str() != s)
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Status::Done | Status::Cancelled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::parse(s).ok_or_else(|| CoreError::Parse(format!("unknown status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// TestResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    Passing,
    Failing,
}

impl TestResult {
    pub fn as_str(self) -> &'static str {
        match self {
            TestResult::Passing => "passing",
            TestResult::Failing => "failing",
        }
    }

    pub fn parse(s: &str) -> Option<TestResult> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passing" | "passed" | "pass" => Some(TestResult::Passing),
            "failing" | "failed" | "fail" => Some(TestResult::Failing),
            _ => None,
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Epic,
    Phase,
    Task,
    Test,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Epic => "epic",
            EntityKind::Phase => "phase",
            EntityKind::Task => "task",
            EntityKind::Test => "test",
        }
    }

    /// Capitalised form used at the start of human-readable messages.
    pub fn title(self) -> &'static str {
        match self {
            EntityKind::Epic => "Epic",
            EntityKind::Phase => "Phase",
            EntityKind::Task => "Task",
            EntityKind::Test => "Test",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "epic" => Ok(EntityKind::Epic),
            "phase" | "phases" => Ok(EntityKind::Phase),
            "task" | "tasks" => Ok(EntityKind::Task),
            "test" | "tests" => Ok(EntityKind::Test),
            _ => Err(CoreError::Usage(format!(
                "unknown entity kind '{s}': expected epic, phase, task or test"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Event classification. Lifecycle events are named `<entity>_<verb>`;
/// the rest are free-form log entries. Types not known to this build are
/// kept verbatim so documents written by newer tools survive a rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    EpicStarted,
    EpicCompleted,
    EpicPaused,
    EpicResumed,
    EpicCancelled,
    PhaseStarted,
    PhaseCompleted,
    PhaseCancelled,
    TaskStarted,
    TaskCompleted,
    TaskCancelled,
    TestStarted,
    TestPassed,
    TestFailed,
    TestCancelled,
    Implementation,
    Blocker,
    Issue,
    Decision,
    Note,
    Other(String),
}

impl EventType {
    /// Types a caller may pass to `log --type`.
    pub fn log_types() -> &'static [EventType] {
        &[
            EventType::Implementation,
            EventType::Blocker,
            EventType::Issue,
            EventType::Decision,
            EventType::Note,
        ]
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventType::EpicStarted => "epic_started",
            EventType::EpicCompleted => "epic_completed",
            EventType::EpicPaused => "epic_paused",
            EventType::EpicResumed => "epic_resumed",
            EventType::EpicCancelled => "epic_cancelled",
            EventType::PhaseStarted => "phase_started",
            EventType::PhaseCompleted => "phase_completed",
            EventType::PhaseCancelled => "phase_cancelled",
            EventType::TaskStarted => "task_started",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskCancelled => "task_cancelled",
            EventType::TestStarted => "test_started",
            EventType::TestPassed => "test_passed",
            EventType::TestFailed => "test_failed",
            EventType::TestCancelled => "test_cancelled",
            EventType::Implementation => "implementation",
            EventType::Blocker => "blocker",
            EventType::Issue => "issue",
            EventType::Decision => "decision",
            EventType::Note => "note",
            EventType::Other(s) => s.as_str(),
        }
    }

    /// Lenient parse used when reading documents.
    pub fn from_name(s: &str) -> EventType {
        let known = [
            EventType::EpicStarted,
            EventType::EpicCompleted,
            EventType::EpicPaused,
            EventType::EpicResumed,
            EventType::EpicCancelled,
            EventType::PhaseStarted,
            EventType::PhaseCompleted,
            EventType::PhaseCancelled,
            EventType::TaskStarted,
            EventType::TaskCompleted,
            EventType::TaskCancelled,
            EventType::TestStarted,
            EventType::TestPassed,
            EventType::TestFailed,
            EventType::TestCancelled,
            EventType::Implementation,
            EventType::Blocker,
            EventType::Issue,
            EventType::Decision,
            EventType::Note,
        ];
        known
            .into_iter()
            .find(|t| t.as_str() == s)
            .unwrap_or_else(|| EventType::Other(s.to_string()))
    }

    /// Strict parse for `log --type`.
    pub fn parse_log_type(s: &str) -> Result<EventType, CoreError> {
        EventType::log_types()
            .iter()
            .find(|t| t.as_str() == s)
            .cloned()
            .ok_or_else(|| {
                let valid: Vec<&str> = EventType::log_types().iter().map(|t| t.as_str()).collect();
                CoreError::Usage(format!(
                    "unknown log type '{s}': expected one of {}",
                    valid.join(", ")
                ))
            })
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
