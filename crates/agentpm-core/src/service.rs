//! Command services.
//!
//! Every mutating verb runs the same pipeline over one document:
//! load (with invariant check) -> locate -> already-in-state? -> status
//! machine -> guards -> apply -> append event -> atomic save. Nothing is
//! written unless every step succeeds, and an already-in-state result
//! writes nothing at all.

use crate::aggregate::{self, Current, EventView, Handoff, Overview, Pending, Progress};
use crate::aggregate::{EpicView, FailingTest, PhaseView, TaskView, TestView};
use crate::clock::{format_timestamp, Clock};
use crate::codec;
use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::guard;
use crate::machine::{self, AlreadyIn, EntityMut, Transition};
use crate::model::{Epic, Event, FileChange};
use crate::types::{EntityKind, EventType, Status, TestResult};
use crate::validate::{self, Finding};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything one invocation needs: which document, who is acting, and
/// what time it is.
pub struct Context {
    pub document: PathBuf,
    pub agent: String,
    pub clock: Box<dyn Clock>,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of a single guarded transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub kind: EntityKind,
    pub id: String,
    pub name: String,
    pub verb: Transition,
    pub event_type: EventType,
    pub previous: Status,
    pub status: Status,
    /// Set when the entity was already where the verb would leave it.
    pub already: Option<AlreadyIn>,
    pub timestamp: Option<DateTime<Utc>>,
    pub requested_at: Option<DateTime<Utc>>,
    pub test_result: Option<TestResult>,
    pub note: Option<String>,
    pub progress: Progress,
}

impl TransitionOutcome {
    pub fn changed(&self) -> bool {
        self.already.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NextOutcome {
    /// At least one of the two is set.
    Started {
        phase: Option<TransitionOutcome>,
        task: Option<TransitionOutcome>,
    },
    NoPendingTasks { phase_id: String },
    NoPendingWork,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shown {
    Epic(EpicView),
    Phase(PhaseView),
    Phases(Vec<PhaseView>),
    Task(TaskView),
    Tasks(Vec<TaskView>),
    Test(TestView),
    Tests(Vec<TestView>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub document: PathBuf,
    pub epic_id: String,
    pub findings: Vec<Finding>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        !validate::has_errors(&self.findings)
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

impl Context {
    pub fn new(document: impl Into<PathBuf>, agent: impl Into<String>, clock: Box<dyn Clock>) -> Self {
        Self {
            document: document.into(),
            agent: agent.into(),
            clock,
        }
    }

    /// Load the document, refusing it when it breaks an invariant.
    pub fn load(&self) -> Result<Epic> {
        codec::load_checked(&self.document)
    }

    /// Run one verb against one entity and persist the result. `id` is
    /// ignored for the epic. `note` is the failure note or cancel reason.
    pub fn transition(
        &self,
        kind: EntityKind,
        id: Option<&str>,
        verb: Transition,
        note: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let mut epic = self.load()?;
        let id = match (kind, id) {
            (EntityKind::Epic, _) => epic.id.clone(),
            (_, Some(id)) => id.to_string(),
            (_, None) => return Err(CoreError::Usage(format!("{kind} id is required"))),
        };
        let outcome = self.step(&mut epic, kind, &id, verb, note)?;
        if outcome.changed() {
            codec::save(&self.document, &epic)?;
        }
        Ok(outcome)
    }

    pub fn start_epic(&self) -> Result<TransitionOutcome> {
        self.transition(EntityKind::Epic, None, Transition::Start, None)
    }

    pub fn done_epic(&self) -> Result<TransitionOutcome> {
        self.transition(EntityKind::Epic, None, Transition::Complete, None)
    }

    pub fn pause_epic(&self) -> Result<TransitionOutcome> {
        self.transition(EntityKind::Epic, None, Transition::Pause, None)
    }

    pub fn resume_epic(&self) -> Result<TransitionOutcome> {
        self.transition(EntityKind::Epic, None, Transition::Resume, None)
    }

    pub fn cancel_epic(&self, reason: Option<&str>) -> Result<TransitionOutcome> {
        self.transition(EntityKind::Epic, None, Transition::Cancel, reason)
    }

    pub fn start_phase(&self, id: &str) -> Result<TransitionOutcome> {
        self.transition(EntityKind::Phase, Some(id), Transition::Start, None)
    }

    pub fn done_phase(&self, id: &str) -> Result<TransitionOutcome> {
        self.transition(EntityKind::Phase, Some(id), Transition::Complete, None)
    }

    pub fn cancel_phase(&self, id: &str, reason: Option<&str>) -> Result<TransitionOutcome> {
        self.transition(EntityKind::Phase, Some(id), Transition::Cancel, reason)
    }

    pub fn start_task(&self, id: &str) -> Result<TransitionOutcome> {
        self.transition(EntityKind::Task, Some(id), Transition::Start, None)
    }

    pub fn done_task(&self, id: &str) -> Result<TransitionOutcome> {
        self.transition(EntityKind::Task, Some(id), Transition::Complete, None)
    }

    pub fn cancel_task(&self, id: &str, reason: Option<&str>) -> Result<TransitionOutcome> {
        self.transition(EntityKind::Task, Some(id), Transition::Cancel, reason)
    }

    pub fn start_test(&self, id: &str) -> Result<TransitionOutcome> {
        self.transition(EntityKind::Test, Some(id), Transition::Start, None)
    }

    pub fn pass_test(&self, id: &str) -> Result<TransitionOutcome> {
        self.transition(EntityKind::Test, Some(id), Transition::Pass, None)
    }

    pub fn fail_test(&self, id: &str, note: &str) -> Result<TransitionOutcome> {
        self.transition(EntityKind::Test, Some(id), Transition::Fail, Some(note))
    }

    pub fn cancel_test(&self, id: &str, reason: Option<&str>) -> Result<TransitionOutcome> {
        self.transition(EntityKind::Test, Some(id), Transition::Cancel, reason)
    }

    /// Start the first pending task of a wip phase, starting the first
    /// pending phase first when no phase is wip. Document order decides.
    pub fn start_next(&self) -> Result<NextOutcome> {
        let mut epic = self.load()?;
        let wip_phases: Vec<String> = epic
            .phases
            .iter()
            .filter(|p| p.status == Status::Wip)
            .map(|p| p.id.clone())
            .collect();

        if let Some(first_wip) = wip_phases.first() {
            let next = epic
                .tasks
                .iter()
                .find(|t| t.status == Status::Pending && wip_phases.contains(&t.phase_id))
                .map(|t| t.id.clone());
            let Some(task_id) = next else {
                debug!(phase = %first_wip, "no pending task in any wip phase");
                return Ok(NextOutcome::NoPendingTasks {
                    phase_id: first_wip.clone(),
                });
            };
            let task = self.step(&mut epic, EntityKind::Task, &task_id, Transition::Start, None)?;
            codec::save(&self.document, &epic)?;
            return Ok(NextOutcome::Started {
                phase: None,
                task: Some(task),
            });
        }

        let Some(phase_id) = epic
            .phases
            .iter()
            .find(|p| p.status == Status::Pending)
            .map(|p| p.id.clone())
        else {
            return Ok(NextOutcome::NoPendingWork);
        };
        let phase = self.step(&mut epic, EntityKind::Phase, &phase_id, Transition::Start, None)?;
        let next = epic
            .tasks_in_phase(&phase_id)
            .find(|t| t.status == Status::Pending)
            .map(|t| t.id.clone());
        let task = match next {
            Some(task_id) => {
                Some(self.step(&mut epic, EntityKind::Task, &task_id, Transition::Start, None)?)
            }
            None => None,
        };
        codec::save(&self.document, &epic)?;
        Ok(NextOutcome::Started {
            phase: Some(phase),
            task,
        })
    }

    /// The in-memory half of the pipeline. Mutates `epic` only when the
    /// returned outcome reports a change.
    fn step(
        &self,
        epic: &mut Epic,
        kind: EntityKind,
        id: &str,
        verb: Transition,
        note: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let (from, name) = locate(epic, kind, id)?;
        let mut outcome = TransitionOutcome {
            kind,
            id: id.to_string(),
            name,
            verb,
            event_type: verb.event_type(kind),
            previous: from,
            status: from,
            already: None,
            timestamp: None,
            requested_at: None,
            test_result: None,
            note: None,
            progress: aggregate::progress(epic),
        };

        if let Some(already) = machine::already(kind, from, verb) {
            debug!(%kind, id, %verb, status = %from, "already in target state");
            outcome.already = Some(already);
            outcome.test_result = test_result(epic, kind, id);
            return Ok(outcome);
        }
        if !machine::can_apply(kind, from, verb) {
            return Err(CoreError::InvalidTransition {
                kind,
                id: id.to_string(),
                from,
                to: verb.target(),
                reason: machine::rejection_reason(kind, from, verb),
            });
        }
        guard::check(epic, kind, id, verb, note)?;

        let (ts, requested_at) = self.stamp(epic);
        machine::apply(entity_mut(epic, kind, id)?, verb, ts, note);

        let note = note.map(str::trim).filter(|n| !n.is_empty());
        let (phase_id, task_id, test_id) = event_context(epic, kind, id);
        let message = match note {
            Some(n) => format!("{} {id} {}: {n}", kind.title(), verb.past_tense()),
            None => format!("{} {id} {}", kind.title(), verb.past_tense()),
        };
        epic.events.push(Event {
            timestamp: ts,
            requested_at,
            agent: self.agent.clone(),
            event_type: outcome.event_type.clone(),
            phase_id,
            task_id,
            test_id,
            message,
            files: Vec::new(),
        });
        info!(%kind, id, from = %from, to = %verb.target(), "transition applied");

        outcome.status = verb.target();
        outcome.timestamp = Some(ts);
        outcome.requested_at = requested_at;
        outcome.test_result = test_result(epic, kind, id);
        outcome.note = note.map(str::to_string);
        outcome.progress = aggregate::progress(epic);
        Ok(outcome)
    }

    /// The time for the next event, clamped so the log never runs
    /// backwards. The second value is the requested time when clamping
    /// happened.
    fn stamp(&self, epic: &Epic) -> (DateTime<Utc>, Option<DateTime<Utc>>) {
        let requested = self.clock.now();
        match epic.last_event_time() {
            Some(last) if requested < last => {
                warn!(
                    requested = %format_timestamp(&requested),
                    clamped_to = %format_timestamp(&last),
                    "requested time precedes the last event; clamping"
                );
                (last, Some(requested))
            }
            _ => (requested, None),
        }
    }

    // -----------------------------------------------------------------------
    // Log
    // -----------------------------------------------------------------------

    /// Append a free-form event attributed to the current phase and task.
    pub fn log(
        &self,
        message: &str,
        event_type: EventType,
        files: Vec<FileChange>,
    ) -> Result<Event> {
        let message = message.trim();
        if message.is_empty() {
            return Err(CoreError::Usage("log message must not be empty".to_string()));
        }
        let mut epic = self.load()?;
        if epic.status == Status::Cancelled {
            return Err(CoreError::validation(
                Some(&epic.id),
                format!("cannot log to epic {}: it is cancelled", epic.id),
            ));
        }
        let Current {
            current_phase,
            current_task,
            ..
        } = aggregate::current(&epic);
        let (timestamp, requested_at) = self.stamp(&epic);
        let event = Event {
            timestamp,
            requested_at,
            agent: self.agent.clone(),
            event_type,
            phase_id: current_phase.map(|p| p.id),
            task_id: current_task.map(|t| t.id),
            test_id: None,
            message: message.to_string(),
            files,
        };
        epic.events.push(event.clone());
        codec::save(&self.document, &epic)?;
        info!(event_type = %event.event_type, "event logged");
        Ok(event)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn status(&self) -> Result<Overview> {
        Ok(aggregate::overview(&self.load()?))
    }

    pub fn current(&self) -> Result<Current> {
        Ok(aggregate::current(&self.load()?))
    }

    pub fn failing(&self) -> Result<Vec<FailingTest>> {
        Ok(aggregate::failing(&self.load()?))
    }

    pub fn pending(&self) -> Result<Pending> {
        Ok(aggregate::pending(&self.load()?))
    }

    pub fn events(&self, limit: usize) -> Result<Vec<EventView>> {
        Ok(aggregate::recent_events(&self.load()?, limit))
    }

    pub fn handoff(&self, limit: usize) -> Result<Handoff> {
        Ok(aggregate::handoff(&self.load()?, limit))
    }

    /// One entity when `id` is given, otherwise every entity of `kind`.
    pub fn show(&self, kind: EntityKind, id: Option<&str>) -> Result<Shown> {
        let epic = self.load()?;
        let shown = match (kind, id) {
            (EntityKind::Epic, Some(id)) if id != epic.id => {
                return Err(CoreError::EntityNotFound {
                    kind,
                    id: id.to_string(),
                })
            }
            (EntityKind::Epic, _) => Shown::Epic(EpicView::from(&epic)),
            (EntityKind::Phase, Some(id)) => Shown::Phase(PhaseView::new(&epic, epic.phase(id)?)),
            (EntityKind::Phase, None) => Shown::Phases(
                epic.phases.iter().map(|p| PhaseView::new(&epic, p)).collect(),
            ),
            (EntityKind::Task, Some(id)) => Shown::Task(TaskView::new(&epic, epic.task(id)?)),
            (EntityKind::Task, None) => {
                Shown::Tasks(epic.tasks.iter().map(|t| TaskView::new(&epic, t)).collect())
            }
            (EntityKind::Test, Some(id)) => Shown::Test(TestView::new(&epic, epic.test(id)?)),
            (EntityKind::Test, None) => {
                Shown::Tests(epic.tests.iter().map(|t| TestView::new(&epic, t)).collect())
            }
        };
        Ok(shown)
    }

    /// Full consistency report. Unlike every other command this accepts a
    /// document that breaks invariants; only unreadable input fails.
    pub fn validate(&self) -> Result<ValidationOutcome> {
        let epic = codec::load(&self.document)?;
        let findings = validate::check(&epic);
        debug!(count = findings.len(), "validation finished");
        Ok(ValidationOutcome {
            document: self.document.clone(),
            epic_id: epic.id,
            findings,
        })
    }
}

fn locate(epic: &Epic, kind: EntityKind, id: &str) -> Result<(Status, String)> {
    match kind {
        EntityKind::Epic if id == epic.id => Ok((epic.status, epic.name.clone())),
        EntityKind::Epic => Err(CoreError::EntityNotFound {
            kind,
            id: id.to_string(),
        }),
        EntityKind::Phase => epic.phase(id).map(|p| (p.status, p.name.clone())),
        EntityKind::Task => epic.task(id).map(|t| (t.status, t.name.clone())),
        EntityKind::Test => epic.test(id).map(|t| (t.status, t.name.clone())),
    }
}

fn entity_mut<'a>(epic: &'a mut Epic, kind: EntityKind, id: &str) -> Result<EntityMut<'a>> {
    let missing = || CoreError::EntityNotFound {
        kind,
        id: id.to_string(),
    };
    Ok(match kind {
        EntityKind::Epic => EntityMut::Epic(epic),
        EntityKind::Phase => {
            EntityMut::Phase(epic.phases.iter_mut().find(|p| p.id == id).ok_or_else(missing)?)
        }
        EntityKind::Task => {
            EntityMut::Task(epic.tasks.iter_mut().find(|t| t.id == id).ok_or_else(missing)?)
        }
        EntityKind::Test => {
            EntityMut::Test(epic.tests.iter_mut().find(|t| t.id == id).ok_or_else(missing)?)
        }
    })
}

type EventRefs = (Option<String>, Option<String>, Option<String>);

/// Phase, task and test ids recorded on the event for a transition.
fn event_context(epic: &Epic, kind: EntityKind, id: &str) -> EventRefs {
    match kind {
        EntityKind::Epic => (None, None, None),
        EntityKind::Phase => (Some(id.to_string()), None, None),
        EntityKind::Task => (
            epic.task(id).ok().map(|t| t.phase_id.clone()),
            Some(id.to_string()),
            None,
        ),
        EntityKind::Test => {
            let test = epic.test(id).ok();
            (
                test.and_then(|t| epic.test_phase_id(t)).map(str::to_string),
                test.map(|t| t.task_id.clone()),
                Some(id.to_string()),
            )
        }
    }
}

fn test_result(epic: &Epic, kind: EntityKind, id: &str) -> Option<TestResult> {
    match kind {
        EntityKind::Test => epic.test(id).ok().and_then(|t| t.result),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Config-level commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct InitOutcome {
    pub config_path: PathBuf,
    pub document: PathBuf,
    pub config: Config,
}

/// Create the config file bound to an existing epic document. Only the
/// document's existence is checked, not its structure.
pub fn init(
    config_path: &Path,
    epic: &Path,
    project_name: Option<&str>,
    assignee: Option<&str>,
    force: bool,
) -> Result<InitOutcome> {
    let document = absolute(epic)?;
    if !document.is_file() {
        return Err(CoreError::DocumentNotFound(document));
    }
    if config_path.exists() && !force {
        return Err(CoreError::ConfigExists(config_path.to_path_buf()));
    }
    let mut config = Config {
        project_name: project_name.map(str::to_string),
        default_assignee: assignee.map(str::to_string),
        ..Config::default()
    };
    config.set_epic(config_path, &document);
    config.save(config_path)?;
    info!(config = %config_path.display(), epic = %document.display(), "initialised");
    Ok(InitOutcome {
        config_path: config_path.to_path_buf(),
        document,
        config,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchOutcome {
    pub config_path: PathBuf,
    pub document: PathBuf,
    pub previous: Option<String>,
    pub current: String,
    pub created: bool,
}

/// Point the config at another epic document, creating the config when
/// there is none yet.
pub fn switch(config_path: &Path, epic: &Path) -> Result<SwitchOutcome> {
    let document = absolute(epic)?;
    if !document.is_file() {
        return Err(CoreError::DocumentNotFound(document));
    }
    let existing = Config::load(config_path)?;
    let created = existing.is_none();
    let mut config = existing.unwrap_or_default();
    let previous = config.current_epic.clone();
    config.set_epic(config_path, &document);
    config.save(config_path)?;
    Ok(SwitchOutcome {
        config_path: config_path.to_path_buf(),
        document,
        previous,
        current: config.current_epic.unwrap_or_default(),
        created,
    })
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
