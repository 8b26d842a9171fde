mod cmd;
mod output;
mod root;

use agentpm_core::aggregate::DEFAULT_EVENT_LIMIT;
use agentpm_core::machine::Transition;
use agentpm_core::types::EntityKind;
use agentpm_core::{Context, CoreError, Report};
use clap::{Parser, Subcommand};
use cmd::join_words;
use output::Format;
use root::Workspace;
use std::path::{Path, PathBuf};
use std::process::exit;

#[derive(Parser)]
#[command(
    name = "agentpm",
    about = "Lifecycle-guarded epic, phase, task and test tracking for coding agents",
    version,
    propagate_version = true
)]
struct Cli {
    /// Epic document to use instead of the configured current epic
    #[arg(long, global = true)]
    file: Option<PathBuf>,

    /// Config file (default: nearest .agentpm.json upward from the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Clock override for this invocation (ISO 8601, UTC when no offset)
    #[arg(long, global = true)]
    time: Option<String>,

    /// Output shape
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config file bound to an existing epic document
    Init {
        /// Epic document to track
        #[arg(long)]
        epic: PathBuf,
        #[arg(long)]
        project_name: Option<String>,
        /// Agent name recorded on events
        #[arg(long)]
        assignee: Option<String>,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Point the config at another epic document
    Switch { epic: PathBuf },

    /// Show the resolved configuration
    Config,

    /// Epic overview: progress, phases and the current work
    Status,

    /// The wip phase and task, plus the recorded next action
    Current,

    StartEpic,
    DoneEpic,
    PauseEpic,
    ResumeEpic,
    CancelEpic { reason: Vec<String> },

    StartPhase { id: String },
    DonePhase { id: String },
    CancelPhase { id: String, reason: Vec<String> },

    StartTask { id: String },
    DoneTask { id: String },
    CancelTask { id: String, reason: Vec<String> },

    StartTest { id: String },
    PassTest { id: String },
    FailTest {
        id: String,
        #[arg(required = true)]
        note: Vec<String>,
    },
    CancelTest {
        id: String,
        #[arg(required = true)]
        note: Vec<String>,
    },

    /// Start the next pending task, opening the next phase when none is wip
    StartNext,

    /// Record a free-text event
    Log {
        #[arg(required = true)]
        message: Vec<String>,
        /// implementation, blocker, issue, decision or note
        #[arg(long = "type")]
        event_type: Option<String>,
        /// Comma-separated path[:added|modified|deleted] list
        #[arg(long)]
        files: Option<String>,
    },

    /// Tests whose latest result is failing
    Failing,

    /// Phases and tasks not yet started
    Pending,

    /// Most recent events in log order
    Events {
        /// Number of events to show (0 = all)
        #[arg(long, default_value_t = DEFAULT_EVENT_LIMIT)]
        limit: usize,
    },

    /// Everything the next session needs to pick up the work
    Handoff {
        #[arg(long, default_value_t = DEFAULT_EVENT_LIMIT)]
        limit: usize,
    },

    /// Show one entity, or every entity of a kind when no id is given
    Show { kind: String, id: Option<String> },

    /// Check document consistency
    Validate,

    /// Built-in command reference
    Docs,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let (report, format) = match Cli::try_parse() {
        Ok(cli) => {
            let format = cli.format;
            let report = dispatch(cli).unwrap_or_else(|err| match err.downcast_ref::<CoreError>() {
                Some(core) => Report::from(core),
                None => Report::io_failure(format!("{err:#}")),
            });
            (report, format)
        }
        // --help and --version
        Err(e) if !e.use_stderr() => {
            let _ = e.print();
            exit(0);
        }
        Err(e) => {
            let args: Vec<String> = std::env::args_os()
                .map(|a| a.to_string_lossy().into_owned())
                .collect();
            (usage_report(&e), output::requested_format(&args))
        }
    };

    if let Err(e) = output::emit(&report, format) {
        eprintln!("error: {e:#}");
        exit(2);
    }
    exit(report.exit_code);
}

fn dispatch(cli: Cli) -> anyhow::Result<Report> {
    let Cli {
        file,
        config,
        time,
        command,
        ..
    } = cli;

    use EntityKind::{Epic, Phase, Task, Test};
    use Transition::{Cancel, Complete, Fail, Pass, Pause, Resume, Start};

    let config = config.as_deref();
    let file = file.as_deref();
    let ctx = || open_context(config, file, time.as_deref());

    match command {
        Commands::Init {
            epic,
            project_name,
            assignee,
            force,
        } => cmd::init::init(
            config,
            &epic,
            project_name.as_deref(),
            assignee.as_deref(),
            force,
        ),
        Commands::Switch { epic } => cmd::init::switch(&Workspace::open(config)?, &epic),
        Commands::Config => cmd::config::run(&Workspace::open(config)?, file),
        Commands::Docs => cmd::docs::run(),

        Commands::StartEpic => cmd::lifecycle::run(&ctx()?, Epic, None, Start, None),
        Commands::DoneEpic => cmd::lifecycle::run(&ctx()?, Epic, None, Complete, None),
        Commands::PauseEpic => cmd::lifecycle::run(&ctx()?, Epic, None, Pause, None),
        Commands::ResumeEpic => cmd::lifecycle::run(&ctx()?, Epic, None, Resume, None),
        Commands::CancelEpic { reason } => {
            let reason = join_words(&reason);
            cmd::lifecycle::run(&ctx()?, Epic, None, Cancel, reason.as_deref())
        }

        Commands::StartPhase { id } => cmd::lifecycle::run(&ctx()?, Phase, Some(&id), Start, None),
        Commands::DonePhase { id } => {
            cmd::lifecycle::run(&ctx()?, Phase, Some(&id), Complete, None)
        }
        Commands::CancelPhase { id, reason } => {
            let reason = join_words(&reason);
            cmd::lifecycle::run(&ctx()?, Phase, Some(&id), Cancel, reason.as_deref())
        }

        Commands::StartTask { id } => cmd::lifecycle::run(&ctx()?, Task, Some(&id), Start, None),
        Commands::DoneTask { id } => cmd::lifecycle::run(&ctx()?, Task, Some(&id), Complete, None),
        Commands::CancelTask { id, reason } => {
            let reason = join_words(&reason);
            cmd::lifecycle::run(&ctx()?, Task, Some(&id), Cancel, reason.as_deref())
        }

        Commands::StartTest { id } => cmd::lifecycle::run(&ctx()?, Test, Some(&id), Start, None),
        Commands::PassTest { id } => cmd::lifecycle::run(&ctx()?, Test, Some(&id), Pass, None),
        Commands::FailTest { id, note } => {
            let note = join_words(&note);
            cmd::lifecycle::run(&ctx()?, Test, Some(&id), Fail, note.as_deref())
        }
        Commands::CancelTest { id, note } => {
            let note = join_words(&note);
            cmd::lifecycle::run(&ctx()?, Test, Some(&id), Cancel, note.as_deref())
        }

        Commands::StartNext => cmd::lifecycle::start_next(&ctx()?),
        Commands::Log {
            message,
            event_type,
            files,
        } => cmd::log::run(
            &ctx()?,
            &message.join(" "),
            event_type.as_deref(),
            files.as_deref(),
        ),

        Commands::Status => cmd::query::status(&ctx()?),
        Commands::Current => cmd::query::current(&ctx()?),
        Commands::Failing => cmd::query::failing(&ctx()?),
        Commands::Pending => cmd::query::pending(&ctx()?),
        Commands::Events { limit } => cmd::query::events(&ctx()?, limit),
        Commands::Handoff { limit } => cmd::query::handoff(&ctx()?, limit),
        Commands::Show { kind, id } => cmd::query::show(&ctx()?, &kind, id.as_deref()),
        Commands::Validate => cmd::validate::run(&ctx()?),
    }
}

/// A command line clap rejected, as a `usage` error report.
fn usage_report(e: &clap::Error) -> Report {
    let rendered = e.render().to_string();
    let message = rendered.trim();
    let message = message.strip_prefix("error: ").unwrap_or(message);
    Report::from(&CoreError::Usage(message.to_string()))
}

fn open_context(
    config: Option<&Path>,
    file: Option<&Path>,
    time: Option<&str>,
) -> anyhow::Result<Context> {
    let ws = Workspace::open(config)?;
    Ok(ws.context(file, time)?)
}
