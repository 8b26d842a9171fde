use agentpm_core::Report;
use serde::Serialize;

#[derive(Serialize)]
struct CommandDoc {
    name: &'static str,
    usage: &'static str,
    summary: &'static str,
}

const fn doc(name: &'static str, usage: &'static str, summary: &'static str) -> CommandDoc {
    CommandDoc {
        name,
        usage,
        summary,
    }
}

const COMMANDS: &[CommandDoc] = &[
    doc("init", "init --epic <path> [--project-name <name>] [--assignee <agent>] [--force]", "Create .agentpm.json bound to an epic document"),
    doc("switch", "switch <path>", "Point the config at another epic document"),
    doc("config", "config", "Show the resolved config, document and agent"),
    doc("status", "status", "Epic overview with progress and phases"),
    doc("current", "current", "The wip phase and task, plus the next action"),
    doc("start-epic", "start-epic", "Move the epic to wip"),
    doc("done-epic", "done-epic", "Complete the epic once no phase is open and no test fails"),
    doc("pause-epic", "pause-epic", "Pause a wip epic"),
    doc("resume-epic", "resume-epic", "Resume a paused epic"),
    doc("cancel-epic", "cancel-epic [reason]", "Cancel the epic"),
    doc("start-phase", "start-phase <id>", "Start a phase of a wip epic"),
    doc("done-phase", "done-phase <id>", "Complete a phase whose tasks are all closed"),
    doc("cancel-phase", "cancel-phase <id> [reason]", "Cancel a phase"),
    doc("start-task", "start-task <id>", "Start a task in a wip phase"),
    doc("done-task", "done-task <id>", "Complete a task whose tests have all passed"),
    doc("cancel-task", "cancel-task <id> [reason]", "Cancel a task"),
    doc("start-test", "start-test <id>", "Start a test of a wip task"),
    doc("pass-test", "pass-test <id>", "Mark a test passing and done"),
    doc("fail-test", "fail-test <id> <note>", "Mark a test failing with a note"),
    doc("cancel-test", "cancel-test <id> <note>", "Cancel a test"),
    doc("start-next", "start-next", "Start the next pending task, opening a phase if needed"),
    doc("log", "log <message> [--type implementation|blocker|issue|decision|note] [--files path[:action],...]", "Append a free-text event"),
    doc("failing", "failing", "List failing tests with their notes"),
    doc("pending", "pending", "List pending phases and tasks"),
    doc("events", "events [--limit N]", "Most recent events in log order (0 = all)"),
    doc("handoff", "handoff [--limit N]", "Context for the next agent session"),
    doc("show", "show <epic|phase|task|test> [id]", "Show one entity, or every entity of a kind"),
    doc("validate", "validate", "Check document consistency; exits 1 on errors"),
    doc("docs", "docs", "This command reference"),
];

const GLOBAL_FLAGS: &[CommandDoc] = &[
    doc("--file", "--file <path>", "Epic document to use instead of the configured one"),
    doc("--config", "--config <path>", "Config file to use instead of discovering .agentpm.json"),
    doc("--time", "--time <ISO8601>", "Clock override for timestamps"),
    doc("--format", "--format text|json|xml", "Output shape"),
];

pub fn run() -> anyhow::Result<Report> {
    Ok(
        Report::new("docs", "agentpm: lifecycle-guarded project tracking for coding agents")
            .field("commands", COMMANDS)
            .field("global_flags", GLOBAL_FLAGS)
            .field(
                "exit_codes",
                serde_json::json!({
                    "success": 0,
                    "guard_or_transition_failure": 1,
                    "io_or_parse_failure": 2,
                    "usage_error": 3,
                }),
            ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_is_listed_once() {
        let mut names: Vec<&str> = COMMANDS.iter().map(|c| c.name).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
        assert!(names.contains(&"start-next"));
    }

    #[test]
    fn report_carries_commands() {
        let report = run().unwrap();
        assert_eq!(report.variant, "docs");
        assert_eq!(report.exit_code, 0);
        assert_eq!(report.fields["commands"][0]["name"], "init");
    }
}
