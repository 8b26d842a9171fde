use agentpm_core::model::FileChange;
use agentpm_core::types::EventType;
use agentpm_core::{Context, Report};

pub fn run(
    ctx: &Context,
    message: &str,
    event_type: Option<&str>,
    files: Option<&str>,
) -> anyhow::Result<Report> {
    let event_type = match event_type {
        Some(t) => EventType::parse_log_type(t)?,
        None => EventType::Implementation,
    };
    let files = match files {
        Some(list) => FileChange::parse_list(list)?,
        None => Vec::new(),
    };
    let event = ctx.log(message, event_type, files)?;
    Ok(Report::from(&event))
}
