use agentpm_core::report::{events_report, failing_report};
use agentpm_core::types::EntityKind;
use agentpm_core::{Context, Report};

pub fn status(ctx: &Context) -> anyhow::Result<Report> {
    Ok(Report::from(&ctx.status()?))
}

pub fn current(ctx: &Context) -> anyhow::Result<Report> {
    Ok(Report::from(&ctx.current()?))
}

pub fn failing(ctx: &Context) -> anyhow::Result<Report> {
    Ok(failing_report(&ctx.failing()?))
}

pub fn pending(ctx: &Context) -> anyhow::Result<Report> {
    Ok(Report::from(&ctx.pending()?))
}

pub fn events(ctx: &Context, limit: usize) -> anyhow::Result<Report> {
    Ok(events_report(&ctx.events(limit)?))
}

pub fn handoff(ctx: &Context, limit: usize) -> anyhow::Result<Report> {
    Ok(Report::from(&ctx.handoff(limit)?))
}

pub fn show(ctx: &Context, kind: &str, id: Option<&str>) -> anyhow::Result<Report> {
    let kind: EntityKind = kind.parse()?;
    Ok(Report::from(&ctx.show(kind, id)?))
}
