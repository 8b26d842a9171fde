use agentpm_core::machine::Transition;
use agentpm_core::types::EntityKind;
use agentpm_core::{Context, Report};

pub fn run(
    ctx: &Context,
    kind: EntityKind,
    id: Option<&str>,
    verb: Transition,
    note: Option<&str>,
) -> anyhow::Result<Report> {
    let outcome = ctx.transition(kind, id, verb, note)?;
    Ok(Report::from(&outcome))
}

pub fn start_next(ctx: &Context) -> anyhow::Result<Report> {
    let outcome = ctx.start_next()?;
    Ok(Report::from(&outcome))
}
