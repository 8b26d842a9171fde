use agentpm_core::{Context, Report};

/// Exit status is 1 when any finding is an error; the report is
/// rendered either way.
pub fn run(ctx: &Context) -> anyhow::Result<Report> {
    let outcome = ctx.validate()?;
    for finding in &outcome.findings {
        tracing::debug!(code = finding.code, id = ?finding.id, "{}", finding.message);
    }
    Ok(Report::from(&outcome))
}
