use crate::root::Workspace;
use agentpm_core::report::config_report;
use agentpm_core::Report;
use std::path::Path;

/// Show the resolved config. A missing config or an unresolvable
/// document is reported, not treated as a failure.
pub fn run(ws: &Workspace, file: Option<&Path>) -> anyhow::Result<Report> {
    let document = ws.document(file).ok();
    Ok(config_report(
        &ws.config_path,
        ws.config.as_ref(),
        document.as_deref(),
    ))
}
