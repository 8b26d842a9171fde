use crate::root::{self, Workspace};
use agentpm_core::{service, Report};
use std::path::Path;

pub fn init(
    explicit_config: Option<&Path>,
    epic: &Path,
    project_name: Option<&str>,
    assignee: Option<&str>,
    force: bool,
) -> anyhow::Result<Report> {
    let config_path = root::init_config_path(explicit_config);
    let outcome = service::init(&config_path, epic, project_name, assignee, force)?;
    Ok(Report::from(&outcome))
}

pub fn switch(ws: &Workspace, epic: &Path) -> anyhow::Result<Report> {
    let outcome = service::switch(&ws.config_path, epic)?;
    Ok(Report::from(&outcome))
}
