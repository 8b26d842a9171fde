use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = ".agentpm.json";
pub const DEFAULT_AGENT: &str = "agent";

/// Contents of `.agentpm.json`. Keys this build does not know about are
/// kept in `extra` and written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_epic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_assignee: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Config {
    /// Load the config at `path`; `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let cfg: Config = serde_json::from_str(&data)?;
        Ok(Some(cfg))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut data = serde_json::to_string_pretty(self)?;
        data.push('\n');
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Attribution for events written by this invocation.
    pub fn agent(&self) -> &str {
        self.default_assignee
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(DEFAULT_AGENT)
    }

    /// The configured epic document, resolved against the directory that
    /// holds the config file.
    pub fn epic_path(&self, config_path: &Path) -> Option<PathBuf> {
        let epic = self.current_epic.as_deref().filter(|e| !e.is_empty())?;
        let epic = Path::new(epic);
        if epic.is_absolute() {
            Some(epic.to_path_buf())
        } else {
            Some(config_dir(config_path).join(epic))
        }
    }

    /// Point `current_epic` at `document`, stored relative to the config
    /// directory when the document lives beneath it.
    pub fn set_epic(&mut self, config_path: &Path, document: &Path) {
        let dir = config_dir(config_path);
        let stored = match document.strip_prefix(dir) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => document,
        };
        self.current_epic = Some(stored.to_string_lossy().into_owned());
    }
}

/// `--file` wins over the configured epic; with neither there is nothing
/// to operate on.
pub fn resolve_document(
    file: Option<&Path>,
    config: Option<&Config>,
    config_path: &Path,
) -> Result<PathBuf> {
    if let Some(file) = file {
        return Ok(file.to_path_buf());
    }
    config
        .and_then(|c| c.epic_path(config_path))
        .ok_or(CoreError::NoDocument)
}

fn config_dir(config_path: &Path) -> &Path {
    match config_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load(&dir.path().join(CONFIG_FILE)).unwrap().is_none());
    }

    #[test]
    fn save_preserves_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"{"current_epic":"epic.xml","theme":"dark","default_assignee":"bot"}"#,
        )
        .unwrap();

        let mut cfg = Config::load(&path).unwrap().unwrap();
        assert_eq!(cfg.agent(), "bot");
        cfg.project_name = Some("demo".into());
        cfg.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["project_name"], "demo");
    }

    #[test]
    fn relative_epic_resolves_against_config_dir() {
        let cfg = Config {
            current_epic: Some("epics/auth.xml".into()),
            ..Config::default()
        };
        let path = cfg.epic_path(Path::new("/work/proj/.agentpm.json")).unwrap();
        assert_eq!(path, PathBuf::from("/work/proj/epics/auth.xml"));
    }

    #[test]
    fn set_epic_stores_relative_path_under_config_dir() {
        let mut cfg = Config::default();
        cfg.set_epic(
            Path::new("/work/proj/.agentpm.json"),
            Path::new("/work/proj/epics/auth.xml"),
        );
        assert_eq!(cfg.current_epic.as_deref(), Some("epics/auth.xml"));

        cfg.set_epic(Path::new("/work/proj/.agentpm.json"), Path::new("/elsewhere/e.xml"));
        assert_eq!(cfg.current_epic.as_deref(), Some("/elsewhere/e.xml"));
    }

    #[test]
    fn file_override_wins_and_absence_is_usage_error() {
        let cfg = Config {
            current_epic: Some("a.xml".into()),
            ..Config::default()
        };
        let cfg_path = Path::new("/p/.agentpm.json");
        assert_eq!(
            resolve_document(Some(Path::new("b.xml")), Some(&cfg), cfg_path).unwrap(),
            PathBuf::from("b.xml")
        );
        assert_eq!(
            resolve_document(None, Some(&cfg), cfg_path).unwrap(),
            PathBuf::from("/p/a.xml")
        );
        let err = resolve_document(None, None, cfg_path).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert_eq!(Config::default().agent(), DEFAULT_AGENT);
    }
}
