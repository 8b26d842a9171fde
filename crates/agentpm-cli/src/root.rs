use agentpm_core::clock;
use agentpm_core::config::{self, Config, CONFIG_FILE};
use agentpm_core::Context;
use std::path::{Path, PathBuf};

/// The config file in effect for this invocation, loaded if it exists.
pub struct Workspace {
    pub config_path: PathBuf,
    pub config: Option<Config>,
}

impl Workspace {
    pub fn open(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = resolve_config(explicit);
        let config = Config::load(&config_path)?;
        tracing::debug!(config = %config_path.display(), found = config.is_some(), "config resolved");
        Ok(Self {
            config_path,
            config,
        })
    }

    /// `--file` when given, else the configured current epic.
    pub fn document(&self, file: Option<&Path>) -> agentpm_core::Result<PathBuf> {
        config::resolve_document(file, self.config.as_ref(), &self.config_path)
    }

    pub fn agent(&self) -> &str {
        self.config
            .as_ref()
            .map_or(config::DEFAULT_AGENT, Config::agent)
    }

    /// Service context for commands that operate on the epic document.
    pub fn context(&self, file: Option<&Path>, time: Option<&str>) -> agentpm_core::Result<Context> {
        let clock = clock::from_override(time)?;
        Ok(Context::new(self.document(file)?, self.agent(), clock))
    }
}

/// Resolve the config file path.
///
/// Priority:
/// 1. `--config` (relative paths are taken from the working directory)
/// 2. Walk upward from `cwd` looking for `.agentpm.json`
/// 3. Fall back to `cwd/.agentpm.json`, which may not exist yet
pub fn resolve_config(explicit: Option<&Path>) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    if let Some(p) = explicit {
        return if p.is_absolute() {
            p.to_path_buf()
        } else {
            cwd.join(p)
        };
    }
    find_upward(&cwd).unwrap_or_else(|| cwd.join(CONFIG_FILE))
}

/// `init` never discovers upward: it binds `--config` or `cwd/.agentpm.json`.
pub fn init_config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(p) => resolve_config(Some(p)),
        None => std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(CONFIG_FILE),
    }
}

fn find_upward(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_config_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.json");
        assert_eq!(resolve_config(Some(&path)), path);
    }

    #[test]
    fn finds_config_in_ancestor() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        let subdir = dir.path().join("src/deep");
        std::fs::create_dir_all(&subdir).unwrap();

        assert_eq!(find_upward(&subdir), Some(dir.path().join(CONFIG_FILE)));
    }

    #[test]
    fn workspace_without_config_uses_default_agent() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::open(Some(&dir.path().join(CONFIG_FILE))).unwrap();
        assert!(ws.config.is_none());
        assert_eq!(ws.agent(), "agent");
        assert!(ws.document(None).is_err());
        let doc = dir.path().join("epic.xml");
        assert_eq!(ws.document(Some(&doc)).unwrap(), doc);
    }
}
