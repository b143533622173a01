//! File system paths for the relay.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Runtime directory name under the home directory.
const BASE_DIR_NAME: &str = ".outbox-relay";

/// Manages file system paths for the relay.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for runtime files (~/.outbox-relay)
    base_dir: PathBuf,
}

impl Paths {
    /// Paths rooted at `~/.outbox-relay`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Paths rooted at a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.outbox-relay).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.outbox-relay/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the default database path (~/.outbox-relay/outbox.sqlite).
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join("outbox.sqlite")
    }

    /// Get the logs directory (~/.outbox-relay/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSONL log file path (~/.outbox-relay/logs/outbox.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("outbox.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_with_base_dir() {
        let paths = Paths::with_base_dir(PathBuf::from("/tmp/relay"));
        assert_eq!(paths.base_dir(), &PathBuf::from("/tmp/relay"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/relay/config.json"));
        assert_eq!(paths.database_file(), PathBuf::from("/tmp/relay/outbox.sqlite"));
        assert_eq!(paths.log_file(), PathBuf::from("/tmp/relay/logs/outbox.jsonl"));
    }

    #[test]
    fn test_ensure_dirs() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("relay"));

        paths.ensure_dirs().unwrap();
        assert!(paths.base_dir().is_dir());
        assert!(paths.logs_dir().is_dir());
    }

    #[test]
    fn test_default_base_dir_name() {
        if let Ok(paths) = Paths::new() {
            assert!(paths.base_dir().ends_with(BASE_DIR_NAME));
        }
    }
}
