//! Configuration management for the relay.
//!
//! Values come from `config.json` in the base directory, then from
//! `OUTBOX_*` environment variables. Missing file fields use defaults.

use crate::logging::is_known_level;
use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Main relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// SQLite file. Defaults to `Paths::database_file`.
    pub database_path: Option<PathBuf>,
    /// Engine settings.
    pub outbox: OutboxSettings,
}

/// Engine settings as stored on disk. Durations are in milliseconds.
///
/// Bounds are enforced by the engine when it is created, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxSettings {
    pub workers: usize,
    pub limit: usize,
    pub interval_ms: u64,
    pub reserve_duration_ms: u64,
    pub process_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            database_path: None,
            outbox: OutboxSettings::default(),
        }
    }
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            limit: 50,
            interval_ms: 5_000,
            reserve_duration_ms: 5 * 60 * 1_000,
            process_timeout_ms: 5_000,
        }
    }
}

impl Config {
    /// Load configuration from the base directory, falling back to
    /// defaults, then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the base directory.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Database file to open.
    pub fn database_path(&self, paths: &Paths) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| paths.database_file())
    }

    /// Reject values the relay cannot start with.
    pub fn validate(&self) -> CoreResult<()> {
        if !is_known_level(&self.log_level) {
            return Err(CoreError::Config(format!(
                "unknown log level: {}",
                self.log_level
            )));
        }
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }

    /// Apply `OUTBOX_*` overrides from `lookup`. Unparseable numbers are
    /// logged and ignored.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(log_level) = lookup("OUTBOX_LOG_LEVEL") {
            self.log_level = log_level;
        }

        let settings = &mut self.outbox;
        override_number(&lookup, "OUTBOX_WORKERS", &mut settings.workers);
        override_number(&lookup, "OUTBOX_LIMIT", &mut settings.limit);
        override_number(&lookup, "OUTBOX_INTERVAL_MS", &mut settings.interval_ms);
        override_number(
            &lookup,
            "OUTBOX_RESERVE_DURATION_MS",
            &mut settings.reserve_duration_ms,
        );
        override_number(
            &lookup,
            "OUTBOX_PROCESS_TIMEOUT_MS",
            &mut settings.process_timeout_ms,
        );
    }
}

fn override_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(variable = name, value = %raw, "Ignoring unparseable environment override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(config.database_path.is_none());
        assert_eq!(config.outbox.workers, 4);
        assert_eq!(config.outbox.interval_ms, 5_000);
    }

    #[test]
    fn test_config_load_from_file_partial() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "outbox": { "workers": 8, "limit": 20 }
        }"#;
        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.outbox.workers, 8);
        assert_eq!(config.outbox.limit, 20);
        assert_eq!(
            config.outbox.process_timeout_ms,
            OutboxSettings::default().process_timeout_ms
        );
    }

    #[test]
    fn test_config_load_invalid_json() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, "{ not json").unwrap();

        assert!(matches!(
            Config::load_from_file(&config_path),
            Err(CoreError::Json(_))
        ));
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.log_level = "trace".to_string();
        config.database_path = Some(dir.path().join("custom.sqlite"));
        config.outbox.limit = 100;
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_and_empty_env() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load_from_file(&paths.config_file());
        assert!(matches!(config, Err(CoreError::Io(_))));

        let mut config = Config::default();
        config.apply_env(env(&[]));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("OUTBOX_LOG_LEVEL", "warn"),
            ("OUTBOX_WORKERS", "2"),
            ("OUTBOX_LIMIT", " 10 "),
            ("OUTBOX_INTERVAL_MS", "7000"),
            ("OUTBOX_RESERVE_DURATION_MS", "180000"),
            ("OUTBOX_PROCESS_TIMEOUT_MS", "1500"),
        ]));

        assert_eq!(config.log_level, "warn");
        assert_eq!(
            config.outbox,
            OutboxSettings {
                workers: 2,
                limit: 10,
                interval_ms: 7_000,
                reserve_duration_ms: 180_000,
                process_timeout_ms: 1_500,
            }
        );
    }

    #[test]
    fn test_unparseable_env_override_is_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[("OUTBOX_WORKERS", "many"), ("OUTBOX_LIMIT", "-1")]));
        assert_eq!(config.outbox, OutboxSettings::default());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.log_level = "loud".to_string();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_database_path_default() {
        let paths = Paths::with_base_dir(PathBuf::from("/tmp/relay"));
        let mut config = Config::default();
        assert_eq!(config.database_path(&paths), paths.database_file());

        config.database_path = Some(PathBuf::from("/data/outbox.db"));
        assert_eq!(config.database_path(&paths), PathBuf::from("/data/outbox.db"));
    }
}
