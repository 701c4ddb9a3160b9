//! Run configuration.
//!
//! `RunConfig` is read from the first YAML file found on the lookup path
//! ([`RunConfig::candidate_paths`]). A missing file is not an error; every
//! field has a default. Sessions never read configuration themselves: the
//! caller turns a `RunConfig` into a [`SessionConfig`] and passes it in.

use crate::bus::{DEFAULT_CAPACITY, EventBus, EventReceiver};
use rungp_proto::WorkspaceAccessInfo;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Environment variable naming an extra config file location.
pub const CONFIG_PATH_ENV: &str = "RUNGP_CONFIG_PATH";

const CONFIG_DIR: &str = "run-gp";
const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unknown config key: {0}")]
    UnknownKey(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("no config location available")]
    NoLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutoUpdateConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub identity: String,
}

/// Which container CLI runs the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// First of `docker`, `nerdctl` found on `PATH`.
    #[default]
    Auto,
    Docker,
    Nerdctl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunConfig {
    pub auto_update: AutoUpdateConfig,
    pub telemetry: TelemetryConfig,
    pub runtime: RuntimeKind,
    pub ide_port: u16,
    pub ssh_port: u16,
    /// Host port of the supervisor API. Defaults to the IDE port.
    pub supervisor_port: Option<u16>,
    pub event_bus_capacity: usize,
    pub quit_grace_ms: u64,
    pub shutdown_timeout_secs: u64,
    pub observe_tasks: bool,

    /// Where this config was loaded from.
    #[serde(skip)]
    pub filename: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            auto_update: AutoUpdateConfig::default(),
            telemetry: TelemetryConfig::default(),
            runtime: RuntimeKind::Auto,
            ide_port: 8080,
            ssh_port: 8082,
            supervisor_port: None,
            event_bus_capacity: DEFAULT_CAPACITY,
            quit_grace_ms: 100,
            shutdown_timeout_secs: 5,
            observe_tasks: true,
            filename: None,
        }
    }
}

impl RunConfig {
    /// Config file locations, most specific first.
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join(CONFIG_DIR).join(CONFIG_FILE));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(format!(".{CONFIG_DIR}")).join(CONFIG_FILE));
        }
        if cfg!(target_os = "linux") {
            paths.push(Path::new("/etc").join(CONFIG_DIR).join(CONFIG_FILE));
        }
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV)
            && !path.is_empty()
        {
            paths.push(PathBuf::from(path));
        }
        paths
    }

    /// Loads the first config file found on the default lookup path.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::candidate_paths())
    }

    /// Loads the first existing file of `paths`, or defaults if none exists.
    ///
    /// A file that exists but cannot be parsed is an error. The returned
    /// config remembers where it should be written back to.
    pub fn load_from(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        for path in paths {
            let content = match std::fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(ConfigError::Read {
                        path: path.clone(),
                        source,
                    });
                }
            };
            debug!(path = %path.display(), "Loaded config");
            let mut config = Self::parse(&content)?;
            config.filename = Some(path.clone());
            return Ok(config);
        }

        Ok(Self {
            filename: paths.first().cloned(),
            ..Self::default()
        })
    }

    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Writes the config back to the file it was loaded from.
    pub fn write(&self) -> Result<PathBuf, ConfigError> {
        let path = self.filename.clone().ok_or(ConfigError::NoLocation)?;
        let yaml = serde_yaml::to_string(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(&path, yaml).map_err(write_err)?;
        Ok(path)
    }

    /// Sets a single value by its dotted key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        match key {
            "autoUpdate.enabled" | "auto_update.enabled" => {
                self.auto_update.enabled = value.parse().map_err(|_| invalid())?;
            }
            "telemetry.enabled" => {
                self.telemetry.enabled = value.parse().map_err(|_| invalid())?;
            }
            "runtime" => {
                self.runtime = match value {
                    "auto" => RuntimeKind::Auto,
                    "docker" => RuntimeKind::Docker,
                    "nerdctl" => RuntimeKind::Nerdctl,
                    _ => return Err(invalid()),
                };
            }
            "idePort" | "ide_port" => self.ide_port = value.parse().map_err(|_| invalid())?,
            "sshPort" | "ssh_port" => self.ssh_port = value.parse().map_err(|_| invalid())?,
            "observeTasks" | "observe_tasks" => {
                self.observe_tasks = value.parse().map_err(|_| invalid())?;
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Builds the session settings for a workspace.
    ///
    /// `port_offset` is added to every published port.
    pub fn session_config(&self, workspace_folder: &str, port_offset: u16) -> SessionConfig {
        let http_port = self.ide_port.saturating_add(port_offset);
        let ssh_port = self.ssh_port.saturating_add(port_offset);
        let supervisor_port = self
            .supervisor_port
            .map_or(http_port, |port| port.saturating_add(port_offset));
        SessionConfig {
            access: WorkspaceAccessInfo {
                workspace_folder: workspace_folder.to_string(),
                http_port,
                ssh_port,
                supervisor_port,
            },
            observe_tasks: self.observe_tasks,
            event_bus_capacity: self.event_bus_capacity,
            quit_grace: Duration::from_millis(self.quit_grace_ms),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

/// Settings for one session, passed in explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub access: WorkspaceAccessInfo,
    pub observe_tasks: bool,
    pub event_bus_capacity: usize,
    pub quit_grace: Duration,
    /// How long a user quit waits for background work to stop.
    pub shutdown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        RunConfig::default().session_config("/workspace", 0)
    }
}

impl SessionConfig {
    /// Creates the event bus sized and timed for this session.
    pub fn event_bus(&self) -> (EventBus, EventReceiver) {
        let (bus, rx) = EventBus::new(self.event_bus_capacity);
        (bus.with_quit_grace(self.quit_grace), rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RunConfig::parse("").unwrap();
        assert_eq!(config.ide_port, 8080);
        assert_eq!(config.ssh_port, 8082);
        assert_eq!(config.event_bus_capacity, 1000);
        assert_eq!(config.runtime, RuntimeKind::Auto);
        assert!(config.observe_tasks);
        assert!(!config.auto_update.enabled);
    }

    #[test]
    fn test_parse_camel_case_keys() {
        let config = RunConfig::parse(
            "autoUpdate:\n  enabled: true\ntelemetry:\n  enabled: true\n  identity: abc\nruntime: nerdctl\nidePort: 9000\n",
        )
        .unwrap();
        assert!(config.auto_update.enabled);
        assert_eq!(config.telemetry.identity, "abc");
        assert_eq!(config.runtime, RuntimeKind::Nerdctl);
        assert_eq!(config.ide_port, 9000);
        assert_eq!(config.ssh_port, 8082);
    }

    #[test]
    fn test_load_first_existing_file_wins() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.yaml");
        let first = dir.path().join("first.yaml");
        let second = dir.path().join("second.yaml");
        std::fs::write(&first, "idePort: 7000\n").unwrap();
        std::fs::write(&second, "idePort: 7001\n").unwrap();

        let config = RunConfig::load_from(&[missing, first.clone(), second]).unwrap();
        assert_eq!(config.ide_port, 7000);
        assert_eq!(config.filename, Some(first));
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run-gp").join("config.yaml");

        let config = RunConfig::load_from(std::slice::from_ref(&path)).unwrap();
        assert_eq!(config.ide_port, 8080);
        assert_eq!(config.filename, Some(path));
    }

    #[test]
    fn test_set_and_write_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run-gp").join("config.yaml");
        let mut config = RunConfig::load_from(std::slice::from_ref(&path)).unwrap();

        config.set("autoUpdate.enabled", "true").unwrap();
        config.set("telemetry.enabled", "true").unwrap();
        assert_eq!(config.write().unwrap(), path);

        let reloaded = RunConfig::load_from(&[path]).unwrap();
        assert!(reloaded.auto_update.enabled);
        assert!(reloaded.telemetry.enabled);
    }

    #[test]
    fn test_set_rejects_bad_input() {
        let mut config = RunConfig::default();
        assert!(matches!(
            config.set("telemetry.enabled", "sometimes"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.set("colour", "blue"),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_session_config_applies_port_offset() {
        let config = RunConfig::default();
        let session = config.session_config("/workspace/demo", 10);

        assert_eq!(session.access.http_port, 8090);
        assert_eq!(session.access.ssh_port, 8092);
        assert_eq!(session.access.supervisor_port, 8090);
        assert_eq!(session.quit_grace, Duration::from_millis(100));
    }
}
