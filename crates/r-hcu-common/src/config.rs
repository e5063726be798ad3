//! ---
//! hcu_section: "01-core-functionality"
//! hcu_subsection: "module"
//! hcu_type: "source"
//! hcu_scope: "code"
//! hcu_description: "Shared primitives and utilities for the control runtime."
//! hcu_version: "v0.0.0-prealpha"
//! hcu_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the R-HCU daemon.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub robots: Vec<RobotDecl>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "R_HCU_CONFIG";

    /// Load configuration from disk, respecting the `R_HCU_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.robots.is_empty() {
            return Err(anyhow!("configuration must declare at least one robot"));
        }
        for (index, robot) in self.robots.iter().enumerate() {
            robot.validate(index)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// When a robot's `start()` should be scheduled relative to construction.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
    /// The caller starts the robot explicitly.
    #[default]
    Manual,
    /// `start()` is scheduled on a fresh task right after construction.
    Auto,
}

impl StartMode {
    pub fn is_auto(&self) -> bool {
        matches!(self, StartMode::Auto)
    }
}

impl std::str::FromStr for StartMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(StartMode::Manual),
            "auto" => Ok(StartMode::Auto),
            other => Err(format!("unknown start mode: {}", other)),
        }
    }
}

/// When the work routine fires relative to the startup barrier.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkTrigger {
    /// Work runs after both startup phases have joined.
    #[default]
    BarrierGated,
    /// Work runs as soon as `start()` is entered, before any unit completes.
    Immediate,
}

impl std::str::FromStr for WorkTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "barrier_gated" | "barrier" => Ok(WorkTrigger::BarrierGated),
            "immediate" | "sync" => Ok(WorkTrigger::Immediate),
            other => Err(format!("unknown work trigger: {}", other)),
        }
    }
}

/// Declarative description of a robot assembled by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RobotDecl {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub start: StartMode,
    #[serde(default)]
    pub work_trigger: WorkTrigger,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub connections: Vec<ConnectionDecl>,
    #[serde(default)]
    pub devices: Vec<DeviceDecl>,
}

impl RobotDecl {
    pub fn validate(&self, index: usize) -> Result<()> {
        let label = self
            .name
            .clone()
            .unwrap_or_else(|| format!("robots[{}]", index));
        for connection in &self.connections {
            connection.validate(&label)?;
        }
        for device in &self.devices {
            device.validate(&label)?;
        }
        if self.events.iter().any(|event| event.trim().is_empty()) {
            return Err(anyhow!("robot '{}' declares an empty event name", label));
        }
        Ok(())
    }
}

/// Declarative description of one communication channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDecl {
    pub name: String,
    /// Adaptor kind resolved against the adaptor catalog (e.g. `loopback`).
    pub adaptor: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Simulated connect/disconnect latency, when the kind supports it.
    #[serde(default)]
    pub latency_ms: Option<u64>,
    /// Devices declared inline with their owning connection.
    #[serde(default)]
    pub devices: Vec<DeviceDecl>,
}

impl ConnectionDecl {
    pub fn validate(&self, robot: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("robot '{}' declares an unnamed connection", robot));
        }
        if self.adaptor.trim().is_empty() {
            return Err(anyhow!(
                "connection '{}' on robot '{}' is missing an adaptor kind",
                self.name,
                robot
            ));
        }
        for device in &self.devices {
            device.validate(robot)?;
        }
        Ok(())
    }
}

/// Declarative description of one peripheral driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDecl {
    pub name: String,
    /// Driver kind resolved against the driver catalog (e.g. `virtual-pin`).
    pub driver: String,
    /// Connection to bind to; defaults to the earliest registered one.
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub pin: Option<u32>,
}

impl DeviceDecl {
    pub fn validate(&self, robot: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("robot '{}' declares an unnamed device", robot));
        }
        if self.driver.trim().is_empty() {
            return Err(anyhow!(
                "device '{}' on robot '{}' is missing a driver kind",
                self.name,
                robot
            ));
        }
        Ok(())
    }
}

/// Logging sink configuration shared by the daemon and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        [logging]
        format = "pretty"

        [[robots]]
        name = "Ultron"
        start = "auto"
        work_trigger = "immediate"
        events = ["telemetry"]

        [[robots.connections]]
        name = "loopback"
        adaptor = "loopback"
        host = "127.0.0.1"
        port = 9000

        [[robots.connections.devices]]
        name = "led"
        driver = "virtual-pin"
        pin = 13

        [[robots.devices]]
        name = "button"
        driver = "virtual-pin"
        connection = "loopback"
        pin = 2
    "#;

    #[test]
    fn parses_nested_declarations() {
        let config: AppConfig = EXAMPLE.parse().expect("config parses");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.robots.len(), 1);
        let robot = &config.robots[0];
        assert_eq!(robot.name.as_deref(), Some("Ultron"));
        assert!(robot.start.is_auto());
        assert_eq!(robot.work_trigger, WorkTrigger::Immediate);
        assert_eq!(robot.connections.len(), 1);
        assert_eq!(robot.connections[0].devices.len(), 1);
        assert_eq!(robot.connections[0].devices[0].pin, Some(13));
        assert_eq!(robot.devices[0].connection.as_deref(), Some("loopback"));
    }

    #[test]
    fn rejects_empty_robot_list() {
        let err = "".parse::<AppConfig>().expect_err("empty config rejected");
        assert!(err.to_string().contains("at least one robot"));
    }

    #[test]
    fn rejects_missing_adaptor_kind() {
        let raw = r#"
            [[robots]]
            name = "Ultron"

            [[robots.connections]]
            name = "serial"
            adaptor = ""
        "#;
        let err = raw.parse::<AppConfig>().expect_err("invalid config rejected");
        assert!(err.to_string().contains("missing an adaptor kind"));
    }

    #[test]
    fn load_with_source_walks_candidates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hcu.toml");
        std::fs::write(&path, EXAMPLE).expect("write config");
        let missing = dir.path().join("absent.toml");
        let loaded =
            AppConfig::load_with_source(&[missing, path.clone()]).expect("config loads");
        assert_eq!(loaded.source, path);
        assert_eq!(loaded.config.robots[0].name.as_deref(), Some("Ultron"));
    }

    #[test]
    fn start_mode_round_trips_from_str() {
        assert_eq!("auto".parse::<StartMode>().unwrap(), StartMode::Auto);
        assert_eq!("MANUAL".parse::<StartMode>().unwrap(), StartMode::Manual);
        assert!("eventually".parse::<StartMode>().is_err());
        assert_eq!(
            "immediate".parse::<WorkTrigger>().unwrap(),
            WorkTrigger::Immediate
        );
    }
}
