//! Configuration management for status-relay.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::health::HealthConfig;
use crate::pairing::DEFAULT_DISPLAY_NAME;
use crate::supervisor::SupervisorConfig;

/// Transport backends this build knows how to create.
pub const KNOWN_BACKENDS: &[&str] = &["loopback"];

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageSection,
    pub supervisor: SupervisorSection,
    pub commands: CommandsSection,
    pub pairing: PairingSection,
    pub health: HealthSection,
    pub transport: TransportSection,
    pub logging: LoggingSection,
}

/// Where credentials and ledgers live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Directory holding `<name>.session` credential files.
    pub sessions_dir: PathBuf,
    /// Directory holding `<name>.json` status ledgers.
    pub history_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from("sessions"),
            history_dir: PathBuf::from("history"),
        }
    }
}

/// Supervisor timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    pub poll_interval_secs: u64,
    pub drain_timeout_secs: u64,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            drain_timeout_secs: 10,
            initial_backoff_secs: 2,
            max_backoff_secs: 300,
        }
    }
}

/// Chat command settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsSection {
    /// Single character that starts every command.
    pub prefix: String,
    /// How long posted statuses stay in the ledger.
    pub retention_hours: u64,
}

impl Default for CommandsSection {
    fn default() -> Self {
        Self {
            prefix: ".".to_string(),
            retention_hours: 24,
        }
    }
}

/// Pairing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingSection {
    /// Device name shown on the phone.
    pub display_name: String,
    pub timeout_secs: u64,
}

impl Default for PairingSection {
    fn default() -> Self {
        Self {
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            timeout_secs: 300,
        }
    }
}

/// Health endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HealthSection {
    fn default() -> Self {
        let defaults = HealthConfig::default();
        Self {
            enabled: true,
            host: defaults.host,
            port: defaults.port,
        }
    }
}

/// Transport backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub backend: String,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            backend: "loopback".to_string(),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("STATUS_RELAY_SESSIONS_DIR") {
            self.storage.sessions_dir = PathBuf::from(dir);
        }

        if let Some(dir) = lookup("STATUS_RELAY_HISTORY_DIR") {
            self.storage.history_dir = PathBuf::from(dir);
        }

        if let Some(secs) = lookup("STATUS_RELAY_POLL_INTERVAL") {
            if let Ok(secs) = secs.parse() {
                self.supervisor.poll_interval_secs = secs;
            }
        }

        if let Some(prefix) = lookup("STATUS_RELAY_PREFIX") {
            self.commands.prefix = prefix;
        }

        if let Some(port) = lookup("STATUS_RELAY_HEALTH_PORT") {
            if let Ok(port) = port.parse() {
                self.health.port = port;
            }
        }

        if let Some(level) = lookup("STATUS_RELAY_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(ref root) = args.data_dir {
            self.storage.sessions_dir = root.join("sessions");
            self.storage.history_dir = root.join("history");
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain and validate it.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(ref path) = args.config {
            config = Config::from_file(path)?;
        }

        config.apply_env();
        config.apply_args(args);
        config.validate()?;

        Ok(config)
    }

    /// Reject values the rest of the program cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.prefix()?;

        if self.supervisor.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "supervisor.poll_interval_secs",
                "0".to_string(),
            ));
        }
        if self.commands.retention_hours == 0 {
            return Err(ConfigError::InvalidValue(
                "commands.retention_hours",
                "0".to_string(),
            ));
        }
        if !KNOWN_BACKENDS.contains(&self.transport.backend.as_str()) {
            return Err(ConfigError::InvalidValue(
                "transport.backend",
                self.transport.backend.clone(),
            ));
        }
        Ok(())
    }

    /// The command prefix as a single character.
    pub fn prefix(&self) -> Result<char, ConfigError> {
        let mut chars = self.commands.prefix.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if !c.is_whitespace() => Ok(c),
            _ => Err(ConfigError::InvalidValue(
                "commands.prefix",
                self.commands.prefix.clone(),
            )),
        }
    }

    /// Ledger retention window.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.commands.retention_hours.saturating_mul(60 * 60))
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing.timeout_secs)
    }

    /// Convert to the supervisor's runtime settings.
    pub fn supervisor_config(&self) -> Result<SupervisorConfig, ConfigError> {
        Ok(SupervisorConfig {
            poll_interval: Duration::from_secs(self.supervisor.poll_interval_secs),
            drain_timeout: Duration::from_secs(self.supervisor.drain_timeout_secs),
            initial_backoff: Duration::from_secs(self.supervisor.initial_backoff_secs.max(1)),
            max_backoff: Duration::from_secs(self.supervisor.max_backoff_secs),
            prefix: self.prefix()?,
        })
    }

    /// Convert to the health listener address.
    pub fn health_config(&self) -> HealthConfig {
        HealthConfig::new(self.health.host.clone(), self.health.port)
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// A setting holds a value that cannot be used.
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidValue(key, value) => write!(f, "invalid value for {}: '{}'", key, value),
        }
    }
}

impl std::error::Error for ConfigError {}
