//! Configuration management
//!
//! Handles locating and loading `grefsen.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use grefsen_core::watchdog::{Backoff, RespawnPolicy};

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE: &str = "grefsen.toml";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config directory not found")]
    NoConfigDir,
}

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Crash respawn settings (only used with `-r`)
    pub respawn: RespawnConfig,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default log filter when neither RUST_LOG nor --log-level is given
    pub log_level: Option<String>,
    /// Where to write the PID once started (overridden by --pid-file)
    pub pid_file: Option<PathBuf>,
}

/// Crash respawn settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RespawnConfig {
    /// Maximum consecutive respawns (0 = unlimited)
    pub max_attempts: u32,
    /// Seconds of uptime after which the attempt count starts over
    /// (0 = never)
    pub reset_after_secs: u64,
    /// Relaunch with the original command line instead of the bare program.
    /// `false` relaunches with only the program name, so the replacement
    /// runs without `-r` and is not protected itself.
    pub forward_args: bool,
    /// Delay before each relaunch
    pub backoff: BackoffConfig,
}

impl Default for RespawnConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            reset_after_secs: 60,
            forward_args: true,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RespawnConfig {
    /// Convert to the policy evaluated by the crash handler
    pub fn to_policy(&self) -> RespawnPolicy {
        RespawnPolicy {
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            reset_after: Duration::from_secs(self.reset_after_secs),
            backoff: self.backoff.to_backoff(),
        }
    }
}

/// Relaunch delay settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first relaunch in milliseconds (0 = relaunch at once)
    pub first_ms: u64,
    /// Upper bound in milliseconds
    pub max_ms: u64,
    /// Growth factor between consecutive relaunches
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            first_ms: 0,
            max_ms: 30_000,
            factor: 2.0,
        }
    }
}

impl BackoffConfig {
    fn to_backoff(&self) -> Backoff {
        Backoff {
            first: Duration::from_millis(self.first_ms),
            max: Duration::from_millis(self.max_ms),
            factor: self.factor,
        }
    }
}

/// Get the default configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "grefsen", "grefsen").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Path of the config file, inside `dir` if given
pub fn config_path(dir: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => config_dir().ok_or(ConfigError::NoConfigDir)?,
    };
    Ok(dir.join(CONFIG_FILE))
}

/// Load configuration from `dir` (or the default directory).
///
/// A missing file yields the defaults.
pub fn load_config(dir: Option<&Path>) -> Result<Config, ConfigError> {
    let path = config_path(dir)?;

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_respawn_is_unbounded() {
        let policy = Config::default().respawn.to_policy();
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.reset_after, Duration::from_secs(60));
        assert_eq!(policy.backoff.delay(3), Duration::ZERO);
    }

    #[test]
    fn test_default_forwards_args() {
        assert!(Config::default().respawn.forward_args);
    }

    #[test]
    fn test_parse_partial_config() {
        let config: Config = toml::from_str(
            r#"
            [respawn]
            max_attempts = 3

            [respawn.backoff]
            first_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.respawn.max_attempts, 3);
        assert_eq!(config.respawn.reset_after_secs, 60);
        assert_eq!(config.respawn.backoff.first_ms, 250);
        assert_eq!(config.respawn.backoff.max_ms, 30_000);
        assert_eq!(config.general, GeneralConfig::default());

        let policy = config.respawn.to_policy();
        assert_eq!(policy.max_attempts, Some(3));
        assert_eq!(policy.backoff.delay(1), Duration::from_millis(250));
        assert_eq!(policy.backoff.delay(2), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_general() {
        let config: Config = toml::from_str(
            r#"
            [general]
            log_level = "debug"
            pid_file = "/run/user/1000/grefsen.pid"
            "#,
        )
        .unwrap();
        assert_eq!(config.general.log_level.as_deref(), Some("debug"));
        assert_eq!(
            config.general.pid_file,
            Some(PathBuf::from("/run/user/1000/grefsen.pid"))
        );
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[respawn]\nforward_args = false\nmax_attempts = 5\n",
        )
        .unwrap();

        let config = load_config(Some(dir.path())).unwrap();
        assert!(!config.respawn.forward_args);
        assert_eq!(config.respawn.max_attempts, 5);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[respawn\n").unwrap();
        assert!(matches!(
            load_config(Some(dir.path())),
            Err(ConfigError::Parse(_))
        ));
    }
}
