//! Configuration resolution for ez2boot.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Settings file (`~/.config/ez2boot/settings.json` or an explicit path)
//! 3. Environment variables / CLI arguments (applied by the binary)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete ez2boot configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// Which cloud the catalog tracks and how instances are selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider adapter name (`memory`, `aws`, `azure`).
    pub kind: String,
    /// Tag key that opts an instance in; its value names the server group.
    pub tag_key: String,
    pub aws_region: String,
    pub azure_subscription_id: Option<String>,
    /// Instance fixture loaded by the in-memory provider.
    pub fixture_path: Option<PathBuf>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: "memory".to_string(),
            tag_key: "ez2boot".to_string(),
            aws_region: "ap-southeast-2".to_string(),
            azure_subscription_id: None,
            fixture_path: None,
        }
    }
}

/// Worker cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// How often the provider is scraped into the catalog.
    #[serde(with = "humantime_serde")]
    pub scrape_interval: Duration,
    /// Shared tick for the manage, session and notification loops.
    #[serde(with = "humantime_serde")]
    pub internal_clock: Duration,
    /// Sessions expiring within this window receive a warning.
    #[serde(with = "humantime_serde")]
    pub warning_window: Duration,
    /// Scrape once before the first scheduled tick.
    pub scrape_on_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scrape_interval: Duration::from_secs(30),
            internal_clock: Duration::from_secs(10),
            warning_window: Duration::from_secs(15 * 60),
            scrape_on_start: true,
        }
    }
}

/// Parse a humantime duration string such as `"1h"` or `"30m"`.
///
/// Zero-length durations are rejected: they are never a meaningful lease or
/// tick length.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::Duration {
            input: input.to_string(),
            reason: "duration is empty".to_string(),
        });
    }
    let duration = humantime::parse_duration(trimmed).map_err(|e| Error::Duration {
        input: input.to_string(),
        reason: e.to_string(),
    })?;
    if duration.is_zero() {
        return Err(Error::Duration {
            input: input.to_string(),
            reason: "duration must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}

/// Load configuration from defaults and the settings file.
///
/// When `explicit_path` is given it must exist; otherwise the global settings
/// file is used if present.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit_path {
        return load_config_file(path);
    }

    match global_config_path() {
        Some(path) if path.exists() => load_config_file(&path),
        _ => Ok(Config::default()),
    }
}

/// Get the global settings file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ez2boot").join("settings.json"))
}

/// Default database path: `~/.ez2boot/ez2boot.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".ez2boot").join("ez2boot.db"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
