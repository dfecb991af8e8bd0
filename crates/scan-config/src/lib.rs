//! # scan-config
//!
//! Configuration management for the proxy cache image scanner.
//!
//! Loads configuration from:
//! 1. `~/.scan/config.toml` (global)
//! 2. `.scan/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

#[macro_use]
pub mod logging;
pub mod storage;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use logging::{init_logging, Component, LogLevel};
pub use storage::{
    ResolvedVolume, SpanConfig, SpanKind, StorageConfig, StripePlacement, VolumeConfig,
    VolumeSize,
};

pub use scan_format::DEFAULT_AVG_OBJECT_SIZE;

pub const ENV_THREADS: &str = "SCAN_THREADS";
pub const ENV_AVG_OBJECT_SIZE: &str = "SCAN_AVG_OBJECT_SIZE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid size '{0}'")]
    InvalidSize(String),
    #[error("volume {0} pushes percentage allocation past 100%")]
    OverAllocated(u32),
    #[error("volume {0} is sized by percentage but total capacity is unknown")]
    NoCapacity(u32),
    #[error("volume {0} declared more than once")]
    DuplicateVolume(u32),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanSettings,
    pub storage: StorageConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config = Self::load_layers(global.as_deref(), Path::new(".scan/config.toml"))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load a global file and a project file on top of it. Missing files are skipped.
    pub fn load_layers(global: Option<&Path>, project: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = global {
            if global_path.exists() {
                log_config_debug!("Loading global config", path = tracing::field::display(global_path.display()));
                config = Self::from_path(global_path)?;
            }
        }

        if project.exists() {
            log_config_debug!("Loading project config", path = tracing::field::display(project.display()));
            let project_config = Self::from_path(project)?;
            config.merge(project_config);
        }

        Ok(config)
    }

    /// Parse a single TOML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.scan/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".scan/config.toml"))
    }

    /// Merge a project config over this one. Only values the project sets win.
    fn merge(&mut self, other: Config) {
        if other.scan.threads.is_some() {
            self.scan.threads = other.scan.threads;
        }
        if other.scan.min_average_object_size.is_some() {
            self.scan.min_average_object_size = other.scan.min_average_object_size;
        }
        if other.scan.phase.is_some() {
            self.scan.phase = other.scan.phase;
        }
        if !other.storage.spans.is_empty() {
            self.storage.spans = other.storage.spans;
        }
        if !other.storage.volumes.is_empty() {
            self.storage.volumes = other.storage.volumes;
        }
    }

    /// Apply environment-style overrides through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(threads) = lookup(ENV_THREADS) {
            if let Ok(n) = threads.trim().parse() {
                self.scan.threads = Some(n);
            }
        }
        if let Some(size) = lookup(ENV_AVG_OBJECT_SIZE) {
            match size.trim().parse::<u64>() {
                Ok(n) if n > 0 => self.scan.min_average_object_size = Some(n),
                _ => log_config_debug!("Ignoring invalid override", key = ENV_AVG_OBJECT_SIZE),
            }
        }
    }

    /// Volumes resolved against the declared span capacity.
    pub fn resolved_volumes(&self) -> Result<Vec<ResolvedVolume>, ConfigError> {
        self.storage
            .resolve_volumes(self.storage.total_capacity())
    }

    /// Generate default config TOML string, with every defaulted value spelled out
    pub fn default_toml() -> String {
        let config = Config {
            scan: ScanSettings {
                min_average_object_size: Some(DEFAULT_AVG_OBJECT_SIZE),
                phase: Some(PhaseSetting::default()),
                ..Default::default()
            },
            ..Default::default()
        };
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Which directory phase to surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseSetting {
    /// Both generations.
    #[default]
    All,
    #[serde(alias = "0")]
    Zero,
    #[serde(alias = "1")]
    One,
    /// Whatever phase the stripe header records as current.
    Stripe,
    /// Entries on the live side of the stripe's validity limit.
    Valid,
}

/// Scan behaviour. Unset values fall back to defaults at use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Worker threads for stripe enumeration (None = auto)
    pub threads: Option<usize>,
    /// Average object size the directories were sized for
    pub min_average_object_size: Option<u64>,
    pub phase: Option<PhaseSetting>,
}

impl ScanSettings {
    pub fn avg_object_size(&self) -> u64 {
        self.min_average_object_size.unwrap_or(DEFAULT_AVG_OBJECT_SIZE)
    }

    pub fn phase(&self) -> PhaseSetting {
        self.phase.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scan.min_average_object_size, None);
        assert_eq!(config.scan.avg_object_size(), 8000);
        assert_eq!(config.scan.phase(), PhaseSetting::All);
        assert!(config.storage.spans.is_empty());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[scan]"));
        assert!(toml_str.contains("min_average_object_size = 8000"));
        assert!(toml_str.contains("phase = \"all\""));
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.scan.avg_object_size(), DEFAULT_AVG_OBJECT_SIZE);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [(ENV_THREADS, "3"), (ENV_AVG_OBJECT_SIZE, "16000")]
            .into_iter()
            .collect();
        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.scan.threads, Some(3));
        assert_eq!(config.scan.min_average_object_size, Some(16000));
    }

    #[test]
    fn test_zero_avg_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|k| (k == ENV_AVG_OBJECT_SIZE).then(|| "0".to_string()));
        assert_eq!(config.scan.min_average_object_size, None);
        assert_eq!(config.scan.avg_object_size(), DEFAULT_AVG_OBJECT_SIZE);
    }

    #[test]
    fn test_phase_aliases() {
        let c: Config = toml::from_str("[scan]\nphase = \"1\"\n").unwrap();
        assert_eq!(c.scan.phase(), PhaseSetting::One);
        let c: Config = toml::from_str("[scan]\nphase = \"stripe\"\n").unwrap();
        assert_eq!(c.scan.phase(), PhaseSetting::Stripe);
    }

    #[test]
    fn test_merge_keeps_unset_values() {
        let mut base = Config::default();
        base.scan.threads = Some(2);
        let mut project = Config::default();
        project.scan.min_average_object_size = Some(4000);
        base.merge(project);
        assert_eq!(base.scan.threads, Some(2));
        assert_eq!(base.scan.avg_object_size(), 4000);
    }

    #[test]
    fn test_merge_project_can_restore_default_values() {
        let mut base: Config = toml::from_str(
            "[scan]\nmin_average_object_size = 16000\nphase = \"stripe\"\n",
        )
        .unwrap();
        let project: Config =
            toml::from_str("[scan]\nmin_average_object_size = 8000\nphase = \"all\"\n").unwrap();
        base.merge(project);
        assert_eq!(base.scan.avg_object_size(), DEFAULT_AVG_OBJECT_SIZE);
        assert_eq!(base.scan.phase(), PhaseSetting::All);
    }
}
