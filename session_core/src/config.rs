//! Configuration file support for Liftguide.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/liftguide/config.toml`.

use crate::{Error, JumpPolicy, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub progression: ProgressionConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Progression policy configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressionConfig {
    /// Preferred relative load jump when reps top out
    #[serde(default = "default_jump_pct")]
    pub default_jump_pct: f64,

    /// Largest relative jump permitted when breaking a plateau
    #[serde(default = "default_max_jump_pct")]
    pub max_jump_pct: f64,

    /// Sessions without a load increase before the plateau jump is allowed
    #[serde(default = "default_overcap_until")]
    pub overcap_until: u32,

    /// Deload branch switch. Fully implemented but off by default.
    #[serde(default)]
    pub deload_enabled: bool,

    /// Relative load reduction applied by a deload session
    #[serde(default = "default_deload_fraction")]
    pub deload_fraction: f64,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            default_jump_pct: default_jump_pct(),
            max_jump_pct: default_max_jump_pct(),
            overcap_until: default_overcap_until(),
            deload_enabled: false,
            deload_fraction: default_deload_fraction(),
        }
    }
}

impl ProgressionConfig {
    pub fn jump_policy(&self) -> JumpPolicy {
        JumpPolicy {
            default_pct: self.default_jump_pct,
            max_pct: self.max_jump_pct,
            overcap_until: self.overcap_until,
        }
    }

    /// The full progression policy this configuration describes
    pub fn policy(&self) -> crate::progression::ProgressionPolicy {
        crate::progression::ProgressionPolicy {
            jump: self.jump_policy(),
            deload_enabled: self.deload_enabled,
            deload_fraction: self.deload_fraction,
        }
    }
}

/// In-session timing configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Rest after each generated warm-up set, milliseconds
    #[serde(default = "default_warmup_rest_ms")]
    pub warmup_rest_ms: i64,

    /// Rest guaranteed after a calibration execution set, milliseconds
    #[serde(default = "default_post_calibration_rest_ms")]
    pub post_calibration_rest_ms: i64,

    /// Rest between exercises, milliseconds
    #[serde(default = "default_between_exercise_rest_ms")]
    pub between_exercise_rest_ms: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            warmup_rest_ms: default_warmup_rest_ms(),
            post_calibration_rest_ms: default_post_calibration_rest_ms(),
            between_exercise_rest_ms: default_between_exercise_rest_ms(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        let home = std::env::var("HOME").expect("HOME environment variable not set");
        PathBuf::from(home).join(".local/share")
    });
    base.join("liftguide")
}

fn default_jump_pct() -> f64 {
    0.025
}

fn default_max_jump_pct() -> f64 {
    0.10
}

fn default_overcap_until() -> u32 {
    3
}

fn default_deload_fraction() -> f64 {
    0.10
}

fn default_warmup_rest_ms() -> i64 {
    45_000
}

fn default_post_calibration_rest_ms() -> i64 {
    60_000
}

fn default_between_exercise_rest_ms() -> i64 {
    120_000
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            let home = std::env::var("HOME").expect("HOME environment variable not set");
            PathBuf::from(home).join(".config")
        });
        base.join("liftguide").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let p = &self.progression;
        if p.default_jump_pct <= 0.0 || p.max_jump_pct < p.default_jump_pct {
            return Err(Error::Config(format!(
                "invalid jump policy: default {} / max {}",
                p.default_jump_pct, p.max_jump_pct
            )));
        }
        if !(0.0..1.0).contains(&p.deload_fraction) {
            return Err(Error::Config(format!(
                "deload fraction must be in [0,1): {}",
                p.deload_fraction
            )));
        }
        Ok(())
    }
}
