//! Settings loaded from a TOML file.
//!
//! The file is optional and only ever read: a missing file yields defaults,
//! and every key falls back to its default when absent.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable that points at an alternative settings file.
pub const CONFIG_ENV_VAR: &str = "ELP_DETECTOR_CONFIG";

/// Lower bound for the UI refresh period.
const MIN_REFRESH_INTERVAL_MS: u64 = 10;

/// Errors that can occur while loading settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Result type for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root settings structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// How the external pipeline is invoked.
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Window behaviour.
    #[serde(default)]
    pub ui: UiSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Command template for the detector pipeline and its dependency install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Python interpreter used for both the pipeline and pip.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Pipeline entry script, relative to the script folder.
    #[serde(default = "default_script")]
    pub script: String,

    /// First-stage model weights.
    #[serde(default = "default_model_0")]
    pub model_0: String,

    /// Second-stage model weights.
    #[serde(default = "default_model_1")]
    pub model_1: String,

    /// Requirements file, relative to the script folder unless absolute.
    #[serde(default = "default_requirements")]
    pub requirements: String,
}

fn default_interpreter() -> String {
    "python".to_string()
}

fn default_script() -> String {
    "Inference_pipeline.py".to_string()
}

fn default_model_0() -> String {
    "2_Stage_Model/first_stage.pt".to_string()
}

fn default_model_1() -> String {
    "2_Stage_Model/second_stage.pt".to_string()
}

fn default_requirements() -> String {
    "requirements.txt".to_string()
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            script: default_script(),
            model_0: default_model_0(),
            model_1: default_model_1(),
            requirements: default_requirements(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiSettings {
    /// How often pending output is drained and the time label refreshed.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Help text shown by the Help dialog.
    #[serde(default = "default_help_file")]
    pub help_file: String,
}

fn default_refresh_interval_ms() -> u64 {
    100
}

fn default_help_file() -> String {
    "help.txt".to_string()
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            help_file: default_help_file(),
        }
    }
}

impl UiSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(MIN_REFRESH_INTERVAL_MS))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Load settings from `path`, falling back to defaults on any error.
    ///
    /// Returns the error alongside so the caller can report it once logging
    /// is up.
    pub fn load_or_default(path: &Path) -> (Self, Option<ConfigError>) {
        match Self::load(path) {
            Ok(settings) => (settings, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }
}

/// Settings file location: `$ELP_DETECTOR_CONFIG`, else the platform config dir.
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }
    ProjectDirs::from("org", "ELP", "Detector").map(|dirs| dirs.config_dir().join("settings.toml"))
}
