use crate::fsconfig::DEFAULT_CONFIG_PATTERN;
use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Host settings for the filesync orchestrator
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Show the condensed status line on every log event
    #[serde(default = "default_true")]
    pub show_status_bar_info: bool,

    /// Glob used to find configuration files inside workspace folders
    #[serde(default = "default_config_pattern")]
    pub config_pattern: String,

    /// Debounce window for filesystem notifications, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Workspace folders used when none are given on the command line
    #[serde(default)]
    pub workspace_folders: Vec<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_config_pattern() -> String {
    DEFAULT_CONFIG_PATTERN.to_string()
}
fn default_debounce_ms() -> u64 {
    250
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            color: default_true(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            show_status_bar_info: default_true(),
            config_pattern: default_config_pattern(),
            debounce_ms: default_debounce_ms(),
            workspace_folders: Vec::new(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from the default location or create a default file
    pub fn load_or_default() -> Result<Self> {
        let settings_path = Self::default_path()?;

        if settings_path.exists() {
            Self::load(&settings_path)
        } else {
            let settings = Self::default();

            if let Some(parent) = settings_path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create settings directory: {:?}", parent)
                })?;
            }

            settings.save(&settings_path)?;

            tracing::info!("Created default settings at: {:?}", settings_path);
            Ok(settings)
        }
    }

    /// Load settings from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;

        let mut settings: Settings = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {:?}", path))?;

        settings.expand_paths()?;

        Ok(settings)
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize settings")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings file: {:?}", path))?;

        Ok(())
    }

    /// Get the default settings file path (XDG compliant)
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("filesync").join("settings.yml"))
    }

    /// Expand environment variables in workspace folder paths
    pub fn expand_paths(&mut self) -> Result<()> {
        for folder in &mut self.workspace_folders {
            *folder = shellexpand::full(folder)
                .with_context(|| format!("Failed to expand workspace folder: {}", folder))?
                .into_owned();
        }

        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
