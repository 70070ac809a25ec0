//! Error taxonomy for configuration loading and sync task control
//!
//! Every variant here is non-fatal to the orchestrator: handlers catch them
//! at their boundary and route them to the log sink.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a configuration file could not be turned into an entry
#[derive(Debug, Error)]
pub enum ConfigLoadCause {
    #[error("unable to read file: {0}")]
    Read(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors surfaced by the registry and the sync task layer
#[derive(Debug, Error)]
pub enum FileSyncError {
    /// File unreadable or fails schema parsing
    #[error("failed to load {}: {source}", path.display())]
    ConfigLoad {
        path: PathBuf,
        #[source]
        source: ConfigLoadCause,
    },

    /// The task factory refused to build a task for a group
    #[error("failed to create sync task for group '{group}': {message}")]
    TaskCreate { group: String, message: String },

    /// Starting one sync definition failed
    #[error("failed to start sync '{sync}' in group '{group}': {message}")]
    TaskStart {
        group: String,
        sync: String,
        message: String,
    },

    /// Stopping one sync definition failed
    #[error("failed to stop sync '{sync}' in group '{group}': {message}")]
    TaskStop {
        group: String,
        sync: String,
        message: String,
    },
}

impl FileSyncError {
    pub fn config_load(path: &Path, source: impl Into<ConfigLoadCause>) -> Self {
        FileSyncError::ConfigLoad {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }

    /// Stable kind name used as the log action
    pub fn kind(&self) -> &'static str {
        match self {
            FileSyncError::ConfigLoad { .. } => "ConfigLoadError",
            FileSyncError::TaskCreate { .. } => "TaskCreateError",
            FileSyncError::TaskStart { .. } => "TaskStartError",
            FileSyncError::TaskStop { .. } => "TaskStopError",
        }
    }
}
