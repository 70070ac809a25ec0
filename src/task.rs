//! Sync task seam
//!
//! The byte-level synchronization engine lives outside this crate. The
//! orchestrator only needs an opaque task per sync group that can start and
//! stop individual definitions and emit `(type, action, data)` log records.

use crate::error::FileSyncError;
use crate::fsconfig::{GroupSpec, SyncDefinition};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Log records produced by internal lifecycle actions
pub const KIND_CONFIG_CHANGE: &str = "configChange";

/// Log records produced by running sync tasks
pub const KIND_FSYNC: &str = "fsync";

/// A log record, identical in shape for lifecycle and task origins
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub kind: String,
    pub action: String,
    pub data: Value,
}

impl LogEvent {
    pub fn new(kind: impl Into<String>, action: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            action: action.into(),
            data,
        }
    }

    pub fn config_change(action: impl Into<String>, data: Value) -> Self {
        Self::new(KIND_CONFIG_CHANGE, action, data)
    }

    pub fn fsync(action: impl Into<String>, data: Value) -> Self {
        Self::new(KIND_FSYNC, action, data)
    }

    /// Lifecycle record describing a non-fatal failure
    pub fn from_error(error: &FileSyncError) -> Self {
        Self::config_change(error.kind(), Value::String(error.to_string()))
    }
}

/// Cloneable emitter that tasks and the controller use to publish log records
#[derive(Clone)]
pub struct LogSender {
    emit: Arc<dyn Fn(LogEvent) + Send + Sync>,
}

impl LogSender {
    pub fn new(emit: impl Fn(LogEvent) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
        }
    }

    /// Sender that drops every record
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn send(&self, event: LogEvent) {
        (self.emit)(event)
    }
}

impl fmt::Debug for LogSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSender").finish_non_exhaustive()
    }
}

/// A running synchronization unit for one sync group
#[async_trait]
pub trait SyncTask: Send + Sync {
    /// Begin synchronizing one definition
    async fn start(&self, sync: &SyncDefinition) -> Result<()>;

    /// Stop synchronizing one definition
    async fn stop(&self, sync: &SyncDefinition) -> Result<()>;

    /// Release any resources once every definition is stopped
    async fn dispose(&self) {}
}

/// Builds sync tasks for freshly loaded groups
pub trait SyncTaskFactory: Send + Sync {
    fn create(
        &self,
        config_path: &Path,
        group: &GroupSpec,
        log: LogSender,
    ) -> Result<Box<dyn SyncTask>>;
}

/// Owned wrapper around one group's task
///
/// Tracks which definitions are running so a definition is never started
/// twice through the same handle.
pub struct SyncTaskHandle {
    group: String,
    task: Box<dyn SyncTask>,
    running: BTreeSet<usize>,
}

impl SyncTaskHandle {
    pub fn new(group: impl Into<String>, task: Box<dyn SyncTask>) -> Self {
        Self {
            group: group.into(),
            task,
            running: BTreeSet::new(),
        }
    }

    pub fn is_running(&self, index: usize) -> bool {
        self.running.contains(&index)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Start definition `index`; a no-op if it is already running
    pub async fn start(
        &mut self,
        index: usize,
        sync: &mut SyncDefinition,
    ) -> std::result::Result<bool, FileSyncError> {
        if self.running.contains(&index) {
            return Ok(false);
        }

        self.task
            .start(sync)
            .await
            .map_err(|e| FileSyncError::TaskStart {
                group: self.group.clone(),
                sync: sync.name.clone(),
                message: format!("{:#}", e),
            })?;

        self.running.insert(index);
        sync.active = true;
        debug!("Started sync '{}' in group '{}'", sync.name, self.group);
        Ok(true)
    }

    /// Stop definition `index`; a no-op if it is not running
    pub async fn stop(
        &mut self,
        index: usize,
        sync: &mut SyncDefinition,
    ) -> std::result::Result<bool, FileSyncError> {
        if !self.running.contains(&index) {
            sync.active = false;
            return Ok(false);
        }

        self.task
            .stop(sync)
            .await
            .map_err(|e| FileSyncError::TaskStop {
                group: self.group.clone(),
                sync: sync.name.clone(),
                message: format!("{:#}", e),
            })?;

        self.running.remove(&index);
        sync.active = false;
        debug!("Stopped sync '{}' in group '{}'", sync.name, self.group);
        Ok(true)
    }

    /// Stop every running definition, then dispose of the task
    ///
    /// A definition whose stop fails is forgotten anyway: the handle is
    /// consumed and must not keep a claim on it.
    pub async fn release(mut self, definitions: &mut [SyncDefinition]) -> Vec<FileSyncError> {
        let mut errors = Vec::new();
        let running: Vec<usize> = self.running.iter().copied().collect();

        for index in running {
            if let Some(sync) = definitions.get_mut(index) {
                if let Err(e) = self.stop(index, sync).await {
                    errors.push(e);
                }
            }
        }

        self.running.clear();
        self.task.dispose().await;
        errors
    }
}

impl fmt::Debug for SyncTaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncTaskHandle")
            .field("group", &self.group)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

/// Task factory used when no synchronization engine is linked in
///
/// Tasks only report what they would do through the log stream.
#[derive(Debug, Default, Clone)]
pub struct DryRunTaskFactory;

struct DryRunTask {
    group: String,
    log: LogSender,
}

#[async_trait]
impl SyncTask for DryRunTask {
    async fn start(&self, sync: &SyncDefinition) -> Result<()> {
        self.log.send(LogEvent::fsync(
            "start",
            json!({
                "group": self.group,
                "name": sync.name,
                "src": sync.source_path,
                "dest": sync.destination_path,
            }),
        ));
        Ok(())
    }

    async fn stop(&self, sync: &SyncDefinition) -> Result<()> {
        self.log.send(LogEvent::fsync(
            "stop",
            json!({ "group": self.group, "name": sync.name }),
        ));
        Ok(())
    }
}

impl SyncTaskFactory for DryRunTaskFactory {
    fn create(
        &self,
        _config_path: &Path,
        group: &GroupSpec,
        log: LogSender,
    ) -> Result<Box<dyn SyncTask>> {
        Ok(Box::new(DryRunTask {
            group: group.name.clone(),
            log,
        }))
    }
}
