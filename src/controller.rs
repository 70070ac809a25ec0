//! Lifecycle Controller
//!
//! Reacts to discovery, change and delete events and to operator commands,
//! and turns them into registry mutations and task start/stop calls. Every
//! failure is caught here and routed to the log stream; nothing escapes to
//! the dispatch loop.

use crate::discovery::ConfigDiscovery;
use crate::fsconfig::{self, fmt_path, CONFIG_FILE_NAME, DEFAULT_CONFIG_PATTERN};
use crate::prompt::{MultiSelectPrompt, PickItem, SingleChoicePrompt};
use crate::reader::FileReader;
use crate::registry::{registry_key, ConfigRegistry, LoadReport, TaskOp};
use crate::task::{LogEvent, LogSender, SyncTaskFactory};
use anyhow::Result;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

pub const TOGGLE_PLACEHOLDER: &str = "Select the FileSyncs you want to enable";
pub const FOLDER_PLACEHOLDER: &str = "Where to save fsconfig.json file";

/// Operator commands; names are stable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    CreateConfigFile,
    ToggleSyncs,
    StartAllSyncs,
    StopAllSyncs,
}

impl Command {
    pub const ALL: [Command; 4] = [
        Command::CreateConfigFile,
        Command::ToggleSyncs,
        Command::StartAllSyncs,
        Command::StopAllSyncs,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateConfigFile => "createConfigFile",
            Command::ToggleSyncs => "toggleSyncs",
            Command::StartAllSyncs => "startAllSyncs",
            Command::StopAllSyncs => "stopAllSyncs",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Command::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown command '{}'", s))
    }
}

/// Result of the toggle command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Applied { started: usize, stopped: usize },
    Cancelled,
    NothingToToggle,
}

/// Result of the create-config command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(PathBuf),
    AlreadyExists(PathBuf),
    Cancelled,
    NoWorkspaceFolders,
}

/// External collaborators the controller drives
#[derive(Clone)]
pub struct Services {
    pub reader: Arc<dyn FileReader>,
    pub discovery: Arc<dyn ConfigDiscovery>,
    pub tasks: Arc<dyn SyncTaskFactory>,
    pub picker: Arc<dyn MultiSelectPrompt>,
    pub chooser: Arc<dyn SingleChoicePrompt>,
}

pub struct LifecycleController {
    registry: ConfigRegistry,
    discovery: Arc<dyn ConfigDiscovery>,
    picker: Arc<dyn MultiSelectPrompt>,
    chooser: Arc<dyn SingleChoicePrompt>,
    folders: RwLock<Vec<PathBuf>>,
    pattern: RwLock<String>,
    log: LogSender,
}

impl LifecycleController {
    pub fn new(services: Services, log: LogSender) -> Self {
        Self {
            registry: ConfigRegistry::new(services.reader, services.tasks, log.clone()),
            discovery: services.discovery,
            picker: services.picker,
            chooser: services.chooser,
            folders: RwLock::new(Vec::new()),
            pattern: RwLock::new(DEFAULT_CONFIG_PATTERN.to_string()),
            log,
        }
    }

    pub fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    pub async fn folders(&self) -> Vec<PathBuf> {
        self.folders.read().await.clone()
    }

    /// Returns true when the pattern actually changed
    pub async fn set_pattern(&self, pattern: &str) -> bool {
        let mut current = self.pattern.write().await;
        if *current == pattern {
            return false;
        }
        *current = pattern.to_string();
        true
    }

    /// Discovery, create and change events all reload the file
    pub async fn on_config_changed(&self, path: &Path) -> Option<LoadReport> {
        match self.registry.load(path).await {
            Ok(report) => {
                self.log.send(LogEvent::config_change(
                    "load",
                    json!({
                        "path": report.path,
                        "groups": report.groups,
                        "started": report.started,
                    }),
                ));
                Some(report)
            }
            Err(e) => {
                warn!("{}", e);
                self.log.send(LogEvent::from_error(&e));
                None
            }
        }
    }

    /// Stop and forget the entry for a deleted file
    ///
    /// A reload of the same path that is still reading goes first, so the
    /// entry it installs is the one removed here.
    pub async fn on_config_deleted(&self, path: &Path) {
        if let Some(stopped) = self.registry.remove(path).await {
            self.log.send(LogEvent::config_change(
                "remove",
                json!({ "path": registry_key(path), "stopped": stopped }),
            ));
        }
    }

    /// Replace the folder list and load every configuration file found in it
    pub async fn on_workspace_folders_changed(&self, folders: Vec<PathBuf>) -> usize {
        info!("Workspace folders: {:?}", folders);
        *self.folders.write().await = folders;
        self.rediscover().await
    }

    /// Load every configuration file currently matching the pattern
    ///
    /// Purely additive: files that disappeared without a delete event keep
    /// their entries.
    pub async fn rediscover(&self) -> usize {
        let folders = self.folders().await;
        let pattern = self.pattern.read().await.clone();

        let paths = match self.discovery.discover(&folders, &pattern).await {
            Ok(paths) => paths,
            Err(e) => {
                error!(
                    "Config discovery via {} failed: {:#}",
                    self.discovery.provider_name(),
                    e
                );
                self.log.send(LogEvent::config_change(
                    "error",
                    Value::String(format!("discovery failed: {:#}", e)),
                ));
                return 0;
            }
        };

        let mut loaded = 0;
        for path in &paths {
            if self.on_config_changed(path).await.is_some() {
                loaded += 1;
            }
        }

        debug!("Discovery loaded {} of {} config files", loaded, paths.len());
        loaded
    }

    /// Start every sync, optionally only those of one configuration file
    pub async fn start_all_syncs(&self, filter: Option<&Path>) -> usize {
        self.broadcast(filter, TaskOp::Start).await
    }

    /// Stop every sync, optionally only those of one configuration file
    pub async fn stop_all_syncs(&self, filter: Option<&Path>) -> usize {
        self.broadcast(filter, TaskOp::Stop).await
    }

    async fn broadcast(&self, filter: Option<&Path>, op: TaskOp) -> usize {
        let filter = filter.map(registry_key);
        let changed = self
            .registry
            .for_each_entry(|path| filter.as_deref().map_or(true, |f| f == path), op)
            .await;

        let action = match op {
            TaskOp::Start => "startAll",
            TaskOp::Stop => "stopAll",
        };
        self.log
            .send(LogEvent::config_change(action, json!({ "changed": changed })));
        changed
    }

    /// Present every definition with its current state and apply the
    /// confirmed selection as a full overwrite of the presented snapshot
    pub async fn toggle_file_syncs(&self) -> Result<ToggleOutcome> {
        let items = self.registry.toggle_items().await;
        if items.is_empty() {
            info!("No sync definitions to toggle");
            return Ok(ToggleOutcome::NothingToToggle);
        }

        let pick_items: Vec<PickItem> = items
            .iter()
            .map(|item| PickItem {
                label: item.label.clone(),
                picked: item.picked,
            })
            .collect();

        let Some(selection) = self.picker.pick_many(TOGGLE_PLACEHOLDER, &pick_items).await? else {
            debug!("Toggle prompt cancelled");
            return Ok(ToggleOutcome::Cancelled);
        };
        let selection: HashSet<usize> = selection.into_iter().collect();

        let mut started = 0;
        let mut stopped = 0;
        for (index, item) in items.iter().enumerate() {
            let run = selection.contains(&index);
            if self.registry.set_running(&item.key, run).await {
                if run {
                    started += 1;
                } else {
                    stopped += 1;
                }
            }
        }

        self.log.send(LogEvent::config_change(
            "toggle",
            json!({ "started": started, "stopped": stopped }),
        ));
        Ok(ToggleOutcome::Applied { started, stopped })
    }

    /// Ask for a workspace folder and write the default template there
    pub async fn create_config_file(&self) -> Result<CreateOutcome> {
        let folders = self.folders().await;
        if folders.is_empty() {
            warn!("No workspace folders to create a config file in");
            return Ok(CreateOutcome::NoWorkspaceFolders);
        }

        let labels: Vec<String> = folders.iter().map(|f| fmt_path(f)).collect();
        let Some(folder) = self
            .chooser
            .pick_one(FOLDER_PLACEHOLDER, &labels)
            .await?
            .and_then(|index| folders.get(index))
        else {
            debug!("Folder prompt cancelled");
            return Ok(CreateOutcome::Cancelled);
        };

        match fsconfig::create_default_config_file(folder).await? {
            Some(path) => {
                self.log.send(LogEvent::config_change(
                    "create",
                    Value::String(path.display().to_string()),
                ));
                self.on_config_changed(&path).await;
                Ok(CreateOutcome::Created(path))
            }
            None => {
                let path = folder.join(CONFIG_FILE_NAME);
                self.log.send(LogEvent::config_change(
                    "exists",
                    Value::String(path.display().to_string()),
                ));
                Ok(CreateOutcome::AlreadyExists(path))
            }
        }
    }

    /// Run an operator command, logging rather than returning failures
    pub async fn execute(&self, command: Command) {
        debug!("Executing command {}", command);

        let result = match command {
            Command::StartAllSyncs => {
                self.start_all_syncs(None).await;
                Ok(())
            }
            Command::StopAllSyncs => {
                self.stop_all_syncs(None).await;
                Ok(())
            }
            Command::ToggleSyncs => self.toggle_file_syncs().await.map(|_| ()),
            Command::CreateConfigFile => self.create_config_file().await.map(|_| ()),
        };

        if let Err(e) = result {
            error!("Command {} failed: {:#}", command, e);
            self.log.send(LogEvent::config_change(
                "error",
                Value::String(format!("{} failed: {:#}", command, e)),
            ));
        }
    }

    /// Stop and release every task of every entry
    pub async fn deactivate(&self) -> usize {
        let stopped = self.registry.clear().await;
        info!("Deactivated, {} syncs stopped", stopped);
        self.log.send(LogEvent::config_change(
            "deactivate",
            json!({ "stopped": stopped }),
        ));
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names_round_trip() {
        for command in Command::ALL {
            assert_eq!(command.name().parse::<Command>().unwrap(), command);
        }
        assert_eq!(Command::ToggleSyncs.to_string(), "toggleSyncs");
        assert!("reloadEverything".parse::<Command>().is_err());
    }
}
