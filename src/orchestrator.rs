//! Orchestrator - the single event channel and its dispatch loop
//!
//! Watchers, settings reloads, operator commands and task log records all
//! arrive as [`OrchestratorEvent`]s on one channel. The loop runs on a single
//! logical thread: log records and settings are applied inline, every other
//! event becomes an in-flight handler polled alongside the channel, so a slow
//! file read or an open prompt never stalls unrelated events. Loads for the
//! same path are serialized by the registry.

use crate::controller::{Command, LifecycleController, Services};
use crate::router::{LogRouter, LogSink};
use crate::settings::Settings;
use crate::task::{LogEvent, LogSender};
use crate::watcher::{ConfigWatch, WatchEvent};
use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

/// How long shutdown waits for in-flight handlers before abandoning them
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Everything the dispatch loop reacts to
#[derive(Debug)]
pub enum OrchestratorEvent {
    Watch(WatchEvent),
    WorkspaceFoldersChanged(Vec<PathBuf>),
    SettingsChanged(Settings),
    Command {
        command: Command,
        done: Option<oneshot::Sender<()>>,
    },
    Log(LogEvent),
    Shutdown,
}

/// Cloneable sender side of the orchestrator's channel
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    sender: mpsc::UnboundedSender<OrchestratorEvent>,
}

impl OrchestratorHandle {
    /// Returns false once the orchestrator has stopped
    pub fn send(&self, event: OrchestratorEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn watch_event(&self, event: WatchEvent) -> bool {
        self.send(OrchestratorEvent::Watch(event))
    }

    pub fn workspace_folders_changed(&self, folders: Vec<PathBuf>) -> bool {
        self.send(OrchestratorEvent::WorkspaceFoldersChanged(folders))
    }

    pub fn settings_changed(&self, settings: Settings) -> bool {
        self.send(OrchestratorEvent::SettingsChanged(settings))
    }

    pub fn command(&self, command: Command) -> bool {
        self.send(OrchestratorEvent::Command {
            command,
            done: None,
        })
    }

    /// Queue a command and get notified once it has finished
    pub fn command_with_ack(&self, command: Command) -> Option<oneshot::Receiver<()>> {
        let (done, finished) = oneshot::channel();
        self.send(OrchestratorEvent::Command {
            command,
            done: Some(done),
        })
        .then_some(finished)
    }

    pub fn shutdown(&self) -> bool {
        self.send(OrchestratorEvent::Shutdown)
    }

    /// Log sender feeding records into this channel
    pub fn log_sender(&self) -> LogSender {
        let sender = self.sender.clone();
        LogSender::new(move |event| {
            let _ = sender.send(OrchestratorEvent::Log(event));
        })
    }
}

pub struct Orchestrator {
    controller: LifecycleController,
    router: LogRouter,
    watcher: Mutex<Option<Box<dyn ConfigWatch>>>,
    handle: OrchestratorHandle,
    shutdown_grace: Duration,
}

impl Orchestrator {
    pub fn new(
        services: Services,
        sink: Arc<dyn LogSink>,
    ) -> (Self, mpsc::UnboundedReceiver<OrchestratorEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = OrchestratorHandle { sender };
        let controller = LifecycleController::new(services, handle.log_sender());

        let orchestrator = Self {
            controller,
            router: LogRouter::new(sink),
            watcher: Mutex::new(None),
            handle,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        };

        (orchestrator, receiver)
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn handle(&self) -> OrchestratorHandle {
        self.handle.clone()
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    pub fn router(&self) -> &LogRouter {
        &self.router
    }

    pub async fn attach_watcher(&self, watcher: Box<dyn ConfigWatch>) {
        *self.watcher.lock().await = Some(watcher);
    }

    /// Queue the initial settings read and folder discovery
    pub fn activate(&self, settings: Settings, folders: Vec<PathBuf>) {
        self.handle.settings_changed(settings);
        self.handle.workspace_folders_changed(folders);
    }

    /// Process events until shutdown, then deactivate
    ///
    /// In-flight handlers get the shutdown grace period to finish before
    /// every task is stopped. Whatever is still pending then, such as an
    /// unanswered prompt, is dropped. Records still queued afterwards are
    /// routed before returning.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<OrchestratorEvent>) -> Result<()> {
        info!("Orchestrator started");
        let mut in_flight = FuturesUnordered::new();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    None | Some(OrchestratorEvent::Shutdown) => break,
                    Some(OrchestratorEvent::Log(event)) => {
                        self.router.route(&event);
                    }
                    Some(OrchestratorEvent::SettingsChanged(settings)) => {
                        if self.apply_settings(settings).await {
                            let folders = self.controller.folders().await;
                            in_flight.push(self.dispatch(OrchestratorEvent::WorkspaceFoldersChanged(folders)));
                        }
                    }
                    Some(event) => in_flight.push(self.dispatch(event)),
                },
                Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
            }
        }

        info!("Shutdown requested, waiting for {} handlers", in_flight.len());
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while in_flight.next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "Abandoning {} handlers still running after {:?}",
                in_flight.len(),
                self.shutdown_grace
            );
        }
        drop(in_flight);

        self.deactivate().await;

        while let Ok(event) = events.try_recv() {
            match event {
                OrchestratorEvent::Log(event) => {
                    self.router.route(&event);
                }
                other => debug!("Dropping event after shutdown: {:?}", other),
            }
        }

        info!("Orchestrator stopped");
        Ok(())
    }

    async fn dispatch(&self, event: OrchestratorEvent) {
        match event {
            OrchestratorEvent::Watch(WatchEvent::Created(path))
            | OrchestratorEvent::Watch(WatchEvent::Changed(path)) => {
                self.controller.on_config_changed(&path).await;
            }
            OrchestratorEvent::Watch(WatchEvent::Deleted(path)) => {
                self.controller.on_config_deleted(&path).await;
            }
            OrchestratorEvent::WorkspaceFoldersChanged(folders) => {
                self.retarget_watcher(&folders).await;
                self.controller.on_workspace_folders_changed(folders).await;
            }
            OrchestratorEvent::Command { command, done } => {
                self.controller.execute(command).await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            OrchestratorEvent::SettingsChanged(settings) => {
                self.apply_settings(settings).await;
            }
            OrchestratorEvent::Log(event) => {
                self.router.route(&event);
            }
            OrchestratorEvent::Shutdown => {}
        }
    }

    /// Returns true when the discovery pattern changed
    async fn apply_settings(&self, settings: Settings) -> bool {
        self.router
            .set_status_visible(settings.show_status_bar_info);

        let pattern_changed = self.controller.set_pattern(&settings.config_pattern).await;
        if pattern_changed {
            if let Some(watcher) = self.watcher.lock().await.as_mut() {
                watcher.set_pattern(&settings.config_pattern);
            }
        }

        let data = serde_json::to_value(&settings).unwrap_or(Value::Null);
        self.router.route(&LogEvent::config_change("update", data));
        pattern_changed
    }

    async fn retarget_watcher(&self, folders: &[PathBuf]) {
        if let Some(watcher) = self.watcher.lock().await.as_mut() {
            if let Err(e) = watcher.sync_folders(folders) {
                warn!("Failed to update watched folders: {:#}", e);
                self.router.route(&LogEvent::config_change(
                    "error",
                    json!(format!("watch failed: {:#}", e)),
                ));
            }
        }
    }

    /// Stop every task across every entry
    pub async fn deactivate(&self) -> usize {
        let stopped = self.controller.deactivate().await;
        *self.watcher.lock().await = None;
        stopped
    }
}
