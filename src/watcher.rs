//! Workspace watching
//!
//! Turns debounced filesystem notifications into change/create/delete events
//! for configuration files matching the discovery pattern.

use crate::discovery::matches_pattern;
use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind, Debouncer};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// A change to a configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Changed(PathBuf),
    Deleted(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(p) | WatchEvent::Changed(p) | WatchEvent::Deleted(p) => p,
        }
    }
}

/// Watcher the orchestrator retargets when workspace folders or settings change
pub trait ConfigWatch: Send {
    fn sync_folders(&mut self, folders: &[PathBuf]) -> Result<()>;

    fn set_pattern(&mut self, pattern: &str);
}

#[derive(Debug, Default)]
struct WatchState {
    folders: Vec<PathBuf>,
    pattern: String,
    known: HashSet<PathBuf>,
}

impl WatchState {
    fn classify(&mut self, path: &Path, exists: bool) -> Option<WatchEvent> {
        if !matches_pattern(&self.folders, path, &self.pattern) {
            return None;
        }

        let path = path_clean::clean(path);
        if exists {
            if self.known.insert(path.clone()) {
                Some(WatchEvent::Created(path))
            } else {
                Some(WatchEvent::Changed(path))
            }
        } else {
            self.known.remove(&path);
            Some(WatchEvent::Deleted(path))
        }
    }
}

/// `notify`-backed watcher over every workspace folder
pub struct NotifyConfigWatcher {
    debouncer: Debouncer<RecommendedWatcher>,
    state: Arc<Mutex<WatchState>>,
    watched: BTreeSet<PathBuf>,
}

impl NotifyConfigWatcher {
    pub fn new<F>(pattern: &str, debounce: Duration, on_event: F) -> Result<Self>
    where
        F: Fn(WatchEvent) + Send + 'static,
    {
        let state = Arc::new(Mutex::new(WatchState {
            pattern: pattern.to_string(),
            ..Default::default()
        }));
        let callback_state = state.clone();

        let debouncer = new_debouncer(
            debounce,
            move |events: Result<Vec<DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        warn!("File watcher error: {}", e);
                        return;
                    }
                };

                for event in events {
                    if event.kind != DebouncedEventKind::Any {
                        continue;
                    }
                    let exists = event.path.is_file();
                    let classified = callback_state
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .classify(&event.path, exists);
                    if let Some(watch_event) = classified {
                        debug!("Watch event: {:?}", watch_event);
                        on_event(watch_event);
                    }
                }
            },
        )
        .context("Failed to create config file watcher")?;

        Ok(Self {
            debouncer,
            state,
            watched: BTreeSet::new(),
        })
    }
}

impl ConfigWatch for NotifyConfigWatcher {
    fn sync_folders(&mut self, folders: &[PathBuf]) -> Result<()> {
        let wanted: BTreeSet<PathBuf> = folders.iter().cloned().collect();

        for folder in self.watched.difference(&wanted) {
            if let Err(e) = self.debouncer.watcher().unwatch(folder) {
                warn!("Failed to stop watching {}: {}", folder.display(), e);
            }
        }

        for folder in wanted.difference(&self.watched) {
            self.debouncer
                .watcher()
                .watch(folder, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch folder: {}", folder.display()))?;
            debug!("Watching {}", folder.display());
        }

        self.state.lock().unwrap_or_else(|e| e.into_inner()).folders = folders.to_vec();
        self.watched = wanted;
        Ok(())
    }

    fn set_pattern(&mut self, pattern: &str) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).pattern = pattern.to_string();
    }
}

/// Keeps a single-file watch alive for as long as it is held
pub struct FileWatchGuard {
    _debouncer: Debouncer<RecommendedWatcher>,
}

/// Call `on_change` whenever `path` is written, created or replaced
pub fn watch_file<F>(path: &Path, debounce: Duration, on_change: F) -> Result<FileWatchGuard>
where
    F: Fn() + Send + 'static,
{
    let parent = path
        .parent()
        .context("Watched file has no parent directory")?
        .to_path_buf();
    let file_name = path
        .file_name()
        .context("Watched file has no file name")?
        .to_os_string();

    let mut debouncer = new_debouncer(
        debounce,
        move |events: Result<Vec<DebouncedEvent>, notify::Error>| {
            let Ok(events) = events else {
                return;
            };
            if events
                .iter()
                .any(|event| event.path.file_name() == Some(file_name.as_os_str()))
            {
                on_change();
            }
        },
    )
    .context("Failed to create settings watcher")?;

    debouncer
        .watcher()
        .watch(&parent, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", parent.display()))?;

    Ok(FileWatchGuard {
        _debouncer: debouncer,
    })
}
