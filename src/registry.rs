//! Config Registry - the live mapping from configuration file to running tasks
//!
//! The registry owns one [`ConfigEntry`] per configuration file path. Each
//! entry owns the [`SyncTaskHandle`]s for its groups, so dropping an entry out
//! of the map is the only way a handle ever goes away, and it is always
//! released (every definition stopped) on the way out.
//!
//! Loads and removals for the same path are serialized through a per-path
//! lock. A reload tears the previous entry down before the file is even read,
//! so a file that has become unreadable or invalid stops its old syncs and
//! leaves the path without an entry.
//!
//! Each entry sits behind its own lock. The map lock is only held long
//! enough to insert, remove or clone out entries, never across a task start
//! or stop.

use crate::error::FileSyncError;
use crate::fsconfig::{fmt_path, ConfigFile, SyncDefinition};
use crate::reader::FileReader;
use crate::task::{LogEvent, LogSender, SyncTaskFactory, SyncTaskHandle};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One named group from a loaded file and the task that serves it
#[derive(Debug)]
pub struct NamedSyncGroup {
    pub name: String,
    pub definitions: Vec<SyncDefinition>,
    handle: Option<SyncTaskHandle>,
}

impl NamedSyncGroup {
    pub fn has_task(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_running(&self, index: usize) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_running(index))
    }

    pub fn running_count(&self) -> usize {
        self.handle.as_ref().map_or(0, |h| h.running_count())
    }

    async fn start(&mut self, index: usize) -> Result<bool, FileSyncError> {
        match (self.handle.as_mut(), self.definitions.get_mut(index)) {
            (Some(handle), Some(sync)) => handle.start(index, sync).await,
            _ => Ok(false),
        }
    }

    async fn stop(&mut self, index: usize) -> Result<bool, FileSyncError> {
        match (self.handle.as_mut(), self.definitions.get_mut(index)) {
            (Some(handle), Some(sync)) => handle.stop(index, sync).await,
            _ => Ok(false),
        }
    }

    async fn release(&mut self) -> Vec<FileSyncError> {
        match self.handle.take() {
            Some(handle) => handle.release(&mut self.definitions).await,
            None => Vec::new(),
        }
    }
}

/// A parsed configuration file plus the task handles it owns
#[derive(Debug)]
pub struct ConfigEntry {
    pub path: PathBuf,
    /// Distinguishes this entry from earlier and later loads of the same path
    pub generation: u64,
    pub groups: Vec<NamedSyncGroup>,
}

impl ConfigEntry {
    pub fn running_count(&self) -> usize {
        self.groups.iter().map(NamedSyncGroup::running_count).sum()
    }
}

/// Identity of one sync definition inside one particular entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncKey {
    pub path: PathBuf,
    pub generation: u64,
    pub group: usize,
    pub sync: usize,
}

/// One row of the toggle picker
#[derive(Debug, Clone)]
pub struct ToggleItem {
    pub key: SyncKey,
    pub label: String,
    pub picked: bool,
}

/// Read-only copy of an entry for enumeration
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub path: PathBuf,
    pub generation: u64,
    pub groups: Vec<GroupSnapshot>,
}

#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub name: String,
    pub has_task: bool,
    pub definitions: Vec<SyncDefinition>,
    pub running: Vec<bool>,
}

/// Broadcast operation applied by [`ConfigRegistry::for_each_entry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOp {
    Start,
    Stop,
}

/// Outcome of a successful load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub path: PathBuf,
    pub generation: u64,
    pub groups: usize,
    /// Definitions stopped while tearing down the previous entry
    pub stopped: usize,
    /// Definitions started because the file marks them active
    pub started: usize,
}

/// Registry key for a configuration file path
pub fn registry_key(path: &Path) -> PathBuf {
    path_clean::clean(path)
}

type SharedEntry = Arc<Mutex<ConfigEntry>>;

pub struct ConfigRegistry {
    entries: Mutex<BTreeMap<PathBuf, SharedEntry>>,
    path_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    reader: Arc<dyn FileReader>,
    factory: Arc<dyn SyncTaskFactory>,
    log: LogSender,
    next_generation: AtomicU64,
}

impl ConfigRegistry {
    pub fn new(
        reader: Arc<dyn FileReader>,
        factory: Arc<dyn SyncTaskFactory>,
        log: LogSender,
    ) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            path_locks: Mutex::new(HashMap::new()),
            reader,
            factory,
            log,
            next_generation: AtomicU64::new(0),
        }
    }

    /// Reload `path`: tear down any existing entry, then read, parse and
    /// install a fresh one, starting the definitions the file marks active
    pub async fn load(&self, path: &Path) -> Result<LoadReport, FileSyncError> {
        let key = registry_key(path);
        let path_lock = self.path_lock(&key).await;
        let _serialized = path_lock.lock().await;

        let stopped = self.tear_down(&key).await.unwrap_or(0);

        let content = self
            .reader
            .read(&key)
            .await
            .map_err(|e| FileSyncError::config_load(&key, e))?;
        let file =
            ConfigFile::parse(&content, &key).map_err(|e| FileSyncError::config_load(&key, e))?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let shared = Arc::new(Mutex::new(self.build_entry(&key, generation, file)));

        // Locked before it becomes visible to broadcasts
        let mut entry = shared.lock().await;
        let groups = entry.groups.len();
        self.entries.lock().await.insert(key.clone(), shared.clone());
        let started = self.start_active(&mut entry).await;
        drop(entry);

        info!(
            "Loaded {} ({} groups, {} syncs started)",
            key.display(),
            groups,
            started
        );

        Ok(LoadReport {
            path: key,
            generation,
            groups,
            stopped,
            started,
        })
    }

    /// Stop and release every task for `path`, then forget it
    ///
    /// Waits for any load of the same path that is already under way, so a
    /// removal issued mid-reload always wins. Returns the number of
    /// definitions that were running, or `None` if the path had no entry.
    pub async fn remove(&self, path: &Path) -> Option<usize> {
        let key = registry_key(path);
        let path_lock = self.path_lock(&key).await;
        let _serialized = path_lock.lock().await;

        let stopped = self.tear_down(&key).await;
        if stopped.is_some() {
            info!("Removed {}", key.display());
        }
        stopped
    }

    /// Start or stop every definition of every entry whose path matches
    ///
    /// Works on a snapshot of the matching entries and locks one entry at a
    /// time, so a slow task only holds up its own entry. Returns how many
    /// definitions changed state. Failures are reported per definition and
    /// never stop siblings from being processed.
    pub async fn for_each_entry<P>(&self, predicate: P, op: TaskOp) -> usize
    where
        P: Fn(&Path) -> bool,
    {
        let mut changed = 0;

        for shared in self.snapshot(&predicate).await {
            let mut entry = shared.lock().await;
            for group in &mut entry.groups {
                for index in 0..group.definitions.len() {
                    let result = match op {
                        TaskOp::Start => group.start(index).await,
                        TaskOp::Stop => group.stop(index).await,
                    };
                    match result {
                        Ok(true) => changed += 1,
                        Ok(false) => {}
                        Err(e) => self.report(e),
                    }
                }
            }
        }

        debug!("{:?} broadcast changed {} syncs", op, changed);
        changed
    }

    /// Start or stop one definition
    ///
    /// Keys from an older generation of the entry refer to tasks that no
    /// longer exist and are ignored.
    pub async fn set_running(&self, key: &SyncKey, run: bool) -> bool {
        let shared = self.entries.lock().await.get(&key.path).cloned();
        let Some(shared) = shared else {
            return false;
        };

        let mut entry = shared.lock().await;
        if entry.generation != key.generation {
            debug!("Skipping stale toggle item for {}", key.path.display());
            return false;
        }
        let Some(group) = entry.groups.get_mut(key.group) else {
            return false;
        };

        let result = if run {
            group.start(key.sync).await
        } else {
            group.stop(key.sync).await
        };

        match result {
            Ok(changed) => changed,
            Err(e) => {
                self.report(e);
                false
            }
        }
    }

    /// Read-only view of every entry
    pub async fn all(&self) -> Vec<EntrySnapshot> {
        let mut views = Vec::new();

        for shared in self.snapshot(|_| true).await {
            let entry = shared.lock().await;
            views.push(EntrySnapshot {
                path: entry.path.clone(),
                generation: entry.generation,
                groups: entry
                    .groups
                    .iter()
                    .map(|group| GroupSnapshot {
                        name: group.name.clone(),
                        has_task: group.has_task(),
                        definitions: group.definitions.clone(),
                        running: (0..group.definitions.len())
                            .map(|i| group.is_running(i))
                            .collect(),
                    })
                    .collect(),
            });
        }

        views
    }

    /// Flat list of every definition across every entry, for the toggle picker
    pub async fn toggle_items(&self) -> Vec<ToggleItem> {
        let mut items = Vec::new();

        for entry in self.all().await {
            for (group_index, group) in entry.groups.iter().enumerate() {
                for (sync_index, sync) in group.definitions.iter().enumerate() {
                    items.push(ToggleItem {
                        key: SyncKey {
                            path: entry.path.clone(),
                            generation: entry.generation,
                            group: group_index,
                            sync: sync_index,
                        },
                        label: format!("{} - {}", group.name, fmt_path(&sync.source_path)),
                        picked: sync.active,
                    });
                }
            }
        }

        items
    }

    pub async fn contains(&self, path: &Path) -> bool {
        self.entries.lock().await.contains_key(&registry_key(path))
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Number of definitions currently running across all entries
    pub async fn running_count(&self) -> usize {
        let mut running = 0;
        for shared in self.snapshot(|_| true).await {
            running += shared.lock().await.running_count();
        }
        running
    }

    /// Release every entry; used on deactivation
    pub async fn clear(&self) -> usize {
        let drained: Vec<SharedEntry> = {
            let mut entries = self.entries.lock().await;
            std::mem::take(&mut *entries).into_values().collect()
        };

        let mut stopped = 0;
        for shared in drained {
            let mut entry = shared.lock().await;
            stopped += self.release(&mut entry).await;
        }
        stopped
    }

    async fn path_lock(&self, key: &Path) -> Arc<Mutex<()>> {
        self.path_locks
            .lock()
            .await
            .entry(key.to_path_buf())
            .or_default()
            .clone()
    }

    /// Entries whose path matches, cloned out so the map lock is not held
    async fn snapshot<P>(&self, predicate: P) -> Vec<SharedEntry>
    where
        P: Fn(&Path) -> bool,
    {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|(path, _)| predicate(path.as_path()))
            .map(|(_, shared)| shared.clone())
            .collect()
    }

    async fn tear_down(&self, key: &Path) -> Option<usize> {
        let shared = self.entries.lock().await.remove(key)?;
        let mut entry = shared.lock().await;
        let stopped = self.release(&mut entry).await;
        Some(stopped)
    }

    async fn release(&self, entry: &mut ConfigEntry) -> usize {
        let running = entry.running_count();
        for group in &mut entry.groups {
            for error in group.release().await {
                self.report(error);
            }
        }
        debug!(
            "Released {} (generation {}, {} syncs were running)",
            entry.path.display(),
            entry.generation,
            running
        );
        running
    }

    fn build_entry(&self, key: &Path, generation: u64, file: ConfigFile) -> ConfigEntry {
        let groups = file
            .configs
            .into_iter()
            .map(|spec| {
                let handle = match self.factory.create(key, &spec, self.log.clone()) {
                    Ok(task) => Some(SyncTaskHandle::new(spec.name.clone(), task)),
                    Err(e) => {
                        self.report(FileSyncError::TaskCreate {
                            group: spec.name.clone(),
                            message: format!("{:#}", e),
                        });
                        None
                    }
                };
                NamedSyncGroup {
                    name: spec.name,
                    definitions: spec.definitions,
                    handle,
                }
            })
            .collect();

        ConfigEntry {
            path: key.to_path_buf(),
            generation,
            groups,
        }
    }

    async fn start_active(&self, entry: &mut ConfigEntry) -> usize {
        let mut started = 0;

        for group in &mut entry.groups {
            let wanted: Vec<usize> = group
                .definitions
                .iter()
                .enumerate()
                .filter(|(_, sync)| sync.active)
                .map(|(index, _)| index)
                .collect();

            // `active` mirrors running state from here on
            for sync in &mut group.definitions {
                sync.active = false;
            }

            for index in wanted {
                match group.start(index).await {
                    Ok(true) => started += 1,
                    Ok(false) => {}
                    Err(e) => self.report(e),
                }
            }
        }

        started
    }

    fn report(&self, error: FileSyncError) {
        warn!("{}", error);
        self.log.send(LogEvent::from_error(&error));
    }
}
