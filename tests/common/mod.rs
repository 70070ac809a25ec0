//! Common test utilities and fakes for FileSync tests
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use filesync::discovery::{matches_pattern, ConfigDiscovery};
use filesync::fsconfig::{GroupSpec, SyncDefinition};
use filesync::prompt::{MultiSelectPrompt, PickItem, SingleChoicePrompt};
use filesync::reader::FileReader;
use filesync::router::{LogSink, StatusProjection};
use filesync::task::{LogEvent, LogSender, SyncTask, SyncTaskFactory};
use filesync::{LifecycleController, Services};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// In-memory configuration files, optionally slow to read
#[derive(Default)]
pub struct MemoryFs {
    files: Mutex<BTreeMap<PathBuf, String>>,
    read_yields: Mutex<usize>,
    reads: Mutex<usize>,
}

impl MemoryFs {
    pub fn put(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), content.to_string());
    }

    pub fn delete(&self, path: &str) {
        self.files.lock().unwrap().remove(&PathBuf::from(path));
    }

    /// Make every read suspend this many times after capturing the content
    pub fn set_read_yields(&self, yields: usize) {
        *self.read_yields.lock().unwrap() = yields;
    }

    /// Reads started so far
    pub fn reads(&self) -> usize {
        *self.reads.lock().unwrap()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl FileReader for MemoryFs {
    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        *self.reads.lock().unwrap() += 1;
        let content = self
            .files
            .lock()
            .unwrap()
            .get(path)
            .map(|content| content.clone().into_bytes())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"));

        let yields = *self.read_yields.lock().unwrap();
        for _ in 0..yields {
            tokio::task::yield_now().await;
        }
        content
    }
}

#[async_trait]
impl ConfigDiscovery for MemoryFs {
    async fn discover(&self, folders: &[PathBuf], pattern: &str) -> Result<Vec<PathBuf>> {
        Ok(self
            .paths()
            .into_iter()
            .filter(|path| matches_pattern(folders, path, pattern))
            .collect())
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

/// What the recording tasks have observed
#[derive(Debug, Default)]
pub struct TaskLedger {
    /// Identities currently running, `<config path>#<group>/<sync>`
    pub running: HashSet<String>,
    pub starts: usize,
    pub stops: usize,
    /// Starts of an identity that was already running
    pub duplicates: usize,
    pub disposed: usize,
    /// Starts currently parked on a gate
    pub held: usize,
}

/// Task factory recording every start and stop in a shared ledger
#[derive(Default)]
pub struct RecordingFactory {
    pub ledger: Arc<Mutex<TaskLedger>>,
    failing_sources: Mutex<HashSet<PathBuf>>,
    failing_groups: Mutex<HashSet<String>>,
    start_gates: Arc<Mutex<HashMap<PathBuf, oneshot::Receiver<()>>>>,
}

impl RecordingFactory {
    /// Starting a definition with this source path fails
    pub fn fail_start_of(&self, source: &str) {
        self.failing_sources
            .lock()
            .unwrap()
            .insert(PathBuf::from(source));
    }

    /// Creating a task for this group fails
    pub fn fail_create_of(&self, group: &str) {
        self.failing_groups
            .lock()
            .unwrap()
            .insert(group.to_string());
    }

    /// The next start of a definition with this source path waits until
    /// the returned sender fires
    pub fn hold_start_of(&self, source: &str) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.start_gates
            .lock()
            .unwrap()
            .insert(PathBuf::from(source), gate);
        release
    }

    pub fn held_starts(&self) -> usize {
        self.ledger.lock().unwrap().held
    }

    pub fn running(&self) -> Vec<String> {
        let mut running: Vec<String> = self.ledger.lock().unwrap().running.iter().cloned().collect();
        running.sort();
        running
    }

    pub fn running_count(&self) -> usize {
        self.ledger.lock().unwrap().running.len()
    }

    pub fn duplicates(&self) -> usize {
        self.ledger.lock().unwrap().duplicates
    }
}

struct RecordingTask {
    id: String,
    ledger: Arc<Mutex<TaskLedger>>,
    failing_sources: HashSet<PathBuf>,
    start_gates: Arc<Mutex<HashMap<PathBuf, oneshot::Receiver<()>>>>,
    log: LogSender,
}

impl RecordingTask {
    fn identity(&self, sync: &SyncDefinition) -> String {
        format!("{}/{}", self.id, sync.name)
    }
}

#[async_trait]
impl SyncTask for RecordingTask {
    async fn start(&self, sync: &SyncDefinition) -> Result<()> {
        if self.failing_sources.contains(&sync.source_path) {
            anyhow::bail!("cannot open {}", sync.source_path.display());
        }
        let gate = self.start_gates.lock().unwrap().remove(&sync.source_path);
        if let Some(gate) = gate {
            self.ledger.lock().unwrap().held += 1;
            let _ = gate.await;
            self.ledger.lock().unwrap().held -= 1;
        }
        tokio::task::yield_now().await;

        let identity = self.identity(sync);
        {
            let mut ledger = self.ledger.lock().unwrap();
            ledger.starts += 1;
            if !ledger.running.insert(identity.clone()) {
                ledger.duplicates += 1;
            }
        }
        self.log.send(LogEvent::fsync("start", serde_json::json!(identity)));
        Ok(())
    }

    async fn stop(&self, sync: &SyncDefinition) -> Result<()> {
        tokio::task::yield_now().await;

        let identity = self.identity(sync);
        {
            let mut ledger = self.ledger.lock().unwrap();
            ledger.stops += 1;
            ledger.running.remove(&identity);
        }
        self.log.send(LogEvent::fsync("stop", serde_json::json!(identity)));
        Ok(())
    }

    async fn dispose(&self) {
        self.ledger.lock().unwrap().disposed += 1;
    }
}

impl SyncTaskFactory for RecordingFactory {
    fn create(&self, config_path: &Path, group: &GroupSpec, log: LogSender) -> Result<Box<dyn SyncTask>> {
        if self.failing_groups.lock().unwrap().contains(&group.name) {
            anyhow::bail!("no engine for group {}", group.name);
        }

        Ok(Box::new(RecordingTask {
            id: format!("{}#{}", config_path.display(), group.name),
            ledger: self.ledger.clone(),
            failing_sources: self.failing_sources.lock().unwrap().clone(),
            start_gates: self.start_gates.clone(),
            log,
        }))
    }
}

/// Multi-select prompt answering from a script, optionally held open
#[derive(Default)]
pub struct ScriptedPicker {
    answers: Mutex<VecDeque<Option<Vec<usize>>>>,
    pub shown: Mutex<Vec<Vec<PickItem>>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl ScriptedPicker {
    pub fn answer(&self, answer: Option<Vec<usize>>) {
        self.answers.lock().unwrap().push_back(answer);
    }

    /// Keep the next prompt open until the returned sender fires
    pub fn hold(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(gate);
        release
    }

    pub fn times_shown(&self) -> usize {
        self.shown.lock().unwrap().len()
    }
}

#[async_trait]
impl MultiSelectPrompt for ScriptedPicker {
    async fn pick_many(&self, _placeholder: &str, items: &[PickItem]) -> Result<Option<Vec<usize>>> {
        self.shown.lock().unwrap().push(items.to_vec());

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        Ok(self.answers.lock().unwrap().pop_front().flatten())
    }
}

/// Single-choice prompt answering from a script
#[derive(Default)]
pub struct ScriptedChooser {
    answers: Mutex<VecDeque<Option<usize>>>,
    pub shown: Mutex<Vec<Vec<String>>>,
}

impl ScriptedChooser {
    pub fn answer(&self, answer: Option<usize>) {
        self.answers.lock().unwrap().push_back(answer);
    }
}

#[async_trait]
impl SingleChoicePrompt for ScriptedChooser {
    async fn pick_one(&self, _placeholder: &str, items: &[String]) -> Result<Option<usize>> {
        self.shown.lock().unwrap().push(items.to_vec());
        Ok(self.answers.lock().unwrap().pop_front().flatten())
    }
}

/// Log sink keeping every line and status update
#[derive(Default)]
pub struct VecSink {
    pub lines: Mutex<Vec<String>>,
    pub statuses: Mutex<Vec<(String, bool)>>,
}

impl VecSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().unwrap().iter().any(|line| line.contains(needle))
    }
}

impl LogSink for VecSink {
    fn append_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn set_status(&self, status: &StatusProjection, visible: bool) {
        self.statuses.lock().unwrap().push((status.text(), visible));
    }
}

/// Every fake wired together
pub struct Fixture {
    pub fs: Arc<MemoryFs>,
    pub tasks: Arc<RecordingFactory>,
    pub picker: Arc<ScriptedPicker>,
    pub chooser: Arc<ScriptedChooser>,
    pub events: Arc<Mutex<Vec<LogEvent>>>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            fs: Arc::new(MemoryFs::default()),
            tasks: Arc::new(RecordingFactory::default()),
            picker: Arc::new(ScriptedPicker::default()),
            chooser: Arc::new(ScriptedChooser::default()),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            reader: self.fs.clone(),
            discovery: self.fs.clone(),
            tasks: self.tasks.clone(),
            picker: self.picker.clone(),
            chooser: self.chooser.clone(),
        }
    }

    /// Controller logging into `self.events`
    pub fn controller(&self) -> LifecycleController {
        let events = self.events.clone();
        let log = LogSender::new(move |event| events.lock().unwrap().push(event));
        LifecycleController::new(self.services(), log)
    }

    pub fn actions(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| format!("{} {}", event.kind, event.action))
            .collect()
    }
}

/// One group holding one sync definition
pub fn single_sync_config(group: &str, src: &str, active: bool) -> String {
    serde_json::json!({
        "configs": [
            { "name": group, "sync": { "src": src, "dest": format!("{}-copy", src), "active": active } }
        ]
    })
    .to_string()
}

/// Two groups of one definition each
pub fn two_group_config(first_active: bool, second_active: bool) -> String {
    serde_json::json!({
        "configs": [
            { "name": "assets", "sync": { "src": "/src/assets", "active": first_active } },
            { "name": "docs", "sync": [ { "src": "/src/docs", "active": second_active } ] }
        ]
    })
    .to_string()
}

/// Poll `condition` until it holds, failing the test after a second
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
