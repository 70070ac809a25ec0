//! FileSync - configuration discovery and lifecycle orchestration for file sync tasks
//!
//! FileSync finds `fsconfig.json` files inside a set of workspace folders,
//! keeps a registry of the sync groups they declare, and starts and stops one
//! sync task per group as files appear, change or disappear, or as the
//! operator asks for it.
//!
//! ## Core Features
//!
//! - **Discovery**: glob-based search for configuration files per workspace folder
//! - **Live Reload**: filesystem watching with teardown-before-rebuild reloads
//! - **Operator Commands**: start all, stop all, interactive toggle, template creation
//! - **Log Routing**: one ordered log stream plus a condensed status line
//!
//! ## Modules
//!
//! - [`orchestrator`]: the event channel and dispatch loop
//! - [`controller`]: lifecycle handlers and operator commands
//! - [`registry`]: loaded configuration files and their running tasks
//! - [`fsconfig`]: the on-disk configuration schema

pub mod controller;
pub mod discovery;
pub mod error;
pub mod fsconfig;
pub mod orchestrator;
pub mod prompt;
pub mod reader;
pub mod registry;
pub mod router;
pub mod settings;
pub mod task;
pub mod watcher;

pub use controller::{Command, LifecycleController, Services};
pub use discovery::{ConfigDiscovery, GlobDiscovery};
pub use error::FileSyncError;
pub use fsconfig::{ConfigFile, GroupSpec, SyncDefinition};
pub use orchestrator::{Orchestrator, OrchestratorEvent, OrchestratorHandle};
pub use registry::ConfigRegistry;
pub use router::{LogRouter, LogSink, TracingLogSink};
pub use settings::Settings;
pub use task::{LogEvent, LogSender, SyncTask, SyncTaskFactory};
