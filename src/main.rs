use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use filesync::fsconfig::{create_default_config_file, fmt_path};
use filesync::prompt::TerminalPrompt;
use filesync::reader::{FileReader, TokioFileReader};
use filesync::settings::LoggingSettings;
use filesync::task::DryRunTaskFactory;
use filesync::watcher::{watch_file, NotifyConfigWatcher};
use filesync::{
    Command, ConfigDiscovery, ConfigFile, FileSyncError, GlobDiscovery, Orchestrator,
    OrchestratorHandle, Services, Settings, TracingLogSink,
};

#[derive(Parser)]
#[command(name = "filesync")]
#[command(about = "Discover fsconfig.json files and orchestrate their sync tasks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch workspace folders and run sync tasks until interrupted
    Run {
        /// Workspace folder (repeatable, defaults to settings or the current directory)
        #[arg(short, long = "workspace")]
        workspace: Vec<PathBuf>,
    },

    /// List configuration files found in the workspace folders
    List {
        /// Workspace folder (repeatable, defaults to settings or the current directory)
        #[arg(short, long = "workspace")]
        workspace: Vec<PathBuf>,
    },

    /// Write a template fsconfig.json into a folder
    Init {
        /// Target folder
        folder: PathBuf,
    },
}

fn main() -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let result = runtime.block_on(run_cli());
    // A prompt abandoned at shutdown can still be blocked reading the terminal
    runtime.shutdown_background();
    result
}

async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    let (settings, settings_path) = load_settings(cli.config)?;
    init_logging(cli.verbose, &settings.logging)?;
    info!("Starting FileSync v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run { workspace } => cmd_run(workspace, settings, settings_path).await,
        Commands::List { workspace } => cmd_list(workspace, &settings).await,
        Commands::Init { folder } => cmd_init(folder).await,
    }
}

/// Initialize logging based on verbosity level and settings
fn init_logging(verbose: bool, logging: &LoggingSettings) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(logging.color))
        .with(filter)
        .init();

    Ok(())
}

/// Load settings from specified path or default location
fn load_settings(settings_path: Option<PathBuf>) -> Result<(Settings, PathBuf)> {
    match settings_path {
        Some(path) => Ok((Settings::load(&path)?, path)),
        None => Ok((Settings::load_or_default()?, Settings::default_path()?)),
    }
}

/// Folders from the command line, else from settings, else the current directory
fn resolve_folders(workspace: Vec<PathBuf>, settings: &Settings) -> Result<Vec<PathBuf>> {
    let folders: Vec<PathBuf> = if !workspace.is_empty() {
        workspace
    } else if !settings.workspace_folders.is_empty() {
        settings.workspace_folders.iter().map(PathBuf::from).collect()
    } else {
        vec![PathBuf::from(".")]
    };

    folders.iter().map(|folder| absolute(folder)).collect()
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path_clean::clean(path));
    }
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    Ok(path_clean::clean(cwd.join(path)))
}

/// Activate, watch and serve operator commands until Ctrl-C or `quit`
async fn cmd_run(workspace: Vec<PathBuf>, settings: Settings, settings_path: PathBuf) -> Result<()> {
    let folders = resolve_folders(workspace, &settings)?;

    let prompt = Arc::new(TerminalPrompt);
    let services = Services {
        reader: Arc::new(TokioFileReader),
        discovery: Arc::new(GlobDiscovery),
        tasks: Arc::new(DryRunTaskFactory),
        picker: prompt.clone(),
        chooser: prompt,
    };

    let (orchestrator, events) = Orchestrator::new(services, Arc::new(TracingLogSink));
    let handle = orchestrator.handle();

    let watch_handle = handle.clone();
    let watcher = NotifyConfigWatcher::new(&settings.config_pattern, settings.debounce(), move |event| {
        watch_handle.watch_event(event);
    })?;
    orchestrator.attach_watcher(Box::new(watcher)).await;

    let settings_handle = handle.clone();
    let watched_settings = settings_path.clone();
    let _settings_guard = match watch_file(&settings_path, settings.debounce(), move || {
        match Settings::load(&watched_settings) {
            Ok(settings) => {
                settings_handle.settings_changed(settings);
            }
            Err(e) => warn!("Ignoring invalid settings: {:#}", e),
        }
    }) {
        Ok(guard) => Some(guard),
        Err(e) => {
            warn!("Settings changes will not be picked up: {:#}", e);
            None
        }
    };

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, deactivating");
            signal_handle.shutdown();
        }
    });

    // Plain thread: a blocked stdin read must not hold up runtime shutdown
    let command_handle = handle.clone();
    let command_folders = folders.clone();
    std::thread::spawn(move || read_commands(command_handle, command_folders));

    println!("🔄 Watching {} workspace folder(s)", folders.len());
    for folder in &folders {
        println!("   📁 {}", fmt_path(folder));
    }
    print_command_help();

    orchestrator.activate(settings, folders);
    orchestrator.run(events).await?;

    println!("✅ All sync tasks stopped");
    Ok(())
}

fn print_command_help() {
    println!("\nCommands:");
    for command in Command::ALL {
        println!("   {}", command);
    }
    println!("   addFolder <path>");
    println!("   removeFolder <path>");
    println!("   quit");
}

/// Operator command loop on stdin
///
/// Waits for each command to finish before reading the next line so an
/// interactive prompt owns the terminal while it is open.
fn read_commands(handle: OrchestratorHandle, mut folders: Vec<PathBuf>) {
    let stdin = std::io::stdin();

    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let line = line.trim();
        let (word, arg) = match line.split_once(char::is_whitespace) {
            Some((word, arg)) => (word, arg.trim()),
            None => (line, ""),
        };

        match word {
            "" => continue,
            "quit" | "exit" => {
                handle.shutdown();
                return;
            }
            "help" => print_command_help(),
            "addFolder" | "removeFolder" => {
                if arg.is_empty() {
                    println!("❌ {} needs a folder path", word);
                    continue;
                }
                let folder = match absolute(Path::new(arg)) {
                    Ok(folder) => folder,
                    Err(e) => {
                        println!("❌ {:#}", e);
                        continue;
                    }
                };
                if word == "addFolder" {
                    if !folders.contains(&folder) {
                        folders.push(folder);
                    }
                } else {
                    folders.retain(|f| f != &folder);
                }
                handle.workspace_folders_changed(folders.clone());
            }
            other => match other.parse::<Command>() {
                Ok(command) => {
                    let Some(finished) = handle.command_with_ack(command) else {
                        return;
                    };
                    let _ = finished.blocking_recv();
                }
                Err(e) => println!("❌ {}", e),
            },
        }
    }

    // stdin closed: keep running until Ctrl-C
    info!("Operator input closed");
}

/// List configuration files and the syncs they declare
async fn cmd_list(workspace: Vec<PathBuf>, settings: &Settings) -> Result<()> {
    let folders = resolve_folders(workspace, settings)?;

    println!("🔍 Discovering config files...");
    let paths = GlobDiscovery
        .discover(&folders, &settings.config_pattern)
        .await?;

    println!("Config files ({}):", paths.len());

    let reader = TokioFileReader;
    for path in paths {
        let parsed = match reader.read(&path).await {
            Ok(content) => {
                ConfigFile::parse(&content, &path).map_err(|e| FileSyncError::config_load(&path, e))
            }
            Err(e) => Err(FileSyncError::config_load(&path, e)),
        };

        match parsed {
            Ok(file) => {
                println!("📄 {}", fmt_path(&path));
                for group in &file.configs {
                    println!("   📁 {}", group.name);
                    for sync in &group.definitions {
                        let marker = if sync.active { "▶️ " } else { "⏸️ " };
                        println!(
                            "      {} {}: {} → {}",
                            marker,
                            sync.name,
                            fmt_path(&sync.source_path),
                            fmt_path(&sync.destination_path)
                        );
                    }
                }
            }
            Err(e) => println!("❌ {}", e),
        }
    }

    Ok(())
}

/// Write the default template into a folder
async fn cmd_init(folder: PathBuf) -> Result<()> {
    let folder = absolute(&folder)?;

    match create_default_config_file(&folder).await? {
        Some(path) => {
            println!("✅ Created {}", fmt_path(&path));
            println!("   Next: edit it and run 'filesync run -w {}'", fmt_path(&folder));
        }
        None => {
            println!("⚠️  {} already has a config file, left untouched", fmt_path(&folder));
        }
    }

    Ok(())
}
