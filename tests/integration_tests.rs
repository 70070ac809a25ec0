use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use std::process::Command;

/// Integration tests for the filesync CLI
/// These tests run the built binary against temporary folders

fn filesync() -> Command {
    Command::new(env!("CARGO_BIN_EXE_filesync"))
}

/// Settings file inside `temp_dir` so tests never touch the user's config
fn settings_file(temp_dir: &TempDir) -> assert_fs::fixture::ChildPath {
    let settings = temp_dir.child("settings.yml");
    settings
        .write_str("show_status_bar_info: true\nconfig_pattern: \"**/fsconfig.json\"\n")
        .unwrap();
    settings
}

#[test]
fn test_cli_help() {
    let output = filesync().arg("--help").output().expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("run"));
    assert!(stdout.contains("list"));
    assert!(stdout.contains("init"));
}

#[test]
fn test_cli_version() {
    let output = filesync().arg("--version").output().expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("filesync"));
}

#[test]
fn test_init_writes_template_once() {
    let temp_dir = TempDir::new().unwrap();
    let settings = settings_file(&temp_dir);
    let project = temp_dir.child("project");

    let output = filesync()
        .arg("--config")
        .arg(settings.path())
        .arg("init")
        .arg(project.path())
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let config = project.child("fsconfig.json");
    config.assert(predicate::path::is_file());
    config.assert(predicate::str::contains("\"configs\""));

    config.write_str("{\"configs\": []}").unwrap();
    let output = filesync()
        .arg("--config")
        .arg(settings.path())
        .arg("init")
        .arg(project.path())
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("left untouched"));
    config.assert("{\"configs\": []}");
}

#[test]
fn test_list_shows_discovered_configs() {
    let temp_dir = TempDir::new().unwrap();
    let settings = settings_file(&temp_dir);
    let workspace = temp_dir.child("ws");
    workspace
        .child("site/fsconfig.json")
        .write_str(r#"{"configs": [{"name": "assets", "sync": {"src": "./public", "dest": "/srv/www", "active": true}}]}"#)
        .unwrap();
    workspace
        .child("broken/fsconfig.json")
        .write_str("{ not json")
        .unwrap();

    let output = filesync()
        .arg("--config")
        .arg(settings.path())
        .arg("list")
        .arg("-w")
        .arg(workspace.path())
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Config files (2)"));
    assert!(stdout.contains("assets"));
    assert!(stdout.contains("/srv/www"));
    assert!(stdout.contains("failed to load"));
}

#[test]
fn test_invalid_command() {
    let output = filesync()
        .arg("invalid-command")
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unrecognized subcommand") || stderr.contains("error"));
}

#[test]
fn test_error_handling_invalid_settings() {
    let temp_dir = TempDir::new().unwrap();
    let settings = temp_dir.child("invalid-settings.yml");
    settings.write_str("show_status_bar_info: [not, a, bool]\n").unwrap();

    let output = filesync()
        .arg("--config")
        .arg(settings.path())
        .arg("list")
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to parse settings file"));
}
