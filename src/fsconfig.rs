//! `fsconfig.json` schema
//!
//! A configuration file holds an ordered list of named sync groups. Each
//! group's `sync` field may be a single definition or an array of them; the
//! loader normalizes both shapes into one ordered `Vec<SyncDefinition>` so
//! nothing downstream branches on shape.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// File name the workspace watcher and discovery look for
pub const CONFIG_FILE_NAME: &str = "fsconfig.json";

/// Default glob used to find configuration files in workspace folders
pub const DEFAULT_CONFIG_PATTERN: &str = "**/fsconfig.json";

/// Parsed contents of one configuration file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Named sync groups, in file order
    pub configs: Vec<GroupSpec>,
}

/// A named collection of sync definitions ("config" in the file)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GroupSpec {
    pub name: String,

    #[serde(rename = "sync", deserialize_with = "one_or_many")]
    pub definitions: Vec<SyncDefinition>,
}

/// One source -> destination rule
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SyncDefinition {
    #[serde(rename = "src")]
    pub source_path: PathBuf,

    #[serde(rename = "dest", default)]
    pub destination_path: PathBuf,

    /// Start on load; afterwards mirrors whether the definition is running
    #[serde(default)]
    pub active: bool,

    #[serde(default)]
    pub name: String,

    /// Engine-specific settings the orchestrator passes through untouched
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<SyncDefinition>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(definition) => vec![definition],
        OneOrMany::Many(definitions) => definitions,
    })
}

impl ConfigFile {
    /// Parse raw file content and resolve paths relative to the file's directory
    pub fn parse(content: &[u8], path: &Path) -> serde_json::Result<Self> {
        let mut file: ConfigFile = serde_json::from_slice(content)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        file.normalize(base_dir);
        Ok(file)
    }

    fn normalize(&mut self, base_dir: &Path) {
        for group in &mut self.configs {
            for definition in &mut group.definitions {
                if definition.name.is_empty() {
                    definition.name = group.name.clone();
                }
                definition.source_path = resolve(base_dir, &definition.source_path);
                if !definition.destination_path.as_os_str().is_empty() {
                    definition.destination_path = resolve(base_dir, &definition.destination_path);
                }
            }
        }
    }

    /// Template written by the create-config command
    pub fn default_template() -> Self {
        let mut options = Map::new();
        options.insert("recursive".to_string(), Value::Bool(true));

        Self {
            configs: vec![GroupSpec {
                name: "example".to_string(),
                definitions: vec![SyncDefinition {
                    source_path: PathBuf::from("./src"),
                    destination_path: PathBuf::from("./backup"),
                    active: false,
                    name: "example sync".to_string(),
                    options,
                }],
            }],
        }
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
    let path = PathBuf::from(expanded);
    if path.is_absolute() {
        path_clean::clean(path)
    } else {
        path_clean::clean(base_dir.join(path))
    }
}

/// Write the default template into `folder`
///
/// Returns `None` when a configuration file already exists there; an existing
/// file is never overwritten.
pub async fn create_default_config_file(folder: &Path) -> Result<Option<PathBuf>> {
    let path = folder.join(CONFIG_FILE_NAME);

    if tokio::fs::try_exists(&path)
        .await
        .with_context(|| format!("Failed to inspect {}", path.display()))?
    {
        return Ok(None);
    }

    tokio::fs::create_dir_all(folder)
        .await
        .with_context(|| format!("Failed to create folder: {}", folder.display()))?;

    let content = serde_json::to_string_pretty(&ConfigFile::default_template())
        .context("Failed to serialize default configuration")?;

    tokio::fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    Ok(Some(path))
}

/// Shorten a path for display, abbreviating the home directory to `~`
pub fn fmt_path(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(rest) = path.strip_prefix(&home) {
            return Path::new("~").join(rest).display().to_string();
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_single_sync_object_is_normalized() {
        let json = br#"{
            "configs": [
                { "name": "site", "sync": { "src": "www", "dest": "/srv/www", "active": true } }
            ]
        }"#;

        let file = ConfigFile::parse(json, Path::new("/ws/a/fsconfig.json")).unwrap();

        assert_eq!(file.configs.len(), 1);
        let group = &file.configs[0];
        assert_eq!(group.definitions.len(), 1);
        assert_eq!(group.definitions[0].source_path, PathBuf::from("/ws/a/www"));
        assert_eq!(group.definitions[0].destination_path, PathBuf::from("/srv/www"));
        assert!(group.definitions[0].active);
        assert_eq!(group.definitions[0].name, "site");
    }

    #[test]
    fn test_sync_array_keeps_order_and_options() {
        let json = br#"{
            "configs": [
                {
                    "name": "docs",
                    "sync": [
                        { "src": "./one", "active": false, "name": "first", "filter": "*.md" },
                        { "src": "../two", "dest": "out", "active": true }
                    ]
                }
            ]
        }"#;

        let file = ConfigFile::parse(json, Path::new("/ws/b/fsconfig.json")).unwrap();
        let defs = &file.configs[0].definitions;

        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "first");
        assert_eq!(defs[0].source_path, PathBuf::from("/ws/b/one"));
        assert!(defs[0].destination_path.as_os_str().is_empty());
        assert_eq!(defs[0].options.get("filter"), Some(&Value::from("*.md")));
        assert_eq!(defs[1].source_path, PathBuf::from("/ws/two"));
        assert_eq!(defs[1].destination_path, PathBuf::from("/ws/b/out"));
    }

    #[test]
    fn test_missing_src_is_rejected() {
        let json = br#"{ "configs": [ { "name": "bad", "sync": { "active": true } } ] }"#;
        assert!(ConfigFile::parse(json, Path::new("/ws/fsconfig.json")).is_err());
    }

    #[test]
    fn test_missing_configs_is_rejected() {
        assert!(ConfigFile::parse(b"{}", Path::new("/ws/fsconfig.json")).is_err());
        assert!(ConfigFile::parse(b"not json", Path::new("/ws/fsconfig.json")).is_err());
    }

    #[tokio::test]
    async fn test_create_default_config_file_does_not_overwrite() {
        let temp_dir = TempDir::new().unwrap();

        let created = create_default_config_file(temp_dir.path()).await.unwrap();
        let path = created.expect("template should be written");
        assert_eq!(path, temp_dir.path().join(CONFIG_FILE_NAME));

        let content = std::fs::read(&path).unwrap();
        let parsed = ConfigFile::parse(&content, &path).unwrap();
        assert_eq!(parsed.configs[0].name, "example");
        assert!(!parsed.configs[0].definitions[0].active);

        std::fs::write(&path, "{\"configs\": []}").unwrap();
        let second = create_default_config_file(temp_dir.path()).await.unwrap();
        assert!(second.is_none());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"configs\": []}");
    }
}
