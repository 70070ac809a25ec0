//! Configuration file discovery
//!
//! Enumerates configuration files matching a glob pattern across the current
//! workspace folders. Discovery only ever feeds the load path; it never
//! removes registry entries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use glob::Pattern;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Source of configuration file paths
#[async_trait]
pub trait ConfigDiscovery: Send + Sync {
    /// Every file under `folders` matching `pattern`, sorted and deduplicated
    async fn discover(&self, folders: &[PathBuf], pattern: &str) -> Result<Vec<PathBuf>>;

    /// Provider name for display/logging
    fn provider_name(&self) -> &'static str;
}

/// Filesystem discovery backed by the `glob` crate
#[derive(Debug, Default, Clone)]
pub struct GlobDiscovery;

impl GlobDiscovery {
    fn scan(folders: &[PathBuf], pattern: &str) -> Result<Vec<PathBuf>> {
        let mut found = BTreeSet::new();

        for folder in folders {
            let full_pattern = folder.join(pattern);
            let pattern_str = full_pattern.to_string_lossy();

            let paths = glob::glob(&pattern_str)
                .with_context(|| format!("Invalid config pattern: {}", pattern_str))?;

            for entry in paths {
                match entry {
                    Ok(path) if path.is_file() => {
                        found.insert(path_clean::clean(path));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Skipping unreadable path during discovery: {}", e);
                    }
                }
            }
        }

        Ok(found.into_iter().collect())
    }
}

#[async_trait]
impl ConfigDiscovery for GlobDiscovery {
    async fn discover(&self, folders: &[PathBuf], pattern: &str) -> Result<Vec<PathBuf>> {
        let folders = folders.to_vec();
        let pattern = pattern.to_string();

        let found = tokio::task::spawn_blocking(move || Self::scan(&folders, &pattern))
            .await
            .context("Discovery task panicked")??;

        tracing::debug!("Discovered {} config files", found.len());
        Ok(found)
    }

    fn provider_name(&self) -> &'static str {
        "glob"
    }
}

/// Whether `path` lies in one of `folders` and matches `pattern` relative to it
pub fn matches_pattern(folders: &[PathBuf], path: &Path, pattern: &str) -> bool {
    let Ok(pattern) = Pattern::new(pattern) else {
        return false;
    };

    folders.iter().any(|folder| {
        path.strip_prefix(folder)
            .map(|relative| pattern.matches_path(relative))
            .unwrap_or(false)
    })
}
