//! Plugin manifests and the plugins config file.
//!
//! A plugin ships a `plugin.yaml` manifest describing its identity, default
//! config, config schema, and lifecycle hook commands. Discovery scans a
//! list of search paths (default `./plugins`, `~/.hexagon/plugins`,
//! `/etc/hexagon/plugins`) for subdirectories containing a manifest.
//!
//! A deployment's `plugins:` config file selects which plugins to enable and
//! in which priority order they load.

use crate::error::{Error, Result};
use crate::plugin::{ConfigMap, PluginType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The `info:` section of a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestInfo {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// A parsed `plugin.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub info: ManifestInfo,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub config_schema: ConfigMap,
    /// Hook name to shell command, e.g. `post_install: ./setup.sh`.
    #[serde(default)]
    pub hooks: HashMap<String, String>,
}

impl PluginManifest {
    /// Parse a manifest from YAML text.
    pub fn parse(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|err| Error::Parse {
            what: "plugin manifest".to_string(),
            message: err.to_string(),
        })
    }

    /// Load a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|err| Error::Parse {
            what: path.display().to_string(),
            message: err.to_string(),
        })
    }
}

/// One entry of the `plugins:` config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfigEntry {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub priority: i32,
}

fn default_enabled() -> bool {
    true
}

/// The deployment-level plugins config.
///
/// # Example
///
/// ```rust
/// use hexagon::manifest::PluginsConfig;
///
/// let config = PluginsConfig::parse(
///     "plugins:\n  - name: cache\n    priority: 10\n  - name: search\n    enabled: false\n",
/// )
/// .unwrap();
/// let enabled = config.enabled_in_priority_order();
/// assert_eq!(enabled.len(), 1);
/// assert_eq!(enabled[0].name, "cache");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default)]
    pub plugins: Vec<PluginConfigEntry>,
}

impl PluginsConfig {
    pub fn parse(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|err| Error::Parse {
            what: "plugins config".to_string(),
            message: err.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Enabled entries sorted by ascending priority; disabled entries are
    /// skipped.
    pub fn enabled_in_priority_order(&self) -> Vec<PluginConfigEntry> {
        let mut enabled: Vec<PluginConfigEntry> = self
            .plugins
            .iter()
            .filter(|entry| entry.enabled)
            .cloned()
            .collect();
        enabled.sort_by_key(|entry| entry.priority);
        enabled
    }
}

/// Default manifest search paths: the working directory's `plugins`, the
/// user's `~/.hexagon/plugins`, and the system `/etc/hexagon/plugins`.
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("./plugins")];
    if let Ok(home) = std::env::var("HOME") {
        paths.push(Path::new(&home).join(".hexagon").join("plugins"));
    }
    paths.push(PathBuf::from("/etc/hexagon/plugins"));
    paths
}

/// Scan search paths for plugin directories.
///
/// Each immediate subdirectory containing a `plugin.yaml` yields one
/// `(directory, manifest)` pair. Missing search paths are skipped;
/// unparseable manifests surface as errors.
pub fn discover(search_paths: &[PathBuf]) -> Result<Vec<(PathBuf, PluginManifest)>> {
    let mut found = Vec::new();
    for root in search_paths {
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let manifest_path = dir.join("plugin.yaml");
            if manifest_path.is_file() {
                let manifest = PluginManifest::load(&manifest_path)?;
                found.push((dir, manifest));
            }
        }
    }
    found.sort_by(|a, b| a.1.info.name.cmp(&b.1.info.name));
    Ok(found)
}
