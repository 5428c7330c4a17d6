//! Hot reload: config file watching with atomic apply and rollback.
//!
//! The manager polls a set of `(plugin, config path)` pairs for mtime
//! changes. When a file changes it re-reads the YAML config and applies it
//! with a snapshot/stop/apply/restore sequence, so a bad config never leaves
//! a previously healthy plugin wedged. Successful reloads append to a
//! bounded per-plugin version history that [`HotReloadManager::rollback_to_version`]
//! can restore.

use crate::error::{Error, Result};
use crate::event::PluginEvent;
use crate::fingerprint::fingerprint_value;
use crate::lifecycle::Lifecycle;
use crate::plugin::{ConfigMap, PluginState};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Default polling interval for config watches.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// Bounded length of each plugin's version history; older entries are
/// evicted first-in-first-out.
pub const MAX_VERSION_HISTORY: usize = 10;

/// When a detected change is applied.
#[derive(Debug, Clone)]
pub enum UpdateStrategy {
    /// Apply as soon as the change is detected.
    Immediate,
    /// Wait a grace period before applying; a canceled token aborts the wait.
    Graceful { grace: Duration },
    /// Wait until a target wall-clock time before applying.
    Scheduled { at: DateTime<Utc> },
}

/// One entry in a plugin's reload history.
#[derive(Debug, Clone)]
pub struct PluginVersion {
    /// Timestamp-derived version label.
    pub version: String,
    pub loaded_at: DateTime<Utc>,
    pub config: ConfigMap,
    /// Fingerprint of the config, for change comparison.
    pub hash: String,
}

struct WatchEntry {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

/// Watch set, history, and running flag share one lock.
#[derive(Default)]
struct WatchState {
    watches: HashMap<String, WatchEntry>,
    history: HashMap<String, Vec<PluginVersion>>,
    running: bool,
}

/// Watches config files and drives lifecycle transitions on change.
pub struct HotReloadManager {
    lifecycle: Arc<Lifecycle>,
    state: Arc<Mutex<WatchState>>,
    interval: Duration,
    strategy: UpdateStrategy,
}

impl HotReloadManager {
    pub fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            lifecycle,
            state: Arc::new(Mutex::new(WatchState::default())),
            interval: DEFAULT_WATCH_INTERVAL,
            strategy: UpdateStrategy::Immediate,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_strategy(mut self, strategy: UpdateStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Watch `path` for changes affecting `name`. The current mtime becomes
    /// the baseline; the first poll only fires after a subsequent change.
    pub async fn watch(&self, name: impl Into<String>, path: impl Into<PathBuf>) {
        let path = path.into();
        let last_modified = modification_time(&path).await;
        self.state.lock().await.watches.insert(
            name.into(),
            WatchEntry {
                path,
                last_modified,
            },
        );
    }

    pub async fn unwatch(&self, name: &str) {
        self.state.lock().await.watches.remove(name);
    }

    /// Start the polling loop on a background task. Returns immediately; the
    /// loop ends when `token` is canceled or [`HotReloadManager::stop`] is
    /// called.
    pub async fn start(&self, token: CancellationToken) {
        {
            let mut state = self.state.lock().await;
            if state.running {
                return;
            }
            state.running = true;
        }

        let lifecycle = self.lifecycle.clone();
        let state = self.state.clone();
        let interval = self.interval;
        let strategy = self.strategy.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = token.cancelled() => break,
                }
                if !state.lock().await.running {
                    break;
                }
                if let Err(err) =
                    Self::poll_changes(&lifecycle, &state, &strategy, &token).await
                {
                    warn!("hot reload poll failed: {}", err);
                }
            }
        });
    }

    /// Clear the running flag; the loop exits at its next tick.
    pub async fn stop(&self) {
        self.state.lock().await.running = false;
    }

    /// One manual poll over the watch set, reloading every changed entry.
    pub async fn poll_once(&self, token: &CancellationToken) -> Result<()> {
        Self::poll_changes(&self.lifecycle, &self.state, &self.strategy, token).await
    }

    async fn poll_changes(
        lifecycle: &Arc<Lifecycle>,
        state: &Arc<Mutex<WatchState>>,
        strategy: &UpdateStrategy,
        token: &CancellationToken,
    ) -> Result<()> {
        // Collect changed entries under the lock, then reload outside it so
        // lifecycle calls never run while holding the watch lock.
        let mut changed: Vec<(String, PathBuf)> = Vec::new();
        {
            let mut guard = state.lock().await;
            for (name, entry) in guard.watches.iter_mut() {
                let current = modification_time(&entry.path).await;
                if current.is_some() && current != entry.last_modified {
                    entry.last_modified = current;
                    changed.push((name.clone(), entry.path.clone()));
                }
            }
        }

        let mut errors = Vec::new();
        for (name, path) in changed {
            let config = match read_config_file(&path).await {
                Ok(config) => config,
                Err(err) => {
                    warn!("skipping reload of '{}': {}", name, err);
                    errors.push(err);
                    continue;
                }
            };
            wait_for_strategy(strategy, token).await?;
            if let Err(err) = Self::reload(lifecycle, state, &name, config).await {
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate {
                context: "hot reload".to_string(),
                errors,
            })
        }
    }

    /// Apply a new config to a plugin with rollback on failure.
    ///
    /// Sequence: snapshot the current state and config; stop the plugin if
    /// it is running; re-invoke its init hook with the new config; restart
    /// if it was running. Any failure restores the previous config (and
    /// restarts if needed) before the error is returned.
    async fn reload(
        lifecycle: &Arc<Lifecycle>,
        state: &Arc<Mutex<WatchState>>,
        name: &str,
        new_config: ConfigMap,
    ) -> Result<()> {
        let registry = lifecycle.registry().clone();
        registry
            .emit(PluginEvent::ReloadStarted {
                name: name.to_string(),
            })
            .await;

        let snapshot = registry
            .get_instance(name)
            .await
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let old_config = snapshot.config.clone();
        let was_running = snapshot.state == PluginState::Running;

        if was_running {
            lifecycle.stop(name).await?;
        }

        let plugin = registry
            .get(name)
            .await
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let apply = async {
            plugin.init(&new_config).await?;
            registry.set_config(name, new_config.clone()).await?;
            if was_running {
                lifecycle.start(name).await?;
            }
            Ok::<(), Error>(())
        };

        match apply.await {
            Ok(()) => {
                let version = Self::record_version(state, name, &new_config).await;
                info!("plugin '{}' reloaded as version {}", name, version);
                registry
                    .emit(PluginEvent::ReloadSucceeded {
                        name: name.to_string(),
                        version,
                    })
                    .await;
                Ok(())
            }
            Err(err) => {
                warn!("reload of '{}' failed, rolling back: {}", name, err);
                let restore = async {
                    plugin.init(&old_config).await?;
                    registry.set_config(name, old_config.clone()).await?;
                    if was_running {
                        lifecycle.start(name).await?;
                    }
                    Ok::<(), Error>(())
                };
                if let Err(restore_err) = restore.await {
                    registry
                        .set_last_error(name, Some(restore_err.to_string()))
                        .await;
                    registry.set_state(name, PluginState::Error).await?;
                }
                registry
                    .emit(PluginEvent::ReloadRolledBack {
                        name: name.to_string(),
                        error: err.to_string(),
                    })
                    .await;
                Err(err)
            }
        }
    }

    /// Apply a new config through the manager's own lifecycle reference.
    pub async fn apply(&self, name: &str, config: ConfigMap) -> Result<()> {
        Self::reload(&self.lifecycle, &self.state, name, config).await
    }

    async fn record_version(
        state: &Arc<Mutex<WatchState>>,
        name: &str,
        config: &ConfigMap,
    ) -> String {
        let now = Utc::now();
        let version = now.format("%Y%m%d%H%M%S%3f").to_string();
        let hash = fingerprint_value(&serde_json::json!(config));
        let entry = PluginVersion {
            version: version.clone(),
            loaded_at: now,
            config: config.clone(),
            hash,
        };
        let mut guard = state.lock().await;
        let history = guard.history.entry(name.to_string()).or_default();
        history.push(entry);
        while history.len() > MAX_VERSION_HISTORY {
            history.remove(0);
        }
        version
    }

    /// The recorded version history for a plugin, oldest first.
    pub async fn history(&self, name: &str) -> Vec<PluginVersion> {
        self.state
            .lock()
            .await
            .history
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Stop the plugin (when running) and re-initialize it with a historical
    /// config. The plugin is left stopped; callers restart it when ready.
    pub async fn rollback_to_version(&self, name: &str, version: &str) -> Result<()> {
        let config = {
            let guard = self.state.lock().await;
            guard
                .history
                .get(name)
                .and_then(|h| h.iter().find(|v| v.version == version))
                .map(|v| v.config.clone())
                .ok_or_else(|| Error::NotFound(format!("{}@{}", name, version)))?
        };

        let registry = self.lifecycle.registry().clone();
        let snapshot = registry
            .get_instance(name)
            .await
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if snapshot.state == PluginState::Running {
            self.lifecycle.stop(name).await?;
        }

        let plugin = registry
            .get(name)
            .await
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        plugin.init(&config).await?;
        registry.set_config(name, config).await?;
        info!("plugin '{}' rolled back to version {}", name, version);
        Ok(())
    }
}

/// Sleep out the configured strategy. Graceful waits abort with
/// [`Error::Canceled`] when the token fires; Scheduled waits saturate to
/// zero for instants in the past.
async fn wait_for_strategy(strategy: &UpdateStrategy, token: &CancellationToken) -> Result<()> {
    match strategy {
        UpdateStrategy::Immediate => Ok(()),
        UpdateStrategy::Graceful { grace } => {
            tokio::select! {
                _ = tokio::time::sleep(*grace) => Ok(()),
                _ = token.cancelled() => Err(Error::Canceled),
            }
        }
        UpdateStrategy::Scheduled { at } => {
            let wait = (*at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(wait) => Ok(()),
                _ = token.cancelled() => Err(Error::Canceled),
            }
        }
    }
}

async fn modification_time(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|meta| meta.modified().ok())
}

/// Read a YAML config file into a [`ConfigMap`].
async fn read_config_file(path: &Path) -> Result<ConfigMap> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
    serde_yaml::from_str(&text).map_err(|err| Error::Parse {
        what: path.display().to_string(),
        message: err.to_string(),
    })
}
