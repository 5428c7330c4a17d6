//! Plugin lifecycle: ordered state transitions, batch operations, and
//! health surveillance.
//!
//! The lifecycle enforces the state machine for each plugin:
//!
//! ```text
//! Loaded ──init──▶ Initialized ──start──▶ Running
//!                      ▲                    │
//!                      │                   stop
//!                      └────────────────────┤
//!                                           ▼
//!                                       Stopped
//!   any hook failure → Error
//! ```
//!
//! Transitions are serialized per plugin; the registry performs the actual
//! bookkeeping via its internal setters. The lifecycle additionally owns the
//! `start_order` list (under its own lock, distinct from the registry's)
//! which [`Lifecycle::stop_all`] walks in reverse.

use crate::dependency_graph::{Dependency, DependencyGraph, GraphNode};
use crate::error::{Error, Result};
use crate::event::PluginEvent;
use crate::plugin::{ConfigMap, HealthStatus, PluginState};
use crate::registry::PluginRegistry;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Drives plugins through their state machine.
pub struct Lifecycle {
    registry: Arc<PluginRegistry>,
    /// Names in the order they were started; guarded independently of the
    /// registry's lock.
    start_order: Mutex<Vec<String>>,
}

impl Lifecycle {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            start_order: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Initialize a plugin with its configuration.
    ///
    /// Requires state `Loaded`. On success the config snapshot is recorded
    /// and the plugin transitions to `Initialized`; on hook failure the
    /// plugin lands in `Error` and the hook's error is returned.
    pub async fn init(&self, name: &str, config: ConfigMap) -> Result<()> {
        let instance = self
            .registry
            .get_instance(name)
            .await
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if instance.state != PluginState::Loaded {
            return Err(Error::WrongState {
                name: name.to_string(),
                state: instance.state.to_string(),
                expected: "loaded".to_string(),
            });
        }

        let plugin = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if let Err(err) = plugin.init(&config).await {
            self.registry
                .set_last_error(name, Some(err.to_string()))
                .await;
            self.registry.set_state(name, PluginState::Error).await?;
            return Err(err);
        }

        self.registry.set_config(name, config).await?;
        self.registry.set_last_error(name, None).await;
        self.registry
            .set_state(name, PluginState::Initialized)
            .await?;
        info!("plugin '{}' initialized", name);
        Ok(())
    }

    /// Start a plugin.
    ///
    /// Requires state `Initialized` or `Stopped`, and every declared
    /// dependency to be `Running` (fails with
    /// [`Error::DependencyNotReady`] otherwise). On success the plugin is
    /// appended to the start order.
    pub async fn start(&self, name: &str) -> Result<()> {
        let instance = self
            .registry
            .get_instance(name)
            .await
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        match instance.state {
            PluginState::Initialized | PluginState::Stopped => {}
            other => {
                return Err(Error::WrongState {
                    name: name.to_string(),
                    state: other.to_string(),
                    expected: "initialized or stopped".to_string(),
                });
            }
        }

        for dependency in &instance.descriptor.dependencies {
            let ready = self
                .registry
                .get_instance(dependency)
                .await
                .map(|dep| dep.state == PluginState::Running)
                .unwrap_or(false);
            if !ready {
                return Err(Error::DependencyNotReady {
                    name: name.to_string(),
                    dependency: dependency.clone(),
                });
            }
        }

        let plugin = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if let Err(err) = plugin.start().await {
            self.registry
                .set_last_error(name, Some(err.to_string()))
                .await;
            self.registry.set_state(name, PluginState::Error).await?;
            return Err(err);
        }

        self.registry.set_last_error(name, None).await;
        self.registry.set_state(name, PluginState::Running).await?;
        let mut order = self.start_order.lock().await;
        order.retain(|n| n != name);
        order.push(name.to_string());
        info!("plugin '{}' started", name);
        Ok(())
    }

    /// Stop a plugin.
    ///
    /// Requires state `Running`, and fails with [`Error::HasDependents`]
    /// while any running plugin declares this one as a dependency.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let instance = self
            .registry
            .get_instance(name)
            .await
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if instance.state != PluginState::Running {
            return Err(Error::WrongState {
                name: name.to_string(),
                state: instance.state.to_string(),
                expected: "running".to_string(),
            });
        }

        let dependents: Vec<String> = self
            .registry
            .list_by_state(PluginState::Running)
            .await
            .into_iter()
            .filter(|other| {
                other
                    .descriptor
                    .dependencies
                    .iter()
                    .any(|dep| dep == name)
            })
            .map(|other| other.descriptor.name)
            .collect();
        if !dependents.is_empty() {
            return Err(Error::HasDependents {
                name: name.to_string(),
                dependents,
            });
        }

        let plugin = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if let Err(err) = plugin.stop().await {
            self.registry
                .set_last_error(name, Some(err.to_string()))
                .await;
            self.registry.set_state(name, PluginState::Error).await?;
            return Err(err);
        }

        self.registry.set_state(name, PluginState::Stopped).await?;
        info!("plugin '{}' stopped", name);
        Ok(())
    }

    /// Stop-then-start.
    ///
    /// A plugin in `Error` skips the stop hook and moves straight to
    /// `Stopped` first — the only exit an errored plugin has besides
    /// unregistering.
    pub async fn restart(&self, name: &str) -> Result<()> {
        let instance = self
            .registry
            .get_instance(name)
            .await
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if instance.state == PluginState::Error {
            self.registry.set_state(name, PluginState::Stopped).await?;
        } else {
            self.stop(name).await?;
        }
        self.start(name).await
    }

    /// Initialize every `Loaded` plugin, taking each one's config from
    /// `configs` (absent entries get an empty config). Aborts on the first
    /// failure.
    pub async fn init_all(&self, configs: &HashMap<String, ConfigMap>) -> Result<()> {
        for snapshot in self.registry.list_by_state(PluginState::Loaded).await {
            let name = snapshot.descriptor.name;
            let config = configs.get(&name).cloned().unwrap_or_default();
            self.init(&name, config).await?;
        }
        Ok(())
    }

    /// Start every pending plugin in dependency order. Aborts on the first
    /// failure.
    pub async fn start_all(&self) -> Result<()> {
        let order = self.dependency_order().await?;
        for name in order {
            let state = self
                .registry
                .get_instance(&name)
                .await
                .map(|i| i.state)
                .ok_or_else(|| Error::NotFound(name.clone()))?;
            if matches!(state, PluginState::Initialized | PluginState::Stopped) {
                self.start(&name).await?;
            }
        }
        Ok(())
    }

    /// Stop every running plugin in reverse start order.
    ///
    /// Best-effort by contract: individual failures are collected and
    /// returned joined as [`Error::Aggregate`] so that shutdown always runs
    /// to completion.
    pub async fn stop_all(&self) -> Result<()> {
        let order: Vec<String> = {
            let order = self.start_order.lock().await;
            order.iter().rev().cloned().collect()
        };

        let mut errors = Vec::new();
        for name in order {
            let running = self
                .registry
                .get_instance(&name)
                .await
                .map(|i| i.state == PluginState::Running)
                .unwrap_or(false);
            if !running {
                continue;
            }
            if let Err(err) = self.stop(&name).await {
                warn!("stop_all: '{}' failed: {}", name, err);
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate {
                context: "stop_all".to_string(),
                errors,
            })
        }
    }

    /// The start order computed from every registered plugin's declared
    /// dependencies.
    pub async fn dependency_order(&self) -> Result<Vec<String>> {
        let mut graph = DependencyGraph::new();
        for snapshot in self.registry.list().await {
            let mut node = GraphNode::new(
                snapshot.descriptor.name.clone(),
                snapshot.descriptor.version.clone(),
            );
            for dep in &snapshot.descriptor.dependencies {
                node = node.with_dependency(Dependency::required(dep.clone()));
            }
            graph.add_node(node);
        }
        graph.topological_order()
    }
}

/// Default polling interval for [`HealthChecker`].
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically polls every running plugin's health probe.
///
/// Non-running plugins report [`HealthStatus::Unknown`] with a diagnostic
/// message. The ticker stops on either the caller's cancellation token or
/// the one-shot [`HealthChecker::stop`] — which is safe to call any number
/// of times from any number of tasks; only the first call closes the
/// channel.
pub struct HealthChecker {
    registry: Arc<PluginRegistry>,
    interval: Duration,
    stop_tx: StdMutex<Option<oneshot::Sender<()>>>,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl HealthChecker {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            interval: DEFAULT_HEALTH_INTERVAL,
            stop_tx: StdMutex::new(None),
            handle: StdMutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Begin surveillance on a background task.
    pub fn start(&self, token: CancellationToken) {
        let (tx, mut rx) = oneshot::channel::<()>();
        *self.stop_tx.lock().expect("stop_tx lock") = Some(tx);

        let registry = self.registry.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it so the first
            // probe happens one interval after start.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::poll(&registry).await;
                    }
                    _ = &mut rx => break,
                    _ = token.cancelled() => break,
                }
            }
        });
        *self.handle.lock().expect("handle lock") = Some(handle);
    }

    /// Probe every plugin once, emitting a [`PluginEvent::HealthChecked`]
    /// per plugin, and return the results keyed by name.
    pub async fn check_now(&self) -> HashMap<String, HealthStatus> {
        Self::poll(&self.registry).await
    }

    async fn poll(registry: &Arc<PluginRegistry>) -> HashMap<String, HealthStatus> {
        let mut results = HashMap::new();
        for snapshot in registry.list().await {
            let name = snapshot.descriptor.name.clone();
            let status = if snapshot.state == PluginState::Running {
                match registry.get(&name).await {
                    Some(plugin) => plugin.health().await,
                    None => HealthStatus::Unknown {
                        message: "plugin disappeared during poll".to_string(),
                    },
                }
            } else {
                HealthStatus::Unknown {
                    message: format!("plugin is {}, not running", snapshot.state),
                }
            };
            registry
                .emit(PluginEvent::HealthChecked {
                    name: name.clone(),
                    status: status.clone(),
                })
                .await;
            results.insert(name, status);
        }
        results
    }

    /// Signal the ticker to stop. Idempotent under concurrent callers: the
    /// sender is taken out of its slot exactly once.
    pub fn stop(&self) {
        let sender = self.stop_tx.lock().expect("stop_tx lock").take();
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.lock().expect("handle lock").take() {
            handle.abort();
        }
    }
}
