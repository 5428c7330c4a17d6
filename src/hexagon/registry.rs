//! Thread-safe store of plugin instances, factories, and event sinks.
//!
//! The registry exclusively owns its [`PluginInstance`]s. Mutating
//! operations take the write half of a reader-writer lock; queries take the
//! read half and return defensive copies. State transition *rules* are not
//! enforced here — that is the [`Lifecycle`](crate::lifecycle::Lifecycle)'s
//! job, which drives the registry through [`PluginRegistry::set_state`].
//!
//! # Example
//!
//! ```rust,no_run
//! use hexagon::registry::PluginRegistry;
//! use hexagon::plugin::{Plugin, PluginDescriptor, PluginType};
//! use std::sync::Arc;
//!
//! struct Cache;
//!
//! impl Plugin for Cache {
//!     fn descriptor(&self) -> PluginDescriptor {
//!         PluginDescriptor::new("cache", "1.0.0", PluginType::Memory)
//!     }
//! }
//!
//! # async fn example() -> hexagon::Result<()> {
//! let registry = PluginRegistry::new();
//! registry.register(Arc::new(Cache)).await?;
//! assert!(registry.has("cache").await);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::event::{EventHandler, PluginEvent};
use crate::plugin::{
    ConfigMap, InstanceSnapshot, Plugin, PluginFactory, PluginInstance, PluginState, PluginType,
};
use chrono::Utc;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe plugin store. Cheap to share: clone the `Arc` around it.
#[derive(Default)]
pub struct PluginRegistry {
    instances: RwLock<HashMap<String, PluginInstance>>,
    factories: RwLock<HashMap<String, PluginFactory>>,
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Instances ─────────────────────────────────────────────────────────

    /// Admit a plugin in state `Loaded`.
    ///
    /// Fails with [`Error::Duplicate`] if a plugin of that name already
    /// exists. Emits [`PluginEvent::Loaded`].
    pub async fn register(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let instance = PluginInstance::new(plugin);
        let name = instance.descriptor.name.clone();
        {
            let mut instances = self.instances.write().await;
            if instances.contains_key(&name) {
                return Err(Error::Duplicate(name));
            }
            instances.insert(name.clone(), instance);
        }
        debug!("registered plugin '{}'", name);
        self.emit(PluginEvent::Loaded { name }).await;
        Ok(())
    }

    /// Remove a plugin from the registry.
    ///
    /// Fails with [`Error::WrongState`] while the plugin is `Running`.
    /// Emits [`PluginEvent::Unloaded`].
    pub async fn unregister(&self, name: &str) -> Result<()> {
        {
            let mut instances = self.instances.write().await;
            let instance = instances
                .get(name)
                .ok_or_else(|| Error::NotFound(name.to_string()))?;
            if instance.state == PluginState::Running {
                return Err(Error::WrongState {
                    name: name.to_string(),
                    state: instance.state.to_string(),
                    expected: "not running".to_string(),
                });
            }
            instances.remove(name);
        }
        debug!("unregistered plugin '{}'", name);
        self.emit(PluginEvent::Unloaded {
            name: name.to_string(),
        })
        .await;
        Ok(())
    }

    /// The plugin object itself, for invoking hooks.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.instances
            .read()
            .await
            .get(name)
            .map(|i| i.plugin.clone())
    }

    pub async fn has(&self, name: &str) -> bool {
        self.instances.read().await.contains_key(name)
    }

    /// Defensive copy of one instance's bookkeeping.
    pub async fn get_instance(&self, name: &str) -> Option<InstanceSnapshot> {
        self.instances
            .read()
            .await
            .get(name)
            .map(PluginInstance::snapshot)
    }

    /// Snapshots of all instances, sorted by name.
    pub async fn list(&self) -> Vec<InstanceSnapshot> {
        let instances = self.instances.read().await;
        let mut all: Vec<InstanceSnapshot> =
            instances.values().map(PluginInstance::snapshot).collect();
        all.sort_by(|a, b| a.descriptor.name.cmp(&b.descriptor.name));
        all
    }

    pub async fn list_by_type(&self, plugin_type: PluginType) -> Vec<InstanceSnapshot> {
        let mut all = self.list().await;
        all.retain(|i| i.descriptor.plugin_type == plugin_type);
        all
    }

    pub async fn list_by_state(&self, state: PluginState) -> Vec<InstanceSnapshot> {
        let mut all = self.list().await;
        all.retain(|i| i.state == state);
        all
    }

    pub async fn count(&self) -> usize {
        self.instances.read().await.len()
    }

    // ── Internal mutation, used by the lifecycle ──────────────────────────

    /// Set an instance's state without enforcing transition rules, emitting
    /// [`PluginEvent::StateChanged`]. The lifecycle validates transitions
    /// before calling this.
    pub(crate) async fn set_state(&self, name: &str, state: PluginState) -> Result<()> {
        let from = {
            let mut instances = self.instances.write().await;
            let instance = instances
                .get_mut(name)
                .ok_or_else(|| Error::NotFound(name.to_string()))?;
            let from = instance.state;
            instance.state = state;
            if state == PluginState::Running {
                instance.started_at = Some(Utc::now());
            }
            from
        };
        self.emit(PluginEvent::StateChanged {
            name: name.to_string(),
            from,
            to: state,
        })
        .await;
        Ok(())
    }

    /// Record the config snapshot applied by `init` or a hot reload.
    pub(crate) async fn set_config(&self, name: &str, config: ConfigMap) -> Result<()> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        instance.config = config;
        Ok(())
    }

    /// Record the most recent hook failure.
    pub(crate) async fn set_last_error(&self, name: &str, error: Option<String>) {
        if let Some(instance) = self.instances.write().await.get_mut(name) {
            instance.last_error = error;
        }
    }

    // ── Factories ─────────────────────────────────────────────────────────

    /// Register a zero-argument constructor under a name.
    pub async fn register_factory(&self, name: impl Into<String>, factory: PluginFactory) -> Result<()> {
        let name = name.into();
        let mut factories = self.factories.write().await;
        if factories.contains_key(&name) {
            return Err(Error::Duplicate(name));
        }
        factories.insert(name, factory);
        Ok(())
    }

    pub async fn unregister_factory(&self, name: &str) -> Result<()> {
        self.factories
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Instantiate from a factory and register the result.
    pub async fn create_from_factory(&self, name: &str) -> Result<()> {
        let factory = {
            let factories = self.factories.read().await;
            factories
                .get(name)
                .cloned()
                .ok_or_else(|| Error::NotFound(name.to_string()))?
        };
        self.register(factory()).await
    }

    /// Factory names, sorted.
    pub async fn list_factories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    // ── Events ────────────────────────────────────────────────────────────

    /// Subscribe a handler to every subsequent event.
    pub async fn on_event(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Fire one detached dispatch task per subscribed handler. Handlers are
    /// not joined; emission order across plugins is unspecified.
    pub(crate) async fn emit(&self, event: PluginEvent) {
        let handlers = self.handlers.read().await.clone();
        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move {
                handler.on_plugin_event(&event).await;
            });
        }
    }
}
