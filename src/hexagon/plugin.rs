//! Plugin identity, state, and lifecycle hooks.
//!
//! A plugin is a named, versioned component with declared dependencies and a
//! lifecycle (`init` → `start` → `stop`). The framework stores one
//! [`PluginInstance`] per registered plugin: the plugin object itself plus
//! its current state, config snapshot, and timestamps.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Opaque configuration mapping handed to plugin `init` hooks.
pub type ConfigMap = HashMap<String, Value>;

/// The categories a plugin can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    Provider,
    Tool,
    Memory,
    Retriever,
    Evaluator,
    Agent,
    Middleware,
    Extension,
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginType::Provider => "provider",
            PluginType::Tool => "tool",
            PluginType::Memory => "memory",
            PluginType::Retriever => "retriever",
            PluginType::Evaluator => "evaluator",
            PluginType::Agent => "agent",
            PluginType::Middleware => "middleware",
            PluginType::Extension => "extension",
        };
        f.write_str(s)
    }
}

/// The lifecycle states a plugin instance moves through.
///
/// ```text
/// Loaded ──init──▶ Initialized ──start──▶ Running
///                      ▲                    │
///                      │                   stop
///                      └────────────────────┤
///                                           ▼
///                                       Stopped
///   any hook failure → Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Unloaded,
    Loaded,
    Initialized,
    Running,
    Stopped,
    Error,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginState::Unloaded => "unloaded",
            PluginState::Loaded => "loaded",
            PluginState::Initialized => "initialized",
            PluginState::Running => "running",
            PluginState::Stopped => "stopped",
            PluginState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Result of a health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded { message: String },
    Unhealthy { message: String },
    /// Reported for plugins that are not running; carries a diagnostic.
    Unknown { message: String },
}

impl HealthStatus {
    pub fn healthy() -> Self {
        HealthStatus::Healthy
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Static identity of a plugin: name, version, type, dependencies, tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    #[serde(default)]
    pub description: String,
    /// Names of other plugins this one requires to be running first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PluginDescriptor {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        plugin_type: PluginType,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            plugin_type,
            description: String::new(),
            dependencies: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Lifecycle hooks implemented by a concrete plugin.
///
/// The registry owns plugin objects behind `Arc<dyn Plugin>`. Hooks are
/// invoked by the [`Lifecycle`](crate::lifecycle::Lifecycle), never directly
/// by applications; state bookkeeping lives in the registry, not here.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The static identity of this plugin.
    fn descriptor(&self) -> PluginDescriptor;

    /// Prepare the plugin with its configuration. Called once per transition
    /// from `Loaded` (or during hot reload with a fresh config).
    async fn init(&self, _config: &ConfigMap) -> Result<()> {
        Ok(())
    }

    /// Begin doing work. Only called after every declared dependency is
    /// running.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Stop doing work. Only called while running and free of dependents.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Health probe polled by the surveillance ticker while running.
    async fn health(&self) -> HealthStatus {
        HealthStatus::healthy()
    }
}

/// A registered plugin paired with its runtime bookkeeping.
pub struct PluginInstance {
    pub plugin: Arc<dyn Plugin>,
    pub descriptor: PluginDescriptor,
    pub state: PluginState,
    pub config: ConfigMap,
    pub loaded_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Text of the most recent hook failure, if any.
    pub last_error: Option<String>,
}

impl PluginInstance {
    pub fn new(plugin: Arc<dyn Plugin>) -> Self {
        let descriptor = plugin.descriptor();
        Self {
            plugin,
            descriptor,
            state: PluginState::Loaded,
            config: ConfigMap::new(),
            loaded_at: Utc::now(),
            started_at: None,
            last_error: None,
        }
    }

    /// Defensive copy of the bookkeeping fields, without the plugin object.
    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            descriptor: self.descriptor.clone(),
            state: self.state,
            config: self.config.clone(),
            loaded_at: self.loaded_at,
            started_at: self.started_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// Cloneable view of a [`PluginInstance`] returned by registry queries.
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    pub descriptor: PluginDescriptor,
    pub state: PluginState,
    pub config: ConfigMap,
    pub loaded_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Zero-argument constructor registered under a name, used to instantiate
/// plugins on demand.
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;
