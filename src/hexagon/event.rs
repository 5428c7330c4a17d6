//! Plugin and lifecycle event system.
//!
//! Provides a callback-based observability layer for the plugin runtime.
//! Implement [`EventHandler`] to receive real-time notifications about:
//!
//! - **Registration**: plugins loaded into and unloaded from the registry
//! - **Lifecycle**: every state transition, with the old and new state
//! - **Health**: results of periodic health surveillance
//! - **Hot reload**: reload attempts, successes, and rollbacks
//!
//! The handler is wrapped in `Arc<dyn EventHandler>` and shared with the
//! registry; every event fires one detached task per subscribed handler, so
//! handlers are expected to be non-blocking — the registry does not join
//! them.
//!
//! # Example
//!
//! ```rust
//! use hexagon::event::{EventHandler, PluginEvent};
//! use async_trait::async_trait;
//!
//! struct Logger;
//!
//! #[async_trait]
//! impl EventHandler for Logger {
//!     async fn on_plugin_event(&self, event: &PluginEvent) {
//!         match event {
//!             PluginEvent::StateChanged { name, from, to } => {
//!                 println!("{name}: {from} -> {to}");
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//! ```

use crate::plugin::{HealthStatus, PluginState};
use async_trait::async_trait;

/// Events emitted by the registry, lifecycle, and hot-reload manager.
///
/// Every variant carries the plugin `name` so handlers can identify the
/// source without external state.
#[derive(Debug, Clone)]
pub enum PluginEvent {
    // ── Registration ──────────────────────────────────────────────────────
    /// A plugin was admitted into the registry in state `Loaded`.
    Loaded { name: String },

    /// A plugin was removed from the registry.
    Unloaded { name: String },

    // ── Lifecycle ─────────────────────────────────────────────────────────
    /// A state transition completed (or, for `Error`, was recorded).
    StateChanged {
        name: String,
        from: PluginState,
        to: PluginState,
    },

    // ── Health ────────────────────────────────────────────────────────────
    /// One plugin's health probe result from the surveillance ticker.
    HealthChecked { name: String, status: HealthStatus },

    // ── Hot reload ────────────────────────────────────────────────────────
    /// A config change was detected and a reload attempt began.
    ReloadStarted { name: String },

    /// The reload applied cleanly; `version` names the new history entry.
    ReloadSucceeded { name: String, version: String },

    /// The reload failed and the previous config was restored.
    ReloadRolledBack { name: String, error: String },
}

/// Receives [`PluginEvent`]s. All methods have default no-op implementations
/// so implementors only override what they care about.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_plugin_event(&self, _event: &PluginEvent) {}
}
