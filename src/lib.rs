// src/lib.rs

// Import the top-level `hexagon` module.
pub mod hexagon;

// If you want to provide direct access (without having to navigate through the whole hierarchy) to certain types or functionalities at the crate level, you can use re-exports:

// Re-exporting every subsystem module at the crate root.
pub use hexagon::{
    chain, citation, completer, dependency_graph, error, evaluation, event, fingerprint,
    hot_reload, lifecycle, manifest, mcp_transport, plan, planner, plugin, registry, replay,
    retriever, self_rag, synthesizer, tool, version,
};

// Re-exporting key items for easier external access.
pub use hexagon::error::{BoxError, Error, Result};
pub use hexagon::lifecycle::{HealthChecker, Lifecycle};
pub use hexagon::registry::PluginRegistry;
