//! Crate-wide error types.
//!
//! Every subsystem reports failures through [`Error`], grouped by kind:
//! validation errors (bad input detected at the boundary), state errors
//! (lifecycle preconditions violated), external errors (LLM/tool/retriever
//! failures wrapped with context), cancellation, replay misses, and
//! aggregate errors from best-effort batch operations.
//!
//! External collaborator traits ([`Completer`](crate::completer::Completer),
//! [`Tool`](crate::tool::Tool), [`Retriever`](crate::retriever::Retriever))
//! return [`BoxError`] so that implementations outside this crate can use any
//! error type; the core wraps those into [`Error::External`] with enough
//! context to locate the failure (step index, sample id, plugin name).

use thiserror::Error;

/// Boxed error type used at the external trait seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy for the framework core.
#[derive(Debug, Error)]
pub enum Error {
    // ── Validation ────────────────────────────────────────────────────────
    /// A version constraint string could not be parsed.
    #[error("invalid version constraint: {0:?}")]
    InvalidConstraint(String),

    /// A plugin with the same name is already registered.
    #[error("plugin '{0}' is already registered")]
    Duplicate(String),

    /// A named entity (plugin, factory, cassette entry, step) does not exist.
    #[error("'{0}' not found")]
    NotFound(String),

    /// A stepwise plan grew past its configured bound.
    #[error("plan exceeded the maximum of {max} steps")]
    MaxStepsExceeded { max: usize },

    /// The final chain value was not of the expected output type.
    #[error("chain '{chain}' produced a value that is not a {expected}")]
    TypeMismatch {
        chain: String,
        expected: &'static str,
    },

    /// A parallel group was run with no handlers.
    #[error("parallel group '{0}' has no handlers")]
    NoHandlers(String),

    /// A required configuration key or section is absent.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// A manifest, cassette, or wire payload failed to parse.
    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    // ── State ─────────────────────────────────────────────────────────────
    /// A lifecycle transition was attempted from a disallowed state.
    #[error("plugin '{name}' is {state}, expected {expected}")]
    WrongState {
        name: String,
        state: String,
        expected: String,
    },

    /// Stop was rejected because running plugins still depend on this one.
    #[error("plugin '{name}' has running dependents: {}", dependents.join(", "))]
    HasDependents {
        name: String,
        dependents: Vec<String>,
    },

    /// Start was rejected because a declared dependency is not running.
    #[error("dependency '{dependency}' of plugin '{name}' is not running")]
    DependencyNotReady { name: String, dependency: String },

    /// The dependency graph contains a cycle.
    #[error("circular dependency: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    // ── External ──────────────────────────────────────────────────────────
    /// A failure bubbled up from an LLM, tool, or retriever call, wrapped
    /// with the context that issued it.
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: BoxError,
    },

    /// A chain step failed; carries the step index and name.
    #[error("step {index} ({name}): {source}")]
    Step {
        index: usize,
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// An operation exceeded its deadline.
    #[error("timed out after {ms} ms")]
    Timeout { ms: u64 },

    /// A JSON-RPC error object returned by an MCP peer.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// File I/O failure with the offending path.
    #[error("i/o failure at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // ── Cancellation ──────────────────────────────────────────────────────
    /// The caller's cancellation token fired. Never retried automatically.
    #[error("operation canceled")]
    Canceled,

    // ── Replay ────────────────────────────────────────────────────────────
    /// Strict-mode replay found no recorded interaction for the fingerprint.
    #[error("no recorded interaction for fingerprint {fingerprint}")]
    ReplayMiss { fingerprint: String },

    /// A retry middleware exhausted its budget; carries the last error.
    #[error("max retries ({max}) exceeded: {source}")]
    MaxRetriesExceeded {
        max: usize,
        #[source]
        source: Box<Error>,
    },

    // ── Aggregate ─────────────────────────────────────────────────────────
    /// Joined error set from a best-effort batch operation such as
    /// [`Lifecycle::stop_all`](crate::lifecycle::Lifecycle::stop_all).
    #[error("{context}: {} failure(s): [{}]", errors.len(), errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Aggregate { context: String, errors: Vec<Error> },
}

impl Error {
    /// Wrap an external failure with the context that issued the call.
    pub fn external(context: impl Into<String>, source: BoxError) -> Self {
        Error::External {
            context: context.into(),
            source,
        }
    }

    /// True when this error (or an aggregate member) is a cancellation.
    pub fn is_canceled(&self) -> bool {
        match self {
            Error::Canceled => true,
            Error::Aggregate { errors, .. } => errors.iter().any(Error::is_canceled),
            _ => false,
        }
    }
}
