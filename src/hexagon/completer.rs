//! Shared primitives for provider-agnostic LLM access.
//!
//! The framework never talks to a concrete model service. Planners,
//! synthesizers, critics, and judge evaluators all consume the [`Completer`]
//! trait, which turns a chat-message slice into a single assistant message.
//! Concrete vendor clients live outside this crate; tests use scripted mock
//! completers.
//!
//! # Example
//!
//! ```rust,no_run
//! use hexagon::completer::{Completer, Message, Role};
//! use std::sync::Arc;
//!
//! # async fn example(client: Arc<dyn Completer>) -> Result<(), hexagon::BoxError> {
//! let response = client
//!     .complete(&[Message::new(Role::User, "Who are you?")])
//!     .await?;
//! println!("Assistant: {}", response.content);
//! # Ok(())
//! # }
//! ```

use crate::error::BoxError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Represents the possible roles for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message.
    User,
    /// An assistant authored message.
    Assistant,
    /// A tool-result message fed back into the conversation.
    Tool,
}

impl Role {
    /// Wire-format name of the role, used for fingerprints and cassettes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// How many tokens were spent on prompt vs. completion?
#[derive(Clone, Debug, Default)]
pub struct TokenUsage {
    /// Number of prompt/input tokens billed by the provider.
    pub input_tokens: usize,
    /// Number of generated/output tokens billed by the provider.
    pub output_tokens: usize,
    /// Convenience total equal to `input_tokens + output_tokens`.
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// A generic chat message.
///
/// The body is stored as `Arc<str>` so that prompt histories and recorded
/// cassettes can be cheaply cloned by downstream components.
#[derive(Clone, Debug)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The message body.
    pub content: Arc<str>,
}

impl Message {
    pub fn new(role: Role, content: impl AsRef<str>) -> Self {
        Self {
            role,
            content: Arc::from(content.as_ref()),
        }
    }

    /// Shorthand for a system-role message.
    pub fn system(content: impl AsRef<str>) -> Self {
        Self::new(Role::System, content)
    }

    /// Shorthand for a user-role message.
    pub fn user(content: impl AsRef<str>) -> Self {
        Self::new(Role::User, content)
    }

    /// Shorthand for an assistant-role message.
    pub fn assistant(content: impl AsRef<str>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Trait-driven abstraction over a concrete text-completion backend.
///
/// Implementations **must** be thread-safe (`Send + Sync`) so they can be
/// shared between async tasks. Where a provider exposes token accounting,
/// wrappers should capture it and make it visible via
/// [`Completer::last_usage`].
#[async_trait]
pub trait Completer: Send + Sync {
    /// Send a full request/response style completion.
    ///
    /// The `messages` slice must include any system priming messages the
    /// caller wishes to send. On success the returned [`Message`] carries the
    /// assistant response.
    async fn complete(&self, messages: &[Message]) -> std::result::Result<Message, BoxError>;

    /// Identifier used to select the upstream model (e.g. `"gpt-4.1"`).
    ///
    /// Participates in request fingerprints, so replaying a cassette requires
    /// the same model name the recording used.
    fn model_name(&self) -> &str {
        "unknown"
    }

    /// Usage from the most recent [`Completer::complete`] call.
    ///
    /// Wrappers that propagate token accounting should override
    /// [`Completer::usage_slot`]; the default reports no usage data.
    async fn last_usage(&self) -> Option<TokenUsage> {
        if let Some(slot) = self.usage_slot() {
            slot.lock().await.clone()
        } else {
            None
        }
    }

    /// Shared mutable slot where the implementation can persist token usage.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}
