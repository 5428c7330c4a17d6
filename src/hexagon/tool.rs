//! The tool seam: named operations an agent can invoke with JSON parameters.

use crate::error::BoxError;
use async_trait::async_trait;
use serde_json::Value;

/// Describes a parameter accepted by a tool, surfaced to planners when they
/// render tool lists into prompts.
#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: String,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Metadata describing a tool: its name, purpose, and parameters.
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

/// The outcome of a tool execution.
///
/// # Example
///
/// ```rust
/// use hexagon::tool::ToolResult;
///
/// let ok = ToolResult::success(serde_json::json!({"result": 4}));
/// assert!(ok.success);
/// let err = ToolResult::failure("division by zero");
/// assert_eq!(err.error.as_deref(), Some("division by zero"));
/// ```
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// An invokable tool. Implementations live outside the core; the framework
/// routes planner actions and recorded interactions through this trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool metadata as rendered into planner prompts.
    fn metadata(&self) -> ToolMetadata;

    /// Execute the tool with JSON parameters.
    async fn execute(&self, parameters: Value) -> std::result::Result<ToolResult, BoxError>;
}
