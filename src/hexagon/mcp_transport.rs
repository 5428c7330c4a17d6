//! MCP transport: JSON-RPC 2.0 over an abstract transport.
//!
//! A [`Transport`] sends one JSON-RPC request and returns the matching
//! response. The bundled [`HttpTransport`] POSTs to a fixed endpoint,
//! assigning monotonically increasing request ids from an atomic counter
//! when the caller leaves the id unset, and demultiplexes responses by id.
//! [`McpClient`] is a thin typed layer over a transport for the standard
//! MCP methods.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Zero means "unassigned"; the transport allocates an id before
    /// sending.
    #[serde(default)]
    pub id: i64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: 0,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// JSON-RPC 2.0 response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// Two-method transport contract: send a request, and close.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        token: &CancellationToken,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// HTTP transport POSTing JSON-RPC to a fixed endpoint.
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
    next_id: AtomicI64,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        token: &CancellationToken,
        mut request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse> {
        if request.id == 0 {
            request.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        }
        let request_id = request.id;

        let post = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&request)
            .send();
        let http_response = tokio::select! {
            _ = token.cancelled() => return Err(Error::Canceled),
            response = post => response.map_err(|err| {
                Error::external(format!("rpc '{}' to {}", request.method, self.endpoint), Box::new(err))
            })?,
        };

        let response: JsonRpcResponse = http_response.json().await.map_err(|err| Error::Parse {
            what: format!("rpc response from {}", self.endpoint),
            message: err.to_string(),
        })?;

        // Demultiplex by id: a mismatched response belongs to another
        // request and must not be handed to this caller.
        if response.id != request_id {
            return Err(Error::Parse {
                what: format!("rpc response from {}", self.endpoint),
                message: format!("response id {} does not match request id {}", response.id, request_id),
            });
        }
        if let Some(rpc_error) = response.error {
            return Err(Error::Rpc {
                code: rpc_error.code,
                message: rpc_error.message,
            });
        }
        Ok(response)
    }
}

/// Typed convenience layer over a [`Transport`] for the standard MCP
/// methods.
pub struct McpClient {
    transport: Arc<dyn Transport>,
}

impl McpClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn call(
        &self,
        token: &CancellationToken,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value> {
        let response = self
            .transport
            .send(token, JsonRpcRequest::new(method, params))
            .await?;
        Ok(response.result.unwrap_or(Value::Null))
    }

    pub async fn initialize(&self, token: &CancellationToken) -> Result<Value> {
        self.call(token, "initialize", None).await
    }

    pub async fn list_tools(&self, token: &CancellationToken) -> Result<Value> {
        self.call(token, "tools/list", None).await
    }

    pub async fn call_tool(
        &self,
        token: &CancellationToken,
        name: &str,
        arguments: Value,
    ) -> Result<Value> {
        self.call(
            token,
            "tools/call",
            Some(serde_json::json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    pub async fn list_resources(&self, token: &CancellationToken) -> Result<Value> {
        self.call(token, "resources/list", None).await
    }

    pub async fn read_resource(&self, token: &CancellationToken, uri: &str) -> Result<Value> {
        self.call(
            token,
            "resources/read",
            Some(serde_json::json!({ "uri": uri })),
        )
        .await
    }

    pub async fn list_prompts(&self, token: &CancellationToken) -> Result<Value> {
        self.call(token, "prompts/list", None).await
    }

    pub async fn get_prompt(&self, token: &CancellationToken, name: &str) -> Result<Value> {
        self.call(
            token,
            "prompts/get",
            Some(serde_json::json!({ "name": name })),
        )
        .await
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_serialize_as_json_rpc_2() {
        let request = JsonRpcRequest {
            id: 7,
            ..JsonRpcRequest::new("tools/list", None)
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "tools/list");
        assert!(value.get("params").is_none());
    }

    #[test]
    fn error_objects_deserialize() {
        let response: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"method not found"}}"#,
        )
        .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "method not found");
    }
}
