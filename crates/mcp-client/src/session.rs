//! Streamable HTTP MCP session.
//!
//! One session per endpoint, opened on first use and reused for the
//! process lifetime. Every JSON-RPC message is POSTed to the endpoint
//! URL; the server may answer with plain JSON or with an SSE-framed body
//! (one `data:` line carrying the response). A `Mcp-Session-Id` response
//! header, when present, is echoed on every subsequent call.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::Mutex;

use crate::protocol::{
    initialize_params, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpToolDef,
    ToolCallResult, ToolsListResult,
};

/// Errors specific to MCP sessions.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP HTTP error: {0}")]
    Http(String),

    #[error("MCP endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP session is closed")]
    Closed,
}

impl McpError {
    /// True when the endpoint is rate-limiting us (HTTP 429 anywhere in
    /// the chain — some proxies tunnel the status into the body text).
    pub fn is_rate_limited(&self) -> bool {
        match self {
            McpError::Status { status: 429, .. } => true,
            other => other.to_string().contains("429"),
        }
    }
}

pub struct McpSession {
    name: String,
    url: String,
    client: reqwest::Client,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    tools: Vec<McpToolDef>,
}

impl McpSession {
    /// Open a session: `initialize`, `notifications/initialized`, then
    /// `tools/list`. Any failure leaves nothing to clean up server-side
    /// worth waiting for, so errors just propagate.
    pub async fn connect(name: impl Into<String>, url: impl Into<String>) -> Result<Self, McpError> {
        let mut session = Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .map_err(|e| McpError::Http(e.to_string()))?,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            tools: Vec::new(),
        };

        let init = session
            .request("initialize", Some(initialize_params()))
            .await?;
        init.into_result()
            .map_err(|e| McpError::Protocol(format!("initialize failed: {e}")))?;

        session.notify("notifications/initialized").await?;

        let tools_resp = session.request("tools/list", None).await?;
        session.tools = match tools_resp.into_result() {
            Ok(value) => serde_json::from_value::<ToolsListResult>(value)
                .map(|r| r.tools)
                .unwrap_or_default(),
            Err(e) => {
                tracing::warn!(endpoint = %session.name, error = %e, "tools/list failed, session has no tools");
                Vec::new()
            }
        };

        tracing::info!(
            endpoint = %session.name,
            url = %session.url,
            tool_count = session.tools.len(),
            "MCP session established"
        );
        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Tools discovered at handshake time.
    pub fn tools(&self) -> &[McpToolDef] {
        &self.tools
    }

    /// Call a tool on this session.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let params = serde_json::json!({ "name": tool, "arguments": arguments });
        let resp = self.request("tools/call", Some(params)).await?;
        let value = resp
            .into_result()
            .map_err(|e| McpError::Protocol(format!("tools/call failed: {e}")))?;
        serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("unparseable tools/call result: {e}")))
    }

    /// Close the session. Safe to call more than once; only the first
    /// call contacts the endpoint.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let session_id = self.session_id.lock().await.clone();
        let mut req = self.client.delete(&self.url);
        if let Some(id) = session_id {
            req = req.header("Mcp-Session-Id", id);
        }
        match req.send().await {
            Ok(_) => tracing::debug!(endpoint = %self.name, "MCP session closed"),
            Err(e) => tracing::debug!(endpoint = %self.name, error = %e, "MCP session close failed"),
        }
    }

    // ── Internal: one request/response cycle ───────────────────────────

    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, McpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        let body = self.post(serde_json::to_value(&req).unwrap_or_default()).await?;
        parse_rpc_body(&body, id)
    }

    async fn notify(&self, method: &str) -> Result<(), McpError> {
        let notif = JsonRpcNotification::new(method);
        self.post(serde_json::to_value(&notif).unwrap_or_default())
            .await
            .map(|_| ())
    }

    /// POST one JSON-RPC message, returning the raw response body.
    /// Captures the `Mcp-Session-Id` header on the way through.
    async fn post(&self, message: Value) -> Result<String, McpError> {
        let mut builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream");
        if let Some(id) = self.session_id.lock().await.as_deref() {
            builder = builder.header("Mcp-Session-Id", id.to_owned());
        }
        let response = builder
            .json(&message)
            .send()
            .await
            .map_err(|e| McpError::Http(e.to_string()))?;

        if let Some(id) = response
            .headers()
            .get("Mcp-Session-Id")
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(id.to_owned());
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| McpError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(McpError::Status {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }
        Ok(body)
    }

    #[cfg(test)]
    pub(crate) fn detached(name: &str, url: &str) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            tools: Vec::new(),
        }
    }
}

/// Parse a response body that is either plain JSON or an SSE frame
/// sequence, looking for the JSON-RPC response with the expected id.
/// Servers may interleave notifications; those are skipped.
fn parse_rpc_body(body: &str, expected_id: u64) -> Result<JsonRpcResponse, McpError> {
    let trimmed = body.trim();
    if trimmed.starts_with('{') {
        let resp: JsonRpcResponse = serde_json::from_str(trimmed)
            .map_err(|e| McpError::Protocol(format!("unparseable response: {e}")))?;
        return expect_id(resp, expected_id);
    }

    for line in trimmed.lines() {
        if let Some(data) = line.trim().strip_prefix("data:") {
            if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(data.trim()) {
                if resp.id == expected_id {
                    return Ok(resp);
                }
            }
        }
    }
    Err(McpError::Protocol(format!(
        "no response with id {expected_id} in body"
    )))
}

fn expect_id(resp: JsonRpcResponse, expected_id: u64) -> Result<JsonRpcResponse, McpError> {
    if resp.id == expected_id {
        Ok(resp)
    } else {
        Err(McpError::Protocol(format!(
            "response id {} does not match request id {expected_id}",
            resp.id
        )))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
