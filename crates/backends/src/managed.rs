//! Managed-agent adapter.
//!
//! The provider keeps role-agents server-side: `create_agent` provisions
//! one and later calls address it by id. Streamed runs arrive over SSE
//! with event payloads whose shape varies by provider version — plain
//! `text`, `delta` strings or objects, `messages` batches, or full
//! `response` snapshots. Each payload is mapped onto the matching
//! [`StreamChunk`] variant; unknown shapes pass through as `Raw` so the
//! runner's probing still has a chance.

use serde_json::Value;

use bp_domain::config::BackendConfig;
use bp_domain::error::{Error, Result};
use bp_domain::stream::{
    BoxStream, ChunkMessage, DeltaPayload, ResponsePayload, StreamChunk,
};

use crate::sse::sse_chunk_stream;
use crate::traits::{AgentHandle, ChatBackend, McpToolRef};
use crate::util::{api_key_from_env, default_client, ensure_success, from_reqwest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ManagedBackend {
    base_url: String,
    model: String,
    api_key_env: String,
    client: reqwest::Client,
}

impl ManagedBackend {
    pub fn from_config(cfg: &BackendConfig) -> Result<Self> {
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            model: cfg.model.clone(),
            api_key_env: cfg.api_key_env.clone(),
            client: default_client()?,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        if let Some(key) = api_key_from_env(&self.api_key_env) {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    fn runs_url(&self, agent: &AgentHandle) -> Result<String> {
        let id = agent.remote_id.as_deref().ok_or_else(|| {
            Error::backend("managed", format!("agent {} was never provisioned", agent.name))
        })?;
        Ok(format!("{}/v1/agents/{}/runs", self.base_url, id))
    }

    fn build_run_body(prompt: &str, tools: &[McpToolRef], stream: bool) -> Value {
        let mut body = serde_json::json!({
            "input": prompt,
            "stream": stream,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(tool_to_wire).collect());
        }
        body
    }
}

#[async_trait::async_trait]
impl ChatBackend for ManagedBackend {
    async fn create_agent(&self, name: &str, instructions: &str) -> Result<AgentHandle> {
        let body = serde_json::json!({
            "name": name,
            "instructions": instructions,
            "model": self.model,
        });
        let response = self
            .authed_post(&format!("{}/v1/agents", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let response = ensure_success(response).await?;
        let payload: Value = response.json().await.map_err(from_reqwest)?;
        let remote_id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::backend("managed", "agent provisioning returned no id"))?
            .to_owned();
        tracing::debug!(agent = name, remote_id = %remote_id, "managed agent provisioned");
        let mut handle = AgentHandle::local(name, instructions);
        handle.remote_id = Some(remote_id);
        Ok(handle)
    }

    async fn run(
        &self,
        agent: &AgentHandle,
        prompt: &str,
        tools: &[McpToolRef],
    ) -> Result<String> {
        let url = self.runs_url(agent)?;
        let body = Self::build_run_body(prompt, tools, false);
        let response = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let response = ensure_success(response).await?;
        let payload: Value = response.json().await.map_err(from_reqwest)?;
        parse_final_text(&payload)
            .ok_or_else(|| Error::backend("managed", "run returned no text result"))
    }

    async fn run_stream(
        &self,
        agent: &AgentHandle,
        prompt: &str,
        tools: &[McpToolRef],
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let url = self.runs_url(agent)?;
        let body = Self::build_run_body(prompt, tools, true);
        let response = self
            .authed_post(&url)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let response = ensure_success(response).await?;
        Ok(sse_chunk_stream(response, parse_run_payload))
    }

    fn id(&self) -> &str {
        "managed"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn tool_to_wire(tool: &McpToolRef) -> Value {
    serde_json::json!({
        "type": "mcp",
        "server_label": tool.name,
        "server_url": tool.url,
    })
}

/// Map one streamed event payload onto a [`StreamChunk`].
fn parse_run_payload(payload: &str) -> Vec<StreamChunk> {
    if payload == "[DONE]" {
        return Vec::new();
    }
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(_) => {
            // Some deployments stream bare text lines.
            return vec![StreamChunk::Text(payload.to_owned())];
        }
    };

    if let Some(text) = value.get("text").and_then(|v| v.as_str()) {
        return vec![StreamChunk::Text(text.to_owned())];
    }

    if let Some(delta) = value.get("delta") {
        let payload = match delta {
            Value::String(s) => DeltaPayload {
                text: Some(s.clone()),
                content: None,
            },
            _ => DeltaPayload {
                text: delta.get("text").and_then(|v| v.as_str()).map(str::to_owned),
                content: delta
                    .get("content")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned),
            },
        };
        return vec![StreamChunk::Delta(payload)];
    }

    if let Some(messages) = value.get("messages").and_then(|v| v.as_array()) {
        return vec![StreamChunk::Messages(
            messages.iter().map(message_from_value).collect(),
        )];
    }

    if let Some(response) = value.get("response") {
        let messages = response
            .get("messages")
            .and_then(|v| v.as_array())
            .map(|msgs| msgs.iter().map(message_from_value).collect())
            .unwrap_or_default();
        return vec![StreamChunk::Response(ResponsePayload {
            result: response
                .get("result")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
            messages,
        })];
    }

    vec![StreamChunk::Raw(value)]
}

fn message_from_value(value: &Value) -> ChunkMessage {
    ChunkMessage {
        text: value.get("text").and_then(|v| v.as_str()).map(str::to_owned),
        content: value
            .get("content")
            .and_then(|v| v.as_str())
            .map(str::to_owned),
    }
}

/// Read the final text out of a non-streamed run response:
/// `response.result`, bare `result`, or joined `response.messages`.
fn parse_final_text(payload: &Value) -> Option<String> {
    let response = payload.get("response").unwrap_or(payload);
    if let Some(result) = response.get("result").and_then(|v| v.as_str()) {
        if !result.trim().is_empty() {
            return Some(result.to_owned());
        }
    }
    let messages = response.get("messages")?.as_array()?;
    let collected: Vec<&str> = messages
        .iter()
        .filter_map(|m| {
            m.get("text")
                .and_then(|v| v.as_str())
                .or_else(|| m.get("content").and_then(|v| v.as_str()))
        })
        .filter(|s| !s.trim().is_empty())
        .collect();
    if collected.is_empty() {
        None
    } else {
        Some(collected.join("\n"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_payload_maps_to_text_chunk() {
        let chunks = parse_run_payload(r#"{"text":"spoke vnet"}"#);
        assert!(matches!(&chunks[0], StreamChunk::Text(s) if s == "spoke vnet"));
    }

    #[test]
    fn string_delta_and_object_delta_both_map() {
        let chunks = parse_run_payload(r#"{"delta":"abc"}"#);
        assert!(matches!(&chunks[0], StreamChunk::Delta(d) if d.text.as_deref() == Some("abc")));

        let chunks = parse_run_payload(r#"{"delta":{"content":"xyz"}}"#);
        assert!(
            matches!(&chunks[0], StreamChunk::Delta(d) if d.content.as_deref() == Some("xyz"))
        );
    }

    #[test]
    fn message_batch_maps_each_entry() {
        let chunks = parse_run_payload(r#"{"messages":[{"text":"a"},{"content":"b"}]}"#);
        match &chunks[0] {
            StreamChunk::Messages(msgs) => {
                assert_eq!(msgs.len(), 2);
                assert_eq!(msgs[0].text.as_deref(), Some("a"));
                assert_eq!(msgs[1].content.as_deref(), Some("b"));
            }
            other => panic!("unexpected chunk: {other:?}"),
        }
    }

    #[test]
    fn response_snapshot_maps_result_and_messages() {
        let chunks =
            parse_run_payload(r#"{"response":{"result":"full","messages":[{"text":"m"}]}}"#);
        match &chunks[0] {
            StreamChunk::Response(r) => {
                assert_eq!(r.result.as_deref(), Some("full"));
                assert_eq!(r.messages.len(), 1);
            }
            other => panic!("unexpected chunk: {other:?}"),
        }
    }

    #[test]
    fn unknown_mapping_passes_through_raw() {
        let chunks = parse_run_payload(r#"{"content":"loose"}"#);
        assert!(matches!(&chunks[0], StreamChunk::Raw(_)));
        // The runner's raw probing still finds the text.
        assert_eq!(chunks[0].extract().deltas, vec!["loose"]);
    }

    #[test]
    fn bare_text_line_is_kept() {
        let chunks = parse_run_payload("not json at all");
        assert!(matches!(&chunks[0], StreamChunk::Text(s) if s == "not json at all"));
    }

    #[test]
    fn final_text_prefers_result_then_messages() {
        let payload = serde_json::json!({ "response": { "result": "the answer" } });
        assert_eq!(parse_final_text(&payload).as_deref(), Some("the answer"));

        let payload = serde_json::json!({
            "response": { "messages": [ { "text": "a" }, { "content": "b" } ] }
        });
        assert_eq!(parse_final_text(&payload).as_deref(), Some("a\nb"));

        let payload = serde_json::json!({ "result": "top-level" });
        assert_eq!(parse_final_text(&payload).as_deref(), Some("top-level"));
    }

    #[test]
    fn tools_serialize_as_mcp_attachments() {
        let tools = vec![McpToolRef {
            name: "Azure Bicep MCP".into(),
            url: "https://mcp.example.dev/bicep".into(),
        }];
        let body = ManagedBackend::build_run_body("prompt", &tools, true);
        assert_eq!(body["tools"][0]["type"], "mcp");
        assert_eq!(body["tools"][0]["server_label"], "Azure Bicep MCP");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn run_body_without_tools_omits_key() {
        let body = ManagedBackend::build_run_body("prompt", &[], false);
        assert!(body.get("tools").is_none());
    }
}
