//! OpenAI-compatible chat-completions adapter.
//!
//! Works with OpenAI, Azure OpenAI deployments behind a compatible
//! proxy, Together, vLLM, LM Studio, and anything else speaking the chat
//! completions contract. The backend is stateless: an agent's
//! instructions become the system message on every call.

use serde_json::Value;

use bp_domain::config::BackendConfig;
use bp_domain::error::{Error, Result};
use bp_domain::stream::{BoxStream, StreamChunk};

use crate::sse::sse_chunk_stream;
use crate::traits::{AgentHandle, ChatBackend, McpToolRef};
use crate::util::{api_key_from_env, default_client, ensure_success, from_reqwest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ChatCompletionsBackend {
    base_url: String,
    model: String,
    api_key_env: String,
    client: reqwest::Client,
}

impl ChatCompletionsBackend {
    pub fn from_config(cfg: &BackendConfig) -> Result<Self> {
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            model: cfg.model.clone(),
            api_key_env: cfg.api_key_env.clone(),
            client: default_client()?,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
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

    fn build_body(&self, agent: &AgentHandle, prompt: &str, stream: bool) -> Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": agent.instructions },
                { "role": "user", "content": prompt },
            ],
            "stream": stream,
        })
    }
}

#[async_trait::async_trait]
impl ChatBackend for ChatCompletionsBackend {
    async fn create_agent(&self, name: &str, instructions: &str) -> Result<AgentHandle> {
        // Stateless: binding name + instructions needs no network call.
        Ok(AgentHandle::local(name, instructions))
    }

    async fn run(
        &self,
        agent: &AgentHandle,
        prompt: &str,
        tools: &[McpToolRef],
    ) -> Result<String> {
        if !tools.is_empty() {
            tracing::debug!(
                agent = %agent.name,
                tools = tools.len(),
                "chat-completions backend cannot attach MCP tools, ignoring"
            );
        }
        let body = self.build_body(agent, prompt, false);
        let response = self
            .authed_post(&self.completions_url())
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let response = ensure_success(response).await?;
        let payload: Value = response.json().await.map_err(from_reqwest)?;
        parse_final_text(&payload)
    }

    async fn run_stream(
        &self,
        agent: &AgentHandle,
        prompt: &str,
        tools: &[McpToolRef],
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        if !tools.is_empty() {
            tracing::debug!(
                agent = %agent.name,
                tools = tools.len(),
                "chat-completions backend cannot attach MCP tools, ignoring"
            );
        }
        let body = self.build_body(agent, prompt, true);
        let response = self
            .authed_post(&self.completions_url())
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let response = ensure_success(response).await?;
        Ok(sse_chunk_stream(response, parse_stream_payload))
    }

    fn id(&self) -> &str {
        "chat_completions"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_final_text(payload: &Value) -> Result<String> {
    payload
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .ok_or_else(|| Error::backend("chat_completions", "no message content in response"))
}

fn parse_stream_payload(payload: &str) -> Vec<StreamChunk> {
    if payload == "[DONE]" {
        return Vec::new();
    }
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparseable SSE payload");
            return Vec::new();
        }
    };
    let delta = value
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|v| v.as_str());
    match delta {
        Some(text) if !text.is_empty() => vec![StreamChunk::Text(text.to_owned())],
        _ => Vec::new(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use bp_domain::config::BackendConfig;

    fn backend() -> ChatCompletionsBackend {
        ChatCompletionsBackend::from_config(&BackendConfig::default()).unwrap()
    }

    #[test]
    fn body_carries_system_and_user_messages() {
        let b = backend();
        let agent = AgentHandle::local("Architect", "You design landing zones.");
        let body = b.build_body(&agent, "minimal landing zone", true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "You design landing zones.");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "minimal landing zone");
    }

    #[test]
    fn stream_payload_yields_delta_content() {
        let payload = r#"{"choices":[{"delta":{"content":"hub vnet"}}]}"#;
        let chunks = parse_stream_payload(payload);
        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            StreamChunk::Text(s) => assert_eq!(s, "hub vnet"),
            other => panic!("unexpected chunk: {other:?}"),
        }
    }

    #[test]
    fn stream_payload_done_and_role_only_are_empty() {
        assert!(parse_stream_payload("[DONE]").is_empty());
        assert!(parse_stream_payload(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).is_empty());
        assert!(parse_stream_payload("not json").is_empty());
    }

    #[test]
    fn final_text_parses_from_first_choice() {
        let payload = serde_json::json!({
            "choices": [ { "message": { "role": "assistant", "content": "done." } } ]
        });
        assert_eq!(parse_final_text(&payload).unwrap(), "done.");
    }

    #[test]
    fn final_text_missing_is_a_backend_error() {
        let payload = serde_json::json!({ "choices": [] });
        let err = parse_final_text(&payload).unwrap_err();
        assert!(err.to_string().contains("chat_completions"));
    }

    #[tokio::test]
    async fn create_agent_is_local() {
        let b = backend();
        let handle = b.create_agent("Architect", "instr").await.unwrap();
        assert_eq!(handle.name, "Architect");
        assert!(handle.remote_id.is_none());
    }
}
