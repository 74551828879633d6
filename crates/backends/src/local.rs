//! Local inference adapter (Ollama-style `/api/generate`).
//!
//! For on-device or LAN inference servers. Instructions are folded into
//! the prompt (the generate endpoint has no system-message slot), the
//! streamed body is newline-delimited JSON (`{"response": "...",
//! "done": false}` per line), and tool attachments are ignored — local
//! models have no MCP support.

use serde_json::Value;

use bp_domain::config::BackendConfig;
use bp_domain::error::{Error, Result};
use bp_domain::stream::{BoxStream, StreamChunk};

use crate::traits::{AgentHandle, ChatBackend, McpToolRef};
use crate::util::{default_client, ensure_success, from_reqwest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LocalBackend {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl LocalBackend {
    pub fn from_config(cfg: &BackendConfig) -> Result<Self> {
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            model: cfg.model.clone(),
            client: default_client()?,
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn build_body(&self, agent: &AgentHandle, prompt: &str, stream: bool) -> Value {
        serde_json::json!({
            "model": self.model,
            "prompt": compose_prompt(&agent.instructions, prompt),
            "stream": stream,
        })
    }
}

/// The generate endpoint takes one prompt string; fold the instructions
/// in front of the user turn.
fn compose_prompt(instructions: &str, prompt: &str) -> String {
    format!("{instructions}\n\nUser: {prompt}")
}

#[async_trait::async_trait]
impl ChatBackend for LocalBackend {
    async fn create_agent(&self, name: &str, instructions: &str) -> Result<AgentHandle> {
        Ok(AgentHandle::local(name, instructions))
    }

    async fn run(
        &self,
        agent: &AgentHandle,
        prompt: &str,
        _tools: &[McpToolRef],
    ) -> Result<String> {
        let body = self.build_body(agent, prompt, false);
        let response = self
            .client
            .post(self.generate_url())
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let response = ensure_success(response).await?;
        let payload: Value = response.json().await.map_err(from_reqwest)?;
        payload
            .get("response")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| Error::backend("local", "generate returned no response text"))
    }

    async fn run_stream(
        &self,
        agent: &AgentHandle,
        prompt: &str,
        _tools: &[McpToolRef],
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let body = self.build_body(agent, prompt, true);
        let response = self
            .client
            .post(self.generate_url())
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let mut response = ensure_success(response).await?;

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buffer.find('\n') {
                            let line: String = buffer.drain(..=pos).collect();
                            for chunk in parse_ndjson_line(line.trim()) {
                                yield Ok(chunk);
                            }
                        }
                    }
                    Ok(None) => {
                        for chunk in parse_ndjson_line(buffer.trim()) {
                            yield Ok(chunk);
                        }
                        break;
                    }
                    Err(e) => {
                        yield Err(from_reqwest(e));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    fn id(&self) -> &str {
        "local"
    }
}

/// One NDJSON line → at most one text chunk. Blank lines, unparseable
/// lines, and the final `{"done": true}` frame produce nothing.
fn parse_ndjson_line(line: &str) -> Vec<StreamChunk> {
    if line.is_empty() {
        return Vec::new();
    }
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    match value.get("response").and_then(|v| v.as_str()) {
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

    fn backend() -> LocalBackend {
        let cfg = BackendConfig {
            base_url: "http://127.0.0.1:11434".into(),
            model: "llama3.1".into(),
            ..Default::default()
        };
        LocalBackend::from_config(&cfg).unwrap()
    }

    #[test]
    fn instructions_are_folded_into_the_prompt() {
        let b = backend();
        let agent = AgentHandle::local("Architect", "You are an architect.");
        let body = b.build_body(&agent, "design a vnet", true);
        let prompt = body["prompt"].as_str().unwrap();
        assert!(prompt.starts_with("You are an architect."));
        assert!(prompt.ends_with("User: design a vnet"));
        assert_eq!(body["model"], "llama3.1");
    }

    #[test]
    fn ndjson_line_with_response_yields_text() {
        let chunks = parse_ndjson_line(r#"{"response":"sub","done":false}"#);
        assert!(matches!(&chunks[0], StreamChunk::Text(s) if s == "sub"));
    }

    #[test]
    fn done_frame_blank_and_garbage_lines_yield_nothing() {
        assert!(parse_ndjson_line(r#"{"done":true,"total_duration":12}"#).is_empty());
        assert!(parse_ndjson_line("").is_empty());
        assert!(parse_ndjson_line("garbage").is_empty());
        assert!(parse_ndjson_line(r#"{"response":""}"#).is_empty());
    }
}
