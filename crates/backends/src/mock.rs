//! Scripted mock backend for tests and offline demos.
//!
//! Each role-agent name has a queue of [`MockScript`]s; every streamed
//! run pops the next one and plays its chunks (optionally spaced with a
//! delay, optionally ending in a transport error). Agents without a
//! script echo deterministically, which keeps workflow tests readable.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use bp_domain::error::{Error, Result};
use bp_domain::stream::{BoxStream, StreamChunk};

use crate::traits::{AgentHandle, ChatBackend, McpToolRef};

/// One scripted response for one streamed run.
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    /// Chunks to yield, in order.
    pub chunks: Vec<StreamChunk>,
    /// Yield this as a final `Err` after the chunks (transport abort).
    pub stream_error: Option<String>,
    /// What a follow-up `run()` fallback should return.
    pub run_text: Option<String>,
    /// Pause before each chunk (heartbeat tests with paused time).
    pub chunk_delay: Option<Duration>,
}

impl MockScript {
    /// Plain happy path: one text chunk per string.
    pub fn text(parts: &[&str]) -> Self {
        Self {
            chunks: parts
                .iter()
                .map(|s| StreamChunk::Text((*s).to_owned()))
                .collect(),
            ..Default::default()
        }
    }

    /// A stream that yields nothing; `run()` then answers with `text`.
    pub fn empty_stream_with_run_fallback(text: impl Into<String>) -> Self {
        Self {
            run_text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Chunks followed by a transport error.
    pub fn failing(parts: &[&str], error: impl Into<String>) -> Self {
        let mut script = Self::text(parts);
        script.stream_error = Some(error.into());
        script
    }
}

/// A record of one backend call, for assertions.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub agent: String,
    pub prompt: String,
    pub streamed: bool,
    pub tool_names: Vec<String>,
}

#[derive(Default)]
pub struct MockBackend {
    scripts: Mutex<HashMap<String, VecDeque<MockScript>>>,
    /// `run_text` of the most recently popped script, per agent, so the
    /// runner's blocking fallback sees the same script its stream came from.
    pending_run_text: Mutex<HashMap<String, String>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a script for the named agent.
    pub fn script(&self, agent: &str, script: MockScript) {
        self.scripts
            .lock()
            .entry(agent.to_owned())
            .or_default()
            .push_back(script);
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    fn record(&self, agent: &str, prompt: &str, streamed: bool, tools: &[McpToolRef]) {
        self.calls.lock().push(MockCall {
            agent: agent.to_owned(),
            prompt: prompt.to_owned(),
            streamed,
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });
    }

    fn pop_script(&self, agent: &str) -> Option<MockScript> {
        let script = self.scripts.lock().get_mut(agent)?.pop_front()?;
        if let Some(run_text) = &script.run_text {
            self.pending_run_text
                .lock()
                .insert(agent.to_owned(), run_text.clone());
        }
        Some(script)
    }

    fn default_reply(agent: &str, prompt: &str) -> String {
        let head: String = prompt.chars().take(60).collect();
        format!("[{agent}] {head}")
    }
}

#[async_trait::async_trait]
impl ChatBackend for MockBackend {
    async fn create_agent(&self, name: &str, instructions: &str) -> Result<AgentHandle> {
        Ok(AgentHandle::local(name, instructions))
    }

    async fn run(
        &self,
        agent: &AgentHandle,
        prompt: &str,
        tools: &[McpToolRef],
    ) -> Result<String> {
        self.record(&agent.name, prompt, false, tools);
        if let Some(pending) = self.pending_run_text.lock().remove(&agent.name) {
            return Ok(pending);
        }
        if let Some(script) = self.pop_script(&agent.name) {
            if let Some(run_text) = script.run_text {
                self.pending_run_text.lock().remove(&agent.name);
                return Ok(run_text);
            }
            let joined: String = script
                .chunks
                .iter()
                .flat_map(|c| c.extract().deltas)
                .collect();
            if !joined.is_empty() {
                return Ok(joined);
            }
            if let Some(error) = script.stream_error {
                return Err(Error::backend("mock", error));
            }
        }
        Ok(Self::default_reply(&agent.name, prompt))
    }

    async fn run_stream(
        &self,
        agent: &AgentHandle,
        prompt: &str,
        tools: &[McpToolRef],
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        self.record(&agent.name, prompt, true, tools);
        let MockScript {
            chunks,
            stream_error,
            chunk_delay,
            ..
        } = self
            .pop_script(&agent.name)
            .unwrap_or_else(|| MockScript::text(&[&Self::default_reply(&agent.name, prompt)]));

        let stream = async_stream::stream! {
            for chunk in chunks {
                if let Some(delay) = chunk_delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(chunk);
            }
            if let Some(error) = stream_error {
                yield Err(Error::backend("mock", error));
            }
        };
        Ok(Box::pin(stream))
    }

    fn id(&self) -> &str {
        "mock"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn scripted_chunks_play_in_order() {
        let backend = MockBackend::new();
        backend.script("Architect", MockScript::text(&["a", "b", "c"]));
        let agent = backend.create_agent("Architect", "i").await.unwrap();

        let mut stream = backend.run_stream(&agent, "p", &[]).await.unwrap();
        let mut collected = String::new();
        while let Some(item) = stream.next().await {
            for delta in item.unwrap().extract().deltas {
                collected.push_str(&delta);
            }
        }
        assert_eq!(collected, "abc");
    }

    #[tokio::test]
    async fn failing_script_ends_with_err() {
        let backend = MockBackend::new();
        backend.script("Architect", MockScript::failing(&["partial"], "boom"));
        let agent = backend.create_agent("Architect", "i").await.unwrap();

        let mut stream = backend.run_stream(&agent, "p", &[]).await.unwrap();
        let first = stream.next().await.unwrap();
        assert!(first.is_ok());
        let second = stream.next().await.unwrap();
        assert!(second.unwrap_err().to_string().contains("boom"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn run_fallback_sees_the_streams_script() {
        let backend = MockBackend::new();
        backend.script(
            "Architect",
            MockScript::empty_stream_with_run_fallback("fallback text"),
        );
        let agent = backend.create_agent("Architect", "i").await.unwrap();

        let mut stream = backend.run_stream(&agent, "p", &[]).await.unwrap();
        assert!(stream.next().await.is_none());
        assert_eq!(backend.run(&agent, "p", &[]).await.unwrap(), "fallback text");
    }

    #[tokio::test]
    async fn unscripted_agent_echoes() {
        let backend = MockBackend::new();
        let agent = backend.create_agent("CostPerfOptimizer", "i").await.unwrap();
        let text = backend.run(&agent, "right-size the SKUs", &[]).await.unwrap();
        assert!(text.contains("CostPerfOptimizer"));
        assert!(text.contains("right-size"));
    }

    #[tokio::test]
    async fn calls_are_recorded_with_tools() {
        let backend = MockBackend::new();
        let agent = backend.create_agent("Architect", "i").await.unwrap();
        let tools = vec![McpToolRef {
            name: "Terraform MCP".into(),
            url: "https://mcp.example.dev/tf".into(),
        }];
        let _ = backend.run(&agent, "p", &tools).await.unwrap();
        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_names, vec!["Terraform MCP"]);
        assert!(!calls[0].streamed);
    }
}
