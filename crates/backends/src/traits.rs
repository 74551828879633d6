use bp_domain::error::Result;
use bp_domain::stream::{BoxStream, StreamChunk};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A role-agent bound to a backend: a name plus authored instructions.
///
/// For stateless families this is a purely local object; the managed
/// family additionally records the server-side agent id it provisioned.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    pub name: String,
    pub instructions: String,
    /// Server-side agent id, when the backend keeps agents remotely.
    pub remote_id: Option<String>,
}

impl AgentHandle {
    pub fn local(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            remote_id: None,
        }
    }
}

/// Reference to an MCP tool a backend may attach to a call.
///
/// Adapters that cannot express server-side MCP tools ignore these; no
/// adapter may reject a call because of them.
#[derive(Debug, Clone)]
pub struct McpToolRef {
    pub name: String,
    pub url: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every chat backend adapter implements.
///
/// The three operations mirror what the team runtime needs: provision a
/// role-agent, run it to completion, or run it with streaming. Adapters
/// translate between these and each backend's wire format; chunk-shape
/// heterogeneity is absorbed here by mapping onto
/// [`StreamChunk`](bp_domain::stream::StreamChunk).
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Bind a name + instructions into an [`AgentHandle`]. Stateless
    /// families do no I/O; the managed family provisions a server-side
    /// agent.
    async fn create_agent(&self, name: &str, instructions: &str) -> Result<AgentHandle>;

    /// Run to completion, returning the full final text. Used for
    /// non-streamed fallbacks and short helper calls.
    async fn run(&self, agent: &AgentHandle, prompt: &str, tools: &[McpToolRef])
        -> Result<String>;

    /// Run with streaming. Transport failures surface as one `Err` item
    /// followed by stream termination — never a silent stop.
    async fn run_stream(
        &self,
        agent: &AgentHandle,
        prompt: &str,
        tools: &[McpToolRef],
    ) -> Result<BoxStream<'static, Result<StreamChunk>>>;

    /// Stable identifier for logs (`"managed"`, `"chat_completions"`, ...).
    fn id(&self) -> &str;
}
