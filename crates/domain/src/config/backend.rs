use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which chat backend family is active. Exactly one per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendFamily {
    /// Remote managed-agent API: the provider keeps the agent and the
    /// conversation server-side.
    Managed,
    /// Stateless OpenAI-compatible chat completions; instructions become
    /// a system message on every call.
    #[default]
    ChatCompletions,
    /// Localhost inference server (Ollama-style). Tools are ignored.
    Local,
    /// In-process scripted driver, for tests and offline demos.
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub family: BackendFamily,
    /// Base URL of the backend endpoint.
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Model identifier (deployment name for managed backends).
    #[serde(default = "d_model")]
    pub model: String,
    /// Name of the environment variable holding the API key. Read at
    /// request time, never stored in config.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            family: BackendFamily::default(),
            base_url: d_base_url(),
            model: d_model(),
            api_key_env: d_api_key_env(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_model() -> String {
    "gpt-4o".into()
}
fn d_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
