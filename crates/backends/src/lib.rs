//! Chat backend adapters.
//!
//! One capability surface — [`ChatBackend`] — over several backend
//! families: a remote managed-agent API, a stateless OpenAI-compatible
//! chat-completions API, a localhost inference server, and a scripted
//! mock for tests. Exactly one family is active per process, selected by
//! `[backend]` config at startup.

mod chat_completions;
mod local;
mod managed;
pub mod mock;
mod sse;
mod traits;
mod util;

pub use chat_completions::ChatCompletionsBackend;
pub use local::LocalBackend;
pub use managed::ManagedBackend;
pub use mock::MockBackend;
pub use traits::{AgentHandle, ChatBackend, McpToolRef};

use std::sync::Arc;

use bp_domain::config::{BackendConfig, BackendFamily};
use bp_domain::error::Result;

/// Build the configured backend. Called once at startup.
pub fn backend_from_config(cfg: &BackendConfig) -> Result<Arc<dyn ChatBackend>> {
    let backend: Arc<dyn ChatBackend> = match cfg.family {
        BackendFamily::Managed => Arc::new(ManagedBackend::from_config(cfg)?),
        BackendFamily::ChatCompletions => Arc::new(ChatCompletionsBackend::from_config(cfg)?),
        BackendFamily::Local => Arc::new(LocalBackend::from_config(cfg)?),
        BackendFamily::Mock => Arc::new(MockBackend::new()),
    };
    tracing::info!(backend = backend.id(), model = %cfg.model, "chat backend ready");
    Ok(backend)
}
