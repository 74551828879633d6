//! Per-endpoint MCP session registry.
//!
//! Sessions are process-scoped singletons opened lazily on first enabled
//! use. A failing endpoint is put on a cooldown so repeated IaC requests
//! do not hammer it: 5 minutes by default, 1 minute for generic
//! Terraform errors, and the full 5 minutes whenever HTTP 429 shows up
//! anywhere in the error chain. While a kind is disabled, unconfigured,
//! or cooling down, `get` returns `None` without touching the network —
//! callers degrade to the plain model path, never to an error event.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use bp_domain::config::{McpConfig, McpEndpointConfig};
use bp_domain::prefs::McpFlags;

use crate::session::{McpError, McpSession};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum McpKind {
    Bicep,
    Terraform,
    Docs,
}

impl McpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            McpKind::Bicep => "bicep",
            McpKind::Terraform => "terraform",
            McpKind::Docs => "docs",
        }
    }

    /// Human-readable endpoint name, also the tool label backends attach.
    pub fn display_name(self) -> &'static str {
        match self {
            McpKind::Bicep => "Azure Bicep MCP",
            McpKind::Terraform => "HashiCorp Terraform MCP",
            McpKind::Docs => "Microsoft Learn MCP",
        }
    }

    fn enabled(self, flags: &McpFlags) -> bool {
        match self {
            McpKind::Bicep => flags.bicep,
            McpKind::Terraform => flags.terraform,
            McpKind::Docs => flags.docs,
        }
    }

    /// Host fragments that mean "this URL is a human docs page, not an
    /// MCP endpoint". Connecting there would just burn the handshake.
    fn docs_url_markers(self) -> &'static [&'static str] {
        match self {
            McpKind::Bicep => &["learn.microsoft.com", "docs.microsoft.com"],
            McpKind::Terraform => &["developer.hashicorp.com", "github.com/hashicorp"],
            McpKind::Docs => &[],
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);
const TERRAFORM_GENERIC_COOLDOWN: Duration = Duration::from_secs(60);

type ConnectFuture = Pin<Box<dyn Future<Output = Result<McpSession, McpError>> + Send>>;
type Connector = Box<dyn Fn(&'static str, String) -> ConnectFuture + Send + Sync>;

#[derive(Default)]
struct Slot {
    session: Option<Arc<McpSession>>,
    cooldown_until: Option<Instant>,
}

pub struct McpRegistry {
    config: McpConfig,
    slots: tokio::sync::Mutex<HashMap<McpKind, Slot>>,
    connector: Connector,
}

impl McpRegistry {
    pub fn new(config: McpConfig) -> Self {
        Self::with_connector(
            config,
            Box::new(|name, url| Box::pin(McpSession::connect(name, url))),
        )
    }

    fn with_connector(config: McpConfig, connector: Connector) -> Self {
        Self {
            config,
            slots: tokio::sync::Mutex::new(HashMap::new()),
            connector,
        }
    }

    fn endpoint(&self, kind: McpKind) -> &McpEndpointConfig {
        match kind {
            McpKind::Bicep => &self.config.bicep,
            McpKind::Terraform => &self.config.terraform,
            McpKind::Docs => &self.config.docs,
        }
    }

    /// Fetch the session for `kind`, or `None` when the kind is disabled
    /// by preferences, unconfigured, guarded, cooling down, or failing.
    /// The first enabled call pays the handshake; later calls are cached.
    pub async fn get(&self, kind: McpKind, flags: &McpFlags) -> Option<Arc<McpSession>> {
        if !kind.enabled(flags) {
            return None;
        }
        let endpoint = self.endpoint(kind);
        let url = endpoint.url()?.to_owned();

        if kind.docs_url_markers().iter().any(|m| url.contains(m)) && !endpoint.force {
            tracing::info!(
                kind = kind.as_str(),
                url = %url,
                "MCP URL looks like a docs page, skipping (set force to override)"
            );
            return None;
        }

        let mut slots = self.slots.lock().await;
        let slot = slots.entry(kind).or_default();

        if let Some(session) = &slot.session {
            return Some(session.clone());
        }
        if let Some(deadline) = slot.cooldown_until {
            if Instant::now() < deadline {
                tracing::debug!(kind = kind.as_str(), "MCP endpoint on cooldown, skipping");
                return None;
            }
        }

        match (self.connector)(kind.display_name(), url).await {
            Ok(session) => {
                let session = Arc::new(session);
                slot.session = Some(session.clone());
                slot.cooldown_until = None;
                Some(session)
            }
            Err(e) => {
                let cooldown = if e.is_rate_limited() {
                    tracing::warn!(
                        kind = kind.as_str(),
                        error = %e,
                        "MCP endpoint rate-limited, backing off"
                    );
                    DEFAULT_COOLDOWN
                } else if kind == McpKind::Terraform {
                    tracing::warn!(kind = kind.as_str(), error = %e, "MCP handshake failed");
                    TERRAFORM_GENERIC_COOLDOWN
                } else {
                    tracing::warn!(kind = kind.as_str(), error = %e, "MCP handshake failed");
                    DEFAULT_COOLDOWN
                };
                slot.cooldown_until = Some(Instant::now() + cooldown);
                None
            }
        }
    }

    /// Close every cached session exactly once. Called at shutdown.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<McpSession>> = {
            let mut slots = self.slots.lock().await;
            slots.values_mut().filter_map(|s| s.session.take()).collect()
        };
        let closes: Vec<_> = sessions.iter().map(|s| s.close()).collect();
        futures_util::future::join_all(closes).await;
        if !sessions.is_empty() {
            tracing::info!(count = sessions.len(), "MCP sessions closed");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
