//! MCP (Model Context Protocol) client over streamable HTTP.
//!
//! The IaC generators optionally ground themselves in external schema
//! servers (Azure Bicep, HashiCorp Terraform, Microsoft Learn docs).
//! This crate owns the long-lived streaming sessions to those endpoints
//! and the registry that gates, caches, and cools them down so a missing
//! or misbehaving endpoint never blocks core progress.

mod protocol;
mod registry;
mod session;

pub use protocol::{JsonRpcError, JsonRpcResponse, McpToolDef, ToolCallResult};
pub use registry::{McpKind, McpRegistry};
pub use session::{McpError, McpSession};
