//! Shared domain types for the Blueprint core.
//!
//! Everything here is transport- and backend-agnostic: the trace event
//! schema, the stream chunk sum type, integration preferences, the shared
//! error type, and the config sections deserialized from `config.toml`.

pub mod config;
pub mod error;
pub mod prefs;
pub mod stream;
pub mod trace;
