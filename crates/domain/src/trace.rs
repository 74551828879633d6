//! The trace event schema — the unit of published progress for a step.
//!
//! Events are immutable once emitted. For every `(run_id, step_id)` the
//! sequence is one `start`, zero or more `delta`/`thinking`, and exactly
//! one `end` or `error`. Serialized events are also the journal wire
//! format (one JSON object per JSONL line), so field names are stable.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle phase of a trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Delta,
    /// Heartbeat while a reasoning model is silent; carries a synthetic
    /// marker in `message_delta` and never advances `tokens_out`.
    Thinking,
    End,
    Error,
}

/// Step position within a run. `total` is constant across the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
}

/// Lightweight per-step counters. `tokens_out` is an approximate word
/// count, not a tokenizer count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Telemetry {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub run_id: String,
    pub step_id: u32,
    pub agent: String,
    pub phase: Phase,
    /// Wall-clock seconds since the UNIX epoch. Non-decreasing within a
    /// `(run_id, step_id)`.
    pub ts: f64,
    #[serde(default)]
    pub meta: Map<String, Value>,
    pub progress: Progress,
    pub telemetry: Telemetry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_delta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TraceEvent {
    fn base(
        run_id: &str,
        step_id: u32,
        agent: &str,
        phase: Phase,
        ts: f64,
        meta: Map<String, Value>,
        progress: Progress,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            run_id: run_id.to_owned(),
            step_id,
            agent: agent.to_owned(),
            phase,
            ts,
            meta,
            progress,
            telemetry,
            message_delta: None,
            summary: None,
            error: None,
        }
    }

    pub fn start(
        run_id: &str,
        step_id: u32,
        agent: &str,
        ts: f64,
        meta: Map<String, Value>,
        progress: Progress,
    ) -> Self {
        Self::base(
            run_id,
            step_id,
            agent,
            Phase::Start,
            ts,
            meta,
            progress,
            Telemetry::default(),
        )
    }

    pub fn delta(
        run_id: &str,
        step_id: u32,
        agent: &str,
        ts: f64,
        meta: Map<String, Value>,
        progress: Progress,
        telemetry: Telemetry,
        message_delta: String,
    ) -> Self {
        let mut ev = Self::base(
            run_id,
            step_id,
            agent,
            Phase::Delta,
            ts,
            meta,
            progress,
            telemetry,
        );
        ev.message_delta = Some(message_delta);
        ev
    }

    pub fn thinking(
        run_id: &str,
        step_id: u32,
        agent: &str,
        ts: f64,
        meta: Map<String, Value>,
        progress: Progress,
        telemetry: Telemetry,
        marker: String,
    ) -> Self {
        let mut ev = Self::base(
            run_id,
            step_id,
            agent,
            Phase::Thinking,
            ts,
            meta,
            progress,
            telemetry,
        );
        ev.message_delta = Some(marker);
        ev
    }

    pub fn end(
        run_id: &str,
        step_id: u32,
        agent: &str,
        ts: f64,
        meta: Map<String, Value>,
        progress: Progress,
        telemetry: Telemetry,
        summary: String,
    ) -> Self {
        let mut ev = Self::base(
            run_id,
            step_id,
            agent,
            Phase::End,
            ts,
            meta,
            progress,
            telemetry,
        );
        ev.summary = Some(summary);
        ev
    }

    pub fn error(
        run_id: &str,
        step_id: u32,
        agent: &str,
        ts: f64,
        meta: Map<String, Value>,
        progress: Progress,
        telemetry: Telemetry,
        error: String,
    ) -> Self {
        let mut ev = Self::base(
            run_id,
            step_id,
            agent,
            Phase::Error,
            ts,
            meta,
            progress,
            telemetry,
        );
        ev.error = Some(error);
        ev
    }

    /// True for `end` and `error` — the phases that close a step.
    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::End | Phase::Error)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
