//! The agent runner: executes one role-agent as step `k` of `N` and
//! translates backend chunks into trace events.
//!
//! Per invocation: one `start` event, zero or more `delta`/`thinking`
//! events, and exactly one terminal `end` or `error` — the terminal
//! event is guaranteed even when the driving future is dropped
//! (cancellation emits `error("cancelled")` from the guard).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio::time::Instant;

use bp_backends::{AgentHandle, ChatBackend};
use bp_domain::error::Result;
use bp_domain::trace::{Progress, Telemetry, TraceEvent};

use crate::bus::TraceBus;
use crate::redact::{redact_guidance, shorten_for_tracing, TRACE_DELTA_CHARS};

/// How long a stream may stay silent before a `thinking` heartbeat.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

fn wall_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Emits `error("cancelled")` if the step never reached a terminal
/// event — which happens exactly when the driving future is dropped.
struct StepGuard {
    bus: Arc<TraceBus>,
    run_id: String,
    step_id: u32,
    agent: String,
    meta: Map<String, Value>,
    progress: Progress,
    armed: bool,
}

impl StepGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StepGuard {
    fn drop(&mut self) {
        if self.armed {
            self.bus.emit(&TraceEvent::error(
                &self.run_id,
                self.step_id,
                &self.agent,
                wall_clock(),
                self.meta.clone(),
                self.progress,
                Telemetry::default(),
                "cancelled".into(),
            ));
        }
    }
}

/// Run one agent step: stream, heartbeat, extract deltas, fall back,
/// redact, and return the step's full text.
pub async fn run_agent_streamed(
    bus: &Arc<TraceBus>,
    backend: &Arc<dyn ChatBackend>,
    run_id: &str,
    step_id: u32,
    total: u32,
    agent: &AgentHandle,
    input: &str,
    meta: Map<String, Value>,
) -> Result<String> {
    let started = Instant::now();
    let name = agent.name.clone();
    let progress = Progress {
        current: step_id,
        total,
    };
    let telemetry = |tokens_out: u64| Telemetry {
        tokens_in: 0,
        tokens_out,
        latency_ms: started.elapsed().as_millis() as u64,
    };

    tracing::info!(run_id, agent = %name, step = step_id, total, "step starting");
    bus.emit(&TraceEvent::start(
        run_id,
        step_id,
        &name,
        wall_clock(),
        meta.clone(),
        progress,
    ));

    let mut guard = StepGuard {
        bus: bus.clone(),
        run_id: run_id.to_owned(),
        step_id,
        agent: name.clone(),
        meta: meta.clone(),
        progress,
        armed: true,
    };

    let emit_error = |bus: &TraceBus, message: &str, tokens_out: u64| {
        bus.emit(&TraceEvent::error(
            run_id,
            step_id,
            &name,
            wall_clock(),
            meta.clone(),
            progress,
            telemetry(tokens_out),
            message.to_owned(),
        ));
    };

    let mut out_text = String::new();
    let mut emitted_any_delta = false;
    let mut last_response_text: Option<String> = None;
    let mut tokens_out: u64 = 0;

    let mut stream = match backend.run_stream(agent, input, &[]).await {
        Ok(s) => s,
        Err(e) => {
            emit_error(bus, &e.to_string(), 0);
            guard.disarm();
            return Err(e);
        }
    };

    let mut next_heartbeat = Instant::now() + HEARTBEAT_INTERVAL;
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(chunk)) => {
                    let extraction = chunk.extract();
                    if let Some(text) = extraction.response_text {
                        last_response_text = Some(text);
                    }
                    for delta in extraction.deltas {
                        tokens_out += delta.split_whitespace().count() as u64;
                        bus.emit(&TraceEvent::delta(
                            run_id,
                            step_id,
                            &name,
                            wall_clock(),
                            meta.clone(),
                            progress,
                            telemetry(tokens_out),
                            shorten_for_tracing(&delta, TRACE_DELTA_CHARS),
                        ));
                        out_text.push_str(&delta);
                        emitted_any_delta = true;
                        next_heartbeat = Instant::now() + HEARTBEAT_INTERVAL;
                    }
                }
                Some(Err(e)) => {
                    emit_error(bus, &e.to_string(), tokens_out);
                    guard.disarm();
                    return Err(e);
                }
                None => break,
            },
            _ = tokio::time::sleep_until(next_heartbeat) => {
                // Heartbeat for long silent reasoning; never counts
                // toward tokens_out.
                bus.emit(&TraceEvent::thinking(
                    run_id,
                    step_id,
                    &name,
                    wall_clock(),
                    meta.clone(),
                    progress,
                    telemetry(0),
                    format!("[{name} is analyzing and reasoning...]"),
                ));
                next_heartbeat = Instant::now() + HEARTBEAT_INTERVAL;
            }
        }
    }

    let mut final_text = out_text;
    if final_text.is_empty() {
        if let Some(text) = last_response_text {
            final_text = text;
        }
    }
    if final_text.trim().is_empty() {
        // The stream produced nothing usable; try one blocking call.
        // Its failure is not fatal — the streamed result already stands.
        match backend.run(agent, input, &[]).await {
            Ok(text) if !text.trim().is_empty() => final_text = text,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(agent = %name, error = %e, "non-streamed fallback failed");
            }
        }
    }

    if !emitted_any_delta && !final_text.trim().is_empty() {
        // Synthetic delta so subscribers see content even when the
        // backend only produced a terminal snapshot.
        tokens_out += final_text.split_whitespace().count() as u64;
        bus.emit(&TraceEvent::delta(
            run_id,
            step_id,
            &name,
            wall_clock(),
            meta.clone(),
            progress,
            telemetry(tokens_out),
            shorten_for_tracing(&final_text, TRACE_DELTA_CHARS),
        ));
    }

    bus.emit(&TraceEvent::end(
        run_id,
        step_id,
        &name,
        wall_clock(),
        meta,
        progress,
        telemetry(tokens_out),
        format!("{name} completed"),
    ));
    guard.disarm();
    tracing::info!(run_id, agent = %name, step = step_id, total, "step completed");

    Ok(redact_guidance(&final_text))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
