//! WebSocket bridge: live trace subscription and team runs over one
//! socket.
//!
//! Flow:
//! 1. Client connects to `/v1/ws` and sends JSON frames.
//! 2. `subscribe_run` attaches to a run: live forwarding when the run is
//!    active (journal replay first, then live `trace_event` frames),
//!    pure replay otherwise.
//! 3. `team_stream_chat` starts a run on this socket: `run_started`,
//!    `trace_event` frames while agents work, then `team_final` and
//!    `run_completed`.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use bp_team::{TeamWorkflow, Topology};

use crate::api::team::merge_settings;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    SubscribeRun {
        run_id: String,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    TeamStreamChat {
        /// The design prompt. `message` is accepted as an alias for
        /// older canvas builds.
        #[serde(alias = "message")]
        prompt: String,
        #[serde(default)]
        conversation_id: Option<String>,
        /// Fan-out/fan-in pass when true (the default), sequential
        /// pipeline when false.
        #[serde(default = "d_true")]
        parallel: bool,
        #[serde(default)]
        agent_config: Option<Value>,
        #[serde(default)]
        integration_settings: Option<Value>,
    },
}

fn d_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /v1/ws — upgrade to WebSocket.
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Outbound channel: forwarder tasks and the handler both write here;
    // one writer task owns the sink.
    let (out_tx, mut out_rx) = mpsc::channel::<Value>(64);
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if ws_sink
                .send(Message::Text(frame.to_string()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::SubscribeRun {
                    run_id,
                    conversation_id,
                }) => {
                    handle_subscribe_run(&state, &out_tx, run_id, conversation_id).await;
                }
                Ok(ClientFrame::TeamStreamChat {
                    prompt,
                    conversation_id,
                    parallel,
                    agent_config,
                    integration_settings,
                }) => {
                    handle_team_stream_chat(
                        &state,
                        &out_tx,
                        prompt,
                        conversation_id,
                        parallel,
                        agent_config,
                        integration_settings,
                    )
                    .await;
                }
                Err(e) => {
                    let _ = out_tx
                        .send(json!({ "type": "error", "message": format!("bad frame: {e}") }))
                        .await;
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    drop(out_tx);
    let _ = writer.await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// subscribe_run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_subscribe_run(
    state: &AppState,
    out_tx: &mpsc::Sender<Value>,
    run_id: String,
    conversation_id: Option<String>,
) {
    if run_id.is_empty() {
        let _ = out_tx
            .send(json!({ "type": "error", "message": "run_id is required" }))
            .await;
        return;
    }

    if state.bus.is_active(&run_id) {
        let _ = out_tx
            .send(json!({ "type": "subscribed_run", "run_id": run_id, "mode": "live" }))
            .await;
        let state = state.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            forward_trace_events(&state, &run_id, &out_tx, conversation_id.as_deref()).await;
        });
    } else {
        let _ = out_tx
            .send(json!({ "type": "subscribed_run", "run_id": run_id, "mode": "replay" }))
            .await;
        let replayed = replay_trace_log(state, &run_id, out_tx, conversation_id.as_deref()).await;
        if replayed {
            let _ = out_tx
                .send(json!({ "type": "run_completed", "run_id": run_id, "replayed": true }))
                .await;
        } else {
            let _ = out_tx
                .send(json!({ "type": "trace_event_backlog_empty", "run_id": run_id }))
                .await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// team_stream_chat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_team_stream_chat(
    state: &AppState,
    out_tx: &mpsc::Sender<Value>,
    prompt: String,
    conversation_id: Option<String>,
    parallel: bool,
    agent_config: Option<Value>,
    integration_settings: Option<Value>,
) {
    if prompt.trim().is_empty() {
        let _ = out_tx
            .send(json!({ "type": "error", "message": "prompt is required" }))
            .await;
        return;
    }

    let settings = merge_settings(agent_config.as_ref(), integration_settings.as_ref());
    let workflow = match TeamWorkflow::new(
        state.backend.clone(),
        state.bus.clone(),
        state.mcp.clone(),
        settings,
    )
    .await
    {
        Ok(wf) => wf,
        Err(e) => {
            let _ = out_tx
                .send(json!({
                    "type": "error",
                    "message": format!("failed to assemble team: {e}"),
                }))
                .await;
            return;
        }
    };

    // Mint the run id up front so progress streams immediately.
    let run_id = state.bus.new_run();
    state.bus.ensure_run(&run_id);

    let forwarder = {
        let state = state.clone();
        let out_tx = out_tx.clone();
        let run_id = run_id.clone();
        let conversation_id = conversation_id.clone();
        tokio::spawn(async move {
            forward_trace_events(&state, &run_id, &out_tx, conversation_id.as_deref()).await;
        })
    };

    let _ = out_tx
        .send(json!({
            "type": "run_started",
            "run_id": run_id,
            "conversation_id": conversation_id,
        }))
        .await;

    let topology = if parallel {
        Topology::Parallel
    } else {
        Topology::Sequential
    };

    match workflow.run_traced(topology, &prompt, &run_id).await {
        Ok(artifact) => {
            let _ = out_tx
                .send(json!({
                    "type": "team_final",
                    "run_id": run_id,
                    "conversation_id": conversation_id,
                    "message": artifact.final_text,
                    "diagram": artifact.diagram,
                    "diagram_raw": artifact.diagram_raw_json,
                    "iac": artifact.iac,
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                }))
                .await;
            state.bus.finish(&run_id);
            let _ = out_tx
                .send(json!({
                    "type": "run_completed",
                    "run_id": run_id,
                    "conversation_id": conversation_id,
                }))
                .await;
        }
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "team run failed");
            let _ = out_tx
                .send(json!({
                    "type": "error",
                    "run_id": run_id,
                    "message": format!("failed to run agent team: {e}"),
                }))
                .await;
            state.bus.finish(&run_id);
        }
    }

    // Let the forwarder drain the sentinel, then make sure it is gone.
    if tokio::time::timeout(std::time::Duration::from_secs(5), forwarder)
        .await
        .is_err()
    {
        tracing::debug!(run_id = %run_id, "trace forwarder did not drain in time");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trace forwarding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wrap one bus payload as a `trace_event` frame.
fn trace_frame(mut payload: Value, conversation_id: Option<&str>) -> Value {
    if let Some(map) = payload.as_object_mut() {
        map.insert("type".into(), Value::String("trace_event".into()));
        map.insert(
            "conversation_id".into(),
            conversation_id
                .map(|c| Value::String(c.to_owned()))
                .unwrap_or(Value::Null),
        );
    }
    payload
}

/// Send the persisted backlog. Returns whether anything was replayed.
async fn replay_trace_log(
    state: &AppState,
    run_id: &str,
    out_tx: &mpsc::Sender<Value>,
    conversation_id: Option<&str>,
) -> bool {
    let mut replayed = false;
    for record in state.bus.read_persisted(run_id).await {
        replayed = true;
        if out_tx
            .send(trace_frame(record, conversation_id))
            .await
            .is_err()
        {
            break;
        }
    }
    replayed
}

/// Attach to the run, replay the backlog, then forward live events
/// until the finish sentinel. Attaching before the replay closes the
/// window where an event could slip between the two.
async fn forward_trace_events(
    state: &AppState,
    run_id: &str,
    out_tx: &mpsc::Sender<Value>,
    conversation_id: Option<&str>,
) {
    let mut sub = state.bus.attach(run_id);
    replay_trace_log(state, run_id, out_tx, conversation_id).await;

    loop {
        match sub.rx.recv().await {
            Some(Some(payload)) => {
                let value: Value = match serde_json::from_str(&payload) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if out_tx
                    .send(trace_frame(value, conversation_id))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Some(None) | None => break,
        }
    }
    state.bus.detach(run_id, sub.id);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use bp_domain::trace::{Progress, TraceEvent};
    use std::sync::Arc;

    fn test_state() -> AppState {
        AppState {
            config: Arc::new(bp_domain::config::Config::default()),
            backend: Arc::new(bp_backends::MockBackend::new()),
            bus: bp_team::TraceBus::new(None),
            mcp: Arc::new(bp_mcp_client::McpRegistry::new(Default::default())),
        }
    }

    #[test]
    fn client_frames_parse() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{ "type": "subscribe_run", "run_id": "lz-1", "conversation_id": "c9" }"#,
        )
        .unwrap();
        assert!(matches!(
            frame,
            ClientFrame::SubscribeRun { ref run_id, .. } if run_id == "lz-1"
        ));

        let frame: ClientFrame = serde_json::from_str(
            r#"{ "type": "team_stream_chat", "message": "design it", "parallel": false }"#,
        )
        .unwrap();
        match frame {
            ClientFrame::TeamStreamChat {
                prompt, parallel, ..
            } => {
                assert_eq!(prompt, "design it");
                assert!(!parallel);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn team_stream_chat_defaults_to_parallel() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{ "type": "team_stream_chat", "prompt": "p" }"#).unwrap();
        match frame {
            ClientFrame::TeamStreamChat { parallel, .. } => assert!(parallel),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn trace_frame_mirrors_the_event_payload() {
        let ev = TraceEvent::start(
            "lz-1",
            2,
            "SecurityReviewer",
            3.5,
            serde_json::Map::new(),
            Progress {
                current: 2,
                total: 8,
            },
        );
        let payload: Value = serde_json::to_value(&ev).unwrap();
        let frame = trace_frame(payload, Some("c9"));
        assert_eq!(frame["type"], "trace_event");
        assert_eq!(frame["run_id"], "lz-1");
        assert_eq!(frame["step_id"], 2);
        assert_eq!(frame["agent"], "SecurityReviewer");
        assert_eq!(frame["conversation_id"], "c9");
    }

    #[tokio::test]
    async fn subscribe_unknown_run_reports_empty_backlog() {
        let state = test_state();
        let (out_tx, mut out_rx) = mpsc::channel(16);
        handle_subscribe_run(&state, &out_tx, "lz-ghost".into(), None).await;

        let first = out_rx.recv().await.unwrap();
        assert_eq!(first["type"], "subscribed_run");
        assert_eq!(first["mode"], "replay");
        let second = out_rx.recv().await.unwrap();
        assert_eq!(second["type"], "trace_event_backlog_empty");
    }

    #[tokio::test]
    async fn subscribe_active_run_goes_live() {
        let state = test_state();
        state.bus.ensure_run("lz-live");
        let (out_tx, mut out_rx) = mpsc::channel(16);
        handle_subscribe_run(&state, &out_tx, "lz-live".into(), None).await;

        let first = out_rx.recv().await.unwrap();
        assert_eq!(first["mode"], "live");

        // Give the forwarder time to attach, then emit + finish.
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        state.bus.emit(&TraceEvent::start(
            "lz-live",
            1,
            "Architect",
            1.0,
            serde_json::Map::new(),
            Progress {
                current: 1,
                total: 2,
            },
        ));
        state.bus.finish("lz-live");

        let frame = out_rx.recv().await.unwrap();
        assert_eq!(frame["type"], "trace_event");
        assert_eq!(frame["agent"], "Architect");
    }

    #[tokio::test]
    async fn team_stream_chat_streams_and_completes() {
        let state = test_state();
        let (out_tx, mut out_rx) = mpsc::channel(256);

        handle_team_stream_chat(
            &state,
            &out_tx,
            "Design a minimal landing zone".into(),
            Some("c1".into()),
            true,
            Some(serde_json::json!({ "reliability": true })),
            None,
        )
        .await;

        let mut frames = Vec::new();
        while let Ok(frame) = out_rx.try_recv() {
            frames.push(frame);
        }
        let types: Vec<&str> = frames
            .iter()
            .map(|f| f["type"].as_str().unwrap())
            .collect();
        assert_eq!(types.first(), Some(&"run_started"));
        assert!(types.contains(&"trace_event"));
        let final_idx = types.iter().position(|t| *t == "team_final").unwrap();
        let completed_idx = types.iter().position(|t| *t == "run_completed").unwrap();
        assert!(final_idx < completed_idx);

        let team_final = &frames[final_idx];
        assert!(team_final["message"].as_str().is_some());
        assert!(team_final["run_id"].as_str().unwrap().starts_with("lz-"));
        assert_eq!(team_final["conversation_id"], "c1");
        assert!(!state.bus.is_active(team_final["run_id"].as_str().unwrap()));
    }

    #[tokio::test]
    async fn team_stream_chat_requires_a_prompt() {
        let state = test_state();
        let (out_tx, mut out_rx) = mpsc::channel(16);
        handle_team_stream_chat(&state, &out_tx, "  ".into(), None, true, None, None).await;
        let frame = out_rx.recv().await.unwrap();
        assert_eq!(frame["type"], "error");
    }
}
