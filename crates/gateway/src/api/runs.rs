//! Trace subscription over SSE.
//!
//! `GET /v1/runs/:run_id/events` replays the journal first, then — if
//! the run is still active — attaches a live subscriber and streams
//! until the finish sentinel. A run we have never seen produces a single
//! `end` event so clients do not hang on an empty stream.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream::Stream;
use futures_util::StreamExt;

use crate::state::AppState;

pub async fn run_events_sse(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> impl IntoResponse {
    Sse::new(event_source(state, run_id))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn event_source(
    state: AppState,
    run_id: String,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let mut sent_any = false;

        for record in state.bus.read_persisted(&run_id).await {
            sent_any = true;
            yield Ok(Event::default().data(record.to_string()));
        }

        if state.bus.is_active(&run_id) {
            let mut live = state.bus.clone().stream(&run_id);
            while let Some(payload) = live.next().await {
                sent_any = true;
                yield Ok(Event::default().data(payload));
            }
        }

        if !sent_any {
            yield Ok(Event::default().event("end").data("{}"));
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use bp_domain::trace::{Progress, TraceEvent};
    use std::sync::Arc;

    fn test_state(journal_dir: Option<std::path::PathBuf>) -> AppState {
        AppState {
            config: Arc::new(bp_domain::config::Config::default()),
            backend: Arc::new(bp_backends::MockBackend::new()),
            bus: bp_team::TraceBus::new(journal_dir),
            mcp: Arc::new(bp_mcp_client::McpRegistry::new(Default::default())),
        }
    }

    fn start_event(run_id: &str) -> TraceEvent {
        TraceEvent::start(
            run_id,
            1,
            "Architect",
            1.0,
            serde_json::Map::new(),
            Progress {
                current: 1,
                total: 2,
            },
        )
    }

    #[tokio::test]
    async fn unknown_run_yields_single_end_event() {
        let state = test_state(None);
        let mut source = Box::pin(event_source(state, "never-ran".into()));
        let first = source.next().await.unwrap().unwrap();
        // Axum renders the event name + data; we just confirm the stream
        // closes after one item.
        drop(first);
        assert!(source.next().await.is_none());
    }

    #[tokio::test]
    async fn finished_run_replays_journal_then_closes() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(Some(dir.path().to_owned()));
        state.bus.ensure_run("lz-replay");
        state.bus.emit(&start_event("lz-replay"));
        state.bus.finish("lz-replay");

        // Wait for the journal writer to flush the line.
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if !state.bus.read_persisted("lz-replay").await.is_empty() {
                break;
            }
        }

        let mut source = Box::pin(event_source(state, "lz-replay".into()));
        assert!(source.next().await.is_some());
        assert!(source.next().await.is_none());
    }

    #[tokio::test]
    async fn active_run_streams_live_until_finish() {
        let state = test_state(None);
        state.bus.ensure_run("lz-live");

        let bus = state.bus.clone();
        let task = tokio::spawn(async move {
            // Give the subscriber a moment to attach, then emit and finish.
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            bus.emit(&start_event("lz-live"));
            bus.finish("lz-live");
        });

        let mut source = Box::pin(event_source(state, "lz-live".into()));
        let mut count = 0;
        while let Some(_item) = source.next().await {
            count += 1;
        }
        assert_eq!(count, 1);
        task.await.unwrap();
    }
}
