//! The Blueprint gateway: HTTP/WebSocket surface over the team runtime.
//!
//! Endpoints:
//! - `POST /v1/team/runs`          — start a team run (run-start envelope)
//! - `GET  /v1/runs/:id/events`    — SSE trace stream (replay + live)
//! - `GET  /v1/ws`                 — WebSocket bridge (subscribe + chat)
//! - `GET  /healthz`               — liveness

pub mod api;
pub mod state;
pub mod ws;
