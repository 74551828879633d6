//! Team run start endpoint.
//!
//! `POST /v1/team/runs` takes the run-start envelope, answers with the
//! fresh `run_id` right away, and drives the workflow in a background
//! task — clients follow progress on `/v1/runs/:id/events`. With
//! `?wait=true` the handler blocks and returns the full artifact bundle
//! instead.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::Value;

use bp_domain::prefs::IntegrationSettings;
use bp_team::{TeamWorkflow, Topology};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct TeamRunRequest {
    /// `"sequential"` or `"parallel"`. Defaults to parallel.
    #[serde(default)]
    pub topology: Topology,
    /// The user's design prompt.
    pub prompt: String,
    /// Reviewer participation flags (unknown keys ignored).
    #[serde(default)]
    pub agent_config: Option<Value>,
    /// `{ "mcp": { "bicep": bool, ... } }`.
    #[serde(default)]
    pub integration_settings: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct TeamRunQuery {
    /// Block until completion and return the artifact bundle.
    #[serde(default)]
    pub wait: bool,
}

/// Merge the envelope's two preference payloads into one normalized
/// settings value (the Architect is forced on either way).
pub(crate) fn merge_settings(
    agent_config: Option<&Value>,
    integration_settings: Option<&Value>,
) -> IntegrationSettings {
    let mut merged = serde_json::Map::new();
    if let Some(agents) = agent_config {
        merged.insert("agents".into(), agents.clone());
    }
    if let Some(mcp) = integration_settings.and_then(|v| v.get("mcp")) {
        merged.insert("mcp".into(), mcp.clone());
    }
    IntegrationSettings::normalize(Some(&Value::Object(merged)))
}

fn settings_from_envelope(body: &TeamRunRequest) -> IntegrationSettings {
    merge_settings(body.agent_config.as_ref(), body.integration_settings.as_ref())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/team/runs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn start_team_run(
    State(state): State<AppState>,
    Query(query): Query<TeamRunQuery>,
    Json(body): Json<TeamRunRequest>,
) -> impl IntoResponse {
    if body.prompt.trim().is_empty() {
        return (
            axum::http::StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "prompt is required" })),
        )
            .into_response();
    }

    let settings = settings_from_envelope(&body);
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
            tracing::error!(error = %e, "failed to assemble team");
            return (
                axum::http::StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": format!("failed to assemble team: {e}") })),
            )
                .into_response();
        }
    };

    let run_id = state.bus.new_run();
    state.bus.ensure_run(&run_id);

    if query.wait {
        let result = workflow.run_traced(body.topology, &body.prompt, &run_id).await;
        state.bus.finish(&run_id);
        return match result {
            Ok(artifact) => Json(serde_json::json!(artifact)).into_response(),
            Err(e) => (
                axum::http::StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "run_id": run_id, "error": e.to_string() })),
            )
                .into_response(),
        };
    }

    let bus = state.bus.clone();
    let run_id_for_task = run_id.clone();
    tokio::spawn(async move {
        match workflow
            .run_traced(body.topology, &body.prompt, &run_id_for_task)
            .await
        {
            Ok(artifact) => {
                tracing::info!(
                    run_id = %run_id_for_task,
                    diagram = artifact.diagram.is_some(),
                    "team run completed"
                );
            }
            Err(e) => {
                tracing::error!(run_id = %run_id_for_task, error = %e, "team run failed");
            }
        }
        bus.finish(&run_id_for_task);
    });

    Json(serde_json::json!({ "run_id": run_id })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_merges_agents_and_mcp() {
        let body: TeamRunRequest = serde_json::from_str(
            r#"{
                "topology": "sequential",
                "prompt": "Design a minimal landing zone",
                "agent_config": { "architect": true, "security": true, "dataStorage": true },
                "integration_settings": { "mcp": { "terraform": true } }
            }"#,
        )
        .unwrap();
        assert_eq!(body.topology, Topology::Sequential);
        let settings = settings_from_envelope(&body);
        assert!(settings.agents.architect);
        assert!(settings.agents.security);
        assert!(settings.agents.data_storage);
        assert!(!settings.agents.cost);
        assert!(settings.mcp.terraform);
        assert!(!settings.mcp.bicep);
    }

    #[test]
    fn envelope_defaults_to_parallel_and_architect_only() {
        let body: TeamRunRequest =
            serde_json::from_str(r#"{ "prompt": "Ingest-only data platform" }"#).unwrap();
        assert_eq!(body.topology, Topology::Parallel);
        let settings = settings_from_envelope(&body);
        assert!(settings.agents.architect);
        assert!(!settings.agents.reliability);
        assert!(!settings.mcp.docs);
    }

    #[test]
    fn envelope_ignores_unknown_keys() {
        let body: TeamRunRequest = serde_json::from_str(
            r#"{
                "prompt": "p",
                "agent_config": { "architect": false, "wizard": true },
                "integration_settings": { "mcp": { "bicep": true }, "theme": "dark" }
            }"#,
        )
        .unwrap();
        let settings = settings_from_envelope(&body);
        // Architect cannot be disabled.
        assert!(settings.agents.architect);
        assert!(settings.mcp.bicep);
    }
}
