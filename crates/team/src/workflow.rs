//! Team topologies: the sequential review pipeline and the
//! draft/fan-out/merge pass.
//!
//! Step ordering contract: within the sequential topology, step k's
//! terminal event strictly precedes step k+1's start. Within the
//! fan-out group there is no ordering between siblings; the aggregator
//! only starts after every reviewer reached its terminal event. A
//! failed reviewer does not cancel its siblings — a partial set of
//! reviews is still worth merging — but caller cancellation (dropping
//! the run future) cancels everything in flight.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use bp_backends::{AgentHandle, ChatBackend};
use bp_domain::error::{Error, Result};
use bp_domain::prefs::IntegrationSettings;
use bp_mcp_client::McpRegistry;

use crate::artifact::{build_artifact, RunArtifact};
use crate::bus::TraceBus;
use crate::iac::IacGenerator;
use crate::roles::Role;
use crate::runner::run_agent_streamed;

/// Delimiter between reviewer outputs fed to the aggregator.
const REVIEW_DELIMITER: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Sequential,
    #[default]
    Parallel,
}

pub struct TeamWorkflow {
    backend: Arc<dyn ChatBackend>,
    bus: Arc<TraceBus>,
    mcp: Arc<McpRegistry>,
    settings: IntegrationSettings,
    handles: HashMap<Role, AgentHandle>,
}

impl TeamWorkflow {
    /// Provision handles for every enabled role. The Architect and
    /// FinalEditor are provisioned unconditionally.
    pub async fn new(
        backend: Arc<dyn ChatBackend>,
        bus: Arc<TraceBus>,
        mcp: Arc<McpRegistry>,
        settings: IntegrationSettings,
    ) -> Result<Self> {
        let mut handles = HashMap::new();
        let all = [
            Role::Architect,
            Role::Security,
            Role::Identity,
            Role::Naming,
            Role::Reliability,
            Role::Cost,
            Role::Compliance,
            Role::Networking,
            Role::Observability,
            Role::DataStorage,
            Role::FinalEditor,
        ];
        for role in all {
            if role.enabled(&settings.agents) {
                let handle = backend
                    .create_agent(role.agent_name(), &role.instructions())
                    .await?;
                handles.insert(role, handle);
            }
        }
        let roster: Vec<&str> = all
            .iter()
            .filter(|r| handles.contains_key(r))
            .map(|r| r.agent_name())
            .collect();
        tracing::info!(agents = roster.len(), roster = %roster.join(", "), "team assembled");
        Ok(Self {
            backend,
            bus,
            mcp,
            settings,
            handles,
        })
    }

    fn handle(&self, role: Role) -> Result<&AgentHandle> {
        self.handles.get(&role).ok_or_else(|| {
            Error::Other(format!(
                "{} was scheduled but is not enabled",
                role.agent_name()
            ))
        })
    }

    /// The enabled sequential pipeline, in order.
    pub fn sequential_pipeline(&self) -> Vec<Role> {
        Role::sequential_order()
            .into_iter()
            .filter(|r| self.handles.contains_key(r))
            .collect()
    }

    /// The enabled parallel reviewer pool, in order.
    pub fn parallel_reviewers(&self) -> Vec<Role> {
        Role::parallel_pool()
            .into_iter()
            .filter(|r| self.handles.contains_key(r))
            .collect()
    }

    /// Run the full topology and distill the artifact bundle. The
    /// caller owns `finish` on the bus — including on the error path —
    /// so subscribers always unblock.
    pub async fn run_traced(
        &self,
        topology: Topology,
        prompt: &str,
        run_id: &str,
    ) -> Result<RunArtifact> {
        let final_text = match topology {
            Topology::Sequential => self.run_sequential_traced(prompt, run_id).await?,
            Topology::Parallel => self.run_parallel_pass_traced(prompt, run_id).await?,
        };
        let iac = IacGenerator::new(
            self.backend.clone(),
            self.handle(Role::Architect)?.clone(),
            self.mcp.clone(),
            self.settings,
        );
        Ok(build_artifact(&iac, run_id, final_text).await)
    }

    /// Ordered pipeline: each step's output is the next step's prompt.
    /// A failing step aborts the remaining steps (its error event has
    /// already been emitted by the runner).
    pub async fn run_sequential_traced(&self, prompt: &str, run_id: &str) -> Result<String> {
        self.bus.ensure_run(run_id);
        let pipeline = self.sequential_pipeline();
        let total = pipeline.len() as u32;

        let mut messages = prompt.to_owned();
        for (i, role) in pipeline.iter().enumerate() {
            let out = run_agent_streamed(
                &self.bus,
                &self.backend,
                run_id,
                i as u32 + 1,
                total,
                self.handle(*role)?,
                &messages,
                meta(&[("waf_pillar", role.waf_pillar())]),
            )
            .await?;
            messages = out;
        }
        Ok(messages)
    }

    /// Draft, fan out reviewers on the draft in parallel, merge.
    pub async fn run_parallel_pass_traced(&self, prompt: &str, run_id: &str) -> Result<String> {
        self.bus.ensure_run(run_id);
        let reviewers = self.parallel_reviewers();
        let total = 1 + reviewers.len() as u32 + 1;

        let draft = run_agent_streamed(
            &self.bus,
            &self.backend,
            run_id,
            1,
            total,
            self.handle(Role::Architect)?,
            prompt,
            meta(&[("waf_pillar", "-")]),
        )
        .await?;

        let mut reviews: Vec<String> = Vec::new();
        if !reviewers.is_empty() {
            let fanout = reviewers.iter().enumerate().map(|(idx, role)| {
                let draft = draft.as_str();
                async move {
                    run_agent_streamed(
                        &self.bus,
                        &self.backend,
                        run_id,
                        idx as u32 + 2,
                        total,
                        self.handle(*role)?,
                        draft,
                        meta(&[
                            ("parallel_group", "fanout-1"),
                            ("waf_pillar", "parallel"),
                        ]),
                    )
                    .await
                }
            });
            for (role, outcome) in reviewers
                .iter()
                .zip(futures_util::future::join_all(fanout).await)
            {
                match outcome {
                    Ok(text) => reviews.push(text),
                    Err(e) => {
                        // Terminal error event already emitted; merge
                        // proceeds over the surviving reviews.
                        tracing::warn!(
                            run_id,
                            reviewer = role.agent_name(),
                            error = %e,
                            "reviewer failed, continuing with remaining reviews"
                        );
                    }
                }
            }
        }

        let merged = if reviews.is_empty() {
            draft.clone()
        } else {
            reviews.join(REVIEW_DELIMITER)
        };

        run_agent_streamed(
            &self.bus,
            &self.backend,
            run_id,
            total,
            total,
            self.handle(Role::FinalEditor)?,
            &merged,
            meta(&[("aggregator", "FinalEditor")]),
        )
        .await
    }
}

fn meta(entries: &[(&str, &str)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_owned(), Value::String((*v).to_owned())))
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
