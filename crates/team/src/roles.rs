//! The role catalog: every agent the team can field, with its authored
//! instructions and its Well-Architected pillar tag.
//!
//! The Architect and FinalEditor are part of every topology; the rest
//! are opt-in via [`AgentFlags`](bp_domain::prefs::AgentFlags).

use bp_domain::prefs::AgentFlags;

/// The canonical diagram schema guidance embedded in the Architect and
/// FinalEditor prompts. Large and authored, so the runner redacts it
/// from anything published to subscribers (see [`crate::redact`]).
pub const STRUCTURED_DIAGRAM_GUIDANCE: &str = r#"STRUCTURED DIAGRAM OUTPUT
Every architecture answer must end with a section titled exactly `Diagram JSON`
containing one fenced ```json block with a single object:
{
  "nodes": [ { "id": "...", "type": "azureService", "position": {"x": 0, "y": 0},
               "data": { "label": "...", "serviceId": "azure:...", "sku": "..." } } ],
  "edges": [ { "id": "...", "source": "<node id>", "target": "<node id>", "label": "..." } ],
  "groups": [ { "id": "...", "kind": "managementGroup|subscription|landingZone|vnet|subnet",
                "label": "...", "parent": "<group id or null>", "children": ["<node or group ids>"] } ]
}
Rules: node ids are unique and stable across revisions; every service belongs to
exactly one group; group hierarchy follows management group -> subscription ->
landing zone -> vnet -> subnet -> service; edges reference existing ids; never
emit commentary inside the fenced block."#;

/// One role-agent the team can field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Architect,
    Security,
    Identity,
    Naming,
    Reliability,
    Cost,
    Compliance,
    Networking,
    Observability,
    DataStorage,
    FinalEditor,
}

impl Role {
    /// The agent name shown in trace events and journals.
    pub fn agent_name(self) -> &'static str {
        match self {
            Role::Architect => "Architect",
            Role::Security => "SecurityReviewer",
            Role::Identity => "IdentityGovernanceReviewer",
            Role::Naming => "NamingEnforcer",
            Role::Reliability => "ReliabilityReviewer",
            Role::Cost => "CostPerfOptimizer",
            Role::Compliance => "ComplianceReviewer",
            Role::Networking => "NetworkingReviewer",
            Role::Observability => "ObservabilityReviewer",
            Role::DataStorage => "DataStorageReviewer",
            Role::FinalEditor => "FinalEditor",
        }
    }

    /// Well-Architected pillar tag attached to sequential steps.
    pub fn waf_pillar(self) -> &'static str {
        match self {
            Role::Security => "Security",
            Role::Identity => "Identity & Governance",
            Role::Naming => "Operational Excellence",
            Role::Reliability => "Reliability",
            Role::Cost => "Cost Optimization",
            Role::Compliance => "Compliance",
            _ => "-",
        }
    }

    /// Whether the flags admit this role. Architect and FinalEditor are
    /// unconditional.
    pub fn enabled(self, flags: &AgentFlags) -> bool {
        match self {
            Role::Architect | Role::FinalEditor => true,
            Role::Security => flags.security,
            Role::Identity => flags.identity,
            Role::Naming => flags.naming,
            Role::Reliability => flags.reliability,
            Role::Cost => flags.cost,
            Role::Compliance => flags.compliance,
            Role::Networking => flags.networking,
            Role::Observability => flags.observability,
            Role::DataStorage => flags.data_storage,
        }
    }

    /// Authored instruction prompt for this role.
    pub fn instructions(self) -> String {
        match self {
            Role::Architect => format!(
                "You are an Azure cloud architect. From the user's requirements, draft a \
                 landing-zone architecture: workloads, network topology, identity boundaries, \
                 shared services, and the rationale for each choice. Organize the answer as a \
                 narrative with headed sections, then finish with the structured diagram.\n\n{}",
                STRUCTURED_DIAGRAM_GUIDANCE
            ),
            Role::Security => "You are an Azure security reviewer. Harden the draft: network \
                 segmentation, private endpoints, Key Vault usage, Defender coverage, encryption \
                 in transit and at rest, secret handling. Preserve every existing service; add \
                 security components rather than replacing workloads. Output the improved \
                 architecture plus a short security checklist, and keep the `Diagram JSON` \
                 section updated."
                .into(),
            Role::Identity => "You are an Identity & Governance reviewer. Review Entra ID design, \
                 role assignments, managed identities, least-privilege RBAC, PIM hints, and \
                 subscription/management-group boundaries; suggest Azure Policy guardrails. \
                 Preserve ALL existing services; add governance components with proper hierarchy \
                 in the `Diagram JSON`. Output a concise RBAC plan and policy suggestions."
                .into(),
            Role::Naming => "You are an Azure naming enforcer. Rewrite resource names to this \
                 org's Azure naming conventions and add tags { env, owner, costCenter, \
                 dataClassification }. Keep the technical design intact and do not drop services \
                 or groups configured by previous reviewers. Output only the updated architecture \
                 text and the naming table; preserve and adjust the `Diagram JSON` section."
                .into(),
            Role::Reliability => "You are an Azure reliability reviewer. Enforce multi-AZ/region \
                 strategy where appropriate, backup/restore, DR with RTO/RPO notes, autoscale and \
                 health probes. If redundancy requires additional services (paired regions, \
                 geo-redundant storage), add them while keeping all previously defined \
                 components. Output the improved architecture plus a reliability checklist, and \
                 update the `Diagram JSON` to reflect topology changes."
                .into(),
            Role::Cost => "You are an Azure cost/perf optimizer. Right-size SKUs, reserve or spot \
                 where relevant, auto-pause for dev/test, storage lifecycle policies, caching \
                 layers. Retain the full architecture footprint; apply cost guidance without \
                 deleting tiers. If the diagram contains aws:* or gcp:* services, add a migration \
                 cost comparison with per-service monthly estimates and a savings verdict. Output \
                 the improved architecture plus five concrete cost levers; adjust SKUs in the \
                 `Diagram JSON` where needed."
                .into(),
            Role::Compliance => "You are a fintech compliance reviewer. Call out audit logging, \
                 immutable logs, separation of duties, data residency, encryption, and key \
                 management. Preserve every existing workload; add required governance components \
                 (Policy, Monitor, Purview) rather than replacing services, recorded in the \
                 `Diagram JSON` with proper hierarchy. Output the improved architecture plus a \
                 short compliance checklist."
                .into(),
            Role::Networking => "You are a Networking reviewer. Validate the topology for \
                 hub-spoke or other recommended patterns, private endpoints, NSG/ASG placement, \
                 peering, routing, and hybrid connectivity. Preserve ALL existing services; add \
                 networking components (NSGs, route tables, private DNS zones) to enhance the \
                 design, not replace it. Give concrete `Diagram JSON` changes with correct \
                 parentage and a short justification per decision."
                .into(),
            Role::Observability => "You are an Observability reviewer. Ensure monitoring, \
                 logging, diagnostic settings, Log Analytics placement, alert rules, and SLOs. \
                 Preserve ALL existing services; add monitoring resources (Application Insights, \
                 Log Analytics, Diagnostic Settings, Alerts, Dashboards) to complement the \
                 architecture. Return a monitoring checklist and any `Diagram JSON` additions \
                 with proper hierarchy and connections."
                .into(),
            Role::DataStorage => "You are a Data & Storage reviewer. Evaluate data flows, storage \
                 choices, retention, backups, encryption, and data residency. Recommend storage \
                 account configurations, database choices, lifecycle policies, and backup/restore \
                 strategies. Preserve ALL existing services and databases; add data-management \
                 components (backup vaults, lifecycle rules, encryption keys) and reflect them in \
                 the `Diagram JSON` with complete hierarchy."
                .into(),
            Role::FinalEditor => format!(
                "You are the final editor. Merge every reviewer's contribution into one coherent \
                 architecture document: deduplicate, resolve conflicts in favor of the stricter \
                 control, keep all agreed services, and finish with the single authoritative \
                 structured diagram.\n\n{}",
                STRUCTURED_DIAGRAM_GUIDANCE
            ),
        }
    }

    /// The sequential pipeline order, before flag filtering.
    pub fn sequential_order() -> [Role; 8] {
        [
            Role::Architect,
            Role::Security,
            Role::Identity,
            Role::Naming,
            Role::Reliability,
            Role::Cost,
            Role::Compliance,
            Role::FinalEditor,
        ]
    }

    /// The reviewer pool for the parallel fan-out, before flag filtering.
    pub fn parallel_pool() -> [Role; 5] {
        [
            Role::Reliability,
            Role::Cost,
            Role::Networking,
            Role::Observability,
            Role::DataStorage,
        ]
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn architect_and_final_editor_always_enabled() {
        let none = AgentFlags::default();
        assert!(Role::Architect.enabled(&none));
        assert!(Role::FinalEditor.enabled(&none));
        assert!(!Role::Security.enabled(&none));
    }

    #[test]
    fn sequential_order_starts_and_ends_fixed() {
        let order = Role::sequential_order();
        assert_eq!(order[0], Role::Architect);
        assert_eq!(order[7], Role::FinalEditor);
    }

    #[test]
    fn pillar_map_matches_sequential_roles() {
        assert_eq!(Role::Security.waf_pillar(), "Security");
        assert_eq!(Role::Identity.waf_pillar(), "Identity & Governance");
        assert_eq!(Role::Naming.waf_pillar(), "Operational Excellence");
        assert_eq!(Role::Reliability.waf_pillar(), "Reliability");
        assert_eq!(Role::Cost.waf_pillar(), "Cost Optimization");
        assert_eq!(Role::Compliance.waf_pillar(), "Compliance");
        assert_eq!(Role::Architect.waf_pillar(), "-");
        assert_eq!(Role::FinalEditor.waf_pillar(), "-");
    }

    #[test]
    fn writer_and_editor_embed_the_guidance_block() {
        assert!(Role::Architect
            .instructions()
            .contains(STRUCTURED_DIAGRAM_GUIDANCE));
        assert!(Role::FinalEditor
            .instructions()
            .contains(STRUCTURED_DIAGRAM_GUIDANCE));
        assert!(!Role::Security
            .instructions()
            .contains(STRUCTURED_DIAGRAM_GUIDANCE));
    }

    #[test]
    fn parallel_pool_respects_flags() {
        let flags = AgentFlags {
            reliability: true,
            networking: true,
            ..AgentFlags::default()
        };
        let enabled: Vec<Role> = Role::parallel_pool()
            .into_iter()
            .filter(|r| r.enabled(&flags))
            .collect();
        assert_eq!(enabled, vec![Role::Reliability, Role::Networking]);
    }
}
