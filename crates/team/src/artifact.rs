//! Artifact extraction: turn the final transcript into a structured
//! bundle.
//!
//! The pipeline finds the embedded `Diagram JSON` block, runs both IaC
//! producers in parallel, and — when the transcript carried no parseable
//! diagram but IaC came back non-empty — asks the Architect to re-derive
//! the diagram from the IaC and splices the canonical section back into
//! the transcript.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::diagram::{parse_json_lenient, DiagramGraph};
use crate::iac::{IacBundle, IacGenerator};
use crate::redact::redact_guidance;

/// The team's output bundle for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunArtifact {
    pub final_text: String,
    pub diagram: Option<DiagramGraph>,
    pub diagram_raw_json: Option<String>,
    pub iac: IacBundle,
    pub run_id: String,
}

fn diagram_section_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)Diagram JSON\s*```json\s*(\{.*?\})\s*```").expect("static regex")
    })
}

/// Find and parse the `Diagram JSON` block. Returns the parsed graph
/// (when the JSON is sound) and the raw JSON text (whenever the section
/// was present at all).
pub fn extract_diagram_payload(final_text: &str) -> (Option<DiagramGraph>, Option<String>) {
    let Some(captures) = diagram_section_regex().captures(final_text) else {
        return (None, None);
    };
    let raw = captures.get(1).map(|m| m.as_str().trim().to_owned());
    let graph = raw
        .as_deref()
        .and_then(parse_json_lenient)
        .and_then(|v| DiagramGraph::from_value(&v));
    if graph.is_none() {
        tracing::warn!("transcript Diagram JSON present but unparseable");
    }
    (graph, raw)
}

/// Splice a canonical `Diagram JSON` section into the report: replace
/// the first existing section, or append one at the end.
pub fn inject_diagram_section(report: &str, raw_json: &str) -> String {
    let payload = format!("Diagram JSON\n```json\n{raw_json}\n```");
    if diagram_section_regex().is_match(report) {
        // NoExpand: the JSON may legitimately contain `$` sequences.
        return diagram_section_regex()
            .replace(report, regex::NoExpand(payload.as_str()))
            .into_owned();
    }
    format!("{}\n\n{payload}", report.trim_end())
}

/// Derive the full artifact bundle from a completed transcript.
pub async fn build_artifact(
    iac: &IacGenerator,
    run_id: &str,
    final_text: String,
) -> RunArtifact {
    let mut final_text = final_text;
    let (mut diagram, mut raw_json) = extract_diagram_payload(&final_text);

    let bundle = iac.generate_bundle(diagram.as_ref(), &final_text).await;

    if diagram.is_none() {
        // No usable diagram in the transcript; if some IaC came back,
        // let the Architect map it back onto the canvas schema.
        if let Some((derived, derived_raw)) = iac.diagram_from_iac(&bundle).await {
            final_text = inject_diagram_section(&final_text, &derived_raw);
            diagram = Some(derived);
            raw_json = Some(derived_raw);
        }
    }

    RunArtifact {
        final_text: redact_guidance(&final_text),
        diagram,
        diagram_raw_json: raw_json,
        iac: bundle,
        run_id: run_id.to_owned(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use bp_backends::mock::{MockBackend, MockScript};
    use bp_backends::AgentHandle;
    use bp_domain::config::McpConfig;
    use bp_domain::prefs::IntegrationSettings;
    use bp_mcp_client::McpRegistry;
    use std::sync::Arc;

    const REPORT_WITH_DIAGRAM: &str = "Landing zone design.\n\nDiagram JSON\n```json\n{\"nodes\": [{\"id\": \"fw\"}], \"edges\": []}\n```\nClosing notes.";

    fn generator(mock: MockBackend) -> IacGenerator {
        IacGenerator::new(
            Arc::new(mock),
            AgentHandle::local("Architect", "instr"),
            Arc::new(McpRegistry::new(McpConfig::default())),
            IntegrationSettings::default(),
        )
    }

    #[test]
    fn extraction_finds_the_block_case_insensitively() {
        let text = "intro\n\ndiagram json\n```JSON\n{\"nodes\": []}\n```";
        let (graph, raw) = extract_diagram_payload(text);
        assert!(graph.is_some());
        assert_eq!(raw.as_deref(), Some("{\"nodes\": []}"));
    }

    #[test]
    fn extraction_spans_newlines() {
        let (graph, _) = extract_diagram_payload(REPORT_WITH_DIAGRAM);
        assert_eq!(graph.unwrap().nodes[0].id, "fw");
    }

    #[test]
    fn missing_section_yields_nothing() {
        let (graph, raw) = extract_diagram_payload("no diagram at all");
        assert!(graph.is_none());
        assert!(raw.is_none());
    }

    #[test]
    fn broken_json_keeps_the_raw_text() {
        let text = "Diagram JSON\n```json\n{\"nodes\": [}\n```";
        let (graph, raw) = extract_diagram_payload(text);
        assert!(graph.is_none());
        assert_eq!(raw.as_deref(), Some("{\"nodes\": [}"));
    }

    #[test]
    fn injection_replaces_an_existing_section() {
        let updated = inject_diagram_section(REPORT_WITH_DIAGRAM, "{\"nodes\": []}");
        assert!(updated.contains("{\"nodes\": []}"));
        assert!(!updated.contains("\"fw\""));
        assert!(updated.contains("Closing notes."));
        // Still exactly one section.
        assert_eq!(updated.matches("Diagram JSON").count(), 1);
    }

    #[test]
    fn injection_appends_when_absent() {
        let updated = inject_diagram_section("Narrative only.", "{\"nodes\": []}");
        assert!(updated.starts_with("Narrative only."));
        assert!(updated.ends_with("```"));
        assert!(updated.contains("Diagram JSON\n```json"));
    }

    #[tokio::test]
    async fn artifact_uses_transcript_diagram_when_present() {
        let mock = MockBackend::new();
        // Both IaC lanes answer; no re-derivation call should be needed.
        let both = r#"{"bicep_code": "bc", "terraform_code": "tc"}"#;
        for _ in 0..2 {
            mock.script(
                "Architect",
                MockScript {
                    run_text: Some(both.into()),
                    ..Default::default()
                },
            );
        }
        let gen = generator(mock);
        let artifact = build_artifact(&gen, "lz-test", REPORT_WITH_DIAGRAM.to_owned()).await;
        assert_eq!(artifact.run_id, "lz-test");
        assert_eq!(artifact.diagram.unwrap().nodes[0].id, "fw");
        assert!(artifact.iac.bicep.unwrap().has_code());
        assert!(artifact.final_text.contains("Closing notes."));
    }

    #[tokio::test]
    async fn missing_diagram_is_rederived_and_injected() {
        let mock = MockBackend::new();
        let both = r#"{"bicep_code": "targetScope = 'subscription'", "terraform_code": "tc"}"#;
        for _ in 0..2 {
            mock.script(
                "Architect",
                MockScript {
                    run_text: Some(both.into()),
                    ..Default::default()
                },
            );
        }
        // Third call is the cartographer re-derivation.
        mock.script(
            "Architect",
            MockScript {
                run_text: Some(r#"{"nodes": [{"id": "derived"}], "edges": []}"#.into()),
                ..Default::default()
            },
        );
        let gen = generator(mock);
        let artifact = build_artifact(&gen, "lz-test", "Narrative without a diagram.".into()).await;
        assert_eq!(artifact.diagram.unwrap().nodes[0].id, "derived");
        assert!(artifact.diagram_raw_json.unwrap().contains("derived"));
        assert!(artifact.final_text.contains("Diagram JSON\n```json"));
    }

    #[tokio::test]
    async fn no_diagram_and_no_iac_still_completes() {
        let mock = MockBackend::new();
        // Both lanes fail outright.
        for _ in 0..2 {
            mock.script(
                "Architect",
                MockScript {
                    stream_error: Some("unreachable".into()),
                    ..Default::default()
                },
            );
        }
        let gen = generator(mock);
        let artifact = build_artifact(&gen, "lz-test", "Narrative only.".into()).await;
        assert!(artifact.diagram.is_none());
        assert!(artifact.diagram_raw_json.is_none());
        assert!(artifact.iac.bicep.is_none());
        assert!(artifact.iac.terraform.is_none());
        assert_eq!(artifact.final_text, "Narrative only.");
    }
}
