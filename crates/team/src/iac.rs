//! The IaC generator pair: Bicep and Terraform producers.
//!
//! Each producer prefers a schema-grounded path — the matching MCP tool
//! attached to the model call — when the integration preference is on
//! and the session is available, and otherwise falls back to a plain
//! model call. Model output is parsed leniently; an unparseable reply
//! becomes an empty template with an `error` marker in `parameters`,
//! never a synthesized template.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use bp_backends::{AgentHandle, ChatBackend, McpToolRef};
use bp_domain::prefs::IntegrationSettings;
use bp_mcp_client::{McpKind, McpRegistry, McpSession};

use crate::diagram::{parse_json_lenient, DiagramGraph};
use crate::roles::STRUCTURED_DIAGRAM_GUIDANCE;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bundle types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One generated template: the code plus parameter metadata. A failed
/// generation carries empty code and an `error` entry in `parameters`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IacTemplate {
    pub code: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl IacTemplate {
    fn error(message: impl Into<String>) -> Self {
        let mut parameters = Map::new();
        parameters.insert("error".into(), Value::String(message.into()));
        Self {
            code: String::new(),
            parameters,
        }
    }

    /// True when this template carries usable code.
    pub fn has_code(&self) -> bool {
        !self.code.trim().is_empty()
    }
}

/// The pair of generated artifacts. Either lane may be `None` when its
/// producer's model call failed outright.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IacBundle {
    pub bicep: Option<IacTemplate>,
    pub terraform: Option<IacTemplate>,
}

/// Result of an MCP-backed template validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![reason.into()],
            warnings: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct IacGenerator {
    backend: Arc<dyn ChatBackend>,
    /// Fresh single-shot Architect handle for helper calls.
    architect: AgentHandle,
    mcp: Arc<McpRegistry>,
    settings: IntegrationSettings,
}

impl IacGenerator {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        architect: AgentHandle,
        mcp: Arc<McpRegistry>,
        settings: IntegrationSettings,
    ) -> Self {
        Self {
            backend,
            architect,
            mcp,
            settings,
        }
    }

    /// Run both producers concurrently.
    pub async fn generate_bundle(
        &self,
        diagram: Option<&DiagramGraph>,
        narrative: &str,
    ) -> IacBundle {
        let (bicep, terraform) = tokio::join!(
            self.generate_bicep(diagram, narrative),
            self.generate_terraform(diagram, narrative),
        );
        tracing::debug!(
            bicep = bicep.is_some(),
            terraform = terraform.is_some(),
            "IaC bundle generated"
        );
        IacBundle { bicep, terraform }
    }

    /// Generate the Bicep template. `None` only when the model call
    /// itself failed; malformed output yields an error-marker template.
    pub async fn generate_bicep(
        &self,
        diagram: Option<&DiagramGraph>,
        narrative: &str,
    ) -> Option<IacTemplate> {
        // Schema-grounded path needs both the preference and a diagram.
        let session = match diagram {
            Some(_) => self.mcp.get(McpKind::Bicep, &self.settings.mcp).await,
            None => None,
        };

        if let Some(session) = session {
            let tools = self.tool_refs(&session).await;
            let prompt = format!(
                "{BICEP_MCP_INSTRUCTION}\n\nDiagram Data: {}",
                iac_payload(diagram, narrative, "bicep")
            );
            match self.backend.run(&self.architect, &prompt, &tools).await {
                Ok(text) => return Some(parse_template(&text, "bicep_code", Map::new())),
                Err(e) => {
                    tracing::warn!(error = %e, "MCP-grounded Bicep call failed, using plain path");
                }
            }
        }

        let prompt = format!(
            "{BICEP_INSTRUCTION}\n\nDiagram Data: {}",
            iac_payload(diagram, narrative, "bicep")
        );
        match self.backend.run(&self.architect, &prompt, &[]).await {
            Ok(text) => Some(parse_template(&text, "bicep_code", Map::new())),
            Err(e) => {
                tracing::warn!(error = %e, "Bicep generation failed");
                None
            }
        }
    }

    /// Generate the Terraform configuration. Same contract as Bicep.
    pub async fn generate_terraform(
        &self,
        diagram: Option<&DiagramGraph>,
        narrative: &str,
    ) -> Option<IacTemplate> {
        let session = self.mcp.get(McpKind::Terraform, &self.settings.mcp).await;

        let mut default_params = Map::new();
        default_params.insert("provider".into(), Value::String("azurerm".into()));

        if let Some(session) = session {
            let tools = self.tool_refs(&session).await;
            let prompt = format!(
                "{TERRAFORM_MCP_INSTRUCTION}\n\nArchitecture: {}",
                iac_payload(diagram, narrative, "terraform")
            );
            match self.backend.run(&self.architect, &prompt, &tools).await {
                Ok(text) => {
                    return Some(parse_template(&text, "terraform_code", default_params));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "MCP-grounded Terraform call failed, using plain path");
                }
            }
        }

        let prompt = format!(
            "{TERRAFORM_INSTRUCTION}\n\nArchitecture: {}",
            iac_payload(diagram, narrative, "terraform")
        );
        match self.backend.run(&self.architect, &prompt, &[]).await {
            Ok(text) => Some(parse_template(&text, "terraform_code", default_params)),
            Err(e) => {
                tracing::warn!(error = %e, "Terraform generation failed");
                None
            }
        }
    }

    /// Validate a Bicep template against the schema tools.
    pub async fn validate_bicep(&self, bicep_code: &str) -> ValidationReport {
        let Some(session) = self.mcp.get(McpKind::Bicep, &self.settings.mcp).await else {
            return ValidationReport::invalid("Bicep MCP tool not available");
        };
        let tools = self.tool_refs(&session).await;
        let prompt = format!(
            "Validate this Bicep template for syntax and schema correctness using the Azure \
             Bicep MCP tools. Check resource types, properties, and API versions. Return ONLY \
             JSON: {{\"valid\": boolean, \"errors\": [\"...\"], \"warnings\": [\"...\"]}}\n\n\
             ```bicep\n{bicep_code}\n```"
        );
        self.run_validation(&prompt, &tools).await
    }

    /// Validate a Terraform configuration against the registry tools.
    pub async fn validate_terraform(&self, terraform_code: &str) -> ValidationReport {
        let Some(session) = self.mcp.get(McpKind::Terraform, &self.settings.mcp).await else {
            return ValidationReport::invalid("Terraform MCP tool not available");
        };
        let tools = self.tool_refs(&session).await;
        let prompt = format!(
            "Validate this Terraform configuration for syntax and provider schema correctness \
             using the Terraform MCP tools. Check resource types, arguments, and provider \
             requirements. Provider: azurerm. Return ONLY JSON: {{\"valid\": boolean, \
             \"errors\": [\"...\"], \"warnings\": [\"...\"]}}\n\n```hcl\n{terraform_code}\n```"
        );
        self.run_validation(&prompt, &tools).await
    }

    async fn run_validation(&self, prompt: &str, tools: &[McpToolRef]) -> ValidationReport {
        match self.backend.run(&self.architect, prompt, tools).await {
            Ok(text) => parse_json_lenient(&text)
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_else(|| {
                    ValidationReport::invalid("unable to parse validation response")
                }),
            Err(e) => ValidationReport::invalid(format!("validation call failed: {e}")),
        }
    }

    /// Ask the Architect to convert generated IaC back into the canvas
    /// diagram schema. Used when the transcript itself carried no
    /// parseable diagram. Returns the graph and its pretty-printed JSON.
    pub async fn diagram_from_iac(&self, bundle: &IacBundle) -> Option<(DiagramGraph, String)> {
        let (snippet, language) = pick_source_template(bundle)?;
        let prompt = format!(
            "You are an Azure architecture cartographer. Convert the following IaC template \
             into the structured diagram JSON used by the canvas. Follow the schema and \
             hierarchy guidance exactly.\n\n{STRUCTURED_DIAGRAM_GUIDANCE}\n\
             The IaC template:\n```{language}\n{snippet}\n```\n\n\
             Return ONLY the JSON object (no commentary) that conforms to the schema."
        );
        let text = match self.backend.run(&self.architect, &prompt, &[]).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "diagram re-derivation call failed");
                return None;
            }
        };
        let value = parse_json_lenient(&text)?;
        let graph = DiagramGraph::from_value(&value)?;
        let raw = serde_json::to_string_pretty(&value).ok()?;
        Some((graph, raw))
    }

    /// Tool attachments for a grounded call: the primary session, plus
    /// the docs tool when enabled and reachable.
    async fn tool_refs(&self, primary: &Arc<McpSession>) -> Vec<McpToolRef> {
        let mut tools = vec![McpToolRef {
            name: primary.name().to_owned(),
            url: primary.url().to_owned(),
        }];
        if self.settings.mcp.docs {
            if let Some(docs) = self.mcp.get(McpKind::Docs, &self.settings.mcp).await {
                tools.push(McpToolRef {
                    name: docs.name().to_owned(),
                    url: docs.url().to_owned(),
                });
            }
        }
        tools
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const BICEP_INSTRUCTION: &str =
    "You are an Azure Cloud Infrastructure as Code generator. Given the diagram JSON under \
     'diagram', author a subscription-scoped Bicep template that can stand up a \
     production-grade landing zone. Requirements:\n\
     - Start with `targetScope = 'subscription'`.\n\
     - Declare core parameters: location, environment (allowed dev/tst/prd), namePrefix, an \
       optional tags object, and any network CIDRs needed for vnets/subnets.\n\
     - Create a resource group per top-level workload grouping and deploy resources inside \
       using module blocks or inline resource definitions scoped to those groups.\n\
     - Map every service from the diagram to a concrete Azure resource type with realistic \
       API versions, SKU settings, and key properties. Do not omit services.\n\
     - Wire dependencies properly and include monitoring/security resources.\n\
     - Provide useful outputs for core artifacts.\n\
     - Return ONLY a JSON object with keys `bicep_code` (string containing the full template) \
       and `parameters` (object describing parameter defaults/metadata). No markdown, no \
       commentary.";

const BICEP_MCP_INSTRUCTION: &str =
    "You are an Azure IaC generator with access to Azure Bicep MCP tools. Use the MCP tools \
     to confirm resource types, apiVersions, required properties, and SKU options for every \
     element in the diagram. Emit a subscription-scoped landing-zone template that mirrors \
     the diagram hierarchy: parameters with @description metadata, resource groups per \
     workload grouping, realistic configuration for every service, monitoring/security \
     integrations, and outputs for critical resources. Return ONLY JSON with keys \
     'bicep_code' (string) and 'parameters' (object). No markdown, no commentary.";

const TERRAFORM_INSTRUCTION: &str =
    "Generate comprehensive Terraform HCL configuration for this Azure architecture. Use the \
     azurerm provider, include all necessary resource configurations, appropriate variables \
     and outputs, consistent naming conventions, and resource dependencies. Return ONLY \
     valid JSON in this format: {\"terraform_code\": \"complete HCL configuration as \
     string\", \"parameters\": {\"provider\": \"azurerm\", \"region\": \"westeurope\"}}";

const TERRAFORM_MCP_INSTRUCTION: &str =
    "Generate Terraform modules for this Azure architecture. Use the Terraform MCP tools to \
     look up providers, resources, arguments, and examples from the Terraform Registry \
     before emitting code, so every resource type and argument is valid for the provider \
     version. Return ONLY JSON: {\"terraform_code\": string, \"parameters\": object}.";

/// The architecture context for a producer prompt: the diagram when one
/// was extracted, else the whole narrative.
fn iac_payload(diagram: Option<&DiagramGraph>, narrative: &str, target: &str) -> String {
    match diagram {
        Some(d) => serde_json::json!({
            "diagram": { "nodes": d.nodes, "edges": d.edges },
            "requirements": {
                "target_format": target,
                "include_monitoring": true,
                "include_security": true,
            },
        })
        .to_string(),
        None => narrative.to_owned(),
    }
}

/// Parse a producer reply: lenient JSON, then the code key. Malformed
/// output becomes an error-marker template, never a fabricated one.
fn parse_template(text: &str, code_key: &str, default_params: Map<String, Value>) -> IacTemplate {
    let Some(value) = parse_json_lenient(text) else {
        return IacTemplate::error(format!("model returned no parsable {code_key}"));
    };
    let code = value
        .get(code_key)
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if code.trim().is_empty() {
        return IacTemplate::error(format!("model returned no parsable {code_key}"));
    }
    let parameters = value
        .get("parameters")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or(default_params);
    IacTemplate {
        code: code.to_owned(),
        parameters,
    }
}

/// Prefer the Bicep template as the re-derivation source, else Terraform.
fn pick_source_template(bundle: &IacBundle) -> Option<(&str, &'static str)> {
    if let Some(bicep) = &bundle.bicep {
        if bicep.has_code() {
            return Some((bicep.code.trim(), "bicep"));
        }
    }
    if let Some(terraform) = &bundle.terraform {
        if terraform.has_code() {
            return Some((terraform.code.trim(), "terraform"));
        }
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use bp_backends::mock::{MockBackend, MockScript};
    use bp_domain::config::McpConfig;

    fn generator_with(backend: MockBackend, settings: IntegrationSettings) -> IacGenerator {
        IacGenerator::new(
            Arc::new(backend),
            AgentHandle::local("Architect", "instr"),
            Arc::new(McpRegistry::new(McpConfig::default())),
            settings,
        )
    }

    fn diagram() -> DiagramGraph {
        DiagramGraph::from_value(&serde_json::json!({
            "nodes": [ { "id": "kv", "type": "azureService" } ],
            "edges": []
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn bicep_plain_path_parses_model_json() {
        let mock = MockBackend::new();
        mock.script(
            "Architect",
            MockScript {
                run_text: Some(
                    r#"Sure! {"bicep_code": "targetScope = 'subscription'", "parameters": {"location": {"default": "westeurope"}}}"#
                        .into(),
                ),
                ..Default::default()
            },
        );
        let gen = generator_with(mock, IntegrationSettings::default());
        let template = gen.generate_bicep(Some(&diagram()), "narrative").await.unwrap();
        assert!(template.code.starts_with("targetScope"));
        assert_eq!(template.parameters["location"]["default"], "westeurope");
    }

    #[tokio::test]
    async fn unparseable_reply_becomes_error_marker() {
        let mock = MockBackend::new();
        mock.script(
            "Architect",
            MockScript {
                run_text: Some("I cannot do that.".into()),
                ..Default::default()
            },
        );
        let gen = generator_with(mock, IntegrationSettings::default());
        let template = gen.generate_bicep(Some(&diagram()), "narrative").await.unwrap();
        assert!(!template.has_code());
        assert!(template.parameters["error"]
            .as_str()
            .unwrap()
            .contains("bicep_code"));
    }

    #[tokio::test]
    async fn failed_model_call_yields_none() {
        let mock = MockBackend::new();
        mock.script(
            "Architect",
            MockScript {
                stream_error: Some("backend unreachable".into()),
                ..Default::default()
            },
        );
        let gen = generator_with(mock, IntegrationSettings::default());
        assert!(gen.generate_bicep(Some(&diagram()), "narrative").await.is_none());
    }

    #[tokio::test]
    async fn terraform_defaults_provider_parameter() {
        let mock = MockBackend::new();
        mock.script(
            "Architect",
            MockScript {
                run_text: Some(r#"{"terraform_code": "resource \"azurerm_key_vault\" \"kv\" {}"}"#.into()),
                ..Default::default()
            },
        );
        let gen = generator_with(mock, IntegrationSettings::default());
        let template = gen
            .generate_terraform(Some(&diagram()), "narrative")
            .await
            .unwrap();
        assert!(template.has_code());
        assert_eq!(template.parameters["provider"], "azurerm");
    }

    #[tokio::test]
    async fn mcp_disabled_means_no_tool_attachments() {
        let mock = Arc::new(MockBackend::new());
        mock.script(
            "Architect",
            MockScript {
                run_text: Some(r#"{"bicep_code": "x"}"#.into()),
                ..Default::default()
            },
        );
        let gen = IacGenerator::new(
            mock.clone(),
            AgentHandle::local("Architect", "instr"),
            Arc::new(McpRegistry::new(McpConfig::default())),
            IntegrationSettings::default(),
        );
        let _ = gen.generate_bicep(Some(&diagram()), "narrative").await;

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].tool_names.is_empty());
    }

    #[tokio::test]
    async fn bundle_runs_both_lanes() {
        let mock = MockBackend::new();
        // One reply per lane; both carry both keys so pop order is moot.
        let both = r#"{"bicep_code": "bc", "terraform_code": "tc"}"#;
        mock.script(
            "Architect",
            MockScript {
                run_text: Some(both.into()),
                ..Default::default()
            },
        );
        mock.script(
            "Architect",
            MockScript {
                run_text: Some(both.into()),
                ..Default::default()
            },
        );
        let gen = generator_with(mock, IntegrationSettings::default());
        let bundle = gen.generate_bundle(Some(&diagram()), "narrative").await;
        assert_eq!(bundle.bicep.unwrap().code, "bc");
        assert_eq!(bundle.terraform.unwrap().code, "tc");
    }

    #[tokio::test]
    async fn validation_without_mcp_reports_unavailable() {
        let gen = generator_with(MockBackend::new(), IntegrationSettings::default());
        let report = gen.validate_bicep("targetScope = 'subscription'").await;
        assert!(!report.valid);
        assert!(report.errors[0].contains("not available"));
    }

    #[tokio::test]
    async fn diagram_from_iac_prefers_bicep_and_parses() {
        let mock = MockBackend::new();
        mock.script(
            "Architect",
            MockScript {
                run_text: Some(
                    r#"Here you go: {"nodes": [{"id": "kv"}], "edges": []} enjoy"#.into(),
                ),
                ..Default::default()
            },
        );
        let gen = generator_with(mock, IntegrationSettings::default());
        let bundle = IacBundle {
            bicep: Some(IacTemplate {
                code: "targetScope = 'subscription'".into(),
                parameters: Map::new(),
            }),
            terraform: None,
        };
        let (graph, raw) = gen.diagram_from_iac(&bundle).await.unwrap();
        assert_eq!(graph.nodes[0].id, "kv");
        assert!(raw.contains("\"nodes\""));
    }

    #[tokio::test]
    async fn diagram_from_iac_without_code_is_none() {
        let gen = generator_with(MockBackend::new(), IntegrationSettings::default());
        let bundle = IacBundle {
            bicep: Some(IacTemplate::error("nope")),
            terraform: None,
        };
        assert!(gen.diagram_from_iac(&bundle).await.is_none());
    }
}
