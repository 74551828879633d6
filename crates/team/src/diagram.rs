//! The canvas diagram graph and the tolerant JSON reader used on model
//! output.
//!
//! Models are asked for strict JSON and routinely return almost-JSON:
//! prose around the object, stray control characters, markdown fences.
//! [`parse_json_lenient`] runs a strict parse first, then extracts the
//! outermost balanced `{…}` region, then strips control characters and
//! retries. It returns `None` instead of erroring — a missing diagram is
//! a degraded result, not a failure.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Graph types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramNode {
    pub id: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<Value>,
}

/// The diagram graph embedded in the transcript's `Diagram JSON` block.
///
/// `groups` stays loosely typed: its hierarchy shape (management group →
/// subscription → landing zone → vnet → subnet → service) is authored by
/// the model and consumed as-is by the canvas.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiagramGraph {
    #[serde(default)]
    pub nodes: Vec<DiagramNode>,
    #[serde(default)]
    pub edges: Vec<DiagramEdge>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Value>,
}

impl DiagramGraph {
    /// Parse a JSON value, tolerating missing sections. `None` when the
    /// value is not an object at all.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lenient JSON
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse model output that should contain one JSON object.
///
/// Stages: strict parse of the trimmed text; strict parse of the
/// outermost balanced `{…}` region; the same region with raw control
/// characters (U+0000..U+001F) stripped. Returns `None` when all fail.
pub fn parse_json_lenient(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return Some(value);
        }
    }

    let region = balanced_object_region(trimmed)?;
    if let Ok(value) = serde_json::from_str::<Value>(region) {
        return Some(value);
    }

    let cleaned: String = region.chars().filter(|c| *c >= '\u{20}').collect();
    serde_json::from_str(&cleaned).ok()
}

/// The outermost balanced `{…}` region, brace-counting with string and
/// escape awareness so braces inside string literals don't break it.
fn balanced_object_region(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + ch.len_utf8()]);
                }
            }
            _ => {}
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

    #[test]
    fn strict_json_parses_directly() {
        let value = parse_json_lenient(r#"{"nodes":[],"edges":[]}"#).unwrap();
        assert!(value["nodes"].is_array());
    }

    #[test]
    fn object_is_extracted_from_surrounding_prose() {
        let text = "Here is your diagram:\n{\"nodes\": [{\"id\": \"web\"}]}\nHope that helps!";
        let value = parse_json_lenient(text).unwrap();
        assert_eq!(value["nodes"][0]["id"], "web");
    }

    #[test]
    fn braces_inside_strings_do_not_unbalance() {
        let text = r#"note {"label": "uses { and } freely", "n": 1} trailing"#;
        let value = parse_json_lenient(text).unwrap();
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn raw_control_characters_are_stripped_on_retry() {
        let text = "{\"label\": \"line\u{0007}feed\"}";
        let value = parse_json_lenient(text).unwrap();
        assert_eq!(value["label"], "linefeed");
    }

    #[test]
    fn hopeless_input_returns_none() {
        assert!(parse_json_lenient("no json here").is_none());
        assert!(parse_json_lenient("{never closed").is_none());
        assert!(parse_json_lenient("").is_none());
    }

    #[test]
    fn nested_objects_capture_the_outermost() {
        let text = r#"{"outer": {"inner": {"deep": true}}} {"second": 1}"#;
        let value = parse_json_lenient(text).unwrap();
        assert!(value.get("outer").is_some());
        assert!(value.get("second").is_none());
    }

    #[test]
    fn graph_parses_with_defaults() {
        let value = serde_json::json!({
            "nodes": [
                { "id": "agw", "type": "azureService",
                  "position": { "x": 100.0, "y": 40.0 },
                  "data": { "label": "App Gateway", "serviceId": "azure:application-gateway" } },
                { "id": "aks" }
            ],
            "edges": [ { "id": "e1", "source": "agw", "target": "aks", "label": "https" } ],
            "groups": [ { "id": "sub-1", "kind": "subscription" } ]
        });
        let graph = DiagramGraph::from_value(&value).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.nodes[1].node_type, "");
        assert_eq!(graph.edges[0].label.as_deref(), Some("https"));
        assert_eq!(graph.groups.len(), 1);
    }

    #[test]
    fn graph_from_non_object_is_none() {
        assert!(DiagramGraph::from_value(&serde_json::json!([1, 2])).is_none());
        assert!(DiagramGraph::from_value(&serde_json::json!("nope")).is_none());
    }

    #[test]
    fn graph_round_trips() {
        let graph = DiagramGraph {
            nodes: vec![DiagramNode {
                id: "kv".into(),
                node_type: "azureService".into(),
                position: Position { x: 1.0, y: 2.0 },
                data: Map::new(),
            }],
            edges: vec![],
            groups: vec![],
        };
        let value = serde_json::to_value(&graph).unwrap();
        let back = DiagramGraph::from_value(&value).unwrap();
        assert_eq!(back.nodes[0].id, "kv");
    }
}
