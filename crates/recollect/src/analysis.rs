//! Summary extraction for deep-analysis tools.
//!
//! These tools return a structured verdict somewhere inside their output:
//! as an object, as a JSON string, or wrapped in an MCP text envelope.
//! Extraction is best-effort and never touches the stored raw output.

use crate::payload::Payload;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<String>,
}

impl AnalysisSummary {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.model.is_none()
            && self.confidence.is_none()
            && self.findings.is_empty()
    }
}

/// Extract a summary from a tool output, if it holds one.
pub fn extract_summary(output: &Payload) -> Option<AnalysisSummary> {
    let object = locate_object(output.decode()?)?;
    let summary = AnalysisSummary {
        status: scalar_text(&object, &["status"]),
        model: scalar_text(&object, &["model", "model_used"]),
        confidence: scalar_text(&object, &["confidence"]),
        findings: string_list(&object, &["findings", "key_findings"]),
    };
    (!summary.is_empty()).then_some(summary)
}

fn locate_object(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::String(text) => match serde_json::from_str(&text).ok()? {
            Value::Object(map) => Some(map),
            _ => None,
        },
        Value::Object(map) => {
            if let Some(Value::Array(blocks)) = map.get("content") {
                let text = blocks.iter().find_map(|block| {
                    (block.get("type").and_then(Value::as_str) == Some("text"))
                        .then(|| block.get("text").and_then(Value::as_str))
                        .flatten()
                });
                if let Some(text) = text
                    && let Ok(Value::Object(inner)) = serde_json::from_str::<Value>(text)
                {
                    return Some(inner);
                }
            }
            Some(map)
        }
        Value::Array(items) => items.into_iter().find_map(locate_object),
        _ => None,
    }
}

fn scalar_text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match object.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn string_list(object: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .find_map(|key| match object.get(*key)? {
            Value::String(s) if !s.is_empty() => Some(vec![s.clone()]),
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s.clone()),
                        Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_plain_object() {
        let output = Payload::from(json!({
            "status": "complete",
            "model_used": "big-model",
            "confidence": "high",
            "findings": ["race in writer", "missing fsync"]
        }));
        let summary = extract_summary(&output).unwrap();
        assert_eq!(summary.status.as_deref(), Some("complete"));
        assert_eq!(summary.model.as_deref(), Some("big-model"));
        assert_eq!(summary.confidence.as_deref(), Some("high"));
        assert_eq!(summary.findings.len(), 2);
    }

    #[test]
    fn reads_json_inside_string() {
        let inner = json!({"status": "ok", "confidence": 0.9}).to_string();
        let summary = extract_summary(&Payload::from(json!(inner))).unwrap();
        assert_eq!(summary.status.as_deref(), Some("ok"));
        assert_eq!(summary.confidence.as_deref(), Some("0.9"));
    }

    #[test]
    fn reads_mcp_text_envelope() {
        let inner = json!({"status": "done", "key_findings": "one thing"}).to_string();
        let output = Payload::from(json!({
            "content": [{"type": "text", "text": inner}]
        }));
        let summary = extract_summary(&output).unwrap();
        assert_eq!(summary.status.as_deref(), Some("done"));
        assert_eq!(summary.findings, vec!["one thing".to_string()]);
    }

    #[test]
    fn unstructured_output_yields_nothing() {
        assert!(extract_summary(&Payload::from(json!("plain words"))).is_none());
        assert!(extract_summary(&Payload::from(json!({"content": "x"}))).is_none());
        assert!(extract_summary(&Payload::null()).is_none());
    }
}
