//! Pre and post tool-call capture.
//!
//! Both stages are side observers of the assistant's tool calls: they
//! always answer with a structured response and never fail the call they
//! observe.

mod post;
mod pre;

pub use post::capture_post;
pub use pre::capture_pre;

use crate::error::{HookError, HookResult};
use crate::payload::Payload;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Captured,
    Processed,
    Skipped,
    Error,
}

/// Pre-call request as delivered on stdin. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct PreToolRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Payload,
    #[serde(default)]
    pub user: Option<Payload>,
    #[serde(default)]
    pub environment: Option<Payload>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreToolResponse {
    pub status: CaptureStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PreToolResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: CaptureStatus::Error,
            call_id: None,
            tool_name: None,
            project_id: None,
            message: Some(message.into()),
        }
    }

    pub fn skipped(tool_name: &str, message: impl Into<String>) -> Self {
        Self {
            status: CaptureStatus::Skipped,
            call_id: None,
            tool_name: Some(tool_name.to_string()),
            project_id: None,
            message: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == CaptureStatus::Error
    }
}

/// Post-call request as delivered on stdin. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct PostToolRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_response: Payload,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
    #[serde(default)]
    pub is_error: Option<bool>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostToolResponse {
    pub status: CaptureStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PostToolResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: CaptureStatus::Error,
            call_id: None,
            tool_name: None,
            execution_time_ms: None,
            is_error: None,
            message: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == CaptureStatus::Error
    }
}

/// Parse a hook request, mapping any decode failure to `InvalidRequest`.
pub fn parse_request<T: for<'de> Deserialize<'de>>(raw: &str) -> HookResult<T> {
    serde_json::from_str(raw).map_err(|e| HookError::InvalidRequest(e.to_string()))
}

fn require(field: &str, value: &str) -> HookResult<()> {
    if value.trim().is_empty() {
        return Err(HookError::InvalidRequest(format!("{field} is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_request_tolerates_extra_fields() {
        let req: PreToolRequest = parse_request(
            r#"{"session_id":"s1","tool_name":"Read","tool_input":{"file":"a.txt"},
                "hook_event_name":"PreToolUse","transcript_path":"/t.jsonl","cwd":"/w/app"}"#,
        )
        .unwrap();
        assert_eq!(req.session_id, "s1");
        assert_eq!(req.tool_input.as_raw_str(), r#"{"file":"a.txt"}"#);
        assert_eq!(req.cwd.as_deref(), Some("/w/app"));
    }

    #[test]
    fn invalid_json_is_invalid_request() {
        let err = parse_request::<PreToolRequest>("{").unwrap_err();
        assert!(matches!(err, HookError::InvalidRequest(_)));
    }

    #[test]
    fn responses_omit_absent_fields() {
        let json = serde_json::to_value(PreToolResponse::error("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "error", "message": "boom"}));

        let json = serde_json::to_value(PostToolResponse::error("x")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "error", "message": "x"}));
    }

    #[test]
    fn require_rejects_blank() {
        assert!(require("session_id", " ").is_err());
        assert!(require("session_id", "s").is_ok());
    }
}
