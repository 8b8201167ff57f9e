//! Records exchanged through the mailbox.

use crate::analysis::AnalysisSummary;
use crate::payload::Payload;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Mint a fresh correlation id (128-bit random).
pub fn new_call_id() -> String {
    Uuid::new_v4().to_string()
}

/// Where the invoking process ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Payload>,
}

impl Origin {
    pub fn from_cwd(cwd: Option<String>) -> Self {
        let project_id = cwd
            .as_deref()
            .map(project_id_for)
            .unwrap_or_else(|| UNKNOWN_PROJECT.to_string());
        Self {
            cwd,
            project_id,
            user: None,
            environment: None,
        }
    }
}

pub const UNKNOWN_PROJECT: &str = "unknown";

/// Project identity of a working directory: its last path component.
pub fn project_id_for(cwd: &str) -> String {
    cwd.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(UNKNOWN_PROJECT)
        .to_string()
}

/// Written by pre capture, consumed by post capture or the orphan sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    pub call_id: String,
    pub session_id: String,
    pub tool_name: String,
    pub tool_input: Payload,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub origin: Origin,
    /// The assistant's own id for the tool use, when the hook supplies it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
}

impl PendingEvent {
    pub fn age_at(&self, now: OffsetDateTime) -> time::Duration {
        now - self.created_at
    }
}

/// What post capture learned about the finished call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostResult {
    pub tool_output: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

/// Whether a completed record was correlated with a pending event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Matched,
    /// No pending event was found; only the post half is known.
    PostOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRecord {
    pub call_id: String,
    pub session_id: String,
    pub tool_name: String,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre: Option<PendingEvent>,
    pub post: PostResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_summary: Option<AnalysisSummary>,
}

impl CompletedRecord {
    pub fn matched(pre: PendingEvent, post: PostResult) -> Self {
        Self {
            call_id: pre.call_id.clone(),
            session_id: pre.session_id.clone(),
            tool_name: pre.tool_name.clone(),
            status: RecordStatus::Matched,
            pre: Some(pre),
            post,
            analysis_summary: None,
        }
    }

    pub fn post_only(session_id: String, tool_name: String, post: PostResult) -> Self {
        Self {
            call_id: new_call_id(),
            session_id,
            tool_name,
            status: RecordStatus::PostOnly,
            pre: None,
            post,
            analysis_summary: None,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.status == RecordStatus::Matched
    }

    /// When the call started, falling back to completion for post-only records.
    pub fn started_at(&self) -> OffsetDateTime {
        self.pre
            .as_ref()
            .map(|pre| pre.created_at)
            .unwrap_or(self.post.completed_at)
    }

    pub fn tool_input(&self) -> Option<&Payload> {
        self.pre.as_ref().map(|pre| &pre.tool_input)
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.pre.as_ref().map(|pre| &pre.origin)
    }

    pub fn tool_use_id(&self) -> Option<&str> {
        self.pre.as_ref().and_then(|pre| pre.tool_use_id.as_deref())
    }

    /// Both a non-empty input and a non-empty output were captured.
    pub fn is_fully_enriched(&self) -> bool {
        self.tool_input().is_some_and(|input| !input.is_empty()) && !self.post.tool_output.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending() -> PendingEvent {
        PendingEvent {
            call_id: new_call_id(),
            session_id: "s1".into(),
            tool_name: "Read".into(),
            tool_input: json!({"file": "a.txt"}).into(),
            created_at: OffsetDateTime::now_utc(),
            origin: Origin::from_cwd(Some("/home/me/proj".into())),
            tool_use_id: None,
        }
    }

    fn post(output: serde_json::Value) -> PostResult {
        PostResult {
            tool_output: output.into(),
            execution_time_ms: Some(5),
            is_error: false,
            error_message: None,
            completed_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn call_ids_are_unique_uuids() {
        let a = new_call_id();
        let b = new_call_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn project_id_is_last_component() {
        assert_eq!(project_id_for("/home/me/proj"), "proj");
        assert_eq!(project_id_for("/home/me/proj/"), "proj");
        assert_eq!(project_id_for("C:\\work\\app"), "app");
        assert_eq!(project_id_for("/"), UNKNOWN_PROJECT);
        assert_eq!(Origin::from_cwd(None).project_id, UNKNOWN_PROJECT);
    }

    #[test]
    fn matched_record_copies_identity_from_pre() {
        let pre = pending();
        let record = CompletedRecord::matched(pre.clone(), post(json!({"content": "hi"})));
        assert_eq!(record.call_id, pre.call_id);
        assert!(record.is_matched());
        assert_eq!(record.started_at(), pre.created_at);
        assert!(record.is_fully_enriched());
    }

    #[test]
    fn post_only_record_is_flagged_in_json() {
        let record = CompletedRecord::post_only("s1".into(), "Read".into(), post(json!("x")));
        assert!(!record.is_matched());
        assert!(!record.is_fully_enriched());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "post_only");
        assert!(value.get("pre").is_none());
    }

    #[test]
    fn empty_output_is_not_enriched() {
        let record = CompletedRecord::matched(pending(), post(json!({})));
        assert!(!record.is_fully_enriched());
    }

    #[test]
    fn pending_event_serialization_is_stable() {
        let pre = pending();
        let first = serde_json::to_string(&pre).unwrap();
        let back: PendingEvent = serde_json::from_str(&first).unwrap();
        assert_eq!(serde_json::to_string(&back).unwrap(), first);
    }
}
