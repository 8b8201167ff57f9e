use super::{CaptureStatus, PostToolRequest, PostToolResponse, require};
use crate::analysis;
use crate::cleanup;
use crate::context::HookContext;
use crate::error::{HookError, HookResult};
use crate::events::{CompletedRecord, PendingEvent, PostResult};
use crate::mailbox::{self, MailboxKey, PENDING_PREFIX, create_json};
use crate::matching::{MatchQuery, find_match};
use crate::payload::Payload;
use serde_json::Value;
use time::OffsetDateTime;

/// Record that a tool finished and pair it with its pending event.
///
/// With no pending event to pair with, the result is still kept as a
/// record flagged `post_only`.
#[tracing::instrument(
    name = "post_capture",
    skip_all,
    fields(session_id = %request.session_id, tool_name = %request.tool_name)
)]
pub async fn capture_post(ctx: &HookContext, request: PostToolRequest) -> PostToolResponse {
    if ctx.config.disabled || ctx.config.is_skipped_tool(&request.tool_name) {
        return PostToolResponse {
            status: CaptureStatus::Processed,
            call_id: None,
            tool_name: Some(request.tool_name),
            execution_time_ms: None,
            is_error: None,
            message: Some("skipped".to_string()),
        };
    }

    let response = match complete(ctx, request).await {
        Ok(record) => PostToolResponse {
            status: CaptureStatus::Processed,
            call_id: Some(record.call_id),
            tool_name: Some(record.tool_name),
            execution_time_ms: record.post.execution_time_ms,
            is_error: Some(record.post.is_error),
            message: None,
        },
        Err(e) => {
            log::error!("post capture failed ({}): {}", e.kind(), e);
            PostToolResponse::error(e.to_string())
        }
    };

    cleanup::maybe_sweep(
        ctx.post_cleanup.as_ref(),
        ctx.mailbox(),
        ctx.config.aggressive_ttl(),
    )
    .await;

    response
}

async fn complete(ctx: &HookContext, request: PostToolRequest) -> HookResult<CompletedRecord> {
    require("session_id", &request.session_id)?;
    require("tool_name", &request.tool_name)?;

    let completed_at = OffsetDateTime::now_utc();
    let mut pending: Vec<PendingEvent> =
        mailbox::scan::<PendingEvent>(ctx.mailbox(), PENDING_PREFIX)
            .await?
            .records
            .into_iter()
            .map(|(_, event)| event)
            .collect();

    let is_error = request
        .is_error
        .unwrap_or_else(|| response_signals_error(&request.tool_response));
    let error_message = request.error_message.clone().or_else(|| {
        is_error
            .then(|| response_error_text(&request.tool_response))
            .flatten()
    });

    // Another post capture may claim the same pending event between our scan
    // and our write; the loser rematches against what is left.
    let record = loop {
        let query = MatchQuery {
            session_id: &request.session_id,
            tool_name: &request.tool_name,
            at: completed_at,
            tool_use_id: request.tool_use_id.as_deref(),
        };
        let matched = find_match(ctx.match_strategy.as_ref(), &pending, &query).cloned();
        let record = completed_record(
            ctx,
            &request,
            matched,
            completed_at,
            is_error,
            error_message.as_deref(),
        );

        let key = MailboxKey::completed(&record.call_id)?;
        if create_json(ctx.mailbox(), &key, &record).await? {
            break record;
        }
        log::warn!("{} already written by another capture; rematching", key);
        pending.retain(|event| event.call_id != record.call_id);
    };

    if record.is_matched() {
        // The completed record is safe; a leftover pending event only costs
        // a sweep later.
        let pending_key = MailboxKey::pending(&record.call_id)?;
        match ctx.mailbox().delete(&pending_key).await {
            Ok(true) => {}
            Ok(false) => log::debug!("pending {} already removed", pending_key),
            Err(e) => log::warn!("could not remove matched {}: {}", pending_key, e),
        }
    }

    log::info!(
        "captured post '{}' call {} ({:?})",
        record.tool_name,
        record.call_id,
        record.status
    );
    Ok(record)
}

fn completed_record(
    ctx: &HookContext,
    request: &PostToolRequest,
    matched: Option<PendingEvent>,
    completed_at: OffsetDateTime,
    is_error: bool,
    error_message: Option<&str>,
) -> CompletedRecord {
    let execution_time_ms = request.execution_time_ms.or_else(|| {
        matched.as_ref().map(|pre| {
            let elapsed = completed_at - pre.created_at;
            u64::try_from(elapsed.whole_milliseconds()).unwrap_or(0)
        })
    });
    let post = PostResult {
        tool_output: request.tool_response.clone(),
        execution_time_ms,
        is_error,
        error_message: error_message.map(str::to_string),
        completed_at,
    };

    let mut record = match matched {
        Some(pre) => CompletedRecord::matched(pre, post),
        None => {
            let err = HookError::NoMatch {
                session_id: request.session_id.clone(),
                tool_name: request.tool_name.clone(),
            };
            log::warn!("{}; keeping result as post-only record", err);
            CompletedRecord::post_only(
                request.session_id.clone(),
                request.tool_name.clone(),
                post,
            )
        }
    };

    if ctx.config.is_analysis_tool(&record.tool_name) {
        record.analysis_summary = analysis::extract_summary(&record.post.tool_output);
        if record.analysis_summary.is_none() {
            log::debug!("no analysis summary found in '{}' output", record.tool_name);
        }
    }
    record
}

fn response_signals_error(response: &Payload) -> bool {
    let Some(Value::Object(map)) = response.decode() else {
        return false;
    };
    if map.get("is_error").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    if map.get("success").and_then(Value::as_bool) == Some(false) {
        return true;
    }
    match map.get("error") {
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

fn response_error_text(response: &Payload) -> Option<String> {
    match response.field("error")? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Object(o) => o
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PreToolRequest, capture_pre, parse_request};
    use crate::cleanup::Never;
    use crate::config::HooksConfig;
    use crate::events::{Origin, RecordStatus};
    use crate::mailbox::{COMPLETED_PREFIX, InMemoryMailbox, Mailbox, read_json, write_json};
    use serde_json::json;
    use std::sync::Arc;

    fn context(mailbox: &InMemoryMailbox) -> HookContext {
        HookContext::new(Arc::new(mailbox.clone()), HooksConfig::default())
            .with_cleanup(Box::new(Never), Box::new(Never))
    }

    async fn pre(ctx: &HookContext, raw: &str) -> String {
        let request: PreToolRequest = parse_request(raw).unwrap();
        capture_pre(ctx, request).await.call_id.unwrap()
    }

    async fn post(ctx: &HookContext, raw: &str) -> PostToolResponse {
        capture_post(ctx, parse_request(raw).unwrap()).await
    }

    async fn completed(mailbox: &InMemoryMailbox, call_id: &str) -> CompletedRecord {
        read_json(mailbox, &MailboxKey::completed(call_id).unwrap())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn matches_pending_and_consumes_it() {
        let mailbox = InMemoryMailbox::new();
        let ctx = context(&mailbox);
        let call_id = pre(
            &ctx,
            r#"{"session_id":"s1","tool_name":"Read","tool_input":{"file":"a.txt"}}"#,
        )
        .await;
        let pending_bytes = mailbox
            .read(&MailboxKey::pending(&call_id).unwrap())
            .await
            .unwrap()
            .unwrap();
        let original: PendingEvent = serde_json::from_slice(&pending_bytes).unwrap();

        let response = post(
            &ctx,
            r#"{"session_id":"s1","tool_name":"Read","tool_response":{"content":"hi"},"execution_time_ms":50,"is_error":false}"#,
        )
        .await;
        assert_eq!(response.status, CaptureStatus::Processed);
        assert_eq!(response.call_id.as_deref(), Some(call_id.as_str()));
        assert_eq!(response.execution_time_ms, Some(50));
        assert_eq!(response.is_error, Some(false));

        let record = completed(&mailbox, &call_id).await;
        assert_eq!(record.status, RecordStatus::Matched);
        assert_eq!(record.pre.as_ref(), Some(&original));
        assert_eq!(record.post.tool_output.field("content"), Some(json!("hi")));
        assert!(
            mailbox
                .read(&MailboxKey::pending(&call_id).unwrap())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn unmatched_post_becomes_flagged_post_only_record() {
        let mailbox = InMemoryMailbox::new();
        let ctx = context(&mailbox);
        pre(&ctx, r#"{"session_id":"other","tool_name":"Read"}"#).await;

        let response = post(
            &ctx,
            r#"{"session_id":"s1","tool_name":"Read","tool_response":"data"}"#,
        )
        .await;
        assert_eq!(response.status, CaptureStatus::Processed);
        let record = completed(&mailbox, &response.call_id.unwrap()).await;
        assert_eq!(record.status, RecordStatus::PostOnly);
        assert!(record.pre.is_none());
        assert_eq!(record.session_id, "s1");
        // the other session's pending event is untouched
        assert_eq!(mailbox.list(PENDING_PREFIX).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn derives_timing_and_error_when_absent() {
        let mailbox = InMemoryMailbox::new();
        let ctx = context(&mailbox);
        let call_id = pre(&ctx, r#"{"session_id":"s1","tool_name":"Bash","tool_input":{"command":"false"}}"#).await;
        let response = post(
            &ctx,
            r#"{"session_id":"s1","tool_name":"Bash","tool_response":{"error":"exit status 1"}}"#,
        )
        .await;
        assert_eq!(response.is_error, Some(true));
        assert!(response.execution_time_ms.is_some());

        let record = completed(&mailbox, &call_id).await;
        assert!(record.post.is_error);
        assert_eq!(record.post.error_message.as_deref(), Some("exit status 1"));
    }

    #[tokio::test]
    async fn most_recent_pending_wins_by_default() {
        let mailbox = InMemoryMailbox::new();
        let ctx = context(&mailbox);
        let now = OffsetDateTime::now_utc();
        for (id, age) in [("first", 20), ("second", 5)] {
            let event = PendingEvent {
                call_id: id.into(),
                session_id: "s1".into(),
                tool_name: "Grep".into(),
                tool_input: json!({"pattern": id}).into(),
                created_at: now - time::Duration::seconds(age),
                origin: Origin::from_cwd(None),
                tool_use_id: None,
            };
            write_json(&mailbox, &MailboxKey::pending(id).unwrap(), &event)
                .await
                .unwrap();
        }
        let response = post(
            &ctx,
            r#"{"session_id":"s1","tool_name":"Grep","tool_response":["x"]}"#,
        )
        .await;
        assert_eq!(response.call_id.as_deref(), Some("second"));
        assert_eq!(mailbox.list(PENDING_PREFIX).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claimed_pending_event_falls_through_to_the_next_candidate() {
        let mailbox = InMemoryMailbox::new();
        let ctx = context(&mailbox);
        let older = pre(&ctx, r#"{"session_id":"s1","tool_name":"Read"}"#).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = pre(&ctx, r#"{"session_id":"s1","tool_name":"Read"}"#).await;
        // a concurrent capture already finished the newer call
        write_json(
            &mailbox,
            &MailboxKey::completed(&newer).unwrap(),
            &json!({"claimed": true}),
        )
        .await
        .unwrap();

        let response = post(
            &ctx,
            r#"{"session_id":"s1","tool_name":"Read","tool_response":"second"}"#,
        )
        .await;
        assert_eq!(response.call_id.as_deref(), Some(older.as_str()));
        let record = completed(&mailbox, &older).await;
        assert_eq!(record.status, RecordStatus::Matched);
        let untouched: serde_json::Value =
            read_json(&mailbox, &MailboxKey::completed(&newer).unwrap())
                .await
                .unwrap()
                .unwrap();
        assert_eq!(untouched, json!({"claimed": true}));

        // with every candidate claimed the result is kept as post-only
        let response = post(
            &ctx,
            r#"{"session_id":"s1","tool_name":"Read","tool_response":"third"}"#,
        )
        .await;
        let call_id = response.call_id.unwrap();
        assert_ne!(call_id, older);
        assert_ne!(call_id, newer);
        assert_eq!(completed(&mailbox, &call_id).await.status, RecordStatus::PostOnly);
    }

    #[tokio::test]
    async fn analysis_tools_get_summary() {
        let mailbox = InMemoryMailbox::new();
        let ctx = context(&mailbox);
        let tool = "mcp__deep-analysis__review";
        let call_id = pre(
            &ctx,
            &json!({"session_id": "s1", "tool_name": tool, "tool_input": {"q": "why"}}).to_string(),
        )
        .await;
        let response_body = json!({"status": "complete", "model": "m1", "findings": ["a"]});
        post(
            &ctx,
            &json!({"session_id": "s1", "tool_name": tool, "tool_response": response_body})
                .to_string(),
        )
        .await;

        let record = completed(&mailbox, &call_id).await;
        let summary = record.analysis_summary.unwrap();
        assert_eq!(summary.status.as_deref(), Some("complete"));
        assert_eq!(summary.model.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn missing_tool_name_is_error() {
        let mailbox = InMemoryMailbox::new();
        let ctx = context(&mailbox);
        let response = post(&ctx, r#"{"session_id":"s1"}"#).await;
        assert!(response.is_error());
        assert!(mailbox.list(COMPLETED_PREFIX).await.unwrap().is_empty());
    }

    #[test]
    fn error_inference() {
        assert!(response_signals_error(&json!({"is_error": true}).into()));
        assert!(response_signals_error(&json!({"success": false}).into()));
        assert!(response_signals_error(&json!({"error": {"message": "m"}}).into()));
        assert!(!response_signals_error(&json!({"error": ""}).into()));
        assert!(!response_signals_error(&json!("error").into()));
        assert_eq!(
            response_error_text(&json!({"error": {"message": "m"}}).into()).as_deref(),
            Some("m")
        );
    }
}
