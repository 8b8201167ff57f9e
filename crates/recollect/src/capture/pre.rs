use super::{CaptureStatus, PreToolRequest, PreToolResponse, require};
use crate::cleanup;
use crate::context::HookContext;
use crate::error::HookResult;
use crate::events::{Origin, PendingEvent, new_call_id};
use crate::mailbox::{MailboxKey, write_json};
use time::OffsetDateTime;

/// Record that a tool is about to run.
///
/// Always answers; a failed write is reported as `status: error` so the
/// tool call itself goes ahead regardless.
#[tracing::instrument(
    name = "pre_capture",
    skip_all,
    fields(session_id = %request.session_id, tool_name = %request.tool_name)
)]
pub async fn capture_pre(ctx: &HookContext, request: PreToolRequest) -> PreToolResponse {
    if ctx.config.disabled {
        return PreToolResponse::skipped(&request.tool_name, "capture disabled");
    }
    if ctx.config.is_skipped_tool(&request.tool_name) {
        log::debug!("tool '{}' is configured as skipped", request.tool_name);
        return PreToolResponse::skipped(&request.tool_name, "tool excluded from capture");
    }

    let response = match record_pending(ctx, request).await {
        Ok(event) => {
            log::info!(
                "captured pre '{}' call {} in session {}",
                event.tool_name,
                event.call_id,
                event.session_id
            );
            PreToolResponse {
                status: CaptureStatus::Captured,
                call_id: Some(event.call_id),
                tool_name: Some(event.tool_name),
                project_id: Some(event.origin.project_id),
                message: None,
            }
        }
        Err(e) => {
            log::error!("pre capture failed ({}): {}", e.kind(), e);
            PreToolResponse::error(e.to_string())
        }
    };

    cleanup::maybe_sweep(
        ctx.pre_cleanup.as_ref(),
        ctx.mailbox(),
        ctx.config.pending_ttl(),
    )
    .await;

    response
}

async fn record_pending(ctx: &HookContext, request: PreToolRequest) -> HookResult<PendingEvent> {
    require("session_id", &request.session_id)?;
    require("tool_name", &request.tool_name)?;

    let cwd = request
        .cwd
        .clone()
        .or_else(|| {
            request
                .environment
                .as_ref()
                .and_then(|env| env.field("cwd"))
                .and_then(|cwd| cwd.as_str().map(str::to_string))
        })
        .or_else(|| {
            std::env::current_dir()
                .ok()
                .map(|dir| dir.to_string_lossy().into_owned())
        });
    let origin = Origin {
        user: request.user,
        environment: request.environment,
        ..Origin::from_cwd(cwd)
    };

    let event = PendingEvent {
        call_id: new_call_id(),
        session_id: request.session_id,
        tool_name: request.tool_name,
        tool_input: request.tool_input,
        created_at: OffsetDateTime::now_utc(),
        origin,
        tool_use_id: request.tool_use_id,
    };

    let key = MailboxKey::pending(&event.call_id)?;
    write_json(ctx.mailbox(), &key, &event).await?;
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::parse_request;
    use crate::cleanup::{Always, Never};
    use crate::config::HooksConfig;
    use crate::mailbox::{InMemoryMailbox, Mailbox, PENDING_PREFIX, read_json};
    use std::sync::Arc;

    fn context(mailbox: &InMemoryMailbox, config: HooksConfig) -> HookContext {
        HookContext::new(Arc::new(mailbox.clone()), config)
            .with_cleanup(Box::new(Never), Box::new(Never))
    }

    fn request(raw: &str) -> PreToolRequest {
        parse_request(raw).unwrap()
    }

    #[tokio::test]
    async fn writes_pending_event_under_call_id() {
        let mailbox = InMemoryMailbox::new();
        let ctx = context(&mailbox, HooksConfig::default());
        let response = capture_pre(
            &ctx,
            request(
                r#"{"session_id":"s1","tool_name":"Read","tool_input":{"file":"a.txt"},"cwd":"/w/app"}"#,
            ),
        )
        .await;

        assert_eq!(response.status, CaptureStatus::Captured);
        assert_eq!(response.tool_name.as_deref(), Some("Read"));
        assert_eq!(response.project_id.as_deref(), Some("app"));
        let call_id = response.call_id.unwrap();

        let key = MailboxKey::pending(&call_id).unwrap();
        let event: PendingEvent = read_json(&mailbox, &key).await.unwrap().unwrap();
        assert_eq!(event.session_id, "s1");
        assert_eq!(event.tool_input.as_raw_str(), r#"{"file":"a.txt"}"#);
        assert_eq!(event.origin.cwd.as_deref(), Some("/w/app"));
    }

    #[tokio::test]
    async fn cwd_falls_back_to_environment() {
        let mailbox = InMemoryMailbox::new();
        let ctx = context(&mailbox, HooksConfig::default());
        let response = capture_pre(
            &ctx,
            request(
                r#"{"session_id":"s1","tool_name":"Bash","tool_input":{},"user":"me","environment":{"cwd":"/srv/api"}}"#,
            ),
        )
        .await;
        assert_eq!(response.project_id.as_deref(), Some("api"));
    }

    #[tokio::test]
    async fn missing_session_is_an_error_response() {
        let mailbox = InMemoryMailbox::new();
        let ctx = context(&mailbox, HooksConfig::default());
        let response = capture_pre(&ctx, request(r#"{"tool_name":"Read"}"#)).await;
        assert!(response.is_error());
        assert!(response.message.unwrap().contains("session_id"));
        assert!(mailbox.is_empty().await);
    }

    #[tokio::test]
    async fn skipped_tools_and_disabled_capture() {
        let mailbox = InMemoryMailbox::new();
        let config = HooksConfig {
            skip_tools: vec!["TodoWrite".into()],
            ..Default::default()
        };
        let ctx = context(&mailbox, config);
        let response =
            capture_pre(&ctx, request(r#"{"session_id":"s1","tool_name":"TodoWrite"}"#)).await;
        assert_eq!(response.status, CaptureStatus::Skipped);

        let config = HooksConfig {
            disabled: true,
            ..Default::default()
        };
        let ctx = context(&mailbox, config);
        let response = capture_pre(&ctx, request(r#"{"session_id":"s1","tool_name":"Read"}"#)).await;
        assert_eq!(response.status, CaptureStatus::Skipped);
        assert!(mailbox.is_empty().await);
    }

    #[tokio::test]
    async fn forced_cleanup_removes_orphans_but_not_new_event() {
        let mailbox = InMemoryMailbox::new();
        let stale = PendingEvent {
            call_id: "stale".into(),
            session_id: "s0".into(),
            tool_name: "Read".into(),
            tool_input: Default::default(),
            created_at: OffsetDateTime::now_utc() - time::Duration::days(2),
            origin: Origin::from_cwd(None),
            tool_use_id: None,
        };
        write_json(&mailbox, &MailboxKey::pending("stale").unwrap(), &stale)
            .await
            .unwrap();

        let ctx = HookContext::new(Arc::new(mailbox.clone()), HooksConfig::default())
            .with_cleanup(Box::new(Always), Box::new(Never));
        let response = capture_pre(&ctx, request(r#"{"session_id":"s1","tool_name":"Read"}"#)).await;

        let keys = mailbox.list(PENDING_PREFIX).await.unwrap();
        assert_eq!(
            keys,
            vec![MailboxKey::pending(&response.call_id.unwrap()).unwrap()]
        );
    }
}
