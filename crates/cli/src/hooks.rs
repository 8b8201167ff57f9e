//! One handler per subcommand.
//!
//! Handlers return the text for stdout together with the exit code, so
//! `main` only does process plumbing.

use anyhow::{Context, Result};
use recollect::aggregate::{aggregate, get_cross_project_sessions};
use recollect::capture::{PostToolResponse, PreToolResponse, capture_post, capture_pre, parse_request};
use recollect::cleanup::{purge_completed, sweep_orphans};
use recollect::{ConversationSink, HookContext, StopRequest, archive_stop};
use serde::Serialize;
use std::time::Duration;

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILED: u8 = 1;
pub const EXIT_STARTUP: u8 = 2;

#[derive(Debug, PartialEq)]
pub struct Reply {
    pub output: String,
    pub exit_code: u8,
}

impl Reply {
    fn ok(output: String) -> Self {
        Self {
            output,
            exit_code: EXIT_OK,
        }
    }

    fn failed(output: String) -> Self {
        Self {
            output,
            exit_code: EXIT_FAILED,
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    // Response types are plain data; encoding cannot fail.
    serde_json::to_string(value).unwrap_or_else(|e| {
        format!(r#"{{"status":"error","message":"cannot encode response: {e}"}}"#)
    })
}

/// A structured error response that never reached a handler.
pub fn error_reply<T: Serialize>(response: &T) -> Reply {
    Reply::failed(to_json(response))
}

pub async fn pre_tool(ctx: &HookContext, raw: &str) -> Reply {
    let response = match parse_request(raw) {
        Ok(request) => capture_pre(ctx, request).await,
        Err(e) => {
            log::error!("rejected pre-tool request: {}", e);
            PreToolResponse::error(e.to_string())
        }
    };
    let output = to_json(&response);
    if response.is_error() {
        Reply::failed(output)
    } else {
        Reply::ok(output)
    }
}

pub async fn post_tool(ctx: &HookContext, raw: &str) -> Reply {
    let response = match parse_request(raw) {
        Ok(request) => capture_post(ctx, request).await,
        Err(e) => {
            log::error!("rejected post-tool request: {}", e);
            PostToolResponse::error(e.to_string())
        }
    };
    let output = to_json(&response);
    if response.is_error() {
        Reply::failed(output)
    } else {
        Reply::ok(output)
    }
}

pub async fn stop(ctx: &HookContext, sink: &dyn ConversationSink, raw: &str) -> Reply {
    let result = match parse_request::<StopRequest>(raw) {
        Ok(request) => archive_stop(ctx, sink, request).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(outcome) => Reply::ok(outcome.to_string()),
        Err(e) => {
            log::error!("stop archive failed ({}): {}", e.kind(), e);
            Reply::failed(format!("ERROR: {e}"))
        }
    }
}

pub async fn sweep(ctx: &HookContext, max_age_secs: Option<u64>) -> Result<Reply> {
    let max_age = max_age_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| ctx.config.pending_ttl());
    let report = sweep_orphans(ctx.mailbox(), max_age)
        .await
        .context("orphan sweep failed")?;
    Ok(Reply::ok(to_json(&report)))
}

pub async fn retention(ctx: &HookContext, max_age_secs: Option<u64>) -> Result<Reply> {
    let max_age = max_age_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| ctx.config.completed_retention());
    let report = purge_completed(ctx.mailbox(), max_age)
        .await
        .context("retention purge failed")?;
    Ok(Reply::ok(to_json(&report)))
}

pub async fn session_aggregate(ctx: &HookContext, session_id: &str) -> Result<Reply> {
    let session = aggregate(ctx.mailbox(), &ctx.config, session_id)
        .await
        .with_context(|| format!("cannot aggregate session {session_id}"))?;
    Ok(Reply::ok(
        serde_json::to_string_pretty(&session).context("encoding aggregate")?,
    ))
}

pub async fn cross_project(ctx: &HookContext, window_secs: u64) -> Result<Reply> {
    let sessions = get_cross_project_sessions(ctx.mailbox(), Duration::from_secs(window_secs))
        .await
        .context("cannot scan completed records")?;
    Ok(Reply::ok(
        serde_json::to_string_pretty(&sessions).context("encoding sessions")?,
    ))
}
