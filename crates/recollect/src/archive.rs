//! Stop-time archival of a conversation turn.
//!
//! The transcript says what the assistant asked for; the mailbox says
//! what actually came back. The archiver joins the two into one
//! [`EnrichedConversationRecord`] and hands it to a [`ConversationSink`].
//! Either a complete record is stored or nothing is.

use crate::aggregate::{self, SessionStats};
use crate::config::HooksConfig;
use crate::context::HookContext;
use crate::error::{HookError, HookResult};
use crate::mailbox::{FsMailbox, Mailbox, MailboxKey, create_json};
use crate::payload::Payload;
use crate::transcript::{Block, Message, Transcript, TranscriptShape};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Stop request as delivered on stdin. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub transcript_path: Option<PathBuf>,
    /// Inline transcript; wins over `transcript_path`
    #[serde(default)]
    pub transcript: Option<Value>,
    /// Set when the assistant is already continuing because of a stop hook
    #[serde(default)]
    pub stop_hook_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptToolResult {
    pub content: Payload,
    pub is_error: bool,
}

/// One tool use from the transcript with whatever is known about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    pub name: String,
    pub message_index: usize,
    pub input: Payload,
    /// The result block the transcript itself carried
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TranscriptToolResult>,
    /// Completed record attached as enrichment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedConversationRecord {
    pub session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub archived_at: OffsetDateTime,
    pub shape: TranscriptShape,
    pub messages: Vec<Message>,
    pub tool_calls: Vec<ToolCallEntry>,
    pub enriched_tool_calls: usize,
    pub stats: SessionStats,
    pub completeness_score: f64,
    /// Transcript entries that were not conversation messages
    pub skipped_entries: usize,
}

/// Where archived conversations go.
#[async_trait]
pub trait ConversationSink: Send + Sync {
    /// Persist `record`, returning a description of where it was stored.
    async fn store(&self, record: &EnrichedConversationRecord) -> HookResult<String>;
}

/// Stores each record under `conv_<session>_<unix_millis>_<nonce>` in a mailbox.
#[derive(Clone)]
pub struct MailboxSink {
    mailbox: Arc<dyn Mailbox>,
}

impl MailboxSink {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self { mailbox }
    }

    /// Sink over a directory mailbox at `config.archive_dir()`.
    pub fn open(config: &HooksConfig) -> HookResult<Self> {
        let mailbox = FsMailbox::open(config.archive_dir(), config.lock_timeout())?;
        Ok(Self::new(Arc::new(mailbox)))
    }
}

#[async_trait]
impl ConversationSink for MailboxSink {
    async fn store(&self, record: &EnrichedConversationRecord) -> HookResult<String> {
        let millis = record.archived_at.unix_timestamp_nanos() / 1_000_000;
        let nonce = Uuid::new_v4().simple().to_string();
        let key = MailboxKey::archive(&record.session_id, millis, &nonce[..8])?;
        if !create_json(self.mailbox.as_ref(), &key, record).await? {
            return Err(HookError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("archive record {key} already exists"),
            )));
        }
        Ok(key.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveOutcome {
    Archived {
        session_id: String,
        messages: usize,
        enriched: usize,
        shape: TranscriptShape,
        location: String,
    },
    Skipped {
        session_id: String,
        reason: String,
    },
}

/// The line printed for the assistant.
impl fmt::Display for ArchiveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveOutcome::Archived {
                session_id,
                messages,
                enriched,
                ..
            } => write!(
                f,
                "SUCCESS: archived {messages} messages for session {session_id} ({enriched} enriched tool calls)"
            ),
            ArchiveOutcome::Skipped { session_id, reason } => {
                write!(f, "SUCCESS: skipped session {session_id}: {reason}")
            }
        }
    }
}

/// Archive the turn described by `request`.
#[tracing::instrument(
    name = "stop_archive",
    skip_all,
    fields(session_id = %request.session_id)
)]
pub async fn archive_stop(
    ctx: &HookContext,
    sink: &dyn ConversationSink,
    request: StopRequest,
) -> HookResult<ArchiveOutcome> {
    if request.stop_hook_active {
        log::info!("stop hook already active for {}; not archiving", request.session_id);
        return Ok(ArchiveOutcome::Skipped {
            session_id: request.session_id,
            reason: "stop hook already active".to_string(),
        });
    }
    if ctx.config.disabled {
        return Ok(ArchiveOutcome::Skipped {
            session_id: request.session_id,
            reason: "capture disabled".to_string(),
        });
    }
    if request.session_id.trim().is_empty() {
        return Err(HookError::InvalidRequest("session_id is required".to_string()));
    }

    let mut transcript = load_transcript(&request).await?;
    let shape = transcript.shape().ok_or_else(|| {
        HookError::ValidationRejected(format!(
            "transcript for session {} has no messages",
            request.session_id
        ))
    })?;
    match shape {
        TranscriptShape::AssistantOnly => log::info!(
            "session {} turn is assistant-only ({} messages); archiving as tool execution turn",
            request.session_id,
            transcript.messages.len()
        ),
        TranscriptShape::UserOnly => log::info!(
            "session {} turn has no assistant reply; archiving user-only turn",
            request.session_id
        ),
        TranscriptShape::Conversation => {}
    }

    let mut session =
        aggregate::aggregate(ctx.mailbox(), &ctx.config, &request.session_id).await?;
    let enriched = session.merge_into(&mut transcript, ctx.config.turn_window_slack());
    let tool_calls = tool_call_entries(&transcript);

    let record = EnrichedConversationRecord {
        session_id: request.session_id.clone(),
        archived_at: OffsetDateTime::now_utc(),
        shape,
        tool_calls,
        enriched_tool_calls: enriched,
        stats: session.stats,
        completeness_score: session.completeness_score,
        skipped_entries: transcript.skipped,
        messages: transcript.messages,
    };
    let location = sink.store(&record).await?;
    log::info!(
        "archived session {} to {} ({} messages, {}/{} tool calls enriched, completeness {:.2})",
        record.session_id,
        location,
        record.messages.len(),
        enriched,
        record.tool_calls.len(),
        record.completeness_score
    );

    Ok(ArchiveOutcome::Archived {
        session_id: record.session_id,
        messages: record.messages.len(),
        enriched,
        shape,
        location,
    })
}

async fn load_transcript(request: &StopRequest) -> HookResult<Transcript> {
    match (&request.transcript, &request.transcript_path) {
        (Some(inline), _) => Transcript::from_value(inline.clone()),
        (None, Some(path)) => Transcript::load(path).await,
        (None, None) => Err(HookError::InvalidRequest(
            "either transcript or transcript_path is required".to_string(),
        )),
    }
}

fn tool_call_entries(transcript: &Transcript) -> Vec<ToolCallEntry> {
    let results: HashMap<&str, TranscriptToolResult> = transcript
        .tool_results()
        .into_iter()
        .filter_map(|result| {
            let id = result.tool_use_id?;
            Some((
                id,
                TranscriptToolResult {
                    content: result.content.clone(),
                    is_error: result.is_error,
                },
            ))
        })
        .collect();

    let mut entries = Vec::new();
    for (message_index, message) in transcript.messages.iter().enumerate() {
        for block in &message.blocks {
            if let Block::ToolUse {
                id,
                name,
                input,
                enrichment,
            } = block
            {
                entries.push(ToolCallEntry {
                    tool_use_id: id.clone(),
                    name: name.clone(),
                    message_index,
                    input: input.clone(),
                    result: id.as_deref().and_then(|id| results.get(id).cloned()),
                    call_id: enrichment.as_ref().map(|e| e.call_id.clone()),
                });
            }
        }
    }
    entries
}
