//! Conversation transcripts as written by the assistant.
//!
//! Two input forms are understood: JSONL, one entry per line
//! (`{type, message: {role, content}, timestamp, uuid}`), and an inline
//! JSON array of such entries or of bare `{role, content}` messages.
//! Everything is normalized into [`Message`]s of typed [`Block`]s.

use crate::aggregate::ToolEnrichment;
use crate::error::{HookError, HookResult};
use crate::payload::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        input: Payload,
        /// Captured call data attached by the stop archiver
        #[serde(skip_serializing_if = "Option::is_none")]
        enrichment: Option<Box<ToolEnrichment>>,
    },
    ToolResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
        content: Payload,
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub blocks: Vec<Block>,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl Message {
    /// Concatenated text blocks.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                Block::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// A user message that only hands tool results back to the assistant.
    pub fn is_tool_result_carrier(&self) -> bool {
        self.role == Role::User
            && !self.blocks.is_empty()
            && self
                .blocks
                .iter()
                .all(|block| matches!(block, Block::ToolResult { .. }))
    }

    /// A message typed by the human.
    pub fn is_human_turn(&self) -> bool {
        self.role == Role::User && !self.is_tool_result_carrier()
    }
}

/// Which roles a transcript contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptShape {
    Conversation,
    /// Pure tool-execution turn: no human message at all
    AssistantOnly,
    UserOnly,
}

/// A tool use found in the transcript.
#[derive(Debug, Clone, Copy)]
pub struct ToolUseRef<'a> {
    pub message_index: usize,
    pub block_index: usize,
    pub id: Option<&'a str>,
    pub name: &'a str,
    pub input: &'a Payload,
    pub timestamp: Option<OffsetDateTime>,
}

/// A tool result found in the transcript.
#[derive(Debug, Clone, Copy)]
pub struct ToolResultRef<'a> {
    pub tool_use_id: Option<&'a str>,
    pub content: &'a Payload,
    pub is_error: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub messages: Vec<Message>,
    /// Unparseable lines and non-conversation entries
    pub skipped: usize,
}

impl Transcript {
    pub async fn load(path: &Path) -> HookResult<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            HookError::MalformedTranscript(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
    }

    /// Parse either a JSON array or JSONL text.
    pub fn parse(raw: &str) -> HookResult<Self> {
        if raw.trim_start().starts_with('[') {
            let value: Value = serde_json::from_str(raw)
                .map_err(|e| HookError::MalformedTranscript(e.to_string()))?;
            Self::from_value(value)
        } else {
            Self::from_jsonl(raw)
        }
    }

    pub fn from_jsonl(raw: &str) -> HookResult<Self> {
        let mut transcript = Transcript::default();
        let mut parsed_lines = 0usize;
        let mut bad_lines = 0usize;
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(entry) => {
                    parsed_lines += 1;
                    transcript.push_entry(entry);
                }
                Err(e) => {
                    log::debug!("skipping transcript line {}: {}", line_no + 1, e);
                    bad_lines += 1;
                    transcript.skipped += 1;
                }
            }
        }
        if parsed_lines == 0 && bad_lines > 0 {
            return Err(HookError::MalformedTranscript(format!(
                "none of {bad_lines} lines is valid JSON"
            )));
        }
        Ok(transcript)
    }

    /// Inline form: an array of entries, or a string holding JSONL.
    pub fn from_value(value: Value) -> HookResult<Self> {
        match value {
            Value::Array(entries) => {
                let mut transcript = Transcript::default();
                for entry in entries {
                    transcript.push_entry(entry);
                }
                Ok(transcript)
            }
            Value::String(text) => Self::parse(&text),
            other => Err(HookError::MalformedTranscript(format!(
                "expected an array of entries, got {}",
                json_kind(&other)
            ))),
        }
    }

    fn push_entry(&mut self, entry: Value) {
        match parse_entry(entry) {
            Some(message) => self.messages.push(message),
            None => self.skipped += 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// `None` for a transcript without messages.
    pub fn shape(&self) -> Option<TranscriptShape> {
        let assistant = self.messages.iter().any(|m| m.role == Role::Assistant);
        let human = self.messages.iter().any(Message::is_human_turn);
        match (assistant, human) {
            (true, true) => Some(TranscriptShape::Conversation),
            (true, false) => Some(TranscriptShape::AssistantOnly),
            (false, _) if !self.messages.is_empty() => Some(TranscriptShape::UserOnly),
            _ => None,
        }
    }

    pub fn tool_uses(&self) -> Vec<ToolUseRef<'_>> {
        let mut uses = Vec::new();
        for (message_index, message) in self.messages.iter().enumerate() {
            for (block_index, block) in message.blocks.iter().enumerate() {
                if let Block::ToolUse { id, name, input, .. } = block {
                    uses.push(ToolUseRef {
                        message_index,
                        block_index,
                        id: id.as_deref(),
                        name,
                        input,
                        timestamp: message.timestamp,
                    });
                }
            }
        }
        uses
    }

    pub fn tool_results(&self) -> Vec<ToolResultRef<'_>> {
        self.messages
            .iter()
            .flat_map(|message| message.blocks.iter())
            .filter_map(|block| match block {
                Block::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => Some(ToolResultRef {
                    tool_use_id: tool_use_id.as_deref(),
                    content,
                    is_error: *is_error,
                }),
                _ => None,
            })
            .collect()
    }

    /// Earliest and latest message timestamps, if any message has one.
    pub fn time_range(&self) -> Option<(OffsetDateTime, OffsetDateTime)> {
        let mut stamps = self.messages.iter().filter_map(|m| m.timestamp);
        let first = stamps.next()?;
        Some(stamps.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t))))
    }

    /// Mutable access to a tool-use block's enrichment slot.
    pub(crate) fn enrichment_slot(
        &mut self,
        message_index: usize,
        block_index: usize,
    ) -> Option<&mut Option<Box<ToolEnrichment>>> {
        match self.messages.get_mut(message_index)?.blocks.get_mut(block_index)? {
            Block::ToolUse { enrichment, .. } => Some(enrichment),
            _ => None,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn parse_role(value: Option<&Value>) -> Option<Role> {
    match value?.as_str()? {
        "user" | "human" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        _ => None,
    }
}

/// One transcript entry, or `None` when it is not a conversation message.
fn parse_entry(entry: Value) -> Option<Message> {
    let Value::Object(mut entry) = entry else {
        return None;
    };

    // Wrapped form carries `type`; summaries and system notes are dropped here.
    let entry_role = match entry.get("type") {
        Some(kind) => Some(parse_role(Some(kind))?),
        None => None,
    };
    let timestamp = entry
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok());
    let uuid = entry.get("uuid").and_then(Value::as_str).map(str::to_string);

    let mut body = match entry.remove("message") {
        Some(Value::Object(message)) => message,
        _ => entry,
    };
    let role = parse_role(body.get("role")).or(entry_role)?;
    let blocks = parse_content(body.remove("content").unwrap_or(Value::Null));

    Some(Message {
        role,
        blocks,
        timestamp,
        uuid,
    })
}

fn parse_content(content: Value) -> Vec<Block> {
    match content {
        Value::String(text) if text.is_empty() => Vec::new(),
        Value::String(text) => vec![Block::Text { text }],
        Value::Array(items) => items.into_iter().filter_map(parse_block).collect(),
        _ => Vec::new(),
    }
}

fn parse_block(block: Value) -> Option<Block> {
    let Value::Object(mut block) = block else {
        return None;
    };
    let id_field = |block: &serde_json::Map<String, Value>, key: &str| {
        block.get(key).and_then(Value::as_str).map(str::to_string)
    };
    let kind = block.get("type").and_then(Value::as_str)?.to_string();
    match kind.as_str() {
        "text" => Some(Block::Text {
            text: id_field(&block, "text")?,
        }),
        "tool_use" => Some(Block::ToolUse {
            id: id_field(&block, "id"),
            name: id_field(&block, "name")?,
            input: block
                .remove("input")
                .map(|input| Payload::from_value(&input))
                .unwrap_or_default(),
            enrichment: None,
        }),
        "tool_result" => Some(Block::ToolResult {
            tool_use_id: id_field(&block, "tool_use_id"),
            is_error: block
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            content: block
                .remove("content")
                .map(|content| Payload::from_value(&content))
                .unwrap_or_default(),
        }),
        // thinking, redacted_thinking, images
        _ => None,
    }
}
