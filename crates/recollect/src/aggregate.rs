//! Derived, per-session views over completed records.
//!
//! Nothing here is persisted: every call rescans the mailbox.

use crate::analysis::AnalysisSummary;
use crate::config::HooksConfig;
use crate::error::HookResult;
use crate::events::{CompletedRecord, RecordStatus};
use crate::mailbox::{self, COMPLETED_PREFIX, Mailbox};
use crate::payload::Payload;
use crate::transcript::{ToolUseRef, Transcript};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_tools: usize,
    pub successful_tools: usize,
    pub failed_tools: usize,
    pub analysis_tools: usize,
    /// Post-only records
    pub unmatched_tools: usize,
    pub total_execution_time_ms: u64,
    pub tool_counts: BTreeMap<String, usize>,
}

impl SessionStats {
    pub fn from_records(records: &[CompletedRecord], config: &HooksConfig) -> Self {
        let mut stats = SessionStats::default();
        for record in records {
            stats.total_tools += 1;
            if record.post.is_error {
                stats.failed_tools += 1;
            } else {
                stats.successful_tools += 1;
            }
            if config.is_analysis_tool(&record.tool_name) {
                stats.analysis_tools += 1;
            }
            if record.status == RecordStatus::PostOnly {
                stats.unmatched_tools += 1;
            }
            stats.total_execution_time_ms = stats
                .total_execution_time_ms
                .saturating_add(record.post.execution_time_ms.unwrap_or(0));
            *stats.tool_counts.entry(record.tool_name.clone()).or_default() += 1;
        }
        stats
    }
}

/// Fraction of `reported` tool uses backed by a fully enriched record.
///
/// No tool uses means nothing is missing, so the score is 1.0.
pub fn completeness_score(reported: usize, enriched: usize) -> f64 {
    if reported == 0 {
        return 1.0;
    }
    enriched.min(reported) as f64 / reported as f64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAggregate {
    pub session_id: String,
    /// Ordered by call start
    pub tool_records: Vec<CompletedRecord>,
    pub stats: SessionStats,
    /// Measured against the records themselves until a transcript is merged
    pub completeness_score: f64,
}

/// Load and summarize every completed record of `session_id`.
#[tracing::instrument(name = "session_aggregate", skip(mailbox, config))]
pub async fn aggregate(
    mailbox: &dyn Mailbox,
    config: &HooksConfig,
    session_id: &str,
) -> HookResult<SessionAggregate> {
    let scan = mailbox::scan::<CompletedRecord>(mailbox, COMPLETED_PREFIX).await?;
    let mut tool_records: Vec<CompletedRecord> = scan
        .records
        .into_iter()
        .map(|(_, record)| record)
        .filter(|record| record.session_id == session_id)
        .collect();
    tool_records.sort_by(|a, b| {
        a.started_at()
            .cmp(&b.started_at())
            .then_with(|| a.call_id.cmp(&b.call_id))
    });

    let stats = SessionStats::from_records(&tool_records, config);
    let enriched = tool_records
        .iter()
        .filter(|record| record.is_fully_enriched())
        .count();
    log::debug!(
        "session {}: {} records, {} fully enriched",
        session_id,
        tool_records.len(),
        enriched
    );

    Ok(SessionAggregate {
        session_id: session_id.to_string(),
        completeness_score: completeness_score(tool_records.len(), enriched),
        tool_records,
        stats,
    })
}

/// Captured call data attached to a transcript tool use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEnrichment {
    pub call_id: String,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Payload>,
    pub tool_output: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_summary: Option<AnalysisSummary>,
}

impl From<&CompletedRecord> for ToolEnrichment {
    fn from(record: &CompletedRecord) -> Self {
        Self {
            call_id: record.call_id.clone(),
            status: record.status,
            tool_input: record.tool_input().cloned(),
            tool_output: record.post.tool_output.clone(),
            execution_time_ms: record.post.execution_time_ms,
            is_error: record.post.is_error,
            error_message: record.post.error_message.clone(),
            started_at: record.started_at(),
            completed_at: record.post.completed_at,
            analysis_summary: record.analysis_summary.clone(),
        }
    }
}

/// The transcript's own time span widened by `slack`.
///
/// `None` when the transcript carries no timestamps (or the bounds
/// overflow), in which case records are not filtered by time.
pub fn turn_window(
    transcript: &Transcript,
    slack: Duration,
) -> Option<(OffsetDateTime, OffsetDateTime)> {
    let (first, last) = transcript.time_range()?;
    let slack = time::Duration::try_from(slack).ok()?;
    Some((first.checked_sub(slack)?, last.checked_add(slack)?))
}

impl SessionAggregate {
    /// Pick the record that backs each tool use, by index into `tool_records`.
    ///
    /// An exact `tool_use_id` match wins. Remaining uses take the earliest
    /// unused record with the same tool name that started inside `window`.
    /// A record backs at most one use.
    pub fn match_tool_uses(
        &self,
        uses: &[ToolUseRef<'_>],
        window: Option<(OffsetDateTime, OffsetDateTime)>,
    ) -> Vec<Option<usize>> {
        let mut used = vec![false; self.tool_records.len()];
        let mut assigned = vec![None; uses.len()];

        for (slot, tool_use) in assigned.iter_mut().zip(uses) {
            let Some(id) = tool_use.id else { continue };
            if let Some(pos) = self
                .tool_records
                .iter()
                .enumerate()
                .position(|(i, record)| !used[i] && record.tool_use_id() == Some(id))
            {
                used[pos] = true;
                *slot = Some(pos);
            }
        }

        for (slot, tool_use) in assigned.iter_mut().zip(uses) {
            if slot.is_some() {
                continue;
            }
            let candidate = self.tool_records.iter().enumerate().position(|(i, record)| {
                // Both sides carry an id and they differ: a different call.
                let ids_conflict = matches!(
                    (tool_use.id, record.tool_use_id()),
                    (Some(a), Some(b)) if a != b
                );
                !used[i]
                    && !ids_conflict
                    && record.tool_name == tool_use.name
                    && window.is_none_or(|(lo, hi)| (lo..=hi).contains(&record.started_at()))
            });
            if let Some(pos) = candidate {
                used[pos] = true;
                *slot = Some(pos);
            }
        }
        assigned
    }

    /// Completeness of `assigned` (from [`Self::match_tool_uses`]).
    pub fn completeness_for(&self, assigned: &[Option<usize>]) -> f64 {
        let enriched = assigned
            .iter()
            .flatten()
            .filter(|&&i| self.tool_records[i].is_fully_enriched())
            .count();
        completeness_score(assigned.len(), enriched)
    }

    /// Attach an enrichment block to every transcript tool use that has a
    /// record, and rescore completeness against the transcript.
    ///
    /// Returns how many tool uses were enriched.
    pub fn merge_into(&mut self, transcript: &mut Transcript, slack: Duration) -> usize {
        let window = turn_window(transcript, slack);
        let uses = transcript.tool_uses();
        let assigned = self.match_tool_uses(&uses, window);
        let positions: Vec<(usize, usize)> = uses
            .iter()
            .map(|tool_use| (tool_use.message_index, tool_use.block_index))
            .collect();
        self.completeness_score = self.completeness_for(&assigned);

        let mut enriched = 0;
        for ((message_index, block_index), record) in positions.into_iter().zip(assigned) {
            let Some(record) = record else { continue };
            if let Some(slot) = transcript.enrichment_slot(message_index, block_index) {
                *slot = Some(Box::new(ToolEnrichment::from(&self.tool_records[record])));
                enriched += 1;
            }
        }
        enriched
    }
}

/// A session whose tool calls ran in more than one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossProjectSession {
    pub session_id: String,
    /// Distinct project ids, sorted
    pub origins: Vec<String>,
    pub cwds: Vec<String>,
    pub tool_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

/// Sessions with records completed within `window` that span projects.
#[tracing::instrument(name = "cross_project_sessions", skip(mailbox))]
pub async fn get_cross_project_sessions(
    mailbox: &dyn Mailbox,
    window: Duration,
) -> HookResult<Vec<CrossProjectSession>> {
    cross_project_sessions_at(mailbox, window, OffsetDateTime::now_utc()).await
}

pub async fn cross_project_sessions_at(
    mailbox: &dyn Mailbox,
    window: Duration,
    now: OffsetDateTime,
) -> HookResult<Vec<CrossProjectSession>> {
    struct Seen {
        origins: BTreeSet<String>,
        cwds: BTreeSet<String>,
        tool_count: usize,
        first: OffsetDateTime,
        last: OffsetDateTime,
    }

    let since = time::Duration::try_from(window)
        .ok()
        .and_then(|window| now.checked_sub(window));
    let scan = mailbox::scan::<CompletedRecord>(mailbox, COMPLETED_PREFIX).await?;

    let mut sessions: BTreeMap<String, Seen> = BTreeMap::new();
    for (_, record) in scan.records {
        if since.is_some_and(|since| record.post.completed_at < since) {
            continue;
        }
        let seen = sessions
            .entry(record.session_id.clone())
            .or_insert_with(|| Seen {
                origins: BTreeSet::new(),
                cwds: BTreeSet::new(),
                tool_count: 0,
                first: record.started_at(),
                last: record.post.completed_at,
            });
        seen.tool_count += 1;
        seen.first = seen.first.min(record.started_at());
        seen.last = seen.last.max(record.post.completed_at);
        if let Some(origin) = record.origin() {
            seen.origins.insert(origin.project_id.clone());
            if let Some(cwd) = &origin.cwd {
                seen.cwds.insert(cwd.clone());
            }
        }
    }

    Ok(sessions
        .into_iter()
        .filter(|(_, seen)| seen.origins.len() > 1)
        .map(|(session_id, seen)| CrossProjectSession {
            session_id,
            origins: seen.origins.into_iter().collect(),
            cwds: seen.cwds.into_iter().collect(),
            tool_count: seen.tool_count,
            first_seen: seen.first,
            last_seen: seen.last,
        })
        .collect())
}
