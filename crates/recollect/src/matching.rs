//! Choosing which pending event a post capture belongs to.
//!
//! Nothing observable across process boundaries says which pre capture a
//! post capture answers. When the hook supplies the assistant's tool-use id
//! the match is exact; otherwise candidates sharing session and tool name
//! are handed to a named tie-break policy. Two in-flight calls to the same
//! tool in one session can be paired wrongly by any of these policies.

use crate::events::PendingEvent;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use time::OffsetDateTime;

/// What post capture knows when it looks for its pending event.
#[derive(Debug, Clone, Copy)]
pub struct MatchQuery<'a> {
    pub session_id: &'a str,
    pub tool_name: &'a str,
    /// When the post capture ran
    pub at: OffsetDateTime,
    pub tool_use_id: Option<&'a str>,
}

/// Tie-break policy among pending events with the same session and tool.
pub trait MatchStrategy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// `candidates` is never empty and keeps mailbox listing order.
    fn select<'a>(
        &self,
        candidates: &[&'a PendingEvent],
        query: &MatchQuery<'_>,
    ) -> Option<&'a PendingEvent>;
}

/// Newest pending event wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct MostRecentFirst;

impl MatchStrategy for MostRecentFirst {
    fn name(&self) -> &'static str {
        "most_recent"
    }

    fn select<'a>(
        &self,
        candidates: &[&'a PendingEvent],
        _query: &MatchQuery<'_>,
    ) -> Option<&'a PendingEvent> {
        candidates
            .iter()
            .copied()
            .reduce(|best, c| if c.created_at > best.created_at { c } else { best })
    }
}

/// Oldest pending event wins (FIFO per tool name).
#[derive(Debug, Clone, Copy, Default)]
pub struct OldestFirst;

impl MatchStrategy for OldestFirst {
    fn name(&self) -> &'static str {
        "oldest_first"
    }

    fn select<'a>(
        &self,
        candidates: &[&'a PendingEvent],
        _query: &MatchQuery<'_>,
    ) -> Option<&'a PendingEvent> {
        candidates
            .iter()
            .copied()
            .reduce(|best, c| if c.created_at < best.created_at { c } else { best })
    }
}

/// Pending event whose creation is closest to the post capture time.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestTimestamp;

impl MatchStrategy for NearestTimestamp {
    fn name(&self) -> &'static str {
        "nearest_timestamp"
    }

    fn select<'a>(
        &self,
        candidates: &[&'a PendingEvent],
        query: &MatchQuery<'_>,
    ) -> Option<&'a PendingEvent> {
        let distance = |event: &PendingEvent| (query.at - event.created_at).abs();
        candidates
            .iter()
            .copied()
            .reduce(|best, c| if distance(c) < distance(best) { c } else { best })
    }
}

/// Refuses to guess: matches only when exactly one candidate exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniqueOnly;

impl MatchStrategy for UniqueOnly {
    fn name(&self) -> &'static str {
        "unique_only"
    }

    fn select<'a>(
        &self,
        candidates: &[&'a PendingEvent],
        query: &MatchQuery<'_>,
    ) -> Option<&'a PendingEvent> {
        match candidates {
            [only] => Some(*only),
            _ => {
                log::warn!(
                    "{} pending '{}' calls in session {}; refusing to pick one",
                    candidates.len(),
                    query.tool_name,
                    query.session_id
                );
                None
            }
        }
    }
}

/// Config-level name of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategyKind {
    #[default]
    MostRecent,
    OldestFirst,
    NearestTimestamp,
    UniqueOnly,
}

impl MatchStrategyKind {
    pub fn build(self) -> Box<dyn MatchStrategy> {
        match self {
            MatchStrategyKind::MostRecent => Box::new(MostRecentFirst),
            MatchStrategyKind::OldestFirst => Box::new(OldestFirst),
            MatchStrategyKind::NearestTimestamp => Box::new(NearestTimestamp),
            MatchStrategyKind::UniqueOnly => Box::new(UniqueOnly),
        }
    }
}

/// Find the pending event a post capture belongs to.
pub fn find_match<'a>(
    strategy: &dyn MatchStrategy,
    pending: &'a [PendingEvent],
    query: &MatchQuery<'_>,
) -> Option<&'a PendingEvent> {
    let candidates: Vec<&PendingEvent> = pending
        .iter()
        .filter(|event| event.session_id == query.session_id && event.tool_name == query.tool_name)
        .collect();
    if candidates.is_empty() {
        return None;
    }

    let Some(id) = query.tool_use_id else {
        return strategy.select(&candidates, query);
    };
    if let Some(exact) = candidates
        .iter()
        .find(|event| event.tool_use_id.as_deref() == Some(id))
    {
        return Some(*exact);
    }
    // Events stamped with a different tool use belong to another call.
    let unclaimed: Vec<&PendingEvent> = candidates
        .into_iter()
        .filter(|event| event.tool_use_id.is_none())
        .collect();
    if unclaimed.is_empty() {
        return None;
    }
    strategy.select(&unclaimed, query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Origin;
    use crate::payload::Payload;
    use time::Duration;

    fn event(id: &str, session: &str, tool: &str, created_at: OffsetDateTime) -> PendingEvent {
        PendingEvent {
            call_id: id.to_string(),
            session_id: session.to_string(),
            tool_name: tool.to_string(),
            tool_input: Payload::null(),
            created_at,
            origin: Origin::from_cwd(None),
            tool_use_id: None,
        }
    }

    fn query(at: OffsetDateTime) -> MatchQuery<'static> {
        MatchQuery {
            session_id: "s1",
            tool_name: "Read",
            at,
            tool_use_id: None,
        }
    }

    fn fixture() -> (OffsetDateTime, Vec<PendingEvent>) {
        let now = OffsetDateTime::now_utc();
        let pending = vec![
            event("old", "s1", "Read", now - Duration::seconds(30)),
            event("new", "s1", "Read", now - Duration::seconds(2)),
            event("mid", "s1", "Read", now - Duration::seconds(10)),
            event("other-tool", "s1", "Write", now - Duration::seconds(1)),
            event("other-session", "s2", "Read", now),
        ];
        (now, pending)
    }

    #[test]
    fn most_recent_picks_newest_in_session_and_tool() {
        let (now, pending) = fixture();
        let found = find_match(&MostRecentFirst, &pending, &query(now)).unwrap();
        assert_eq!(found.call_id, "new");
    }

    #[test]
    fn oldest_first_picks_oldest() {
        let (now, pending) = fixture();
        let found = find_match(&OldestFirst, &pending, &query(now)).unwrap();
        assert_eq!(found.call_id, "old");
    }

    #[test]
    fn nearest_timestamp_uses_query_time() {
        let (now, pending) = fixture();
        let at = now - Duration::seconds(11);
        let found = find_match(&NearestTimestamp, &pending, &query(at)).unwrap();
        assert_eq!(found.call_id, "mid");
    }

    #[test]
    fn unique_only_refuses_ambiguity() {
        let (now, pending) = fixture();
        assert!(find_match(&UniqueOnly, &pending, &query(now)).is_none());

        let single = vec![event("only", "s1", "Read", now)];
        assert_eq!(
            find_match(&UniqueOnly, &single, &query(now)).unwrap().call_id,
            "only"
        );
    }

    #[test]
    fn tool_use_id_beats_strategy() {
        let (now, mut pending) = fixture();
        pending[0].tool_use_id = Some("toolu_1".into());
        let q = MatchQuery {
            tool_use_id: Some("toolu_1"),
            ..query(now)
        };
        let found = find_match(&MostRecentFirst, &pending, &q).unwrap();
        assert_eq!(found.call_id, "old");
    }

    #[test]
    fn events_claimed_by_another_tool_use_are_skipped() {
        let (now, mut pending) = fixture();
        pending[1].tool_use_id = Some("toolu_other".into());
        let q = MatchQuery {
            tool_use_id: Some("toolu_mine"),
            ..query(now)
        };
        let found = find_match(&MostRecentFirst, &pending, &q).unwrap();
        assert_eq!(found.call_id, "mid");
    }

    #[test]
    fn no_candidates_no_match() {
        let (now, pending) = fixture();
        let q = MatchQuery {
            tool_name: "Bash",
            ..query(now)
        };
        assert!(find_match(&MostRecentFirst, &pending, &q).is_none());
    }

    #[test]
    fn kind_builds_named_strategy() {
        assert_eq!(MatchStrategyKind::default().build().name(), "most_recent");
        assert_eq!(MatchStrategyKind::UniqueOnly.build().name(), "unique_only");
        let kind: MatchStrategyKind = serde_json::from_str("\"nearest_timestamp\"").unwrap();
        assert_eq!(kind, MatchStrategyKind::NearestTimestamp);
    }
}
