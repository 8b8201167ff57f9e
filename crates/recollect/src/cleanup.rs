//! Orphan sweeps and retention.
//!
//! There is no daemon to host a timer, so sweeping rides along on capture
//! calls: each capture asks its `CleanupPolicy` whether to sweep this time.

use crate::error::HookResult;
use crate::events::{CompletedRecord, PendingEvent};
use crate::mailbox::{self, COMPLETED_PREFIX, Mailbox, MailboxKey, PENDING_PREFIX};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;
use time::OffsetDateTime;

/// Decides whether a hot-path call should also run a sweep.
pub trait CleanupPolicy: Send + Sync + Debug {
    fn should_run(&self) -> bool;
}

/// Sweeps with fixed probability `p` per call.
#[derive(Debug, Clone, Copy)]
pub struct Probabilistic {
    p: f64,
}

impl Probabilistic {
    pub fn new(p: f64) -> Self {
        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        Self { p }
    }

    pub fn probability(&self) -> f64 {
        self.p
    }
}

impl CleanupPolicy for Probabilistic {
    fn should_run(&self) -> bool {
        rand::thread_rng().gen_bool(self.p)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl CleanupPolicy for Always {
    fn should_run(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl CleanupPolicy for Never {
    fn should_run(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub cleaned: usize,
}

fn older_than(timestamp: OffsetDateTime, now: OffsetDateTime, max_age: Duration) -> bool {
    let max_age = time::Duration::try_from(max_age).unwrap_or(time::Duration::MAX);
    now - timestamp > max_age
}

/// Delete pending events older than `max_age`.
///
/// Completed records are never touched. A delete that loses a race with
/// post capture (record already gone) is not counted; a delete that times
/// out on the lock is logged and skipped.
#[tracing::instrument(name = "orphan_sweep", skip(mailbox))]
pub async fn sweep_orphans(mailbox: &dyn Mailbox, max_age: Duration) -> HookResult<SweepReport> {
    sweep_orphans_at(mailbox, max_age, OffsetDateTime::now_utc()).await
}

pub async fn sweep_orphans_at(
    mailbox: &dyn Mailbox,
    max_age: Duration,
    now: OffsetDateTime,
) -> HookResult<SweepReport> {
    let scan = mailbox::scan::<PendingEvent>(mailbox, PENDING_PREFIX).await?;
    let mut report = SweepReport {
        scanned: scan.records.len() + scan.unreadable.len(),
        cleaned: 0,
    };

    for (key, event) in scan.records {
        if older_than(event.created_at, now, max_age) && remove(mailbox, &key).await {
            log::debug!(
                "removed orphaned '{}' call {} from session {}",
                event.tool_name,
                event.call_id,
                event.session_id
            );
            report.cleaned += 1;
        }
    }

    if report.cleaned > 0 {
        log::info!(
            "orphan sweep removed {} of {} pending events",
            report.cleaned,
            report.scanned
        );
    }
    Ok(report)
}

/// Delete completed records whose completion is older than `max_age`.
#[tracing::instrument(name = "retention_purge", skip(mailbox))]
pub async fn purge_completed(mailbox: &dyn Mailbox, max_age: Duration) -> HookResult<SweepReport> {
    let now = OffsetDateTime::now_utc();
    let scan = mailbox::scan::<CompletedRecord>(mailbox, COMPLETED_PREFIX).await?;
    let mut report = SweepReport {
        scanned: scan.records.len() + scan.unreadable.len(),
        cleaned: 0,
    };
    for (key, record) in scan.records {
        if older_than(record.post.completed_at, now, max_age) && remove(mailbox, &key).await {
            report.cleaned += 1;
        }
    }
    log::info!(
        "retention purge removed {} of {} completed records",
        report.cleaned,
        report.scanned
    );
    Ok(report)
}

async fn remove(mailbox: &dyn Mailbox, key: &MailboxKey) -> bool {
    match mailbox.delete(key).await {
        Ok(existed) => existed,
        Err(e) => {
            log::warn!("could not remove {}: {}", key, e);
            false
        }
    }
}

/// Run an orphan sweep if `policy` says so. Never fails the caller.
pub async fn maybe_sweep(
    policy: &dyn CleanupPolicy,
    mailbox: &dyn Mailbox,
    max_age: Duration,
) -> Option<SweepReport> {
    if !policy.should_run() {
        return None;
    }
    match sweep_orphans(mailbox, max_age).await {
        Ok(report) => Some(report),
        Err(e) => {
            log::warn!("orphan sweep failed: {}", e);
            None
        }
    }
}
