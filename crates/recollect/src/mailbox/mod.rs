//! Key/record store shared by independent hook processes.
//!
//! The mailbox is the only channel between pre capture, post capture, the
//! orphan sweep and the aggregator. It knows nothing about sessions or
//! correlation: it stores opaque records under validated keys, and every
//! mutation is serialized per key.

mod fs;
mod lock;
mod memory;

pub use fs::FsMailbox;
pub use lock::KeyLock;
pub use memory::InMemoryMailbox;

use crate::error::{HookError, HookResult};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

/// Prefix of records written by pre capture
pub const PENDING_PREFIX: &str = "pre_";
/// Prefix of records written by post capture
pub const COMPLETED_PREFIX: &str = "complete_";
/// Prefix of archived conversations
pub const ARCHIVE_PREFIX: &str = "conv_";

/// A validated record key: `[A-Za-z0-9_.-]+`, not starting with a dot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MailboxKey(String);

impl MailboxKey {
    pub fn parse(raw: impl Into<String>) -> HookResult<Self> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && !raw.starts_with('.')
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if valid {
            Ok(MailboxKey(raw))
        } else {
            Err(HookError::InvalidKey(raw))
        }
    }

    pub fn pending(call_id: &str) -> HookResult<Self> {
        Self::parse(format!("{PENDING_PREFIX}{call_id}"))
    }

    pub fn completed(call_id: &str) -> HookResult<Self> {
        Self::parse(format!("{COMPLETED_PREFIX}{call_id}"))
    }

    /// Composite key for an archived conversation. Characters that cannot
    /// appear in a key are replaced, so any session id is accepted; `nonce`
    /// keeps sessions that sanitize alike, or stop in the same millisecond,
    /// apart.
    pub fn archive(session_id: &str, unix_millis: i128, nonce: &str) -> HookResult<Self> {
        let session: String = session_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        Self::parse(format!("{ARCHIVE_PREFIX}{session}_{unix_millis}_{nonce}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MailboxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage behind the mailbox.
///
/// Implementations must make `write` and `delete` atomic per key: a
/// concurrent reader sees either the old record, the new one, or nothing.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Replace the record under `key`.
    async fn write(&self, key: &MailboxKey, record: Vec<u8>) -> HookResult<()>;

    /// Store `record` under `key` only if no record exists there yet.
    /// Returns whether it was stored.
    async fn create(&self, key: &MailboxKey, record: Vec<u8>) -> HookResult<bool>;

    /// Fetch the record under `key`, if present.
    async fn read(&self, key: &MailboxKey) -> HookResult<Option<Vec<u8>>>;

    /// Remove the record under `key`. Returns whether it existed.
    async fn delete(&self, key: &MailboxKey) -> HookResult<bool>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> HookResult<Vec<MailboxKey>>;
}

pub async fn write_json<T: Serialize>(
    mailbox: &dyn Mailbox,
    key: &MailboxKey,
    record: &T,
) -> HookResult<()> {
    let bytes = serde_json::to_vec_pretty(record)?;
    mailbox.write(key, bytes).await
}

/// Like [`write_json`], but never replaces an existing record.
pub async fn create_json<T: Serialize>(
    mailbox: &dyn Mailbox,
    key: &MailboxKey,
    record: &T,
) -> HookResult<bool> {
    let bytes = serde_json::to_vec_pretty(record)?;
    mailbox.create(key, bytes).await
}

pub async fn read_json<T: DeserializeOwned>(
    mailbox: &dyn Mailbox,
    key: &MailboxKey,
) -> HookResult<Option<T>> {
    match mailbox.read(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Records under `prefix` that could be loaded.
#[derive(Debug)]
pub struct Scan<T> {
    pub records: Vec<(MailboxKey, T)>,
    /// Keys whose record did not parse
    pub unreadable: Vec<MailboxKey>,
}

/// Load every record under `prefix`.
///
/// Records removed between listing and reading are skipped silently;
/// records that fail to parse are reported in `unreadable`.
pub async fn scan<T: DeserializeOwned>(mailbox: &dyn Mailbox, prefix: &str) -> HookResult<Scan<T>> {
    let keys = mailbox.list(prefix).await?;
    let mut records = Vec::with_capacity(keys.len());
    let mut unreadable = Vec::new();
    for key in keys {
        match read_json::<T>(mailbox, &key).await {
            Ok(Some(record)) => records.push((key, record)),
            Ok(None) => {}
            Err(HookError::Serialization(e)) => {
                log::warn!("skipping unreadable record {}: {}", key, e);
                unreadable.push(key);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(Scan {
        records,
        unreadable,
    })
}
