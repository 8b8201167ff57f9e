use super::{Mailbox, MailboxKey};
use crate::error::HookResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use tokio::sync::Mutex;

/// An in-memory implementation of the `Mailbox` trait.
///
/// Only shared within one process; used by tests and by embedders that
/// run every stage in the same process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMailbox {
    records: Arc<Mutex<BTreeMap<MailboxKey, Vec<u8>>>>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl Mailbox for InMemoryMailbox {
    async fn write(&self, key: &MailboxKey, record: Vec<u8>) -> HookResult<()> {
        self.records.lock().await.insert(key.clone(), record);
        Ok(())
    }

    async fn create(&self, key: &MailboxKey, record: Vec<u8>) -> HookResult<bool> {
        let mut records = self.records.lock().await;
        match records.entry(key.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn read(&self, key: &MailboxKey) -> HookResult<Option<Vec<u8>>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn delete(&self, key: &MailboxKey) -> HookResult<bool> {
        Ok(self.records.lock().await.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> HookResult<Vec<MailboxKey>> {
        let records = self.records.lock().await;
        Ok(records
            .keys()
            .filter(|key| key.as_str().starts_with(prefix))
            .cloned()
            .collect())
    }
}
