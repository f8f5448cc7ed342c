//! Non-persistent store for tests and simulations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use circle_shared::error::BridgeError;
use circle_shared::persistence::{MessageStore, PreferenceStore};
use circle_shared::types::{MessageRecord, MessageStatus};

/// Holds messages and preferences in process memory.
#[derive(Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<MessageRecord>>,
    preferences: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with a storage error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every stored message, in insertion order.
    pub fn records(&self) -> Vec<MessageRecord> {
        match self.messages.lock() {
            Ok(messages) => messages.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn check(&self) -> Result<(), BridgeError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::Storage("memory store set to fail".into()));
        }
        Ok(())
    }

    fn messages(&self) -> Result<MutexGuard<'_, Vec<MessageRecord>>, BridgeError> {
        self.check()?;
        self.messages
            .lock()
            .map_err(|e| BridgeError::Storage(format!("Lock poisoned: {e}")))
    }

    fn preferences(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, BridgeError> {
        self.check()?;
        self.preferences
            .lock()
            .map_err(|e| BridgeError::Storage(format!("Lock poisoned: {e}")))
    }

    fn select(
        &self,
        filter: impl Fn(&MessageRecord) -> bool,
    ) -> Result<Vec<MessageRecord>, BridgeError> {
        let mut rows: Vec<MessageRecord> = self
            .messages()?
            .iter()
            .filter(|r| filter(r))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, record: MessageRecord) -> Result<(), BridgeError> {
        let mut messages = self.messages()?;
        match messages.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => messages.push(record),
        }
        Ok(())
    }

    async fn query_by_peer(&self, peer_id: &str) -> Result<Vec<MessageRecord>, BridgeError> {
        self.select(|r| r.peer_id == peer_id)
    }

    async fn query_queued_by_peer(
        &self,
        peer_id: &str,
    ) -> Result<Vec<MessageRecord>, BridgeError> {
        self.select(|r| r.peer_id == peer_id && r.status == MessageStatus::Queued)
    }

    async fn delete_by_peer(&self, peer_id: &str) -> Result<usize, BridgeError> {
        let mut messages = self.messages()?;
        let before = messages.len();
        messages.retain(|r| r.peer_id != peer_id);
        Ok(before - messages.len())
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, BridgeError> {
        Ok(self.preferences()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), BridgeError> {
        self.preferences()?.insert(key.to_string(), value);
        Ok(())
    }

    async fn clear(&self) -> Result<(), BridgeError> {
        self.preferences()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, ts: i64, status: MessageStatus) -> MessageRecord {
        MessageRecord {
            id: id.into(),
            peer_id: "p1".into(),
            content: "x".into(),
            is_from_me: true,
            timestamp: ts,
            status,
        }
    }

    #[tokio::test]
    async fn insert_is_an_upsert() {
        let store = MemoryStore::new();
        store.insert(record("m1", 2, MessageStatus::Queued)).await.unwrap();
        store.insert(record("m0", 1, MessageStatus::Sent)).await.unwrap();
        store.insert(record("m1", 2, MessageStatus::Sent)).await.unwrap();

        let rows = store.query_by_peer("p1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "m0");
        assert!(store.query_queued_by_peer("p1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_store_reports_errors() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(store.insert(record("m1", 1, MessageStatus::Sent)).await.is_err());
        store.set_failing(false);
        assert!(store.records().is_empty());
    }
}
