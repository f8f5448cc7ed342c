//! Async bridges over the SQLite [`Database`].
//!
//! The connection lives behind a mutex and every call runs on the blocking
//! thread pool, so the async callers never stall the runtime on disk I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use circle_shared::error::BridgeError;
use circle_shared::persistence::{MessageStore, PreferenceStore};
use circle_shared::types::MessageRecord;

use crate::database::Database;
use crate::error::Result;

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open the database at `path`, or the platform default when `None`.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let db = match path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        Ok(Self::new(db))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&guard)
        })
        .await?
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert(&self, record: MessageRecord) -> std::result::Result<(), BridgeError> {
        Ok(self.with_db(move |db| db.upsert_message(&record)).await?)
    }

    async fn query_by_peer(
        &self,
        peer_id: &str,
    ) -> std::result::Result<Vec<MessageRecord>, BridgeError> {
        let peer_id = peer_id.to_string();
        Ok(self
            .with_db(move |db| db.get_messages_for_peer(&peer_id))
            .await?)
    }

    async fn query_queued_by_peer(
        &self,
        peer_id: &str,
    ) -> std::result::Result<Vec<MessageRecord>, BridgeError> {
        let peer_id = peer_id.to_string();
        Ok(self
            .with_db(move |db| db.get_queued_messages_for_peer(&peer_id))
            .await?)
    }

    async fn delete_by_peer(&self, peer_id: &str) -> std::result::Result<usize, BridgeError> {
        let peer_id = peer_id.to_string();
        Ok(self
            .with_db(move |db| db.delete_messages_for_peer(&peer_id))
            .await?)
    }
}

#[async_trait]
impl PreferenceStore for SqliteStore {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, BridgeError> {
        let key = key.to_string();
        Ok(self.with_db(move |db| db.get_preference(&key)).await?)
    }

    async fn set(&self, key: &str, value: String) -> std::result::Result<(), BridgeError> {
        let key = key.to_string();
        Ok(self
            .with_db(move |db| db.set_preference(&key, &value))
            .await?)
    }

    async fn clear(&self) -> std::result::Result<(), BridgeError> {
        self.with_db(|db| db.clear_preferences().map(|_| ()))
            .await
            .map_err(BridgeError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circle_shared::types::MessageStatus;

    #[tokio::test]
    async fn messages_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("circle.db");

        let store = SqliteStore::open(Some(&path)).unwrap();
        store
            .insert(MessageRecord {
                id: "m1".into(),
                peer_id: "p1".into(),
                content: "hello".into(),
                is_from_me: true,
                timestamp: 10,
                status: MessageStatus::Queued,
            })
            .await
            .unwrap();
        drop(store);

        let reopened = SqliteStore::open(Some(&path)).unwrap();
        let queued = reopened.query_queued_by_peer("p1").await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].content, "hello");
        assert_eq!(reopened.delete_by_peer("p1").await.unwrap(), 1);
        assert!(reopened.query_by_peer("p1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn preferences_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v1".into()).await.unwrap();
        store.set("k", "v2".into()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));

        store.clear().await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
