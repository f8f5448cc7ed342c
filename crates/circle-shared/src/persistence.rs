//! Storage bridges: the persisted message store and key-value preferences.
//!
//! Implementations live in `circle-store`. The controller only calls the
//! message store from a background worker and never waits on it.

use async_trait::async_trait;

use crate::error::BridgeError;
use crate::types::MessageRecord;

#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Insert or replace a message by id.
    async fn insert(&self, record: MessageRecord) -> Result<(), BridgeError>;

    /// All messages for a peer, oldest first.
    async fn query_by_peer(&self, peer_id: &str) -> Result<Vec<MessageRecord>, BridgeError>;

    /// Messages for a peer still waiting to be sent, oldest first.
    async fn query_queued_by_peer(&self, peer_id: &str)
        -> Result<Vec<MessageRecord>, BridgeError>;

    /// Remove a peer's whole conversation. Returns the number of rows removed.
    async fn delete_by_peer(&self, peer_id: &str) -> Result<usize, BridgeError>;
}

/// Flat key-value preference storage. Values are opaque strings.
#[async_trait]
pub trait PreferenceStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, BridgeError>;

    async fn set(&self, key: &str, value: String) -> Result<(), BridgeError>;

    /// Remove every key.
    async fn clear(&self) -> Result<(), BridgeError>;
}
