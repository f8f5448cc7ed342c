use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DEFAULT_AVATAR_ID, DEFAULT_PEER_NICKNAME};

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// Opaque transport reference to a discovered peer. Only the transport
// layer knows what the number means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHandle(pub u64);

impl std::fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

/// Unique identifier for a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Delivery status of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    /// Written while no peer session existed.
    Queued,
    /// Handed to the transport.
    Sent,
    /// Acknowledged by the peer.
    Delivered,
    /// Read by the peer.
    Read,
}

impl MessageStatus {
    /// Wire and storage name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "QUEUED",
            MessageStatus::Sent => "SENT",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Read => "READ",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(MessageStatus::Queued),
            "SENT" => Ok(MessageStatus::Sent),
            "DELIVERED" => Ok(MessageStatus::Delivered),
            "READ" => Ok(MessageStatus::Read),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

/// A single chat message as shown in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub content: String,
    pub is_from_me: bool,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub status: MessageStatus,
}

impl ChatMessage {
    /// Create a message authored locally.
    pub fn outgoing(content: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: MessageId::new(),
            content: content.into(),
            is_from_me: true,
            timestamp: now_millis(),
            status,
        }
    }

    /// Create a message received from a peer. Incoming messages start out delivered.
    pub fn incoming(id: MessageId, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id,
            content: content.into(),
            is_from_me: false,
            timestamp,
            status: MessageStatus::Delivered,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Observable aggregate rendered by consumers.
///
/// `messages` is append-only from the controller's perspective apart from
/// status changes and full resets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    pub messages: Vec<ChatMessage>,
    pub is_connected: bool,
    pub error: Option<String>,
}

impl ChatState {
    /// An empty, disconnected state carrying an informational error.
    pub fn reset_with(error: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            is_connected: false,
            error: Some(error.into()),
        }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.id == id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Append a message unless its id is already present. Returns whether it was added.
    pub fn push_unique(&mut self, message: ChatMessage) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }
}

/// Connection status of a discovered peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerStatus {
    #[default]
    Discovered,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
    NonBinary,
    Transgender,
    #[default]
    Other,
    PreferNotToSay,
}

static NEXT_LOCAL_ID: AtomicU32 = AtomicU32::new(0);

/// A peer found through discovery.
///
/// Two values with the same `unique_id` are the same peer: equality and
/// hashing ignore the handle, distance, status and `local_id`.
#[derive(Debug, Clone)]
pub struct PeerDevice {
    pub unique_id: String,
    pub nickname: String,
    pub avatar_id: u32,
    pub gender: Gender,
    /// `None` until the transport has resolved the peer, or after it was lost.
    pub handle: Option<PeerHandle>,
    /// Measured or estimated proximity in meters.
    pub distance: Option<f32>,
    pub status: PeerStatus,
    /// Monotonic id for UI disambiguation. Carries no protocol meaning.
    pub local_id: u32,
}

impl PeerDevice {
    pub fn new(
        unique_id: impl Into<String>,
        nickname: impl Into<String>,
        avatar_id: u32,
        gender: Gender,
        handle: Option<PeerHandle>,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            nickname: nickname.into(),
            avatar_id,
            gender,
            handle,
            distance: None,
            status: PeerStatus::Discovered,
            local_id: NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    /// The degraded peer produced for payloads that could not be parsed.
    pub fn anonymous(handle: Option<PeerHandle>) -> Self {
        Self::new("", DEFAULT_PEER_NICKNAME, DEFAULT_AVATAR_ID, Gender::Other, handle)
    }

    /// A peer may only enter the registry once it has an identity.
    pub fn has_identity(&self) -> bool {
        !self.unique_id.trim().is_empty()
    }
}

impl PartialEq for PeerDevice {
    fn eq(&self, other: &Self) -> bool {
        self.unique_id == other.unique_id
    }
}

impl Eq for PeerDevice {}

impl Hash for PeerDevice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.unique_id.hash(state);
    }
}

/// The local user's profile. Only the first four fields are advertised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub unique_id: String,
    pub nickname: String,
    pub full_name: String,
    pub avatar_id: u32,
    pub gender: Gender,
    pub bio: String,
    pub interests: Vec<String>,
    pub website: String,
    pub email: String,
    pub phone: String,
    pub location: String,
    pub has_completed_setup: bool,
}

impl UserProfile {
    /// A fresh profile with a newly generated identity.
    pub fn new() -> Self {
        Self {
            unique_id: Uuid::new_v4().to_string(),
            ..Self::default()
        }
    }

    pub fn has_identity(&self) -> bool {
        !self.unique_id.trim().is_empty()
    }
}

/// Blank identity; stored profiles missing `uniqueId` stay blank until saved.
impl Default for UserProfile {
    fn default() -> Self {
        Self {
            unique_id: String::new(),
            nickname: String::new(),
            full_name: String::new(),
            avatar_id: DEFAULT_AVATAR_ID,
            gender: Gender::PreferNotToSay,
            bio: String::new(),
            interests: Vec::new(),
            website: String::new(),
            email: String::new(),
            phone: String::new(),
            location: String::new(),
            has_completed_setup: false,
        }
    }
}

/// A persisted message row, tagged with the peer it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub peer_id: String,
    pub content: String,
    pub is_from_me: bool,
    pub timestamp: i64,
    pub status: MessageStatus,
}

impl MessageRecord {
    pub fn from_message(message: &ChatMessage, peer_id: impl Into<String>) -> Self {
        Self {
            id: message.id.0.clone(),
            peer_id: peer_id.into(),
            content: message.content.clone(),
            is_from_me: message.is_from_me,
            timestamp: message.timestamp,
            status: message.status,
        }
    }

    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: MessageId(self.id),
            content: self.content,
            is_from_me: self.is_from_me,
            timestamp: self.timestamp,
            status: self.status,
        }
    }
}
