//! Wire payloads exchanged between peers.
//!
//! Three payload shapes travel over the discovery transport:
//! - a service advertisement `{uniqueId, nickname, avatarId, gender}`
//! - chat payloads `{id, content, timestamp, isFromMe}`, alone or as a JSON array
//! - status control frames `__STATUS__:<messageId>:<STATUS>`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{DEFAULT_AVATAR_ID, DEFAULT_PEER_NICKNAME, STATUS_FRAME_PREFIX};
use crate::error::ProtocolError;
use crate::types::{
    now_millis, ChatMessage, Gender, MessageId, MessageStatus, PeerDevice, PeerHandle, UserProfile,
};

/// Service-specific info published alongside the service name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advertisement {
    #[serde(default)]
    pub unique_id: String,
    #[serde(default = "default_nickname")]
    pub nickname: String,
    #[serde(default = "default_avatar_id")]
    pub avatar_id: u32,
    #[serde(default)]
    pub gender: Gender,
}

fn default_nickname() -> String {
    DEFAULT_PEER_NICKNAME.to_string()
}

fn default_avatar_id() -> u32 {
    DEFAULT_AVATAR_ID
}

impl Advertisement {
    pub fn from_profile(profile: &UserProfile) -> Self {
        Self {
            unique_id: profile.unique_id.clone(),
            nickname: profile.nickname.clone(),
            avatar_id: profile.avatar_id,
            gender: profile.gender,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(data)
            .map_err(|e| ProtocolError::Advertisement(e.to_string()))?;
        Ok(serde_json::from_str(text)?)
    }

    pub fn into_peer(self, handle: Option<PeerHandle>) -> PeerDevice {
        PeerDevice::new(
            self.unique_id,
            self.nickname,
            self.avatar_id,
            self.gender,
            handle,
        )
    }
}

/// Outgoing chat payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload<'a> {
    pub id: &'a str,
    pub content: &'a str,
    pub timestamp: i64,
    pub is_from_me: bool,
}

impl<'a> From<&'a ChatMessage> for ChatPayload<'a> {
    fn from(m: &'a ChatMessage) -> Self {
        Self {
            id: m.id.as_str(),
            content: &m.content,
            timestamp: m.timestamp,
            is_from_me: m.is_from_me,
        }
    }
}

/// Encode a single chat message as a JSON object.
pub fn encode_chat(message: &ChatMessage) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&ChatPayload::from(message))
}

/// Encode several chat messages as one JSON array.
pub fn encode_batch(messages: &[ChatMessage]) -> Result<Vec<u8>, serde_json::Error> {
    let payloads: Vec<ChatPayload<'_>> = messages.iter().map(ChatPayload::from).collect();
    serde_json::to_vec(&payloads)
}

/// A delivery/read acknowledgment for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFrame {
    pub message_id: MessageId,
    pub status: MessageStatus,
}

impl StatusFrame {
    pub fn new(message_id: MessageId, status: MessageStatus) -> Self {
        Self { message_id, status }
    }

    pub fn encode(&self) -> Vec<u8> {
        format!("{}:{}:{}", STATUS_FRAME_PREFIX, self.message_id, self.status.as_str()).into_bytes()
    }

    /// Parse `__STATUS__:<id>:<STATUS>`. Exactly three colon-separated parts are accepted.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let parts: Vec<&str> = text.split(':').collect();
        if parts.len() != 3 || parts[0] != STATUS_FRAME_PREFIX {
            return Err(ProtocolError::StatusFrame(format!(
                "expected 3 parts, got {}",
                parts.len()
            )));
        }
        let status = parts[2]
            .parse::<MessageStatus>()
            .map_err(ProtocolError::StatusFrame)?;
        Ok(Self {
            message_id: MessageId::from(parts[1]),
            status,
        })
    }
}

/// An inbound chat payload. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundChat {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl InboundChat {
    fn from_value(value: Value) -> Result<Self, ProtocolError> {
        if !value.is_object() {
            return Err(ProtocolError::Malformed);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Convert to a delivered message. Missing ids are generated; missing
    /// timestamps default to now. Blank content is kept and left for the
    /// caller to drop.
    pub fn into_message(self) -> ChatMessage {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .map(MessageId)
            .unwrap_or_default();
        ChatMessage::incoming(
            id,
            self.content.unwrap_or_default(),
            self.timestamp.unwrap_or_else(now_millis),
        )
    }
}

/// Classification of an inbound payload by its leading sentinel.
#[derive(Debug)]
pub enum InboundFrame {
    Status(StatusFrame),
    Single(InboundChat),
    /// Array elements in order; decoding stops at the first bad element.
    Batch(Vec<Result<InboundChat, ProtocolError>>),
}

/// Classify and decode a raw payload.
pub fn decode_inbound(data: &[u8]) -> Result<InboundFrame, ProtocolError> {
    let text = String::from_utf8_lossy(data);

    if text.starts_with(STATUS_FRAME_PREFIX) {
        return StatusFrame::parse(&text).map(InboundFrame::Status);
    }

    let trimmed = text.trim();
    if trimmed.starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(trimmed)?;
        let mut items = Vec::with_capacity(values.len());
        for value in values {
            let item = InboundChat::from_value(value);
            let failed = item.is_err();
            items.push(item);
            if failed {
                break;
            }
        }
        Ok(InboundFrame::Batch(items))
    } else if trimmed.starts_with('{') {
        let value: Value = serde_json::from_str(trimmed)?;
        InboundChat::from_value(value).map(InboundFrame::Single)
    } else {
        Err(ProtocolError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertisement_defaults_missing_fields() {
        let ad = Advertisement::from_bytes(br#"{"uniqueId":"p1"}"#).unwrap();
        assert_eq!(ad.unique_id, "p1");
        assert_eq!(ad.nickname, "Peer");
        assert_eq!(ad.avatar_id, 1);
        assert_eq!(ad.gender, Gender::Other);
    }

    #[test]
    fn advertisement_rejects_unknown_gender() {
        assert!(Advertisement::from_bytes(br#"{"uniqueId":"p1","gender":"ROBOT"}"#).is_err());
    }

    #[test]
    fn advertisement_wire_names() {
        let mut profile = UserProfile::new();
        profile.unique_id = "u1".into();
        profile.nickname = "Alice".into();
        profile.gender = Gender::Female;
        let bytes = Advertisement::from_profile(&profile).to_bytes().unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["uniqueId"], "u1");
        assert_eq!(json["nickname"], "Alice");
        assert_eq!(json["avatarId"], 1);
        assert_eq!(json["gender"], "FEMALE");
        assert!(json.get("email").is_none());
    }

    #[test]
    fn chat_payload_shape() {
        let msg = ChatMessage::outgoing("hello", MessageStatus::Sent);
        let json: Value = serde_json::from_slice(&encode_chat(&msg).unwrap()).unwrap();
        assert_eq!(json["id"], msg.id.as_str());
        assert_eq!(json["content"], "hello");
        assert_eq!(json["isFromMe"], true);
        assert_eq!(json["timestamp"], msg.timestamp);
        assert!(json.get("status").is_none());
    }

    #[test]
    fn status_frame_format() {
        let frame = StatusFrame::new("m1".into(), MessageStatus::Delivered);
        assert_eq!(frame.encode(), b"__STATUS__:m1:DELIVERED".to_vec());
        assert_eq!(StatusFrame::parse("__STATUS__:m1:DELIVERED").unwrap(), frame);
        assert!(StatusFrame::parse("__STATUS__:m1").is_err());
        assert!(StatusFrame::parse("__STATUS__:m1:LOST").is_err());
    }

    #[test]
    fn classifies_single_and_batch() {
        match decode_inbound(br#" {"id":"m1","content":"hi","timestamp":1000,"isFromMe":true}"#) {
            Ok(InboundFrame::Single(chat)) => {
                let msg = chat.into_message();
                assert_eq!(msg.id.as_str(), "m1");
                assert!(!msg.is_from_me);
                assert_eq!(msg.status, MessageStatus::Delivered);
                assert_eq!(msg.timestamp, 1000);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        match decode_inbound(br#"[{"id":"a","content":"1"},{"id":"b","content":"2"}]"#) {
            Ok(InboundFrame::Batch(items)) => {
                assert_eq!(items.len(), 2);
                assert!(items.iter().all(|i| i.is_ok()));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn batch_stops_at_first_bad_element() {
        match decode_inbound(br#"[{"id":"a","content":"1"},7,{"id":"c","content":"3"}]"#) {
            Ok(InboundFrame::Batch(items)) => {
                assert_eq!(items.len(), 2);
                assert!(items[0].is_ok());
                assert!(items[1].is_err());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn rejects_unclassifiable_text() {
        assert!(matches!(
            decode_inbound(b"hello there"),
            Err(ProtocolError::Malformed)
        ));
        assert!(matches!(
            decode_inbound(b"{not json"),
            Err(ProtocolError::Parse(_))
        ));
    }

    #[test]
    fn missing_id_is_generated() {
        let msg = InboundChat {
            id: None,
            content: Some("x".into()),
            timestamp: None,
        }
        .into_message();
        assert!(!msg.id.as_str().is_empty());
    }
}
