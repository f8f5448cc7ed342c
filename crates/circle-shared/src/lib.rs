// Data model, wire protocol and error taxonomy shared by every circle crate.

pub mod constants;
pub mod error;
pub mod persistence;
pub mod protocol;
pub mod types;

pub use error::{BridgeError, CapabilityError, ProtocolError};
pub use persistence::{MessageStore, PreferenceStore};
pub use protocol::{Advertisement, InboundFrame, StatusFrame};
pub use types::{
    ChatMessage, ChatState, Gender, MessageId, MessageRecord, MessageStatus, PeerDevice,
    PeerHandle, PeerStatus, UserProfile,
};
