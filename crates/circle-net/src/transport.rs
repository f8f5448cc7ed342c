//! Platform discovery transport abstraction.
//!
//! The platform exposes request-style calls (attach, publish, subscribe,
//! send, close, range) whose outcomes arrive later as [`TransportEvent`]s on
//! a channel owned by the controller. Nothing here holds controller state.

use bytes::Bytes;
use thiserror::Error;

use circle_shared::types::PeerHandle;

/// Opaque id of a platform session (attach, publish or subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Which discovery role a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    Publish,
    Subscribe,
}

impl SessionRole {
    pub fn label(&self) -> &'static str {
        match self {
            SessionRole::Publish => "Publish",
            SessionRole::Subscribe => "Subscribe",
        }
    }
}

/// What the device can do at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The discovery service exists and is currently available.
    pub discovery_available: bool,
    /// Precise (time-of-flight) ranging is supported.
    pub ranging_supported: bool,
}

/// Runtime permissions granted to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions {
    pub fine_location: bool,
    pub nearby_devices: bool,
    pub wifi_state: bool,
    pub change_wifi_state: bool,
}

impl Permissions {
    pub fn all() -> Self {
        Self {
            fine_location: true,
            nearby_devices: true,
            wifi_state: true,
            change_wifi_state: true,
        }
    }

    /// Enough to attach, publish and subscribe.
    pub fn discovery_granted(&self) -> bool {
        self.fine_location && self.nearby_devices
    }

    /// Enough to run precise ranging.
    pub fn ranging_granted(&self) -> bool {
        self.discovery_granted() && self.wifi_state && self.change_wifi_state
    }
}

/// Outcome of a precise ranging request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangingOutcome {
    /// Measured distance in millimetres.
    Success { distance_mm: u32 },
    /// The measurement completed without a usable result.
    NoResult,
    /// The platform rejected the request with a code.
    Failed { code: i32 },
}

/// Platform callbacks, delivered in order on the controller's event channel.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Attached {
        session: SessionId,
    },
    AttachFailed,
    DiscoveryStarted {
        role: SessionRole,
        session: SessionId,
    },
    DiscoveryFailed {
        role: SessionRole,
    },
    ServiceDiscovered {
        peer: PeerHandle,
        service_info: Option<Bytes>,
    },
    MessageReceived {
        role: SessionRole,
        peer: PeerHandle,
        payload: Bytes,
    },
    SessionTerminated {
        role: SessionRole,
    },
    RangingCompleted {
        peer: PeerHandle,
        outcome: RangingOutcome,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("session closed")]
    SessionClosed,

    #[error("unknown peer {0}")]
    UnknownPeer(PeerHandle),

    #[error("transport unavailable")]
    Unavailable,

    #[error("{0}")]
    Platform(String),
}

/// Request side of the platform discovery service.
///
/// Every call returns immediately. A returned error means the request was
/// not accepted; acceptance is confirmed later through a [`TransportEvent`].
pub trait AwareTransport: Send + Sync + 'static {
    fn capabilities(&self) -> Capabilities;

    fn permissions(&self) -> Permissions;

    fn attach(&self) -> Result<(), TransportError>;

    fn publish(
        &self,
        attach: SessionId,
        service_name: &str,
        service_info: Bytes,
    ) -> Result<(), TransportError>;

    fn subscribe(&self, attach: SessionId, service_name: &str) -> Result<(), TransportError>;

    fn send_message(
        &self,
        session: SessionId,
        peer: PeerHandle,
        message_type: u8,
        payload: Bytes,
    ) -> Result<(), TransportError>;

    /// Close any session. Closing an already closed session is not an error.
    fn close(&self, session: SessionId) -> Result<(), TransportError>;

    fn start_ranging(&self, peer: PeerHandle) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranging_needs_full_permission_set() {
        let mut perms = Permissions {
            fine_location: true,
            nearby_devices: true,
            ..Default::default()
        };
        assert!(perms.discovery_granted());
        assert!(!perms.ranging_granted());

        perms.wifi_state = true;
        perms.change_wifi_state = true;
        assert!(perms.ranging_granted());
        assert_eq!(perms, Permissions::all());
    }

    #[test]
    fn discovery_needs_location_and_nearby() {
        let perms = Permissions {
            fine_location: true,
            ..Default::default()
        };
        assert!(!perms.discovery_granted());
    }
}
