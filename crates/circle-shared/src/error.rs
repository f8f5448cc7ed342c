use thiserror::Error;

/// Unrecoverable-until-the-precondition-changes failures of `start_discovery`.
///
/// The `Display` strings are shown to the user verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("Wi-Fi Aware is not supported on this device.")]
    Unsupported,

    #[error("Location and Nearby permissions are not granted.")]
    PermissionsMissing,

    #[error("Please complete your profile before scanning for peers.")]
    ProfileIncomplete,
}

/// Malformed or unparseable payloads received from a peer.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message received.")]
    Malformed,

    #[error("Failed to parse incoming message: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid status frame: {0}")]
    StatusFrame(String),

    #[error("Invalid advertisement: {0}")]
    Advertisement(String),
}

/// Errors surfaced by the persistence and preferences bridges.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage worker unavailable")]
    Unavailable,
}
