/// Application name
pub const APP_NAME: &str = "Circle";

/// Service name announced by publish and matched by subscribe
pub const SERVICE_NAME: &str = "circle.proximity-chat";

/// Message type tag passed to the transport with every payload
pub const MESSAGE_TYPE: u8 = 1;

/// Leading sentinel of a status control frame (`__STATUS__:<id>:<STATUS>`)
pub const STATUS_FRAME_PREFIX: &str = "__STATUS__";

/// Peer id used to tag persisted messages when no peer is known
pub const UNASSIGNED_PEER_ID: &str = "queued";

/// Placeholder ranging bounds in centimetres (0.20 m ..= 50.00 m)
pub const PLACEHOLDER_RANGE_MIN_CM: u32 = 20;
pub const PLACEHOLDER_RANGE_MAX_CM: u32 = 5_000;

/// Default deadline for an attach request in seconds
pub const DEFAULT_ATTACH_TIMEOUT_SECS: u64 = 15;

/// Default deadline for publish/subscribe start in seconds
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 15;

/// Display defaults applied to advertisements with missing fields
pub const DEFAULT_PEER_NICKNAME: &str = "Peer";
pub const DEFAULT_AVATAR_ID: u32 = 1;

/// Preference keys
pub const PREF_HAS_SEEN_ONBOARDING: &str = "hasSeenOnboarding";
pub const PREF_HAS_GRANTED_PERMISSIONS: &str = "hasGrantedPermissions";
pub const PREF_IS_DEVICE_COMPATIBLE: &str = "isDeviceCompatible";
pub const PREF_USER_PROFILE: &str = "userProfile";
