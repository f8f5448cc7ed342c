//! Discovery preconditions and advertisement handling.
//!
//! Builds the service info published under the service name and turns the
//! service info of discovered peers back into [`PeerDevice`]s.

use bytes::Bytes;
use tracing::{debug, warn};

use circle_shared::error::CapabilityError;
use circle_shared::protocol::Advertisement;
use circle_shared::types::{PeerDevice, PeerHandle, UserProfile};

use crate::transport::{Capabilities, Permissions};

/// Reads the local profile. Called again for every discovery cycle.
pub type ProfileProvider = std::sync::Arc<dyn Fn() -> Option<UserProfile> + Send + Sync>;

/// Check everything `start_discovery` needs before any platform call is made.
pub fn check_preconditions(
    capabilities: &Capabilities,
    permissions: &Permissions,
    profile: Option<&UserProfile>,
) -> Result<(), CapabilityError> {
    if !capabilities.discovery_available {
        return Err(CapabilityError::Unsupported);
    }
    if !permissions.discovery_granted() {
        return Err(CapabilityError::PermissionsMissing);
    }
    match profile {
        Some(profile) if profile.has_identity() => Ok(()),
        _ => Err(CapabilityError::ProfileIncomplete),
    }
}

/// Serialize the advertised part of a profile.
pub fn service_info_for(profile: &UserProfile) -> Result<Bytes, serde_json::Error> {
    Advertisement::from_profile(profile)
        .to_bytes()
        .map(Bytes::from)
}

/// Parse a discovered peer's service info.
///
/// Missing or malformed info yields the anonymous peer, which the registry
/// refuses to admit.
pub fn peer_from_service_info(handle: PeerHandle, service_info: Option<&[u8]>) -> PeerDevice {
    let Some(data) = service_info else {
        debug!(handle = %handle, "Service discovered without service info");
        return PeerDevice::anonymous(Some(handle));
    };

    match Advertisement::from_bytes(data) {
        Ok(ad) => ad.into_peer(Some(handle)),
        Err(e) => {
            warn!(handle = %handle, error = %e, "Skipping malformed advertisement");
            PeerDevice::anonymous(Some(handle))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Capabilities {
        Capabilities {
            discovery_available: true,
            ranging_supported: false,
        }
    }

    fn profile(id: &str) -> UserProfile {
        let mut p = UserProfile::new();
        p.unique_id = id.to_string();
        p.nickname = "Alice".into();
        p
    }

    #[test]
    fn test_preconditions_in_order() {
        let unavailable = Capabilities {
            discovery_available: false,
            ..caps()
        };
        assert_eq!(
            check_preconditions(&unavailable, &Permissions::default(), None),
            Err(CapabilityError::Unsupported)
        );
        assert_eq!(
            check_preconditions(&caps(), &Permissions::default(), Some(&profile("u1"))),
            Err(CapabilityError::PermissionsMissing)
        );
        assert_eq!(
            check_preconditions(&caps(), &Permissions::all(), Some(&profile("  "))),
            Err(CapabilityError::ProfileIncomplete)
        );
        assert_eq!(
            check_preconditions(&caps(), &Permissions::all(), None),
            Err(CapabilityError::ProfileIncomplete)
        );
        assert!(check_preconditions(&caps(), &Permissions::all(), Some(&profile("u1"))).is_ok());
    }

    #[test]
    fn test_permission_error_text() {
        let err = check_preconditions(&caps(), &Permissions::default(), Some(&profile("u1")))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Location and Nearby permissions are not granted."
        );
    }

    #[test]
    fn test_round_trip_through_service_info() {
        let info = service_info_for(&profile("u1")).unwrap();
        let peer = peer_from_service_info(PeerHandle(4), Some(&info));
        assert_eq!(peer.unique_id, "u1");
        assert_eq!(peer.nickname, "Alice");
        assert_eq!(peer.handle, Some(PeerHandle(4)));
    }

    #[test]
    fn test_malformed_info_is_anonymous() {
        assert!(!peer_from_service_info(PeerHandle(1), Some(b"garbage")).has_identity());
        assert!(!peer_from_service_info(PeerHandle(1), Some(b"{}")).has_identity());
        assert!(!peer_from_service_info(PeerHandle(1), None).has_identity());
    }
}
