//! Discovered peer tracking.
//!
//! Maintains the live set of discovered peers keyed by `unique_id`. A new
//! discovery of a known identity replaces the previous entry (last write
//! wins) and moves it to the end of the list.

use tracing::debug;

use circle_shared::types::{PeerDevice, PeerHandle, PeerStatus};

/// Tracks every peer discovered in the current discovery cycle.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Vec<PeerDevice>,
}

impl PeerRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self { peers: Vec::new() }
    }

    /// Admit a peer, replacing any entry with the same identity.
    ///
    /// Peers without an identity are rejected. Returns whether the peer was admitted.
    pub fn upsert(&mut self, peer: PeerDevice) -> bool {
        if !peer.has_identity() {
            debug!(handle = ?peer.handle, "Rejecting peer without identity");
            return false;
        }

        let before = self.peers.len();
        self.peers.retain(|p| p.unique_id != peer.unique_id);
        debug!(
            peer = %peer.unique_id,
            nickname = %peer.nickname,
            replaced = before != self.peers.len(),
            "Tracking discovered peer"
        );
        self.peers.push(peer);
        true
    }

    /// Overwrite the distance of the entry with this identity.
    pub fn update_distance(&mut self, unique_id: &str, distance: f32) -> bool {
        match self.get_mut(unique_id) {
            Some(peer) => {
                peer.distance = Some(distance);
                true
            }
            None => false,
        }
    }

    pub fn set_status(&mut self, unique_id: &str, status: PeerStatus) {
        if let Some(peer) = self.get_mut(unique_id) {
            peer.status = status;
        }
    }

    pub fn get(&self, unique_id: &str) -> Option<&PeerDevice> {
        self.peers.iter().find(|p| p.unique_id == unique_id)
    }

    fn get_mut(&mut self, unique_id: &str) -> Option<&mut PeerDevice> {
        self.peers.iter_mut().find(|p| p.unique_id == unique_id)
    }

    /// Find the entry currently reachable through `handle`.
    pub fn find_by_handle(&self, handle: PeerHandle) -> Option<&PeerDevice> {
        self.peers.iter().find(|p| p.handle == Some(handle))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    /// Return all peers in discovery order (snapshot).
    pub fn snapshot(&self) -> Vec<PeerDevice> {
        self.peers.clone()
    }

    /// Field-by-field comparison against a published snapshot.
    ///
    /// `PeerDevice` equality only looks at identity, which would hide
    /// distance and status changes from observers.
    pub fn differs_from(&self, published: &[PeerDevice]) -> bool {
        self.peers.len() != published.len()
            || self.peers.iter().zip(published).any(|(a, b)| {
                a.unique_id != b.unique_id
                    || a.nickname != b.nickname
                    || a.avatar_id != b.avatar_id
                    || a.gender != b.gender
                    || a.handle != b.handle
                    || a.distance != b.distance
                    || a.status != b.status
                    || a.local_id != b.local_id
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circle_shared::types::Gender;

    fn peer(id: &str, nickname: &str, handle: u64) -> PeerDevice {
        PeerDevice::new(id, nickname, 1, Gender::Other, Some(PeerHandle(handle)))
    }

    #[test]
    fn test_same_identity_is_one_entry() {
        let mut registry = PeerRegistry::new();
        assert!(registry.upsert(peer("p1", "Old", 1)));
        assert!(registry.upsert(peer("p2", "Other", 2)));
        assert!(registry.upsert(peer("p1", "New", 3)));

        assert_eq!(registry.len(), 2);
        let p1 = registry.get("p1").unwrap();
        assert_eq!(p1.nickname, "New");
        assert_eq!(p1.handle, Some(PeerHandle(3)));
        // Re-discovered peers move to the end.
        assert_eq!(registry.snapshot()[1].unique_id, "p1");
    }

    #[test]
    fn test_rejects_empty_identity() {
        let mut registry = PeerRegistry::new();
        assert!(!registry.upsert(PeerDevice::anonymous(Some(PeerHandle(1)))));
        assert!(!registry.upsert(peer("   ", "Blank", 2)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_distance_by_identity() {
        let mut registry = PeerRegistry::new();
        registry.upsert(peer("p1", "A", 1));
        registry.upsert(peer("p2", "B", 2));

        assert!(registry.update_distance("p2", 3.25));
        assert!(!registry.update_distance("missing", 1.0));
        assert_eq!(registry.get("p2").unwrap().distance, Some(3.25));
        assert_eq!(registry.get("p1").unwrap().distance, None);
    }

    #[test]
    fn test_find_by_handle_and_clear() {
        let mut registry = PeerRegistry::new();
        registry.upsert(peer("p1", "A", 7));
        assert_eq!(
            registry.find_by_handle(PeerHandle(7)).map(|p| p.unique_id.as_str()),
            Some("p1")
        );
        assert!(registry.find_by_handle(PeerHandle(8)).is_none());

        registry.set_status("p1", PeerStatus::Connected);
        assert_eq!(registry.get("p1").unwrap().status, PeerStatus::Connected);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_differs_from_sees_distance_changes() {
        let mut registry = PeerRegistry::new();
        registry.upsert(peer("p1", "A", 1));
        let published = registry.snapshot();
        assert!(!registry.differs_from(&published));

        registry.update_distance("p1", 1.5);
        assert!(registry.differs_from(&published));
        assert!(registry.differs_from(&[]));
    }
}
