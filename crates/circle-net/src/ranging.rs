//! Proximity estimation for discovered peers.
//!
//! Every newly discovered peer gets an immediate estimate from a
//! [`RangingStrategy`]. When the device supports precise ranging and the full
//! permission set is granted, the controller additionally asks the transport
//! for a measurement which overwrites the estimate once it arrives.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use circle_shared::constants::{PLACEHOLDER_RANGE_MAX_CM, PLACEHOLDER_RANGE_MIN_CM};
use circle_shared::types::PeerDevice;

use crate::transport::{Capabilities, Permissions};

pub trait RangingStrategy: Send + 'static {
    /// Immediate distance estimate in meters, if any.
    fn estimate(&mut self, peer: &PeerDevice) -> Option<f32>;
}

/// Pseudo-random distance in [0.20, 50.00] m with centimetre granularity.
pub struct PlaceholderRanging {
    rng: StdRng,
}

impl PlaceholderRanging {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sequence, for tests and simulations.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for PlaceholderRanging {
    fn default() -> Self {
        Self::new()
    }
}

impl RangingStrategy for PlaceholderRanging {
    fn estimate(&mut self, _peer: &PeerDevice) -> Option<f32> {
        let cm = self
            .rng
            .gen_range(PLACEHOLDER_RANGE_MIN_CM..=PLACEHOLDER_RANGE_MAX_CM);
        Some(cm as f32 / 100.0)
    }
}

/// Leaves distances unknown until a precise measurement arrives.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEstimate;

impl RangingStrategy for NoEstimate {
    fn estimate(&mut self, _peer: &PeerDevice) -> Option<f32> {
        None
    }
}

/// Whether the precise path may be used on this device right now.
pub fn precise_ranging_allowed(capabilities: &Capabilities, permissions: &Permissions) -> bool {
    capabilities.ranging_supported && permissions.ranging_granted()
}

pub fn meters_from_mm(distance_mm: u32) -> f32 {
    distance_mm as f32 / 1000.0
}
