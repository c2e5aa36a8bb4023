//! Named constants and clamps for the routing table, centralized the way
//! `ant-networking`'s `config.rs` collects its magic numbers in one place
//! rather than scattering them through the modules that use them.

use std::time::Duration;

/// Capacity of a single k-bucket.
pub const K: usize = 16;

/// Maximum number of contacts sharing one IPv4 address within a bucket.
pub const MAX_PER_IP: usize = 3;

/// A leaf may only split below this level (`level < MAX_SPLITTABLE_LEVELS - 1`).
/// Upstream's split rule deliberately omits the classical Kademlia exception
/// for the leaf containing the local id; this crate preserves that behavior
/// (see `DESIGN.md`).
pub const MAX_SPLITTABLE_LEVELS: u8 = 6;

/// A level can never exceed the identifier width.
pub const MAX_LEVEL: u8 = 127;

/// Lookup timer period, fixed for every leaf.
pub const LOOKUP_TIMER_INTERVAL: Duration = Duration::from_secs(10);

/// Lower clamp for the per-node maintenance timer period.
pub const MAINTENANCE_TIMER_MIN: Duration = Duration::from_secs(5);

/// Upper clamp for the per-node maintenance timer period.
pub const MAINTENANCE_TIMER_MAX: Duration = Duration::from_secs(3600);

/// `degrade_type` is a no-op if invoked again before this much time has
/// passed since the last degrade.
pub const DEGRADE_COOLDOWN: Duration = Duration::from_secs(10);

/// A leaf triggers a lookup even above `MAX_SPLITTABLE_LEVELS` once its
/// bucket is at least this full.
pub const LOOKUP_FULLNESS_THRESHOLD: f32 = 0.8;

/// Derives the per-node maintenance timer interval from the low 64 bits of
/// the local identifier, clamped to `[MAINTENANCE_TIMER_MIN, MAINTENANCE_TIMER_MAX]`.
///
/// Upstream derives this directly from `local_id` interpreted as seconds,
/// which can come out to zero or to an unreasonably large value; this crate
/// clamps it to a sane range instead (see `DESIGN.md`).
pub fn maintenance_interval(low_bits_as_seconds: u64) -> Duration {
    let secs = low_bits_as_seconds
        .max(MAINTENANCE_TIMER_MIN.as_secs())
        .min(MAINTENANCE_TIMER_MAX.as_secs());
    Duration::from_secs(secs)
}

/// Per-`Router` overrides for the timer periods above. `K`, `MAX_PER_IP` and
/// `MAX_SPLITTABLE_LEVELS` stay fixed protocol constants; these are the
/// knobs a deployment actually wants to tune without recompiling (a node
/// under test, say, wants a much shorter lookup period than production).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterConfig {
    pub lookup_interval: Duration,
    pub maintenance_min: Duration,
    pub maintenance_max: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            lookup_interval: LOOKUP_TIMER_INTERVAL,
            maintenance_min: MAINTENANCE_TIMER_MIN,
            maintenance_max: MAINTENANCE_TIMER_MAX,
        }
    }
}

impl RouterConfig {
    /// Clamps `low_bits_as_seconds` to `[maintenance_min, maintenance_max]`.
    pub fn clamp_maintenance(&self, low_bits_as_seconds: u64) -> Duration {
        let secs = low_bits_as_seconds
            .max(self.maintenance_min.as_secs())
            .min(self.maintenance_max.as_secs());
        Duration::from_secs(secs)
    }
}
