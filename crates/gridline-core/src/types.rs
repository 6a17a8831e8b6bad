//! Core allocator types
//!
//! All types here are pure data.

use serde::{Deserialize, Serialize};

/// Generation counter; an entry is reclaimable once work up to it completed
pub type ReleaseToken = u32;

/// Number of ring slots per lane
pub const KERNEL_CONFIG_ENTRY_COUNT: usize = 8;

/// Marker stored in the freshly opened slot after `alloc` (diagnostics only)
pub const UNSET_RELEASE_TOKEN: ReleaseToken = 0xbaba_baba;

/// One ring slot.
///
/// `size == 0` means no allocation has been made in this slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Device address of the slice
    pub address: u32,
    /// Size of the slice in bytes
    pub size: u32,
    /// Generation at which the slice becomes reclaimable
    pub release_token: ReleaseToken,
}

impl ConfigEntry {
    pub const fn new(address: u32, size: u32, release_token: ReleaseToken) -> Self {
        Self {
            address,
            size,
            release_token,
        }
    }

    /// Placeholder slot starting at `address`
    pub const fn unset(address: u32) -> Self {
        Self::new(address, 0, UNSET_RELEASE_TOKEN)
    }

    /// One past the last byte, widened so it cannot overflow
    pub fn end(&self) -> u64 {
        u64::from(self.address) + u64::from(self.size)
    }

    /// Whether `[address, address + size)` intersects `other`
    pub fn overlaps(&self, other: &ConfigEntry) -> bool {
        self.size != 0
            && other.size != 0
            && u64::from(self.address) < other.end()
            && u64::from(other.address) < self.end()
    }
}

/// Result of a reservation: does the caller have to wait first?
///
/// When `needs_sync` is set, the caller must observe `release_token` as
/// released (and pass it to `free`) before relying on the reserved region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequirement {
    pub needs_sync: bool,
    pub release_token: ReleaseToken,
}

impl SyncRequirement {
    /// No wait required
    pub const fn none() -> Self {
        Self {
            needs_sync: false,
            release_token: 0,
        }
    }

    /// Wait until `release_token` is released
    pub const fn wait_for(release_token: ReleaseToken) -> Self {
        Self {
            needs_sync: true,
            release_token,
        }
    }

    /// Combine per-lane requirements.
    ///
    /// Waiting on a larger token is always sufficient, so the larger token
    /// wins; with equal tokens the earlier lane is kept.
    pub fn merge(self, other: SyncRequirement) -> SyncRequirement {
        match (self.needs_sync, other.needs_sync) {
            (false, _) => other,
            (true, false) => self,
            (true, true) if other.release_token > self.release_token => other,
            (true, true) => self,
        }
    }
}

/// Next index around the ring
#[inline]
pub(crate) fn ring_next(index: usize) -> usize {
    (index + 1) % KERNEL_CONFIG_ENTRY_COUNT
}
