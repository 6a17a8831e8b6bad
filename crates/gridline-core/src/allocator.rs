//! Kernel configuration allocator
//!
//! Owns one [`AllocationLane`] per core type and drives them in lockstep:
//! every kernel launch reserves (possibly zero) bytes on every lane, commits
//! all lanes with one release token, and is reclaimed on all lanes by the
//! same `free` call.

use alloc::vec::Vec;

use crate::lane::AllocationLane;
use crate::types::{ConfigEntry, ReleaseToken, SyncRequirement};

/// Ring allocator over all core types' configuration regions.
///
/// `reserve` is speculative and may be repeated; `alloc` is the commit point
/// and must be called in true issue order.
#[derive(Clone, Debug)]
pub struct KernelConfigAllocator {
    lanes: Vec<AllocationLane>,
    /// Set by `reserve`, consumed by `alloc`
    reserved: bool,
}

impl KernelConfigAllocator {
    /// Create one lane per `(base_address, size)` region, in lane order.
    pub fn new(regions: &[(u32, u32)]) -> Self {
        Self {
            lanes: regions
                .iter()
                .map(|&(base, size)| AllocationLane::new(base, size))
                .collect(),
            reserved: false,
        }
    }

    /// Number of lanes (core types)
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn lane(&self, index: usize) -> &AllocationLane {
        &self.lanes[index]
    }

    pub fn lanes(&self) -> &[AllocationLane] {
        &self.lanes
    }

    /// Reserve `requested_sizes[i]` bytes on lane `i`.
    ///
    /// Returns the combined sync requirement and the reserved entry for every
    /// lane. When several lanes need a sync the largest token is reported,
    /// since waiting for it satisfies every lane.
    ///
    /// Panics if the number of sizes differs from the lane count or a size
    /// exceeds its lane's capacity.
    pub fn reserve(&mut self, requested_sizes: &[u32]) -> (SyncRequirement, Vec<ConfigEntry>) {
        assert_eq!(
            requested_sizes.len(),
            self.lanes.len(),
            "reserve got {} sizes for {} lanes",
            requested_sizes.len(),
            self.lanes.len()
        );

        let mut sync = SyncRequirement::none();
        let mut entries = Vec::with_capacity(self.lanes.len());
        for (lane, &size) in self.lanes.iter_mut().zip(requested_sizes) {
            sync = sync.merge(lane.reserve(size));
            entries.push(*lane.pending());
        }
        self.reserved = true;
        (sync, entries)
    }

    /// Commit the last reservation on every lane.
    ///
    /// The committed slots become reclaimable once `release_token` is passed
    /// to `free`. Panics without a preceding `reserve`.
    pub fn alloc(&mut self, release_token: ReleaseToken) {
        assert!(self.reserved, "alloc called without a matching reserve");
        for lane in &mut self.lanes {
            lane.alloc(release_token);
        }
        self.reserved = false;
    }

    /// Reclaim every slot whose token is `<= released_up_to`, on all lanes.
    ///
    /// Idempotent and monotonic. Returns the number of slots released.
    pub fn free(&mut self, released_up_to: ReleaseToken) -> usize {
        self.lanes
            .iter_mut()
            .map(|lane| lane.free(released_up_to))
            .sum()
    }

    /// Address of the most recent reservation on `lane`
    pub fn last_slot_address(&self, lane: usize) -> u32 {
        assert!(
            lane < self.lanes.len(),
            "lane {} out of range ({} lanes)",
            lane,
            self.lanes.len()
        );
        self.lanes[lane].pending().address
    }

    /// Drop all in-flight state; only valid once the device is idle.
    pub fn reset(&mut self) {
        for lane in &mut self.lanes {
            lane.reset();
        }
        self.reserved = false;
    }

    /// True when no lane has anything in flight
    pub fn is_idle(&self) -> bool {
        self.lanes.iter().all(AllocationLane::is_empty)
    }
}
