//! Allocation lane
//!
//! One fixed-capacity ring of [`ConfigEntry`] records over a single core
//! type's kernel configuration region. Two indices move around the ring:
//!
//! - `alloc_index`: the slot the next commit lands in. Its `address` is
//!   always the next candidate address for this lane.
//! - `free_index`: the oldest slot whose work has not been reported complete.
//!
//! When `free_index == alloc_index` nothing is in flight. Live entries are the
//! slots from `free_index` up to (not including) `alloc_index`.

use crate::types::{
    ring_next, ConfigEntry, ReleaseToken, SyncRequirement, KERNEL_CONFIG_ENTRY_COUNT,
};

/// Ring allocator over one core type's configuration region.
#[derive(Clone, Debug)]
pub struct AllocationLane {
    base_address: u32,
    end_address: u32,
    entries: [ConfigEntry; KERNEL_CONFIG_ENTRY_COUNT],
    alloc_index: usize,
    free_index: usize,
    /// Most recent reservation, consumed by the next `alloc`
    pending: ConfigEntry,
}

impl AllocationLane {
    /// Create an empty lane over `[base_address, base_address + size)`.
    ///
    /// Panics if the region does not fit in the 32-bit address space.
    pub fn new(base_address: u32, size: u32) -> Self {
        let end_address = match base_address.checked_add(size) {
            Some(end) => end,
            None => panic!(
                "config region {:#x}+{:#x} overflows the 32-bit address space",
                base_address, size
            ),
        };
        Self {
            base_address,
            end_address,
            entries: [ConfigEntry::unset(base_address); KERNEL_CONFIG_ENTRY_COUNT],
            alloc_index: 0,
            free_index: 0,
            pending: ConfigEntry::unset(base_address),
        }
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    pub fn end_address(&self) -> u32 {
        self.end_address
    }

    /// Region size in bytes
    pub fn capacity(&self) -> u32 {
        self.end_address - self.base_address
    }

    pub fn alloc_index(&self) -> usize {
        self.alloc_index
    }

    pub fn free_index(&self) -> usize {
        self.free_index
    }

    /// Raw ring slot
    pub fn entry(&self, index: usize) -> &ConfigEntry {
        &self.entries[index]
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    /// Reservation waiting for the next `alloc`
    pub fn pending(&self) -> &ConfigEntry {
        &self.pending
    }

    /// Address the next reservation starts from
    pub fn next_address(&self) -> u32 {
        self.entries[self.alloc_index].address
    }

    /// True when nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.free_index == self.alloc_index
    }

    /// Number of committed, not yet freed slots
    pub fn in_flight(&self) -> usize {
        (self.alloc_index + KERNEL_CONFIG_ENTRY_COUNT - self.free_index) % KERNEL_CONFIG_ENTRY_COUNT
    }

    /// Committed, not yet freed slots, oldest first
    pub fn live_entries(&self) -> impl Iterator<Item = &ConfigEntry> + '_ {
        (0..self.in_flight())
            .map(move |i| &self.entries[(self.free_index + i) % KERNEL_CONFIG_ENTRY_COUNT])
    }

    /// Compute where `size` bytes would go and whether a wait is needed.
    ///
    /// Only `pending` is written; the indices are left alone until `alloc`.
    pub(crate) fn reserve(&mut self, size: u32) -> SyncRequirement {
        let candidate = self.next_address();
        if size == 0 {
            self.pending = ConfigEntry::unset(candidate);
            return SyncRequirement::none();
        }
        assert!(
            size <= self.capacity(),
            "kernel config request of {} bytes exceeds lane capacity of {} bytes ({:#x}..{:#x})",
            size,
            self.capacity(),
            self.base_address,
            self.end_address
        );

        // Local copy: the search may assume more slots are freed than really are.
        let mut free_index = self.free_index;
        let (address, sync) = loop {
            if free_index == self.alloc_index {
                let address = if fits(candidate, size, self.end_address) {
                    candidate
                } else {
                    self.base_address
                };
                break (address, SyncRequirement::none());
            }

            if let Some(address) = self.place(size, free_index) {
                let sync = if ring_next(self.alloc_index) == free_index {
                    // Ring table has no slot left to record this entry.
                    SyncRequirement::wait_for(self.entries[free_index].release_token)
                } else {
                    SyncRequirement::none()
                };
                break (address, sync);
            }

            let release_token = self.entries[free_index].release_token;
            let next_free = ring_next(free_index);
            if next_free == self.alloc_index {
                // Releasing this slot drains the lane; restart from the top.
                break (self.base_address, SyncRequirement::wait_for(release_token));
            }
            if let Some(address) = self.place(size, next_free) {
                break (address, SyncRequirement::wait_for(release_token));
            }
            free_index = next_free;
        };

        self.pending = ConfigEntry::new(address, size, sync.release_token);
        sync
    }

    /// Commit `pending` into the ring, reclaimable at `release_token`.
    pub(crate) fn alloc(&mut self, release_token: ReleaseToken) {
        let committed = ConfigEntry::new(self.pending.address, self.pending.size, release_token);
        let next = ring_next(self.alloc_index);
        if committed.size == 0 && next == self.free_index {
            // Table is full and an empty slice has nothing to reclaim.
            return;
        }
        self.entries[self.alloc_index] = committed;
        self.entries[next] = ConfigEntry::unset(committed.address + committed.size);
        self.alloc_index = next;
    }

    /// Release every leading slot whose token is `<= released_up_to`.
    ///
    /// Returns how many slots were released.
    pub(crate) fn free(&mut self, released_up_to: ReleaseToken) -> usize {
        let mut released = 0;
        while self.free_index != self.alloc_index
            && self.entries[self.free_index].release_token <= released_up_to
        {
            self.free_index = ring_next(self.free_index);
            released += 1;
        }
        released
    }

    /// Forget everything in flight
    pub(crate) fn reset(&mut self) {
        self.entries = [ConfigEntry::unset(self.base_address); KERNEL_CONFIG_ENTRY_COUNT];
        self.alloc_index = 0;
        self.free_index = 0;
        self.pending = ConfigEntry::unset(self.base_address);
    }

    /// Where `size` bytes fit if everything before `free_index` were released.
    fn place(&self, size: u32, free_index: usize) -> Option<u32> {
        let candidate = self.next_address();
        let oldest = self.entries[free_index].address;
        if self.is_wrapped(free_index) {
            // Only the gap up to the oldest live slot is free.
            fits(candidate, size, oldest).then_some(candidate)
        } else if fits(candidate, size, self.end_address) {
            Some(candidate)
        } else if fits(self.base_address, size, oldest) {
            Some(self.base_address)
        } else {
            None
        }
    }

    /// Whether the write position has wrapped behind the oldest live slot.
    ///
    /// Equal addresses are ambiguous: the ring is either empty or exactly full,
    /// told apart by the live byte count.
    fn is_wrapped(&self, free_index: usize) -> bool {
        let candidate = self.next_address();
        let oldest = self.entries[free_index].address;
        candidate < oldest || (candidate == oldest && self.live_bytes(free_index) > 0)
    }

    fn live_bytes(&self, free_index: usize) -> u64 {
        let mut total = 0u64;
        let mut index = free_index;
        while index != self.alloc_index {
            total += u64::from(self.entries[index].size);
            index = ring_next(index);
        }
        total
    }
}

#[inline]
fn fits(address: u32, size: u32, limit: u32) -> bool {
    u64::from(address) + u64::from(size) <= u64::from(limit)
}

// ============================================================================
// Kani Proofs for Lane Invariants
// ============================================================================

#[cfg(kani)]
mod proofs {
    use super::*;

    /// Proof: free never moves past the write position
    #[kani::proof]
    #[kani::unwind(10)]
    fn free_stops_at_alloc_index() {
        let mut lane = AllocationLane::new(0, 1024);
        for token in 1..=3u32 {
            let size: u32 = kani::any();
            kani::assume(size <= 1024);
            let sync = lane.reserve(size);
            if sync.needs_sync {
                lane.free(sync.release_token);
            }
            lane.alloc(token);
        }

        let released: u32 = kani::any();
        let before = lane.in_flight();
        let freed = lane.free(released);
        kani::assert(freed <= before, "Cannot free more slots than are in flight");
        kani::assert(
            lane.in_flight() == before - freed,
            "free_index must not pass alloc_index",
        );
    }

    /// Proof: a reservation always lands inside the lane
    #[kani::proof]
    #[kani::unwind(10)]
    fn reservation_stays_in_range() {
        let mut lane = AllocationLane::new(0x100, 512);
        for token in 1..=2u32 {
            let size: u32 = kani::any();
            kani::assume(size <= 512);
            lane.reserve(size);
            lane.alloc(token);
        }

        let size: u32 = kani::any();
        kani::assume(size > 0 && size <= 512);
        lane.reserve(size);
        let pending = lane.pending();
        kani::assert(pending.address >= 0x100, "Reservation below lane base");
        kani::assert(pending.end() <= 0x100 + 512, "Reservation past lane end");
    }
}
