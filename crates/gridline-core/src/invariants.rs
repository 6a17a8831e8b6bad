//! Runtime invariants for the configuration allocator
//!
//! These checks are used for:
//! 1. Assertions in tests after every allocator step
//! 2. Randomised operation sequences in the integration tests
//! 3. Diagnostics when a caller suspects configuration memory corruption
//!
//! # Invariants
//!
//! 1. **Index Bounds**: `alloc_index` and `free_index` stay inside the ring
//! 2. **Address Range**: live slots and the next address stay inside the lane
//! 3. **No Double Allocation**: live slots never overlap
//! 4. **Clean Write Position**: the slot at `alloc_index` holds no allocation
//!    and does not start inside a live slot

use alloc::string::String;
use alloc::vec::Vec;

use crate::allocator::KernelConfigAllocator;
use crate::lane::AllocationLane;
use crate::types::KERNEL_CONFIG_ENTRY_COUNT;

/// An invariant violation with details
#[derive(Clone, Debug)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// Lane the violation was found on
    pub lane: usize,
    /// Description of what went wrong
    pub description: String,
}

/// Check all allocator invariants.
///
/// Returns a list of violations (empty if all invariants hold).
pub fn check_all_invariants(allocator: &KernelConfigAllocator) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for (index, lane) in allocator.lanes().iter().enumerate() {
        let bounds = check_index_bounds(index, lane);
        if !bounds.is_empty() {
            // Remaining checks walk the ring and assume sane indices.
            violations.extend(bounds);
            continue;
        }
        violations.extend(check_address_range(index, lane));
        violations.extend(check_no_double_allocation(index, lane));
        violations.extend(check_write_position(index, lane));
    }

    violations
}

/// Invariant 1: both indices address a ring slot
fn check_index_bounds(index: usize, lane: &AllocationLane) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for (name, value) in [("alloc_index", lane.alloc_index()), ("free_index", lane.free_index())] {
        if value >= KERNEL_CONFIG_ENTRY_COUNT {
            violations.push(InvariantViolation {
                invariant: "index_bounds",
                lane: index,
                description: alloc::format!(
                    "{} = {} outside ring of {} slots",
                    name,
                    value,
                    KERNEL_CONFIG_ENTRY_COUNT
                ),
            });
        }
    }

    violations
}

/// Invariant 2: addresses never escape `[base, end)`
fn check_address_range(index: usize, lane: &AllocationLane) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let base = u64::from(lane.base_address());
    let end = u64::from(lane.end_address());

    for entry in lane.live_entries() {
        if u64::from(entry.address) < base || entry.end() > end {
            violations.push(InvariantViolation {
                invariant: "address_range",
                lane: index,
                description: alloc::format!(
                    "slot {:#x}+{} outside lane {:#x}..{:#x}",
                    entry.address,
                    entry.size,
                    base,
                    end
                ),
            });
        }
    }

    let next = u64::from(lane.next_address());
    if next < base || next > end {
        violations.push(InvariantViolation {
            invariant: "address_range",
            lane: index,
            description: alloc::format!(
                "next address {:#x} outside lane {:#x}..{:#x}",
                next,
                base,
                end
            ),
        });
    }

    violations
}

/// Invariant 3: no two live slots share a byte
fn check_no_double_allocation(index: usize, lane: &AllocationLane) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let live: Vec<_> = lane.live_entries().collect();

    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            if a.overlaps(b) {
                violations.push(InvariantViolation {
                    invariant: "no_double_allocation",
                    lane: index,
                    description: alloc::format!(
                        "slot {:#x}+{} (token {}) overlaps slot {:#x}+{} (token {})",
                        a.address,
                        a.size,
                        a.release_token,
                        b.address,
                        b.size,
                        b.release_token
                    ),
                });
            }
        }
    }

    violations
}

/// Invariant 4: the write position is a placeholder outside live data
fn check_write_position(index: usize, lane: &AllocationLane) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let slot = lane.entry(lane.alloc_index());

    if slot.size != 0 {
        violations.push(InvariantViolation {
            invariant: "write_position",
            lane: index,
            description: alloc::format!(
                "slot at alloc_index {} already holds {} bytes",
                lane.alloc_index(),
                slot.size
            ),
        });
    }

    let next = u64::from(slot.address);
    for entry in lane.live_entries() {
        if entry.size != 0 && next > u64::from(entry.address) && next < entry.end() {
            violations.push(InvariantViolation {
                invariant: "write_position",
                lane: index,
                description: alloc::format!(
                    "next address {:#x} inside live slot {:#x}+{}",
                    next,
                    entry.address,
                    entry.size
                ),
            });
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_allocator_is_clean() {
        let kca = KernelConfigAllocator::new(&[(0, 1024), (0x4000, 256)]);
        assert!(check_all_invariants(&kca).is_empty());
    }

    #[test]
    fn test_clean_after_wraparound() {
        let mut kca = KernelConfigAllocator::new(&[(0, 1000)]);
        let mut token = 0;
        for size in [300, 300, 300, 500, 200, 450, 90, 1000, 10] {
            let (sync, _) = kca.reserve(&[size]);
            if sync.needs_sync {
                kca.free(sync.release_token);
            }
            token += 1;
            kca.alloc(token);
            let violations = check_all_invariants(&kca);
            assert!(violations.is_empty(), "{:?}", violations);
        }
    }

    #[test]
    fn test_ignored_sync_is_reported() {
        let mut kca = KernelConfigAllocator::new(&[(0, 1000)]);
        kca.reserve(&[600]);
        kca.alloc(1);
        let (sync, _) = kca.reserve(&[600]);
        assert!(sync.needs_sync);
        // Second alloc without freeing: slot 0 and slot 1 both claim the base.
        kca.alloc(2);
        let violations = check_all_invariants(&kca);
        assert!(violations
            .iter()
            .any(|v| v.invariant == "no_double_allocation" && v.lane == 0));
    }
}
