//! Gridline Core - Kernel Configuration Allocator
//!
//! This crate contains the **pure, HAL-free** ring allocator that hands out
//! slices of each core type's kernel configuration memory and reclaims them
//! once the device reports that a generation of work has completed.
//!
//! # Design Principles
//!
//! 1. **No HAL dependency**: lanes are built from plain `(base, size)` pairs
//! 2. **No I/O or side effects**: `reserve` is speculative, `alloc` commits
//! 3. **Never blocks**: a required synchronization is reported, not awaited
//! 4. **Checkable**: `check_all_invariants` validates every lane at runtime
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 KernelConfigAllocator                       │
//! │                                                             │
//! │   ┌───────────────┐  ┌───────────────┐  ┌───────────────┐  │
//! │   │ Lane 0        │  │ Lane 1        │  │ Lane K-1      │  │
//! │   │ entries[8]    │  │ entries[8]    │  │ entries[8]    │  │
//! │   │ alloc / free  │  │ alloc / free  │  │ alloc / free  │  │
//! │   │ pending       │  │ pending       │  │ pending       │  │
//! │   └───────────────┘  └───────────────┘  └───────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!          reserve(sizes) ─▶ alloc(token) ─▶ free(released)
//! ```
//!
//! # Module Organization
//!
//! - `types` - `ConfigEntry`, `SyncRequirement`, ring constants
//! - `lane` - One fixed-capacity ring per core type
//! - `allocator` - `KernelConfigAllocator` over all lanes
//! - `invariants` - Runtime invariant assertions

#![no_std]
extern crate alloc;

pub mod allocator;
pub mod invariants;
pub mod lane;
pub mod types;

pub use allocator::KernelConfigAllocator;
pub use invariants::{check_all_invariants, InvariantViolation};
pub use lane::AllocationLane;
pub use types::{
    ConfigEntry, ReleaseToken, SyncRequirement, KERNEL_CONFIG_ENTRY_COUNT, UNSET_RELEASE_TOKEN,
};
