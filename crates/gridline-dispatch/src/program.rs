//! Launchable programs
//!
//! A program is what the dispatch layer needs to know about a compiled
//! kernel set: its runtime config payload per core type and how many worker
//! cores will report completion. Kernel binaries and argument layouts are
//! produced elsewhere and arrive here as opaque bytes.

use alloc::vec::Vec;

/// Per-launch payload for every core type of the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    id: u32,
    /// Indexed by lane; empty means the core type runs nothing
    kernel_config: Vec<Vec<u8>>,
    num_active_cores: u32,
}

impl Program {
    /// Empty program for a device with `core_type_count` core types
    pub fn new(id: u32, core_type_count: usize) -> Self {
        Self {
            id,
            kernel_config: alloc::vec![Vec::new(); core_type_count],
            num_active_cores: 0,
        }
    }

    /// Set the runtime config payload of the core type at `lane`.
    ///
    /// Panics if `lane` is out of range.
    pub fn with_config(mut self, lane: usize, bytes: &[u8]) -> Self {
        assert!(
            lane < self.kernel_config.len(),
            "program {} has no core type {} ({} core types)",
            self.id,
            lane,
            self.kernel_config.len()
        );
        self.kernel_config[lane] = bytes.to_vec();
        self
    }

    /// Number of cores that signal completion when this program finishes
    pub fn with_active_cores(mut self, count: u32) -> Self {
        self.num_active_cores = count;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn core_type_count(&self) -> usize {
        self.kernel_config.len()
    }

    pub fn num_active_cores(&self) -> u32 {
        self.num_active_cores
    }

    pub fn kernel_config(&self, lane: usize) -> &[u8] {
        &self.kernel_config[lane]
    }

    /// Config bytes to reserve per lane, word aligned
    pub fn config_sizes(&self) -> Vec<u32> {
        self.kernel_config
            .iter()
            .enumerate()
            .map(|(lane, bytes)| config_size(self.id, lane, bytes.len()))
            .collect()
    }
}

/// Word-aligned reservation size for a `len`-byte payload.
///
/// Panics if it does not fit the 32-bit config address space.
fn config_size(program_id: u32, lane: usize, len: usize) -> u32 {
    let size = len
        .checked_next_multiple_of(4)
        .and_then(|size| u32::try_from(size).ok());
    match size {
        Some(size) => size,
        None => panic!(
            "program {} config for core type {} is {} bytes, larger than any config region",
            program_id, lane, len
        ),
    }
}
