//! Hardware Abstraction Layer traits for Gridline
//!
//! This crate defines the two collaborators the dispatch control plane talks
//! to without knowing what sits behind them:
//!
//! - [`DeviceDescription`]: read-only description of the device, queried once
//!   per session to lay out kernel configuration memory per core type.
//! - [`CommandProcessor`]: the downstream processor that executes byte-encoded
//!   command batches, accepts read-back descriptors and launches kernels.
//!
//! # Platform Implementations
//!
//! - **Hardware**: command batches are copied into the device's issue queue
//! - **Emulator**: an instruction-accurate core model consumes the batches
//! - **Recorder**: batches are kept for inspection (see `gridline-hal-mock`)

#![no_std]

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Class of programmable core with its own kernel configuration region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CoreType {
    /// Compute (worker) cores
    Worker = 0,
    /// Ethernet cores that are connected to a peer chip
    ActiveEth = 1,
    /// Ethernet cores with no link, only usable for local work
    IdleEth = 2,
}

impl CoreType {
    /// Convert from u8
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CoreType::Worker),
            1 => Some(CoreType::ActiveEth),
            2 => Some(CoreType::IdleEth),
            _ => None,
        }
    }

    /// Short lowercase name used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            CoreType::Worker => "worker",
            CoreType::ActiveEth => "active_eth",
            CoreType::IdleEth => "idle_eth",
        }
    }
}

/// Kernel configuration memory region of one core type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRegion {
    /// First usable device address
    pub base_address: u32,
    /// Region size in bytes
    pub size: u32,
}

impl ConfigRegion {
    pub fn new(base_address: u32, size: u32) -> Self {
        Self { base_address, size }
    }

    /// One past the last usable address, if it fits in 32 bits
    pub fn end_address(&self) -> Option<u32> {
        self.base_address.checked_add(self.size)
    }
}

/// Read-only description of the device, queried once per session.
pub trait DeviceDescription {
    /// Number of programmable core types (one allocation lane each)
    fn core_type_count(&self) -> usize;

    /// Core type at `index` (`0..core_type_count()`)
    fn core_type(&self, index: usize) -> CoreType;

    /// Kernel configuration region of the core type at `index`
    fn kernel_config_region(&self, index: usize) -> ConfigRegion;
}

/// Opaque handle naming a host-side destination for device read-back.
///
/// The processor resolves it to real memory; the control plane never
/// dereferences it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostBufferId(pub u64);

/// Describes an upcoming device-to-host copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadBufferDescriptor {
    /// Size of one (padded) page in bytes
    pub page_size: u32,
    /// Host destination
    pub dst: HostBufferId,
    /// Byte offset into the destination
    pub dst_offset: u32,
    /// Number of pages that will be read
    pub page_count: u32,
}

/// Downstream processor interface
///
/// Implementations execute command batches strictly in submission order.
/// All methods take `&self`; implementations that record state use interior
/// mutability, as the control plane is driven from a single thread per queue.
pub trait CommandProcessor {
    /// Execute a batch of encoded device commands
    ///
    /// # Arguments
    /// * `commands` - Little-endian encoded command words
    ///
    /// # Returns
    /// * `Ok(())` - Batch accepted
    /// * `Err(HalError::CommandRejected)` - Batch could not be executed
    fn run_commands(&self, commands: &[u8]) -> Result<(), HalError>;

    /// Announce an upcoming device-to-host copy
    ///
    /// # Returns
    /// * `Ok(())` - Descriptor accepted
    /// * `Err(HalError::InvalidArgument)` - Destination unknown to the processor
    fn configure_read_buffer(&self, read: &ReadBufferDescriptor) -> Result<(), HalError>;

    /// Begin executing the kernels configured so far
    fn launch_kernels(&self) -> Result<(), HalError>;

    /// Write a debug message to the platform's log
    fn debug_write(&self, _msg: &str) {
        // Default: drop diagnostics
    }
}

/// HAL errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HalError {
    /// Operation not supported on this platform
    NotSupported,
    /// Invalid argument
    InvalidArgument,
    /// The processor refused a command batch
    CommandRejected,
    /// I/O error
    IoError,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalError::NotSupported => write!(f, "Operation not supported"),
            HalError::InvalidArgument => write!(f, "Invalid argument"),
            HalError::CommandRejected => write!(f, "Command batch rejected"),
            HalError::IoError => write!(f, "I/O error"),
        }
    }
}

/// Table-driven device description.
///
/// Lists `(core type, region)` pairs in lane order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocDescriptor {
    cores: Vec<(CoreType, ConfigRegion)>,
}

impl SocDescriptor {
    pub fn new() -> Self {
        Self { cores: Vec::new() }
    }

    /// Append a core type; its lane index is the current count
    pub fn with_core(mut self, core_type: CoreType, region: ConfigRegion) -> Self {
        self.cores.push((core_type, region));
        self
    }

    /// Worker cores plus active Ethernet cores, laid out like a two-lane part
    pub fn two_lane() -> Self {
        Self::new()
            .with_core(CoreType::Worker, ConfigRegion::new(0x0000_4000, 0x0000_8000))
            .with_core(CoreType::ActiveEth, ConfigRegion::new(0x0003_0000, 0x0000_2000))
    }
}

impl DeviceDescription for SocDescriptor {
    fn core_type_count(&self) -> usize {
        self.cores.len()
    }

    fn core_type(&self, index: usize) -> CoreType {
        self.cores[index].0
    }

    fn kernel_config_region(&self, index: usize) -> ConfigRegion {
        self.cores[index].1
    }
}

/// A minimal processor that accepts and discards everything.
#[derive(Default)]
pub struct TestHal;

impl TestHal {
    pub fn new() -> Self {
        Self
    }
}

impl CommandProcessor for TestHal {
    fn run_commands(&self, _commands: &[u8]) -> Result<(), HalError> {
        Ok(())
    }

    fn configure_read_buffer(&self, _read: &ReadBufferDescriptor) -> Result<(), HalError> {
        Ok(())
    }

    fn launch_kernels(&self) -> Result<(), HalError> {
        Ok(())
    }

    fn debug_write(&self, _msg: &str) {
        // No-op for tests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_type_roundtrip() {
        for ct in [CoreType::Worker, CoreType::ActiveEth, CoreType::IdleEth] {
            assert_eq!(CoreType::from_u8(ct as u8), Some(ct));
        }
        assert_eq!(CoreType::from_u8(7), None);
    }

    #[test]
    fn test_region_end_overflow() {
        assert_eq!(ConfigRegion::new(0x100, 0x100).end_address(), Some(0x200));
        assert_eq!(ConfigRegion::new(u32::MAX, 2).end_address(), None);
    }

    #[test]
    fn test_soc_descriptor_lane_order() {
        let soc = SocDescriptor::two_lane();
        assert_eq!(soc.core_type_count(), 2);
        assert_eq!(soc.core_type(0), CoreType::Worker);
        assert_eq!(soc.core_type(1), CoreType::ActiveEth);
        assert_eq!(soc.kernel_config_region(1).base_address, 0x0003_0000);
    }

    #[test]
    fn test_hal_error_display() {
        assert_eq!(alloc::format!("{}", HalError::CommandRejected), "Command batch rejected");
    }
}
