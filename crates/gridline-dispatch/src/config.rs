//! Device session configuration

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Maximum number of hardware command queues per device
pub const MAX_NUM_HW_CQS: u8 = 2;

/// Default staging buffer capacity hint (bytes)
pub const DEFAULT_STAGING_CAPACITY: usize = 128 * 1024;

/// Per-session device configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Number of hardware command queues
    pub num_hw_cqs: u8,
    /// Bytes preallocated for command staging; the buffer still grows past it
    pub staging_capacity: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            num_hw_cqs: 1,
            staging_capacity: DEFAULT_STAGING_CAPACITY,
        }
    }
}

impl DeviceConfig {
    pub fn with_queues(num_hw_cqs: u8) -> Self {
        Self {
            num_hw_cqs,
            ..Self::default()
        }
    }

    /// Check the configuration before a session is built from it
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.num_hw_cqs == 0 {
            return Err(DispatchError::InvalidConfig("num_hw_cqs must be at least 1"));
        }
        if self.num_hw_cqs > MAX_NUM_HW_CQS {
            return Err(DispatchError::InvalidConfig("num_hw_cqs exceeds MAX_NUM_HW_CQS"));
        }
        Ok(())
    }
}
