//! Dispatch counters

use serde::{Deserialize, Serialize};

/// Running totals for one device session
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMetrics {
    /// Batches handed to the processor
    pub commands_pushed: u64,
    /// Bytes handed to the processor
    pub bytes_pushed: u64,
    /// Words appended to the capture log
    pub words_captured: u64,
    /// Reservations that had to wait for an earlier generation
    pub sync_points: u64,
    /// `launch_kernels` calls forwarded
    pub launches: u64,
    /// Trace replays issued
    pub traces_replayed: u64,
}
