//! Dispatch queue
//!
//! Owns the staging buffer, the execute/capture mode switch, per-queue event
//! counters and the kernel config allocator for one device session. Every
//! command reaches the processor (or the capture log) through [`push`].
//!
//! [`push`]: DispatchQueue::push

use alloc::vec::Vec;
use gridline_core::KernelConfigAllocator;
use gridline_hal::{
    CommandProcessor, CoreType, DeviceDescription, HostBufferId, ReadBufferDescriptor,
};

use crate::error::DispatchError;
use crate::metrics::DispatchMetrics;
use crate::staging::CommandStagingBuffer;

/// Where pushed commands go
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// Batches go to the processor. `unclaimed` holds a finished capture
    /// that nobody drained yet.
    Execute { unclaimed: Vec<u32> },
    /// Batches are appended to `log` and never executed
    Capture { log: Vec<u32> },
}

impl Default for DispatchMode {
    fn default() -> Self {
        DispatchMode::Execute {
            unclaimed: Vec::new(),
        }
    }
}

/// Command staging and hand-off for one device session
pub struct DispatchQueue<P: CommandProcessor> {
    processor: P,
    staging: CommandStagingBuffer,
    mode: DispatchMode,
    allocator: KernelConfigAllocator,
    /// Core type of each allocator lane
    core_types: Vec<CoreType>,
    /// Next event id, per hardware queue
    next_event: Vec<u32>,
    metrics: DispatchMetrics,
}

impl<P: CommandProcessor> DispatchQueue<P> {
    /// Build a queue and its allocator from the device description.
    ///
    /// The description is queried once here and never again.
    pub fn new<D: DeviceDescription + ?Sized>(
        processor: P,
        description: &D,
        num_hw_cqs: u8,
        staging_capacity: usize,
    ) -> Result<Self, DispatchError> {
        let count = description.core_type_count();
        if count == 0 {
            return Err(DispatchError::InvalidConfig("device describes no core types"));
        }

        let mut core_types = Vec::with_capacity(count);
        let mut regions = Vec::with_capacity(count);
        for index in 0..count {
            let region = description.kernel_config_region(index);
            if region.end_address().is_none() {
                return Err(DispatchError::InvalidConfig(
                    "kernel config region overflows the address space",
                ));
            }
            core_types.push(description.core_type(index));
            regions.push((region.base_address, region.size));
        }

        Ok(Self {
            processor,
            staging: CommandStagingBuffer::with_capacity(staging_capacity),
            mode: DispatchMode::default(),
            allocator: KernelConfigAllocator::new(&regions),
            core_types,
            next_event: alloc::vec![0; usize::from(num_hw_cqs)],
            metrics: DispatchMetrics::default(),
        })
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn config_allocator(&self) -> &KernelConfigAllocator {
        &self.allocator
    }

    pub fn config_allocator_mut(&mut self) -> &mut KernelConfigAllocator {
        &mut self.allocator
    }

    /// Core type of each allocator lane, in lane order
    pub fn core_types(&self) -> &[CoreType] {
        &self.core_types
    }

    pub fn num_queues(&self) -> u8 {
        self.next_event.len() as u8
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut DispatchMetrics {
        &mut self.metrics
    }

    /// Send a diagnostic line to the processor's log
    pub fn debug(&self, msg: &str) {
        self.processor.debug_write(msg);
    }

    // ========================================================================
    // Staging
    // ========================================================================

    /// Start a new command of `size` bytes and return the writable region.
    pub fn reserve(&mut self, size: usize) -> &mut [u8] {
        self.staging.reserve(size)
    }

    /// Copy `data` into the current command at `offset`.
    ///
    /// Panics if the write runs past the reservation.
    pub fn write(&mut self, data: &[u8], offset: usize) {
        self.staging.write(data, offset);
    }

    /// Publish the first `size` staged bytes and clear the staging buffer.
    ///
    /// In execute mode the bytes go to the processor; in capture mode they
    /// are appended to the capture log as words. Panics if `size` exceeds
    /// the reservation, or is not word aligned while capturing.
    pub fn push(&mut self, size: usize) -> Result<(), DispatchError> {
        let result = match &mut self.mode {
            DispatchMode::Execute { .. } => {
                let bytes = self.staging.staged(size);
                self.processor.run_commands(bytes).map(|()| {
                    self.metrics.commands_pushed += 1;
                    self.metrics.bytes_pushed += size as u64;
                })
            }
            DispatchMode::Capture { log } => {
                assert!(
                    size % 4 == 0,
                    "captured command of {} bytes is not word aligned",
                    size
                );
                let bytes = self.staging.staged(size);
                log.extend(
                    bytes
                        .chunks_exact(4)
                        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]])),
                );
                self.metrics.words_captured += (size / 4) as u64;
                Ok(())
            }
        };
        self.staging.clear();
        result.map_err(DispatchError::from)
    }

    // ========================================================================
    // Processor delegation
    // ========================================================================

    /// Describe an upcoming device-to-host copy to the processor
    pub fn configure_read(
        &mut self,
        page_size: u32,
        dst: HostBufferId,
        dst_offset: u32,
        page_count: u32,
    ) -> Result<(), DispatchError> {
        let desc = ReadBufferDescriptor {
            page_size,
            dst,
            dst_offset,
            page_count,
        };
        self.processor.configure_read_buffer(&desc)?;
        Ok(())
    }

    /// Tell the processor to start the kernels configured so far
    pub fn launch(&mut self) -> Result<(), DispatchError> {
        self.processor.launch_kernels()?;
        self.metrics.launches += 1;
        Ok(())
    }

    // ========================================================================
    // Bypass (capture) mode
    // ========================================================================

    /// Switch between execute and capture mode.
    ///
    /// Leaving capture mode keeps the log until `get_bypass_data` drains it;
    /// re-entering capture mode first appends to that undrained log.
    pub fn set_bypass(&mut self, enabled: bool) {
        let mode = core::mem::take(&mut self.mode);
        self.mode = match (mode, enabled) {
            (DispatchMode::Execute { unclaimed }, true) => DispatchMode::Capture { log: unclaimed },
            (DispatchMode::Capture { log }, false) => DispatchMode::Execute { unclaimed: log },
            (mode, _) => mode,
        };
    }

    pub fn is_bypass_enabled(&self) -> bool {
        matches!(self.mode, DispatchMode::Capture { .. })
    }

    pub fn mode(&self) -> &DispatchMode {
        &self.mode
    }

    /// Take the captured words; a second call returns an empty log.
    pub fn get_bypass_data(&mut self) -> Vec<u32> {
        match &mut self.mode {
            DispatchMode::Execute { unclaimed } => core::mem::take(unclaimed),
            DispatchMode::Capture { log } => core::mem::take(log),
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Return the queue's current event id and advance it
    pub fn next_event(&mut self, cq_id: u8) -> u32 {
        let counter = self.event_counter(cq_id);
        let event_id = *counter;
        *counter += 1;
        event_id
    }

    /// Restart the queue's event ids at zero
    pub fn reset_event(&mut self, cq_id: u8) {
        *self.event_counter(cq_id) = 0;
    }

    fn event_counter(&mut self, cq_id: u8) -> &mut u32 {
        let num_queues = self.next_event.len();
        assert!(
            usize::from(cq_id) < num_queues,
            "event counter for queue {} requested, device has {} queues",
            cq_id,
            num_queues
        );
        &mut self.next_event[usize::from(cq_id)]
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Config address of the last reservation on lane `lane`.
    ///
    /// Panics for idle Ethernet cores, which are never given kernel config.
    pub fn last_slot_address(&self, lane: usize) -> u32 {
        let core_type = self.core_types.get(lane).copied();
        assert!(
            core_type != Some(CoreType::IdleEth),
            "idle ethernet cores have no kernel config slot"
        );
        self.allocator.last_slot_address(lane)
    }
}
