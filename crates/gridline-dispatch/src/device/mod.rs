//! Device - launch coordination on top of the dispatch queue.
//!
//! Turns high-level requests (launch a program, copy a buffer, record an
//! event, capture or replay a trace) into device command batches, and keeps
//! the kernel config allocator in step with what the device has completed.
//!
//! # Release tokens
//!
//! The device counts completed workers. Every program launch adds its active
//! core count to `expected_workers_completed`, and that running total is the
//! release token its config slots are committed with. A full barrier
//! (`Wait { clear: true }`) zeroes the device counter, so the allocator is
//! reset alongside it.
//!
//! ```text
//! enqueue_program
//!   │
//!   ├─ reserve(config sizes) ──▶ needs_sync? ──▶ Wait{token}
//!   ├─ WriteConfig per core type, Go
//!   ├─ push ──▶ processor (or capture log)
//!   ├─ free(token), alloc(expected + active cores)   (only once pushed)
//!   └─ launch (execute mode only)
//! ```

mod trace;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use gridline_hal::{CommandProcessor, DeviceDescription, ReadBufferDescriptor};

use crate::command::{batch_size, DeviceCommand};
use crate::config::DeviceConfig;
use crate::error::DispatchError;
use crate::metrics::DispatchMetrics;
use crate::program::Program;
use crate::queue::DispatchQueue;
use crate::trace::{Event, Trace, TraceId};

/// One device session: a dispatch queue plus per-queue bookkeeping.
pub struct Device<P: CommandProcessor> {
    queue: DispatchQueue<P>,
    config: DeviceConfig,
    /// Running worker completion count the device will reach
    expected_workers_completed: u32,
    /// Completion count a replayed trace must reach before its config
    /// memory may be reused
    trace_fence: Option<u32>,
    /// Open capture: queue and trace id
    capture: Option<(u8, TraceId)>,
    traces: BTreeMap<TraceId, Trace>,
}

impl<P: CommandProcessor> Device<P> {
    /// Open a session. The description is queried once, here.
    pub fn new<D: DeviceDescription + ?Sized>(
        processor: P,
        description: &D,
        config: DeviceConfig,
    ) -> Result<Self, DispatchError> {
        config.validate()?;
        let queue =
            DispatchQueue::new(processor, description, config.num_hw_cqs, config.staging_capacity)?;
        queue.debug(&alloc::format!(
            "[dispatch] device open: {} hw cqs, {} core types",
            config.num_hw_cqs,
            queue.core_types().len()
        ));
        Ok(Self {
            queue,
            config,
            expected_workers_completed: 0,
            trace_fence: None,
            capture: None,
            traces: BTreeMap::new(),
        })
    }

    pub fn processor(&self) -> &P {
        self.queue.processor()
    }

    pub fn queue(&self) -> &DispatchQueue<P> {
        &self.queue
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        self.queue.metrics()
    }

    /// Worker completions the device will have reported once all issued
    /// work is done
    pub fn expected_workers_completed(&self) -> u32 {
        self.expected_workers_completed
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    fn check_queue(&self, cq_id: u8) -> Result<(), DispatchError> {
        if cq_id >= self.config.num_hw_cqs {
            return Err(DispatchError::InvalidQueue {
                cq_id,
                num_queues: self.config.num_hw_cqs,
            });
        }
        Ok(())
    }

    /// Queue check plus refusal of work that cannot go into a trace
    fn check_not_capturing(&self, cq_id: u8, op: &'static str) -> Result<(), DispatchError> {
        self.check_queue(cq_id)?;
        if self.capture.is_some() {
            return Err(DispatchError::NotAllowedWhileCapturing(op));
        }
        Ok(())
    }

    // ========================================================================
    // Programs
    // ========================================================================

    /// Reserve config memory for `program`, write its config and start it.
    pub fn enqueue_program(&mut self, cq_id: u8, program: &Program) -> Result<(), DispatchError> {
        self.check_queue(cq_id)?;
        if let Some((capturing_cq, _)) = self.capture {
            if capturing_cq != cq_id {
                return Err(DispatchError::NotAllowedWhileCapturing(
                    "program on a queue that is not capturing",
                ));
            }
        }
        let lane_count = self.queue.config_allocator().lane_count();
        if program.core_type_count() != lane_count {
            return Err(DispatchError::CoreTypeCountMismatch {
                expected: lane_count,
                got: program.core_type_count(),
            });
        }

        let expected = self
            .expected_workers_completed
            .checked_add(program.num_active_cores())
            .ok_or(DispatchError::CompletionCountOverflow)?;

        // Nothing below touches committed allocator state until the batch
        // carrying the waits has been accepted.
        let fence = self.trace_fence;
        let (sync, entries) = self.queue.config_allocator_mut().reserve(&program.config_sizes());

        let config_bases: Vec<u32> = entries.iter().map(|e| e.address).collect();
        let mut commands = Vec::with_capacity(entries.len() + 3);
        if let Some(count) = fence {
            commands.push(DeviceCommand::Wait {
                count,
                clear: false,
            });
        }
        if sync.needs_sync {
            commands.push(DeviceCommand::Wait {
                count: sync.release_token,
                clear: false,
            });
        }
        for (lane, entry) in entries.iter().enumerate() {
            if entry.size == 0 {
                continue;
            }
            commands.push(DeviceCommand::WriteConfig {
                core_type: self.queue.core_types()[lane],
                address: entry.address,
                bytes: program.kernel_config(lane),
            });
        }
        commands.push(DeviceCommand::Go {
            program_id: program.id(),
            config_bases: &config_bases,
        });

        stage_commands(&mut self.queue, &commands)?;

        self.trace_fence = None;
        if sync.needs_sync {
            // Commands behind the wait only run once the device got there.
            self.queue.config_allocator_mut().free(sync.release_token);
            self.queue.metrics_mut().sync_points += 1;
            self.queue.debug(&alloc::format!(
                "[kca] program {} waits for {} workers",
                program.id(),
                sync.release_token
            ));
        }
        self.expected_workers_completed = expected;
        self.queue.config_allocator_mut().alloc(expected);

        if self.capture.is_none() {
            self.queue.launch()?;
        }
        Ok(())
    }

    /// Out-of-band completion report: `count` workers have finished since the
    /// last barrier. Returns the number of config slots reclaimed.
    pub fn notify_workers_completed(&mut self, count: u32) -> usize {
        if matches!(self.trace_fence, Some(fence) if count >= fence) {
            self.trace_fence = None;
        }
        self.queue.config_allocator_mut().free(count)
    }

    // ========================================================================
    // Buffers
    // ========================================================================

    /// Copy `data` to device memory at `address`
    pub fn enqueue_write_buffer(
        &mut self,
        cq_id: u8,
        address: u32,
        data: &[u8],
    ) -> Result<(), DispatchError> {
        self.check_not_capturing(cq_id, "write buffer")?;
        stage_commands(
            &mut self.queue,
            &[DeviceCommand::WriteLinear {
                address,
                bytes: data,
            }],
        )
    }

    /// Copy `read.page_count` pages from `address` into the host buffer
    pub fn enqueue_read_buffer(
        &mut self,
        cq_id: u8,
        address: u32,
        read: &ReadBufferDescriptor,
    ) -> Result<(), DispatchError> {
        self.check_not_capturing(cq_id, "read buffer")?;
        self.queue
            .configure_read(read.page_size, read.dst, read.dst_offset, read.page_count)?;
        stage_commands(
            &mut self.queue,
            &[DeviceCommand::ReadLinear {
                address,
                page_size: read.page_size,
                page_count: read.page_count,
            }],
        )
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Record a completion event on `cq_id`.
    ///
    /// With `clear_count` the event is preceded by a full barrier that zeroes
    /// the device's worker counter, and the allocator starts over.
    pub fn enqueue_record_event(
        &mut self,
        cq_id: u8,
        clear_count: bool,
    ) -> Result<Event, DispatchError> {
        self.check_not_capturing(cq_id, "record event")?;
        let event_id = self.queue.next_event(cq_id);

        let mut commands = Vec::with_capacity(2);
        if clear_count {
            commands.push(self.barrier());
        }
        commands.push(DeviceCommand::RecordEvent { cq_id, event_id });
        stage_commands(&mut self.queue, &commands)?;

        if clear_count {
            self.after_barrier();
        }
        Ok(Event { cq_id, event_id })
    }

    /// Order `cq_id` behind `event`.
    ///
    /// Events complete in issue order on their own queue, so no command is
    /// needed; `clear_count` restarts the event's queue numbering.
    pub fn enqueue_wait_for_event(
        &mut self,
        cq_id: u8,
        event: &Event,
        clear_count: bool,
    ) -> Result<(), DispatchError> {
        self.check_queue(cq_id)?;
        self.check_queue(event.cq_id)?;
        if clear_count {
            self.queue.reset_event(event.cq_id);
            self.queue.debug(&alloc::format!(
                "[dispatch] cq {} event ids reset after event {}",
                event.cq_id,
                event.event_id
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Queue lifecycle
    // ========================================================================

    /// Block point for callers; all work is already with the processor.
    pub fn finish(&mut self, cq_id: u8) -> Result<(), DispatchError> {
        self.check_queue(cq_id)?;
        self.queue.debug(&alloc::format!(
            "[dispatch] finish cq {} (expecting {} workers)",
            cq_id,
            self.expected_workers_completed
        ));
        Ok(())
    }

    /// Stop the queue's dispatcher
    pub fn terminate(&mut self, cq_id: u8) -> Result<(), DispatchError> {
        self.check_not_capturing(cq_id, "terminate")?;
        stage_commands(&mut self.queue, &[DeviceCommand::Terminate])?;
        self.queue
            .debug(&alloc::format!("[dispatch] terminate cq {}", cq_id));
        Ok(())
    }

    // ========================================================================
    // Barriers
    // ========================================================================

    /// Wait for everything issued so far, then zero the device counter
    fn barrier(&self) -> DeviceCommand<'static> {
        DeviceCommand::Wait {
            count: self.expected_workers_completed,
            clear: true,
        }
    }

    /// Host-side half of a barrier: nothing is in flight any more
    fn after_barrier(&mut self) {
        self.queue.config_allocator_mut().reset();
        self.expected_workers_completed = 0;
        self.trace_fence = None;
        self.queue.debug("[kca] allocator reset at barrier");
    }
}

/// Encode `commands` into one staged batch and push it.
fn stage_commands<P: CommandProcessor>(
    queue: &mut DispatchQueue<P>,
    commands: &[DeviceCommand<'_>],
) -> Result<(), DispatchError> {
    let size = batch_size(commands);
    queue.reserve(size);
    let mut offset = 0;
    for command in commands {
        let encoded = command.encode();
        queue.write(&encoded, offset);
        offset += encoded.len();
    }
    queue.push(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{bytes_to_words, decode_commands, DecodedCommand};
    use alloc::vec;
    use gridline_core::check_all_invariants;
    use gridline_hal::{ConfigRegion, CoreType, HalError, HostBufferId, SocDescriptor};
    use gridline_hal_mock::MockProcessor;

    fn device() -> Device<MockProcessor> {
        Device::new(
            MockProcessor::new(),
            &SocDescriptor::two_lane(),
            DeviceConfig::with_queues(2),
        )
        .unwrap()
    }

    fn last_batch(dev: &Device<MockProcessor>) -> Vec<DecodedCommand> {
        let batches = dev.processor().batches();
        let last = batches.last().unwrap();
        decode_commands(&bytes_to_words(last)).unwrap()
    }

    #[test]
    fn test_program_writes_config_then_go() {
        let mut dev = device();
        let program = Program::new(3, 2)
            .with_config(0, &[1, 2, 3, 4, 5, 6])
            .with_active_cores(4);
        dev.enqueue_program(0, &program).unwrap();

        assert_eq!(
            last_batch(&dev),
            vec![
                DecodedCommand::WriteConfig {
                    core_type: CoreType::Worker,
                    address: 0x4000,
                    bytes: vec![1, 2, 3, 4, 5, 6],
                },
                DecodedCommand::Go {
                    program_id: 3,
                    config_bases: vec![0x4000, 0x0003_0000],
                },
            ]
        );
        assert_eq!(dev.processor().launch_count(), 1);
        assert_eq!(dev.expected_workers_completed(), 4);
        assert_eq!(dev.queue().last_slot_address(0), 0x4000);
        // Committed with the running completion count.
        assert_eq!(dev.queue().config_allocator().lane(0).entry(0).release_token, 4);
    }

    #[test]
    fn test_program_core_type_mismatch() {
        let mut dev = device();
        assert_eq!(
            dev.enqueue_program(0, &Program::new(1, 3)),
            Err(DispatchError::CoreTypeCountMismatch {
                expected: 2,
                got: 3
            })
        );
        assert_eq!(dev.processor().batch_count(), 0);
    }

    #[test]
    fn test_invalid_queue() {
        let mut dev = device();
        assert_eq!(
            dev.finish(2),
            Err(DispatchError::InvalidQueue {
                cq_id: 2,
                num_queues: 2
            })
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dev = Device::new(
            MockProcessor::new(),
            &SocDescriptor::two_lane(),
            DeviceConfig::with_queues(0),
        );
        assert!(matches!(dev, Err(DispatchError::InvalidConfig(_))));
    }

    #[test]
    fn test_write_and_read_buffer() {
        let mut dev = device();
        dev.enqueue_write_buffer(1, 0x1_0000, &[7; 6]).unwrap();
        assert_eq!(
            last_batch(&dev),
            vec![DecodedCommand::WriteLinear {
                address: 0x1_0000,
                bytes: vec![7; 6],
            }]
        );

        let read = ReadBufferDescriptor {
            page_size: 1024,
            dst: HostBufferId(1),
            dst_offset: 0,
            page_count: 2,
        };
        dev.enqueue_read_buffer(1, 0x1_0000, &read).unwrap();
        assert_eq!(dev.processor().read_descriptors(), vec![read]);
        assert_eq!(
            last_batch(&dev),
            vec![DecodedCommand::ReadLinear {
                address: 0x1_0000,
                page_size: 1024,
                page_count: 2,
            }]
        );
    }

    #[test]
    fn test_record_event_with_clear_resets_allocator() {
        let mut dev = device();
        let program = Program::new(1, 2).with_config(0, &[0; 16]).with_active_cores(2);
        dev.enqueue_program(0, &program).unwrap();

        let first = dev.enqueue_record_event(0, false).unwrap();
        let second = dev.enqueue_record_event(0, true).unwrap();
        assert_eq!(first.event_id, 0);
        assert_eq!(second.event_id, 1);
        assert_eq!(
            last_batch(&dev),
            vec![
                DecodedCommand::Wait {
                    count: 2,
                    clear: true
                },
                DecodedCommand::RecordEvent {
                    cq_id: 0,
                    event_id: 1
                },
            ]
        );
        assert_eq!(dev.expected_workers_completed(), 0);
        assert!(dev.queue().config_allocator().is_idle());
        assert!(dev.processor().has_log_containing("[kca] allocator reset"));
    }

    #[test]
    fn test_wait_for_event_clear_resets_event_ids() {
        let mut dev = device();
        let event = dev.enqueue_record_event(1, false).unwrap();
        dev.enqueue_record_event(1, false).unwrap();
        dev.enqueue_wait_for_event(0, &event, true).unwrap();
        assert_eq!(dev.enqueue_record_event(1, false).unwrap().event_id, 0);
    }

    #[test]
    fn test_notify_reclaims_slots() {
        let mut dev = device();
        let program = Program::new(1, 2).with_config(0, &[0; 8]).with_active_cores(1);
        dev.enqueue_program(0, &program).unwrap();
        dev.enqueue_program(0, &program).unwrap();

        // Both lanes hold a slot per launch, the empty one included.
        assert_eq!(dev.notify_workers_completed(1), 2);
        assert_eq!(dev.notify_workers_completed(1), 0);
        assert_eq!(dev.notify_workers_completed(2), 2);
        assert!(dev.queue().config_allocator().is_idle());
    }

    #[test]
    fn test_terminate() {
        let mut dev = device();
        dev.terminate(0).unwrap();
        assert_eq!(last_batch(&dev), vec![DecodedCommand::Terminate]);
        assert!(dev.processor().has_log_containing("terminate cq 0"));
    }

    #[test]
    fn test_rejected_sync_batch_keeps_slots_live() {
        let soc = SocDescriptor::new().with_core(CoreType::Worker, ConfigRegion::new(0, 1000));
        let mut dev = Device::new(MockProcessor::new(), &soc, DeviceConfig::default()).unwrap();
        for id in 1..=3 {
            let program = Program::new(id, 1).with_config(0, &[0; 300]).with_active_cores(1);
            dev.enqueue_program(0, &program).unwrap();
        }

        // Placing 500 bytes needs program 2 done; the batch with that wait is refused.
        let big = Program::new(4, 1).with_config(0, &[0; 500]).with_active_cores(1);
        dev.processor().fail_next_run(HalError::CommandRejected);
        assert_eq!(
            dev.enqueue_program(0, &big),
            Err(DispatchError::Hal(HalError::CommandRejected))
        );
        assert_eq!(dev.queue().config_allocator().lane(0).in_flight(), 3);
        assert_eq!(dev.expected_workers_completed(), 3);
        assert_eq!(dev.metrics().sync_points, 0);

        // The next program must not land in [300, 600) while program 2 runs.
        let small = Program::new(5, 1).with_config(0, &[0; 100]).with_active_cores(1);
        dev.enqueue_program(0, &small).unwrap();
        let cmds = last_batch(&dev);
        assert!(matches!(
            cmds[0],
            DecodedCommand::WriteConfig { address: 900, .. }
        ));
        assert!(check_all_invariants(dev.queue().config_allocator()).is_empty());

        // Retrying the large program still waits before reusing the base.
        dev.enqueue_program(0, &big).unwrap();
        let cmds = last_batch(&dev);
        assert_eq!(
            cmds[0],
            DecodedCommand::Wait {
                count: 2,
                clear: false
            }
        );
        assert!(matches!(cmds[1], DecodedCommand::WriteConfig { address: 0, .. }));
    }

    #[test]
    fn test_completion_count_overflow_is_an_error() {
        let mut dev = device();
        let program = Program::new(1, 2).with_config(0, &[0; 4]).with_active_cores(u32::MAX);
        dev.enqueue_program(0, &program).unwrap();
        let batches = dev.processor().batch_count();

        assert_eq!(
            dev.enqueue_program(0, &program.clone().with_active_cores(1)),
            Err(DispatchError::CompletionCountOverflow)
        );
        assert_eq!(dev.processor().batch_count(), batches);
        assert_eq!(dev.expected_workers_completed(), u32::MAX);

        // A clearing barrier starts the count over.
        dev.enqueue_record_event(0, true).unwrap();
        dev.enqueue_program(0, &program.with_active_cores(1)).unwrap();
        assert_eq!(dev.expected_workers_completed(), 1);
    }

    #[test]
    fn test_launch_failure_propagates() {
        let mut dev = device();
        dev.processor().set_reject_launch(true);
        let program = Program::new(1, 2).with_config(0, &[0; 4]);
        assert_eq!(
            dev.enqueue_program(0, &program),
            Err(DispatchError::Hal(HalError::NotSupported))
        );
        // The batch itself went out before the launch was refused.
        assert_eq!(dev.processor().batch_count(), 1);
    }
}
