//! Trace capture and replay
//!
//! Capture switches the dispatch queue into bypass mode: program launches
//! still reserve config memory and stage their commands, but the bytes land
//! in the capture log instead of reaching the processor. Both ends of a
//! capture start the allocator from scratch, so a replay sees exactly the
//! config layout that was recorded.

use crate::command::DeviceCommand;
use crate::error::DispatchError;
use crate::trace::{Trace, TraceId};
use gridline_hal::CommandProcessor;

use super::{stage_commands, Device};

impl<P: CommandProcessor> Device<P> {
    /// Start recording commands issued on `cq_id` into trace `trace_id`.
    ///
    /// Everything issued before is drained by a full barrier first. A trace
    /// with the same id is replaced when the capture ends.
    pub fn begin_trace_capture(&mut self, cq_id: u8, trace_id: TraceId) -> Result<(), DispatchError> {
        self.check_queue(cq_id)?;
        if self.capture.is_some() {
            return Err(DispatchError::AlreadyCapturing);
        }

        let barrier = self.barrier();
        stage_commands(&mut self.queue, &[barrier])?;
        self.after_barrier();

        // Leftovers from an undrained capture must not leak into this one.
        let stale = self.queue.get_bypass_data();
        if !stale.is_empty() {
            self.queue.debug(&alloc::format!(
                "[trace] dropping {} undrained capture words",
                stale.len()
            ));
        }
        self.queue.set_bypass(true);
        self.capture = Some((cq_id, trace_id));
        self.queue.debug(&alloc::format!(
            "[trace] begin capture of trace {} on cq {}",
            trace_id.0,
            cq_id
        ));
        Ok(())
    }

    /// Stop recording and store the captured trace.
    pub fn end_trace_capture(&mut self, cq_id: u8) -> Result<TraceId, DispatchError> {
        self.check_queue(cq_id)?;
        let trace_id = match self.capture {
            Some((capturing_cq, trace_id)) if capturing_cq == cq_id => trace_id,
            _ => return Err(DispatchError::NotCapturing),
        };

        self.queue.set_bypass(false);
        let trace = Trace {
            id: trace_id,
            commands: self.queue.get_bypass_data(),
            num_completion_worker_cores: self.expected_workers_completed,
        };
        self.queue.debug(&alloc::format!(
            "[trace] end capture of trace {}: {} words, {} workers",
            trace_id.0,
            trace.word_count(),
            trace.num_completion_worker_cores
        ));
        self.traces.insert(trace_id, trace);
        self.capture = None;

        // Nothing captured ever ran; the device is still at the begin barrier.
        self.queue.config_allocator_mut().reset();
        self.expected_workers_completed = 0;
        Ok(trace_id)
    }

    /// Run a captured trace on `cq_id`.
    ///
    /// The trace reuses config memory from the start of every region, so it
    /// is preceded by a full barrier and the next program launch waits for
    /// all of the trace's workers.
    pub fn replay_trace(&mut self, cq_id: u8, trace_id: TraceId) -> Result<(), DispatchError> {
        self.check_not_capturing(cq_id, "replay trace")?;
        let trace = self
            .traces
            .get(&trace_id)
            .ok_or(DispatchError::TraceNotFound(trace_id))?;

        let barrier = DeviceCommand::Wait {
            count: self.expected_workers_completed,
            clear: true,
        };
        let exec = DeviceCommand::ExecTrace {
            trace_id: trace_id.0,
            words: &trace.commands,
        };
        stage_commands(&mut self.queue, &[barrier, exec])?;

        let workers = trace.num_completion_worker_cores;
        self.after_barrier();
        self.expected_workers_completed = workers;
        if workers > 0 {
            self.trace_fence = Some(workers);
        }
        self.queue.metrics_mut().traces_replayed += 1;
        self.queue.debug(&alloc::format!(
            "[trace] replay trace {} on cq {} ({} workers)",
            trace_id.0,
            cq_id,
            workers
        ));

        self.queue.launch()
    }

    pub fn trace(&self, trace_id: TraceId) -> Option<&Trace> {
        self.traces.get(&trace_id)
    }

    /// Forget a captured trace and hand it back
    pub fn release_trace(&mut self, trace_id: TraceId) -> Result<Trace, DispatchError> {
        self.traces
            .remove(&trace_id)
            .ok_or(DispatchError::TraceNotFound(trace_id))
    }
}
