//! Mock HAL implementation for testing Gridline
//!
//! This provides a recording implementation of [`CommandProcessor`] that can
//! be used for unit testing the dispatch layer without hardware or an
//! emulator behind it.

#![no_std]
extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use gridline_hal::{CommandProcessor, HalError, ReadBufferDescriptor};

/// One call observed by the mock, in submission order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessorCall {
    /// `run_commands` with the submitted bytes
    Run(Vec<u8>),
    /// `configure_read_buffer`
    ConfigureRead(ReadBufferDescriptor),
    /// `launch_kernels`
    Launch,
}

/// Mock command processor for unit testing
///
/// Records every batch, read descriptor and launch, and captures debug
/// output. Failures can be injected for the next `run_commands` call.
pub struct MockProcessor {
    /// Every call in order
    calls: RefCell<Vec<ProcessorCall>>,
    /// Captured debug messages
    debug_log: RefCell<Vec<String>>,
    /// Error returned by the next `run_commands`, if set
    fail_next_run: Cell<Option<HalError>>,
    /// Rejects every `launch_kernels` when set
    reject_launch: Cell<bool>,
}

impl MockProcessor {
    /// Create a new mock processor
    pub fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            debug_log: RefCell::new(Vec::new()),
            fail_next_run: Cell::new(None),
            reject_launch: Cell::new(false),
        }
    }

    /// All observed calls
    pub fn calls(&self) -> Vec<ProcessorCall> {
        self.calls.borrow().clone()
    }

    /// Submitted command batches, oldest first
    pub fn batches(&self) -> Vec<Vec<u8>> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                ProcessorCall::Run(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every submitted byte reassembled as little-endian words
    pub fn submitted_words(&self) -> Vec<u32> {
        let mut words = Vec::new();
        for batch in self.batches() {
            words.extend(
                batch
                    .chunks_exact(4)
                    .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]])),
            );
        }
        words
    }

    /// Number of submitted batches
    pub fn batch_count(&self) -> usize {
        self.batches().len()
    }

    /// Read descriptors received so far
    pub fn read_descriptors(&self) -> Vec<ReadBufferDescriptor> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                ProcessorCall::ConfigureRead(desc) => Some(*desc),
                _ => None,
            })
            .collect()
    }

    /// Number of `launch_kernels` calls
    pub fn launch_count(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, ProcessorCall::Launch))
            .count()
    }

    /// Forget everything recorded so far
    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Make the next `run_commands` fail with `err`
    pub fn fail_next_run(&self, err: HalError) {
        self.fail_next_run.set(Some(err));
    }

    /// Make every `launch_kernels` fail
    pub fn set_reject_launch(&self, reject: bool) {
        self.reject_launch.set(reject);
    }

    /// Get all captured debug messages
    pub fn get_debug_log(&self) -> Vec<String> {
        self.debug_log.borrow().clone()
    }

    /// Clear the debug log
    pub fn clear_debug_log(&self) {
        self.debug_log.borrow_mut().clear();
    }

    /// Check if a specific message was logged
    pub fn has_log_containing(&self, substr: &str) -> bool {
        self.debug_log
            .borrow()
            .iter()
            .any(|msg| msg.contains(substr))
    }
}

impl Default for MockProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandProcessor for MockProcessor {
    fn run_commands(&self, commands: &[u8]) -> Result<(), HalError> {
        if let Some(err) = self.fail_next_run.take() {
            return Err(err);
        }
        self.calls
            .borrow_mut()
            .push(ProcessorCall::Run(commands.to_vec()));
        Ok(())
    }

    fn configure_read_buffer(&self, read: &ReadBufferDescriptor) -> Result<(), HalError> {
        self.calls
            .borrow_mut()
            .push(ProcessorCall::ConfigureRead(*read));
        Ok(())
    }

    fn launch_kernels(&self) -> Result<(), HalError> {
        if self.reject_launch.get() {
            return Err(HalError::NotSupported);
        }
        self.calls.borrow_mut().push(ProcessorCall::Launch);
        Ok(())
    }

    fn debug_write(&self, msg: &str) {
        self.debug_log.borrow_mut().push(String::from(msg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use gridline_hal::HostBufferId;

    #[test]
    fn test_records_calls_in_order() {
        let mock = MockProcessor::new();
        mock.run_commands(&[1, 0, 0, 0]).unwrap();
        let desc = ReadBufferDescriptor {
            page_size: 64,
            dst: HostBufferId(3),
            dst_offset: 0,
            page_count: 2,
        };
        mock.configure_read_buffer(&desc).unwrap();
        mock.launch_kernels().unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                ProcessorCall::Run(vec![1, 0, 0, 0]),
                ProcessorCall::ConfigureRead(desc),
                ProcessorCall::Launch,
            ]
        );
        assert_eq!(mock.submitted_words(), vec![1]);
    }

    #[test]
    fn test_fail_next_run_is_one_shot() {
        let mock = MockProcessor::new();
        mock.fail_next_run(HalError::CommandRejected);
        assert_eq!(mock.run_commands(&[0; 4]), Err(HalError::CommandRejected));
        assert!(mock.run_commands(&[0; 4]).is_ok());
        assert_eq!(mock.batch_count(), 1);
    }

    #[test]
    fn test_debug_log_capture() {
        let mock = MockProcessor::new();
        mock.debug_write("[dispatch] hello");
        assert!(mock.has_log_containing("hello"));
        mock.clear_debug_log();
        assert!(mock.get_debug_log().is_empty());
    }
}
