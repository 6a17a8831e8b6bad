//! Command staging buffer
//!
//! One command (plus inline payload) is assembled here before `push` hands it
//! off. The reservation size is the hard bound for every write.

use alloc::vec::Vec;

/// Growable byte region holding the command currently being assembled.
#[derive(Debug, Default)]
pub struct CommandStagingBuffer {
    bytes: Vec<u8>,
}

impl CommandStagingBuffer {
    /// Create a buffer with `capacity` bytes preallocated
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    /// Replace the current reservation with `size` zeroed bytes.
    pub fn reserve(&mut self, size: usize) -> &mut [u8] {
        self.bytes.clear();
        self.bytes.resize(size, 0);
        &mut self.bytes
    }

    /// Copy `data` into the reservation at `offset`.
    ///
    /// Panics if the write runs past the reservation.
    pub fn write(&mut self, data: &[u8], offset: usize) {
        let end = offset.checked_add(data.len());
        assert!(
            matches!(end, Some(end) if end <= self.bytes.len()),
            "staging write of {} bytes at offset {} overruns {}-byte reservation",
            data.len(),
            offset,
            self.bytes.len()
        );
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    /// First `size` staged bytes.
    ///
    /// Panics if fewer than `size` bytes are reserved.
    pub fn staged(&self, size: usize) -> &[u8] {
        assert!(
            size <= self.bytes.len(),
            "push of {} bytes without a matching reserve ({} bytes staged)",
            size,
            self.bytes.len()
        );
        &self.bytes[..size]
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Size of the current reservation
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
