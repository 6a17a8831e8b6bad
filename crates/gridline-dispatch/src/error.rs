//! Error Types for Gridline Dispatch
//!
//! Recoverable failures only. Broken preconditions (staging overruns, lane
//! count mismatches at the allocator, oversized config requests) panic.

use core::fmt;
use gridline_hal::HalError;

use crate::trace::TraceId;

/// Errors returned by the dispatch layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchError {
    /// The downstream processor refused an operation
    Hal(HalError),

    /// Hardware command queue id out of range
    InvalidQueue { cq_id: u8, num_queues: u8 },

    /// Operation cannot be recorded into a trace
    NotAllowedWhileCapturing(&'static str),

    /// `begin_trace_capture` while a capture is open
    AlreadyCapturing,

    /// `end_trace_capture` without an open capture on that queue
    NotCapturing,

    /// No captured trace with this id
    TraceNotFound(TraceId),

    /// Device configuration rejected
    InvalidConfig(&'static str),

    /// Program describes a different number of core types than the device
    CoreTypeCountMismatch { expected: usize, got: usize },

    /// Worker completion count would pass `u32::MAX` before the next barrier
    CompletionCountOverflow,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Hal(e) => write!(f, "Processor error: {}", e),
            DispatchError::InvalidQueue { cq_id, num_queues } => {
                write!(f, "Invalid command queue {} (device has {})", cq_id, num_queues)
            }
            DispatchError::NotAllowedWhileCapturing(op) => {
                write!(f, "{} is not allowed while capturing a trace", op)
            }
            DispatchError::AlreadyCapturing => write!(f, "A trace capture is already open"),
            DispatchError::NotCapturing => write!(f, "No trace capture is open on this queue"),
            DispatchError::TraceNotFound(id) => write!(f, "Trace {} not found", id.0),
            DispatchError::InvalidConfig(msg) => write!(f, "Invalid device config: {}", msg),
            DispatchError::CoreTypeCountMismatch { expected, got } => write!(
                f,
                "Program has config for {} core types, device has {}",
                got, expected
            ),
            DispatchError::CompletionCountOverflow => {
                write!(f, "Worker completion count overflows before the next barrier")
            }
        }
    }
}

impl From<HalError> for DispatchError {
    fn from(e: HalError) -> Self {
        DispatchError::Hal(e)
    }
}

/// Errors that can occur while decoding a command stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Header or payload runs past the end of the stream
    Truncated { offset: usize },

    /// Opcode word not recognised
    UnknownOpcode(u32),

    /// Payload shorter than its opcode requires
    PayloadTooShort { opcode: u32, words: usize },

    /// Core type field out of range
    InvalidCoreType(u32),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { offset } => {
                write!(f, "Command stream truncated at word {}", offset)
            }
            DecodeError::UnknownOpcode(op) => write!(f, "Unknown opcode {:#x}", op),
            DecodeError::PayloadTooShort { opcode, words } => {
                write!(f, "Opcode {:#x} payload too short ({} words)", opcode, words)
            }
            DecodeError::InvalidCoreType(v) => write!(f, "Invalid core type {}", v),
        }
    }
}
