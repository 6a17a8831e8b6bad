//! Gridline Dispatch
//!
//! Runtime half of the control plane. Wraps the pure allocator from
//! `gridline-core` with everything that talks to a [`CommandProcessor`]:
//!
//! - Command staging and the single publish point (`push`)
//! - Execute/capture mode switch with one-shot drain of the capture log
//! - Per-queue event ids
//! - Program launch: config reservation, sync waits, release tokens
//! - Trace capture and replay
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          DEVICE                             │
//! │   expected workers, trace fence, captured traces            │
//! │                              │                              │
//! │                              ▼                              │
//! │   ┌───────────────────────────────────────────────────┐     │
//! │   │                  DISPATCH QUEUE                   │     │
//! │   │   staging buffer ── push ──▶ processor | capture  │     │
//! │   │   event counters                                  │     │
//! │   │   KernelConfigAllocator (gridline-core)           │     │
//! │   └───────────────────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Single-threaded per device: callers that share a device across threads
//! serialise access themselves.
//!
//! [`CommandProcessor`]: gridline_hal::CommandProcessor

#![no_std]
extern crate alloc;

pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod metrics;
pub mod program;
pub mod queue;
pub mod staging;
pub mod trace;

pub use command::{decode_commands, DecodedCommand, DeviceCommand, Opcode};
pub use config::{DeviceConfig, MAX_NUM_HW_CQS};
pub use device::Device;
pub use error::{DecodeError, DispatchError};
pub use metrics::DispatchMetrics;
pub use program::Program;
pub use queue::{DispatchMode, DispatchQueue};
pub use staging::CommandStagingBuffer;
pub use trace::{Event, Trace, TraceId};

// Re-export the collaborator types callers need alongside a Device
pub use gridline_core::{ConfigEntry, KernelConfigAllocator, SyncRequirement};
pub use gridline_hal::{CommandProcessor, CoreType, DeviceDescription, HalError};
