//! Captured traces and completion events

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// Caller-chosen trace identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TraceId(pub u32);

/// A command stream recorded in capture mode, replayable without re-issuing
/// the commands that built it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub id: TraceId,
    /// Captured command words, in push order
    pub commands: Vec<u32>,
    /// Worker completions one replay produces
    pub num_completion_worker_cores: u32,
}

impl Trace {
    pub fn word_count(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Handle to a recorded completion event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Queue the event was recorded on
    pub cq_id: u8,
    pub event_id: u32,
}
