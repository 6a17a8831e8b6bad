//! Device command encoding
//!
//! Commands are little-endian 32-bit words:
//!
//! ```text
//! ┌──────────┬────────────────────┬───────────────────────────┐
//! │ opcode   │ payload_word_count │ payload[payload_word_count]│
//! └──────────┴────────────────────┴───────────────────────────┘
//! ```
//!
//! Byte payloads are prefixed with their byte length and zero-padded to a
//! whole word. Only the fields the dispatch layer needs are modelled; the
//! processor owns everything past the header.

use alloc::vec::Vec;
use gridline_hal::CoreType;

use crate::error::DecodeError;

/// Command opcodes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    Wait = 0x01,
    WriteConfig = 0x02,
    Go = 0x03,
    WriteLinear = 0x04,
    ReadLinear = 0x05,
    RecordEvent = 0x06,
    ExecTrace = 0x07,
    Terminate = 0x08,
}

impl Opcode {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0x01 => Some(Opcode::Wait),
            0x02 => Some(Opcode::WriteConfig),
            0x03 => Some(Opcode::Go),
            0x04 => Some(Opcode::WriteLinear),
            0x05 => Some(Opcode::ReadLinear),
            0x06 => Some(Opcode::RecordEvent),
            0x07 => Some(Opcode::ExecTrace),
            0x08 => Some(Opcode::Terminate),
            _ => None,
        }
    }
}

/// Header words in front of every payload
pub const HEADER_WORDS: usize = 2;

/// A command ready to be encoded into the staging buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceCommand<'a> {
    /// Stall until `count` workers reported completion; `clear` zeroes the
    /// device-side counter afterwards
    Wait { count: u32, clear: bool },
    /// Copy kernel runtime config into one core type's config region
    WriteConfig {
        core_type: CoreType,
        address: u32,
        bytes: &'a [u8],
    },
    /// Start a program using the given per-core-type config bases
    Go {
        program_id: u32,
        config_bases: &'a [u32],
    },
    /// Host to device copy
    WriteLinear { address: u32, bytes: &'a [u8] },
    /// Device to host copy, landing in the last configured read buffer
    ReadLinear {
        address: u32,
        page_size: u32,
        page_count: u32,
    },
    /// Write `event_id` to the queue's completion record
    RecordEvent { cq_id: u8, event_id: u32 },
    /// Execute a previously captured command stream
    ExecTrace { trace_id: u32, words: &'a [u32] },
    /// Stop the queue's dispatcher
    Terminate,
}

impl<'a> DeviceCommand<'a> {
    pub fn opcode(&self) -> Opcode {
        match self {
            DeviceCommand::Wait { .. } => Opcode::Wait,
            DeviceCommand::WriteConfig { .. } => Opcode::WriteConfig,
            DeviceCommand::Go { .. } => Opcode::Go,
            DeviceCommand::WriteLinear { .. } => Opcode::WriteLinear,
            DeviceCommand::ReadLinear { .. } => Opcode::ReadLinear,
            DeviceCommand::RecordEvent { .. } => Opcode::RecordEvent,
            DeviceCommand::ExecTrace { .. } => Opcode::ExecTrace,
            DeviceCommand::Terminate => Opcode::Terminate,
        }
    }

    /// Number of payload words following the header
    pub fn payload_words(&self) -> usize {
        match self {
            DeviceCommand::Wait { .. } => 2,
            DeviceCommand::WriteConfig { bytes, .. } => 3 + words_for(bytes.len()),
            DeviceCommand::Go { config_bases, .. } => 1 + config_bases.len(),
            DeviceCommand::WriteLinear { bytes, .. } => 2 + words_for(bytes.len()),
            DeviceCommand::ReadLinear { .. } => 3,
            DeviceCommand::RecordEvent { .. } => 2,
            DeviceCommand::ExecTrace { words, .. } => 2 + words.len(),
            DeviceCommand::Terminate => 0,
        }
    }

    /// Encoded size in bytes, header included
    pub fn size_bytes(&self) -> usize {
        (HEADER_WORDS + self.payload_words()) * 4
    }

    /// Encode into the front of `out`, returning the bytes written.
    ///
    /// Panics if `out` is shorter than `size_bytes()`.
    pub fn encode_into(&self, out: &mut [u8]) -> usize {
        let size = self.size_bytes();
        assert!(
            out.len() >= size,
            "{:?} needs {} bytes, only {} available",
            self.opcode(),
            size,
            out.len()
        );

        let mut w = WordWriter { out, pos: 0 };
        w.word(self.opcode() as u32);
        w.word(self.payload_words() as u32);
        match *self {
            DeviceCommand::Wait { count, clear } => {
                w.word(count);
                w.word(clear as u32);
            }
            DeviceCommand::WriteConfig {
                core_type,
                address,
                bytes,
            } => {
                w.word(core_type as u32);
                w.word(address);
                w.bytes(bytes);
            }
            DeviceCommand::Go {
                program_id,
                config_bases,
            } => {
                w.word(program_id);
                for &base in config_bases {
                    w.word(base);
                }
            }
            DeviceCommand::WriteLinear { address, bytes } => {
                w.word(address);
                w.bytes(bytes);
            }
            DeviceCommand::ReadLinear {
                address,
                page_size,
                page_count,
            } => {
                w.word(address);
                w.word(page_size);
                w.word(page_count);
            }
            DeviceCommand::RecordEvent { cq_id, event_id } => {
                w.word(u32::from(cq_id));
                w.word(event_id);
            }
            DeviceCommand::ExecTrace { trace_id, words } => {
                w.word(trace_id);
                w.word(words.len() as u32);
                for &word in words {
                    w.word(word);
                }
            }
            DeviceCommand::Terminate => {}
        }
        debug_assert_eq!(w.pos, size);
        size
    }

    /// Encode into a fresh buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut out = alloc::vec![0u8; self.size_bytes()];
        self.encode_into(&mut out);
        out
    }
}

/// Total encoded size of a command batch
pub fn batch_size(commands: &[DeviceCommand<'_>]) -> usize {
    commands.iter().map(DeviceCommand::size_bytes).sum()
}

fn words_for(len: usize) -> usize {
    len.div_ceil(4)
}

struct WordWriter<'o> {
    out: &'o mut [u8],
    pos: usize,
}

impl WordWriter<'_> {
    fn word(&mut self, value: u32) {
        self.out[self.pos..self.pos + 4].copy_from_slice(&value.to_le_bytes());
        self.pos += 4;
    }

    /// Length word, then the data zero-padded to a word boundary
    fn bytes(&mut self, data: &[u8]) {
        self.word(data.len() as u32);
        let padded = words_for(data.len()) * 4;
        self.out[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.out[self.pos + data.len()..self.pos + padded].fill(0);
        self.pos += padded;
    }
}

// ============================================================================
// Decoding (processor models and tests)
// ============================================================================

/// An owned, decoded command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodedCommand {
    Wait {
        count: u32,
        clear: bool,
    },
    WriteConfig {
        core_type: CoreType,
        address: u32,
        bytes: Vec<u8>,
    },
    Go {
        program_id: u32,
        config_bases: Vec<u32>,
    },
    WriteLinear {
        address: u32,
        bytes: Vec<u8>,
    },
    ReadLinear {
        address: u32,
        page_size: u32,
        page_count: u32,
    },
    RecordEvent {
        cq_id: u8,
        event_id: u32,
    },
    ExecTrace {
        trace_id: u32,
        words: Vec<u32>,
    },
    Terminate,
}

/// Reassemble little-endian bytes into words; a trailing partial word is
/// dropped.
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}

/// Decode a whole command stream.
pub fn decode_commands(words: &[u32]) -> Result<Vec<DecodedCommand>, DecodeError> {
    let mut commands = Vec::new();
    let mut offset = 0;

    while offset < words.len() {
        if offset + HEADER_WORDS > words.len() {
            return Err(DecodeError::Truncated { offset });
        }
        let raw_opcode = words[offset];
        let count = words[offset + 1] as usize;
        let start = offset + HEADER_WORDS;
        let payload = start
            .checked_add(count)
            .and_then(|end| words.get(start..end))
            .ok_or(DecodeError::Truncated { offset })?;
        let opcode = Opcode::from_u32(raw_opcode).ok_or(DecodeError::UnknownOpcode(raw_opcode))?;

        commands.push(decode_one(opcode, payload)?);
        offset = start + count;
    }

    Ok(commands)
}

fn decode_one(opcode: Opcode, p: &[u32]) -> Result<DecodedCommand, DecodeError> {
    let need = |n: usize| {
        if p.len() < n {
            Err(DecodeError::PayloadTooShort {
                opcode: opcode as u32,
                words: p.len(),
            })
        } else {
            Ok(())
        }
    };

    let cmd = match opcode {
        Opcode::Wait => {
            need(2)?;
            DecodedCommand::Wait {
                count: p[0],
                clear: p[1] != 0,
            }
        }
        Opcode::WriteConfig => {
            need(3)?;
            let core_type = u8::try_from(p[0])
                .ok()
                .and_then(CoreType::from_u8)
                .ok_or(DecodeError::InvalidCoreType(p[0]))?;
            DecodedCommand::WriteConfig {
                core_type,
                address: p[1],
                bytes: unpack_bytes(opcode, &p[2..])?,
            }
        }
        Opcode::Go => {
            need(1)?;
            DecodedCommand::Go {
                program_id: p[0],
                config_bases: p[1..].to_vec(),
            }
        }
        Opcode::WriteLinear => {
            need(2)?;
            DecodedCommand::WriteLinear {
                address: p[0],
                bytes: unpack_bytes(opcode, &p[1..])?,
            }
        }
        Opcode::ReadLinear => {
            need(3)?;
            DecodedCommand::ReadLinear {
                address: p[0],
                page_size: p[1],
                page_count: p[2],
            }
        }
        Opcode::RecordEvent => {
            need(2)?;
            DecodedCommand::RecordEvent {
                cq_id: p[0] as u8,
                event_id: p[1],
            }
        }
        Opcode::ExecTrace => {
            need(2)?;
            let len = p[1] as usize;
            need(2 + len)?;
            DecodedCommand::ExecTrace {
                trace_id: p[0],
                words: p[2..2 + len].to_vec(),
            }
        }
        Opcode::Terminate => DecodedCommand::Terminate,
    };
    Ok(cmd)
}

/// `[byte_len, words...]` back to bytes
fn unpack_bytes(opcode: Opcode, p: &[u32]) -> Result<Vec<u8>, DecodeError> {
    let too_short = DecodeError::PayloadTooShort {
        opcode: opcode as u32,
        words: p.len(),
    };
    let (&len, data) = p.split_first().ok_or(too_short.clone())?;
    let len = len as usize;
    if data.len() < words_for(len) {
        return Err(too_short);
    }
    let mut bytes: Vec<u8> = data.iter().flat_map(|w| w.to_le_bytes()).collect();
    bytes.truncate(len);
    Ok(bytes)
}
