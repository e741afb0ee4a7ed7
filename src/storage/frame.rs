//! On-disk storage frame codec.
//!
//! Every record is a fixed little-endian header immediately followed by the
//! raw payload bytes, with no separators; the length prefix in the header is
//! what makes replay possible. Layout (17 bytes):
//!
//! ```text
//! magic: u32 | timestamp_us: u64 | source_id: u8 | data_type: u8
//! | data_length: u16 | checksum: u8 | payload: [u8; data_length]
//! ```
//!
//! The checksum is the XOR of all payload bytes. Frames are written once and
//! never mutated.

use crate::error::{LoggerError, Result};
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Frame validation magic.
pub const STORAGE_MAGIC: u32 = 0xDEAD_BEEF;

/// Encoded header length in bytes (4 + 8 + 1 + 1 + 2 + 1).
pub const FRAME_HEADER_LEN: usize = 17;

/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD_LEN: usize = 256;

/// Discriminates which subsystem produced a frame. Each open log file is
/// bound to exactly one data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum DataType {
    Serial = 1,
    Analog = 2,
    System = 3,
}

impl DataType {
    /// Log filename prefix for this type.
    pub fn prefix(self) -> &'static str {
        match self {
            DataType::Serial => "uart",
            DataType::Analog => "adc",
            DataType::System => "system",
        }
    }
}

impl TryFrom<u8> for DataType {
    type Error = LoggerError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(DataType::Serial),
            2 => Ok(DataType::Analog),
            3 => Ok(DataType::System),
            other => Err(LoggerError::CorruptFrame(format!(
                "unknown data type {other}"
            ))),
        }
    }
}

/// XOR of all payload bytes.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// One decoded (or to-be-encoded) storage record.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageFrame {
    pub timestamp_us: u64,
    pub source_id: u8,
    pub data_type: DataType,
    pub checksum: u8,
    pub payload: Vec<u8>,
}

impl StorageFrame {
    /// Build a frame over `payload`, computing the checksum.
    pub fn new(source_id: u8, data_type: DataType, payload: &[u8], timestamp_us: u64) -> Self {
        Self {
            timestamp_us,
            source_id,
            data_type,
            checksum: xor_checksum(payload),
            payload: payload.to_vec(),
        }
    }

    /// Total encoded length, header included.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    /// Serialize the frame, little-endian.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u32_le(STORAGE_MAGIC);
        buf.put_u64_le(self.timestamp_us);
        buf.put_u8(self.source_id);
        buf.put_u8(self.data_type as u8);
        buf.put_u16_le(self.payload.len() as u16);
        buf.put_u8(self.checksum);
        buf.put_slice(&self.payload);
        buf.to_vec()
    }

    /// Decode one frame from the front of `buf`, validating magic, length,
    /// and checksum.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < FRAME_HEADER_LEN {
            return Err(LoggerError::CorruptFrame("truncated header".into()));
        }
        let magic = buf.get_u32_le();
        if magic != STORAGE_MAGIC {
            return Err(LoggerError::CorruptFrame(format!(
                "bad magic 0x{magic:08X}"
            )));
        }
        let timestamp_us = buf.get_u64_le();
        let source_id = buf.get_u8();
        let data_type = DataType::try_from(buf.get_u8())?;
        let data_length = buf.get_u16_le() as usize;
        let checksum = buf.get_u8();

        if data_length > MAX_PAYLOAD_LEN {
            return Err(LoggerError::CorruptFrame(format!(
                "payload length {data_length} exceeds maximum"
            )));
        }
        if buf.remaining() < data_length {
            return Err(LoggerError::CorruptFrame("truncated payload".into()));
        }
        let mut payload = vec![0u8; data_length];
        buf.copy_to_slice(&mut payload);

        if xor_checksum(&payload) != checksum {
            return Err(LoggerError::CorruptFrame("checksum mismatch".into()));
        }

        Ok(Self {
            timestamp_us,
            source_id,
            data_type,
            checksum,
            payload,
        })
    }

    /// Recompute the checksum over the payload and compare.
    pub fn verify_checksum(&self) -> bool {
        xor_checksum(&self.payload) == self.checksum
    }
}

/// Replay every frame in a log file, validating each record.
pub fn read_frames(path: &Path) -> Result<Vec<StorageFrame>> {
    let contents = fs::read(path)?;
    let mut buf = contents.as_slice();
    let mut frames = Vec::new();
    while buf.has_remaining() {
        frames.push(StorageFrame::decode(&mut buf)?);
    }
    Ok(frames)
}
