//! Data acquisition tasks and packet types.
//!
//! Two producers feed the pipeline: the periodic analog sampler
//! ([`analog::AnalogSampler`]) and one event-driven reader per serial port
//! ([`serial::SerialManager`]). Both hand packets to the coordination stage
//! through bounded queues; a full queue is counted as a drop at the producer,
//! never waited on.

pub mod analog;
pub mod serial;

use serde::Serialize;

/// Largest serial payload carried by one packet.
pub const SERIAL_PACKET_MAX: usize = 256;

/// One calibrated, filtered analog sample.
///
/// Created by the acquisition task, consumed exactly once by the
/// coordination stage (or dropped); immutable after creation. Sequence
/// numbers are monotonic per channel, wrap at `u32::MAX`, and start at 0 on
/// task start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplePacket {
    pub timestamp_us: u64,
    pub channel: u8,
    pub raw_value: i32,
    pub voltage: f32,
    pub filtered_voltage: f32,
    pub sequence: u32,
}

impl SamplePacket {
    /// On-disk payload: filtered voltage then raw value, little-endian.
    pub fn storage_payload(&self) -> [u8; 8] {
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&self.filtered_voltage.to_le_bytes());
        payload[4..].copy_from_slice(&self.raw_value.to_le_bytes());
        payload
    }
}

/// One framed chunk of serial input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerialPacket {
    pub timestamp_us: u64,
    pub port: u8,
    pub sequence: u32,
    /// At most [`SERIAL_PACKET_MAX`] bytes.
    pub data: Vec<u8>,
}

impl SerialPacket {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
