//! Statistics registers for acquisition and storage.
//!
//! Each register is owned by exactly one task: the analog sampler mutates its
//! channel's `ChannelStats`, each serial reader mutates its port's
//! `SerialStats`, and the storage writer loop mutates `StorageStats`. The
//! registers are shared behind `Arc<RwLock<..>>` so the network and display
//! surfaces can take cloned snapshots, but writes only ever come from the
//! owning task, so the hot path never contends on the lock.
//!
//! Counters are never decremented; `reset` is the only way to clear them and
//! is exposed through the public surface for operator use.

use serde::Serialize;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read guard, recovering the inner value if a writer panicked.
pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Acquire a write guard, recovering the inner value if a writer panicked.
pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Per-channel analog acquisition statistics.
///
/// `total_samples` counts successful queue pushes since task start;
/// `dropped_samples` counts pushes rejected by a full queue. The voltage
/// bounds and running average cover successfully queued samples only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelStats {
    pub total_samples: u32,
    pub dropped_samples: u32,
    pub error_count: u32,
    pub min_voltage: f32,
    pub max_voltage: f32,
    pub avg_voltage: f32,
    pub last_sample_time: u64,
}

impl ChannelStats {
    /// Record one successfully queued sample.
    pub fn record_sample(&mut self, voltage: f32, timestamp_us: u64) {
        self.total_samples = self.total_samples.wrapping_add(1);
        self.last_sample_time = timestamp_us;

        // First successful sample initializes both bounds.
        if self.total_samples == 1 || voltage < self.min_voltage {
            self.min_voltage = voltage;
        }
        if self.total_samples == 1 || voltage > self.max_voltage {
            self.max_voltage = voltage;
        }

        let n = self.total_samples as f32;
        self.avg_voltage = (self.avg_voltage * (n - 1.0) + voltage) / n;
    }

    /// Record a sample dropped by a full queue.
    pub fn record_drop(&mut self) {
        self.dropped_samples = self.dropped_samples.wrapping_add(1);
    }

    /// Record a hardware read or conversion failure.
    pub fn record_error(&mut self) {
        self.error_count = self.error_count.wrapping_add(1);
    }

    /// Clear all counters and bounds.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Per-port serial acquisition statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SerialStats {
    pub total_packets: u32,
    pub dropped_packets: u32,
    pub error_count: u32,
    pub total_bytes: u64,
    pub last_activity: u64,
}

impl SerialStats {
    /// Record one successfully queued packet of `len` bytes.
    pub fn record_packet(&mut self, len: usize, timestamp_us: u64) {
        self.total_packets = self.total_packets.wrapping_add(1);
        self.total_bytes += len as u64;
        self.last_activity = timestamp_us;
    }

    pub fn record_drop(&mut self) {
        self.dropped_packets = self.dropped_packets.wrapping_add(1);
    }

    pub fn record_error(&mut self) {
        self.error_count = self.error_count.wrapping_add(1);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Storage writer statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    pub total_writes: u32,
    pub write_errors: u32,
    pub files_created: u32,
    pub files_rotated: u32,
    pub bytes_written: u64,
    pub last_write_time: u64,
}

impl StorageStats {
    /// Record one frame appended to disk.
    pub fn record_write(&mut self, frame_len: usize, timestamp_us: u64) {
        self.total_writes = self.total_writes.wrapping_add(1);
        self.bytes_written += frame_len as u64;
        self.last_write_time = timestamp_us;
    }

    pub fn record_error(&mut self) {
        self.write_errors = self.write_errors.wrapping_add(1);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_statistics_min_max_avg() {
        let mut stats = ChannelStats::default();
        for (i, v) in [1.0f32, 3.0, 2.0].into_iter().enumerate() {
            stats.record_sample(v, i as u64);
        }
        assert_eq!(stats.total_samples, 3);
        assert_eq!(stats.min_voltage, 1.0);
        assert_eq!(stats.max_voltage, 3.0);
        assert!((stats.avg_voltage - 2.0).abs() < 1e-6);
        assert_eq!(stats.last_sample_time, 2);
    }

    #[test]
    fn first_sample_initializes_bounds() {
        let mut stats = ChannelStats::default();
        stats.record_sample(-0.5, 10);
        assert_eq!(stats.min_voltage, -0.5);
        assert_eq!(stats.max_voltage, -0.5);
        assert_eq!(stats.avg_voltage, -0.5);
    }

    #[test]
    fn drops_and_errors_do_not_touch_voltages() {
        let mut stats = ChannelStats::default();
        stats.record_sample(2.0, 1);
        stats.record_drop();
        stats.record_error();
        assert_eq!(stats.total_samples, 1);
        assert_eq!(stats.dropped_samples, 1);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.avg_voltage, 2.0);
    }

    #[test]
    fn serial_stats_accumulate_bytes() {
        let mut stats = SerialStats::default();
        stats.record_packet(16, 100);
        stats.record_packet(8, 200);
        assert_eq!(stats.total_packets, 2);
        assert_eq!(stats.total_bytes, 24);
        assert_eq!(stats.last_activity, 200);
    }

    #[test]
    fn reset_clears_everything() {
        let mut stats = StorageStats::default();
        stats.record_write(25, 42);
        stats.record_error();
        stats.reset();
        assert_eq!(stats.total_writes, 0);
        assert_eq!(stats.write_errors, 0);
        assert_eq!(stats.bytes_written, 0);
    }

    #[test]
    fn stats_serialize_to_json() {
        let stats = ChannelStats::default();
        let json = serde_json::to_string(&stats).expect("serializes");
        assert!(json.contains("total_samples"));
    }
}
