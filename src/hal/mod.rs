//! Hardware access layer.
//!
//! The acquisition tasks talk to hardware exclusively through the
//! [`Hardware`] trait so the pipeline can run against real drivers or the
//! [`mock::MockHardware`] simulator. The core never assumes a hardware call
//! succeeds; every call site has an explicit failure path that feeds the
//! owning channel's error counter.

pub mod mock;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Blocking read/write primitives for the analog channels and serial ports.
///
/// Implementations must be cheap to share (`Arc<dyn Hardware>`); all methods
/// take `&self` and synchronize internally.
#[async_trait]
pub trait Hardware: Send + Sync {
    /// Read the raw converter value for one analog channel.
    async fn read_raw(&self, channel: u8) -> Result<i32>;

    /// Read a calibrated instantaneous voltage for one analog channel.
    async fn read_voltage(&self, channel: u8) -> Result<f32>;

    /// Pure calibration function mapping a raw reading to volts.
    fn raw_to_voltage(&self, channel: u8, raw: i32) -> f32;

    /// Read up to `buf.len()` bytes from a serial port, waiting at most
    /// `timeout`. Returns `Ok(0)` on timeout with no data; that is the
    /// normal idle case, not an error.
    async fn read_bytes(&self, port: u8, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write bytes out of a serial port.
    async fn write_bytes(&self, port: u8, data: &[u8]) -> Result<()>;
}
