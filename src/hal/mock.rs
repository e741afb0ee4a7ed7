//! Mock hardware implementation.
//!
//! Simulates the analog channels and serial ports for testing without a
//! physical board. All waits use `tokio::time::sleep`, never
//! `std::thread::sleep`, so the mock is safe inside acquisition tasks.
//!
//! Behaviors:
//! - Per-channel voltage sources: a settable base voltage plus optional
//!   uniform noise.
//! - Failure injection: `fail_next_reads(channel, n)` makes the next `n`
//!   analog reads return an error.
//! - Scripted serial input: `push_serial(port, bytes)` enqueues one chunk
//!   per future `read_bytes` call; an empty script sleeps out the read
//!   timeout and returns zero bytes, like an idle UART.

use crate::config::{ADC_CHANNEL_COUNT, UART_PORT_COUNT};
use crate::error::{LoggerError, Result};
use crate::hal::Hardware;
use crate::stats::{read_lock, write_lock};
use async_trait::async_trait;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::sleep;

/// Full-scale raw reading of the simulated 12-bit converter.
const ADC_FULL_SCALE: i32 = 4095;

struct MockChannel {
    voltage: RwLock<f32>,
    noise_amplitude: RwLock<f32>,
    fail_reads: AtomicU32,
    voltage_scale: f32,
}

struct MockPort {
    incoming: Mutex<VecDeque<Vec<u8>>>,
    written: Mutex<Vec<u8>>,
    fail_reads: AtomicU32,
}

/// Simulated hardware for the full channel/port complement of the board.
pub struct MockHardware {
    channels: Vec<MockChannel>,
    ports: Vec<MockPort>,
}

impl MockHardware {
    /// All channels at 0.0 V, all serial scripts empty.
    pub fn new() -> Self {
        Self::with_constant_voltage(0.0)
    }

    /// All channels reading a constant `voltage`.
    pub fn with_constant_voltage(voltage: f32) -> Self {
        let channels = (0..ADC_CHANNEL_COUNT)
            .map(|_| MockChannel {
                voltage: RwLock::new(voltage),
                noise_amplitude: RwLock::new(0.0),
                fail_reads: AtomicU32::new(0),
                voltage_scale: 4.0,
            })
            .collect();
        let ports = (0..UART_PORT_COUNT)
            .map(|_| MockPort {
                incoming: Mutex::new(VecDeque::new()),
                written: Mutex::new(Vec::new()),
                fail_reads: AtomicU32::new(0),
            })
            .collect();
        Self { channels, ports }
    }

    /// Change the base voltage a channel reads.
    pub fn set_voltage(&self, channel: u8, voltage: f32) {
        if let Some(ch) = self.channels.get(channel as usize) {
            *write_lock(&ch.voltage) = voltage;
        }
    }

    /// Add uniform noise of the given amplitude to a channel's readings.
    pub fn set_noise(&self, channel: u8, amplitude: f32) {
        if let Some(ch) = self.channels.get(channel as usize) {
            *write_lock(&ch.noise_amplitude) = amplitude;
        }
    }

    /// Make the next `count` analog reads on `channel` fail.
    pub fn fail_next_reads(&self, channel: u8, count: u32) {
        if let Some(ch) = self.channels.get(channel as usize) {
            ch.fail_reads.store(count, Ordering::SeqCst);
        }
    }

    /// Make the next `count` serial reads on `port` fail.
    pub fn fail_next_serial_reads(&self, port: u8, count: u32) {
        if let Some(p) = self.ports.get(port as usize) {
            p.fail_reads.store(count, Ordering::SeqCst);
        }
    }

    /// Enqueue one chunk of scripted serial input for `port`. Each chunk is
    /// delivered by exactly one future `read_bytes` call.
    pub fn push_serial(&self, port: u8, bytes: &[u8]) {
        if let Some(p) = self.ports.get(port as usize) {
            p.incoming
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(bytes.to_vec());
        }
    }

    /// Everything written out of `port` so far.
    pub fn written(&self, port: u8) -> Vec<u8> {
        self.ports
            .get(port as usize)
            .map(|p| {
                p.written
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            })
            .unwrap_or_default()
    }

    fn channel(&self, channel: u8) -> Result<&MockChannel> {
        self.channels
            .get(channel as usize)
            .ok_or(LoggerError::InvalidChannel(channel))
    }

    fn port(&self, port: u8) -> Result<&MockPort> {
        self.ports
            .get(port as usize)
            .ok_or(LoggerError::InvalidPort(port))
    }

    fn sample_voltage(&self, ch: &MockChannel) -> f32 {
        let base = *read_lock(&ch.voltage);
        let amplitude = *read_lock(&ch.noise_amplitude);
        if amplitude > 0.0 {
            base + rand::thread_rng().gen_range(-amplitude..=amplitude)
        } else {
            base
        }
    }

    fn take_injected_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hardware for MockHardware {
    async fn read_raw(&self, channel: u8) -> Result<i32> {
        let ch = self.channel(channel)?;
        if Self::take_injected_failure(&ch.fail_reads) {
            return Err(LoggerError::Hardware(format!(
                "injected ADC{channel} read failure"
            )));
        }
        let voltage = self.sample_voltage(ch);
        let raw = (voltage / ch.voltage_scale * ADC_FULL_SCALE as f32).round() as i32;
        Ok(raw.clamp(0, ADC_FULL_SCALE))
    }

    async fn read_voltage(&self, channel: u8) -> Result<f32> {
        let ch = self.channel(channel)?;
        if Self::take_injected_failure(&ch.fail_reads) {
            return Err(LoggerError::Hardware(format!(
                "injected ADC{channel} read failure"
            )));
        }
        Ok(self.sample_voltage(ch))
    }

    fn raw_to_voltage(&self, channel: u8, raw: i32) -> f32 {
        let scale = self
            .channels
            .get(channel as usize)
            .map(|ch| ch.voltage_scale)
            .unwrap_or(1.0);
        raw as f32 / ADC_FULL_SCALE as f32 * scale
    }

    async fn read_bytes(&self, port: u8, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let p = self.port(port)?;
        if Self::take_injected_failure(&p.fail_reads) {
            return Err(LoggerError::Hardware(format!(
                "injected UART{port} read failure"
            )));
        }
        let chunk = p
            .incoming
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match chunk {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                // Anything that did not fit stays queued for the next read.
                if n < chunk.len() {
                    let rest = chunk.split_off(n);
                    p.incoming
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push_front(rest);
                }
                Ok(n)
            }
            None => {
                sleep(timeout).await;
                Ok(0)
            }
        }
    }

    async fn write_bytes(&self, port: u8, data: &[u8]) -> Result<()> {
        let p = self.port(port)?;
        p.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Ok(())
    }
}
