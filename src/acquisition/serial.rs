//! Event-driven serial acquisition tasks.
//!
//! One task per active port turns a blocking byte-stream read into discrete
//! [`SerialPacket`]s delivered through a bounded queue. A zero-byte read is
//! the normal idle case, not an error. Push uses a short timeout; a full
//! queue is counted as a dropped packet.
//!
//! Stopping a port is cooperative: the caller clears the port's active flag
//! and waits a bounded grace period for the task to notice and exit before
//! its handle is discarded.

use crate::acquisition::{SerialPacket, SERIAL_PACKET_MAX};
use crate::clock::now_micros;
use crate::config::{ConfigRegistry, UART_PORT_COUNT};
use crate::error::{LoggerError, Result};
use crate::hal::Hardware;
use crate::pipeline::{bounded, BoundedReceiver, BoundedSender};
use crate::stats::{read_lock, write_lock, SerialStats};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Depth of each per-port output queue, in packets.
pub const SERIAL_QUEUE_SIZE: usize = 32;

/// Bound on each blocking hardware read.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Short wait for a queue slot before counting a drop.
const PUSH_TIMEOUT: Duration = Duration::from_millis(10);

/// Per-iteration yield so a chattering port cannot starve other tasks.
const IDLE_DELAY: Duration = Duration::from_millis(1);

/// Grace period granted to a stopping port task; covers one full read
/// timeout plus scheduling slack.
const STOP_GRACE: Duration = Duration::from_millis(500);

struct PortTaskState {
    port: u8,
    active: Arc<AtomicBool>,
    tx: BoundedSender<SerialPacket>,
    stats: Arc<RwLock<SerialStats>>,
}

struct PortRuntime {
    active: Arc<AtomicBool>,
    stats: Arc<RwLock<SerialStats>>,
    sender: BoundedSender<SerialPacket>,
    task_state: Option<PortTaskState>,
    join: Option<JoinHandle<()>>,
}

/// Owns the per-port reader tasks and their shared read handles.
pub struct SerialManager {
    registry: Arc<ConfigRegistry>,
    hardware: Arc<dyn Hardware>,
    ports: Vec<PortRuntime>,
}

impl SerialManager {
    /// Allocate one queue per port. Returns the receivers the coordination
    /// stage will drain.
    pub fn new(
        registry: Arc<ConfigRegistry>,
        hardware: Arc<dyn Hardware>,
    ) -> (Self, Vec<BoundedReceiver<SerialPacket>>) {
        let mut ports = Vec::with_capacity(UART_PORT_COUNT);
        let mut receivers = Vec::with_capacity(UART_PORT_COUNT);

        for port in 0..UART_PORT_COUNT {
            let (tx, rx) = bounded(SERIAL_QUEUE_SIZE);
            let active = Arc::new(AtomicBool::new(false));
            let stats = Arc::new(RwLock::new(SerialStats::default()));
            ports.push(PortRuntime {
                active: Arc::clone(&active),
                stats: Arc::clone(&stats),
                sender: tx.clone(),
                task_state: Some(PortTaskState {
                    port: port as u8,
                    active,
                    tx,
                    stats,
                }),
                join: None,
            });
            receivers.push(rx);
        }

        (
            Self {
                registry,
                hardware,
                ports,
            },
            receivers,
        )
    }

    /// Start reader tasks for every port enabled in the configuration.
    pub fn start(&mut self) -> Result<()> {
        for port in 0..UART_PORT_COUNT as u8 {
            if self.registry.port(port as usize).enabled {
                self.start_port(port)?;
            }
        }
        Ok(())
    }

    /// Start one port's reader task.
    pub fn start_port(&mut self, port: u8) -> Result<()> {
        let runtime = self
            .ports
            .get_mut(port as usize)
            .ok_or(LoggerError::InvalidPort(port))?;
        if runtime.active.load(Ordering::SeqCst) {
            warn!("UART{port} already active");
            return Ok(());
        }
        let state = runtime.task_state.take().ok_or_else(|| {
            LoggerError::InvalidState(format!("UART{port} task cannot be restarted"))
        })?;

        runtime.active.store(true, Ordering::SeqCst);
        runtime.join = Some(tokio::spawn(port_loop(Arc::clone(&self.hardware), state)));
        info!("UART{port} started");
        Ok(())
    }

    /// Stop every active port.
    pub async fn stop(&mut self) {
        for port in 0..UART_PORT_COUNT as u8 {
            if self.is_port_active(port) {
                self.stop_port(port).await;
            }
        }
    }

    /// Clear one port's active flag and wait out the grace period.
    pub async fn stop_port(&mut self, port: u8) {
        let Some(runtime) = self.ports.get_mut(port as usize) else {
            return;
        };
        runtime.active.store(false, Ordering::SeqCst);
        if let Some(join) = runtime.join.take() {
            if tokio::time::timeout(STOP_GRACE, join).await.is_err() {
                warn!("UART{port} task did not exit within grace period");
            }
        }
        info!("UART{port} stopped");
    }

    pub fn is_port_active(&self, port: u8) -> bool {
        self.ports
            .get(port as usize)
            .map(|p| p.active.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Active flags shared with the coordination stage, one per port.
    pub(crate) fn active_flags(&self) -> Vec<Arc<AtomicBool>> {
        self.ports.iter().map(|p| Arc::clone(&p.active)).collect()
    }

    /// Snapshot of one port's statistics.
    pub fn stats(&self, port: u8) -> Result<SerialStats> {
        self.ports
            .get(port as usize)
            .map(|p| read_lock(&p.stats).clone())
            .ok_or(LoggerError::InvalidPort(port))
    }

    pub fn reset_stats(&self, port: u8) -> Result<()> {
        let runtime = self
            .ports
            .get(port as usize)
            .ok_or(LoggerError::InvalidPort(port))?;
        write_lock(&runtime.stats).reset();
        Ok(())
    }

    /// Number of packets currently waiting in one port's queue.
    pub fn queued_packets(&self, port: u8) -> Result<usize> {
        self.ports
            .get(port as usize)
            .map(|p| p.sender.queued())
            .ok_or(LoggerError::InvalidPort(port))
    }
}

async fn port_loop(hardware: Arc<dyn Hardware>, state: PortTaskState) {
    info!("UART{} task started", state.port);

    let mut buf = vec![0u8; SERIAL_PACKET_MAX];
    let mut sequence: u32 = 0;

    while state.active.load(Ordering::Relaxed) {
        match hardware.read_bytes(state.port, &mut buf, READ_TIMEOUT).await {
            // Idle timeout; nothing arrived.
            Ok(0) => {}
            Ok(n) => {
                let timestamp = now_micros();
                let packet = SerialPacket {
                    timestamp_us: timestamp,
                    port: state.port,
                    sequence,
                    data: buf[..n].to_vec(),
                };
                sequence = sequence.wrapping_add(1);

                match state.tx.push_timeout(packet, PUSH_TIMEOUT).await {
                    Ok(()) => write_lock(&state.stats).record_packet(n, timestamp),
                    Err(_) => {
                        write_lock(&state.stats).record_drop();
                        warn!("UART{} queue full, dropping packet", state.port);
                    }
                }
            }
            Err(e) => {
                write_lock(&state.stats).record_error();
                debug!("UART{} read failed: {e}", state.port);
            }
        }

        sleep(IDLE_DELAY).await;
    }

    info!("UART{} task stopped", state.port);
}
