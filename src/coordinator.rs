//! Coordination stage: the single consumer of every acquisition queue.
//!
//! One task drains the per-channel analog queues and per-port serial queues
//! and forwards each packet to the storage writer. Each source gets a short
//! timed pop when its producer is active, then a non-blocking drain, so a
//! burst on one source cannot starve the others and an idle source cannot
//! stall the loop.

use crate::acquisition::{SamplePacket, SerialPacket};
use crate::error::Result;
use crate::pipeline::BoundedReceiver;
use crate::storage::{DataType, StorageHandle};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Timed wait on a source whose producer is active.
const SOURCE_POP_TIMEOUT: Duration = Duration::from_millis(10);

/// Per-iteration yield.
const LOOP_DELAY: Duration = Duration::from_millis(1);

/// Grace period for the coordination task to exit after its flag clears.
const STOP_GRACE: Duration = Duration::from_millis(500);

struct TaskState {
    running: Arc<AtomicBool>,
    storage: StorageHandle,
    analog: Vec<BoundedReceiver<SamplePacket>>,
    analog_active: Arc<AtomicBool>,
    serial: Vec<BoundedReceiver<SerialPacket>>,
    serial_active: Vec<Arc<AtomicBool>>,
}

/// Owns the fan-in task between acquisition and storage.
pub struct Coordinator {
    running: Arc<AtomicBool>,
    task_state: Option<TaskState>,
    join: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Wire the coordination stage to its sources and sink. Consumes the
    /// acquisition receivers; they have exactly one consumer.
    pub fn new(
        storage: StorageHandle,
        analog: Vec<BoundedReceiver<SamplePacket>>,
        analog_active: Arc<AtomicBool>,
        serial: Vec<BoundedReceiver<SerialPacket>>,
        serial_active: Vec<Arc<AtomicBool>>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(false));
        Self {
            running: Arc::clone(&running),
            task_state: Some(TaskState {
                running,
                storage,
                analog,
                analog_active,
                serial,
                serial_active,
            }),
            join: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        let state = self.task_state.take().ok_or_else(|| {
            crate::error::LoggerError::InvalidState("coordinator cannot be restarted".into())
        })?;
        self.running.store(true, Ordering::SeqCst);
        self.join = Some(tokio::spawn(coordination_loop(state)));
        info!("coordinator started");
        Ok(())
    }

    /// Clear the running flag and wait out the grace period. The task drains
    /// whatever is still queued before it exits.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if tokio::time::timeout(STOP_GRACE, join).await.is_err() {
                warn!("coordinator task did not exit within grace period");
            }
        }
        info!("coordinator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn forward_sample(storage: &StorageHandle, sample: SamplePacket) {
    if let Err(e) = storage
        .write(sample.channel, DataType::Analog, &sample.storage_payload())
        .await
    {
        debug!("ADC{} sample not stored: {e}", sample.channel);
    }
}

async fn forward_packet(storage: &StorageHandle, packet: SerialPacket) {
    if let Err(e) = storage
        .write(packet.port, DataType::Serial, &packet.data)
        .await
    {
        debug!("UART{} packet not stored: {e}", packet.port);
    }
}

async fn coordination_loop(mut state: TaskState) {
    info!("coordination task started");

    while state.running.load(Ordering::Relaxed) {
        let analog_active = state.analog_active.load(Ordering::Relaxed);
        for rx in state.analog.iter_mut() {
            let first = if analog_active {
                rx.pop_timeout(SOURCE_POP_TIMEOUT).await
            } else {
                rx.try_pop()
            };
            if let Some(sample) = first {
                forward_sample(&state.storage, sample).await;
                // Drain a backlog without re-arming the timed wait.
                while let Some(sample) = rx.try_pop() {
                    forward_sample(&state.storage, sample).await;
                }
            }
        }

        for (port, rx) in state.serial.iter_mut().enumerate() {
            let active = state
                .serial_active
                .get(port)
                .map(|f| f.load(Ordering::Relaxed))
                .unwrap_or(false);
            let first = if active {
                rx.pop_timeout(SOURCE_POP_TIMEOUT).await
            } else {
                rx.try_pop()
            };
            if let Some(packet) = first {
                forward_packet(&state.storage, packet).await;
                while let Some(packet) = rx.try_pop() {
                    forward_packet(&state.storage, packet).await;
                }
            }
        }

        sleep(LOOP_DELAY).await;
    }

    // Final drain so packets queued before the stop signal reach storage.
    for rx in state.analog.iter_mut() {
        while let Some(sample) = rx.try_pop() {
            forward_sample(&state.storage, sample).await;
        }
    }
    for rx in state.serial.iter_mut() {
        while let Some(packet) = rx.try_pop() {
            forward_packet(&state.storage, packet).await;
        }
    }

    info!("coordination task stopped");
}
