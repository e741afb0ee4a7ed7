//! Rotating append-only log writer.
//!
//! A single writer task owns every open file. Producers never touch the
//! filesystem; they enqueue [`StorageFrame`]s through a cloneable
//! [`StorageHandle`] with a short bounded wait. The writer drains the queue,
//! appends frames to per-type log files, flushes periodically, and rotates a
//! file when it crosses the size threshold.

use crate::clock::now_micros;
use crate::config::StorageSettings;
use crate::error::{LoggerError, Result};
use crate::pipeline::{bounded, BoundedReceiver, BoundedSender};
use crate::stats::{read_lock, write_lock, StorageStats};
use crate::storage::frame::{DataType, StorageFrame, MAX_PAYLOAD_LEN};
use chrono::Local;
use log::{error, info, warn};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Depth of the storage input queue, in frames.
pub const STORAGE_QUEUE_SIZE: usize = 50;

/// Maximum simultaneously open log files.
pub const STORAGE_MAX_FILES: usize = 8;

/// Flush a file after this many records.
const FLUSH_EVERY_RECORDS: u32 = 10;

/// Flush every open file after this many writer iterations.
const FLUSH_ALL_EVERY_ITERATIONS: u32 = 100;

/// Short wait for a queue slot before the enqueue fails.
const ENQUEUE_TIMEOUT: Duration = Duration::from_millis(10);

/// Bound on each queue pop so the loop re-checks its running flag.
const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Grace period for the writer task to drain and close files on stop.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Resolved writer configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub max_file_size_bytes: u64,
    pub max_files: usize,
    pub queue_depth: usize,
}

impl StorageConfig {
    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self {
            root: settings.root.clone(),
            max_file_size_bytes: settings.max_file_size_mb * 1024 * 1024,
            max_files: STORAGE_MAX_FILES,
            queue_depth: STORAGE_QUEUE_SIZE,
        }
    }
}

/// Cloneable producer handle to the storage queue.
#[derive(Clone)]
pub struct StorageHandle {
    tx: BoundedSender<StorageFrame>,
    running: Arc<AtomicBool>,
    stats: Arc<RwLock<StorageStats>>,
}

impl StorageHandle {
    /// Timestamp `payload` and enqueue it for the writer.
    ///
    /// Fails fast: an empty or oversized payload is rejected, a stopped
    /// writer is rejected, and a queue that stays full past the short
    /// enqueue timeout surfaces as [`LoggerError::QueueFull`] so the caller
    /// can count the drop.
    pub async fn write(&self, source_id: u8, data_type: DataType, payload: &[u8]) -> Result<()> {
        if payload.is_empty() || payload.len() > MAX_PAYLOAD_LEN {
            return Err(LoggerError::Storage(format!(
                "invalid payload length {}",
                payload.len()
            )));
        }
        if !self.running.load(Ordering::SeqCst) {
            return Err(LoggerError::InvalidState("storage writer not running".into()));
        }
        let frame = StorageFrame::new(source_id, data_type, payload, now_micros());
        self.tx.push_timeout(frame, ENQUEUE_TIMEOUT).await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> StorageStats {
        read_lock(&self.stats).clone()
    }

    pub fn reset_stats(&self) {
        write_lock(&self.stats).reset();
    }

    /// Frames currently waiting in the queue.
    pub fn queued_frames(&self) -> usize {
        self.tx.queued()
    }
}

/// Owns the writer task and its queue.
pub struct StorageWriter {
    config: StorageConfig,
    handle: StorageHandle,
    rx: Option<BoundedReceiver<StorageFrame>>,
    join: Option<JoinHandle<()>>,
}

impl StorageWriter {
    pub fn new(config: StorageConfig) -> Self {
        let (tx, rx) = bounded(config.queue_depth.max(1));
        let handle = StorageHandle {
            tx,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RwLock::new(StorageStats::default())),
        };
        Self {
            config,
            handle,
            rx: Some(rx),
            join: None,
        }
    }

    /// Create the storage root and spawn the writer task. A root that cannot
    /// be created is fatal; nothing downstream can run without it.
    pub fn start(&mut self) -> Result<()> {
        if self.rx.is_none() {
            return Err(LoggerError::InvalidState(
                "storage writer already started".into(),
            ));
        }
        std::fs::create_dir_all(&self.config.root)?;
        // Checked non-empty above; take after the fallible setup so a failed
        // start leaves the writer startable.
        let Some(rx) = self.rx.take() else {
            return Err(LoggerError::InvalidState(
                "storage writer already started".into(),
            ));
        };

        self.handle.running.store(true, Ordering::SeqCst);
        self.join = Some(tokio::spawn(writer_loop(
            self.config.clone(),
            Arc::clone(&self.handle.running),
            Arc::clone(&self.handle.stats),
            rx,
        )));
        info!("storage writer started, root {:?}", self.config.root);
        Ok(())
    }

    /// Signal the writer to stop and wait for it to drain and close files.
    pub async fn stop(&mut self) {
        self.handle.running.store(false, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if tokio::time::timeout(STOP_GRACE, join).await.is_err() {
                warn!("storage writer did not exit within grace period");
            }
        }
        info!("storage writer stopped");
    }

    pub fn handle(&self) -> StorageHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> StorageStats {
        self.handle.stats()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }
}

struct LogFile {
    path: PathBuf,
    file: BufWriter<File>,
    data_type: DataType,
    current_size: u64,
    record_count: u32,
}

/// Create a fresh timestamped log file for `data_type`. A name collision
/// (rotation within one second) gets a numeric suffix rather than truncating
/// the previous file.
fn open_log_file(config: &StorageConfig, data_type: DataType) -> Result<LogFile> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    for attempt in 0..1000u32 {
        let name = if attempt == 0 {
            format!("{}_{stamp}.bin", data_type.prefix())
        } else {
            format!("{}_{stamp}_{attempt}.bin", data_type.prefix())
        };
        let path = config.root.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                return Ok(LogFile {
                    path,
                    file: BufWriter::new(file),
                    data_type,
                    current_size: 0,
                    record_count: 0,
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(LoggerError::Storage("could not allocate a log filename".into()))
}

fn handle_frame(
    config: &StorageConfig,
    stats: &RwLock<StorageStats>,
    slots: &mut [Option<LogFile>],
    frame: StorageFrame,
) {
    let slot_idx = match slots
        .iter()
        .position(|s| s.as_ref().is_some_and(|f| f.data_type == frame.data_type))
    {
        Some(idx) => idx,
        None => {
            let Some(free) = slots.iter().position(Option::is_none) else {
                write_lock(stats).record_error();
                warn!("no free file slot for {:?} frame", frame.data_type);
                return;
            };
            match open_log_file(config, frame.data_type) {
                Ok(log) => {
                    info!("opened log file {:?}", log.path);
                    slots[free] = Some(log);
                    write_lock(stats).files_created += 1;
                    free
                }
                Err(e) => {
                    write_lock(stats).record_error();
                    error!("failed to open log file: {e}");
                    return;
                }
            }
        }
    };

    let Some(log) = slots[slot_idx].as_mut() else {
        return;
    };

    let encoded = frame.encode();
    match log.file.write_all(&encoded) {
        Ok(()) => {
            log.current_size += encoded.len() as u64;
            log.record_count = log.record_count.wrapping_add(1);
            if log.record_count % FLUSH_EVERY_RECORDS == 0 {
                if let Err(e) = log.file.flush() {
                    warn!("flush failed for {:?}: {e}", log.path);
                }
            }
            write_lock(stats).record_write(encoded.len(), frame.timestamp_us);
        }
        Err(e) => {
            write_lock(stats).record_error();
            error!("write failed for {:?}: {e}", log.path);
        }
    }

    if log.current_size >= config.max_file_size_bytes {
        info!(
            "rotating {:?} at {} bytes, {} records",
            log.path, log.current_size, log.record_count
        );
        if let Err(e) = log.file.flush() {
            warn!("flush on rotation failed for {:?}: {e}", log.path);
        }
        slots[slot_idx] = None;
        write_lock(stats).files_rotated += 1;
    }
}

fn flush_all(slots: &mut [Option<LogFile>]) {
    for log in slots.iter_mut().flatten() {
        if let Err(e) = log.file.flush() {
            warn!("periodic flush failed for {:?}: {e}", log.path);
        }
    }
}

fn close_all(slots: &mut [Option<LogFile>]) {
    for slot in slots.iter_mut() {
        if let Some(mut log) = slot.take() {
            if let Err(e) = log.file.flush() {
                warn!("flush on close failed for {:?}: {e}", log.path);
            }
            info!("closed log file {:?}", log.path);
        }
    }
}

async fn writer_loop(
    config: StorageConfig,
    running: Arc<AtomicBool>,
    stats: Arc<RwLock<StorageStats>>,
    mut rx: BoundedReceiver<StorageFrame>,
) {
    info!("storage task started");
    let mut slots: Vec<Option<LogFile>> = (0..config.max_files).map(|_| None).collect();
    let mut iterations: u32 = 0;

    while running.load(Ordering::Relaxed) {
        if let Some(frame) = rx.pop_timeout(POP_TIMEOUT).await {
            handle_frame(&config, &stats, &mut slots, frame);
        }
        iterations = iterations.wrapping_add(1);
        if iterations % FLUSH_ALL_EVERY_ITERATIONS == 0 {
            flush_all(&mut slots);
        }
    }

    // Drain whatever producers enqueued before the stop signal.
    while let Some(frame) = rx.try_pop() {
        handle_frame(&config, &stats, &mut slots, frame);
    }
    close_all(&mut slots);
    info!("storage task stopped");
}
