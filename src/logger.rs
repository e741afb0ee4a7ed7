//! Top-level logger assembly and its public control surface.
//!
//! [`DataLogger`] wires the acquisition tasks, the coordination stage, and
//! the storage writer together and owns their lifecycles. Start order is
//! sink-first (storage, then producers, then the coordinator); stop order is
//! producer-first so the coordinator can drain the queues before the writer
//! closes its files. System markers bracket every run in the storage log.

use crate::acquisition::analog::AnalogSampler;
use crate::acquisition::serial::SerialManager;
use crate::acquisition::SamplePacket;
use crate::config::{ConfigRegistry, Settings, ADC_CHANNEL_COUNT, UART_PORT_COUNT};
use crate::coordinator::Coordinator;
use crate::error::{LoggerError, Result};
use crate::hal::Hardware;
use crate::stats::{ChannelStats, SerialStats, StorageStats};
use crate::storage::{DataType, StorageConfig, StorageWriter};
use log::{info, warn};
use std::sync::Arc;

/// The assembled data logger.
///
/// A logger runs at most once; the acquisition tasks consume their state on
/// start, so a stopped logger is rebuilt rather than restarted.
pub struct DataLogger {
    registry: Arc<ConfigRegistry>,
    hardware: Arc<dyn Hardware>,
    storage: StorageWriter,
    sampler: AnalogSampler,
    serial: SerialManager,
    coordinator: Coordinator,
    running: bool,
}

impl DataLogger {
    /// Validate `settings` and wire every stage together. Nothing is spawned
    /// until [`start`](Self::start).
    pub fn new(settings: Settings, hardware: Arc<dyn Hardware>) -> Result<Self> {
        let registry = Arc::new(ConfigRegistry::new(settings)?);
        let storage = StorageWriter::new(StorageConfig::from_settings(&registry.storage()));
        let (sampler, analog_rx) = AnalogSampler::new(Arc::clone(&registry), Arc::clone(&hardware));
        let (serial, serial_rx) = SerialManager::new(Arc::clone(&registry), Arc::clone(&hardware));
        let coordinator = Coordinator::new(
            storage.handle(),
            analog_rx,
            sampler.running_flag(),
            serial_rx,
            serial.active_flags(),
        );

        Ok(Self {
            registry,
            hardware,
            storage,
            sampler,
            serial,
            coordinator,
            running: false,
        })
    }

    /// Shared configuration registry, for the control surfaces.
    pub fn registry(&self) -> Arc<ConfigRegistry> {
        Arc::clone(&self.registry)
    }

    /// Start every stage and write the startup marker.
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(LoggerError::InvalidState("logger already running".into()));
        }

        self.storage.start()?;
        self.write_marker("startup").await;
        self.serial.start()?;
        self.sampler.start()?;
        self.coordinator.start()?;

        self.running = true;
        info!("data logger started ({})", self.registry.device_name());
        Ok(())
    }

    /// Stop producers first so the coordinator can drain their queues, then
    /// write the shutdown marker and close storage.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.sampler.stop().await;
        self.serial.stop().await;
        self.coordinator.stop().await;
        self.write_marker("shutdown").await;
        self.storage.stop().await;

        self.running = false;
        info!("data logger stopped");
    }

    async fn write_marker(&self, event: &str) {
        let marker = format!("{} {}", event, self.registry.device_name());
        if let Err(e) = self
            .storage
            .handle()
            .write(0, DataType::System, marker.as_bytes())
            .await
        {
            warn!("could not record {event} marker: {e}");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_channel_active(&self, channel: u8) -> Result<bool> {
        let cfg = self.registry.get_channel_config(channel)?;
        Ok(cfg.enabled && self.sampler.is_running())
    }

    pub fn is_port_active(&self, port: u8) -> bool {
        self.serial.is_port_active(port)
    }

    /// The most recently acquired sample for one channel, if any.
    pub fn get_latest_sample(&self, channel: u8) -> Result<Option<SamplePacket>> {
        self.sampler.latest_sample(channel)
    }

    /// One-shot unfiltered hardware read, bypassing the acquisition pipeline.
    pub async fn instant_reading(&self, channel: u8) -> Result<f32> {
        if (channel as usize) >= ADC_CHANNEL_COUNT {
            return Err(LoggerError::InvalidChannel(channel));
        }
        self.hardware.read_voltage(channel).await
    }

    /// Transmit bytes out of a serial port. Independent of the reader task;
    /// works whether or not the port is being logged.
    pub async fn write_serial(&self, port: u8, data: &[u8]) -> Result<()> {
        if (port as usize) >= UART_PORT_COUNT {
            return Err(LoggerError::InvalidPort(port));
        }
        self.hardware.write_bytes(port, data).await
    }

    pub fn get_channel_stats(&self, channel: u8) -> Result<ChannelStats> {
        self.sampler.stats(channel)
    }

    pub fn get_serial_stats(&self, port: u8) -> Result<SerialStats> {
        self.serial.stats(port)
    }

    pub fn get_storage_stats(&self) -> StorageStats {
        self.storage.stats()
    }

    pub fn reset_channel_stats(&self, channel: u8) -> Result<()> {
        self.sampler.reset_stats(channel)
    }

    pub fn reset_serial_stats(&self, port: u8) -> Result<()> {
        self.serial.reset_stats(port)
    }

    pub fn reset_storage_stats(&self) {
        self.storage.handle().reset_stats();
    }

    /// Log a one-page status summary for the operator.
    pub fn print_status(&self) {
        info!(
            "status: {} running={}",
            self.registry.device_name(),
            self.running
        );
        for channel in 0..ADC_CHANNEL_COUNT as u8 {
            if let (Ok(cfg), Ok(stats)) = (
                self.registry.get_channel_config(channel),
                self.sampler.stats(channel),
            ) {
                info!(
                    "  ADC{channel}: enabled={} rate={}Hz samples={} drops={} errors={} \
                     last={:.3}V avg={:.3}V",
                    cfg.enabled,
                    cfg.sample_rate_hz,
                    stats.total_samples,
                    stats.dropped_samples,
                    stats.error_count,
                    self.sampler
                        .latest_sample(channel)
                        .ok()
                        .flatten()
                        .map(|s| s.filtered_voltage)
                        .unwrap_or(0.0),
                    stats.avg_voltage,
                );
            }
        }
        for port in 0..UART_PORT_COUNT as u8 {
            if let Ok(stats) = self.serial.stats(port) {
                info!(
                    "  UART{port}: active={} packets={} drops={} errors={} bytes={}",
                    self.is_port_active(port),
                    stats.total_packets,
                    stats.dropped_packets,
                    stats.error_count,
                    stats.total_bytes,
                );
            }
        }
        let storage = self.get_storage_stats();
        info!(
            "  storage: writes={} errors={} files={} rotations={} bytes={}",
            storage.total_writes,
            storage.write_errors,
            storage.files_created,
            storage.files_rotated,
            storage.bytes_written,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockHardware;
    use crate::storage::read_frames;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn test_settings(root: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.storage.root = root.to_path_buf();
        settings
    }

    fn files_with_prefix(root: &Path, prefix: &str) -> Vec<PathBuf> {
        fs::read_dir(root)
            .expect("read dir")
            .map(|e| e.expect("entry").path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(prefix))
            })
            .collect()
    }

    #[tokio::test]
    async fn run_is_bracketed_by_system_markers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hardware = Arc::new(MockHardware::with_constant_voltage(1.0));
        let mut logger =
            DataLogger::new(test_settings(dir.path()), hardware).expect("logger");

        logger.start().await.expect("start");
        assert!(logger.is_running());
        tokio::time::sleep(Duration::from_millis(60)).await;
        logger.stop().await;
        assert!(!logger.is_running());

        let files = files_with_prefix(dir.path(), "system_");
        assert_eq!(files.len(), 1);
        let frames = read_frames(&files[0]).expect("replay");
        assert_eq!(frames.len(), 2);
        assert!(frames[0].payload.starts_with(b"startup"));
        assert!(frames[1].payload.starts_with(b"shutdown"));
    }

    #[tokio::test]
    async fn acquired_samples_are_persisted_and_observable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hardware = Arc::new(MockHardware::with_constant_voltage(2.5));
        let mut logger =
            DataLogger::new(test_settings(dir.path()), hardware).expect("logger");

        logger.start().await.expect("start");
        tokio::time::sleep(Duration::from_millis(120)).await;

        let latest = logger
            .get_latest_sample(0)
            .expect("channel")
            .expect("a sample by now");
        assert!((latest.voltage - 2.5).abs() < 1e-3);

        let stats = logger.get_channel_stats(0).expect("stats");
        assert!(stats.total_samples > 0);
        logger.stop().await;

        let files = files_with_prefix(dir.path(), "adc_");
        assert_eq!(files.len(), 1);
        let frames = read_frames(&files[0]).expect("replay");
        assert!(!frames.is_empty());
        assert!(frames.iter().all(|f| f.payload.len() == 8));

        let storage = logger.get_storage_stats();
        assert!(storage.total_writes as usize >= frames.len());
    }

    #[tokio::test]
    async fn instant_reading_bypasses_the_pipeline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hardware = Arc::new(MockHardware::with_constant_voltage(1.25));
        let logger = DataLogger::new(test_settings(dir.path()), hardware).expect("logger");

        // Works without the tasks running.
        let reading = logger.instant_reading(1).await.expect("reading");
        assert!((reading - 1.25).abs() < 1e-3);
        assert!(matches!(
            logger.instant_reading(9).await,
            Err(LoggerError::InvalidChannel(9))
        ));
    }

    #[tokio::test]
    async fn serial_transmit_reaches_the_port() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hardware = Arc::new(MockHardware::new());
        let logger =
            DataLogger::new(test_settings(dir.path()), Arc::clone(&hardware) as Arc<dyn crate::hal::Hardware>).expect("logger");

        logger.write_serial(0, b"AT+RESET\r\n").await.expect("write");
        assert_eq!(hardware.written(0), b"AT+RESET\r\n");
        assert!(matches!(
            logger.write_serial(9, b"x").await,
            Err(LoggerError::InvalidPort(9))
        ));
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hardware = Arc::new(MockHardware::new());
        let mut logger =
            DataLogger::new(test_settings(dir.path()), hardware).expect("logger");

        logger.start().await.expect("start");
        assert!(matches!(
            logger.start().await,
            Err(LoggerError::InvalidState(_))
        ));
        logger.stop().await;
    }

    #[tokio::test]
    async fn stats_reset_from_the_surface() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hardware = Arc::new(MockHardware::with_constant_voltage(1.0));
        let mut logger =
            DataLogger::new(test_settings(dir.path()), hardware).expect("logger");

        logger.start().await.expect("start");
        tokio::time::sleep(Duration::from_millis(80)).await;
        logger.stop().await;

        assert!(logger.get_channel_stats(0).expect("stats").total_samples > 0);
        logger.reset_channel_stats(0).expect("reset");
        assert_eq!(logger.get_channel_stats(0).expect("stats").total_samples, 0);

        assert!(logger.get_storage_stats().total_writes > 0);
        logger.reset_storage_stats();
        assert_eq!(logger.get_storage_stats().total_writes, 0);
    }
}
