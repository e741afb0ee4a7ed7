//! End-to-end pipeline tests: acquisition through coordination to storage,
//! replayed back off disk.

use datalogd::hal::mock::MockHardware;
use datalogd::hal::Hardware;
use datalogd::storage::{read_frames, DataType, StorageFrame};
use datalogd::{DataLogger, LoggerError, Settings};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn test_settings(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.storage.root = root.to_path_buf();
    settings
}

fn files_with_prefix(root: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = fs::read_dir(root)
        .expect("read dir")
        .map(|e| e.expect("entry").path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();
    paths.sort();
    paths
}

fn replay_all(paths: &[PathBuf]) -> Vec<StorageFrame> {
    let mut frames = Vec::new();
    for path in paths {
        frames.extend(read_frames(path).expect("replay"));
    }
    frames
}

#[tokio::test]
async fn every_queued_sample_reaches_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let hardware = Arc::new(MockHardware::with_constant_voltage(2.0));
    let mut logger = DataLogger::new(test_settings(dir.path()), hardware).expect("logger");

    logger.start().await.expect("start");
    tokio::time::sleep(Duration::from_millis(150)).await;
    logger.stop().await;

    // Producers stop before the coordinator and the coordinator before
    // storage, so nothing queued is lost on the way down.
    let mut pushed: u64 = 0;
    for ch in 0..2 {
        let stats = logger.get_channel_stats(ch).expect("stats");
        assert!(
            (2..=40).contains(&stats.total_samples),
            "ADC{ch}: {} samples in 150 ms at 100 Hz",
            stats.total_samples
        );
        assert_eq!(stats.dropped_samples, 0, "ADC{ch} dropped samples");
        assert_eq!(stats.min_voltage, 2.0);
        assert_eq!(stats.max_voltage, 2.0);
        assert!((stats.avg_voltage - 2.0).abs() < 1e-5);
        pushed += u64::from(stats.total_samples);
    }

    let frames = replay_all(&files_with_prefix(dir.path(), "adc_"));
    assert_eq!(frames.len() as u64, pushed);

    for frame in &frames {
        assert_eq!(frame.data_type, DataType::Analog);
        assert!(frame.verify_checksum());
        assert_eq!(frame.payload.len(), 8);
        let filtered = f32::from_le_bytes(frame.payload[..4].try_into().expect("4 bytes"));
        assert!((0.0..=4.0).contains(&filtered), "filtered {filtered} out of range");
    }

    // Both channels contributed.
    assert!(frames.iter().any(|f| f.source_id == 0));
    assert!(frames.iter().any(|f| f.source_id == 1));
}

#[tokio::test]
async fn serial_bytes_flow_through_to_their_own_log() {
    let dir = tempfile::tempdir().expect("tempdir");
    let hardware = Arc::new(MockHardware::new());
    hardware.push_serial(0, b"GPS,4807.038,N");
    hardware.push_serial(1, b"$TEMP,23.4");
    let mut logger =
        DataLogger::new(test_settings(dir.path()), Arc::clone(&hardware) as Arc<dyn Hardware>).expect("logger");

    logger.start().await.expect("start");
    tokio::time::sleep(Duration::from_millis(150)).await;
    logger.stop().await;

    let frames = replay_all(&files_with_prefix(dir.path(), "uart_"));
    assert_eq!(frames.len(), 2);
    let by_port = |port: u8| {
        frames
            .iter()
            .find(|f| f.source_id == port)
            .expect("frame for port")
    };
    assert_eq!(by_port(0).payload, b"GPS,4807.038,N");
    assert_eq!(by_port(1).payload, b"$TEMP,23.4");

    let stats = logger.get_serial_stats(0).expect("stats");
    assert_eq!(stats.total_packets, 1);
    assert_eq!(stats.total_bytes, 14);
}

#[tokio::test]
async fn disabled_channel_contributes_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = test_settings(dir.path());
    settings.channels[1].enabled = false;
    let hardware = Arc::new(MockHardware::with_constant_voltage(1.0));
    let mut logger = DataLogger::new(settings, hardware).expect("logger");

    logger.start().await.expect("start");
    tokio::time::sleep(Duration::from_millis(120)).await;
    logger.stop().await;

    let frames = replay_all(&files_with_prefix(dir.path(), "adc_"));
    assert!(!frames.is_empty());
    assert!(frames.iter().all(|f| f.source_id == 0));
    assert_eq!(
        logger.get_channel_stats(1).expect("stats").total_samples,
        0
    );
}

#[tokio::test]
async fn corruption_on_disk_is_caught_at_replay() {
    let dir = tempfile::tempdir().expect("tempdir");
    let hardware = Arc::new(MockHardware::with_constant_voltage(1.0));
    let mut logger = DataLogger::new(test_settings(dir.path()), hardware).expect("logger");

    logger.start().await.expect("start");
    tokio::time::sleep(Duration::from_millis(100)).await;
    logger.stop().await;

    let files = files_with_prefix(dir.path(), "adc_");
    assert_eq!(files.len(), 1);
    assert!(read_frames(&files[0]).is_ok());

    // Flip one bit in the last frame's payload.
    let mut contents = fs::read(&files[0]).expect("read");
    let last = contents.len() - 1;
    contents[last] ^= 0x01;
    fs::write(&files[0], &contents).expect("rewrite");

    assert!(matches!(
        read_frames(&files[0]),
        Err(LoggerError::CorruptFrame(_))
    ));
}

#[tokio::test]
async fn config_updates_apply_while_running() {
    let dir = tempfile::tempdir().expect("tempdir");
    let hardware = Arc::new(MockHardware::with_constant_voltage(1.0));
    let mut logger = DataLogger::new(test_settings(dir.path()), hardware).expect("logger");
    let registry = logger.registry();

    logger.start().await.expect("start");
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Slow channel 0 to 10 Hz mid-run; the sampler picks it up within a cycle.
    registry.update_channel(0, true, 10, 0.1).expect("update");
    assert_eq!(
        registry.get_channel_config(0).expect("config").sample_rate_hz,
        10
    );

    let before = logger.get_channel_stats(0).expect("stats").total_samples;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let after = logger.get_channel_stats(0).expect("stats").total_samples;
    logger.stop().await;

    let gained = after - before;
    assert!(
        gained <= 10,
        "expected roughly 10 Hz after the update, got {gained} samples in 300 ms"
    );
}
