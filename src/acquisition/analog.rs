//! Periodic analog sampling task.
//!
//! One task iterates all enabled channels at a period derived from the first
//! enabled channel's sample rate. Each cycle it reads the hardware, applies
//! the per-channel exponential filter, and try-pushes a [`SamplePacket`] onto
//! that channel's bounded queue. Queue-full is deliberate backpressure: the
//! sample is counted as a drop and the task moves on without blocking.
//!
//! Pacing uses absolute deadlines (`sleep_until`), not relative sleeps, so
//! scheduling jitter does not accumulate into drift. Cancellation is
//! cooperative: the task checks its running flag once per cycle and exits
//! instead of sleeping once it is cleared.

use crate::acquisition::SamplePacket;
use crate::clock::now_micros;
use crate::config::{ADC_CHANNEL_COUNT, ConfigRegistry};
use crate::error::{LoggerError, Result};
use crate::hal::Hardware;
use crate::pipeline::{bounded, BoundedReceiver, BoundedSender};
use crate::stats::{read_lock, write_lock, ChannelStats};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

/// Depth of each per-channel output queue. Sized for matched producer and
/// consumer rates.
pub const ADC_QUEUE_SIZE: usize = 10;

/// Single-pole recursive low-pass filter.
///
/// `filtered = alpha * sample + (1 - alpha) * filtered_prev` once
/// initialized; the first sample initializes the state directly.
#[derive(Debug, Default)]
pub struct ExpFilter {
    initialized: bool,
    value: f32,
}

impl ExpFilter {
    pub fn apply(&mut self, sample: f32, alpha: f32) -> f32 {
        if self.initialized {
            self.value = alpha * sample + (1.0 - alpha) * self.value;
        } else {
            self.value = sample;
            self.initialized = true;
        }
        self.value
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}

/// Read side of one channel shared with the snapshot surfaces.
#[derive(Clone)]
pub(crate) struct ChannelShared {
    stats: Arc<RwLock<ChannelStats>>,
    latest: watch::Receiver<Option<SamplePacket>>,
    sender: BoundedSender<SamplePacket>,
}

impl ChannelShared {
    pub(crate) fn stats(&self) -> ChannelStats {
        read_lock(&self.stats).clone()
    }

    pub(crate) fn latest(&self) -> Option<SamplePacket> {
        self.latest.borrow().clone()
    }

    pub(crate) fn reset_stats(&self) {
        write_lock(&self.stats).reset();
    }

    pub(crate) fn queued(&self) -> usize {
        self.sender.queued()
    }
}

/// State owned by the sampling task for one channel.
struct ChannelTaskState {
    channel: u8,
    sequence: u32,
    filter: ExpFilter,
    tx: BoundedSender<SamplePacket>,
    latest_tx: watch::Sender<Option<SamplePacket>>,
    stats: Arc<RwLock<ChannelStats>>,
}

/// The periodic analog acquisition task and its shared read handles.
pub struct AnalogSampler {
    registry: Arc<ConfigRegistry>,
    hardware: Arc<dyn Hardware>,
    running: Arc<AtomicBool>,
    shared: Vec<ChannelShared>,
    task_state: Option<Vec<ChannelTaskState>>,
    join: Option<JoinHandle<()>>,
}

impl AnalogSampler {
    /// Allocate queues and channel contexts. Returns the receivers the
    /// coordination stage will drain, one per channel.
    pub fn new(
        registry: Arc<ConfigRegistry>,
        hardware: Arc<dyn Hardware>,
    ) -> (Self, Vec<BoundedReceiver<SamplePacket>>) {
        let mut shared = Vec::with_capacity(ADC_CHANNEL_COUNT);
        let mut task_state = Vec::with_capacity(ADC_CHANNEL_COUNT);
        let mut receivers = Vec::with_capacity(ADC_CHANNEL_COUNT);

        for channel in 0..ADC_CHANNEL_COUNT {
            let (tx, rx) = bounded(ADC_QUEUE_SIZE);
            let (latest_tx, latest_rx) = watch::channel(None);
            let stats = Arc::new(RwLock::new(ChannelStats::default()));

            shared.push(ChannelShared {
                stats: Arc::clone(&stats),
                latest: latest_rx,
                sender: tx.clone(),
            });
            task_state.push(ChannelTaskState {
                channel: channel as u8,
                sequence: 0,
                filter: ExpFilter::default(),
                tx,
                latest_tx,
                stats,
            });
            receivers.push(rx);
        }

        let sampler = Self {
            registry,
            hardware,
            running: Arc::new(AtomicBool::new(false)),
            shared,
            task_state: Some(task_state),
            join: None,
        };
        (sampler, receivers)
    }

    /// Spawn the sampling task. The task can be started once per sampler.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            warn!("analog sampler already running");
            return Ok(());
        }
        let channels = self.task_state.take().ok_or_else(|| {
            LoggerError::InvalidState("analog sampler cannot be restarted".into())
        })?;

        self.running.store(true, Ordering::SeqCst);
        let registry = Arc::clone(&self.registry);
        let hardware = Arc::clone(&self.hardware);
        let running = Arc::clone(&self.running);
        self.join = Some(tokio::spawn(sampling_loop(
            registry, hardware, running, channels,
        )));
        Ok(())
    }

    /// Clear the running flag and wait a bounded grace period for the task
    /// to notice and exit.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let grace = current_period(&self.registry) * 2 + Duration::from_millis(50);
            if tokio::time::timeout(grace, join).await.is_err() {
                warn!("analog sampling task did not exit within grace period");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    fn channel_shared(&self, channel: u8) -> Result<&ChannelShared> {
        self.shared
            .get(channel as usize)
            .ok_or(LoggerError::InvalidChannel(channel))
    }

    /// Snapshot of one channel's statistics.
    pub fn stats(&self, channel: u8) -> Result<ChannelStats> {
        Ok(self.channel_shared(channel)?.stats())
    }

    /// The most recently queued sample for one channel, if any.
    pub fn latest_sample(&self, channel: u8) -> Result<Option<SamplePacket>> {
        Ok(self.channel_shared(channel)?.latest())
    }

    pub fn reset_stats(&self, channel: u8) -> Result<()> {
        self.channel_shared(channel)?.reset_stats();
        Ok(())
    }

    /// Number of samples currently waiting in one channel's queue.
    pub fn queued_samples(&self, channel: u8) -> Result<usize> {
        Ok(self.channel_shared(channel)?.queued())
    }
}

/// Sampling period derived from the first enabled channel's rate, re-read
/// every cycle so configuration updates take effect within one period.
fn current_period(registry: &ConfigRegistry) -> Duration {
    let snapshot = registry.snapshot();
    let rate = snapshot
        .channels
        .iter()
        .find(|ch| ch.enabled)
        .map(|ch| ch.sample_rate_hz)
        .unwrap_or(100)
        .max(1);
    Duration::from_micros(1_000_000 / u64::from(rate))
}

async fn sampling_loop(
    registry: Arc<ConfigRegistry>,
    hardware: Arc<dyn Hardware>,
    running: Arc<AtomicBool>,
    mut channels: Vec<ChannelTaskState>,
) {
    info!("analog sampling task started");

    let mut next_deadline = Instant::now();
    while running.load(Ordering::Relaxed) {
        let timestamp = now_micros();

        for state in channels.iter_mut() {
            let cfg = registry.channel(state.channel as usize);
            if !cfg.enabled {
                continue;
            }

            // Read failures are transient; count them and move to the next
            // channel. The next cycle retries naturally.
            let raw_value = match hardware.read_raw(state.channel).await {
                Ok(raw) => raw,
                Err(e) => {
                    write_lock(&state.stats).record_error();
                    debug!("ADC{} raw read failed: {e}", state.channel);
                    continue;
                }
            };
            let voltage = match hardware.read_voltage(state.channel).await {
                Ok(v) => v,
                Err(e) => {
                    write_lock(&state.stats).record_error();
                    debug!("ADC{} voltage read failed: {e}", state.channel);
                    continue;
                }
            };

            let filtered_voltage = state.filter.apply(voltage, cfg.filter_alpha);
            let sequence = state.sequence;
            state.sequence = state.sequence.wrapping_add(1);

            let packet = SamplePacket {
                timestamp_us: timestamp,
                channel: state.channel,
                raw_value,
                voltage,
                filtered_voltage,
                sequence,
            };

            match state.tx.try_push(packet.clone()) {
                Ok(()) => {
                    write_lock(&state.stats).record_sample(voltage, timestamp);
                    state.latest_tx.send_replace(Some(packet));
                }
                Err(_) => {
                    write_lock(&state.stats).record_drop();
                    warn!("ADC{} queue full, dropping sample", state.channel);
                }
            }
        }

        next_deadline += current_period(&registry);
        let now = Instant::now();
        if next_deadline < now {
            // Fell behind (stalled hardware read); realign rather than burst.
            next_deadline = now;
        }
        if !running.load(Ordering::Relaxed) {
            break;
        }
        sleep_until(next_deadline).await;
    }

    info!("analog sampling task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::hal::mock::MockHardware;

    fn test_registry(rate_hz: u32) -> Arc<ConfigRegistry> {
        let mut settings = Settings::default();
        for ch in settings.channels.iter_mut() {
            ch.sample_rate_hz = rate_hz;
        }
        Arc::new(ConfigRegistry::new(settings).expect("registry"))
    }

    #[test]
    fn filter_first_sample_initializes() {
        let mut filter = ExpFilter::default();
        assert_eq!(filter.apply(2.0, 0.1), 2.0);
        assert!((filter.apply(2.0, 0.1) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn filter_converges_geometrically() {
        // Seed the filter at 0, then feed a constant 2.0 V. After k samples
        // the error shrinks by (1 - alpha)^k.
        let mut filter = ExpFilter::default();
        filter.apply(0.0, 0.1);
        let mut last = 0.0;
        for _ in 0..10 {
            last = filter.apply(2.0, 0.1);
        }
        let expected = 2.0 * (1.0 - 0.9f32.powi(10));
        assert!(
            (last - expected).abs() < 1e-4,
            "expected {expected}, got {last}"
        );
        assert!((expected - 1.3026).abs() < 1e-3);
    }

    #[test]
    fn filter_alpha_one_tracks_input() {
        let mut filter = ExpFilter::default();
        filter.apply(5.0, 1.0);
        assert_eq!(filter.apply(-3.0, 1.0), -3.0);
    }

    #[tokio::test]
    async fn sequences_start_at_zero_and_are_contiguous() {
        let registry = test_registry(200);
        let hardware = Arc::new(MockHardware::with_constant_voltage(2.0));
        let (mut sampler, mut receivers) = AnalogSampler::new(registry, hardware);

        sampler.start().expect("start");
        tokio::time::sleep(Duration::from_millis(40)).await;
        sampler.stop().await;

        let mut sequences = Vec::new();
        while let Some(packet) = receivers[0].try_pop() {
            sequences.push(packet.sequence);
        }
        assert!(sequences.len() >= 2, "expected several packets");
        for (i, seq) in sequences.iter().enumerate() {
            assert_eq!(*seq, i as u32);
        }
    }

    #[tokio::test]
    async fn stalled_consumer_counts_exact_queue_capacity() {
        let registry = test_registry(500);
        let hardware = Arc::new(MockHardware::with_constant_voltage(1.0));
        let (mut sampler, receivers) = AnalogSampler::new(registry, hardware);

        // Keep receivers alive but never drain them.
        sampler.start().expect("start");
        tokio::time::sleep(Duration::from_millis(100)).await;
        sampler.stop().await;

        let stats = sampler.stats(0).expect("stats");
        assert_eq!(stats.total_samples as usize, ADC_QUEUE_SIZE);
        assert!(stats.dropped_samples > 0, "expected drops past capacity");
        drop(receivers);
    }

    #[tokio::test]
    async fn hardware_errors_are_counted_not_fatal() {
        let registry = test_registry(500);
        let hardware = Arc::new(MockHardware::with_constant_voltage(2.0));
        hardware.fail_next_reads(0, 3);
        let (mut sampler, mut receivers) = AnalogSampler::new(registry, Arc::clone(&hardware) as Arc<dyn crate::hal::Hardware>);

        sampler.start().expect("start");
        tokio::time::sleep(Duration::from_millis(50)).await;
        sampler.stop().await;

        let stats = sampler.stats(0).expect("stats");
        assert_eq!(stats.error_count, 3);
        assert!(stats.total_samples > 0, "sampling resumed after faults");
        assert!(receivers[0].try_pop().is_some());
    }

    #[tokio::test]
    async fn latest_sample_tracks_last_queued_packet() {
        let registry = test_registry(200);
        let hardware = Arc::new(MockHardware::with_constant_voltage(2.0));
        let (mut sampler, mut receivers) = AnalogSampler::new(registry, hardware);

        assert!(sampler.latest_sample(0).expect("channel").is_none());
        sampler.start().expect("start");
        tokio::time::sleep(Duration::from_millis(40)).await;
        sampler.stop().await;

        let latest = sampler.latest_sample(0).expect("channel").expect("sample");
        let mut last_queued = None;
        while let Some(packet) = receivers[0].try_pop() {
            last_queued = Some(packet);
        }
        assert_eq!(Some(latest), last_queued);
    }

    #[tokio::test]
    async fn restart_is_rejected() {
        let registry = test_registry(100);
        let hardware = Arc::new(MockHardware::new());
        let (mut sampler, _receivers) = AnalogSampler::new(registry, hardware);

        sampler.start().expect("start");
        sampler.stop().await;
        assert!(matches!(
            sampler.start(),
            Err(LoggerError::InvalidState(_))
        ));
    }
}
