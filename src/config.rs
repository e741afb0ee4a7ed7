//! Configuration management.
//!
//! Two layers live here:
//!
//! - [`Settings`]: the serde-backed configuration tree, loadable from a TOML
//!   file through the `config` crate and saveable back to disk. Missing
//!   fields fall back to defaults, so an empty file (or no file at all)
//!   yields a fully usable configuration.
//! - [`ConfigRegistry`]: the shared runtime registry handed to every task.
//!   It is read-mostly; acquisition tasks take a snapshot of their channel's
//!   config once per sampling cycle, and writes go through validated update
//!   entry points. A task may run one more cycle with a stale value before
//!   seeing an update; that eventual consistency is acceptable for sampling
//!   parameters.

use crate::error::{LoggerError, Result};
use crate::stats::{read_lock, write_lock};
use crate::validation;
use config::Config;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Number of analog input channels on the target board.
pub const ADC_CHANNEL_COUNT: usize = 2;

/// Number of serial ports on the target board.
pub const UART_PORT_COUNT: usize = 2;

/// Per-channel analog acquisition configuration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub sample_rate_hz: u32,
    /// Full-scale input range of the converter, in volts.
    pub voltage_scale: f32,
    /// Exponential filter coefficient in (0, 1]; 1.0 disables smoothing.
    pub filter_alpha: f32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate_hz: 100,
            voltage_scale: 4.0,
            filter_alpha: 0.1,
        }
    }
}

/// Per-port serial acquisition configuration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PortConfig {
    pub enabled: bool,
    pub baud_rate: u32,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            baud_rate: 115_200,
        }
    }
}

/// Storage writer configuration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory log files are created in.
    pub root: PathBuf,
    /// Rotation threshold per log file.
    pub max_file_size_mb: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            max_file_size_mb: 100,
        }
    }
}

/// Top-level configuration tree.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub device_name: String,
    pub channels: Vec<ChannelConfig>,
    pub ports: Vec<PortConfig>,
    pub storage: StorageSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name: "datalogd".to_string(),
            channels: vec![ChannelConfig::default(); ADC_CHANNEL_COUNT],
            ports: vec![
                PortConfig {
                    enabled: true,
                    baud_rate: 9_600,
                },
                PortConfig {
                    enabled: true,
                    baud_rate: 115_200,
                },
            ],
            storage: StorageSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file, falling back to defaults
    /// for anything the file does not specify.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.normalize();
        settings.validate()?;
        Ok(settings)
    }

    /// Persist the current settings as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let rendered =
            toml::to_string_pretty(self).map_err(|e| LoggerError::Serialization(e.to_string()))?;
        std::fs::write(path, rendered)?;
        Ok(())
    }

    /// Pad the channel/port tables out to the board's fixed counts so every
    /// index in `0..ADC_CHANNEL_COUNT` / `0..UART_PORT_COUNT` is present.
    fn normalize(&mut self) {
        self.channels.truncate(ADC_CHANNEL_COUNT);
        while self.channels.len() < ADC_CHANNEL_COUNT {
            self.channels.push(ChannelConfig::default());
        }
        self.ports.truncate(UART_PORT_COUNT);
        while self.ports.len() < UART_PORT_COUNT {
            self.ports.push(PortConfig::default());
        }
    }

    /// Check every field against the supported ranges. Disabled channels and
    /// ports are not validated; they may hold placeholder values.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() {
            return Err(LoggerError::Configuration(
                "device_name cannot be empty".into(),
            ));
        }
        for (i, ch) in self.channels.iter().enumerate() {
            if !ch.enabled {
                continue;
            }
            validation::is_valid_sample_rate(ch.sample_rate_hz)
                .map_err(|e| LoggerError::Configuration(format!("channel {i}: {e}")))?;
            validation::is_valid_filter_alpha(ch.filter_alpha)
                .map_err(|e| LoggerError::Configuration(format!("channel {i}: {e}")))?;
            validation::is_valid_voltage_scale(ch.voltage_scale)
                .map_err(|e| LoggerError::Configuration(format!("channel {i}: {e}")))?;
        }
        for (i, port) in self.ports.iter().enumerate() {
            if !port.enabled {
                continue;
            }
            validation::is_valid_baud_rate(port.baud_rate)
                .map_err(|e| LoggerError::Configuration(format!("port {i}: {e}")))?;
        }
        validation::is_valid_max_file_size_mb(self.storage.max_file_size_mb)
            .map_err(|e| LoggerError::Configuration(format!("storage: {e}")))?;
        Ok(())
    }
}

/// Shared runtime configuration registry.
///
/// Handed to each task as an `Arc<ConfigRegistry>` at construction. Reads
/// return snapshots, never live references; updates validate the candidate
/// value first and leave the registry unchanged on rejection.
#[derive(Debug)]
pub struct ConfigRegistry {
    inner: RwLock<Settings>,
}

impl ConfigRegistry {
    pub fn new(mut settings: Settings) -> Result<Self> {
        settings.normalize();
        settings.validate()?;
        Ok(Self {
            inner: RwLock::new(settings),
        })
    }

    /// Full snapshot of the current settings.
    pub fn snapshot(&self) -> Settings {
        read_lock(&self.inner).clone()
    }

    /// Per-cycle snapshot used by the sampler. `channel` must already be
    /// validated; the sampler only indexes channels it was constructed with.
    pub(crate) fn channel(&self, channel: usize) -> ChannelConfig {
        read_lock(&self.inner).channels[channel].clone()
    }

    pub(crate) fn port(&self, port: usize) -> PortConfig {
        read_lock(&self.inner).ports[port].clone()
    }

    /// Validated channel config lookup for the public surface.
    pub fn get_channel_config(&self, channel: u8) -> Result<ChannelConfig> {
        if (channel as usize) >= ADC_CHANNEL_COUNT {
            return Err(LoggerError::InvalidChannel(channel));
        }
        Ok(self.channel(channel as usize))
    }

    /// Validated port config lookup for the public surface.
    pub fn get_port_config(&self, port: u8) -> Result<PortConfig> {
        if (port as usize) >= UART_PORT_COUNT {
            return Err(LoggerError::InvalidPort(port));
        }
        Ok(self.port(port as usize))
    }

    pub fn storage(&self) -> StorageSettings {
        read_lock(&self.inner).storage.clone()
    }

    pub fn device_name(&self) -> String {
        read_lock(&self.inner).device_name.clone()
    }

    /// Update one analog channel. Validates before applying; on rejection
    /// the registry is left unchanged.
    pub fn update_channel(
        &self,
        channel: u8,
        enabled: bool,
        sample_rate_hz: u32,
        filter_alpha: f32,
    ) -> Result<()> {
        if (channel as usize) >= ADC_CHANNEL_COUNT {
            return Err(LoggerError::InvalidChannel(channel));
        }
        if enabled {
            validation::is_valid_sample_rate(sample_rate_hz)
                .map_err(|e| LoggerError::Configuration(e.into()))?;
            validation::is_valid_filter_alpha(filter_alpha)
                .map_err(|e| LoggerError::Configuration(e.into()))?;
        }
        let mut settings = write_lock(&self.inner);
        let ch = &mut settings.channels[channel as usize];
        ch.enabled = enabled;
        ch.sample_rate_hz = sample_rate_hz;
        ch.filter_alpha = filter_alpha;
        Ok(())
    }

    /// Update one serial port. Validates before applying.
    pub fn update_port(&self, port: u8, enabled: bool, baud_rate: u32) -> Result<()> {
        if (port as usize) >= UART_PORT_COUNT {
            return Err(LoggerError::InvalidPort(port));
        }
        if enabled {
            validation::is_valid_baud_rate(baud_rate)
                .map_err(|e| LoggerError::Configuration(e.into()))?;
        }
        let mut settings = write_lock(&self.inner);
        let p = &mut settings.ports[port as usize];
        p.enabled = enabled;
        p.baud_rate = baud_rate;
        Ok(())
    }

    /// Update the storage rotation threshold.
    pub fn update_storage(&self, max_file_size_mb: u64) -> Result<()> {
        validation::is_valid_max_file_size_mb(max_file_size_mb)
            .map_err(|e| LoggerError::Configuration(e.into()))?;
        write_lock(&self.inner).storage.max_file_size_mb = max_file_size_mb;
        Ok(())
    }
}
