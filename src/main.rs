//! CLI entry point for datalogd.
//!
//! Runs the acquisition pipeline against simulated hardware:
//!
//! ```bash
//! datalogd run --config config.toml --duration 30
//! ```
//!
//! Without `--duration` the logger runs until Ctrl-C. `init-config` writes a
//! default configuration file to edit and load back.

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use datalogd::hal::mock::MockHardware;
use datalogd::{DataLogger, Settings};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser)]
#[command(name = "datalogd")]
#[command(about = "Multi-source data acquisition and logging service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the logger
    Run {
        /// Configuration file (TOML); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration: Option<u64>,

        /// Seconds between status summaries
        #[arg(long, default_value = "10")]
        status_interval: u64,

        /// Base voltage fed to the simulated analog channels
        #[arg(long, default_value = "1.5")]
        voltage: f32,

        /// Noise amplitude added to the simulated readings
        #[arg(long, default_value = "0.05")]
        noise: f32,
    },

    /// Write a default configuration file
    InitConfig {
        /// Output path
        #[arg(default_value = "config.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            duration,
            status_interval,
            voltage,
            noise,
        } => {
            run(
                config,
                duration.map(Duration::from_secs),
                Duration::from_secs(status_interval.max(1)),
                voltage,
                noise,
            )
            .await
        }
        Commands::InitConfig { path } => {
            Settings::default().save(&path)?;
            info!("wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

async fn run(
    config: Option<PathBuf>,
    duration: Option<Duration>,
    status_interval: Duration,
    voltage: f32,
    noise: f32,
) -> Result<()> {
    let settings = Settings::load(config.as_deref())?;
    info!("configuration loaded for {}", settings.device_name);

    let hardware = Arc::new(MockHardware::with_constant_voltage(voltage));
    for channel in 0..settings.channels.len() as u8 {
        hardware.set_noise(channel, noise);
    }

    let mut logger = DataLogger::new(settings, hardware)?;
    logger.start().await?;

    let mut status = tokio::time::interval(status_interval);
    status.tick().await; // first tick is immediate

    let deadline = duration.map(|d| tokio::time::Instant::now() + d);
    loop {
        let timed_out = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = status.tick() => logger.print_status(),
            _ = timed_out => {
                info!("run duration elapsed");
                break;
            }
            result = signal::ctrl_c() => {
                result?;
                info!("interrupt received, shutting down");
                break;
            }
        }
    }

    logger.print_status();
    logger.stop().await;
    Ok(())
}
