//! datalogd: a multi-source data acquisition and logging service.
//!
//! The pipeline is a fixed set of cooperating async tasks joined by bounded
//! queues:
//!
//! - [`acquisition::analog`] samples the analog channels periodically,
//!   filters each reading, and queues [`acquisition::SamplePacket`]s.
//! - [`acquisition::serial`] frames incoming serial bytes into
//!   [`acquisition::SerialPacket`]s, one reader task per port.
//! - [`coordinator`] is the single consumer of every acquisition queue and
//!   forwards packets to storage.
//! - [`storage`] appends checksummed frames to rotating per-type log files.
//!
//! Backpressure is explicit: a full queue drops at the producer and is
//! counted, never waited on indefinitely. [`logger::DataLogger`] assembles
//! the stages and exposes the control surface; [`hal::Hardware`] is the seam
//! that swaps real converters and ports for mocks in tests.

pub mod acquisition;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod hal;
pub mod logger;
pub mod pipeline;
pub mod stats;
pub mod storage;
pub mod validation;

pub use config::{ConfigRegistry, Settings};
pub use error::{LoggerError, Result};
pub use logger::DataLogger;
