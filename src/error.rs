//! Custom error types for the application.
//!
//! This module defines the primary error type, `LoggerError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of errors that can occur,
//! from configuration and file I/O issues to hardware faults and queue
//! backpressure.
//!
//! ## Error Taxonomy
//!
//! - **`Config` / `Configuration`**: parse errors from the `config` crate and
//!   semantic errors caught during validation (e.g. a sample rate outside the
//!   supported range). Configuration errors are rejected synchronously at the
//!   update call and never leave the registry in a partially-applied state.
//! - **`Io`**: standard `std::io::Error`, covering all file I/O.
//! - **`Hardware`**: transient faults reported by the hardware access layer.
//!   Acquisition tasks absorb these into per-channel error counters; they are
//!   never fatal.
//! - **`QueueFull`**: the resource-exhaustion result. A full bounded queue is
//!   a deliberate backpressure signal, handled as a counted drop at the
//!   producer, never as a blocking wait or a panic.
//! - **`InvalidChannel` / `InvalidPort`**: index validation at API
//!   boundaries. Hot paths index pre-validated arrays and do not re-check.
//! - **`InvalidState`**: lifecycle misuse (starting a component twice,
//!   writing through a stopped writer).
//!
//! Only startup-time resource allocation failures propagate as hard errors to
//! the subsystem initializer; all per-sample and per-packet faults are
//! absorbed locally into statistics counters.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, LoggerError>;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Queue full, item dropped")]
    QueueFull,

    #[error("Invalid analog channel: {0}")]
    InvalidChannel(u8),

    #[error("Invalid serial port: {0}")]
    InvalidPort(u8),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt storage frame: {0}")]
    CorruptFrame(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert_with_question_mark() {
        fn fails() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        match fails() {
            Err(LoggerError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(
            LoggerError::InvalidChannel(7).to_string(),
            "Invalid analog channel: 7"
        );
        assert_eq!(
            LoggerError::QueueFull.to_string(),
            "Queue full, item dropped"
        );
    }
}
