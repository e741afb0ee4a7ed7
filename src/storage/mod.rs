//! Checksummed, rotating append-only storage.
//!
//! [`frame`] defines the on-disk record format and a replay helper;
//! [`writer`] owns the single writer task, its bounded input queue, and file
//! rotation.

pub mod frame;
pub mod writer;

pub use frame::{read_frames, DataType, StorageFrame, FRAME_HEADER_LEN, MAX_PAYLOAD_LEN, STORAGE_MAGIC};
pub use writer::{StorageConfig, StorageHandle, StorageWriter, STORAGE_MAX_FILES, STORAGE_QUEUE_SIZE};
