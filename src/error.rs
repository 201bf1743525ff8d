//! Error types for pstore
//!
//! Provides a unified error type for all operations. Errors are `Clone` so a
//! failed command can hand its error to the completion handler.

use thiserror::Error;

use crate::flash::FlashError;
use crate::service::RecordError;

/// Result type alias using StorageError
pub type Result<T> = std::result::Result<T, StorageError>;

/// Unified error type for pstore operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    // -------------------------------------------------------------------------
    // Registration Errors
    // -------------------------------------------------------------------------
    #[error("Allocation failed: {0}")]
    Alloc(#[from] AllocError),

    #[error("Unknown block handle (module {module_id}, block {block_id})")]
    UnknownHandle { module_id: u32, block_id: u32 },

    // -------------------------------------------------------------------------
    // Queue Errors
    // -------------------------------------------------------------------------
    #[error("Command queue full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("Write of {len} bytes at offset {offset} exceeds block of {size} bytes")]
    InvalidRange { offset: u16, len: usize, size: u16 },

    // -------------------------------------------------------------------------
    // Flash Errors
    // -------------------------------------------------------------------------
    #[error("Flash operation failed with hardware code {code:#x}")]
    FlashOpFailed { code: u32 },

    #[error("Flash access error: {0}")]
    Flash(#[from] FlashError),

    #[error("Block at {page:#x} is corrupt until re-initialized")]
    BlockCorrupt { page: u32 },

    #[error("Swap recovery pending for page {page:#x}")]
    RecoveryPending { page: u32 },

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Image File Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(String),

    #[error("Flash image error: {0}")]
    Image(String),
}

/// Block registration failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("Block size {size} outside {min}..={max}")]
    InvalidBlockSize { size: u16, min: u16, max: u16 },

    #[error("No free page left in the data region")]
    CapacityExceeded,

    #[error("More than {max} modules registered")]
    TooManyModules { max: u32 },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Image(err.to_string())
    }
}
