//! Error types for the simulated device.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::allocator::AllocationStrategy;
use crate::block::FileId;

/// Result type alias for device operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Broad category of a failure, reported alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No space matching the requested policy. Nothing was mutated.
    AllocationFailure,
    /// A snapshot could not be written or read back.
    PersistenceFailure,
    /// The request was rejected before touching device state.
    InvalidInput,
    /// The referenced file or record does not exist.
    NotFound,
}

/// Error variants for device operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No run of free blocks reached the requested length.
    #[error("No contiguous space: no run of {requested} free blocks")]
    NoContiguousSpace {
        /// Requested block count.
        requested: usize,
    },

    /// Fewer free blocks than requested exist on the whole device.
    #[error("Insufficient free blocks: requested {requested}, available {available}")]
    InsufficientFreeBlocks {
        /// Requested block count.
        requested: usize,
        /// Free blocks on the device.
        available: usize,
    },

    /// No hole is large enough for the requested size.
    #[error("No suitable hole for {requested} blocks using {strategy}")]
    NoSuitableHole {
        /// Requested block count.
        requested: usize,
        /// Strategy in effect.
        strategy: AllocationStrategy,
    },

    /// The request parameters are invalid.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The file does not exist or is not active.
    #[error("File not found: {file_id}")]
    FileNotFound {
        /// The requested file id.
        file_id: FileId,
    },

    /// There is no deleted file to restore.
    #[error("Nothing to undelete")]
    NothingToUndelete,

    /// Not enough free blocks to restore the last deleted file.
    #[error("Cannot undelete file {file_id}: need {needed} free blocks, available {available}")]
    UndeleteNoSpace {
        /// The file awaiting restore.
        file_id: FileId,
        /// Blocks needed.
        needed: usize,
        /// Free blocks on the device.
        available: usize,
    },

    /// The file id counter cannot advance any further.
    #[error("File ids exhausted: {next} is the last representable id")]
    FileIdsExhausted {
        /// The counter value that could not be handed out.
        next: FileId,
    },

    /// Wraps standard I/O errors from snapshot storage.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {reason}")]
    SerializationError {
        /// Description of the error.
        reason: String,
    },

    /// Snapshot is structurally invalid.
    #[error("Corrupted snapshot: {reason}")]
    CorruptedSnapshot {
        /// Description of the corruption.
        reason: String,
    },
}

impl StorageError {
    /// Returns the failure category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NoContiguousSpace { .. }
            | StorageError::InsufficientFreeBlocks { .. }
            | StorageError::NoSuitableHole { .. }
            | StorageError::UndeleteNoSpace { .. }
            | StorageError::FileIdsExhausted { .. } => ErrorKind::AllocationFailure,
            StorageError::InvalidInput(_) => ErrorKind::InvalidInput,
            StorageError::FileNotFound { .. } | StorageError::NothingToUndelete => {
                ErrorKind::NotFound
            }
            StorageError::IoError(_)
            | StorageError::SerializationError { .. }
            | StorageError::CorruptedSnapshot { .. } => ErrorKind::PersistenceFailure,
        }
    }

    pub(crate) fn corrupted(reason: impl Into<String>) -> Self {
        StorageError::CorruptedSnapshot {
            reason: reason.into(),
        }
    }
}
