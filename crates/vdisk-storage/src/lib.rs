#![warn(missing_docs)]

//! vdisk storage subsystem: simulated block device, allocation policies, compaction, fault injection
//!
//! This crate models a fixed-size array of blocks with per-block state and
//! ownership. It provides contiguous, fragmented and hole-search allocation,
//! in-place defragmentation, random bad-block injection with probabilistic
//! repair, utilization analytics, and write-through snapshot persistence.

pub mod allocator;
pub mod analytics;
pub mod block;
pub mod defrag;
pub mod engine;
pub mod error;
pub mod fault;
pub mod log;
pub mod persist;
pub mod state;

pub use allocator::{Allocation, AllocationStrategy};
pub use analytics::{DiskStats, FileSummary, FreeSpaceReport};
pub use block::{BlockState, BlockView, Extent, FileEntry, FileId, FileStatus};
pub use defrag::DefragReport;
pub use engine::{DeleteReport, DiskEngine, EngineConfig, UndeleteReport};
pub use error::{ErrorKind, StorageError, StorageResult};
pub use fault::{FaultRng, InjectReport, RepairReport};
pub use log::ActivityLog;
pub use persist::{DeviceSnapshot, FileSnapshotStore, MemorySnapshotStore, SnapshotFormat, SnapshotStore};
pub use state::{DeletedRecord, DeviceState};
