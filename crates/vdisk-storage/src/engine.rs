//! Device engine: serializes operations over one [`DeviceState`].
//!
//! This is the primary public API of the crate. Mutations hold the write lock
//! for the whole read-modify-log-persist sequence; analytics take the read
//! lock and never observe a half-applied operation. Persistence is
//! write-through and best-effort: a failed save is logged and the operation
//! still reports success.

use parking_lot::{Mutex, RwLock};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::allocator::{self, Allocation, AllocationStrategy};
use crate::analytics::{self, DiskStats, FileSummary, FreeSpaceReport};
use crate::block::{BlockState, BlockView, Extent, FileId, FileStatus};
use crate::defrag::{self, DefragReport};
use crate::error::{StorageError, StorageResult};
use crate::fault::{self, FaultRng, InjectReport, RepairReport};
use crate::log::DEFAULT_LOG_CAPACITY;
use crate::persist::{DeviceSnapshot, MemorySnapshotStore, SnapshotStore};
use crate::state::{DeletedRecord, DeviceState, DEFAULT_BLOCK_COUNT};

/// Configuration for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Blocks on a fresh device.
    pub block_count: usize,
    /// Activity log entries retained.
    pub log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_count: DEFAULT_BLOCK_COUNT,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Rejects zero-sized devices and logs.
    pub fn validate(&self) -> StorageResult<()> {
        if self.block_count == 0 {
            return Err(StorageError::InvalidInput(
                "block_count must be at least 1".to_string(),
            ));
        }
        if self.log_capacity == 0 {
            return Err(StorageError::InvalidInput(
                "log_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn fresh_state(&self) -> DeviceState {
        DeviceState::new(self.block_count, self.log_capacity)
    }
}

/// Result of deleting a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    /// The deleted file.
    pub file_id: FileId,
    /// Blocks returned to the free pool.
    pub freed_count: usize,
}

/// Result of restoring the last deleted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndeleteReport {
    /// The restored file.
    pub file_id: FileId,
    /// Blocks reclaimed.
    pub restored_count: usize,
    /// Whether the original block positions were reused.
    pub in_place: bool,
}

/// The simulated block device.
pub struct DiskEngine {
    config: EngineConfig,
    state: RwLock<DeviceState>,
    rng: Mutex<Box<dyn FaultRng + Send>>,
    store: Box<dyn SnapshotStore>,
}

impl DiskEngine {
    /// Opens the device from `store`, falling back to a fresh device when no
    /// usable snapshot exists.
    pub fn open(
        config: EngineConfig,
        store: Box<dyn SnapshotStore>,
        rng: Box<dyn FaultRng + Send>,
    ) -> StorageResult<Self> {
        config.validate()?;

        let (mut state, restored) = match store.load() {
            Ok(Some(snapshot)) => match DeviceState::from_snapshot(snapshot, config.log_capacity)
            {
                Ok(state) => (state, true),
                Err(e) => {
                    warn!("Discarding invalid snapshot, starting fresh: {}", e);
                    (config.fresh_state(), false)
                }
            },
            Ok(None) => (config.fresh_state(), false),
            Err(e) => {
                warn!("Failed to load snapshot, starting fresh: {}", e);
                (config.fresh_state(), false)
            }
        };
        state.record(format!(
            "disk_init: blocks={} restored={}",
            state.block_count(),
            restored
        ));
        info!(
            "Opened simulated disk: {} blocks, {} files, restored={}",
            state.block_count(),
            state.files().len(),
            restored
        );

        Ok(Self {
            config,
            state: RwLock::new(state),
            rng: Mutex::new(rng),
            store,
        })
    }

    /// Opens a fresh device backed by an in-memory store and a seeded generator.
    pub fn in_memory(config: EngineConfig, seed: u64) -> StorageResult<Self> {
        Self::open(
            config,
            Box::new(MemorySnapshotStore::new()),
            Box::new(SmallRng::seed_from_u64(seed)),
        )
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Writes a snapshot of `state`; failures are recorded, not returned.
    fn persist(&self, state: &mut DeviceState) {
        let snapshot = DeviceSnapshot::from(&*state);
        if let Err(e) = self.store.save(&snapshot) {
            warn!("Snapshot save failed: {}", e);
            state.record(format!("persist: save failed: {}", e));
        }
    }

    /// Runs one mutation under the write lock and persists on success.
    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut DeviceState) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut state = self.state.write();
        let out = op(&mut *state)?;
        self.persist(&mut state);
        Ok(out)
    }

    /// Allocates `size` consecutive blocks in the first free run that reaches `size`.
    pub fn allocate_contiguous(&self, size: usize) -> StorageResult<Allocation> {
        self.mutate(|state| allocator::allocate_contiguous(state, size))
    }

    /// Allocates the first `size` free blocks, adjacent or not.
    pub fn allocate_fragmented(&self, size: usize) -> StorageResult<Allocation> {
        self.mutate(|state| allocator::allocate_fragmented(state, size))
    }

    /// Allocates `size` blocks in the hole selected by `strategy`.
    pub fn allocate_custom(
        &self,
        size: usize,
        strategy: AllocationStrategy,
    ) -> StorageResult<Allocation> {
        self.mutate(|state| allocator::allocate_custom(state, size, strategy))
    }

    /// Compacts used blocks toward index 0.
    pub fn defragment(&self) -> DefragReport {
        let mut state = self.state.write();
        let report = defrag::compact(&mut state);
        self.persist(&mut state);
        report
    }

    /// Marks up to `count` random free blocks bad.
    pub fn mark_bad(&self, count: usize) -> InjectReport {
        let mut state = self.state.write();
        let mut rng = self.rng.lock();
        let report = fault::inject_bad_blocks(&mut state, count, &mut **rng);
        self.persist(&mut state);
        report
    }

    /// Frees each bad block with probability one half.
    pub fn repair(&self) -> RepairReport {
        let mut state = self.state.write();
        let mut rng = self.rng.lock();
        let report = fault::repair(&mut state, &mut **rng);
        self.persist(&mut state);
        report
    }

    /// Reinitializes the device from configuration, discarding all history.
    pub fn reset(&self) {
        let mut state = self.state.write();
        *state = self.config.fresh_state();
        state.record("disk_reset: disk reinitialized");
        info!("Disk reset to {} blocks", state.block_count());
        self.persist(&mut state);
    }

    /// Logically deletes an active file, freeing its blocks.
    pub fn delete_file(&self, file_id: FileId) -> StorageResult<DeleteReport> {
        self.mutate(|state| {
            if !state.is_active(file_id) {
                return Err(StorageError::FileNotFound { file_id });
            }
            let indices: Vec<usize> = state.owned_indices(file_id).collect();
            for index in &indices {
                state.release(*index);
            }
            state.set_file_status(file_id, FileStatus::Deleted);

            let freed_count = indices.len();
            if freed_count == 0 {
                state.record(format!("delete: id={} (no blocks)", file_id));
            } else {
                state.last_deleted = Some(DeletedRecord { file_id, indices });
                state.record(format!(
                    "delete: id={} freed={} blocks",
                    file_id, freed_count
                ));
            }
            debug!("Deleted file {} ({} blocks)", file_id, freed_count);
            Ok(DeleteReport {
                file_id,
                freed_count,
            })
        })
    }

    /// Restores the most recently deleted file.
    ///
    /// Original positions are reused when all are still free; otherwise the
    /// same number of blocks is claimed first-free ascending.
    pub fn undelete_last(&self) -> StorageResult<UndeleteReport> {
        self.mutate(|state| {
            let record = state
                .last_deleted
                .clone()
                .ok_or(StorageError::NothingToUndelete)?;
            let needed = record.indices.len();

            let in_place = record
                .indices
                .iter()
                .all(|i| state.state_at(*i) == BlockState::Free);
            let targets: Vec<usize> = if in_place {
                record.indices
            } else {
                let available = state.free_count();
                if available < needed {
                    return Err(StorageError::UndeleteNoSpace {
                        file_id: record.file_id,
                        needed,
                        available,
                    });
                }
                state
                    .block_states()
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| **s == BlockState::Free)
                    .map(|(i, _)| i)
                    .take(needed)
                    .collect()
            };

            for index in targets {
                state.claim(index, record.file_id);
            }
            state.set_file_status(record.file_id, FileStatus::Active);
            state.last_deleted = None;
            state.record(format!(
                "undelete_last: id={} restored={} blocks",
                record.file_id, needed
            ));
            Ok(UndeleteReport {
                file_id: record.file_id,
                restored_count: needed,
                in_place,
            })
        })
    }

    /// Utilization and fragmentation summary.
    pub fn stats(&self) -> DiskStats {
        analytics::stats(&self.state.read())
    }

    /// One view per block, in index order.
    pub fn disk_state(&self) -> Vec<BlockView> {
        analytics::disk_state(&self.state.read())
    }

    /// Active files with derived sizes.
    pub fn list_files(&self) -> Vec<FileSummary> {
        analytics::list_files(&self.state.read())
    }

    /// Activity log lines, oldest first.
    pub fn logs(&self) -> Vec<String> {
        self.state.read().log().to_vec()
    }

    /// Every maximal free run.
    pub fn holes(&self) -> Vec<Extent> {
        self.state.read().holes()
    }

    /// Hole count and largest hole.
    pub fn free_space_report(&self) -> FreeSpaceReport {
        analytics::free_space_report(&self.state.read())
    }

    /// Runs of blocks owned by an active file.
    pub fn file_extents(&self, file_id: FileId) -> StorageResult<Vec<Extent>> {
        analytics::file_extents(&self.state.read(), file_id)
    }

    /// Immutable copy of the current device state.
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot::from(&*self.state.read())
    }

    /// Writes a final snapshot and reports the outcome to the caller.
    pub fn shutdown(&self) -> StorageResult<()> {
        let state = self.state.read();
        self.store.save(&DeviceSnapshot::from(&*state))?;
        info!("Disk state saved at shutdown");
        Ok(())
    }
}
