//! In-memory device state: block states, block ownership, file registry and activity log.
//!
//! Every operation in this crate works on a [`DeviceState`]. The parallel
//! `block_states` / `block_owners` sequences always have the same length, and
//! a block has an owner exactly when it is [`BlockState::Used`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::block::{BlockState, BlockView, Extent, FileEntry, FileId, FileStatus};
use crate::error::{StorageError, StorageResult};
use crate::log::ActivityLog;

/// Default number of blocks on a fresh device.
pub const DEFAULT_BLOCK_COUNT: usize = 1024;

/// Blocks released by the most recent delete, kept for `undelete_last`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRecord {
    /// The deleted file.
    pub file_id: FileId,
    /// Indices the file owned, ascending.
    pub indices: Vec<usize>,
}

/// The aggregate root of the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub(crate) block_states: Vec<BlockState>,
    pub(crate) block_owners: Vec<Option<FileId>>,
    pub(crate) files: BTreeMap<FileId, FileEntry>,
    pub(crate) next_file_id: FileId,
    pub(crate) log: ActivityLog,
    pub(crate) last_deleted: Option<DeletedRecord>,
}

impl DeviceState {
    /// Creates a fresh device with every block free.
    pub fn new(block_count: usize, log_capacity: usize) -> Self {
        Self {
            block_states: vec![BlockState::Free; block_count],
            block_owners: vec![None; block_count],
            files: BTreeMap::new(),
            next_file_id: FileId::FIRST,
            log: ActivityLog::new(log_capacity),
            last_deleted: None,
        }
    }

    /// Number of blocks on the device.
    pub fn block_count(&self) -> usize {
        self.block_states.len()
    }

    /// Per-block states in index order.
    pub fn block_states(&self) -> &[BlockState] {
        &self.block_states
    }

    /// Per-block owners in index order.
    pub fn block_owners(&self) -> &[Option<FileId>] {
        &self.block_owners
    }

    /// The file registry, keyed by id.
    pub fn files(&self) -> &BTreeMap<FileId, FileEntry> {
        &self.files
    }

    /// The id the next allocation will receive.
    pub fn next_file_id(&self) -> FileId {
        self.next_file_id
    }

    /// The activity log.
    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    /// Appends an activity log entry.
    pub fn record(&mut self, line: impl Into<String>) {
        self.log.push(line);
    }

    /// The pending undelete record, if any.
    pub fn last_deleted(&self) -> Option<&DeletedRecord> {
        self.last_deleted.as_ref()
    }

    /// State of the block at `index`.
    pub fn state_at(&self, index: usize) -> BlockState {
        self.block_states[index]
    }

    /// Owner of the block at `index`.
    pub fn owner_at(&self, index: usize) -> Option<FileId> {
        self.block_owners[index]
    }

    /// View of a single block.
    pub fn view_at(&self, index: usize) -> BlockView {
        BlockView {
            index,
            state: self.block_states[index],
            file_id: self.block_owners[index],
        }
    }

    /// Counts blocks in the given state.
    pub fn count(&self, state: BlockState) -> usize {
        self.block_states.iter().filter(|s| **s == state).count()
    }

    /// Counts free blocks.
    pub fn free_count(&self) -> usize {
        self.count(BlockState::Free)
    }

    /// Returns every maximal run of free blocks in ascending order.
    pub fn holes(&self) -> Vec<Extent> {
        runs(self.block_states.iter().map(|s| *s == BlockState::Free))
    }

    /// Returns true if `id` is registered and active.
    pub fn is_active(&self, id: FileId) -> bool {
        self.files.get(&id).is_some_and(FileEntry::is_active)
    }

    /// Number of used blocks owned by `id`.
    pub fn file_size(&self, id: FileId) -> usize {
        self.owned_indices(id).count()
    }

    /// Maximal runs of blocks owned by `id`, in index order.
    pub fn file_extents(&self, id: FileId) -> Vec<Extent> {
        runs(
            self.block_states
                .iter()
                .zip(&self.block_owners)
                .map(|(s, o)| *s == BlockState::Used && *o == Some(id)),
        )
    }

    /// Indices of used blocks owned by `id`, ascending.
    pub fn owned_indices(&self, id: FileId) -> impl Iterator<Item = usize> + '_ {
        self.block_states
            .iter()
            .zip(&self.block_owners)
            .enumerate()
            .filter(move |(_, (s, o))| **s == BlockState::Used && **o == Some(id))
            .map(|(i, _)| i)
    }

    /// Registers a new active file and advances the id counter.
    ///
    /// Fails without touching the registry once the counter is exhausted, so
    /// ids are never reused.
    pub(crate) fn register_file(&mut self) -> StorageResult<FileId> {
        let id = self.next_file_id;
        let next = id
            .checked_next()
            .ok_or(StorageError::FileIdsExhausted { next: id })?;
        self.next_file_id = next;
        self.files.insert(id, FileEntry::active(id));
        Ok(id)
    }

    pub(crate) fn set_file_status(&mut self, id: FileId, status: FileStatus) {
        if let Some(entry) = self.files.get_mut(&id) {
            entry.status = status;
        }
    }

    /// Marks a block used by `owner`.
    pub(crate) fn claim(&mut self, index: usize, owner: FileId) {
        self.block_states[index] = BlockState::Used;
        self.block_owners[index] = Some(owner);
    }

    /// Returns a block to the free pool.
    pub(crate) fn release(&mut self, index: usize) {
        self.block_states[index] = BlockState::Free;
        self.block_owners[index] = None;
    }

    pub(crate) fn mark_bad(&mut self, index: usize) {
        self.block_states[index] = BlockState::Bad;
        self.block_owners[index] = None;
    }

    /// Verifies every structural invariant of the device.
    pub fn check_invariants(&self) -> StorageResult<()> {
        if self.block_states.is_empty() {
            return Err(StorageError::corrupted("device has no blocks"));
        }
        if self.block_states.len() != self.block_owners.len() {
            return Err(StorageError::corrupted(format!(
                "state/owner length mismatch: {} vs {}",
                self.block_states.len(),
                self.block_owners.len()
            )));
        }
        for (index, (state, owner)) in self.block_states.iter().zip(&self.block_owners).enumerate() {
            match (state, owner) {
                (BlockState::Used, Some(id)) => {
                    if !self.is_active(*id) {
                        return Err(StorageError::corrupted(format!(
                            "block {} owned by inactive or unknown file {}",
                            index, id
                        )));
                    }
                }
                (BlockState::Used, None) => {
                    return Err(StorageError::corrupted(format!(
                        "used block {} has no owner",
                        index
                    )));
                }
                (_, Some(id)) => {
                    return Err(StorageError::corrupted(format!(
                        "{} block {} has owner {}",
                        state, index, id
                    )));
                }
                (_, None) => {}
            }
        }
        for (key, entry) in &self.files {
            if *key != entry.id {
                return Err(StorageError::corrupted(format!(
                    "file key {} does not match entry id {}",
                    key, entry.id
                )));
            }
            if entry.id.get() == 0 || entry.id >= self.next_file_id {
                return Err(StorageError::corrupted(format!(
                    "file id {} not below next id {}",
                    entry.id, self.next_file_id
                )));
            }
        }
        if let Some(record) = &self.last_deleted {
            if self.files.get(&record.file_id).map(|e| e.status) != Some(FileStatus::Deleted) {
                return Err(StorageError::corrupted(format!(
                    "undelete record refers to file {} which is not deleted",
                    record.file_id
                )));
            }
            if record.indices.iter().any(|i| *i >= self.block_count()) {
                return Err(StorageError::corrupted("undelete record index out of range"));
            }
            if record.indices.windows(2).any(|w| w[0] >= w[1]) {
                return Err(StorageError::corrupted(
                    "undelete record indices not strictly ascending",
                ));
            }
        }
        Ok(())
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_COUNT, crate::log::DEFAULT_LOG_CAPACITY)
    }
}

/// Collapses a sequence of flags into maximal runs of `true`.
fn runs(flags: impl Iterator<Item = bool>) -> Vec<Extent> {
    let mut out = Vec::new();
    let mut current: Option<Extent> = None;
    for (i, flag) in flags.enumerate() {
        match (flag, current.as_mut()) {
            (true, Some(run)) => run.length += 1,
            (true, None) => current = Some(Extent::new(i, 1)),
            (false, Some(_)) => out.extend(current.take()),
            (false, None) => {}
        }
    }
    out.extend(current);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state() {
        let state = DeviceState::new(16, 10);
        assert_eq!(state.block_count(), 16);
        assert_eq!(state.free_count(), 16);
        assert_eq!(state.next_file_id(), FileId(1));
        assert!(state.files().is_empty());
        assert!(state.log().is_empty());
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_default_state() {
        let state = DeviceState::default();
        assert_eq!(state.block_count(), DEFAULT_BLOCK_COUNT);
        assert_eq!(state.log().capacity(), 100);
    }

    #[test]
    fn test_holes() {
        let mut state = DeviceState::new(10, 10);
        let id = state.register_file().unwrap();
        state.claim(0, id);
        state.claim(4, id);
        state.mark_bad(5);
        assert_eq!(
            state.holes(),
            vec![Extent::new(1, 3), Extent::new(6, 4)]
        );
    }

    #[test]
    fn test_file_extents_and_size() {
        let mut state = DeviceState::new(10, 10);
        let id = state.register_file().unwrap();
        for i in [1, 2, 5, 9] {
            state.claim(i, id);
        }
        assert_eq!(state.file_size(id), 4);
        assert_eq!(
            state.file_extents(id),
            vec![Extent::new(1, 2), Extent::new(5, 1), Extent::new(9, 1)]
        );
        assert_eq!(state.owned_indices(id).collect::<Vec<_>>(), vec![1, 2, 5, 9]);
    }

    #[test]
    fn test_register_file_monotonic() {
        let mut state = DeviceState::new(4, 10);
        let a = state.register_file().unwrap();
        let b = state.register_file().unwrap();
        assert_eq!(a, FileId(1));
        assert_eq!(b, FileId(2));
        assert_eq!(state.next_file_id(), FileId(3));
        assert!(state.is_active(a));
    }

    #[test]
    fn test_invariant_owner_without_used() {
        let mut state = DeviceState::new(4, 10);
        let id = state.register_file().unwrap();
        state.block_owners[2] = Some(id);
        assert!(state.check_invariants().is_err());
    }

    #[test]
    fn test_invariant_owner_must_be_active() {
        let mut state = DeviceState::new(4, 10);
        let id = state.register_file().unwrap();
        state.claim(0, id);
        state.check_invariants().unwrap();
        state.set_file_status(id, FileStatus::Deleted);
        assert!(state.check_invariants().is_err());
    }

    #[test]
    fn test_invariant_next_id() {
        let mut state = DeviceState::new(4, 10);
        state.register_file().unwrap();
        state.next_file_id = FileId(1);
        assert!(state.check_invariants().is_err());
    }

    #[test]
    fn test_register_file_exhausted() {
        let mut state = DeviceState::new(4, 10);
        state.next_file_id = FileId(u64::MAX);
        assert!(matches!(
            state.register_file(),
            Err(StorageError::FileIdsExhausted { next: FileId(u64::MAX) })
        ));
        assert!(state.files().is_empty());
        assert_eq!(state.next_file_id(), FileId(u64::MAX));
    }

    #[test]
    fn test_invariant_undelete_indices_unique() {
        let mut state = DeviceState::new(4, 10);
        let id = state.register_file().unwrap();
        state.set_file_status(id, FileStatus::Deleted);
        state.last_deleted = Some(DeletedRecord {
            file_id: id,
            indices: vec![1, 2],
        });
        assert!(state.check_invariants().is_ok());

        state.last_deleted = Some(DeletedRecord {
            file_id: id,
            indices: vec![2, 2],
        });
        assert!(state.check_invariants().is_err());
    }

    #[test]
    fn test_release_and_bad() {
        let mut state = DeviceState::new(4, 10);
        let id = state.register_file().unwrap();
        state.claim(1, id);
        state.release(1);
        state.mark_bad(2);
        assert_eq!(state.state_at(1), BlockState::Free);
        assert_eq!(state.owner_at(1), None);
        assert_eq!(state.view_at(2).state, BlockState::Bad);
        assert_eq!(state.count(BlockState::Bad), 1);
    }
}
