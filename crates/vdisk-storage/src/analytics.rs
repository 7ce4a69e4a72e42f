//! Read-only utilization and fragmentation analytics.

use serde::{Deserialize, Serialize};

use crate::block::{BlockState, BlockView, Extent, FileId, FileStatus};
use crate::error::{StorageError, StorageResult};
use crate::state::DeviceState;

/// Utilization summary for the whole device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskStats {
    /// Total blocks.
    pub total: usize,
    /// Used blocks.
    pub used: usize,
    /// Free blocks.
    pub free: usize,
    /// Bad blocks.
    pub bad_sectors: usize,
    /// Share of active files split into more than one run, 0-100, two decimals.
    pub fragmentation_percent: f64,
}

/// Summary of one active file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    /// File id.
    pub id: FileId,
    /// File status.
    pub status: FileStatus,
    /// Used blocks owned by the file.
    pub size: usize,
}

/// Free-space layout summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeSpaceReport {
    /// Number of maximal free runs.
    pub hole_count: usize,
    /// Length of the longest free run, 0 if none.
    pub largest_hole: usize,
    /// Free blocks in total.
    pub free_blocks: usize,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Counts active files and how many of them are fragmented, in one pass.
fn fragmented_files(state: &DeviceState) -> (usize, usize) {
    let active: Vec<FileId> = state
        .files()
        .values()
        .filter(|f| f.is_active())
        .map(|f| f.id)
        .collect();

    // Segment count per file, indexed by position in `active`.
    let mut segments = vec![0usize; active.len()];
    let mut previous: Option<FileId> = None;
    for (block, owner) in state.block_states().iter().zip(state.block_owners()) {
        let current = match (block, owner) {
            (BlockState::Used, Some(id)) => Some(*id),
            _ => None,
        };
        if let Some(id) = current {
            if previous != Some(id) {
                if let Ok(pos) = active.binary_search(&id) {
                    segments[pos] += 1;
                }
            }
        }
        previous = current;
    }

    let fragmented = segments.iter().filter(|s| **s > 1).count();
    (active.len(), fragmented)
}

/// Percentage of active files with more than one segment, rounded to two decimals.
pub fn fragmentation_percent(state: &DeviceState) -> f64 {
    let (total, fragmented) = fragmented_files(state);
    if total == 0 {
        return 0.0;
    }
    round2(100.0 * fragmented as f64 / total as f64)
}

/// Device utilization summary.
pub fn stats(state: &DeviceState) -> DiskStats {
    let (mut used, mut free, mut bad) = (0, 0, 0);
    for block in state.block_states() {
        match block {
            BlockState::Used => used += 1,
            BlockState::Free => free += 1,
            BlockState::Bad => bad += 1,
        }
    }
    DiskStats {
        total: state.block_count(),
        used,
        free,
        bad_sectors: bad,
        fragmentation_percent: fragmentation_percent(state),
    }
}

/// One view per block, in index order.
pub fn disk_state(state: &DeviceState) -> Vec<BlockView> {
    (0..state.block_count()).map(|i| state.view_at(i)).collect()
}

/// One summary per active file, ascending by id.
pub fn list_files(state: &DeviceState) -> Vec<FileSummary> {
    state
        .files()
        .values()
        .filter(|f| f.is_active())
        .map(|f| FileSummary {
            id: f.id,
            status: f.status,
            size: state.file_size(f.id),
        })
        .collect()
}

/// Maximal runs owned by an active file.
pub fn file_extents(state: &DeviceState, id: FileId) -> StorageResult<Vec<Extent>> {
    if !state.is_active(id) {
        return Err(StorageError::FileNotFound { file_id: id });
    }
    Ok(state.file_extents(id))
}

/// Hole count and largest hole.
pub fn free_space_report(state: &DeviceState) -> FreeSpaceReport {
    let holes = state.holes();
    FreeSpaceReport {
        hole_count: holes.len(),
        largest_hole: holes.iter().map(|h| h.length).max().unwrap_or(0),
        free_blocks: holes.iter().map(|h| h.length).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{allocate_contiguous, allocate_fragmented};

    #[test]
    fn test_stats_fresh_allocation() {
        let mut state = DeviceState::default();
        allocate_contiguous(&mut state, 10).unwrap();
        let s = stats(&state);
        assert_eq!(
            s,
            DiskStats {
                total: 1024,
                used: 10,
                free: 1014,
                bad_sectors: 0,
                fragmentation_percent: 0.0,
            }
        );
    }

    #[test]
    fn test_stats_json_field_names() {
        let state = DeviceState::new(4, 10);
        let json = serde_json::to_value(stats(&state)).unwrap();
        assert_eq!(json["badSectors"], 0);
        assert_eq!(json["fragmentationPercent"], 0.0);
        assert_eq!(json["total"], 4);
    }

    #[test]
    fn test_fragmentation_percent_rounding() {
        let mut state = DeviceState::new(30, 10);
        state.mark_bad(1);
        // Fragmented: claims 0, 2, 3.
        allocate_fragmented(&mut state, 3).unwrap();
        allocate_contiguous(&mut state, 2).unwrap();
        allocate_contiguous(&mut state, 2).unwrap();
        assert_eq!(fragmentation_percent(&state), 33.33);
    }

    #[test]
    fn test_fragmentation_zero_without_files() {
        let state = DeviceState::new(8, 10);
        assert_eq!(fragmentation_percent(&state), 0.0);
    }

    #[test]
    fn test_adjacent_files_are_separate_segments() {
        let mut state = DeviceState::new(8, 10);
        let a = state.register_file().unwrap();
        let b = state.register_file().unwrap();
        state.claim(0, a);
        state.claim(1, b);
        state.claim(2, a);
        // a has two segments split by b; b has one.
        assert_eq!(fragmentation_percent(&state), 50.0);
    }

    #[test]
    fn test_fragmented_file_flagged() {
        let mut state = DeviceState::new(12, 10);
        for i in 0..12 {
            if ![2, 5, 9, 10].contains(&i) {
                state.mark_bad(i);
            }
        }
        let alloc = allocate_fragmented(&mut state, 3).unwrap();
        assert!(file_extents(&state, alloc.file_id).unwrap().len() > 1);
        assert_eq!(fragmentation_percent(&state), 100.0);
    }

    #[test]
    fn test_disk_state_views() {
        let mut state = DeviceState::new(4, 10);
        allocate_contiguous(&mut state, 2).unwrap();
        state.mark_bad(3);
        let views = disk_state(&state);
        assert_eq!(views.len(), 4);
        assert_eq!(views[0].file_id, Some(FileId(1)));
        assert_eq!(views[2].state, BlockState::Free);
        assert_eq!(views[3].state, BlockState::Bad);
        assert_eq!(views[3].file_id, None);
        assert!(views.iter().enumerate().all(|(i, v)| v.index == i));
    }

    #[test]
    fn test_list_files_skips_deleted() {
        let mut state = DeviceState::new(16, 10);
        allocate_contiguous(&mut state, 3).unwrap();
        let b = allocate_fragmented(&mut state, 2).unwrap().file_id;
        for i in state.owned_indices(b).collect::<Vec<_>>() {
            state.release(i);
        }
        state.set_file_status(b, FileStatus::Deleted);

        let files = list_files(&state);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, FileId(1));
        assert_eq!(files[0].size, 3);
        assert_eq!(files[0].status, FileStatus::Active);
        assert!(matches!(
            file_extents(&state, b),
            Err(StorageError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_free_space_report() {
        let mut state = DeviceState::new(10, 10);
        state.mark_bad(3);
        state.mark_bad(4);
        let report = free_space_report(&state);
        assert_eq!(report.hole_count, 2);
        assert_eq!(report.largest_hole, 5);
        assert_eq!(report.free_blocks, 8);
    }

    #[test]
    fn test_analytics_do_not_mutate() {
        let mut state = DeviceState::new(10, 10);
        allocate_fragmented(&mut state, 4).unwrap();
        let before = state.clone();
        let _ = stats(&state);
        let _ = disk_state(&state);
        let _ = list_files(&state);
        let _ = free_space_report(&state);
        assert_eq!(state, before);
    }
}
