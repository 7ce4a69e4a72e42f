//! Block allocation policies over [`DeviceState`].
//!
//! Three entry points are provided: contiguous (commit to the first free run
//! that grows long enough), fragmented (claim the first free blocks in
//! ascending order regardless of adjacency) and custom hole search using
//! first-fit, best-fit or worst-fit. Every allocation is all-or-nothing: on
//! failure the device state is untouched.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block::{BlockState, Extent, FileId};
use crate::error::{StorageError, StorageResult};
use crate::state::DeviceState;

/// Hole-selection policy for [`allocate_custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationStrategy {
    /// Earliest sufficient hole.
    #[default]
    FirstFit,
    /// Smallest sufficient hole, earliest on ties.
    BestFit,
    /// Largest sufficient hole, earliest on ties.
    WorstFit,
}

impl AllocationStrategy {
    /// Returns the kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStrategy::FirstFit => "first-fit",
            AllocationStrategy::BestFit => "best-fit",
            AllocationStrategy::WorstFit => "worst-fit",
        }
    }

    /// Returns all strategies.
    pub fn all() -> &'static [AllocationStrategy] {
        &[
            AllocationStrategy::FirstFit,
            AllocationStrategy::BestFit,
            AllocationStrategy::WorstFit,
        ]
    }

    /// Picks a hole of at least `size` blocks from `holes` (ascending by start).
    pub fn select(&self, holes: &[Extent], size: usize) -> Option<Extent> {
        let mut candidates = holes.iter().filter(|h| h.length >= size);
        match self {
            AllocationStrategy::FirstFit => candidates.next().copied(),
            AllocationStrategy::BestFit => {
                let mut best: Option<&Extent> = None;
                for hole in candidates {
                    if best.map_or(true, |b| hole.length < b.length) {
                        best = Some(hole);
                    }
                }
                best.copied()
            }
            AllocationStrategy::WorstFit => {
                let mut worst: Option<&Extent> = None;
                for hole in candidates {
                    if worst.map_or(true, |w| hole.length > w.length) {
                        worst = Some(hole);
                    }
                }
                worst.copied()
            }
        }
    }
}

impl fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationStrategy {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first-fit" => Ok(AllocationStrategy::FirstFit),
            "best-fit" => Ok(AllocationStrategy::BestFit),
            "worst-fit" => Ok(AllocationStrategy::WorstFit),
            other => Err(StorageError::InvalidInput(format!(
                "unknown strategy '{}', expected first-fit, best-fit or worst-fit",
                other
            ))),
        }
    }
}

/// Result of a successful allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    /// The newly registered file.
    pub file_id: FileId,
    /// Blocks claimed.
    pub size: usize,
    /// First claimed index, for contiguous placements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    /// Strategy used, for custom placements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<AllocationStrategy>,
}

fn validate_size(size: usize) -> StorageResult<()> {
    if size == 0 {
        return Err(StorageError::InvalidInput(
            "size must be a positive number of blocks".to_string(),
        ));
    }
    Ok(())
}

fn claim_run(state: &mut DeviceState, start: usize, size: usize) -> StorageResult<FileId> {
    let file_id = state.register_file()?;
    for index in start..start + size {
        state.claim(index, file_id);
    }
    Ok(file_id)
}

/// Allocates `size` consecutive blocks in the first free run that reaches `size`.
///
/// The scan commits as soon as the current run is long enough; it does not
/// compare runs against each other.
pub fn allocate_contiguous(state: &mut DeviceState, size: usize) -> StorageResult<Allocation> {
    validate_size(size)?;

    let mut streak = 0;
    let mut start = 0;
    let mut site = None;
    for (index, block) in state.block_states().iter().enumerate() {
        if *block == BlockState::Free {
            if streak == 0 {
                start = index;
            }
            streak += 1;
            if streak >= size {
                site = Some(start);
                break;
            }
        } else {
            streak = 0;
        }
    }

    let start = site.ok_or(StorageError::NoContiguousSpace { requested: size })?;
    let file_id = claim_run(state, start, size)?;
    state.record(format!(
        "allocate_contiguous: id={} size={} start={}",
        file_id, size, start
    ));
    debug!("Allocated {} contiguous blocks at {} to file {}", size, start, file_id);

    Ok(Allocation {
        file_id,
        size,
        start: Some(start),
        strategy: None,
    })
}

/// Allocates the first `size` free blocks in ascending order, adjacent or not.
pub fn allocate_fragmented(state: &mut DeviceState, size: usize) -> StorageResult<Allocation> {
    validate_size(size)?;

    let available = state.free_count();
    if available < size {
        return Err(StorageError::InsufficientFreeBlocks {
            requested: size,
            available,
        });
    }

    let targets: Vec<usize> = state
        .block_states()
        .iter()
        .enumerate()
        .filter(|(_, s)| **s == BlockState::Free)
        .map(|(i, _)| i)
        .take(size)
        .collect();

    let file_id = state.register_file()?;
    for index in targets {
        state.claim(index, file_id);
    }
    state.record(format!("allocate_fragmented: id={} size={}", file_id, size));
    debug!("Allocated {} scattered blocks to file {}", size, file_id);

    Ok(Allocation {
        file_id,
        size,
        start: None,
        strategy: None,
    })
}

/// Allocates `size` blocks at the front of the hole chosen by `strategy`.
pub fn allocate_custom(
    state: &mut DeviceState,
    size: usize,
    strategy: AllocationStrategy,
) -> StorageResult<Allocation> {
    validate_size(size)?;

    let holes = state.holes();
    let hole = strategy
        .select(&holes, size)
        .ok_or(StorageError::NoSuitableHole {
            requested: size,
            strategy,
        })?;

    let file_id = claim_run(state, hole.start, size)?;
    state.record(format!(
        "allocate_custom: id={} size={} strategy={} start={}",
        file_id, size, strategy, hole.start
    ));
    debug!(
        "Allocated {} blocks at {} ({} of {} hole candidates) to file {}",
        size,
        hole.start,
        strategy,
        holes.len(),
        file_id
    );

    Ok(Allocation {
        file_id,
        size,
        start: Some(hole.start),
        strategy: Some(strategy),
    })
}
