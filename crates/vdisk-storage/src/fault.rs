//! Fault simulation: random bad-block injection and probabilistic repair.
//!
//! Randomness comes from a caller-supplied [`FaultRng`] so tests can pin the
//! exact sequence of draws.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block::BlockState;
use crate::state::DeviceState;

/// Draws per block allowed when injecting bad blocks.
pub const INJECT_DRAWS_PER_BLOCK: usize = 4;

/// A bad block is repaired when its draw falls below this value.
pub const REPAIR_THRESHOLD: f64 = 0.5;

/// Random source for fault simulation.
pub trait FaultRng {
    /// Uniform index in `0..upper`. `upper` is never zero.
    fn next_index(&mut self, upper: usize) -> usize;

    /// Uniform value in `[0, 1)`.
    fn next_unit(&mut self) -> f64;
}

impl<R: Rng + ?Sized> FaultRng for R {
    fn next_index(&mut self, upper: usize) -> usize {
        self.gen_range(0..upper)
    }

    fn next_unit(&mut self) -> f64 {
        self.gen::<f64>()
    }
}

/// Outcome of bad-block injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectReport {
    /// Blocks the caller asked for.
    pub requested: usize,
    /// Blocks actually marked bad.
    pub marked_count: usize,
}

/// Outcome of a repair pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    /// Bad blocks converted back to free.
    pub repaired_count: usize,
    /// Bad blocks remaining.
    pub remaining_bad: usize,
}

/// Marks up to `count` free blocks bad using at most `4 * block_count` draws.
///
/// Draws landing on used or bad blocks are wasted. Never fails; the report
/// says how many were actually marked.
pub fn inject_bad_blocks(
    state: &mut DeviceState,
    count: usize,
    rng: &mut dyn FaultRng,
) -> InjectReport {
    let block_count = state.block_count();
    let budget = block_count * INJECT_DRAWS_PER_BLOCK;
    let mut marked_count = 0;
    let mut draws = 0;

    while draws < budget && marked_count < count {
        let index = rng.next_index(block_count);
        draws += 1;
        if state.state_at(index) == BlockState::Free {
            state.mark_bad(index);
            marked_count += 1;
        }
    }

    state.record(format!(
        "mark_bad: requested={} marked={}",
        count, marked_count
    ));
    debug!(
        "Injected {}/{} bad blocks in {} draws",
        marked_count, count, draws
    );

    InjectReport {
        requested: count,
        marked_count,
    }
}

/// Visits every bad block in ascending order and frees it with probability one half.
pub fn repair(state: &mut DeviceState, rng: &mut dyn FaultRng) -> RepairReport {
    let mut repaired_count = 0;
    let mut remaining_bad = 0;

    for index in 0..state.block_count() {
        if state.state_at(index) != BlockState::Bad {
            continue;
        }
        if rng.next_unit() < REPAIR_THRESHOLD {
            state.release(index);
            repaired_count += 1;
        } else {
            remaining_bad += 1;
        }
    }

    state.record(format!("repair: repaired={} bad->free", repaired_count));
    debug!(
        "Repair pass: {} repaired, {} still bad",
        repaired_count, remaining_bad
    );

    RepairReport {
        repaired_count,
        remaining_bad,
    }
}
