//! In-place compaction of used blocks toward index 0.
//!
//! A read cursor visits every block; each used block is copied to the write
//! cursor, which advances only for used blocks. Relative order of used blocks
//! is preserved, so scattered files become contiguous.
//!
//! Bad blocks are not obstacles: a bad block sitting at a write position is
//! overwritten by the used block compacted into it. Bad blocks the write
//! cursor never reaches keep their marking.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block::BlockState;
use crate::state::DeviceState;

/// Outcome of a compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefragReport {
    /// Used blocks that changed position.
    pub moved_count: usize,
    /// Used blocks on the device after the pass.
    pub used_count: usize,
}

/// Compacts every used block to the lowest indices, preserving order.
pub fn compact(state: &mut DeviceState) -> DefragReport {
    let mut write_idx = 0;
    let mut moved_count = 0;

    for read_idx in 0..state.block_count() {
        if state.state_at(read_idx) != BlockState::Used {
            continue;
        }
        if write_idx != read_idx {
            if let Some(owner) = state.owner_at(read_idx) {
                state.claim(write_idx, owner);
            }
            state.release(read_idx);
            moved_count += 1;
        }
        write_idx += 1;
    }

    state.record(format!(
        "defragment: compacted used blocks to front (used={} moved={})",
        write_idx, moved_count
    ));
    debug!(
        "Defragment pass: {} used blocks, {} relocated",
        write_idx, moved_count
    );

    DefragReport {
        moved_count,
        used_count: write_idx,
    }
}
