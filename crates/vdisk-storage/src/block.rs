//! Core block and file types for the simulated device.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Identifier of a file registered on the device.
/// Assigned from a monotonically increasing counter starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl FileId {
    /// The first id handed out on a fresh device.
    pub const FIRST: FileId = FileId(1);

    /// Returns the raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }

    /// Returns the id that follows this one, or `None` at the end of the id space.
    pub fn checked_next(self) -> Option<FileId> {
        self.0.checked_add(1).map(FileId)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a single block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockState {
    /// Available for allocation.
    #[default]
    Free,
    /// Owned by exactly one file.
    Used,
    /// Marked unusable by the fault simulator.
    Bad,
}

impl BlockState {
    /// Returns the lowercase name used in views and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockState::Free => "free",
            BlockState::Used => "used",
            BlockState::Bad => "bad",
        }
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a registered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// The file owns its blocks.
    Active,
    /// The file was logically deleted; its id stays reserved.
    Deleted,
}

/// A file registry entry. Size is derived from block ownership, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// The file id.
    pub id: FileId,
    /// Current status.
    pub status: FileStatus,
}

impl FileEntry {
    /// Creates an active entry for the given id.
    pub fn active(id: FileId) -> Self {
        Self {
            id,
            status: FileStatus::Active,
        }
    }

    /// Returns true if the file is active.
    pub fn is_active(&self) -> bool {
        self.status == FileStatus::Active
    }
}

/// A maximal run of consecutive blocks, used both for free holes and file extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    /// Index of the first block in the run.
    pub start: usize,
    /// Number of blocks in the run.
    pub length: usize,
}

impl Extent {
    /// Creates a new extent.
    pub fn new(start: usize, length: usize) -> Self {
        Self { start, length }
    }

    /// One past the last index covered by this extent.
    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

/// Per-block view exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockView {
    /// Block index.
    pub index: usize,
    /// Block state.
    pub state: BlockState,
    /// Owning file, present only for used blocks.
    pub file_id: Option<FileId>,
}
