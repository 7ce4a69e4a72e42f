//! Snapshot persistence for [`DeviceState`].
//!
//! A [`DeviceSnapshot`] is the full serializable image of the device. Stores
//! implement [`SnapshotStore`]; the engine writes one snapshot after every
//! mutation and reads one at startup. Two encodings are supported: pretty
//! JSON, and a bincode payload framed by a magic tag and CRC32.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block::{BlockState, FileEntry, FileId};
use crate::error::{StorageError, StorageResult};
use crate::log::ActivityLog;
use crate::state::{DeletedRecord, DeviceState};

/// Magic tag at the start of a bincode snapshot.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"VDSK";

const FRAME_HEADER_LEN: usize = 8;

/// Serializable image of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Number of blocks.
    pub block_count: usize,
    /// Per-block state.
    pub block_states: Vec<BlockState>,
    /// Per-block owner.
    pub block_owners: Vec<Option<FileId>>,
    /// Registered files. Serialized as a list so JSON keys stay numeric.
    pub files: Vec<FileEntry>,
    /// Next id to hand out.
    pub next_file_id: FileId,
    /// Activity log capacity.
    pub log_capacity: usize,
    /// Activity log lines, oldest first.
    pub log: Vec<String>,
    /// Pending undelete record.
    #[serde(default)]
    pub last_deleted: Option<DeletedRecord>,
}

impl From<&DeviceState> for DeviceSnapshot {
    fn from(state: &DeviceState) -> Self {
        Self {
            block_count: state.block_count(),
            block_states: state.block_states.clone(),
            block_owners: state.block_owners.clone(),
            files: state.files.values().copied().collect(),
            next_file_id: state.next_file_id,
            log_capacity: state.log.capacity(),
            log: state.log.to_vec(),
            last_deleted: state.last_deleted.clone(),
        }
    }
}

impl DeviceState {
    /// Rebuilds and validates a device from `snapshot`, bounding the activity
    /// log by `log_capacity` rather than by the capacity the snapshot records.
    pub fn from_snapshot(snapshot: DeviceSnapshot, log_capacity: usize) -> StorageResult<Self> {
        if snapshot.block_states.len() != snapshot.block_count
            || snapshot.block_owners.len() != snapshot.block_count
        {
            return Err(StorageError::corrupted(format!(
                "block count {} does not match states ({}) / owners ({})",
                snapshot.block_count,
                snapshot.block_states.len(),
                snapshot.block_owners.len()
            )));
        }

        let mut files = BTreeMap::new();
        for entry in snapshot.files {
            if files.insert(entry.id, entry).is_some() {
                return Err(StorageError::corrupted(format!(
                    "duplicate file id {}",
                    entry.id
                )));
            }
        }

        let state = DeviceState {
            block_states: snapshot.block_states,
            block_owners: snapshot.block_owners,
            files,
            next_file_id: snapshot.next_file_id,
            log: ActivityLog::from_entries(log_capacity, snapshot.log),
            last_deleted: snapshot.last_deleted,
        };
        state.check_invariants()?;
        Ok(state)
    }
}

/// On-disk encoding of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    /// Pretty-printed JSON.
    #[default]
    Json,
    /// Bincode payload with magic and CRC32 header.
    Bincode,
}

impl SnapshotFormat {
    /// Encodes a snapshot.
    pub fn encode(&self, snapshot: &DeviceSnapshot) -> StorageResult<Vec<u8>> {
        match self {
            SnapshotFormat::Json => serde_json::to_vec_pretty(snapshot).map_err(|e| {
                StorageError::SerializationError {
                    reason: e.to_string(),
                }
            }),
            SnapshotFormat::Bincode => {
                let payload =
                    bincode::serialize(snapshot).map_err(|e| StorageError::SerializationError {
                        reason: e.to_string(),
                    })?;
                let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
                out.extend_from_slice(&SNAPSHOT_MAGIC);
                out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
                out.extend_from_slice(&payload);
                Ok(out)
            }
        }
    }

    /// Decodes a snapshot, rejecting unparsable or corrupted input.
    pub fn decode(&self, data: &[u8]) -> StorageResult<DeviceSnapshot> {
        match self {
            SnapshotFormat::Json => serde_json::from_slice(data).map_err(|e| {
                StorageError::corrupted(format!("JSON decode failed: {}", e))
            }),
            SnapshotFormat::Bincode => {
                if data.len() < FRAME_HEADER_LEN {
                    return Err(StorageError::corrupted(format!(
                        "data too small: {} bytes",
                        data.len()
                    )));
                }
                let (header, payload) = data.split_at(FRAME_HEADER_LEN);
                if header[..4] != SNAPSHOT_MAGIC {
                    return Err(StorageError::corrupted("bad magic"));
                }
                let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
                let actual = crc32fast::hash(payload);
                if expected != actual {
                    return Err(StorageError::corrupted(format!(
                        "checksum mismatch: expected {:#x}, actual {:#x}",
                        expected, actual
                    )));
                }
                bincode::deserialize(payload).map_err(|e| {
                    StorageError::corrupted(format!("bincode decode failed: {}", e))
                })
            }
        }
    }
}

/// Durable home for device snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Reads the latest snapshot. `Ok(None)` means none has been written yet.
    fn load(&self) -> StorageResult<Option<DeviceSnapshot>>;

    /// Replaces the stored snapshot.
    fn save(&self, snapshot: &DeviceSnapshot) -> StorageResult<()>;
}

/// Stores the snapshot in a single file, replaced via write-then-rename.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
    format: SnapshotFormat,
}

impl FileSnapshotStore {
    /// Creates a store for `path` using `format`.
    pub fn new(path: impl Into<PathBuf>, format: SnapshotFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    /// Location of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> StorageResult<Option<DeviceSnapshot>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot = self.format.decode(&data)?;
        debug!(
            "Loaded snapshot from {} ({} bytes)",
            self.path.display(),
            data.len()
        );
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &DeviceSnapshot) -> StorageResult<()> {
        let bytes = self.format.encode(snapshot)?;
        let tmp = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(
            "Saved snapshot to {} ({} bytes)",
            self.path.display(),
            bytes.len()
        );
        Ok(())
    }
}

/// Keeps the latest snapshot in memory.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    snapshot: Option<DeviceSnapshot>,
    saves: u64,
    fail_saves: bool,
}

impl MemorySnapshotStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `snapshot`.
    pub fn with_snapshot(snapshot: DeviceSnapshot) -> Self {
        let store = Self::default();
        store.inner.lock().snapshot = Some(snapshot);
        store
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.inner.lock().saves
    }

    /// Most recently saved snapshot.
    pub fn latest(&self) -> Option<DeviceSnapshot> {
        self.inner.lock().snapshot.clone()
    }

    /// Makes subsequent saves fail with an I/O error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.inner.lock().fail_saves = fail;
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> StorageResult<Option<DeviceSnapshot>> {
        Ok(self.inner.lock().snapshot.clone())
    }

    fn save(&self, snapshot: &DeviceSnapshot) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        if inner.fail_saves {
            return Err(StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated save failure",
            )));
        }
        inner.snapshot = Some(snapshot.clone());
        inner.saves += 1;
        Ok(())
    }
}

impl<T: SnapshotStore + ?Sized> SnapshotStore for std::sync::Arc<T> {
    fn load(&self) -> StorageResult<Option<DeviceSnapshot>> {
        (**self).load()
    }

    fn save(&self, snapshot: &DeviceSnapshot) -> StorageResult<()> {
        (**self).save(snapshot)
    }
}
