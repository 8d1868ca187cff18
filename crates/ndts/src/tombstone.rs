//! Row tombstones, persisted beside the data file.
//!
//! A tombstone marks a global row index (across all chunks of one file) as
//! logically deleted; compaction consumes the set and clears it. The
//! sidecar is a sorted JSON array of u32 indices at `<data file>.tombstones`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{NdtsError, Result};
use crate::io::append_ext;

#[derive(Debug)]
pub struct TombstoneSet {
    path: PathBuf,
    deleted: BTreeSet<u32>,
}

impl TombstoneSet {
    pub fn sidecar_path(data_path: &Path) -> PathBuf {
        append_ext(data_path, ".tombstones")
    }

    /// Load the sidecar for `data_path`; a missing sidecar is an empty set.
    pub fn load(data_path: &Path) -> Result<TombstoneSet> {
        let path = Self::sidecar_path(data_path);
        let deleted = if path.exists() {
            let bytes = fs::read(&path).map_err(|e| NdtsError::io(&path, e))?;
            let indices: Vec<u32> = serde_json::from_slice(&bytes).map_err(|e| {
                NdtsError::corruption(&path, 0, bytes.len() as u64, format!("bad tombstones: {e}"))
            })?;
            indices.into_iter().collect()
        } else {
            BTreeSet::new()
        };
        Ok(TombstoneSet { path, deleted })
    }

    /// Idempotent; returns whether the index was newly marked.
    pub fn mark_deleted(&mut self, index: u32) -> bool {
        self.deleted.insert(index)
    }

    pub fn mark_deleted_batch(&mut self, indices: &[u32]) {
        self.deleted.extend(indices.iter().copied());
    }

    pub fn is_deleted(&self, index: u32) -> bool {
        self.deleted.contains(&index)
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
    }

    pub fn clear(&mut self) {
        self.deleted.clear();
    }

    pub fn save(&self) -> Result<()> {
        if self.deleted.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path).map_err(|e| NdtsError::io(&self.path, e))?;
            }
            return Ok(());
        }
        let indices: Vec<u32> = self.deleted.iter().copied().collect();
        let json = serde_json::to_vec(&indices)
            .map_err(|e| NdtsError::state(format!("tombstone serialization failed: {e}")))?;
        fs::write(&self.path, json).map_err(|e| NdtsError::io(&self.path, e))?;
        Ok(())
    }
}
