//! Persistent mapping from segment id to segment file name.
//!
//! The registry is the durable metadata file living alongside the segment
//! files it describes. It is loaded once at startup and rewritten whole-file
//! on every segment addition or removal, using the same write-temp-then-rename
//! discipline the rest of the crate uses for crash-safe metadata updates.

use crate::error::{CaskError, CaskResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default minimum width (in decimal digits) of the zero-padded segment id
/// in a default segment file name.
const SEGMENT_ID_PAD: usize = 2;

/// Builds the default file name for a segment id: `data_{id:02}.bin`.
#[must_use]
pub fn default_segment_file_name(id: u64) -> String {
    format!("data_{id:0width$}.bin", width = SEGMENT_ID_PAD)
}

/// Persistent id → file name mapping for the segments of a store.
#[derive(Debug, Default)]
pub struct Registry {
    /// Path to the registry's own JSON file on disk.
    path: PathBuf,
    /// id → bare file name, ids always non-negative.
    segments: BTreeMap<u64, String>,
}

impl Registry {
    /// Loads the registry from `path` if it exists, otherwise starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`CaskError::RegistryCorrupt`] if the file exists but does not
    /// parse as the expected JSON shape, or contains a non-integer key.
    pub fn load(path: &Path) -> CaskResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "registry file does not exist, starting empty");
            return Ok(Self {
                path: path.to_path_buf(),
                segments: BTreeMap::new(),
            });
        }

        let data = fs::read_to_string(path)?;
        let raw: BTreeMap<String, String> = serde_json::from_str(&data)
            .map_err(|e| CaskError::registry_corrupt(format!("invalid registry JSON: {e}")))?;

        let mut segments = BTreeMap::new();
        for (id_str, file_name) in raw {
            let id: u64 = id_str.parse().map_err(|_| {
                CaskError::registry_corrupt(format!("non-integer segment id {id_str:?}"))
            })?;
            segments.insert(id, file_name);
        }

        info!(path = %path.display(), count = segments.len(), "loaded registry");

        Ok(Self {
            path: path.to_path_buf(),
            segments,
        })
    }

    /// Serializes the registry to JSON (indented, decimal string keys) and
    /// writes it to its path.
    pub fn save(&self) -> CaskResult<()> {
        let raw: BTreeMap<String, &String> = self
            .segments
            .iter()
            .map(|(id, name)| (id.to_string(), name))
            .collect();

        let json = serde_json::to_string_pretty(&raw)?;

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &self.path)?;

        debug!(path = %self.path.display(), count = self.segments.len(), "saved registry");
        Ok(())
    }

    /// Returns the directory containing the registry and its segment files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Returns the id of the active segment: the maximum known id.
    ///
    /// # Errors
    ///
    /// Returns [`CaskError::RegistryCorrupt`] if the registry holds no
    /// segments.
    pub fn active_id(&self) -> CaskResult<u64> {
        self.segments
            .keys()
            .next_back()
            .copied()
            .ok_or_else(|| CaskError::registry_corrupt("registry has no segments"))
    }

    /// Returns all known segment ids in ascending order.
    #[must_use]
    pub fn ids_sorted(&self) -> Vec<u64> {
        self.segments.keys().copied().collect()
    }

    /// Returns whether the registry currently holds no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the full path to the segment file for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CaskError::NotOpen`] if `id` is not a known segment.
    pub fn segment_path(&self, id: u64) -> CaskResult<PathBuf> {
        let name = self
            .segments
            .get(&id)
            .ok_or(CaskError::NotOpen { segment_id: id })?;
        Ok(self.dir().join(name))
    }

    /// Allocates a new segment: id `max(existing) + 1`, or `0` if empty.
    ///
    /// Fails if a file with the default name already exists on disk. Callers
    /// must follow this with [`Registry::save`] to persist the new mapping.
    ///
    /// # Errors
    ///
    /// Returns [`CaskError::RegistryCorrupt`] if the default file name for
    /// the new id already exists on disk.
    pub fn add_segment(&mut self) -> CaskResult<u64> {
        let new_id = self.segments.keys().next_back().map_or(0, |&max| max + 1);
        let name = default_segment_file_name(new_id);
        let path = self.dir().join(&name);

        if path.exists() {
            return Err(CaskError::registry_corrupt(format!(
                "segment file {} already exists",
                path.display()
            )));
        }

        self.segments.insert(new_id, name);
        info!(segment_id = new_id, "allocated new segment");
        Ok(new_id)
    }

    /// Deletes the on-disk file for `id` (if present) and erases its
    /// mapping. Does not persist the registry — callers must call
    /// [`Registry::save`].
    pub fn remove_segment(&mut self, id: u64) -> CaskResult<()> {
        if let Some(name) = self.segments.remove(&id) {
            let path = self.dir().join(&name);
            if path.exists() {
                fs::remove_file(&path)?;
            }
            info!(segment_id = id, "removed segment");
        }
        Ok(())
    }
}
