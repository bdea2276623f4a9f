use crate::{
    cache::ArtifactCache,
    enums::{Encoding, VolumeKind},
    volume_loader::{VolumeLoaderError, volumetric_suffix},
};

use bytes::Bytes;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix that tells mask identifiers apart from volume identifiers.
pub const MASK_ID_PREFIX: &str = "mask_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeRecord {
    pub file_id: String,
    /// Name the file was uploaded under
    pub filename: String,
    pub file_path: PathBuf,
    pub size: u64,
    pub kind: VolumeKind,
    /// Volume a segmentation mask annotates. Not checked for existence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_volume_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Empty file")]
    EmptyContent,

    #[error("Invalid file type for {0:?}. Only .nii and .nii.gz files are supported.")]
    UnsupportedFormat(String),

    #[error("Storage error: {0}")]
    Io(#[from] io::Error),
}

/// Maps identifiers to uploaded files in a single storage directory.
///
/// Files are stored as `<id><suffix>` and every record lives in memory.
/// On startup the directory is scanned so files uploaded by an earlier run
/// stay reachable, although only with minimal metadata. Deleting a record
/// also evicts its cached artifacts.
pub struct FileRegistry {
    storage_dir: PathBuf,
    records: RwLock<IndexMap<String, VolumeRecord>>,
    cache: Arc<ArtifactCache>,
}

impl FileRegistry {
    /// Open (creating if needed) `storage_dir` and register the volumetric
    /// files already in it. Files named with [`MASK_ID_PREFIX`] come back as
    /// segmentation masks.
    pub fn open(storage_dir: impl Into<PathBuf>, cache: Arc<ArtifactCache>) -> Result<Self, RegistryError> {
        let storage_dir = storage_dir.into();
        fs::create_dir_all(&storage_dir)?;
        let records = Self::rehydrate(&storage_dir)?;
        info!(dir = %storage_dir.display(), files = records.len(), "file registry opened");

        Ok(Self {
            storage_dir,
            records: RwLock::new(records),
            cache,
        })
    }

    fn rehydrate(storage_dir: &Path) -> io::Result<IndexMap<String, VolumeRecord>> {
        let mut entries: Vec<_> = fs::read_dir(storage_dir)?
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .collect();
        entries.sort_by_key(|entry| entry.file_name());

        let mut records = IndexMap::with_capacity(entries.len());
        for entry in entries {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                warn!(path = %entry.path().display(), "skipping non UTF-8 file name");
                continue;
            };
            let Some(suffix) = volumetric_suffix(&name) else {
                continue;
            };
            let file_id = name[..name.len() - suffix.len()].to_owned();
            let kind = if file_id.starts_with(MASK_ID_PREFIX) {
                VolumeKind::SegmentationMask
            } else {
                VolumeKind::Volume
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            records.insert(
                file_id.clone(),
                VolumeRecord {
                    file_id,
                    filename: name,
                    file_path: entry.path(),
                    size,
                    kind,
                    base_volume_id: None,
                },
            );
        }
        Ok(records)
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Store an uploaded volume under a fresh identifier.
    pub fn save(&self, content: &[u8], filename: &str) -> Result<String, RegistryError> {
        self.store(content, filename, Uuid::new_v4().to_string(), VolumeKind::Volume, None)
    }

    /// Store a segmentation mask, optionally linked to the volume it annotates.
    pub fn save_mask(
        &self,
        content: &[u8],
        filename: &str,
        base_volume_id: Option<String>,
    ) -> Result<String, RegistryError> {
        self.store(
            content,
            filename,
            format!("{MASK_ID_PREFIX}{}", Uuid::new_v4()),
            VolumeKind::SegmentationMask,
            base_volume_id,
        )
    }

    fn store(
        &self,
        content: &[u8],
        filename: &str,
        file_id: String,
        kind: VolumeKind,
        base_volume_id: Option<String>,
    ) -> Result<String, RegistryError> {
        let suffix = volumetric_suffix(filename)
            .ok_or_else(|| RegistryError::UnsupportedFormat(filename.to_owned()))?;
        if content.is_empty() {
            return Err(RegistryError::EmptyContent);
        }

        let file_path = self.storage_dir.join(format!("{file_id}{suffix}"));
        fs::write(&file_path, content)?;

        let record = VolumeRecord {
            file_id: file_id.clone(),
            filename: filename.to_owned(),
            file_path,
            size: content.len() as u64,
            kind,
            base_volume_id,
        };
        info!(file_id = %record.file_id, filename, size = record.size, ?kind, "file stored");
        self.records.write().insert(file_id.clone(), record);

        Ok(file_id)
    }

    pub fn get(&self, file_id: &str) -> Option<VolumeRecord> {
        self.records.read().get(file_id).cloned()
    }

    pub fn get_path(&self, file_id: &str) -> Option<PathBuf> {
        self.records.read().get(file_id).map(|r| r.file_path.clone())
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.records.read().contains_key(file_id)
    }

    /// Wire blob of `file_id` in `encoding`, or `None` for an unknown id.
    ///
    /// A delete that lands while the blob is being computed would miss the
    /// entry the computation inserts afterwards, so liveness is checked
    /// again once the blob is in the cache.
    pub fn artifact(
        &self,
        file_id: &str,
        encoding: Encoding,
    ) -> Option<Result<Bytes, Arc<VolumeLoaderError>>> {
        let path = self.get_path(file_id)?;
        let blob = self.cache.get_or_compute_with(file_id, encoding, &path);
        if !self.contains(file_id) {
            debug!(file_id, "deleted while computing, dropping cached artifact");
            self.cache.evict(file_id);
        }
        Some(blob)
    }

    /// Every record, in registration order.
    pub fn list(&self) -> Vec<VolumeRecord> {
        self.records.read().values().cloned().collect()
    }

    pub fn list_kind(&self, kind: VolumeKind) -> Vec<VolumeRecord> {
        self.records
            .read()
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Remove the record, its backing file and its cached artifacts.
    ///
    /// Returns whether a record existed. A backing file that is already
    /// gone is not an error; any other failure to remove it leaves the
    /// record in place.
    pub fn delete(&self, file_id: &str) -> Result<bool, RegistryError> {
        let mut records = self.records.write();
        let Some(record) = records.get(file_id) else {
            return Ok(false);
        };

        match fs::remove_file(&record.file_path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(file_id, path = %record.file_path.display(), "backing file already gone");
            }
            Err(err) => return Err(err.into()),
        }
        records.shift_remove(file_id);
        drop(records);

        self.cache.evict(file_id);
        info!(file_id, "file deleted");
        Ok(true)
    }
}
