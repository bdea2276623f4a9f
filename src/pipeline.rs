use crate::{
    enums::Encoding,
    volume_loader::{VolumeLoader, VolumeLoaderError, VolumeSource},
    wire::BinaryPacker,
};

use bytes::Bytes;
use std::{path::Path, sync::Arc};
use tracing::debug;

/// Load, normalize, pack. The unit of work the [`ArtifactCache`] memoizes.
///
/// [`ArtifactCache`]: crate::cache::ArtifactCache
#[derive(Clone)]
pub struct ProcessingPipeline {
    source: Arc<dyn VolumeSource>,
}

impl Default for ProcessingPipeline {
    fn default() -> Self {
        Self::new(Arc::new(VolumeLoader))
    }
}

impl ProcessingPipeline {
    pub fn new(source: Arc<dyn VolumeSource>) -> Self {
        Self { source }
    }

    /// Turn the volume at `path` into a normalized intensity blob.
    pub fn process(&self, path: &Path) -> Result<Bytes, VolumeLoaderError> {
        self.process_as(path, Encoding::Intensity)
    }

    pub fn process_as(&self, path: &Path, encoding: Encoding) -> Result<Bytes, VolumeLoaderError> {
        let volume = self.source.load(path)?;
        debug!(path = %path.display(), dim = ?volume.dim(), ?encoding, "packing volume");

        Ok(match encoding {
            Encoding::Intensity => BinaryPacker::pack(&volume.normalized())?,
            Encoding::Labels => BinaryPacker::pack_labels(&volume.labels())?,
        })
    }
}
