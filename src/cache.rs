use crate::{enums::Encoding, pipeline::ProcessingPipeline, volume_loader::VolumeLoaderError};

use bytes::Bytes;
use moka::{policy::EvictionPolicy, sync::Cache};
use std::{path::Path, sync::Arc};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub id: String,
    pub encoding: Encoding,
}

/// Memoizes pipeline output per identifier and encoding.
///
/// Bounded by the total size of the stored blobs, least recently used
/// first. Concurrent requests for the same missing key are coalesced: one
/// caller runs the pipeline, the others wait for its result. Errors are
/// handed to every waiting caller and nothing is stored.
pub struct ArtifactCache {
    pipeline: ProcessingPipeline,
    artifacts: Cache<ArtifactKey, Bytes>,
    max_bytes: u64,
}

impl ArtifactCache {
    pub fn new(pipeline: ProcessingPipeline, max_bytes: u64) -> Self {
        let artifacts = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|_key: &ArtifactKey, blob: &Bytes| -> u32 {
                u32::try_from(blob.len()).unwrap_or(u32::MAX)
            })
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            pipeline,
            artifacts,
            max_bytes,
        }
    }

    /// Intensity blob for `key`, computed from `path` on a miss.
    pub fn get_or_compute(&self, key: &str, path: &Path) -> Result<Bytes, Arc<VolumeLoaderError>> {
        self.get_or_compute_with(key, Encoding::Intensity, path)
    }

    pub fn get_or_compute_with(
        &self,
        key: &str,
        encoding: Encoding,
        path: &Path,
    ) -> Result<Bytes, Arc<VolumeLoaderError>> {
        let mut computed = false;
        let blob = self.artifacts.try_get_with(
            ArtifactKey {
                id: key.to_owned(),
                encoding,
            },
            || {
                computed = true;
                self.pipeline.process_as(path, encoding)
            },
        )?;

        if computed {
            debug!(key, ?encoding, bytes = blob.len(), "artifact computed");
        } else {
            debug!(key, ?encoding, "artifact cache hit");
        }
        Ok(blob)
    }

    /// Drop every cached encoding of `key`.
    pub fn evict(&self, key: &str) {
        for encoding in Encoding::ALL {
            self.artifacts.invalidate(&ArtifactKey {
                id: key.to_owned(),
                encoding,
            });
        }
    }

    pub fn contains(&self, key: &str, encoding: Encoding) -> bool {
        self.artifacts.contains_key(&ArtifactKey {
            id: key.to_owned(),
            encoding,
        })
    }

    pub fn entry_count(&self) -> u64 {
        self.artifacts.run_pending_tasks();
        self.artifacts.entry_count()
    }

    /// Total size of the blobs currently held.
    pub fn resident_bytes(&self) -> u64 {
        self.artifacts.run_pending_tasks();
        self.artifacts.weighted_size()
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{volume::Volume, volume_loader::VolumeSource, wire::HEADER_LEN};
    use ndarray::Array3;
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    #[derive(Default)]
    struct Counting {
        loads: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl VolumeSource for Counting {
        fn load(&self, _path: &Path) -> Result<Volume, VolumeLoaderError> {
            let call = self.loads.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            if self.fail {
                return Err(io::Error::other("disk on fire").into());
            }
            Ok(Volume::new(Array3::from_elem((2, 2, 2), call as f64)))
        }
    }

    fn cache_with(source: Arc<Counting>, max_bytes: u64) -> ArtifactCache {
        ArtifactCache::new(ProcessingPipeline::new(source), max_bytes)
    }

    #[test]
    fn repeated_requests_run_the_pipeline_once() {
        let source = Arc::new(Counting::default());
        let cache = cache_with(source.clone(), 1 << 20);

        let first = cache.get_or_compute("a", Path::new("a.nii")).unwrap();
        let second = cache.get_or_compute("a", Path::new("a.nii")).unwrap();

        assert_eq!(first, second);
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert!(cache.contains("a", Encoding::Intensity));
        assert!(!cache.contains("a", Encoding::Labels));
    }

    #[test]
    fn concurrent_misses_are_coalesced() {
        let source = Arc::new(Counting {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let cache = Arc::new(cache_with(source.clone(), 1 << 20));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || cache.get_or_compute("shared", Path::new("s.nii")).unwrap())
            })
            .collect();
        let blobs: Vec<Bytes> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert!(blobs.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn encodings_are_cached_separately() {
        let source = Arc::new(Counting::default());
        let cache = cache_with(source.clone(), 1 << 20);

        cache.get_or_compute_with("m", Encoding::Intensity, Path::new("m.nii")).unwrap();
        cache.get_or_compute_with("m", Encoding::Labels, Path::new("m.nii")).unwrap();
        cache.get_or_compute_with("m", Encoding::Labels, Path::new("m.nii")).unwrap();

        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn eviction_forces_recomputation() {
        let source = Arc::new(Counting::default());
        let cache = cache_with(source.clone(), 1 << 20);

        cache.get_or_compute_with("a", Encoding::Intensity, Path::new("a.nii")).unwrap();
        cache.get_or_compute_with("a", Encoding::Labels, Path::new("a.nii")).unwrap();
        cache.evict("a");
        assert!(!cache.contains("a", Encoding::Intensity));
        assert!(!cache.contains("a", Encoding::Labels));

        cache.get_or_compute("a", Path::new("a.nii")).unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failures_are_not_cached() {
        let source = Arc::new(Counting {
            fail: true,
            ..Default::default()
        });
        let cache = cache_with(source.clone(), 1 << 20);

        let err = cache.get_or_compute("bad", Path::new("bad.nii")).unwrap_err();
        assert!(matches!(*err, VolumeLoaderError::Io(_)));
        assert!(cache.get_or_compute("bad", Path::new("bad.nii")).is_err());

        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn resident_size_respects_the_budget() {
        let blob_len = (HEADER_LEN + 8 * 4) as u64;
        let source = Arc::new(Counting::default());
        let cache = cache_with(source, blob_len * 2);

        for key in ["a", "b", "c", "d"] {
            cache.get_or_compute(key, Path::new("x.nii")).unwrap();
        }

        assert!(cache.resident_bytes() <= cache.max_bytes());
        assert!(cache.entry_count() <= 2);
    }
}
