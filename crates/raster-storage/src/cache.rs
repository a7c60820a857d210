//! In-memory LRU cache of loaded masks.
//!
//! A job list often masks many inputs with the same mask file; reading and
//! partitioning it once per run is enough.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use lru::LruCache;
use raster_common::{RasterError, RasterResult};
use raster_core::{GroupId, Mask};
use tokio::sync::RwLock;

use crate::io::{read_mask, read_mask_with_subsets};

/// Statistics for the mask cache
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MaskCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl MaskCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Masks keyed by file path and grouping.
pub struct MaskCache {
    cache: RwLock<LruCache<String, Arc<Mask>>>,
    stats: RwLock<MaskCacheStats>,
}

impl MaskCache {
    /// Create a cache holding at most `capacity` masks (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: RwLock::new(LruCache::new(capacity)),
            stats: RwLock::new(MaskCacheStats::default()),
        }
    }

    fn key(path: &Path, subsets: bool, grouping: Option<&BTreeMap<i32, GroupId>>) -> String {
        let mut key = path.display().to_string();
        if subsets {
            key.push_str("#subsets");
        }
        if let Some(grouping) = grouping {
            for (value, group) in grouping {
                key.push_str(&format!(";{}={}", value, group));
            }
        }
        key
    }

    /// Return the cached mask for `path`, reading it on a blocking worker
    /// thread on a miss.
    ///
    /// With `subsets` the mask is partitioned by `grouping` (or by value).
    pub async fn get_or_load(
        &self,
        path: &Path,
        subsets: bool,
        grouping: Option<&BTreeMap<i32, GroupId>>,
    ) -> RasterResult<Arc<Mask>> {
        let key = Self::key(path, subsets, grouping);
        if let Some(mask) = self.cache.write().await.get(&key) {
            self.stats.write().await.hits += 1;
            return Ok(Arc::clone(mask));
        }

        let owned_path = path.to_path_buf();
        let owned_grouping = grouping.cloned();
        let mask = tokio::task::spawn_blocking(move || {
            if subsets {
                read_mask_with_subsets(&owned_path, owned_grouping.as_ref())
            } else {
                read_mask(&owned_path)
            }
        })
        .await
        .map_err(|e| RasterError::backend(format!("mask loader task failed: {}", e)))??;

        let mut cache = self.cache.write().await;
        cache.put(key, Arc::clone(&mask));
        let mut stats = self.stats.write().await;
        stats.misses += 1;
        stats.entries = cache.len();
        Ok(mask)
    }

    pub async fn stats(&self) -> MaskCacheStats {
        self.stats.read().await.clone()
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
        self.stats.write().await.entries = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{asc, FixtureDir};

    #[tokio::test]
    async fn test_second_load_hits() {
        let fixtures = FixtureDir::new();
        let path = fixtures.write("mask.asc", asc::TINY_CENTER);
        let cache = MaskCache::new(2);

        let first = cache.get_or_load(&path, false, None).await.unwrap();
        let second = cache.get_or_load(&path, false, None).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.valid_count(), 3);

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[tokio::test]
    async fn test_grouping_is_part_of_key() {
        let fixtures = FixtureDir::new();
        let path = fixtures.write("mask.asc", asc::TINY_CENTER);
        let cache = MaskCache::new(4);

        let by_value = cache.get_or_load(&path, true, None).await.unwrap();
        let merged = BTreeMap::from([(1, 1), (2, 1), (4, 1)]);
        let grouped = cache.get_or_load(&path, true, Some(&merged)).await.unwrap();
        assert_eq!(by_value.subsets().len(), 3);
        assert_eq!(grouped.subsets().len(), 1);
        assert_eq!(cache.stats().await.misses, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_loads_on_worker_threads() {
        let fixtures = FixtureDir::new();
        let path = fixtures.write("mask.asc", asc::TINY_CENTER);
        let cache = MaskCache::new(2);

        let (a, b) = tokio::join!(
            cache.get_or_load(&path, false, None),
            cache.get_or_load(&path, true, None)
        );
        assert_eq!(a.unwrap().valid_count(), 3);
        assert_eq!(b.unwrap().subsets().len(), 3);
        assert_eq!(cache.stats().await.entries, 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_cached() {
        let fixtures = FixtureDir::new();
        let cache = MaskCache::new(1);
        assert!(cache.get_or_load(&fixtures.path("nope.asc"), false, None).await.is_err());
        assert_eq!(cache.stats().await.entries, 0);
    }
}
