//! Cache abstractions for fetched store data.
//!
//! A connection reads the same small objects repeatedly: the mesh info, a
//! shard index entry, a minishard index. The cache lets one connection reuse
//! them across LODs of the same segment. Caches are owned by a connection
//! and dropped with it.
//!
//! # Implementations
//!
//! - [`MemoryCache`]: In-memory cache with optional size limit
//! - [`NoCache`]: Passthrough implementation that caches nothing

use crate::error::{Error, Result};
use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::{Arc, RwLock},
};

/// Future returned by [`Cache::get`].
pub type GetFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + 'a>>;

/// Future returned by [`Cache::put`].
pub type CacheFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Byte storage shared by the requests of one connection.
///
/// Keys identify a request: the URL, plus the byte range for ranged reads.
pub trait Cache: Send + Sync {
    /// Look up the bytes stored under `key`. A miss is `Ok(None)`.
    fn get(&self, key: &str) -> GetFuture<'_>;

    /// Store `data` under `key`, replacing any previous entry.
    fn put(&self, key: &str, data: Vec<u8>) -> CacheFuture<'_>;
}

/// Caches nothing; every lookup misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl Cache for NoCache {
    fn get(&self, _key: &str) -> GetFuture<'_> {
        Box::pin(std::future::ready(Ok(None)))
    }

    fn put(&self, _key: &str, _data: Vec<u8>) -> CacheFuture<'_> {
        Box::pin(std::future::ready(Ok(())))
    }
}

/// An in-memory cache.
///
/// Entries live in a `HashMap` behind a `RwLock`. With a size limit, the
/// oldest insertions are evicted first. An entry larger than the whole limit
/// is not stored.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    data: Arc<RwLock<MemoryCacheInner>>,
    max_size: Option<usize>,
}

#[derive(Debug, Default)]
struct MemoryCacheInner {
    entries: HashMap<String, Vec<u8>>,
    /// Insertion order for eviction.
    order: VecDeque<String>,
    current_size: usize,
}

impl MemoryCacheInner {
    fn remove(&mut self, key: &str) {
        if let Some(old) = self.entries.remove(key) {
            self.current_size -= old.len();
            self.order.retain(|k| k != key);
        }
    }
}

fn poisoned(operation: &'static str) -> Error {
    Error::Cache {
        operation,
        message: "lock poisoned".to_string(),
    }
}

impl MemoryCache {
    /// Create a new memory cache with no size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(MemoryCacheInner::default())),
            max_size: None,
        }
    }

    /// Create a new memory cache with a maximum size in bytes.
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(MemoryCacheInner::default())),
            max_size: Some(max_size),
        }
    }

    /// Current size of cached data in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.read().map_or(0, |d| d.current_size)
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().map_or(0, |d| d.entries.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn put_sync(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let mut cache = self.data.write().map_err(|_| poisoned("put"))?;
        cache.remove(key);

        let data_size = data.len();
        if let Some(max_size) = self.max_size {
            if data_size > max_size {
                return Ok(());
            }
            while cache.current_size + data_size > max_size {
                let Some(oldest) = cache.order.pop_front() else {
                    break;
                };
                if let Some(old) = cache.entries.remove(&oldest) {
                    cache.current_size -= old.len();
                }
            }
        }

        cache.entries.insert(key.to_string(), data);
        cache.order.push_back(key.to_string());
        cache.current_size += data_size;
        Ok(())
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> GetFuture<'_> {
        let result = self
            .data
            .read()
            .map(|d| d.entries.get(key).cloned())
            .map_err(|_| poisoned("get"));
        Box::pin(async move { result })
    }

    fn put(&self, key: &str, data: Vec<u8>) -> CacheFuture<'_> {
        let result = self.put_sync(key, data);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive a future that never waits. Both caches complete immediately.
    fn block_on<F: Future>(f: F) -> F::Output {
        use std::task::{Context, Poll, Waker};

        let mut cx = Context::from_waker(Waker::noop());
        match std::pin::pin!(f).poll(&mut cx) {
            Poll::Ready(output) => output,
            Poll::Pending => panic!("cache future was pending"),
        }
    }

    const INFO: &str = "https://storage.googleapis.com/bucket/seg/mesh/info";
    const SHARD: &str = "https://storage.googleapis.com/bucket/seg/mesh/0a.shard#32-48";

    #[test]
    fn test_no_cache() {
        let cache = NoCache;
        block_on(cache.put(INFO, vec![1, 2, 3])).unwrap();
        assert!(block_on(cache.get(INFO)).unwrap().is_none());
    }

    #[test]
    fn test_memory_cache_basic() {
        let cache = MemoryCache::new();
        assert!(cache.is_empty());

        block_on(cache.put(INFO, vec![1, 2, 3])).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 3);
        assert_eq!(block_on(cache.get(INFO)).unwrap(), Some(vec![1, 2, 3]));
        assert!(block_on(cache.get(SHARD)).unwrap().is_none());
    }

    #[test]
    fn test_memory_cache_eviction_order() {
        let cache = MemoryCache::with_max_size(10);

        block_on(cache.put("a", vec![0; 5])).unwrap();
        block_on(cache.put("b", vec![0; 5])).unwrap();
        assert_eq!(cache.size(), 10);

        // Needs 3 bytes, so the oldest entry goes.
        block_on(cache.put("c", vec![0; 3])).unwrap();
        assert_eq!(cache.size(), 8);
        assert!(block_on(cache.get("a")).unwrap().is_none());
        assert!(block_on(cache.get("b")).unwrap().is_some());
        assert!(block_on(cache.get("c")).unwrap().is_some());
    }

    #[test]
    fn test_memory_cache_skips_oversized() {
        let cache = MemoryCache::with_max_size(4);
        block_on(cache.put("small", vec![0; 2])).unwrap();
        block_on(cache.put("big", vec![0; 5])).unwrap();

        assert!(block_on(cache.get("big")).unwrap().is_none());
        assert!(block_on(cache.get("small")).unwrap().is_some());
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn test_memory_cache_replace() {
        let cache = MemoryCache::new();
        block_on(cache.put(INFO, vec![1, 2, 3])).unwrap();
        block_on(cache.put(INFO, vec![1, 2, 3, 4, 5])).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 5);

        block_on(cache.put(SHARD, vec![9])).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size(), 6);
        assert_eq!(block_on(cache.get(INFO)).unwrap(), Some(vec![1, 2, 3, 4, 5]));
    }
}
