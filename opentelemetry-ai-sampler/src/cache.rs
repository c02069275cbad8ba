use crate::decision::ItemCountSample;
use lru::LruCache;
use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Maximum number of distinct item counts kept by an [`ItemCountResultCache`].
pub const ITEM_COUNT_CACHE_CAPACITY: usize = 100;

/// A capacity bounded LRU map shared between threads.
///
/// The lock is held only for a single map operation. Misses build the value
/// outside of the lock and then insert it; if another thread won the race its
/// value is returned instead.
///
/// Nothing relies on an entry being retained: a zero capacity or a poisoned
/// lock turns the cache into a pass-through.
pub(crate) struct BoundedCache<K, V> {
    entries: Option<Mutex<LruCache<K, V>>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    pub(crate) fn new(capacity: usize) -> Self {
        BoundedCache {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub(crate) fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.as_ref()?.lock().ok()?.get(key).cloned()
    }

    pub(crate) fn get_or_insert_with<Q, F>(&self, key: &Q, make: F) -> V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(key) {
            return value;
        }

        let value = make();
        let Some(Ok(mut entries)) = self.entries.as_ref().map(Mutex::lock) else {
            return value;
        };
        if let Some(existing) = entries.get(key) {
            return existing.clone();
        }
        entries.put(key.to_owned(), value.clone());
        value
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .as_ref()
            .and_then(|entries| entries.lock().ok().map(|entries| entries.len()))
            .unwrap_or_default()
    }

    fn capacity(&self) -> usize {
        self.entries
            .as_ref()
            .and_then(|entries| entries.lock().ok().map(|entries| entries.cap().get()))
            .unwrap_or_default()
    }
}

impl<K, V> fmt::Debug for BoundedCache<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedCache")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

/// Registry of the [`ItemCountSample`]s handed out by the sampler, keyed by
/// item count.
///
/// In practice there is one entry per distinct sampling percentage in use, so
/// the cache rarely evicts. Concurrent callers asking for the same item count
/// may briefly build equal samples, but every caller gets a sample with the
/// requested item count and at most one is stored.
#[derive(Debug)]
pub struct ItemCountResultCache {
    samples: BoundedCache<u64, ItemCountSample>,
}

impl ItemCountResultCache {
    /// Creates an empty cache holding up to [`ITEM_COUNT_CACHE_CAPACITY`]
    /// item counts.
    pub fn new() -> Self {
        Self::with_capacity(ITEM_COUNT_CACHE_CAPACITY)
    }

    /// Creates an empty cache holding up to `capacity` item counts.
    pub fn with_capacity(capacity: usize) -> Self {
        ItemCountResultCache {
            samples: BoundedCache::new(capacity),
        }
    }

    /// Returns the sample for `item_count`, creating and caching it on first
    /// use.
    pub fn get_or_create(&self, item_count: u64) -> ItemCountSample {
        self.samples
            .get_or_insert_with(&item_count, || ItemCountSample::new(item_count))
    }

    /// Number of item counts currently cached.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ItemCountResultCache {
    fn default() -> Self {
        Self::new()
    }
}
