//! GPU resource cache with deferred disposal
//!
//! Bounds GPU memory with an LRU cache, but never frees a native handle at
//! the moment it is evicted. Eviction can happen in the middle of a frame
//! when the working set briefly exceeds capacity, and a texture or program
//! evicted then may still be referenced by draw calls issued earlier in the
//! same frame. Evicted resources are parked in a [`DisposalQueue`] instead,
//! and released in one batch by [`GpuResourceCache::dispose_evicted_objects`]
//! once the frame's draw calls are done.
//!
//! On context loss every handle is already invalid, so
//! [`GpuResourceCache::context_lost`] discards live and queued resources
//! without issuing any disposal call.

use std::hash::Hash;
use std::time::Duration;

use crate::config::GpuCacheConfig;
use crate::lru::{CapacityError, LruMemoryCache, RemovalCause, RemovalListener};
use crate::resource::GpuResource;

/// Resources evicted since the last flush, in eviction order
///
/// Filled by the base cache's removal hand-off and consumed wholesale by
/// [`GpuResourceCache::dispose_evicted_objects`].
#[derive(Debug)]
pub struct DisposalQueue<R> {
    pending: Vec<R>,
}

impl<R> DisposalQueue<R> {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Number of resources awaiting disposal
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Iterate queued resources in the order they will be disposed
    pub fn iter(&self) -> impl Iterator<Item = &R> + '_ {
        self.pending.iter()
    }

    /// Drop every queued resource without disposing it
    fn discard(&mut self) {
        self.pending.clear();
    }
}

impl<K, R: GpuResource> RemovalListener<K, R> for DisposalQueue<R> {
    fn entry_removed(&mut self, _key: &K, value: R, _cause: RemovalCause) {
        self.pending.push(value);
    }

    fn same_value(&self, old: &R, new: &R) -> bool {
        old.same_object(new)
    }
}

/// Outcome of one end-of-frame flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisposalReport {
    /// Resources released successfully
    pub disposed: usize,
    /// Resources whose native release failed (not retried)
    pub failed: usize,
}

impl DisposalReport {
    /// Total resources taken off the queue
    pub fn total(&self) -> usize {
        self.disposed + self.failed
    }

    /// Returns true if no disposal failed
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Cache occupancy level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    /// Less than 50% of capacity in use
    Low,
    /// 50-75% in use
    Moderate,
    /// 75-90% in use
    High,
    /// More than 90% in use
    Critical,
}

impl MemoryPressure {
    /// Get the pressure level from a utilization ratio (0.0 to 1.0)
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization < 0.5 {
            MemoryPressure::Low
        } else if utilization < 0.75 {
            MemoryPressure::Moderate
        } else if utilization < 0.90 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    /// Returns true at High or Critical
    pub fn needs_eviction(&self) -> bool {
        matches!(self, MemoryPressure::High | MemoryPressure::Critical)
    }
}

/// Snapshot of GPU cache occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuCacheStats {
    /// Number of live entries
    pub entry_count: usize,

    /// Total size of live entries
    pub used_capacity: usize,

    /// Maximum total size
    pub capacity: usize,

    /// Size the cache evicts down to once full
    pub low_water: usize,

    /// Evicted resources not yet disposed
    pub pending_disposal: usize,
}

impl GpuCacheStats {
    /// Calculate capacity utilization (0.0 to 1.0, may exceed 1.0 for an
    /// oversized entry)
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.used_capacity as f64 / self.capacity as f64
        }
    }

    pub fn pressure(&self) -> MemoryPressure {
        MemoryPressure::from_utilization(self.utilization())
    }
}

/// LRU cache of GPU resources whose disposal is deferred to frame end
///
/// Intended to be driven from the render thread:
///
/// 1. draw calls `get`/`put` resources; evictions go to the disposal queue
/// 2. after the frame's last draw call, `dispose_evicted_objects` releases
///    everything queued
/// 3. on surface/context recreation, `context_lost` resets the cache
///    before any further `get`/`put`
///
/// No internal locking is done; access from several threads must be
/// serialized by the caller.
///
/// # Example
///
/// ```
/// use gpu_object_cache::{DisposalError, GpuResource, GpuResourceCache};
///
/// #[derive(Default)]
/// struct DrawContext {
///     deleted_textures: Vec<u32>,
/// }
///
/// #[derive(Debug)]
/// struct Texture {
///     name: u32,
/// }
///
/// impl GpuResource for Texture {
///     type Context = DrawContext;
///
///     fn dispose(&self, dc: &mut DrawContext) -> Result<(), DisposalError> {
///         dc.deleted_textures.push(self.name);
///         Ok(())
///     }
/// }
///
/// let mut dc = DrawContext::default();
/// let mut cache = GpuResourceCache::new(2).unwrap();
///
/// cache.put("a", Texture { name: 1 }, 1);
/// cache.put("b", Texture { name: 2 }, 1);
/// cache.put("c", Texture { name: 3 }, 1);
///
/// // "a" was evicted but is still alive until the frame ends
/// assert!(cache.get(&"a").is_none());
/// assert!(dc.deleted_textures.is_empty());
///
/// cache.dispose_evicted_objects(&mut dc);
/// assert_eq!(dc.deleted_textures, vec![1]);
/// ```
pub struct GpuResourceCache<K, R> {
    entries: LruMemoryCache<K, R, DisposalQueue<R>>,
}

impl<K, R> GpuResourceCache<K, R>
where
    K: Eq + Hash + Clone,
    R: GpuResource,
{
    /// Create a cache with the default 75% low-water mark
    pub fn new(capacity: usize) -> Result<Self, CapacityError> {
        Ok(Self {
            entries: LruMemoryCache::with_listener(capacity, DisposalQueue::new())?,
        })
    }

    /// Create a cache with an explicit low-water mark
    pub fn with_low_water(capacity: usize, low_water: usize) -> Result<Self, CapacityError> {
        Ok(Self {
            entries: LruMemoryCache::with_low_water(capacity, low_water, DisposalQueue::new())?,
        })
    }

    pub fn from_config(config: &GpuCacheConfig) -> Result<Self, CapacityError> {
        Self::with_low_water(config.capacity, config.low_water())
    }

    /// Retrieve a resource and mark it most recently used
    pub fn get(&mut self, key: &K) -> Option<&R> {
        self.entries.get(key)
    }

    /// Check if a key is live without updating recency
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Store a resource of the given size
    ///
    /// Entries evicted to make room, and any different resource previously
    /// stored under `key`, are queued for disposal. Re-putting the same
    /// shared handle under its own key keeps it live with the new size and
    /// recency; only other entries are evicted to make room for it.
    /// A handle must not be live under two keys at once.
    pub fn put(&mut self, key: K, resource: R, size: usize) {
        self.entries.put(key, resource, size);
    }

    /// Remove an entry, queueing its resource for disposal
    pub fn remove(&mut self, key: &K) -> bool {
        self.entries.remove(key)
    }

    /// Evict entries unused for longer than `max_age`, queueing them for
    /// disposal
    pub fn trim_to_age(&mut self, max_age: Duration) -> usize {
        self.entries.trim_to_age(max_age)
    }

    /// Remove every live entry, queueing all of them for disposal
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Release every queued resource against `dc`
    ///
    /// Resources are disposed in the order they were queued. A failed
    /// disposal is logged and counted, and the remaining resources are still
    /// processed. The queue is always empty afterwards: failed resources are
    /// not retried, since the context has already rejected the handle.
    ///
    /// Call once per frame, after the frame's draw calls have been issued.
    pub fn dispose_evicted_objects(&mut self, dc: &mut R::Context) -> DisposalReport {
        let mut report = DisposalReport::default();

        for resource in self.entries.listener_mut().pending.drain(..) {
            match resource.dispose(dc) {
                Ok(()) => {
                    log::debug!("Disposed GPU object '{:?}'", resource);
                    report.disposed += 1;
                }
                Err(err) => {
                    log::error!("Exception disposing GPU object '{:?}': {}", resource, err);
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Forget every live and queued resource without disposing any of them
    ///
    /// The native context these handles belong to is gone, so disposal calls
    /// would be invalid. Resources are dropped as plain values. Afterwards the
    /// cache is indistinguishable from a newly constructed one.
    pub fn context_lost(&mut self) {
        let live = self.entries.entry_count();
        let queued = self.entries.listener().len();

        self.entries.discard_all();
        self.entries.listener_mut().discard();

        log::debug!(
            "GPU context lost, discarded {} cached and {} queued objects",
            live,
            queued
        );
    }

    /// Iterate live entries from least to most recently used
    pub fn iter(&self) -> impl Iterator<Item = (&K, &R)> + '_ {
        self.entries.iter()
    }
}

impl<K, R> GpuResourceCache<K, R> {
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn low_water(&self) -> usize {
        self.entries.low_water()
    }

    pub fn used_capacity(&self) -> usize {
        self.entries.used_capacity()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.entry_count()
    }

    /// Resources evicted and awaiting the next flush
    pub fn disposal_queue(&self) -> &DisposalQueue<R> {
        self.entries.listener()
    }

    pub fn pending_disposal(&self) -> usize {
        self.entries.listener().len()
    }

    pub fn is_pending_empty(&self) -> bool {
        self.entries.listener().is_empty()
    }

    pub fn stats(&self) -> GpuCacheStats {
        GpuCacheStats {
            entry_count: self.entries.entry_count(),
            used_capacity: self.entries.used_capacity(),
            capacity: self.entries.capacity(),
            low_water: self.entries.low_water(),
            pending_disposal: self.entries.listener().len(),
        }
    }
}

impl<K, R> Drop for GpuResourceCache<K, R> {
    fn drop(&mut self) {
        let pending = self.entries.listener().len();
        if pending > 0 {
            log::warn!(
                "GPU object cache dropped with {} objects never disposed",
                pending
            );
        }
    }
}
