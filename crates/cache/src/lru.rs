//! Capacity-bounded LRU cache with a low-water mark
//!
//! Entries carry a caller-supplied size. Once an insertion would push the
//! used capacity past the limit, least recently used entries are evicted
//! until usage drops to the low-water mark, so that a full cache does not
//! evict one entry per insertion.
//!
//! Every entry that leaves the cache (explicit removal, replacement,
//! eviction, expiry or `clear`) is handed to a [`RemovalListener`]
//! synchronously, before the removal completes. [`LruMemoryCache::discard_all`]
//! is the one exit that bypasses the listener.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Ratio of capacity used as the low-water mark when none is given
pub const DEFAULT_LOW_WATER_RATIO: f64 = 0.75;

/// Returns the default low-water mark for a capacity (75%, rounded down)
pub fn default_low_water(capacity: usize) -> usize {
    (capacity as f64 * DEFAULT_LOW_WATER_RATIO) as usize
}

/// Why an entry left the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// Removed by an explicit `remove` call
    Explicit,
    /// Displaced by a `put` with the same key
    Replaced,
    /// Evicted to make room for a new entry
    Evicted,
    /// Trimmed because it was not used recently enough
    Expired,
    /// Removed by `clear`
    Cleared,
}

impl RemovalCause {
    /// Returns true if the cache removed the entry on its own
    pub fn was_evicted(&self) -> bool {
        matches!(self, RemovalCause::Evicted | RemovalCause::Expired)
    }
}

/// Receives every value that leaves an [`LruMemoryCache`]
///
/// Called from inside the cache's own mutation logic, so implementations
/// must not assume the cache is in a consistent state to observe.
pub trait RemovalListener<K, V> {
    /// Takes ownership of a removed value
    fn entry_removed(&mut self, key: &K, value: V, cause: RemovalCause);

    /// Whether `new` is the same underlying object as `old`
    ///
    /// When a `put` replaces a key's value with the same object, the entry's
    /// size and recency are updated but nothing is handed to the listener.
    fn same_value(&self, _old: &V, _new: &V) -> bool {
        false
    }
}

/// Listener that simply drops removed values
impl<K, V> RemovalListener<K, V> for () {
    fn entry_removed(&mut self, _key: &K, _value: V, _cause: RemovalCause) {}
}

/// Errors constructing a bounded cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CapacityError {
    #[error("cache capacity must be at least 1")]
    ZeroCapacity,
    #[error("low-water mark {low_water} must be less than capacity {capacity}")]
    LowWaterTooHigh { capacity: usize, low_water: usize },
}

/// Checks a capacity/low-water pair
pub fn validate_capacity(capacity: usize, low_water: usize) -> Result<(), CapacityError> {
    if capacity == 0 {
        return Err(CapacityError::ZeroCapacity);
    }
    if low_water >= capacity {
        return Err(CapacityError::LowWaterTooHigh { capacity, low_water });
    }
    Ok(())
}

struct Entry<V> {
    value: V,
    size: usize,
    last_used: Instant,
}

/// Bounded LRU cache that reports removals to a listener
///
/// Not thread-safe; callers sharing a cache across threads must serialize
/// access themselves.
///
/// # Example
///
/// ```
/// use gpu_object_cache::lru::LruMemoryCache;
///
/// let mut cache: LruMemoryCache<&str, u32> = LruMemoryCache::new(2).unwrap();
/// cache.put("a", 1, 1);
/// cache.put("b", 2, 1);
/// cache.put("c", 3, 1);
///
/// assert!(!cache.contains_key(&"a"));
/// assert_eq!(cache.get(&"c"), Some(&3));
/// ```
pub struct LruMemoryCache<K, V, L = ()> {
    entries: HashMap<K, Entry<V>>,

    /// Most recently used at back, least recently used at front
    lru_queue: VecDeque<K>,

    capacity: usize,
    low_water: usize,
    used_capacity: usize,

    listener: L,
}

impl<K, V> LruMemoryCache<K, V, ()>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache that drops removed values
    pub fn new(capacity: usize) -> Result<Self, CapacityError> {
        Self::with_listener(capacity, ())
    }
}

impl<K, V, L> LruMemoryCache<K, V, L>
where
    K: Eq + Hash + Clone,
    L: RemovalListener<K, V>,
{
    /// Create a cache with the default low-water mark
    pub fn with_listener(capacity: usize, listener: L) -> Result<Self, CapacityError> {
        Self::with_low_water(capacity, default_low_water(capacity), listener)
    }

    /// Create a cache with an explicit low-water mark
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError`] if `capacity` is zero or `low_water` is not
    /// below `capacity`.
    pub fn with_low_water(
        capacity: usize,
        low_water: usize,
        listener: L,
    ) -> Result<Self, CapacityError> {
        validate_capacity(capacity, low_water)?;

        Ok(Self {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            capacity,
            low_water,
            used_capacity: 0,
            listener,
        })
    }

    /// Retrieve a value and mark it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let entry = self.entries.get_mut(key)?;
        entry.last_used = Instant::now();
        self.touch(key);
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Retrieve a value without updating recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Check if a key is present without updating recency
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Store a value of the given size
    ///
    /// A value already stored under `key` is handed to the listener as
    /// [`RemovalCause::Replaced`] before any eviction runs. If the insertion
    /// would exceed capacity, least recently used entries are evicted down to
    /// the low-water mark or until `size` fits. A value larger than the whole
    /// capacity is still stored, after everything else has been evicted.
    ///
    /// Re-putting the same value (per [`RemovalListener::same_value`]) keeps
    /// the stored value and evicts as if it were a fresh insertion, without
    /// ever evicting the entry itself.
    pub fn put(&mut self, key: K, value: V, size: usize) {
        let same_value = self
            .entries
            .get(&key)
            .is_some_and(|entry| self.listener.same_value(&entry.value, &value));

        // The stored value is kept and the duplicate handle dropped; the
        // entry is detached so that eviction below only considers others.
        let value = match self.entries.remove(&key) {
            Some(old) if same_value => {
                self.used_capacity = self.used_capacity.saturating_sub(old.size);
                self.lru_queue.retain(|k| k != &key);
                old.value
            }
            Some(old) => {
                self.used_capacity = self.used_capacity.saturating_sub(old.size);
                self.lru_queue.retain(|k| k != &key);
                self.listener.entry_removed(&key, old.value, RemovalCause::Replaced);
                value
            }
            None => value,
        };

        if self.used_capacity.saturating_add(size) > self.capacity {
            self.make_space(size);
        }

        self.used_capacity = self.used_capacity.saturating_add(size);
        self.entries.insert(
            key.clone(),
            Entry {
                value,
                size,
                last_used: Instant::now(),
            },
        );
        self.lru_queue.push_back(key);
    }

    /// Remove an entry, handing its value to the listener
    ///
    /// Returns false if the key was not present.
    pub fn remove(&mut self, key: &K) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.used_capacity = self.used_capacity.saturating_sub(entry.size);
                self.lru_queue.retain(|k| k != key);
                self.listener.entry_removed(key, entry.value, RemovalCause::Explicit);
                true
            }
            None => false,
        }
    }

    /// Evict every entry that has not been used within `max_age`
    ///
    /// Returns the number of entries trimmed.
    pub fn trim_to_age(&mut self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut trimmed = 0;

        loop {
            let expired = match self.lru_queue.front() {
                Some(key) => self.entries.get(key).map_or(true, |entry| {
                    now.saturating_duration_since(entry.last_used) > max_age
                }),
                None => break,
            };
            if !expired {
                break;
            }

            let Some(key) = self.lru_queue.pop_front() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&key) {
                self.used_capacity = self.used_capacity.saturating_sub(entry.size);
                self.listener.entry_removed(&key, entry.value, RemovalCause::Expired);
                trimmed += 1;
            }
        }

        trimmed
    }

    /// Remove every entry, handing each value to the listener in LRU order
    pub fn clear(&mut self) {
        while let Some(key) = self.lru_queue.pop_front() {
            if let Some(entry) = self.entries.remove(&key) {
                self.listener.entry_removed(&key, entry.value, RemovalCause::Cleared);
            }
        }
        self.entries.clear();
        self.used_capacity = 0;
    }

    /// Drop every entry without notifying the listener
    ///
    /// Leaves the cache in the same state as a freshly constructed one.
    pub fn discard_all(&mut self) {
        self.entries.clear();
        self.lru_queue.clear();
        self.used_capacity = 0;
    }

    /// Iterate live entries from least to most recently used
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.lru_queue
            .iter()
            .filter_map(|key| self.entries.get(key).map(|entry| (key, &entry.value)))
    }

    /// Move a key to the back of the LRU queue (mark as most recently used)
    fn touch(&mut self, key: &K) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.clone());
    }

    /// Evict from the front until usage is at the low-water mark and
    /// `required` more fits
    fn make_space(&mut self, required: usize) {
        while let Some(key) = self.lru_queue.front() {
            let free = self.capacity.saturating_sub(self.used_capacity);
            if self.used_capacity <= self.low_water && free >= required {
                break;
            }

            let key = key.clone();
            self.lru_queue.pop_front();
            if let Some(entry) = self.entries.remove(&key) {
                self.used_capacity = self.used_capacity.saturating_sub(entry.size);
                self.listener.entry_removed(&key, entry.value, RemovalCause::Evicted);
            }
        }
    }
}

impl<K, V, L> LruMemoryCache<K, V, L> {
    /// Maximum total entry size
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Usage the cache evicts down to once capacity is exceeded
    pub fn low_water(&self) -> usize {
        self.low_water
    }

    /// Sum of the sizes of all live entries
    pub fn used_capacity(&self) -> usize {
        self.used_capacity
    }

    /// Number of live entries
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }
}
