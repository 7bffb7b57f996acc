use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::decoder::TextureData;
use crate::tile_key::TileKey;

struct CacheEntry {
    data: Arc<TextureData>,
    size: u64,
    last_used: u64,
    updated_at_ms: u64,
    pinned: bool,
}

struct Inner {
    entries: HashMap<TileKey, CacheEntry>,
    recency: BTreeMap<u64, TileKey>,
    used_bytes: u64,
    next_stamp: u64,
}

/// Memory-bounded texture store shared between retrieval workers (insert) and
/// the selector (lookup). Exceeding the hard capacity evicts least-recently
/// used entries down to the low-water mark; pinned entries are never evicted.
pub struct MemoryCache {
    capacity: u64,
    low_water: u64,
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new(capacity: u64, low_water: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            low_water: low_water.min(capacity),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                used_bytes: 0,
                next_stamp: 0,
            }),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used_bytes(&self) -> u64 {
        self.lock().used_bytes
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Looks up a texture and marks it most recently used.
    pub fn get(&self, key: TileKey) -> Option<Arc<TextureData>> {
        let mut inner = self.lock();
        let stamp = inner.next_stamp;
        inner.next_stamp += 1;
        let entry = inner.entries.get_mut(&key)?;
        let data = entry.data.clone();
        let old_stamp = std::mem::replace(&mut entry.last_used, stamp);
        inner.recency.remove(&old_stamp);
        inner.recency.insert(stamp, key);
        Some(data)
    }

    pub fn contains(&self, key: TileKey) -> bool {
        self.lock().entries.contains_key(&key)
    }

    /// Epoch milliseconds at which the entry was last written, used by the
    /// expiry sweep.
    pub fn updated_at_ms(&self, key: TileKey) -> Option<u64> {
        self.lock().entries.get(&key).map(|e| e.updated_at_ms)
    }

    /// Inserts or replaces a texture, then evicts least-recently-used entries
    /// until usage is back under the low-water mark if the capacity was
    /// exceeded.
    pub fn put(&self, key: TileKey, data: Arc<TextureData>, updated_at_ms: u64) {
        let size = data.size_in_bytes;
        let mut inner = self.lock();
        let stamp = inner.next_stamp;
        inner.next_stamp += 1;

        let pinned = if let Some(old) = inner.entries.remove(&key) {
            inner.recency.remove(&old.last_used);
            inner.used_bytes -= old.size;
            old.pinned
        } else {
            false
        };

        inner.entries.insert(
            key,
            CacheEntry {
                data,
                size,
                last_used: stamp,
                updated_at_ms,
                pinned,
            },
        );
        inner.recency.insert(stamp, key);
        inner.used_bytes += size;

        if inner.used_bytes > self.capacity {
            self.evict_to_low_water(&mut inner);
        }
    }

    /// Marks an entry exempt from eviction. Applies when the entry appears if
    /// the key is not yet resident.
    pub fn set_pinned(&self, key: TileKey, pinned: bool) {
        if let Some(entry) = self.lock().entries.get_mut(&key) {
            entry.pinned = pinned;
        }
    }

    pub fn remove(&self, key: TileKey) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.remove(&key) {
            inner.recency.remove(&entry.last_used);
            inner.used_bytes -= entry.size;
        }
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.recency.clear();
        inner.used_bytes = 0;
    }

    fn evict_to_low_water(&self, inner: &mut Inner) {
        let mut victims = Vec::new();
        let mut projected = inner.used_bytes;
        for (stamp, key) in &inner.recency {
            if projected <= self.low_water {
                break;
            }
            let entry = &inner.entries[key];
            if entry.pinned {
                continue;
            }
            projected -= entry.size;
            victims.push((*stamp, *key));
        }
        for (stamp, key) in victims {
            if let Some(entry) = inner.entries.remove(&key) {
                inner.used_bytes -= entry.size;
            }
            inner.recency.remove(&stamp);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
