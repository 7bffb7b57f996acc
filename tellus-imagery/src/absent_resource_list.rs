use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::tile_key::TileKey;

struct AbsentEntry {
    attempts: u32,
    last_attempt: instant::Instant,
}

/// Tracks tiles whose retrieval keeps failing so they stop being requested.
///
/// A tile becomes absent once `max_tries` consecutive attempts have failed,
/// and stays absent until either a successful load unmarks it or
/// `min_check_interval` elapses, after which it gets a fresh round of
/// attempts. Shared between the render thread (queries before enqueueing) and
/// retrieval workers (mark/unmark on completion).
pub struct AbsentResourceList {
    max_tries: u32,
    min_check_interval: Duration,
    entries: Mutex<HashMap<TileKey, AbsentEntry>>,
}

impl AbsentResourceList {
    pub fn new(max_tries: u32, min_check_interval: Duration) -> Self {
        Self {
            max_tries: max_tries.max(1),
            min_check_interval,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records one failed attempt for the tile.
    pub fn mark_resource_absent(&self, key: TileKey) {
        let mut entries = lock_entries(&self.entries);
        let entry = entries.entry(key).or_insert(AbsentEntry {
            attempts: 0,
            last_attempt: instant::Instant::now(),
        });
        entry.attempts += 1;
        entry.last_attempt = instant::Instant::now();
    }

    /// Clears the tile's failure history, called on a successful load.
    pub fn unmark_resource_absent(&self, key: TileKey) {
        lock_entries(&self.entries).remove(&key);
    }

    /// True while the tile has exhausted its attempts and the recheck
    /// interval has not yet elapsed. Once the interval elapses the entry is
    /// dropped and the tile may be requested again.
    pub fn is_resource_absent(&self, key: TileKey) -> bool {
        let mut entries = lock_entries(&self.entries);
        let Some(entry) = entries.get(&key) else {
            return false;
        };
        if entry.attempts < self.max_tries {
            return false;
        }
        if entry.last_attempt.elapsed() >= self.min_check_interval {
            entries.remove(&key);
            return false;
        }
        true
    }

    pub fn clear(&self) {
        lock_entries(&self.entries).clear();
    }
}

fn lock_entries<'a>(
    entries: &'a Mutex<HashMap<TileKey, AbsentEntry>>,
) -> std::sync::MutexGuard<'a, HashMap<TileKey, AbsentEntry>> {
    // A worker that panicked while holding the lock has nothing half-updated
    // worth preserving here; keep serving the map.
    match entries.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_absent_before_max_tries() {
        let list = AbsentResourceList::new(3, Duration::from_secs(60));
        let key = TileKey::new(1, 0, 0);
        list.mark_resource_absent(key);
        list.mark_resource_absent(key);
        assert!(!list.is_resource_absent(key));
    }

    #[test]
    fn test_absent_after_max_tries() {
        let list = AbsentResourceList::new(2, Duration::from_secs(60));
        let key = TileKey::new(1, 0, 0);
        list.mark_resource_absent(key);
        list.mark_resource_absent(key);
        assert!(list.is_resource_absent(key));
        // other tiles are unaffected
        assert!(!list.is_resource_absent(TileKey::new(1, 0, 1)));
    }

    #[test]
    fn test_unmark_restores_resource() {
        let list = AbsentResourceList::new(1, Duration::from_secs(60));
        let key = TileKey::new(2, 5, 5);
        list.mark_resource_absent(key);
        assert!(list.is_resource_absent(key));
        list.unmark_resource_absent(key);
        assert!(!list.is_resource_absent(key));
    }

    #[test]
    fn test_recheck_interval_elapsed() {
        let list = AbsentResourceList::new(1, Duration::ZERO);
        let key = TileKey::new(0, 0, 0);
        list.mark_resource_absent(key);
        // with a zero interval the suppression expires immediately and the
        // entry is reset for another round of attempts
        assert!(!list.is_resource_absent(key));
        list.mark_resource_absent(key);
        assert!(!list.is_resource_absent(key));
    }
}
