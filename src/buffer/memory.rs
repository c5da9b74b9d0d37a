//! The volatile backend: an in-process ordered map, no persistence.

use super::{overflow_evict_count, Buffer};
use crate::entry::Entry;
use crate::key::{BufferKey, KeyGenerator};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// `Buffer` backed by a [`BTreeMap`] behind an [`RwLock`]. Readers
/// (`fetch_batch`, `count`) take the shared lock and run concurrently with
/// each other; writers (`store`, `delete_up_to`) take the exclusive lock,
/// which is how the overflow evictor and deletes stay serialized against
/// each other (spec.md §4.3).
pub struct MemoryBuffer {
    keys: KeyGenerator,
    max_buffer_size: usize,
    map: RwLock<BTreeMap<BufferKey, Entry>>,
}

impl MemoryBuffer {
    /// Create an empty volatile buffer capped at `max_buffer_size` entries.
    pub fn new(max_buffer_size: usize) -> MemoryBuffer {
        MemoryBuffer {
            keys: KeyGenerator::new(),
            max_buffer_size,
            map: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Buffer for MemoryBuffer {
    fn store(&self, entry: Entry) {
        let key = self.keys.next();
        let mut map = self.map.write();
        if map.len() >= self.max_buffer_size {
            let evict = overflow_evict_count(self.max_buffer_size).min(map.len());
            let victims: Vec<BufferKey> = map.keys().take(evict).copied().collect();
            for victim in &victims {
                map.remove(victim);
            }
            tracing::debug!(dropped = victims.len(), "buffer overflow, oldest entries evicted");
        }
        map.insert(key, entry);
    }

    fn fetch_batch(&self, limit: usize) -> Vec<(BufferKey, Entry)> {
        let map = self.map.read();
        map.iter().take(limit).map(|(k, v)| (*k, v.clone())).collect()
    }

    fn delete_up_to(&self, key: BufferKey) {
        let mut map = self.map.write();
        map.retain(|k, _| *k > key);
    }

    fn count(&self) -> usize {
        self.map.read().len()
    }

    fn stop(&self) {
        self.map.write().clear();
    }
}
