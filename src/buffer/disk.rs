//! The persistent backend: an embedded ordered key-value store (`sled`).
//!
//! Keys are the big-endian encoding of [`BufferKey`] (see
//! [`BufferKey::to_be_bytes`]), which `sled` orders by byte comparison —
//! exactly the total order the buffer contract needs. Values are
//! `serde_json`-encoded [`Entry`]s.

use super::{overflow_evict_count, Buffer};
use crate::entry::Entry;
use crate::error::Error;
use crate::key::{BufferKey, KeyGenerator};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// `Buffer` backed by a `sled::Db`. Survives process restarts: `open`
/// seeds its [`KeyGenerator`] past the largest key already on disk, so a
/// restarted process's keys never sort ahead of entries a previous run
/// left undelivered (spec.md §4.1, §4.3).
pub struct DiskBuffer {
    db: sled::Db,
    keys: KeyGenerator,
    max_buffer_size: usize,
    count: AtomicUsize,
    // Serializes overflow-eviction against deletes, per spec.md §4.3's
    // concurrency note; `sled` itself is safe to read from many threads
    // without this, but the evict-then-insert sequence must appear atomic
    // to another writer.
    write_lock: Mutex<()>,
}

impl DiskBuffer {
    /// Open (creating if absent) a `sled` database rooted at `data_dir`.
    pub fn open(data_dir: &Path, max_buffer_size: usize) -> Result<DiskBuffer, Error> {
        std::fs::create_dir_all(data_dir).map_err(|e| Error::StartFailed {
            component: "buffer",
            cause: format!("could not create data_dir {}: {e}", data_dir.display()),
        })?;
        let db = sled::open(data_dir).map_err(|e| Error::StartFailed {
            component: "buffer",
            cause: e.to_string(),
        })?;
        let count = db.len();
        let keys = match db.iter().keys().next_back() {
            Some(Ok(max_key)) => KeyGenerator::resuming_after(BufferKey::from_be_bytes(&max_key)),
            _ => KeyGenerator::new(),
        };
        Ok(DiskBuffer {
            db,
            keys,
            max_buffer_size,
            count: AtomicUsize::new(count),
            write_lock: Mutex::new(()),
        })
    }

    fn smallest_keys(&self, limit: usize) -> Vec<sled::IVec> {
        self.db
            .iter()
            .keys()
            .take(limit)
            .filter_map(std::result::Result::ok)
            .collect()
    }
}

impl Buffer for DiskBuffer {
    fn store(&self, entry: Entry) {
        let key = self.keys.next();
        let _guard = self.write_lock.lock();
        if self.count.load(Ordering::Relaxed) >= self.max_buffer_size {
            let evict = overflow_evict_count(self.max_buffer_size);
            let victims = self.smallest_keys(evict);
            let mut batch = sled::Batch::default();
            for victim in &victims {
                batch.remove(victim.clone());
            }
            let dropped = victims.len();
            if self.db.apply_batch(batch).is_ok() {
                self.count.fetch_sub(dropped, Ordering::Relaxed);
                tracing::debug!(dropped, "buffer overflow, oldest entries evicted");
            }
        }
        let value = serde_json::to_vec(&entry).expect("entry serialization is infallible");
        if self.db.insert(key.to_be_bytes(), value).is_ok() {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn fetch_batch(&self, limit: usize) -> Vec<(BufferKey, Entry)> {
        self.db
            .iter()
            .take(limit)
            .filter_map(std::result::Result::ok)
            .map(|(k, v)| {
                let key = BufferKey::from_be_bytes(&k);
                let entry: Entry =
                    serde_json::from_slice(&v).expect("only this crate writes this tree");
                (key, entry)
            })
            .collect()
    }

    fn delete_up_to(&self, key: BufferKey) {
        let _guard = self.write_lock.lock();
        let mut batch = sled::Batch::default();
        let mut deleted = 0usize;
        for item in self.db.range(..=key.to_be_bytes()) {
            let (k, _) = match item {
                Ok(pair) => pair,
                Err(_) => continue,
            };
            batch.remove(k);
            deleted += 1;
        }
        if self.db.apply_batch(batch).is_ok() {
            self.count.fetch_sub(deleted, Ordering::Relaxed);
        }
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        let _ = self.db.flush();
    }
}
