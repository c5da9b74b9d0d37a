//! Strictly monotonic, duplicate-free composite keys for buffer entries.
//!
//! See spec.md §4.1. A [`BufferKey`] is `(monotonic_ns, counter)` ordered
//! lexicographically; the counter breaks ties when the clock doesn't have
//! enough resolution to separate two calls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A totally-ordered key identifying one buffered entry's insertion point.
///
/// Ordering is derived, and compares `monotonic_ns` before `counter`, which
/// is exactly the lexicographic order spec.md requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferKey {
    monotonic_ns: u64,
    counter: u64,
}

impl BufferKey {
    /// Encode as 16 fixed big-endian bytes, preserving numeric ordering as
    /// byte ordering. Used as the literal key in the persistent backend,
    /// whose keyspace is ordered by byte comparison.
    pub fn to_be_bytes(self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&self.monotonic_ns.to_be_bytes());
        buf[8..].copy_from_slice(&self.counter.to_be_bytes());
        buf
    }

    /// Inverse of [`BufferKey::to_be_bytes`].
    pub fn from_be_bytes(bytes: &[u8]) -> BufferKey {
        let monotonic_ns = u64::from_be_bytes(bytes[..8].try_into().unwrap());
        let counter = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
        BufferKey { monotonic_ns, counter }
    }

    #[cfg(test)]
    pub(crate) fn for_test(monotonic_ns: u64, counter: u64) -> BufferKey {
        BufferKey { monotonic_ns, counter }
    }
}

/// Produces strictly increasing [`BufferKey`]s for one process's lifetime.
///
/// Contract (spec.md §4.1): for calls `A` then `B` where `A` returns before
/// `B` starts, `key(A) < key(B)`. The monotonic clock component never goes
/// backward; the counter alone guarantees strict ordering when two calls
/// land in the same clock tick.
pub struct KeyGenerator {
    epoch: Instant,
    floor_ns: u64,
    counter: AtomicU64,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator {
    /// Create a generator anchored to "now" on the monotonic clock.
    pub fn new() -> KeyGenerator {
        KeyGenerator {
            epoch: Instant::now(),
            floor_ns: 0,
            counter: AtomicU64::new(0),
        }
    }

    /// Create a generator whose first key sorts strictly after
    /// `resume_after`. Used when reopening a persistent buffer, so a
    /// restarted process's keys (which would otherwise start back at
    /// `monotonic_ns = 0`) never sort ahead of entries a previous run left
    /// undelivered on disk.
    pub fn resuming_after(resume_after: BufferKey) -> KeyGenerator {
        KeyGenerator {
            epoch: Instant::now(),
            floor_ns: resume_after.monotonic_ns.saturating_add(1),
            counter: AtomicU64::new(0),
        }
    }

    /// Produce the next key. Safe to call from any number of threads
    /// concurrently; never blocks.
    pub fn next(&self) -> BufferKey {
        // Ordered before the elapsed-time read so concurrent callers that
        // overlap still get distinct, increasing counters even if the clock
        // doesn't advance between them.
        let counter = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let monotonic_ns = self.floor_ns.saturating_add(self.epoch.elapsed().as_nanos() as u64);
        BufferKey { monotonic_ns, counter }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn strictly_increasing() {
        let gen = KeyGenerator::new();
        let mut prev = gen.next();
        for _ in 0..1000 {
            let next = gen.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn concurrent_calls_never_collide() {
        use std::sync::Arc;
        use std::thread;

        let gen = Arc::new(KeyGenerator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gen = Arc::clone(&gen);
            handles.push(thread::spawn(move || {
                (0..1000).map(|_| gen.next()).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let len_before = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), len_before, "duplicate keys generated");
    }

    #[test]
    fn resuming_after_sorts_past_the_given_key() {
        let high_water = BufferKey::for_test(u64::MAX - 10, 7);
        let gen = KeyGenerator::resuming_after(high_water);
        let next = gen.next();
        assert!(next > high_water);
    }

    #[test]
    fn byte_encoding_round_trips_and_preserves_order() {
        let a = BufferKey::for_test(5, 1);
        let b = BufferKey::for_test(5, 2);
        assert!(a < b);
        assert!(a.to_be_bytes() < b.to_be_bytes());
        assert_eq!(BufferKey::from_be_bytes(&a.to_be_bytes()), a);
    }
}
