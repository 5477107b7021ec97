// src/core/cred/replay.rs

//! Replay detection over verified credential signatures.

use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Upper bound on tracked signatures; tokens expire long before a healthy
/// cluster approaches this.
const REPLAY_CACHE_CAP: usize = 65536;

/// Remembers every credential signature seen inside its expiration
/// window. Backed by an LRU so a flood of bogus tokens cannot grow the
/// table without bound, plus an expiration map swept by the credential
/// sweeper agent.
pub struct ReplayCache {
    seen: Mutex<lru::LruCache<Vec<u8>, i64>>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(lru::LruCache::new(
                NonZeroUsize::new(REPLAY_CACHE_CAP).unwrap(),
            )),
        }
    }

    /// Records a signature. Returns `true` when this is the first
    /// sighting, `false` on replay.
    pub fn record(&self, signature: &[u8], expiration: i64) -> bool {
        let mut seen = self.seen.lock();
        if seen.contains(signature) {
            return false;
        }
        seen.put(signature.to_vec(), expiration);
        true
    }

    /// Evicts entries whose expiration has passed; returns the count.
    pub fn sweep(&self, now: i64) -> usize {
        let mut seen = self.seen.lock();
        let expired: Vec<Vec<u8>> = seen
            .iter()
            .filter(|&(_, &exp)| exp <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            seen.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_record_ok_second_is_replay() {
        let cache = ReplayCache::new();
        assert!(cache.record(b"sig-a", 100));
        assert!(!cache.record(b"sig-a", 100));
        assert!(cache.record(b"sig-b", 100));
    }

    #[test]
    fn sweep_evicts_expired_only() {
        let cache = ReplayCache::new();
        cache.record(b"old", 10);
        cache.record(b"new", 100);
        assert_eq!(cache.sweep(50), 1);
        assert_eq!(cache.len(), 1);
        // The swept signature can be recorded again.
        assert!(cache.record(b"old", 200));
    }
}
