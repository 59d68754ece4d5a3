//! Identity-keyed weak concurrent map.
//!
//! Keys are object *identities* (the `Arc` data address), not values.
//! Each entry holds a `Weak` probe to its key, so the map never extends
//! the key's lifetime; the probe also pins the allocation's address while
//! the entry exists, so an address cannot be recycled out from under a
//! live entry. Dead entries are purged opportunistically on every bucket
//! visit.
//!
//! Buckets are individually locked; all reads and writes for one key run
//! under its bucket lock, which is what makes claim-style
//! read-modify-write linearizable.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::any::Any;
use std::sync::{Arc, Weak};

/// Type-erased weak key probe.
type KeyProbe = Weak<dyn Any + Send + Sync>;

struct Entry<V> {
    addr: usize,
    probe: KeyProbe,
    value: V,
}

type Bucket<V> = SmallVec<[Entry<V>; 4]>;

const BUCKET_COUNT: usize = 64;

/// Map the key address to a bucket (Fibonacci hash on the high bits).
#[inline]
fn bucket_of(addr: usize) -> usize {
    (addr.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 58) as usize % BUCKET_COUNT
}

/// Concurrent identity map from live objects to values.
pub struct IdentityMap<V> {
    buckets: Box<[Mutex<Bucket<V>>; BUCKET_COUNT]>,
}

impl<V> IdentityMap<V> {
    /// Create an empty map.
    pub fn new() -> Self {
        IdentityMap {
            buckets: Box::new(std::array::from_fn(|_| Mutex::new(SmallVec::new()))),
        }
    }

    /// Run `f` over the entry slot for `key` under the bucket lock.
    ///
    /// The slot may be inspected, filled, replaced, or emptied; the whole
    /// closure is one linearizable step with respect to other callers
    /// touching the same key.
    pub fn with_slot<T, R>(&self, key: &Arc<T>, f: impl FnOnce(&mut Slot<'_, V>) -> R) -> R
    where
        T: Send + Sync + 'static,
    {
        let addr = Arc::as_ptr(key) as *const () as usize;
        let weak = Arc::downgrade(key);
        let probe: KeyProbe = weak;
        let mut bucket = self.buckets[bucket_of(addr)].lock();
        bucket.retain(|e| e.probe.strong_count() > 0);
        let index = bucket.iter().position(|e| e.addr == addr);
        let mut slot = Slot {
            bucket: &mut bucket,
            index,
            addr,
            probe,
        };
        f(&mut slot)
    }

    /// Number of entries whose key is still alive. Intended for tests;
    /// takes every bucket lock in turn.
    pub fn live_len(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| {
                b.lock()
                    .iter()
                    .filter(|e| e.probe.strong_count() > 0)
                    .count()
            })
            .sum()
    }
}

impl<V> Default for IdentityMap<V> {
    fn default() -> Self {
        IdentityMap::new()
    }
}

/// A locked view of one key's entry.
pub struct Slot<'a, V> {
    bucket: &'a mut Bucket<V>,
    index: Option<usize>,
    addr: usize,
    probe: KeyProbe,
}

impl<V> Slot<'_, V> {
    /// Current value for the key, if any.
    pub fn get(&self) -> Option<&V> {
        self.index.map(|i| &self.bucket[i].value)
    }

    /// Insert or replace the value for the key.
    pub fn set(&mut self, value: V) {
        match self.index {
            Some(i) => self.bucket[i].value = value,
            None => {
                self.bucket.push(Entry {
                    addr: self.addr,
                    probe: self.probe.clone(),
                    value,
                });
                self.index = Some(self.bucket.len() - 1);
            }
        }
    }

    /// Remove and return the value for the key.
    pub fn remove(&mut self) -> Option<V> {
        let i = self.index.take()?;
        Some(self.bucket.swap_remove(i).value)
    }
}
