//! Bounded, thread-safe memo tables owned by a test instance.
//!
//! Two things are worth remembering between calls in a search loop: finished p-values
//! (keyed by the independence fact) and ridge residualizers `ε(Kz + εI)⁻¹` (keyed by the
//! conditioning columns). Both live in a [`BoundedCache`]; there is no process-wide state.
//! Once `capacity` entries are held, the least recently used one is evicted.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
struct Slots<K, V> {
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Clone, V> Slots<K, V> {
    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

/// A capacity-bounded map behind a mutex. Capacity zero disables it.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    slots: Mutex<Slots<K, V>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Mutex::new(Slots {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Looks up `key` and marks it as most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut slots = self.lock();
        let value = slots.map.get(key).cloned()?;
        slots.touch(key);
        Some(value)
    }

    /// Stores `value`, evicting the least recently used entry when full.
    pub fn insert(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        let mut slots = self.lock();
        if slots.map.insert(key.clone(), value).is_some() {
            slots.touch(&key);
            return;
        }
        slots.order.push_back(key);
        while slots.order.len() > self.capacity {
            if let Some(oldest) = slots.order.pop_front() {
                slots.map.remove(&oldest);
            }
        }
    }

    pub fn clear(&self) {
        let mut slots = self.lock();
        slots.map.clear();
        slots.order.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock leaves the map consistent, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Slots<K, V>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
