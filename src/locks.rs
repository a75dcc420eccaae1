//! Per-key async locking.
//!
//! [`KeyedMutex`] hands out one async mutex per key, so work for unrelated
//! keys never contends. A slot is pruned when its last guard is released and
//! the value left behind is vacant, which keeps the map proportional to the
//! number of keys currently in use rather than every key ever seen.

use std::collections::HashMap;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Values that can tell whether their slot may be dropped.
pub trait Vacant {
    fn is_vacant(&self) -> bool;
}

impl<T> Vacant for Option<T> {
    fn is_vacant(&self) -> bool {
        self.is_none()
    }
}

impl Vacant for () {
    fn is_vacant(&self) -> bool {
        true
    }
}

type Slots<K, V> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<V>>>>>;

pub struct KeyedMutex<K, V> {
    slots: Slots<K, V>,
}

impl<K, V> Clone for KeyedMutex<K, V> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K, V> Default for KeyedMutex<K, V> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> KeyedMutex<K, V>
where
    K: Eq + Hash + Clone,
    V: Default + Vacant,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`'s value.
    pub async fn lock(&self, key: K) -> KeyedGuard<K, V> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                slots
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(V::default()))),
            )
        };
        let guard = slot.lock_owned().await;
        KeyedGuard {
            key,
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one key's value; releases and prunes on drop.
pub struct KeyedGuard<K, V>
where
    K: Eq + Hash,
    V: Vacant,
{
    key: K,
    guard: Option<OwnedMutexGuard<V>>,
    slots: Slots<K, V>,
}

impl<K: Eq + Hash, V: Vacant> KeyedGuard<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash, V: Vacant> Deref for KeyedGuard<K, V> {
    type Target = V;

    fn deref(&self) -> &V {
        // Only taken in drop.
        match &self.guard {
            Some(guard) => guard,
            None => unreachable!("keyed guard used after release"),
        }
    }
}

impl<K: Eq + Hash, V: Vacant> DerefMut for KeyedGuard<K, V> {
    fn deref_mut(&mut self) -> &mut V {
        match &mut self.guard {
            Some(guard) => guard,
            None => unreachable!("keyed guard used after release"),
        }
    }
}

impl<K: Eq + Hash, V: Vacant> Drop for KeyedGuard<K, V> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let prune = match slots.get(&self.key) {
            // A strong count of one means no other task is waiting on the slot,
            // and nobody can clone it while we hold the map lock.
            Some(slot) if Arc::strong_count(slot) == 1 => slot
                .try_lock()
                .map(|value| value.is_vacant())
                .unwrap_or(false),
            _ => false,
        };
        if prune {
            slots.remove(&self.key);
        }
    }
}
