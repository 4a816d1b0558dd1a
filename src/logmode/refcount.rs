// src/logmode/refcount.rs

//! Reference counting helpers shared by the target-level and node-level
//! indices.
//!
//! Counts are created on first increment and removed when they reach zero;
//! a count is never stored as zero and never goes negative.

use std::collections::HashMap;
use std::hash::Hash;

use dashmap::DashMap;

/// Increment `key`. Returns `true` on the 0 -> 1 transition.
pub(crate) fn increment<K: Hash + Eq>(map: &mut HashMap<K, usize>, key: K) -> bool {
    let count = map.entry(key).or_insert(0);
    *count += 1;
    *count == 1
}

/// Decrement `key`. Returns `true` on the 1 -> 0 transition, in which case
/// the entry is removed. A missing entry is left alone and returns `false`.
pub(crate) fn decrement<K: Hash + Eq>(map: &mut HashMap<K, usize>, key: &K) -> bool {
    match map.get_mut(key) {
        None => false,
        Some(count) if *count > 1 => {
            *count -= 1;
            false
        }
        Some(_) => {
            map.remove(key);
            true
        }
    }
}

/// Concurrent flavour of [`increment`] for maps that are read without a lock.
pub(crate) fn increment_shared<K: Hash + Eq + Clone>(map: &DashMap<K, usize>, key: &K) -> bool {
    let mut count = map.entry(key.clone()).or_insert(0);
    *count += 1;
    *count == 1
}

/// Concurrent flavour of [`decrement`].
///
/// Callers serialize all writers; the conditional removal only guards
/// against readers observing a zero count.
pub(crate) fn decrement_shared<K: Hash + Eq>(map: &DashMap<K, usize>, key: &K) -> bool {
    let reached_zero = match map.get_mut(key) {
        None => return false,
        Some(mut count) => {
            *count = count.saturating_sub(1);
            *count == 0
        }
    };
    if reached_zero {
        map.remove_if(key, |_, count| *count == 0);
    }
    reached_zero
}
