//! Deduplicated pools of objects written behind offsets.
//!
//! Several subtables can point at the same lookup or value list. A `Pool` hands out one
//! [`Stake`] per distinct key and later writes each object exactly once. Objects are written
//! in key order so the output does not depend on the order they were added in.

use std::collections::BTreeMap;

use crate::binary::linked::{LinkedWriter, Stake};
use crate::error::WriteError;

/// An object that can be identified by a comparable key built from its contents.
///
/// Two objects with equal keys are interchangeable in the output.
pub trait ImmutableKey {
    type Key: Ord;

    fn immutable_key(&self) -> Self::Key;
}

/// A map from keys to the stake their object will be written at.
pub struct Pool<K: Ord, V> {
    entries: BTreeMap<K, (V, Stake)>,
}

impl<K: Ord, V> Pool<K, V> {
    pub fn new() -> Self {
        Pool {
            entries: BTreeMap::new(),
        }
    }

    /// Return the stake for `key`, creating a new unbound one if the key has not been seen.
    ///
    /// When the key is already present the existing value is kept and `value` is dropped.
    pub fn stake(&mut self, w: &mut LinkedWriter, key: K, value: V) -> Stake {
        self.entries
            .entry(key)
            .or_insert_with(|| (value, w.new_stake()))
            .1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Bind each stake to the current position in ascending key order and call `write` to
    /// write the object there.
    pub fn drain<F>(self, w: &mut LinkedWriter, mut write: F) -> Result<(), WriteError>
    where
        F: FnMut(&mut LinkedWriter, K, V) -> Result<(), WriteError>,
    {
        for (key, (value, stake)) in self.entries {
            w.stake_current_with_value(stake)?;
            write(w, key, value)?;
        }
        Ok(())
    }
}

impl<T: ImmutableKey> Pool<T::Key, T> {
    /// Add an object keyed by its own contents.
    pub fn add(&mut self, w: &mut LinkedWriter, obj: T) -> Stake {
        let key = obj.immutable_key();
        self.stake(w, key, obj)
    }
}

impl<K: Ord, V> Default for Pool<K, V> {
    fn default() -> Self {
        Pool::new()
    }
}
