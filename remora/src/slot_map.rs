/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::marker::PhantomData;

/// Key addressing one value of a [`SlotMap<T>`].
///
/// A key is made up of the slot index and the slot generation at the time the
/// value was inserted. Each slot's generation starts at zero and is
/// incremented on every insert and every remove, so any slot with an even
/// generation is empty and a key outliving its value never matches again.
pub struct SlotKey<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SlotKey<T> {
    fn new(index: u32, generation: u32) -> Self {
        SlotKey {
            index,
            generation,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for SlotKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SlotKey<T> {}

impl<T> PartialEq for SlotKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for SlotKey<T> {}

impl<T> Hash for SlotKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for SlotKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SlotKey({}v{})", self.index, self.generation)
    }
}

#[derive(Clone)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Index-stable storage keyed by generation-checked [`SlotKey`]s.
#[derive(Clone)]
pub struct SlotMap<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for SlotMap<T> {
    fn default() -> Self {
        SlotMap {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> SlotMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> SlotKey<T> {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.value = Some(value);
            SlotKey::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 1,
                value: Some(value),
            });
            SlotKey::new(index, 1)
        }
    }

    fn slot(&self, key: SlotKey<T>) -> Option<&Slot<T>> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
    }

    pub fn get(&self, key: SlotKey<T>) -> Option<&T> {
        self.slot(key).and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: SlotKey<T>) -> Option<&mut T> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Remove the value at `key`. Stale keys are ignored.
    pub fn remove(&mut self, key: SlotKey<T>) -> Option<T> {
        let slot = self
            .slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.len -= 1;
        Some(value)
    }

    /// Iterate over all live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotKey<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|v| (SlotKey::new(index as u32, slot.generation), v))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotKey<T>, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|v| (SlotKey::new(index as u32, generation), v))
        })
    }

    /// Keys of every live entry, in slot order. Collected so callers may
    /// mutate the map while walking it.
    pub fn keys(&self) -> Vec<SlotKey<T>> {
        self.iter().map(|(k, _)| k).collect()
    }

    /// Remove every value for which `keep` returns false, returning them.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<T>
    where
        F: FnMut(SlotKey<T>, &mut T) -> bool,
    {
        let mut removed = Vec::new();
        for key in self.keys() {
            let keep_it = match self.get_mut(key) {
                Some(v) => keep(key, v),
                None => true,
            };
            if !keep_it {
                removed.extend(self.remove(key));
            }
        }
        removed
    }

    /// Remove everything, returning the values in slot order.
    pub fn drain(&mut self) -> Vec<T> {
        let keys = self.keys();
        keys.into_iter().filter_map(|k| self.remove(k)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut map = SlotMap::new();

        let key1 = map.insert(42);
        let key2 = map.insert(101);
        assert_eq!(map.iter().count(), 2);

        assert_eq!(map.get(key1), Some(&42));
        assert_eq!(map.get(key2), Some(&101));

        for (_, v) in map.iter_mut() {
            *v += 1;
        }
        assert_eq!(
            map.iter().map(|(_, v)| *v).collect::<Vec<_>>(),
            vec![43, 102]
        );
    }

    #[test]
    fn stale_keys_do_not_alias() {
        let mut map = SlotMap::new();
        let old = map.insert("old");
        assert_eq!(map.remove(old), Some("old"));
        assert_eq!(map.remove(old), None);

        // The slot is reused but the old key must not see the new value.
        let new = map.insert("new");
        assert_ne!(old, new);
        assert_eq!(map.get(old), None);
        assert_eq!(map.get(new), Some(&"new"));
        assert!(map.get_mut(old).is_none());
    }

    #[test]
    fn retain_and_drain() {
        let mut map = SlotMap::new();
        for i in 0..6 {
            map.insert(i);
        }
        let removed = map.retain(|_, v| *v % 2 == 0);
        assert_eq!(removed, vec![1, 3, 5]);
        assert_eq!(map.keys().len(), 3);
        assert_eq!(map.drain(), vec![0, 2, 4]);
        assert!(map.is_empty());
    }
}
