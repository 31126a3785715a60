//! Arena with stable indices and a free list.
//!
//! Backs the reactor's registration and timer tables and the console
//! registry. Indices stay valid until the slot is removed; a removed slot is
//! reused by a later insert.

use crate::error::{Result, SimError};

pub(crate) struct Slab<T> {
    items: Vec<Option<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T> Slab<T> {
    pub(crate) fn new(size: usize) -> Self {
        let items = (0..size).map(|_| None).collect();
        let free = (0..size).rev().collect();

        Self {
            items,
            free,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index).and_then(Option::as_mut)
    }

    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        let item = self.items.get_mut(index)?.take()?;

        self.free.push(index);
        self.len -= 1;

        Some(item)
    }

    /// Stores `item` and returns its index.
    ///
    /// Growth doubles the table; a failed reservation is reported as
    /// [`SimError::AllocationFailed`] instead of aborting.
    pub(crate) fn insert(&mut self, item: T) -> Result<usize> {
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                let len = self.items.len();
                let new_len = if len == 0 { 4 } else { 2 * len };

                self.items.try_reserve(new_len - len)?;
                self.free
                    .try_reserve(new_len - len)
                    .map_err(|_| SimError::AllocationFailed)?;

                self.items.extend((len..new_len).map(|_| None));
                self.free.extend(((len + 1)..new_len).rev());

                len
            }
        };

        self.items[index] = Some(item);
        self.len += 1;

        Ok(index)
    }

    /// Checks that one more insert will not need to grow the table.
    pub(crate) fn reserve_one(&mut self) -> Result<()> {
        if !self.free.is_empty() {
            return Ok(());
        }
        let len = self.items.len().max(1);
        self.items.try_reserve(len)?;
        self.free.try_reserve(len)?;
        Ok(())
    }

    /// Indices of every occupied slot, in slot order.
    pub(crate) fn keys(&self) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| i))
            .collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|item| (i, item)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_reuses_freed_slots() {
        let mut slab = Slab::new(0);
        let a = slab.insert("a").unwrap();
        let b = slab.insert("b").unwrap();
        assert_ne!(a, b);
        assert_eq!(slab.len(), 2);

        assert_eq!(slab.remove(a), Some("a"));
        assert_eq!(slab.len(), 1);
        assert!(slab.get(a).is_none());

        let c = slab.insert("c").unwrap();
        assert_eq!(c, a);
        assert_eq!(slab.get(c), Some(&"c"));
        assert_eq!(slab.get(b), Some(&"b"));
    }

    #[test]
    fn remove_twice_returns_none() {
        let mut slab = Slab::new(2);
        let a = slab.insert(1u32).unwrap();
        assert_eq!(slab.remove(a), Some(1));
        assert_eq!(slab.remove(a), None);
        assert!(slab.is_empty());
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut slab = Slab::new(1);
        let keys: Vec<usize> = (0..10).map(|i| slab.insert(i).unwrap()).collect();
        assert_eq!(slab.len(), 10);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(slab.get(*key), Some(&i));
        }
        assert_eq!(slab.keys().len(), 10);
    }
}
