//! # Generation-Checked Handles
//!
//! Slot storage where a handle stays valid only as long as the value it was
//! issued for. A removed slot bumps its generation, so old handles resolve
//! to "not found" instead of aliasing whatever reuses the slot.

use std::fmt;

/// Opaque reference to a slot in a [`HandleArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Creates a handle from raw parts.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation at issue time.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage addressed by [`Handle`].
///
/// Two ways to fill it:
/// - [`insert`](Self::insert) picks a free slot and issues the handle
/// - [`insert_at`](Self::insert_at) mirrors a handle issued by another arena
///   (the core side of a scene object uses the simulation side's handle)
///
/// An arena should use one style only.
#[derive(Debug)]
pub struct HandleArena<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    len: usize,
}

impl<T> Default for HandleArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleArena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Number of live values.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True if nothing is stored.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores `value` in a free slot and returns its handle.
    pub fn insert(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Handle::new(index, 0)
    }

    /// Stores `value` under a handle issued elsewhere.
    ///
    /// # Panics
    ///
    /// If the slot already holds a live value.
    pub fn insert_at(&mut self, handle: Handle, value: T) {
        let index = handle.index as usize;
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || Slot {
                generation: 0,
                value: None,
            });
        }
        let slot = &mut self.slots[index];
        assert!(slot.value.is_none(), "Double registration of {handle}!");
        slot.generation = handle.generation;
        slot.value = Some(value);
        self.len += 1;
    }

    /// True if `handle` refers to a live value.
    #[inline]
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Looks up a live value.
    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Looks up a live value mutably.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Removes a value. Stale or unknown handles return `None`.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Iterates live values with their handles, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Handle::new(index as u32, slot.generation), value))
        })
    }

    /// Iterates live values mutably, in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|value| (Handle::new(index as u32, generation), value))
        })
    }

    /// Removes every value and returns them with their handles.
    pub fn drain(&mut self) -> Vec<(Handle, T)> {
        let handles: Vec<Handle> = self.iter().map(|(h, _)| h).collect();
        handles
            .into_iter()
            .filter_map(|h| self.remove(h).map(|v| (h, v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_reuse_bumps_generation() {
        let mut arena = HandleArena::new();
        let a = arena.insert("a");
        assert_eq!(arena.remove(a), Some("a"));

        let b = arena.insert("b");
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert!(arena.get(a).is_none(), "stale handle must not alias");
        assert_eq!(arena.get(b), Some(&"b"));
    }

    #[test]
    fn test_insert_at_mirrors_foreign_handle() {
        let mut arena = HandleArena::new();
        let handle = Handle::new(5, 3);
        arena.insert_at(handle, 42);
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.get(handle), Some(&42));
        assert!(arena.get(Handle::new(5, 2)).is_none());
    }

    #[test]
    #[should_panic(expected = "Double registration")]
    fn test_insert_at_twice_panics() {
        let mut arena = HandleArena::new();
        arena.insert_at(Handle::new(0, 0), 1);
        arena.insert_at(Handle::new(0, 0), 2);
    }

    #[test]
    fn test_remove_unknown_is_none() {
        let mut arena: HandleArena<u32> = HandleArena::new();
        assert!(arena.remove(Handle::new(9, 0)).is_none());
        assert!(arena.is_empty());
    }
}
