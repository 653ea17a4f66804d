//! Generational slot pool backing the resource handles.

/// Index plus generation. Generation 0 is never issued, so a default handle
/// is always invalid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub const INVALID: Handle = Handle { index: 0, generation: 0 };

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Dense storage with slot reuse. Freed slots bump their generation so old
/// handles stop resolving.
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pool<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> Handle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });
        Handle { index, generation: 1 }
    }

    /// Remove the value behind `handle`. Stale handles return `None`.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation || slot.value.is_none() {
            return None;
        }
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free.push(handle.index);
        self.live -= 1;
        value
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value.as_ref().map(|v| {
                (
                    Handle {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    v,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut pool = Pool::new();
        let a = pool.insert("a");
        let b = pool.insert("b");
        assert_eq!(pool.get(a), Some(&"a"));
        assert_eq!(pool.get(b), Some(&"b"));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_stale_handle_does_not_alias_reused_slot() {
        let mut pool = Pool::new();
        let old = pool.insert(1);
        assert_eq!(pool.remove(old), Some(1));
        let new = pool.insert(2);

        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());
        assert_eq!(pool.get(old), None);
        assert_eq!(pool.get(new), Some(&2));
    }

    #[test]
    fn test_double_remove_is_noop() {
        let mut pool = Pool::new();
        let h = pool.insert(7);
        assert_eq!(pool.remove(h), Some(7));
        assert_eq!(pool.remove(h), None);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_invalid_handle_never_resolves() {
        let mut pool = Pool::new();
        pool.insert(0u8);
        assert!(!pool.contains(Handle::INVALID));
        assert_eq!(pool.remove(Handle::INVALID), None);
        assert_eq!(pool.len(), 1);
    }
}
