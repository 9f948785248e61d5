/// Stable reference to a slot. The generation changes every time the slot is
/// released, so stale handles stop resolving instead of aliasing a new owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    index: u32,
    generation: u32,
}

impl SlotHandle {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

#[derive(Debug)]
struct Slot<T> {
    value: T,
    generation: u32,
    occupied: bool,
}

/// Reusable storage for chunk and region buffers.
///
/// Released slots keep their value so the next `allocate` can reinitialise
/// it in place instead of allocating new grids.
#[derive(Debug)]
pub struct SlotArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for SlotArena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> SlotArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a free slot, or creates one with `make`. `reset` runs on the
    /// value in both cases before the handle is returned.
    pub fn allocate(
        &mut self,
        make: impl FnOnce() -> T,
        reset: impl FnOnce(&mut T),
    ) -> SlotHandle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    value: make(),
                    generation: 0,
                    occupied: false,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.occupied = true;
        reset(&mut slot.value);
        SlotHandle {
            index,
            generation: slot.generation,
        }
    }

    pub fn release(&mut self, handle: SlotHandle) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return false;
        };
        if !slot.occupied || slot.generation != handle.generation {
            return false;
        }
        slot.occupied = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        true
    }

    pub fn get(&self, handle: SlotHandle) -> Option<&T> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.occupied && slot.generation == handle.generation)
            .map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.occupied && slot.generation == handle.generation)
            .map(|slot| &mut slot.value)
    }

    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_slot_is_reused_without_make() {
        let mut arena = SlotArena::<Vec<u8>>::new();
        let first = arena.allocate(|| vec![1, 2, 3], |_| {});
        assert!(arena.release(first));

        let mut made = false;
        let second = arena.allocate(
            || {
                made = true;
                Vec::new()
            },
            |_| {},
        );
        assert!(!made);
        assert_eq!(second.index(), first.index());
        assert_eq!(arena.get(second), Some(&vec![1, 2, 3]));
        assert_eq!(arena.capacity(), 1);
    }

    #[test]
    fn stale_handle_does_not_resolve() {
        let mut arena = SlotArena::<u32>::new();
        let handle = arena.allocate(|| 7, |_| {});
        assert!(arena.release(handle));
        assert!(!arena.release(handle));
        let reused = arena.allocate(|| 0, |value| *value = 9);
        assert!(arena.get(handle).is_none());
        assert_eq!(arena.get(reused), Some(&9));
        assert_eq!(arena.live_count(), 1);
    }
}
