/// Index into an [`Arena`], checked against the slot's generation on every access.
///
/// A handle outlives the value it was issued for: once the value is removed the slot's
/// generation moves on and the old handle resolves to nothing, even after the slot has been
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaHandle {
    index: u32,
    generation: u32,
}

impl ArenaHandle {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into a single integer, e.g. to hand across an FFI boundary.
    pub fn into_raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot arena with a free list. Insert and remove are O(1) amortized.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    slot_limit: u32,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::with_slot_limit(u32::MAX)
    }

    /// Arena that never grows past `limit` slots.
    pub fn with_slot_limit(limit: u32) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            slot_limit: limit,
        }
    }

    /// Store `value`, reusing a freed slot when there is one. Returns `None` once every slot
    /// is occupied and the limit is reached.
    pub fn insert(&mut self, value: T) -> Option<ArenaHandle> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            self.len += 1;
            return Some(ArenaHandle {
                index,
                generation: slot.generation,
            });
        }

        let index = u32::try_from(self.slots.len())
            .ok()
            .filter(|&index| index < self.slot_limit)?;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.len += 1;
        Some(ArenaHandle {
            index,
            generation: 0,
        })
    }

    pub fn remove(&mut self, handle: ArenaHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        // A stale handle aliases only after 2^32 reuses of this slot.
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    pub fn contains(&self, handle: ArenaHandle) -> bool {
        self.slots
            .get(handle.index as usize)
            .map(|slot| slot.generation == handle.generation && slot.value.is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
