//! Slot Pool
//!
//! Fixed-capacity arena with a free list. Seek disciplines park waiting
//! requests here and keep only slot indices in their ordering structures,
//! so reordering never moves a request and enqueue/dequeue avoid a
//! per-request allocation once the pool is primed.

use tracing::debug;

/// Index of an occupied slot
pub type SlotId = usize;

/// A pool of reusable slots
#[derive(Debug)]
pub struct SlotPool<T> {
    /// Slot storage; `None` marks a free slot
    slots: Vec<Option<T>>,
    /// Free slot indices, most recently freed last
    free: Vec<SlotId>,
    /// Number of slots primed up front
    capacity: usize,
    /// Number of occupied slots
    live: usize,
}

impl<T> SlotPool<T> {
    /// Create a pool primed with `capacity` free slots.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            // Reverse so the lowest index is handed out first
            free: (0..capacity).rev().collect(),
            capacity,
            live: 0,
        }
    }

    /// Store `value` and return its slot.
    ///
    /// When every primed slot is taken the pool grows by one slot rather
    /// than refusing the value.
    pub fn insert(&mut self, value: T) -> SlotId {
        self.live += 1;
        match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(value);
                id
            }
            None => {
                let id = self.slots.len();
                if id == self.capacity {
                    debug!(capacity = self.capacity, "slot pool grew past its capacity");
                }
                self.slots.push(Some(value));
                id
            }
        }
    }

    /// Release a slot, returning its value.
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let value = self.slots.get_mut(id)?.take()?;
        self.free.push(id);
        self.live -= 1;
        Some(value)
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Primed capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots allocated so far, free or not
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }
}
