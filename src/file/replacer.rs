use lru::LruCache;
use std::num::NonZeroUsize;

/// Index of a buffer slot
pub type SlotId = usize;

/// Least-recently-used ordering over a fixed set of buffer slots.
///
/// Every slot is tracked from construction on, so the order is total:
/// the most recently touched slot sits at the head and the eviction
/// candidate at the tail. Freshly constructed slots start at the tail
/// in ascending order, so slot 0 is handed out first.
pub struct LruReplacer {
    order: LruCache<SlotId, ()>,
}

impl LruReplacer {
    pub fn new(capacity: NonZeroUsize) -> Self {
        let mut order = LruCache::new(capacity);
        for slot in 0..capacity.get() {
            order.put(slot, ());
        }
        Self { order }
    }

    /// Number of tracked slots
    pub fn capacity(&self) -> usize {
        self.order.cap().get()
    }

    /// Move a slot to the most-recently-used end
    pub fn touch(&mut self, slot: SlotId) {
        self.order.promote(&slot);
    }

    /// The least recently used slot. It stays tracked; the caller rebinds it.
    pub fn victim(&self) -> Option<SlotId> {
        self.order.peek_lru().map(|(&slot, _)| slot)
    }

    /// Demote a slot to the least-recently-used end so it is reused first
    pub fn free(&mut self, slot: SlotId) {
        self.order.demote(&slot);
    }

    /// Slots from most to least recently used
    pub fn iter_mru(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.order.iter().map(|(&slot, _)| slot)
    }
}
