//! Preallocated arena of block-sized sample slots.
//!
//! Every slot is allocated when the pool is built. After that the producer
//! copies completed blocks into slots and the consumer reads them back out;
//! neither side touches the allocator. A slot is addressed by its index, and
//! whoever currently holds an index owns that slot. Indices move between the
//! two sides through the handoff queues, which provide the happens-before edge
//! for the slot contents.

use std::cell::UnsafeCell;

struct SlotData {
    seq: u64,
    len: usize,
    samples: Box<[f32]>,
}

pub(crate) struct BlockPool {
    block_size: usize,
    slots: Box<[UnsafeCell<SlotData>]>,
}

// SAFETY: slot contents are only accessed by the holder of the slot index, and
// indices are transferred through `crossbeam::queue::ArrayQueue`, which
// synchronises push/pop with release/acquire ordering.
unsafe impl Sync for BlockPool {}
unsafe impl Send for BlockPool {}

impl BlockPool {
    pub(crate) fn new(block_size: usize, slot_count: usize) -> Self {
        let slots = (0..slot_count)
            .map(|_| {
                UnsafeCell::new(SlotData {
                    seq: 0,
                    len: 0,
                    samples: vec![0.0; block_size].into_boxed_slice(),
                })
            })
            .collect();

        Self { block_size, slots }
    }

    pub(crate) fn block_size(&self) -> usize {
        self.block_size
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Let `fill` write into slot `index`, then tag it with `seq`.
    ///
    /// `fill` receives the whole `block_size` slot and returns how many leading
    /// samples it wrote; the count is clamped to `block_size`.
    ///
    /// # Safety
    ///
    /// The caller must own `index`: it was taken from a queue (or never
    /// published) and no other thread can reach it until the caller publishes
    /// it again.
    pub(crate) unsafe fn write<F>(&self, index: usize, seq: u64, fill: F)
    where
        F: FnOnce(&mut [f32]) -> usize,
    {
        let slot = &mut *self.slots[index].get();
        slot.len = fill(&mut slot.samples[..]).min(self.block_size);
        slot.seq = seq;
    }

    /// Sequence number and valid samples of slot `index`.
    ///
    /// # Safety
    ///
    /// Same ownership rule as [`BlockPool::write`]; the returned slice must not
    /// outlive the caller's ownership of `index`.
    pub(crate) unsafe fn read(&self, index: usize) -> (u64, &[f32]) {
        let slot = &*self.slots[index].get();
        (slot.seq, &slot.samples[..slot.len])
    }
}
