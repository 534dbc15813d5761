//! # Block Handoff Channel
//!
//! Carries completed blocks from the real-time producer to the consumer
//! without ever making the producer wait.
//!
//! ## Layout:
//! - **Pool**: `bound + 2` preallocated block slots ([`super::pool`])
//! - **ready queue**: slot indices holding completed blocks, FIFO, capacity `bound`
//! - **free queue**: slot indices the consumer has finished reading
//!
//! Both queues are `crossbeam::queue::ArrayQueue`, a bounded lock-free queue.
//! One sender and one receiver exist per channel and neither is `Clone`.
//!
//! ## Backpressure:
//! When the ready queue already holds `bound` blocks, `push` displaces the
//! oldest queued block with `ArrayQueue::force_push`, recycles its slot for the
//! next block and increments the dropped-block counter.
//!
//! ## Slot accounting:
//! At most `bound` slots sit in the ready queue, the receiver holds at most one
//! while copying it out, and the sender holds at most one spare. The remaining
//! slot is always in the free queue when the sender needs one.

use crate::audio::accumulator::BlockSink;
use crate::audio::buffer::AccumulationBuffer;
use crate::audio::pool::BlockPool;
use crate::error::{AppError, AppResult};
use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A completed block as seen by the consumer.
///
/// Owns its samples; nothing in it aliases producer memory.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedBlock {
    seq: u64,
    samples: Box<[f32]>,
    short: bool,
}

impl EmittedBlock {
    /// Emission order, starting at 0 for the first block of a channel.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// True only for a final partial block produced by a flush.
    pub fn is_short(&self) -> bool {
        self.short
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples.into_vec()
    }
}

/// What `BlockSender::push` did with a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Enqueued without displacing anything
    Queued,
    /// Enqueued after discarding the oldest queued block
    DisplacedOldest,
    /// No slot was available; the new block was discarded
    Rejected,
}

/// Monotonic counters shared by both ends of a channel.
///
/// Updated with relaxed atomics, so readers on any thread see eventually
/// consistent values.
#[derive(Debug, Default)]
pub struct HandoffStats {
    pushed: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`HandoffStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandoffStatsSnapshot {
    pub pushed: u64,
    pub delivered: u64,
    pub dropped: u64,
}

impl HandoffStats {
    /// Blocks handed to `push`, including ones later dropped.
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Blocks taken out of the channel by the receiver.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Blocks lost to backpressure. Never decreases.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HandoffStatsSnapshot {
        HandoffStatsSnapshot {
            pushed: self.pushed(),
            delivered: self.delivered(),
            dropped: self.dropped(),
        }
    }
}

impl HandoffStatsSnapshot {
    /// Fraction of pushed blocks that were dropped (0.0 to 1.0).
    pub fn drop_rate(&self) -> f64 {
        if self.pushed > 0 {
            self.dropped as f64 / self.pushed as f64
        } else {
            0.0
        }
    }
}

struct Shared {
    pool: BlockPool,
    ready: ArrayQueue<usize>,
    free: ArrayQueue<usize>,
    closed: AtomicBool,
    stats: Arc<HandoffStats>,
}

/// Producer end. Lives on the real-time thread.
pub struct BlockSender {
    shared: Arc<Shared>,
    /// Slot recycled from a displaced block, used before the free queue
    spare: Option<usize>,
    next_seq: u64,
}

/// Consumer end. Lives in the consumer's execution context.
pub struct BlockReceiver {
    shared: Arc<Shared>,
}

/// Create a channel for blocks of `block_size` samples holding at most `bound`
/// undelivered blocks.
///
/// ## Errors:
/// `AppError::InvalidInput` if either argument is zero.
pub fn channel(block_size: usize, bound: usize) -> AppResult<(BlockSender, BlockReceiver)> {
    if block_size == 0 {
        return Err(AppError::InvalidInput(
            "handoff block size must be greater than 0".to_string(),
        ));
    }
    if bound == 0 {
        return Err(AppError::InvalidInput(
            "handoff channel bound must be greater than 0".to_string(),
        ));
    }

    let slot_count = bound + 2;
    let free = ArrayQueue::new(slot_count);
    for index in 0..slot_count {
        // Capacity equals slot_count, so every index fits
        let _ = free.push(index);
    }

    let shared = Arc::new(Shared {
        pool: BlockPool::new(block_size, slot_count),
        ready: ArrayQueue::new(bound),
        free,
        closed: AtomicBool::new(false),
        stats: Arc::new(HandoffStats::default()),
    });

    Ok((
        BlockSender {
            shared: Arc::clone(&shared),
            spare: None,
            next_seq: 0,
        },
        BlockReceiver { shared },
    ))
}

impl BlockSender {
    /// Copy `samples` into a pool slot and queue it for the receiver.
    ///
    /// Never blocks and never allocates. `samples` longer than the block size
    /// are truncated to it.
    pub fn push(&mut self, samples: &[f32]) -> PushOutcome {
        debug_assert!(samples.len() <= self.shared.pool.block_size());

        self.push_with(|slot| {
            let len = samples.len().min(slot.len());
            slot[..len].copy_from_slice(&samples[..len]);
            len
        })
    }

    /// Claim a slot, let `fill` write the block into it, and queue it.
    fn push_with<F>(&mut self, fill: F) -> PushOutcome
    where
        F: FnOnce(&mut [f32]) -> usize,
    {
        let stats = &self.shared.stats;
        stats.pushed.fetch_add(1, Ordering::Relaxed);

        let index = match self.spare.take().or_else(|| self.shared.free.pop()) {
            Some(index) => index,
            None => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                return PushOutcome::Rejected;
            }
        };

        let seq = self.next_seq;
        self.next_seq += 1;

        // SAFETY: `index` came from `spare` or the free queue, so this sender
        // is its only holder until it is pushed onto the ready queue below.
        unsafe { self.shared.pool.write(index, seq, fill) };

        match self.shared.ready.force_push(index) {
            None => PushOutcome::Queued,
            Some(displaced) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                self.spare = Some(displaced);
                PushOutcome::DisplacedOldest
            }
        }
    }

    pub fn block_size(&self) -> usize {
        self.shared.pool.block_size()
    }

    pub fn bound(&self) -> usize {
        self.shared.ready.capacity()
    }

    pub fn stats(&self) -> Arc<HandoffStats> {
        Arc::clone(&self.shared.stats)
    }
}

/// The buffer's valid samples are snapshotted straight into the pool slot.
impl BlockSink for BlockSender {
    fn push_block(&mut self, block: &AccumulationBuffer) {
        self.push_with(|slot| block.snapshot_into(slot));
    }
}

impl Drop for BlockSender {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

impl BlockReceiver {
    /// Hand each queued block to `f` in FIFO order without allocating.
    ///
    /// The closure receives the sequence number and the block's samples; the
    /// slice is only valid for the duration of the call. Returns the number of
    /// blocks visited.
    pub fn drain_with<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(u64, &[f32]),
    {
        let mut count = 0;
        while let Some(index) = self.shared.ready.pop() {
            // SAFETY: popping `index` from the ready queue transfers ownership
            // of the slot to this receiver until it is returned to the free queue.
            let (seq, samples) = unsafe { self.shared.pool.read(index) };
            f(seq, samples);
            self.release(index);
            count += 1;
        }
        count
    }

    /// Take the oldest queued block, if any.
    pub fn try_recv(&mut self) -> Option<EmittedBlock> {
        let index = self.shared.ready.pop()?;
        // SAFETY: see `drain_with`.
        let block = unsafe {
            let (seq, samples) = self.shared.pool.read(index);
            self.materialize(seq, samples)
        };
        self.release(index);
        Some(block)
    }

    /// All currently queued blocks, oldest first. Empty when nothing is pending.
    pub fn drain(&mut self) -> Vec<EmittedBlock> {
        let mut blocks = Vec::with_capacity(self.pending());
        while let Some(block) = self.try_recv() {
            blocks.push(block);
        }
        blocks
    }

    /// Blocks currently queued.
    pub fn pending(&self) -> usize {
        self.shared.ready.len()
    }

    /// True once the sender has been dropped. Queued blocks stay drainable.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// True once the sender is gone and every block has been drained.
    pub fn is_finished(&self) -> bool {
        self.is_closed() && self.shared.ready.is_empty()
    }

    pub fn block_size(&self) -> usize {
        self.shared.pool.block_size()
    }

    pub fn stats(&self) -> Arc<HandoffStats> {
        Arc::clone(&self.shared.stats)
    }

    fn materialize(&self, seq: u64, samples: &[f32]) -> EmittedBlock {
        EmittedBlock {
            seq,
            samples: samples.into(),
            short: samples.len() < self.shared.pool.block_size(),
        }
    }

    fn release(&self, index: usize) {
        self.shared.stats.delivered.fetch_add(1, Ordering::Relaxed);
        // The free queue holds every slot, so it cannot be full here
        let _ = self.shared.free.push(index);
    }
}
