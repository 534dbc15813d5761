//! # Frame Accumulator
//!
//! Turns an irregular stream of sample bursts into fixed-size blocks.
//!
//! ## Algorithm (`ingest`):
//! 1. `room = capacity - cursor`
//! 2. Copy `min(room, remaining)` samples from the burst to the buffer
//! 3. If the buffer is full, hand it to the sink and reset the cursor
//! 4. Repeat until the burst is consumed
//!
//! A single burst can complete several blocks. Whatever does not complete a
//! block stays in the buffer for the next call (the "carry-over").
//!
//! ## Real-time behaviour:
//! `ingest` never blocks, never allocates and never logs. The only copy per
//! block is the sink's snapshot of the buffer; for
//! [`BlockSender`](super::handoff::BlockSender) that is
//! [`AccumulationBuffer::snapshot_into`] a preallocated pool slot.

use crate::audio::buffer::AccumulationBuffer;
use crate::error::AppResult;
use serde::{Deserialize, Serialize};

/// Destination for completed blocks.
///
/// `push_block` is called from the real-time path and must return in bounded
/// time. It receives the accumulation buffer itself and must copy the block
/// out (`filled()` or `snapshot_into`) before returning; the buffer is reset
/// right after.
pub trait BlockSink {
    fn push_block(&mut self, block: &AccumulationBuffer);
}

/// What `flush` does with a partially filled buffer at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Drop the trailing samples; only full blocks ever reach the consumer
    #[default]
    Discard,
    /// Emit the trailing samples as one final short block
    EmitPartial,
}

impl std::str::FromStr for FlushPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "discard" | "drop" => Ok(FlushPolicy::Discard),
            "emit_partial" | "emit-partial" | "emit" => Ok(FlushPolicy::EmitPartial),
            _ => Err(format!("Unknown flush policy: {}", s)),
        }
    }
}

/// Result of [`FrameAccumulator::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlushOutcome {
    /// Nothing was buffered
    Empty,
    /// A short final block of `samples` samples was pushed to the sink
    Emitted { samples: usize },
    /// `samples` trailing samples were discarded
    Discarded { samples: usize },
}

/// Owns one [`AccumulationBuffer`] and pushes every completed block to `S`.
pub struct FrameAccumulator<S: BlockSink> {
    buffer: AccumulationBuffer,
    sink: S,
    flush_policy: FlushPolicy,
    samples_ingested: u64,
    blocks_emitted: u64,
}

impl<S: BlockSink> FrameAccumulator<S> {
    /// Create an accumulator emitting blocks of `capacity` samples into `sink`.
    ///
    /// ## Errors:
    /// Returns `AppError::InvalidInput` if `capacity` is zero.
    pub fn new(capacity: usize, sink: S, flush_policy: FlushPolicy) -> AppResult<Self> {
        Ok(Self {
            buffer: AccumulationBuffer::new(capacity)?,
            sink,
            flush_policy,
            samples_ingested: 0,
            blocks_emitted: 0,
        })
    }

    /// Append one burst, emitting every block it completes.
    ///
    /// Returns the number of blocks emitted by this call. An empty burst is a
    /// no-op that returns 0.
    pub fn ingest(&mut self, burst: &[f32]) -> usize {
        let mut offset = 0;
        let mut emitted = 0;

        while offset < burst.len() {
            offset += self.buffer.write(&burst[offset..]);

            if self.buffer.is_full() {
                self.sink.push_block(&self.buffer);
                self.buffer.reset();
                emitted += 1;
            }
        }

        self.samples_ingested += burst.len() as u64;
        self.blocks_emitted += emitted as u64;
        emitted
    }

    /// Apply the flush policy to the carry-over. The buffer is empty afterwards.
    pub fn flush(&mut self) -> FlushOutcome {
        let samples = self.buffer.cursor();
        if samples == 0 {
            return FlushOutcome::Empty;
        }

        let outcome = match self.flush_policy {
            FlushPolicy::EmitPartial => {
                self.sink.push_block(&self.buffer);
                self.blocks_emitted += 1;
                FlushOutcome::Emitted { samples }
            }
            FlushPolicy::Discard => FlushOutcome::Discarded { samples },
        };
        self.buffer.reset();
        outcome
    }

    /// Samples waiting for the next block.
    pub fn buffered(&self) -> &[f32] {
        self.buffer.filled()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        self.flush_policy
    }

    pub fn samples_ingested(&self) -> u64 {
        self.samples_ingested
    }

    /// Blocks pushed to the sink, including a short block from `flush`.
    pub fn blocks_emitted(&self) -> u64 {
        self.blocks_emitted
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::handoff;

    #[derive(Default)]
    struct CollectSink {
        blocks: Vec<Vec<f32>>,
    }

    impl BlockSink for CollectSink {
        fn push_block(&mut self, block: &AccumulationBuffer) {
            self.blocks.push(block.filled().to_vec());
        }
    }

    fn accumulator(capacity: usize) -> FrameAccumulator<CollectSink> {
        FrameAccumulator::new(capacity, CollectSink::default(), FlushPolicy::Discard).unwrap()
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(FrameAccumulator::new(0, CollectSink::default(), FlushPolicy::Discard).is_err());
    }

    #[test]
    fn test_exact_fill() {
        let mut acc = accumulator(4);

        assert_eq!(acc.ingest(&[1.0, 2.0, 3.0]), 0);
        assert_eq!(acc.buffered(), &[1.0, 2.0, 3.0]);
        assert!(acc.sink().blocks.is_empty());

        assert_eq!(acc.ingest(&[4.0]), 1);
        assert_eq!(acc.sink().blocks, vec![vec![1.0, 2.0, 3.0, 4.0]]);
        assert!(acc.buffered().is_empty());
    }

    #[test]
    fn test_overfill_in_one_call() {
        let mut acc = accumulator(4);
        acc.ingest(&[1.0, 2.0, 3.0]);

        assert_eq!(acc.ingest(&[4.0, 5.0, 6.0, 7.0, 8.0]), 2);
        assert_eq!(
            acc.sink().blocks,
            vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]
        );
        assert!(acc.buffered().is_empty());
    }

    #[test]
    fn test_burst_spanning_many_blocks_keeps_remainder() {
        let mut acc = accumulator(3);
        let burst: Vec<f32> = (0..11).map(|i| i as f32).collect();

        assert_eq!(acc.ingest(&burst), 3);
        assert_eq!(acc.sink().blocks.len(), 3);
        assert_eq!(acc.sink().blocks[2], vec![6.0, 7.0, 8.0]);
        assert_eq!(acc.buffered(), &[9.0, 10.0]);
    }

    #[test]
    fn test_empty_burst_is_a_no_op() {
        let mut acc = accumulator(4);
        acc.ingest(&[1.0, 2.0]);

        assert_eq!(acc.ingest(&[]), 0);
        assert_eq!(acc.buffered(), &[1.0, 2.0]);
        assert_eq!(acc.samples_ingested(), 2);
        assert!(acc.sink().blocks.is_empty());
    }

    #[test]
    fn test_prefix_property_over_irregular_bursts() {
        let capacity = 5;
        let mut acc = accumulator(capacity);
        let mut input = Vec::new();
        let mut next = 0.0f32;

        // Burst lengths cycle through empty, short, exact and oversized
        for len in [0usize, 1, 7, 5, 3, 0, 12, 4, 2, 9].iter().cycle().take(40) {
            let burst: Vec<f32> = (0..*len)
                .map(|_| {
                    next += 1.0;
                    next
                })
                .collect();
            input.extend_from_slice(&burst);
            acc.ingest(&burst);
        }

        let emitted: Vec<f32> = acc.sink().blocks.iter().flatten().copied().collect();
        let full = input.len() / capacity * capacity;

        assert!(acc.sink().blocks.iter().all(|b| b.len() == capacity));
        assert_eq!(emitted, input[..full].to_vec());
        assert_eq!(acc.buffered(), &input[full..]);
        assert_eq!(acc.blocks_emitted() as usize, full / capacity);
    }

    #[test]
    fn test_flush_discard() {
        let mut acc = accumulator(4);
        acc.ingest(&[1.0, 2.0]);

        assert_eq!(acc.flush(), FlushOutcome::Discarded { samples: 2 });
        assert!(acc.buffered().is_empty());
        assert!(acc.sink().blocks.is_empty());
        assert_eq!(acc.flush(), FlushOutcome::Empty);
    }

    #[test]
    fn test_flush_emit_partial() {
        let mut acc =
            FrameAccumulator::new(4, CollectSink::default(), FlushPolicy::EmitPartial).unwrap();
        acc.ingest(&[1.0, 2.0, 3.0, 4.0, 5.0]);

        assert_eq!(acc.flush(), FlushOutcome::Emitted { samples: 1 });
        assert_eq!(acc.sink().blocks, vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0]]);
        assert_eq!(acc.blocks_emitted(), 2);
    }

    #[test]
    fn test_flush_policy_parsing() {
        assert_eq!("discard".parse::<FlushPolicy>(), Ok(FlushPolicy::Discard));
        assert_eq!("EMIT_PARTIAL".parse::<FlushPolicy>(), Ok(FlushPolicy::EmitPartial));
        assert!("sometimes".parse::<FlushPolicy>().is_err());
    }

    #[test]
    fn test_into_handoff_channel_with_overflow() {
        let (tx, mut rx) = handoff::channel(4, 2).unwrap();
        let mut acc = FrameAccumulator::new(4, tx, FlushPolicy::Discard).unwrap();

        // Three blocks before the consumer gets a chance to drain
        acc.ingest(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        acc.ingest(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);

        let blocks = rx.drain();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].samples(), &[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(blocks[1].samples(), &[9.0, 10.0, 11.0, 12.0]);
        assert_eq!(rx.stats().dropped(), 1);
    }

    #[test]
    fn test_independent_accumulators_do_not_share_state() {
        let mut left = accumulator(2);
        let mut right = accumulator(2);

        left.ingest(&[1.0]);
        right.ingest(&[10.0, 20.0, 30.0]);

        assert_eq!(left.buffered(), &[1.0]);
        assert_eq!(right.buffered(), &[30.0]);
        assert!(left.sink().blocks.is_empty());
        assert_eq!(right.sink().blocks, vec![vec![10.0, 20.0]]);
    }
}
