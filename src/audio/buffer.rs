//! # Accumulation Buffer
//!
//! Fixed-capacity sample store with a write cursor. Holds the samples that have
//! arrived since the last emitted block.
//!
//! ## Invariant:
//! - Slots `[0, cursor)` hold valid samples in arrival order, not yet emitted
//! - Slots `[cursor, capacity)` are stale and never read
//! - Between calls `cursor < capacity`; the owner resets the cursor as soon as
//!   it observes a full buffer
//!
//! ## Memory Management:
//! Storage is allocated once in [`AccumulationBuffer::new`] and reused for the
//! lifetime of the buffer. No method here allocates.

use crate::error::{AppError, AppResult};

/// Fixed-capacity sample store owned by exactly one `FrameAccumulator`.
#[derive(Debug)]
pub struct AccumulationBuffer {
    /// Sample slots, `capacity` long
    storage: Box<[f32]>,

    /// Number of valid samples at the front of `storage`
    cursor: usize,
}

impl AccumulationBuffer {
    /// Create a buffer holding up to `capacity` samples.
    ///
    /// ## Errors:
    /// Returns `AppError::InvalidInput` for a zero capacity, which could never
    /// emit a block.
    pub fn new(capacity: usize) -> AppResult<Self> {
        if capacity == 0 {
            return Err(AppError::InvalidInput(
                "accumulation buffer capacity must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            storage: vec![0.0; capacity].into_boxed_slice(),
            cursor: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of buffered samples (the write position).
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Free slots left before the buffer is full.
    pub fn room(&self) -> usize {
        self.storage.len() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    pub fn is_full(&self) -> bool {
        self.cursor == self.storage.len()
    }

    /// Copy as many of `samples` as fit at the cursor and advance it.
    ///
    /// ## Returns:
    /// The number of samples copied, `min(room, samples.len())`. The caller
    /// keeps the rest of its input for the next write.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let count = self.room().min(samples.len());
        self.storage[self.cursor..self.cursor + count].copy_from_slice(&samples[..count]);
        self.cursor += count;
        count
    }

    /// The valid samples `[0, cursor)`.
    pub fn filled(&self) -> &[f32] {
        &self.storage[..self.cursor]
    }

    /// Copy the valid samples into `out`, returning how many were copied.
    ///
    /// `out` must have room for `cursor()` samples; extra room is left untouched.
    pub fn snapshot_into(&self, out: &mut [f32]) -> usize {
        let count = self.cursor.min(out.len());
        out[..count].copy_from_slice(&self.storage[..count]);
        count
    }

    /// Forget all buffered samples. Storage is kept for reuse.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}
