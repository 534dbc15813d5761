//! # Audio Core
//!
//! The accumulate-and-emit engine and its handoff to the consumer side.
//!
//! ## Key Components:
//! - **AccumulationBuffer**: fixed-capacity sample store with a write cursor
//! - **FrameAccumulator**: repacks bursts into fixed-size blocks
//! - **Handoff channel**: bounded, lock-free, drop-oldest block transport
//! - **Block pool**: preallocated block slots moved by index
//! - **Audio sources**: burst suppliers for the producer loop
//! - **Session**: lifecycle of one pipeline run
//!
//! ## Audio Format:
//! - **Samples**: 32-bit float, mono
//! - **Block size**: fixed per accumulator, chosen at construction

pub mod accumulator; // Fill/emit/reset algorithm and flush policy
pub mod buffer;      // Fixed-capacity sample store
pub mod handoff;     // Producer → consumer block channel
mod pool;            // Preallocated slot arena behind the channel
pub mod session;     // Pipeline session lifecycle
pub mod source;      // Burst suppliers

pub use accumulator::{BlockSink, FlushOutcome, FlushPolicy, FrameAccumulator};
pub use buffer::AccumulationBuffer;
pub use handoff::{
    channel, BlockReceiver, BlockSender, EmittedBlock, HandoffStats, HandoffStatsSnapshot,
    PushOutcome,
};
pub use source::{AudioSource, PcmFileSource, SineSource};
