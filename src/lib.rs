//! # Frame Accumulator
//!
//! Repacks variable-size audio bursts into fixed-size blocks on a real-time
//! thread and hands them to an asynchronous consumer over a bounded,
//! lock-free, drop-oldest channel.
//!
//! ## Modules:
//! - **audio**: accumulator, handoff channel, sources and session lifecycle
//! - **consumer**: the draining side of the channel
//! - **pipeline**: producer thread + consumer task wiring
//! - **metrics**: end-of-run report
//! - **config**: layered configuration (defaults, TOML, environment)
//! - **error**: error types shared by every module

pub mod audio;
pub mod config;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod pipeline;

pub use audio::{channel, BlockSink, FlushOutcome, FlushPolicy, FrameAccumulator};
pub use error::{AppError, AppResult};
pub use pipeline::{Pipeline, PipelineSettings};
