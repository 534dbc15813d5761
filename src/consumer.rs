//! # Block Consumer
//!
//! The asynchronous side of the handoff. A [`Consumer`] receives completed
//! blocks in emission order; [`run_consumer`] drives it from a tokio task by
//! draining the channel on a fixed interval.
//!
//! ## Failure Isolation:
//! A consumer error is logged and counted here. It never reaches the producer,
//! which keeps running and keeps emitting blocks.

use crate::audio::{BlockReceiver, EmittedBlock};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sink for completed blocks on the consumer side.
pub trait Consumer {
    /// Handle one block. Blocks arrive in emission order; gaps in `seq` mean
    /// blocks were dropped by backpressure.
    fn consume(&mut self, block: &EmittedBlock) -> anyhow::Result<()>;

    /// Called once after the last block.
    fn finish(&mut self) {}

    fn summary(&self) -> ConsumerSummary;
}

impl<C: Consumer + ?Sized> Consumer for Box<C> {
    fn consume(&mut self, block: &EmittedBlock) -> anyhow::Result<()> {
        (**self).consume(block)
    }

    fn finish(&mut self) {
        (**self).finish()
    }

    fn summary(&self) -> ConsumerSummary {
        (**self).summary()
    }
}

/// What a consumer saw over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsumerSummary {
    pub blocks: u64,
    pub samples: u64,
    pub short_blocks: u64,
    /// Blocks missing between consecutive sequence numbers
    pub sequence_gaps: u64,
    pub peak: f32,
    pub rms: f32,
}

/// Tracks level statistics and sequence continuity of the block stream.
#[derive(Debug, Default)]
pub struct LevelMeterConsumer {
    summary: ConsumerSummary,
    sum_squares: f64,
    last_seq: Option<u64>,
}

impl LevelMeterConsumer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Consumer for LevelMeterConsumer {
    fn consume(&mut self, block: &EmittedBlock) -> anyhow::Result<()> {
        if let Some(last) = self.last_seq {
            if block.seq() <= last {
                anyhow::bail!("block {} arrived after block {}", block.seq(), last);
            }
            self.summary.sequence_gaps += block.seq() - last - 1;
        } else {
            // Blocks dropped before the first delivery
            self.summary.sequence_gaps += block.seq();
        }
        self.last_seq = Some(block.seq());

        let mut block_peak = 0.0f32;
        for &sample in block.samples() {
            block_peak = block_peak.max(sample.abs());
            self.sum_squares += (sample as f64) * (sample as f64);
        }

        self.summary.blocks += 1;
        self.summary.samples += block.len() as u64;
        if block.is_short() {
            self.summary.short_blocks += 1;
        }
        self.summary.peak = self.summary.peak.max(block_peak);
        self.summary.rms = (self.sum_squares / self.summary.samples.max(1) as f64).sqrt() as f32;
        Ok(())
    }

    fn finish(&mut self) {
        debug!(
            blocks = self.summary.blocks,
            peak = self.summary.peak,
            rms = self.summary.rms,
            "Level meter finished"
        );
    }

    fn summary(&self) -> ConsumerSummary {
        self.summary.clone()
    }
}

/// Result of [`run_consumer`]: the consumer itself plus the errors it returned.
#[derive(Debug)]
pub struct ConsumerRun<C> {
    pub consumer: C,
    pub consume_errors: u64,
}

/// Drain `receiver` into `consumer` every `poll_interval` until the sender is
/// gone and the channel is empty.
///
/// The drop counter is checked after each drain; an increase is logged once
/// per drain with the number of newly dropped blocks.
pub async fn run_consumer<C: Consumer>(
    mut receiver: BlockReceiver,
    mut consumer: C,
    poll_interval: Duration,
) -> ConsumerRun<C> {
    let stats = receiver.stats();
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_dropped = 0;
    let mut consume_errors = 0u64;

    info!(
        block_size = receiver.block_size(),
        poll_interval_ms = poll_interval.as_millis() as u64,
        "Consumer started"
    );

    loop {
        interval.tick().await;

        // Read before draining: if the sender is already gone, this drain
        // sees every block it ever pushed.
        let finished = receiver.is_closed();

        for block in receiver.drain() {
            if let Err(e) = consumer.consume(&block) {
                consume_errors += 1;
                warn!(seq = block.seq(), error = %e, "Consumer failed to handle block");
            }
        }

        let dropped = stats.dropped();
        if dropped > last_dropped {
            warn!(
                newly_dropped = dropped - last_dropped,
                total_dropped = dropped,
                "Handoff channel overflowed; oldest blocks were discarded"
            );
            last_dropped = dropped;
        }

        if finished {
            break;
        }
    }

    consumer.finish();
    info!(
        delivered = stats.delivered(),
        dropped = stats.dropped(),
        consume_errors,
        "Consumer stopped"
    );
    ConsumerRun {
        consumer,
        consume_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::channel;

    #[test]
    fn test_level_meter_statistics() {
        let (mut tx, mut rx) = channel(4, 4).unwrap();
        tx.push(&[0.5, -0.5, 0.5, -0.5]);
        tx.push(&[1.0, 0.0, 0.0, 0.0]);

        let mut meter = LevelMeterConsumer::new();
        for block in rx.drain() {
            meter.consume(&block).unwrap();
        }

        let summary = meter.summary();
        assert_eq!(summary.blocks, 2);
        assert_eq!(summary.samples, 8);
        assert_eq!(summary.sequence_gaps, 0);
        assert_eq!(summary.peak, 1.0);
        // Mean square (4 * 0.25 + 1.0) / 8 = 0.25, so RMS is 0.5
        assert!((summary.rms - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_level_meter_counts_gaps_from_overflow() {
        let (mut tx, mut rx) = channel(1, 2).unwrap();
        for i in 0..5 {
            tx.push(&[i as f32 / 10.0]);
        }

        let mut meter = LevelMeterConsumer::new();
        for block in rx.drain() {
            meter.consume(&block).unwrap();
        }

        // Blocks 0..=2 were displaced; 3 and 4 arrived
        assert_eq!(meter.summary().sequence_gaps, 3);
        assert_eq!(meter.summary().blocks, 2);
    }

    #[tokio::test]
    async fn test_run_consumer_drains_until_closed() {
        let (mut tx, rx) = channel(2, 8).unwrap();
        tx.push(&[0.1, 0.2]);
        tx.push(&[0.3, 0.4]);
        tx.push(&[0.5]);
        drop(tx);

        let run = run_consumer(rx, LevelMeterConsumer::new(), Duration::from_millis(1)).await;
        assert_eq!(run.consume_errors, 0);
        let summary = run.consumer.summary();
        assert_eq!(summary.blocks, 3);
        assert_eq!(summary.samples, 5);
        assert_eq!(summary.short_blocks, 1);
    }

    struct FailingConsumer {
        seen: u64,
    }

    impl Consumer for FailingConsumer {
        fn consume(&mut self, _block: &EmittedBlock) -> anyhow::Result<()> {
            self.seen += 1;
            anyhow::bail!("upload endpoint unavailable")
        }

        fn summary(&self) -> ConsumerSummary {
            ConsumerSummary {
                blocks: self.seen,
                ..Default::default()
            }
        }
    }

    #[tokio::test]
    async fn test_consumer_errors_do_not_stop_draining() {
        let (mut tx, rx) = channel(1, 4).unwrap();
        tx.push(&[0.0]);
        tx.push(&[0.0]);
        drop(tx);

        let run = run_consumer(rx, FailingConsumer { seen: 0 }, Duration::from_millis(1)).await;
        assert_eq!(run.consumer.summary().blocks, 2);
        assert_eq!(run.consume_errors, 2);
    }
}
