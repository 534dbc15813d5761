//! # Pipeline
//!
//! Wires an [`AudioSource`] through a [`FrameAccumulator`] and the handoff
//! channel into a [`Consumer`].
//!
//! ## Execution Contexts:
//! - **Producer**: a dedicated OS thread that paces itself to one burst per
//!   processing period, like an audio callback. It only touches the source, the
//!   accumulator and the sender half of the channel.
//! - **Consumer**: a tokio task that drains the channel on an interval.
//!
//! ## Shutdown:
//! `stop()` raises a flag the producer checks once per period. The producer
//! then applies the flush policy and drops the sender; the consumer drains what
//! is left and returns once it sees the channel closed.

use crate::audio::session::PipelineSession;
use crate::audio::{
    channel, AudioSource, BlockSender, FlushPolicy, FrameAccumulator, HandoffStats,
};
use crate::config::AppConfig;
use crate::consumer::{run_consumer, Consumer, ConsumerRun};
use crate::error::{AppError, AppResult};
use crate::metrics::{HandoffSummary, PipelineReport, ProducerSummary, ServiceInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Settings the pipeline needs, extracted from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub block_size: usize,
    pub channel_bound: usize,
    pub flush_policy: FlushPolicy,
    pub burst_size: usize,
    pub burst_period: Duration,
    pub poll_interval: Duration,
}

impl TryFrom<&AppConfig> for PipelineSettings {
    type Error = AppError;

    fn try_from(config: &AppConfig) -> AppResult<Self> {
        Ok(Self {
            block_size: config.pipeline.block_size,
            channel_bound: config.pipeline.channel_bound,
            flush_policy: config.pipeline.flush_policy,
            burst_size: config.source.burst_size,
            burst_period: config.burst_period()?,
            poll_interval: Duration::from_millis(config.consumer.poll_interval_ms),
        })
    }
}

/// A running producer/consumer pair.
pub struct Pipeline<C> {
    settings: PipelineSettings,
    session: Arc<PipelineSession>,
    stop: Arc<AtomicBool>,
    stats: Arc<HandoffStats>,
    producer: Option<thread::JoinHandle<ProducerSummary>>,
    consumer: Option<tokio::task::JoinHandle<ConsumerRun<C>>>,
}

impl<C> Pipeline<C>
where
    C: Consumer + Send + 'static,
{
    /// Build the channel and accumulator, then start both sides.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S>(settings: PipelineSettings, source: S, consumer: C) -> AppResult<Self>
    where
        S: AudioSource + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            AppError::Internal("pipeline must be started inside a tokio runtime".to_string())
        })?;

        if settings.burst_size == 0 {
            return Err(AppError::InvalidInput("burst size must be greater than 0".to_string()));
        }

        let (sender, receiver) = channel(settings.block_size, settings.channel_bound)?;
        let stats = sender.stats();
        let accumulator = FrameAccumulator::new(settings.block_size, sender, settings.flush_policy)?;

        let session = Arc::new(PipelineSession::new());
        let stop = Arc::new(AtomicBool::new(false));

        info!(
            session_id = %session.session_id,
            source = source.name(),
            sample_rate = source.sample_rate(),
            block_size = settings.block_size,
            channel_bound = settings.channel_bound,
            flush_policy = ?settings.flush_policy,
            burst_size = settings.burst_size,
            burst_period_us = settings.burst_period.as_micros() as u64,
            "Starting pipeline"
        );

        let producer = {
            let stop = Arc::clone(&stop);
            let burst_size = settings.burst_size;
            let period = settings.burst_period;
            thread::Builder::new()
                .name("audio-producer".to_string())
                .spawn(move || run_producer(source, accumulator, burst_size, period, stop))
                .map_err(|e| AppError::Internal(format!("failed to spawn producer thread: {}", e)))?
        };

        let consumer = runtime.spawn(run_consumer(receiver, consumer, settings.poll_interval));

        if let Err(e) = session.start() {
            warn!(error = %e, "Session state out of sync at start");
        }

        Ok(Self {
            settings,
            session,
            stop,
            stats,
            producer: Some(producer),
            consumer: Some(consumer),
        })
    }

    pub fn session(&self) -> &PipelineSession {
        &self.session
    }

    /// Live handoff counters; readable while the pipeline runs.
    pub fn stats(&self) -> Arc<HandoffStats> {
        Arc::clone(&self.stats)
    }

    /// True once the producer thread has returned, e.g. because the source
    /// ran out of samples.
    pub fn is_producer_finished(&self) -> bool {
        self.producer.as_ref().map_or(true, |handle| handle.is_finished())
    }

    /// Resolve once the producer thread has returned on its own.
    pub async fn wait_for_producer(&self) {
        while !self.is_producer_finished() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Stop the producer, let the consumer drain, and build the final report.
    pub async fn stop(mut self) -> AppResult<PipelineReport> {
        if let Err(e) = self.session.begin_stop() {
            warn!(error = %e, "Session state out of sync at stop");
        }
        self.stop.store(true, Ordering::Release);

        let producer = self
            .producer
            .take()
            .ok_or_else(|| AppError::Internal("producer already joined".to_string()))?;
        let producer_summary = match tokio::task::spawn_blocking(move || producer.join()).await {
            Ok(Ok(summary)) => summary,
            Ok(Err(_)) => return Err(self.fail("producer thread panicked")),
            Err(e) => return Err(self.fail(&format!("producer join task failed: {}", e))),
        };

        let consumer = self
            .consumer
            .take()
            .ok_or_else(|| AppError::Internal("consumer already joined".to_string()))?;
        let consumer_run = match consumer.await {
            Ok(run) => run,
            Err(e) => return Err(self.fail(&format!("consumer task failed: {}", e))),
        };

        if let Err(e) = self.session.finish() {
            warn!(error = %e, "Session state out of sync at finish");
        }

        let report = PipelineReport {
            service: ServiceInfo::default(),
            session: self.session.summary(),
            producer: producer_summary,
            handoff: HandoffSummary::new(
                self.stats.snapshot(),
                self.settings.block_size,
                self.settings.channel_bound,
            ),
            consumer: consumer_run.consumer.summary(),
            consume_errors: consumer_run.consume_errors,
        };

        info!(
            session_id = %report.session.session_id,
            blocks_emitted = report.producer.blocks_emitted,
            delivered = report.handoff.counters.delivered,
            dropped = report.handoff.counters.dropped,
            "Pipeline stopped"
        );
        Ok(report)
    }

    fn fail(&self, message: &str) -> AppError {
        error!(session_id = %self.session.session_id, "{}", message);
        self.session.set_error(message.to_string());
        AppError::Internal(message.to_string())
    }
}

impl<C> Drop for Pipeline<C> {
    fn drop(&mut self) {
        // A pipeline dropped without `stop()` must not leave the producer spinning
        self.stop.store(true, Ordering::Release);
    }
}

/// Body of the producer thread.
///
/// Everything between the first `fill_burst` and the stop flag is the
/// real-time loop: no logging, no locks, no allocation.
fn run_producer<S: AudioSource>(
    mut source: S,
    mut accumulator: FrameAccumulator<BlockSender>,
    burst_size: usize,
    period: Duration,
    stop: Arc<AtomicBool>,
) -> ProducerSummary {
    let mut burst = vec![0.0f32; burst_size];
    let mut summary = ProducerSummary {
        source: source.name().to_string(),
        ..Default::default()
    };
    let mut exhausted = false;
    let mut deadline = Instant::now();

    while !stop.load(Ordering::Acquire) {
        let filled = source.fill_burst(&mut burst);
        if filled == 0 {
            exhausted = true;
            break;
        }
        accumulator.ingest(&burst[..filled]);
        summary.bursts += 1;

        deadline += period;
        let now = Instant::now();
        if now > deadline {
            summary.deadline_misses += 1;
            deadline = now;
        } else {
            thread::sleep(deadline - now);
        }
    }

    let flush = accumulator.flush();
    summary.samples_ingested = accumulator.samples_ingested();
    summary.blocks_emitted = accumulator.blocks_emitted();
    summary.flush = Some(flush);

    debug!(
        exhausted,
        bursts = summary.bursts,
        deadline_misses = summary.deadline_misses,
        flush = ?flush,
        "Producer finished"
    );

    // Dropping the accumulator drops the sender and closes the channel
    drop(accumulator);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{EmittedBlock, FlushOutcome, PcmFileSource, SineSource};
    use crate::consumer::{ConsumerSummary, LevelMeterConsumer};

    /// Records every sample it receives and rejects any that arrive out of
    /// order for a rising ramp.
    #[derive(Default)]
    struct RecordingConsumer {
        samples: Vec<f32>,
        block_lens: Vec<usize>,
    }

    impl Consumer for RecordingConsumer {
        fn consume(&mut self, block: &EmittedBlock) -> anyhow::Result<()> {
            for &sample in block.samples() {
                if let Some(&last) = self.samples.last() {
                    anyhow::ensure!(sample > last, "sample {} followed {}", sample, last);
                }
                self.samples.push(sample);
            }
            self.block_lens.push(block.len());
            Ok(())
        }

        fn summary(&self) -> ConsumerSummary {
            ConsumerSummary {
                blocks: self.block_lens.len() as u64,
                samples: self.samples.len() as u64,
                ..Default::default()
            }
        }
    }

    fn ramp_source(len: usize, sample_rate: u32) -> PcmFileSource {
        let bytes: Vec<u8> = (0..len as i16).flat_map(|s| s.to_le_bytes()).collect();
        PcmFileSource::from_pcm_bytes(&bytes, sample_rate).unwrap()
    }

    fn settings(block_size: usize, channel_bound: usize, flush_policy: FlushPolicy) -> PipelineSettings {
        PipelineSettings {
            block_size,
            channel_bound,
            flush_policy,
            burst_size: 64,
            burst_period: Duration::from_micros(500),
            poll_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_finite_source_delivers_every_full_block_in_order() {
        let source = ramp_source(1050, 128_000);
        let pipeline = Pipeline::start(
            settings(100, 64, FlushPolicy::Discard),
            source,
            RecordingConsumer::default(),
        )
        .unwrap();

        pipeline.wait_for_producer().await;
        let report = pipeline.stop().await.unwrap();

        assert_eq!(report.producer.samples_ingested, 1050);
        assert_eq!(report.producer.blocks_emitted, 10);
        assert_eq!(report.producer.flush, Some(FlushOutcome::Discarded { samples: 50 }));
        assert_eq!(report.handoff.counters.dropped, 0);
        assert_eq!(report.consumer.blocks, 10);
        assert_eq!(report.consumer.samples, 1000);
        assert_eq!(report.consume_errors, 0);
        assert_eq!(report.session.status, "stopped");
    }

    #[tokio::test]
    async fn test_emit_partial_delivers_short_tail() {
        let source = ramp_source(250, 128_000);
        let pipeline = Pipeline::start(
            settings(100, 8, FlushPolicy::EmitPartial),
            source,
            LevelMeterConsumer::new(),
        )
        .unwrap();

        pipeline.wait_for_producer().await;
        let report = pipeline.stop().await.unwrap();

        assert_eq!(report.producer.flush, Some(FlushOutcome::Emitted { samples: 50 }));
        assert_eq!(report.consumer.blocks, 3);
        assert_eq!(report.consumer.short_blocks, 1);
        assert_eq!(report.consumer.samples, 250);
        assert_eq!(report.consumer.sequence_gaps, 0);
    }

    #[tokio::test]
    async fn test_slow_consumer_loses_blocks_but_counts_them() {
        let source = ramp_source(4000, 128_000);
        let mut settings = settings(10, 1, FlushPolicy::Discard);
        settings.poll_interval = Duration::from_millis(200);

        let pipeline = Pipeline::start(settings, source, LevelMeterConsumer::new()).unwrap();
        pipeline.wait_for_producer().await;
        let report = pipeline.stop().await.unwrap();

        let counters = report.handoff.counters;
        assert_eq!(counters.pushed, 400);
        assert!(counters.dropped > 0);
        assert_eq!(counters.delivered + counters.dropped, counters.pushed);
        assert_eq!(report.consumer.blocks, counters.delivered);
        assert_eq!(report.consumer.sequence_gaps, counters.dropped);
    }

    #[tokio::test]
    async fn test_stop_ends_an_endless_source() {
        let source = SineSource::new(16000, 440.0, 0.5).unwrap();
        let pipeline = Pipeline::start(
            settings(160, 16, FlushPolicy::Discard),
            source,
            LevelMeterConsumer::new(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pipeline.session().is_running());
        assert!(!pipeline.is_producer_finished());

        let report = pipeline.stop().await.unwrap();
        assert!(report.producer.bursts > 0);
        assert!(report.consumer.peak <= 0.5 + 1e-6);
        assert_eq!(report.session.status, "stopped");
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let source = SineSource::new(16000, 440.0, 0.5).unwrap();
        let result = Pipeline::start(
            settings(160, 16, FlushPolicy::Discard),
            source,
            LevelMeterConsumer::new(),
        );
        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    #[test]
    fn test_settings_from_config() {
        let config = AppConfig::default();
        let settings = PipelineSettings::try_from(&config).unwrap();
        assert_eq!(settings.block_size, config.pipeline.block_size);
        assert_eq!(settings.burst_period, config.burst_period().unwrap());
        assert_eq!(settings.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_settings_from_unvalidated_config_with_zero_sample_rate() {
        let mut config = AppConfig::default();
        config.source.sample_rate = 0;

        let result = PipelineSettings::try_from(&config);
        assert!(matches!(result, Err(AppError::ValidationError(_))));
    }
}
