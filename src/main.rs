//! # Frame Accumulator - Harness Entry Point
//!
//! Runs one pipeline session from configuration:
//! 1. Loads `.env`, sets up tracing, loads and validates [`AppConfig`]
//! 2. Builds the configured audio source (`sine` or `pcm_file`)
//! 3. Starts the producer thread and the consumer task
//! 4. Stops after `run.duration_ms`, on SIGINT/SIGTERM, or when the source
//!    runs dry, whichever comes first
//! 5. Logs the final report as JSON

use anyhow::Result;
use frame_accumulator::audio::{AudioSource, PcmFileSource, SineSource};
use frame_accumulator::config::{AppConfig, SourceKind};
use frame_accumulator::consumer::LevelMeterConsumer;
use frame_accumulator::error::{AppError, AppResult};
use frame_accumulator::pipeline::{Pipeline, PipelineSettings};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by the signal task; polled by [`wait_for_shutdown`].
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    if let Err(e) = run().await {
        error!(error.kind = e.kind(), error = %e, "frame-accumulator failed");
        return Err(e.into());
    }
    Ok(())
}

async fn run() -> AppResult<()> {
    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting frame-accumulator v{}", env!("CARGO_PKG_VERSION"));
    debug!("Effective configuration:\n{}", config.to_toml()?);

    let source = build_source(&config)?;
    let pipeline = Pipeline::start(
        PipelineSettings::try_from(&config)?,
        source,
        LevelMeterConsumer::new(),
    )?;

    setup_signal_handlers();

    tokio::select! {
        _ = run_timer(config.run.duration_ms) => {
            info!(duration_ms = config.run.duration_ms, "Run duration elapsed");
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping pipeline...");
        }
        _ = pipeline.wait_for_producer() => {
            info!("Audio source exhausted");
        }
    }

    let report = pipeline.stop().await?;
    match report.status() {
        "healthy" => info!("Pipeline finished without dropping blocks"),
        status => warn!(
            status,
            dropped = report.handoff.counters.dropped,
            drop_rate = report.handoff.drop_rate,
            "Consumer fell behind during the run"
        ),
    }
    info!("Pipeline report:\n{}", report.to_json()?);

    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "frame_accumulator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn build_source(config: &AppConfig) -> AppResult<Box<dyn AudioSource + Send>> {
    let source = &config.source;
    let built: Box<dyn AudioSource + Send> = match source.kind {
        SourceKind::Sine => Box::new(SineSource::new(
            source.sample_rate,
            source.frequency_hz,
            source.amplitude,
        )?),
        SourceKind::PcmFile => {
            let path = source.pcm_path.as_deref().ok_or_else(|| {
                AppError::ValidationError("pcm_file source requires source.pcm_path".to_string())
            })?;
            let pcm = PcmFileSource::open(path, source.sample_rate)?;
            info!(
                path,
                duration_seconds = pcm.duration_seconds(),
                "Loaded PCM file"
            );
            Box::new(pcm)
        }
    };
    Ok(built)
}

/// Resolves after `duration_ms`; never resolves when it is 0.
async fn run_timer(duration_ms: u64) {
    if duration_ms == 0 {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(Duration::from_millis(duration_ms)).await;
}

/// Listen for SIGTERM and SIGINT and raise [`SHUTDOWN_SIGNAL`] on the first one.
#[cfg(unix)]
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Failed to install signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Ctrl+C only where Unix signals are unavailable.
#[cfg(not(unix))]
fn setup_signal_handlers() {
    tokio::spawn(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
            }
            Err(e) => error!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
