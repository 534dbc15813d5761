//! # Configuration Management
//!
//! Loads the pipeline configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml in the working directory)
//! - An extra TOML file named by `APP_CONFIG_FILE`
//! - Environment variables with the `APP_` prefix
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (`APP_PIPELINE__BLOCK_SIZE`, `APP_SOURCE__KIND`, ...)
//! 2. The file named by `APP_CONFIG_FILE`
//! 3. config.toml
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated by a double underscore so that field names
//! containing `_` survive the mapping.

use crate::audio::FlushPolicy;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub source: SourceConfig,
    pub consumer: ConsumerConfig,
    pub run: RunConfig,
}

/// Accumulator and handoff channel settings.
///
/// ## Fields:
/// - `block_size`: samples per emitted block, fixed for the accumulator's lifetime
/// - `channel_bound`: undelivered blocks the channel holds before dropping the oldest
/// - `flush_policy`: `discard` or `emit_partial` for the carry-over at teardown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub block_size: usize,
    pub channel_bound: usize,
    pub flush_policy: FlushPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Sine,
    PcmFile,
}

/// Audio source settings.
///
/// ## Fields:
/// - `burst_size`: samples delivered per processing period; together with
///   `sample_rate` this sets the period (`burst_size / sample_rate` seconds)
/// - `frequency_hz`, `amplitude`: tone parameters for the `sine` source
/// - `pcm_path`: raw 16-bit little-endian mono file for the `pcm_file` source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub sample_rate: u32,
    pub burst_size: usize,
    pub frequency_hz: f32,
    pub amplitude: f32,
    pub pcm_path: Option<String>,
}

/// Consumer side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// How often the consumer task drains the channel
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Stop after this long; 0 runs until SIGINT/SIGTERM or source exhaustion
    pub duration_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig {
                block_size: 1600,   // 100ms at 16kHz
                channel_bound: 32,  // ~3.2s of blocks before dropping
                flush_policy: FlushPolicy::Discard,
            },
            source: SourceConfig {
                kind: SourceKind::Sine,
                sample_rate: 16000,
                burst_size: 128,    // typical audio callback quantum
                frequency_hz: 440.0,
                amplitude: 0.5,
                pcm_path: None,
            },
            consumer: ConsumerConfig {
                poll_interval_ms: 50,
            },
            run: RunConfig { duration_ms: 5000 },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_PIPELINE__BLOCK_SIZE=512`
    /// - `APP_PIPELINE__FLUSH_POLICY=emit_partial`
    /// - `APP_SOURCE__KIND=pcm_file` with `APP_SOURCE__PCM_PATH=/tmp/take1.pcm`
    /// - `APP_CONFIG_FILE=/etc/frame-accumulator/staging.toml`
    pub fn load() -> AppResult<Self> {
        let extra = env::var("APP_CONFIG_FILE").ok();
        Self::load_with_file(extra.as_deref())
    }

    /// Same layering as [`AppConfig::load`], with `extra_file` in place of
    /// `APP_CONFIG_FILE`. A named file that cannot be read is an error.
    pub fn load_with_file(extra_file: Option<&str>) -> AppResult<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false));

        if let Some(path) = extra_file {
            settings = settings.add_source(config::File::with_name(path).required(true));
        }

        let settings = settings.add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> AppResult<()> {
        if self.pipeline.block_size == 0 {
            return Err(invalid("Block size must be greater than 0"));
        }

        if self.pipeline.channel_bound == 0 {
            return Err(invalid("Channel bound must be greater than 0"));
        }

        if self.source.sample_rate == 0 {
            return Err(invalid("Sample rate must be greater than 0"));
        }

        if self.source.burst_size == 0 {
            return Err(invalid("Burst size must be greater than 0"));
        }

        if !(self.source.amplitude > 0.0 && self.source.amplitude <= 1.0) {
            return Err(AppError::ValidationError(format!(
                "Amplitude must be in (0, 1], got {}",
                self.source.amplitude
            )));
        }

        if self.source.kind == SourceKind::PcmFile && self.source.pcm_path.is_none() {
            return Err(invalid("pcm_file source requires source.pcm_path"));
        }

        if self.consumer.poll_interval_ms == 0 {
            return Err(invalid("Consumer poll interval must be greater than 0"));
        }

        Ok(())
    }

    /// Length of one processing period, `burst_size / sample_rate` seconds.
    ///
    /// ## Errors:
    /// `AppError::ValidationError` if either value is zero.
    pub fn burst_period(&self) -> AppResult<Duration> {
        if self.source.sample_rate == 0 || self.source.burst_size == 0 {
            return Err(invalid("Burst period needs a non-zero burst size and sample rate"));
        }
        Ok(Duration::from_secs_f64(
            self.source.burst_size as f64 / self.source.sample_rate as f64,
        ))
    }

    /// Render the configuration as TOML for startup logs.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AppError::Internal(format!("TOML serialization error: {}", e)))
    }
}

fn invalid(message: &str) -> AppError {
    AppError::ValidationError(message.to_string())
}
