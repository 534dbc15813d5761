//! # Audio Sources
//!
//! Bursts of mono `f32` samples for the producer loop. The pipeline calls
//! [`AudioSource::fill_burst`] once per processing period, the same way an
//! audio callback would deliver a buffer.
//!
//! ## Provided Sources:
//! - **SineSource**: deterministic test tone, phase-continuous across bursts
//! - **PcmFileSource**: replays a raw 16-bit little-endian mono PCM file
//!
//! ## Sample Format:
//! - **Channels**: Mono
//! - **Range**: [-1.0, 1.0]; 16-bit PCM is scaled by 1/32768

use crate::error::{AppError, AppResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::f32::consts::TAU;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

/// Supplier of sample bursts.
pub trait AudioSource {
    /// Write the next burst into `out` and return how many samples were
    /// written. Returning 0 means the source is exhausted.
    ///
    /// Called from the real-time producer thread; implementations must not
    /// block or allocate.
    fn fill_burst(&mut self, out: &mut [f32]) -> usize;

    fn sample_rate(&self) -> u32;

    /// Short name for logs and reports.
    fn name(&self) -> &str;
}

impl<T: AudioSource + ?Sized> AudioSource for Box<T> {
    fn fill_burst(&mut self, out: &mut [f32]) -> usize {
        (**self).fill_burst(out)
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Endless sine tone.
#[derive(Debug, Clone)]
pub struct SineSource {
    sample_rate: u32,
    amplitude: f32,
    /// Phase advance per sample, in radians
    step: f32,
    phase: f32,
}

impl SineSource {
    /// ## Errors:
    /// `AppError::InvalidInput` for a zero sample rate, a non-positive
    /// frequency, or a frequency at or above Nyquist.
    pub fn new(sample_rate: u32, frequency_hz: f32, amplitude: f32) -> AppResult<Self> {
        if sample_rate == 0 {
            return Err(AppError::InvalidInput("sample rate must be greater than 0".to_string()));
        }
        if frequency_hz <= 0.0 || frequency_hz >= sample_rate as f32 / 2.0 {
            return Err(AppError::InvalidInput(format!(
                "frequency {} Hz is outside (0, {}) for sample rate {}",
                frequency_hz,
                sample_rate / 2,
                sample_rate
            )));
        }

        Ok(Self {
            sample_rate,
            amplitude,
            step: TAU * frequency_hz / sample_rate as f32,
            phase: 0.0,
        })
    }
}

impl AudioSource for SineSource {
    fn fill_burst(&mut self, out: &mut [f32]) -> usize {
        for sample in out.iter_mut() {
            *sample = self.amplitude * self.phase.sin();
            self.phase += self.step;
            if self.phase >= TAU {
                self.phase -= TAU;
            }
        }
        out.len()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "sine"
    }
}

/// Replays a decoded PCM recording, one burst at a time.
#[derive(Debug, Clone)]
pub struct PcmFileSource {
    sample_rate: u32,
    samples: Vec<f32>,
    position: usize,
}

impl PcmFileSource {
    /// Read and decode a raw 16-bit little-endian mono PCM file.
    ///
    /// The whole file is decoded here so that `fill_burst` only copies.
    pub fn open(path: impl AsRef<Path>, sample_rate: u32) -> AppResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let source = Self::from_pcm_bytes(&data, sample_rate)?;

        info!(
            path = %path.display(),
            samples = source.samples.len(),
            duration_seconds = source.duration_seconds(),
            "Opened PCM file source"
        );
        Ok(source)
    }

    /// Decode raw 16-bit little-endian PCM bytes.
    ///
    /// ## Validation:
    /// - Data must not be empty
    /// - Length must be even (whole 16-bit samples)
    pub fn from_pcm_bytes(data: &[u8], sample_rate: u32) -> AppResult<Self> {
        if sample_rate == 0 {
            return Err(AppError::InvalidInput("sample rate must be greater than 0".to_string()));
        }
        if data.is_empty() {
            return Err(AppError::Source("PCM data is empty".to_string()));
        }
        if data.len() % 2 != 0 {
            return Err(AppError::Source(
                "PCM data length must be even for 16-bit samples".to_string(),
            ));
        }

        let mut cursor = Cursor::new(data);
        let mut pcm = Vec::with_capacity(data.len() / 2);
        while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
            pcm.push(sample);
        }
        debug!(samples = pcm.len(), "Decoded PCM data");

        Ok(Self {
            sample_rate,
            samples: pcm_to_float(&pcm),
            position: 0,
        })
    }

    /// Samples not yet delivered.
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

impl AudioSource for PcmFileSource {
    fn fill_burst(&mut self, out: &mut [f32]) -> usize {
        let count = self.remaining().min(out.len());
        out[..count].copy_from_slice(&self.samples[self.position..self.position + count]);
        self.position += count;
        count
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "pcm_file"
    }
}

/// Convert 16-bit PCM samples to `f32` in [-1.0, 1.0).
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}
