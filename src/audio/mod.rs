//! Audio capture, sample exchange and spectrogram analysis

mod analysis;
mod capture;
mod exchange;
mod fft;
mod history;
mod pipeline;
mod ring;
mod sources;
mod stop;
mod synth;
mod wav;

pub use analysis::{AnalysisError, FrameConsumer};
pub use capture::{CaptureError, CaptureProducer, CaptureStats, MicrophoneSource};
pub use exchange::{ExchangeError, SampleExchange};
pub use fft::{bin_count, hamming_window, SpectralTransform};
pub use history::{HistoryError, SharedHistory, SpectrogramHistory};
pub use pipeline::{PipelineError, SpectrogramPipeline};
pub use ring::SampleRingBuffer;
pub use sources::{list_sources, AudioSource, AudioSourceInfo, SourceError};
pub use stop::StopToken;
pub use synth::{initial_phases, InitialPhase, Partial, Synthesizer};
pub use wav::{quantize, RecordingSource, WaveWriter};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Spectrogram pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramConfig {
    /// Requested sample rate in Hz (synthetic sources; live devices report their own)
    pub sample_rate: u32,

    /// Exchange capacity in samples
    pub buffer_capacity: usize,

    /// Exchange headroom that is never filled
    pub buffer_margin: usize,

    /// Samples per analysis frame
    pub frame_length: usize,

    /// Spectrogram columns kept in the rolling history
    pub history_columns: usize,

    /// Capture idle time after an empty read
    pub idle_interval_ms: u64,

    /// Renderer poll interval
    pub render_interval_ms: u64,

    /// Largest chunk a live source hands out per read
    pub max_chunk: usize,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            buffer_capacity: 64 * 1024,
            buffer_margin: 1024,
            frame_length: 1024,
            history_columns: 150,
            idle_interval_ms: 100,
            render_interval_ms: 50,
            max_chunk: 4096,
        }
    }
}

impl SpectrogramConfig {
    /// Load from a JSON file; missing fields keep their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Samples a single push or pop may request
    pub fn usable_capacity(&self) -> usize {
        self.buffer_capacity.saturating_sub(self.buffer_margin)
    }

    /// Rows in each spectrogram column
    pub fn bins(&self) -> usize {
        bin_count(self.frame_length)
    }

    /// Centre frequency of `bin` at `sample_rate`
    pub fn bin_frequency(&self, bin: usize, sample_rate: u32) -> f32 {
        bin as f32 * sample_rate as f32 / self.frame_length as f32
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.sample_rate == 0 {
            return invalid("sample_rate must be positive".into());
        }
        if self.buffer_margin == 0 || self.buffer_margin >= self.buffer_capacity {
            return invalid(format!(
                "buffer_margin must be in 1..{} (got {})",
                self.buffer_capacity, self.buffer_margin
            ));
        }
        let usable = self.usable_capacity();
        if self.frame_length < 2 || self.frame_length > usable {
            return invalid(format!(
                "frame_length must be in 2..={} (got {})",
                usable, self.frame_length
            ));
        }
        if self.max_chunk == 0 {
            return invalid("max_chunk must be positive".into());
        }
        // A full-size chunk and a pending frame must fit together, or each side
        // could end up waiting on the other.
        if self.max_chunk + self.frame_length > usable {
            return invalid(format!(
                "max_chunk + frame_length must not exceed {} (got {} + {})",
                usable, self.max_chunk, self.frame_length
            ));
        }
        if self.history_columns == 0 {
            return invalid("history_columns must be positive".into());
        }
        Ok(())
    }
}
