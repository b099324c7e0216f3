//! Capture role: drains an audio source into the sample exchange

use super::exchange::{ExchangeError, SampleExchange};
use super::sources::{device_name_from_id, AudioSource, SourceError};
use super::stop::StopToken;
use crate::state::SharedStatus;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Seconds of audio the microphone queue holds before dropping the oldest
const PENDING_SECONDS: usize = 10;

/// Capture role errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Totals reported when the capture role ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub chunks: u64,
    pub samples: u64,
    pub underruns: u64,
}

/// Pulls chunks from a source and pushes them into the exchange until stopped.
pub struct CaptureProducer<S> {
    source: S,
    exchange: Arc<SampleExchange>,
    stop: StopToken,
    idle: Duration,
    max_chunk: Option<usize>,
    status: Option<SharedStatus>,
    stats: CaptureStats,
}

impl<S: AudioSource> CaptureProducer<S> {
    pub fn new(source: S, exchange: Arc<SampleExchange>, stop: StopToken, idle: Duration) -> Self {
        Self {
            source,
            exchange,
            stop,
            idle,
            max_chunk: None,
            status: None,
            stats: CaptureStats::default(),
        }
    }

    /// Push source chunks in pieces of at most `max_chunk` samples
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = Some(max_chunk.max(1));
        self
    }

    /// Publish counters into a shared status as chunks arrive
    pub fn with_status(mut self, status: SharedStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Run until the stop token trips or the role fails.
    ///
    /// Empty reads are retried after an interruptible idle sleep. Chunks
    /// longer than the `max_chunk` bound are pushed as consecutive pieces.
    /// Source failures and pieces that can never fit end the role.
    pub fn run(mut self) -> Result<CaptureStats, CaptureError> {
        log::info!(
            "Capture started ({} Hz, idle {:?})",
            self.source.sample_rate(),
            self.idle
        );

        while !self.stop.is_stopped() {
            let chunk = self.source.next_samples()?;

            if chunk.is_empty() {
                self.stats.underruns += 1;
                self.publish(|status| status.underruns += 1);
                log::debug!("Source underrun #{}, idling", self.stats.underruns);
                self.stop.sleep(self.idle);
                continue;
            }

            let piece_len = self.max_chunk.unwrap_or(chunk.len());
            let mut shutdown = false;
            for piece in chunk.chunks(piece_len) {
                match self.exchange.push(piece) {
                    Ok(()) => {}
                    Err(ExchangeError::Shutdown) => {
                        shutdown = true;
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            if shutdown {
                break;
            }

            self.stats.chunks += 1;
            self.stats.samples += chunk.len() as u64;
            let len = chunk.len() as u64;
            self.publish(|status| {
                status.chunks_captured += 1;
                status.samples_captured += len;
            });
            log::trace!("Pushed {} samples", chunk.len());
        }

        log::info!(
            "Capture stopped after {} samples in {} chunks ({} underruns)",
            self.stats.samples,
            self.stats.chunks,
            self.stats.underruns
        );
        Ok(self.stats)
    }

    fn publish<F: FnOnce(&mut crate::state::PipelineStatus)>(&self, update: F) {
        if let Some(status) = &self.status {
            update(&mut status.lock());
        }
    }
}

/// Live input device source.
///
/// The cpal callback downmixes to mono and appends to a pending queue;
/// [`AudioSource::next_samples`] drains it. The stream is not `Send` on every
/// platform, so open this on the thread that reads it.
pub struct MicrophoneSource {
    _stream: cpal::Stream,
    pending: Arc<Mutex<PendingSamples>>,
    failure: Arc<Mutex<Option<String>>>,
    sample_rate: u32,
    max_chunk: usize,
}

struct PendingSamples {
    samples: VecDeque<f32>,
    capacity: usize,
    dropped: u64,
}

impl PendingSamples {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    fn extend(&mut self, data: &[f32]) {
        let overflow = (self.samples.len() + data.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            let from_queue = overflow.min(self.samples.len());
            self.samples.drain(..from_queue);
            self.dropped += overflow as u64;
        }
        let skip = data.len().saturating_sub(self.capacity);
        self.samples.extend(&data[skip..]);
    }

    fn drain(&mut self, max: usize) -> Vec<f32> {
        let n = max.min(self.samples.len());
        self.samples.drain(..n).collect()
    }
}

impl MicrophoneSource {
    /// Open `device_id` (an `input:<name>` id or a bare name), or the default input.
    ///
    /// Reads return at most `max_chunk` samples.
    pub fn open(device_id: Option<&str>, max_chunk: usize) -> Result<Self, SourceError> {
        if max_chunk == 0 {
            return Err(SourceError::ConfigError("max chunk must be positive".into()));
        }

        let host = cpal::default_host();
        let device = match device_id {
            Some(id) => {
                let wanted = device_name_from_id(id);
                host.input_devices()
                    .map_err(|e| SourceError::EnumerationError(e.to_string()))?
                    .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                    .ok_or_else(|| SourceError::DeviceNotFound(wanted.to_string()))?
            }
            None => host.default_input_device().ok_or(SourceError::NoInputDevice)?,
        };

        let config = device
            .default_input_config()
            .map_err(|e| SourceError::ConfigError(e.to_string()))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        log::info!(
            "Microphone {}: {} Hz, {} channels, {:?}",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate,
            channels,
            config.sample_format()
        );

        let pending = Arc::new(Mutex::new(PendingSamples::new(
            sample_rate as usize * PENDING_SECONDS,
        )));
        let failure = Arc::new(Mutex::new(None));

        let stream = match config.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(
                &device,
                &config.into(),
                pending.clone(),
                failure.clone(),
                channels,
            ),
            SampleFormat::I16 => build_stream::<i16>(
                &device,
                &config.into(),
                pending.clone(),
                failure.clone(),
                channels,
            ),
            SampleFormat::U16 => build_stream::<u16>(
                &device,
                &config.into(),
                pending.clone(),
                failure.clone(),
                channels,
            ),
            other => {
                return Err(SourceError::ConfigError(format!(
                    "Unsupported sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| SourceError::StreamError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| SourceError::PlayError(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            pending,
            failure,
            sample_rate,
            max_chunk,
        })
    }
}

impl AudioSource for MicrophoneSource {
    fn next_samples(&mut self) -> Result<Vec<f32>, SourceError> {
        if let Some(err) = self.failure.lock().take() {
            return Err(SourceError::ReadError(err));
        }

        let mut pending = self.pending.lock();
        if pending.dropped > 0 {
            log::warn!(
                "Microphone queue overflowed, dropped {} samples",
                pending.dropped
            );
            pending.dropped = 0;
        }
        Ok(pending.drain(self.max_chunk))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Build an input stream for the given sample type
fn build_stream<T: cpal::Sample + cpal::SizedSample>(
    device: &Device,
    config: &StreamConfig,
    pending: Arc<Mutex<PendingSamples>>,
    failure: Arc<Mutex<Option<String>>>,
    channels: usize,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    f32: cpal::FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono: Vec<f32> = data
                .chunks(channels.max(1))
                .map(|frame| {
                    let sum: f32 = frame
                        .iter()
                        .map(|&s| <f32 as cpal::Sample>::from_sample(s))
                        .sum();
                    (sum / frame.len() as f32).clamp(-1.0, 1.0)
                })
                .collect();

            pending.lock().extend(&mono);
        },
        move |err| {
            log::error!("Audio stream error: {}", err);
            *failure.lock() = Some(err.to_string());
        },
        None,
    )
}
