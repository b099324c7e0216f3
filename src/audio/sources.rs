//! Audio source contract and input device enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pull-based supplier of mono samples in `[-1, 1]`.
///
/// An empty `Ok` read means nothing is ready yet; it is not an error.
pub trait AudioSource {
    fn next_samples(&mut self) -> Result<Vec<f32>, SourceError>;

    fn sample_rate(&self) -> u32;
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn next_samples(&mut self) -> Result<Vec<f32>, SourceError> {
        (**self).next_samples()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }
}

/// Audio source errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("No input device found")]
    NoInputDevice,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to enumerate devices: {0}")]
    EnumerationError(String),

    #[error("Invalid source configuration: {0}")]
    ConfigError(String),

    #[error("Failed to build audio stream: {0}")]
    StreamError(String),

    #[error("Failed to start stream: {0}")]
    PlayError(String),

    #[error("Source read failed: {0}")]
    ReadError(String),

    #[error("Recording failed: {0}")]
    RecordingError(String),
}

/// Input device information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSourceInfo {
    /// Identifier accepted by the microphone source
    pub id: String,

    /// Display name
    pub name: String,

    /// Whether this is the host's default input
    pub is_default: bool,
}

/// List available input devices
pub fn list_sources() -> Result<Vec<AudioSourceInfo>, SourceError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| SourceError::EnumerationError(e.to_string()))?;

    let mut sources = Vec::new();
    for device in devices {
        match device.name() {
            Ok(name) => {
                let is_default = default_name.as_deref() == Some(name.as_str());
                sources.push(AudioSourceInfo {
                    id: format!("input:{}", name),
                    name,
                    is_default,
                });
            }
            Err(e) => {
                log::warn!("Skipping input device without a name: {}", e);
            }
        }
    }

    // Default device first, then by name
    sources.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    Ok(sources)
}

/// Strip the `input:` prefix used by [`AudioSourceInfo::id`]
pub fn device_name_from_id(id: &str) -> &str {
    id.strip_prefix("input:").unwrap_or(id)
}
