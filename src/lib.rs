//! Real-time audio spectrogram core
//!
//! A capture thread pulls chunks from an audio source into a bounded sample
//! exchange; an analysis thread pops fixed-length frames, transforms them and
//! appends power-spectrum columns to a rolling history that renderers read.

pub mod audio;
pub mod state;

pub use audio::{SpectrogramConfig, SpectrogramPipeline};
pub use state::{PipelineStatus, RoleState};
