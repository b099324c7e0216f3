//! Windowed one-sided power spectrum for spectrogram columns

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Symmetric Hamming window of `length` samples
pub fn hamming_window(length: usize) -> Vec<f32> {
    if length < 2 {
        return vec![1.0; length];
    }
    let denom = (length - 1) as f32;
    (0..length)
        .map(|i| 0.54 - 0.46 * (2.0 * std::f32::consts::PI * i as f32 / denom).cos())
        .collect()
}

/// Number of non-negative frequency bins for a frame of `frame_length`
pub fn bin_count(frame_length: usize) -> usize {
    frame_length / 2 + 1
}

/// Frame-to-column transform used by the analysis role.
///
/// Each frame is multiplied by a fixed Hamming window, transformed, and reduced
/// to `frame_length / 2 + 1` squared magnitudes normalised by the window power.
/// Bins with a negative-frequency twin are doubled so the column carries the
/// full two-sided energy.
///
/// No sample-rate scaling is applied, so values are a density per unit of
/// normalised frequency: twice a PSD taken with a nominal rate of 2.
pub struct SpectralTransform {
    frame_length: usize,
    window: Vec<f32>,
    window_power: f32,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
}

impl SpectralTransform {
    pub fn new(frame_length: usize) -> Self {
        let window = hamming_window(frame_length);
        let window_power = window.iter().map(|w| w * w).sum::<f32>().max(f32::EPSILON);
        let fft = FftPlanner::new().plan_fft_forward(frame_length);

        Self {
            frame_length,
            window,
            window_power,
            fft,
            buffer: vec![Complex::new(0.0, 0.0); frame_length],
        }
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    pub fn bins(&self) -> usize {
        bin_count(self.frame_length)
    }

    /// Transform one frame into a freshly allocated column
    pub fn process(&mut self, frame: &[f32]) -> Vec<f32> {
        let mut column = vec![0.0; self.bins()];
        self.process_into(frame, &mut column);
        column
    }

    /// Transform one frame into `column`.
    ///
    /// `frame` must hold `frame_length` samples and `column` `bins()` values.
    pub fn process_into(&mut self, frame: &[f32], column: &mut [f32]) {
        debug_assert_eq!(frame.len(), self.frame_length);
        debug_assert_eq!(column.len(), self.bins());

        for ((slot, &s), &w) in self.buffer.iter_mut().zip(frame).zip(&self.window) {
            *slot = Complex::new(s * w, 0.0);
        }

        self.fft.process(&mut self.buffer);

        let nyquist = if self.frame_length % 2 == 0 {
            Some(self.frame_length / 2)
        } else {
            None
        };

        for (k, (out, c)) in column.iter_mut().zip(&self.buffer).enumerate() {
            let power = c.norm_sqr() / self.window_power;
            let folded = k != 0 && Some(k) != nyquist;
            *out = if folded { 2.0 * power } else { power };
        }
    }
}
