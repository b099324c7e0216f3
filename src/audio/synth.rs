//! Deterministic multi-harmonic test source

use super::sources::{AudioSource, SourceError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::time::Instant;

/// Seed for [`InitialPhase::Random`], fixed so runs are reproducible
const RANDOM_PHASE_SEED: u64 = 0xabe;

/// Starting phase construction for the partials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InitialPhase {
    /// Every partial starts at zero (maximal peak)
    Zero,
    /// Uniform in `[0, 2pi)` from a fixed seed
    #[default]
    Random,
    /// Schroeder's low-crest-factor phases
    Schroeder,
}

/// One cosine component
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Partial {
    pub frequency: f32,
    pub amplitude: f32,
}

/// Additive cosine synthesizer exposed as an [`AudioSource`].
pub struct Synthesizer {
    sample_rate: u32,
    chunk_length: usize,
    partials: Vec<Partial>,
    phases: Vec<f64>,
    increments: Vec<f64>,
    pacing: Option<Pacing>,
}

/// Wall-clock throttle so reads behave like a live device
struct Pacing {
    started: Option<Instant>,
    emitted: u64,
}

impl Synthesizer {
    pub fn new(
        sample_rate: u32,
        chunk_length: usize,
        partials: Vec<Partial>,
        initial: InitialPhase,
    ) -> Result<Self, SourceError> {
        if sample_rate == 0 {
            return Err(SourceError::ConfigError("sample rate must be positive".into()));
        }
        if chunk_length == 0 {
            return Err(SourceError::ConfigError("chunk length must be positive".into()));
        }
        if partials.is_empty() {
            return Err(SourceError::ConfigError("at least one partial is required".into()));
        }

        let phases = initial_phases(&partials, initial);
        let increments = partials
            .iter()
            .map(|p| TAU * p.frequency as f64 / sample_rate as f64)
            .collect();

        Ok(Self {
            sample_rate,
            chunk_length,
            partials,
            phases,
            increments,
            pacing: None,
        })
    }

    /// `count` equal-amplitude harmonics of `fundamental`, summing to unit peak
    pub fn harmonic(
        sample_rate: u32,
        chunk_length: usize,
        count: usize,
        fundamental: f32,
        initial: InitialPhase,
    ) -> Result<Self, SourceError> {
        let amplitude = 1.0 / count.max(1) as f32;
        let partials = (1..=count)
            .map(|k| Partial {
                frequency: fundamental * k as f32,
                amplitude,
            })
            .collect();
        Self::new(sample_rate, chunk_length, partials, initial)
    }

    /// Half the bin spacing of a `chunk_length` frame.
    ///
    /// Even harmonics land on bin centres; odd ones fall midway between bins.
    pub fn default_fundamental(sample_rate: u32, chunk_length: usize) -> f32 {
        sample_rate as f32 / 2.0 / chunk_length as f32
    }

    /// Only hand out a chunk once real time has covered it
    pub fn paced(mut self) -> Self {
        self.pacing = Some(Pacing {
            started: None,
            emitted: 0,
        });
        self
    }

    pub fn chunk_length(&self) -> usize {
        self.chunk_length
    }

    pub fn partials(&self) -> &[Partial] {
        &self.partials
    }

    /// Fill `out` with the next samples
    pub fn render(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            let mut acc = 0.0f64;
            for ((partial, phase), step) in self
                .partials
                .iter()
                .zip(self.phases.iter_mut())
                .zip(&self.increments)
            {
                acc += partial.amplitude as f64 * phase.cos();
                *phase = (*phase + step).rem_euclid(TAU);
            }
            *sample = acc as f32;
        }
    }

    fn chunk_due(&mut self) -> bool {
        let sample_rate = self.sample_rate as f64;
        let chunk = self.chunk_length as u64;
        match self.pacing.as_mut() {
            None => true,
            Some(pacing) => {
                let started = *pacing.started.get_or_insert_with(Instant::now);
                let budget = (started.elapsed().as_secs_f64() * sample_rate) as u64;
                if pacing.emitted + chunk <= budget {
                    pacing.emitted += chunk;
                    true
                } else {
                    false
                }
            }
        }
    }
}

impl AudioSource for Synthesizer {
    fn next_samples(&mut self) -> Result<Vec<f32>, SourceError> {
        if !self.chunk_due() {
            return Ok(Vec::new());
        }
        let mut chunk = vec![0.0; self.chunk_length];
        self.render(&mut chunk);
        Ok(chunk)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Starting phase (radians) of every partial
pub fn initial_phases(partials: &[Partial], kind: InitialPhase) -> Vec<f64> {
    match kind {
        InitialPhase::Zero => vec![0.0; partials.len()],
        InitialPhase::Random => {
            let mut rng = StdRng::seed_from_u64(RANDOM_PHASE_SEED);
            partials.iter().map(|_| rng.random::<f64>() * TAU).collect()
        }
        InitialPhase::Schroeder => {
            // phi_i = -2pi * sum_{l<i} (i - l) * p_l, p_l = relative power of partial l
            let powers: Vec<f64> = partials
                .iter()
                .map(|p| (p.amplitude as f64).powi(2))
                .collect();
            let total: f64 = powers.iter().sum();
            if total <= 0.0 {
                return vec![0.0; partials.len()];
            }
            (0..partials.len())
                .map(|i| {
                    let weighted: f64 = powers[..i]
                        .iter()
                        .enumerate()
                        .map(|(l, p)| (i - l) as f64 * p / total)
                        .sum();
                    (-TAU * weighted).rem_euclid(TAU)
                })
                .collect()
        }
    }
}
