//! 16-bit mono wave persistence for captured samples

use super::sources::{AudioSource, SourceError};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Quantize a `[-1, 1]` sample to 16-bit PCM
pub fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Writes mono 16-bit samples, optionally closing itself after `limit` samples.
pub struct WaveWriter {
    writer: Option<WavWriter<BufWriter<File>>>,
    limit: Option<u64>,
    written: u64,
}

impl WaveWriter {
    pub fn create<P: AsRef<Path>>(
        path: P,
        sample_rate: u32,
        limit: Option<u64>,
    ) -> Result<Self, hound::Error> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)?;

        Ok(Self {
            writer: Some(writer),
            limit,
            written: 0,
        })
    }

    /// Still accepting samples
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append `samples`. Returns `false` once the limit has closed the file.
    pub fn write(&mut self, samples: &[f32]) -> Result<bool, hound::Error> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(false);
        };

        let room = match self.limit {
            Some(limit) => (limit - self.written).min(samples.len() as u64) as usize,
            None => samples.len(),
        };
        for &sample in &samples[..room] {
            writer.write_sample(quantize(sample))?;
        }
        self.written += room as u64;

        if self.limit.is_some_and(|limit| self.written >= limit) {
            self.finalize()?;
        }
        Ok(true)
    }

    /// Flush the header and close the file. Idempotent.
    pub fn finalize(&mut self) -> Result<(), hound::Error> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            log::info!("Wave file finalized with {} samples", self.written);
        }
        Ok(())
    }
}

impl Drop for WaveWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            log::error!("Failed to finalize wave file: {}", e);
        }
    }
}

/// Source adapter that records every chunk it hands out
pub struct RecordingSource<S> {
    inner: S,
    writer: WaveWriter,
}

impl<S: AudioSource> RecordingSource<S> {
    pub fn new(inner: S, writer: WaveWriter) -> Self {
        Self { inner, writer }
    }

    pub fn into_parts(self) -> (S, WaveWriter) {
        (self.inner, self.writer)
    }
}

impl<S: AudioSource> AudioSource for RecordingSource<S> {
    fn next_samples(&mut self) -> Result<Vec<f32>, SourceError> {
        let chunk = self.inner.next_samples()?;
        if !chunk.is_empty() && self.writer.is_open() {
            self.writer
                .write(&chunk)
                .map_err(|e| SourceError::RecordingError(e.to_string()))?;
        }
        Ok(chunk)
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_wav(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("specgram-{}-{}.wav", name, std::process::id()))
    }

    fn read_back(path: &Path) -> (WavSpec, Vec<i16>) {
        let mut reader = hound::WavReader::open(path).unwrap();
        let spec = reader.spec();
        let samples = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        (spec, samples)
    }

    struct Constant(f32);

    impl AudioSource for Constant {
        fn next_samples(&mut self) -> Result<Vec<f32>, SourceError> {
            Ok(vec![self.0; 3])
        }

        fn sample_rate(&self) -> u32 {
            16000
        }
    }

    #[test]
    fn quantize_clamps_and_scales() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), i16::MAX);
        assert_eq!(quantize(-1.0), -i16::MAX);
        assert_eq!(quantize(2.5), i16::MAX);
        assert_eq!(quantize(-3.0), -i16::MAX);
        assert_eq!(quantize(0.5), 16383);
    }

    #[test]
    fn writes_mono_16_bit_file() {
        let path = temp_wav("mono");
        let mut writer = WaveWriter::create(&path, 22050, None).unwrap();
        assert!(writer.write(&[0.0, 0.5, -0.5, 1.0]).unwrap());
        writer.finalize().unwrap();

        let (spec, samples) = read_back(&path);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 22050);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(samples, vec![0, 16383, -16383, i16::MAX]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn limit_closes_the_file() {
        let path = temp_wav("limit");
        let mut writer = WaveWriter::create(&path, 8000, Some(5)).unwrap();

        assert!(writer.write(&[0.1; 3]).unwrap());
        assert!(writer.write(&[0.2; 3]).unwrap());
        assert!(!writer.is_open());
        assert!(!writer.write(&[0.3; 3]).unwrap());
        assert_eq!(writer.written(), 5);

        let (_, samples) = read_back(&path);
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[4], quantize(0.2));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn recording_source_tees_chunks() {
        let path = temp_wav("tee");
        let writer = WaveWriter::create(&path, 16000, None).unwrap();
        let mut source = RecordingSource::new(Constant(0.25), writer);

        assert_eq!(source.sample_rate(), 16000);
        assert_eq!(source.next_samples().unwrap(), vec![0.25; 3]);
        assert_eq!(source.next_samples().unwrap(), vec![0.25; 3]);

        let (_, mut writer) = source.into_parts();
        writer.finalize().unwrap();

        let (_, samples) = read_back(&path);
        assert_eq!(samples, vec![quantize(0.25); 6]);
        std::fs::remove_file(&path).ok();
    }
}
