//! Analysis role: folds fixed-length frames into the spectrogram history

use super::exchange::{ExchangeError, SampleExchange};
use super::fft::SpectralTransform;
use super::history::{HistoryError, SharedHistory};
use super::stop::StopToken;
use crate::state::SharedStatus;
use std::sync::Arc;
use thiserror::Error;

/// Analysis role errors
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Pops non-overlapping frames, transforms them and appends history columns.
pub struct FrameConsumer {
    exchange: Arc<SampleExchange>,
    history: SharedHistory,
    transform: SpectralTransform,
    stop: StopToken,
    status: Option<SharedStatus>,
}

impl FrameConsumer {
    pub fn new(
        exchange: Arc<SampleExchange>,
        history: SharedHistory,
        frame_length: usize,
        stop: StopToken,
    ) -> Self {
        Self {
            exchange,
            history,
            transform: SpectralTransform::new(frame_length),
            stop,
            status: None,
        }
    }

    pub fn with_status(mut self, status: SharedStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Run until the stop token trips. Returns the number of columns written.
    pub fn run(mut self) -> Result<u64, AnalysisError> {
        let mut frame = vec![0.0; self.transform.frame_length()];
        let mut column = vec![0.0; self.transform.bins()];
        let mut frames = 0u64;

        log::info!(
            "Analysis started ({} sample frames, {} bins)",
            frame.len(),
            column.len()
        );

        loop {
            match self.exchange.pop_into(&mut frame) {
                Ok(()) => {}
                Err(ExchangeError::Shutdown) => break,
                Err(e) => return Err(e.into()),
            }

            self.transform.process_into(&frame, &mut column);

            // A frame that raced the stop is dropped, never half-applied.
            if self.stop.is_stopped() {
                break;
            }
            let index = self.history.write().write_column(&column)?;

            frames += 1;
            if let Some(status) = &self.status {
                status.lock().frames_analyzed += 1;
            }
            log::trace!("Wrote column {}", index);
        }

        log::info!("Analysis stopped after {} frames", frames);
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::history::SpectrogramHistory;
    use crate::state::PipelineStatus;
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_for_frames(status: &SharedStatus, frames: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while status.lock().frames_analyzed < frames {
            assert!(Instant::now() < deadline, "timed out waiting for frames");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn frames_become_columns_in_order() {
        let stop = StopToken::new();
        let exchange = SampleExchange::new(256, 8, stop.clone()).unwrap();
        let history = SpectrogramHistory::new(9, 4).unwrap().shared();
        let status = PipelineStatus::shared();

        let consumer = {
            let consumer = FrameConsumer::new(exchange.clone(), history.clone(), 16, stop.clone())
                .with_status(status.clone());
            thread::spawn(move || consumer.run())
        };

        // Silence, then a constant frame: only the second column has energy.
        exchange.push(&[0.0; 16]).unwrap();
        exchange.push(&[1.0; 16]).unwrap();
        wait_for_frames(&status, 2);

        stop.stop();
        assert_eq!(consumer.join().unwrap().unwrap(), 2);

        let history = history.read();
        assert_eq!(history.frames_written(), 2);
        assert_eq!(history.cursor(), 2);
        assert_eq!(history.envelope()[0], 0.0);
        assert!(history.envelope()[1] > 0.0);
        assert_eq!(history.peak_bin(1), 0);
    }

    #[test]
    fn history_wraps_while_envelope_stays_consistent() {
        let stop = StopToken::new();
        let exchange = SampleExchange::new(256, 8, stop.clone()).unwrap();
        let history = SpectrogramHistory::new(5, 3).unwrap().shared();
        let status = PipelineStatus::shared();

        let consumer = {
            let consumer = FrameConsumer::new(exchange.clone(), history.clone(), 8, stop.clone())
                .with_status(status.clone());
            thread::spawn(move || consumer.run())
        };

        for level in 1..=7 {
            exchange.push(&[level as f32 * 0.1; 8]).unwrap();
        }
        wait_for_frames(&status, 7);
        stop.stop();
        consumer.join().unwrap().unwrap();

        let history = history.read();
        assert_eq!(history.cursor(), 7 % 3);
        for j in 0..3 {
            let sum: f32 = history.column(j).iter().sum();
            assert_eq!(history.envelope()[j], sum);
        }
        // Newest column holds the loudest frame.
        let newest = history.newest_index().unwrap();
        let loudest = history
            .envelope()
            .iter()
            .cloned()
            .fold(f32::MIN, f32::max);
        assert_eq!(history.envelope()[newest], loudest);
    }

    #[test]
    fn stop_releases_consumer_waiting_for_data() {
        let stop = StopToken::new();
        let exchange = SampleExchange::new(64, 8, stop.clone()).unwrap();
        let history = SpectrogramHistory::new(9, 4).unwrap().shared();

        exchange.push(&[0.5; 10]).unwrap();
        let consumer = {
            let consumer = FrameConsumer::new(exchange, history.clone(), 16, stop.clone());
            thread::spawn(move || consumer.run())
        };

        thread::sleep(Duration::from_millis(30));
        let start = Instant::now();
        stop.stop();

        assert_eq!(consumer.join().unwrap().unwrap(), 0);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(history.read().frames_written(), 0);
    }

    #[test]
    fn oversized_frame_is_a_configuration_error() {
        let stop = StopToken::new();
        let exchange = SampleExchange::new(32, 8, stop.clone()).unwrap();
        let history = SpectrogramHistory::new(17, 4).unwrap().shared();

        let result = FrameConsumer::new(exchange, history, 32, stop).run();

        assert!(matches!(
            result,
            Err(AnalysisError::Exchange(ExchangeError::Oversized { .. }))
        ));
    }

    #[test]
    fn mismatched_history_shape_is_reported() {
        let stop = StopToken::new();
        let exchange = SampleExchange::new(64, 8, stop.clone()).unwrap();
        let history = SpectrogramHistory::new(4, 4).unwrap().shared();
        exchange.push(&[0.0; 16]).unwrap();

        let result = FrameConsumer::new(exchange, history, 16, stop).run();

        assert!(matches!(
            result,
            Err(AnalysisError::History(HistoryError::ColumnLength {
                expected: 4,
                actual: 9
            }))
        ));
    }
}
