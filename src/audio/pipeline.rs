//! Coordinator owning the exchange and history and both worker threads

use super::analysis::{AnalysisError, FrameConsumer};
use super::capture::{CaptureError, CaptureProducer};
use super::exchange::{ExchangeError, SampleExchange};
use super::history::{HistoryError, SharedHistory, SpectrogramHistory};
use super::sources::{AudioSource, SourceError};
use super::stop::StopToken;
use super::{ConfigError, SpectrogramConfig};
use crate::state::{PipelineStatus, Role, RoleState, SharedStatus};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("Thread error: {0}")]
    ThreadError(String),
}

/// Running capture + analysis pipeline.
///
/// Dropping the handle stops both roles and joins their threads.
pub struct SpectrogramPipeline {
    config: SpectrogramConfig,
    stop: StopToken,
    exchange: Arc<SampleExchange>,
    history: SharedHistory,
    status: SharedStatus,
    capture_thread: Option<JoinHandle<()>>,
    analysis_thread: Option<JoinHandle<()>>,
}

impl SpectrogramPipeline {
    /// Validate `config`, then start the analysis and capture threads.
    ///
    /// `open_source` runs on the capture thread, so the source itself does
    /// not have to be `Send`.
    pub fn start<F, S>(config: SpectrogramConfig, open_source: F) -> Result<Self, PipelineError>
    where
        F: FnOnce() -> Result<S, SourceError> + Send + 'static,
        S: AudioSource + 'static,
    {
        config.validate()?;

        let stop = StopToken::new();
        let exchange = SampleExchange::new(config.buffer_capacity, config.buffer_margin, stop.clone())?;
        let history = SpectrogramHistory::new(config.bins(), config.history_columns)?.shared();
        let status = PipelineStatus::shared();

        let consumer = FrameConsumer::new(
            exchange.clone(),
            history.clone(),
            config.frame_length,
            stop.clone(),
        )
        .with_status(status.clone());

        let analysis_thread = spawn_role(
            "spectrogram-analysis",
            Role::Analysis,
            status.clone(),
            stop.clone(),
            move || consumer.run().map(|_| ()).map_err(PipelineError::from),
        )?;

        let capture_thread = {
            let exchange = exchange.clone();
            let capture_stop = stop.clone();
            let capture_status = status.clone();
            let idle = config.idle_interval();
            let max_chunk = config.max_chunk;
            spawn_role(
                "audio-capture",
                Role::Capture,
                status.clone(),
                stop.clone(),
                move || {
                    let source = open_source()?;
                    capture_status.lock().sample_rate = Some(source.sample_rate());
                    CaptureProducer::new(source, exchange, capture_stop, idle)
                        .with_max_chunk(max_chunk)
                        .with_status(capture_status)
                        .run()?;
                    Ok(())
                },
            )
        };

        let capture_thread = match capture_thread {
            Ok(handle) => handle,
            Err(e) => {
                stop.stop();
                let _ = analysis_thread.join();
                return Err(e);
            }
        };

        log::info!(
            "Pipeline started: {} sample exchange ({} margin), {} sample frames, {} columns",
            config.buffer_capacity,
            config.buffer_margin,
            config.frame_length,
            config.history_columns
        );

        Ok(Self {
            config,
            stop,
            exchange,
            history,
            status,
            capture_thread: Some(capture_thread),
            analysis_thread: Some(analysis_thread),
        })
    }

    pub fn config(&self) -> &SpectrogramConfig {
        &self.config
    }

    /// Shared history for renderers
    pub fn history(&self) -> SharedHistory {
        self.history.clone()
    }

    /// Snapshot of role states, counters and the last error
    pub fn status(&self) -> PipelineStatus {
        self.status.lock().clone()
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Samples waiting in the exchange
    pub fn buffered(&self) -> usize {
        self.exchange.available()
    }

    /// Both roles have exited
    pub fn is_finished(&self) -> bool {
        let done = |handle: &Option<JoinHandle<()>>| handle.as_ref().map_or(true, |h| h.is_finished());
        done(&self.capture_thread) && done(&self.analysis_thread)
    }

    /// Stop both roles, join them and return the final status
    pub fn stop(&mut self) -> PipelineStatus {
        self.stop.stop();

        for handle in [self.capture_thread.take(), self.analysis_thread.take()]
            .into_iter()
            .flatten()
        {
            if handle.join().is_err() {
                log::error!("Pipeline worker panicked");
            }
        }

        self.status()
    }
}

impl Drop for SpectrogramPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn a worker role that records its outcome in `status`.
///
/// A failing role trips `stop` so its partner does not wait forever.
fn spawn_role<F>(
    name: &str,
    role: Role,
    status: SharedStatus,
    stop: StopToken,
    body: F,
) -> Result<JoinHandle<()>, PipelineError>
where
    F: FnOnce() -> Result<(), PipelineError> + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            status.lock().set_role(role, RoleState::Running);
            match body() {
                Ok(()) => status.lock().set_role(role, RoleState::Stopped),
                Err(e) => {
                    log::error!("{} role failed: {}", role, e);
                    status.lock().record_failure(role, e.to_string());
                    stop.stop();
                }
            }
        })
        .map_err(|e| PipelineError::ThreadError(e.to_string()))
}
