use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use realtime_specgram::audio::{
    list_sources, AudioSource, InitialPhase, MicrophoneSource, RecordingSource, SourceError,
    SpectrogramConfig, SpectrogramPipeline, Synthesizer, WaveWriter,
};
use realtime_specgram::state::RoleState;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "specgram")]
#[command(about = "Live audio spectrogram from a microphone or a synthetic source")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture audio and maintain a rolling spectrogram
    Run {
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Where samples come from
        #[arg(long, value_enum, default_value = "mic")]
        source: SourceKind,

        /// Input device id or name (default input when omitted)
        #[arg(long)]
        device: Option<String>,

        /// Starting phases of the synthetic partials
        #[arg(long, value_enum, default_value = "random")]
        phase: PhaseArg,

        /// Number of synthetic harmonics
        #[arg(long, default_value = "16")]
        harmonics: usize,

        /// Stop after this many seconds (runs until Ctrl-C when omitted)
        #[arg(long)]
        seconds: Option<u64>,

        /// Also write captured samples to this 16-bit wave file
        #[arg(long)]
        record: Option<PathBuf>,
    },

    /// List available input devices
    Devices,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceKind {
    Mic,
    Synth,
}

#[derive(Clone, Copy, ValueEnum)]
enum PhaseArg {
    Zero,
    Random,
    Schroeder,
}

impl From<PhaseArg> for InitialPhase {
    fn from(arg: PhaseArg) -> Self {
        match arg {
            PhaseArg::Zero => InitialPhase::Zero,
            PhaseArg::Random => InitialPhase::Random,
            PhaseArg::Schroeder => InitialPhase::Schroeder,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Devices => {
            let sources = list_sources()?;
            if sources.is_empty() {
                println!("No input devices found");
            }
            for source in sources {
                let marker = if source.is_default { " (default)" } else { "" };
                println!("{}  {}{}", source.id, source.name, marker);
            }
            Ok(())
        }
        Commands::Run {
            config,
            source,
            device,
            phase,
            harmonics,
            seconds,
            record,
        } => {
            let config = match config {
                Some(path) => SpectrogramConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => SpectrogramConfig::default(),
            };
            let pipeline = start_pipeline(config, source, device, phase.into(), harmonics, record)?;
            render(pipeline, seconds.map(Duration::from_secs)).await
        }
    }
}

fn start_pipeline(
    config: SpectrogramConfig,
    kind: SourceKind,
    device: Option<String>,
    phase: InitialPhase,
    harmonics: usize,
    record: Option<PathBuf>,
) -> Result<SpectrogramPipeline> {
    let max_chunk = config.max_chunk;
    let sample_rate = config.sample_rate;
    let frame_length = config.frame_length;

    let pipeline = match kind {
        SourceKind::Mic => SpectrogramPipeline::start(config, move || {
            let mic = MicrophoneSource::open(device.as_deref(), max_chunk)?;
            with_recording(mic, record)
        })?,
        SourceKind::Synth => SpectrogramPipeline::start(config, move || {
            let fundamental = Synthesizer::default_fundamental(sample_rate, frame_length);
            let synth = Synthesizer::harmonic(sample_rate, max_chunk, harmonics, fundamental, phase)?
                .paced();
            with_recording(synth, record)
        })?,
    };
    Ok(pipeline)
}

/// Wrap `source` in a wave recorder when a path was given
fn with_recording<S: AudioSource + 'static>(
    source: S,
    record: Option<PathBuf>,
) -> Result<Box<dyn AudioSource>, SourceError> {
    match record {
        None => Ok(Box::new(source)),
        Some(path) => {
            let writer = WaveWriter::create(&path, source.sample_rate(), None)
                .map_err(|e| SourceError::RecordingError(e.to_string()))?;
            log::info!("Recording to {}", path.display());
            Ok(Box::new(RecordingSource::new(source, writer)))
        }
    }
}

/// Poll the history at the render interval until Ctrl-C, the deadline or a
/// role failure.
async fn render(mut pipeline: SpectrogramPipeline, limit: Option<Duration>) -> Result<()> {
    let mut interval = tokio::time::interval(pipeline.config().render_interval());
    let deadline = tokio::time::sleep(limit.unwrap_or(Duration::ZERO));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(deadline, ctrl_c);

    let history = pipeline.history();
    let mut last_frames = 0;

    log::info!("Render loop started");

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("Interrupted");
                break;
            }
            _ = &mut deadline, if limit.is_some() => {
                log::info!("Time limit reached");
                break;
            }
            _ = interval.tick() => {
                if pipeline.is_finished() {
                    break;
                }

                let (frames, newest) = {
                    let history = history.read();
                    let newest = history.newest_index().map(|column| {
                        (history.peak_bin(column), history.envelope()[column], history.total_energy())
                    });
                    (history.frames_written(), newest)
                };
                if frames == last_frames {
                    continue;
                }
                last_frames = frames;

                if let Some((peak, energy, total)) = newest {
                    let rate = pipeline.status().sample_rate.unwrap_or(pipeline.config().sample_rate);
                    log::info!(
                        "frame {:>6}  peak {:>8.1} Hz  energy {:.4e}  history {:.4e}  buffered {}",
                        frames,
                        pipeline.config().bin_frequency(peak, rate),
                        energy,
                        total,
                        pipeline.buffered()
                    );
                }
            }
        }
    }

    let status = pipeline.stop();
    log::info!(
        "Captured {} samples ({} underruns), analyzed {} frames",
        status.samples_captured,
        status.underruns,
        status.frames_analyzed
    );

    match status.last_error {
        Some(err) if status.producer == RoleState::Failed || status.consumer == RoleState::Failed => {
            anyhow::bail!(err)
        }
        _ => Ok(()),
    }
}
