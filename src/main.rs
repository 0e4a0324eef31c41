use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use asr_stream_client::asr::{LogSink, Protocol, ProtocolSession, RunLimits, RunReport, WsConnector};
use asr_stream_client::audio::{
    AudioSource, CaptureBackend, CaptureSettings, CpalBackend, FileSource, LiveSource,
};
use asr_stream_client::data::AppConfig;
use asr_stream_client::error::AsrError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Continuous audio with incremental per-segment results
    Streaming,
    /// Start/stop bracketed submission with one final result
    Oneshot,
}

impl From<Mode> for Protocol {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Streaming => Protocol::Streaming,
            Mode::Oneshot => Protocol::Oneshot,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "asr-client")]
#[command(about = "Stream audio to a speech recognition server over WebSocket")]
#[command(long_about = "
Stream audio to a speech recognition server over WebSocket.

EXAMPLES:
  # Stream a file to the realtime endpoint
  asr-client --file speech.wav

  # One finalized result for a file
  asr-client --mode oneshot --file speech.flac

  # Stream the microphone for 30 seconds
  asr-client --mic --duration 30

  # Show capture devices and their priority scores
  asr-client --list-devices
")]
#[command(group(ArgGroup::new("input").args(["file", "mic"])))]
struct Cli {
    /// WebSocket endpoint of the recognition server
    #[arg(long)]
    server: Option<String>,

    /// Sample rate sent to the server
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Interaction protocol
    #[arg(long, value_enum, default_value_t = Mode::Streaming)]
    mode: Mode,

    /// Audio file to send (WAV, FLAC, MP3, OGG, ...)
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Capture from the microphone
    #[arg(long)]
    mic: bool,

    /// Capture duration in seconds (microphone only)
    #[arg(long, value_name = "SECS", conflicts_with = "file")]
    duration: Option<f64>,

    /// Configuration file (default: config.toml beside the executable)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config =
        AppConfig::load_or_default(cli.config.as_deref()).context("loading configuration")?;
    if let Some(server) = &cli.server {
        config.server.url = server.clone();
    }
    if let Some(sample_rate) = cli.sample_rate {
        config.server.sample_rate = sample_rate;
    }

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }
    if cli.list_devices {
        return list_devices(&config);
    }

    if config.server.sample_rate == 0 {
        bail!("sample rate must be positive");
    }
    let duration = match cli.duration {
        Some(secs) if !secs.is_finite() || secs <= 0.0 => {
            bail!("duration must be a positive number of seconds")
        }
        Some(secs) => Some(Duration::from_secs_f64(secs)),
        None => None,
    };

    let protocol = Protocol::from(cli.mode);
    let sample_rate = config.server.sample_rate;

    let mut source: Box<dyn AudioSource> = if let Some(path) = &cli.file {
        let source = FileSource::open(
            path,
            sample_rate,
            config.chunk_duration(protocol),
            config.resampler(),
        )
        .with_context(|| format!("loading audio from {}", path.display()))?;
        Box::new(source)
    } else if cli.mic {
        let settings = CaptureSettings {
            target_rate: sample_rate,
            channels: asr_stream_client::asr::CHANNELS,
            chunk_size: config.capture.chunk_size,
            policy: config.device_policy(),
            resampler: config.resampler(),
        };
        let source = LiveSource::start(CpalBackend::new, settings)
            .await
            .context("opening microphone")?;
        Box::new(source)
    } else {
        bail!("one of --file or --mic is required");
    };

    let duration = match (cli.mic, duration, protocol) {
        (false, _, _) => None,
        (true, Some(duration), _) => Some(duration),
        (true, None, Protocol::Oneshot) => {
            Some(Duration::from_secs(config.oneshot.mic_duration_secs))
        }
        (true, None, Protocol::Streaming) => None,
    };
    if cli.mic {
        match duration {
            Some(duration) => tracing::info!("Recording for {:.1}s", duration.as_secs_f64()),
            None => tracing::info!("Recording until Ctrl-C"),
        }
    }

    let interrupt = CancellationToken::new();
    let abort = CancellationToken::new();
    tokio::spawn(watch_ctrl_c(interrupt.clone(), abort.clone()));

    let mut session = ProtocolSession::new(WsConnector, config.server.url.clone(), sample_rate, protocol)
        .with_timing(config.session_timing(protocol));

    let outcome = session
        .run(
            source.as_mut(),
            Arc::new(LogSink),
            RunLimits {
                duration,
                interrupt,
                abort,
            },
        )
        .await;
    let report = match outcome {
        Ok(report) => report,
        Err(AsrError::Interrupted(stage)) => {
            tracing::info!("Stopped while {}", stage);
            return Ok(());
        }
        Err(e) => return Err(e).context("running recognition session"),
    };

    print_summary(&report);
    Ok(())
}

/// First Ctrl-C stops sending, the second skips the remaining wait
async fn watch_ctrl_c(interrupt: CancellationToken, abort: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    tracing::info!("Ctrl-C received, stopping (press again to quit immediately)");
    interrupt.cancel();

    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    tracing::warn!("Ctrl-C received again, aborting");
    abort.cancel();
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "info,asr_stream_client=debug,asr_client=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}

fn list_devices(config: &AppConfig) -> Result<()> {
    let backend = CpalBackend::new().context("enumerating audio devices")?;
    let devices = backend.input_devices()?;
    let policy = config.device_policy();

    if devices.is_empty() {
        println!("No input devices found");
        return Ok(());
    }

    println!("Input devices:");
    for device in &devices {
        println!(
            "  [{}] {} (channels: {}, default rate: {}Hz, score: {}){}",
            device.index,
            device.name,
            device.max_input_channels,
            device.default_sample_rate,
            policy.score(device),
            if device.is_default { " [default]" } else { "" }
        );
    }
    if let Some(preferred) = policy.select(&devices) {
        println!("Preferred: {}", preferred.name);
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    tracing::info!(
        "Summary ({} session {}): {} audio packets sent, {} events received{}",
        report.protocol,
        &report.session_id[..8],
        report.packets_sent,
        report.events_received,
        if report.interrupted { ", interrupted" } else { "" }
    );

    let transcript = report.transcript();
    if transcript.is_empty() {
        tracing::info!("No final transcript");
    } else {
        tracing::info!("Transcript: {}", transcript);
    }

    if let Some(failure) = &report.failure {
        tracing::warn!("Session ended early: {}", failure);
    }
}
