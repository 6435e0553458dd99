//! voxshift: voice conversion from the command line
//!
//! Usage:
//!   voxshift convert <input> <output> --preset male_to_female
//!   voxshift convert <input> <output> --profile deep_male --pitch-shift -2
//!   voxshift profiles
//!
//! Exit codes: 0 success, 1 failure, 130 interrupted.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, warn};
use serde::Deserialize;
use vx_core::CancelToken;
use vx_offline::{
    ConversionOptions, ConversionRequest, ConverterConfig, ExecutionBackend, ParallelMode,
    VERSION, VoiceConverter, run_worker_task,
};
use vx_vocoder::F0Strategy;
use vx_voice::{VoiceProfileStore, VoiceSelector};

const EXIT_FAILURE: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "voxshift", version = VERSION, about = "Offline voice identity conversion")]
struct Cli {
    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Log per-chunk detail
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a recording to a target voice
    Convert(ConvertArgs),
    /// List voice profiles and presets
    Profiles,
    /// Run one chunk task (spawned by `convert`)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        task: PathBuf,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// One worker process per chunk
    Process,
    /// In-process thread pool
    Thread,
}

#[derive(clap::Args)]
struct ConvertArgs {
    /// Input audio or video file
    input: PathBuf,

    /// Output WAV file
    output: PathBuf,

    /// Target voice profile
    #[arg(long, conflicts_with = "preset")]
    profile: Option<String>,

    /// Conversion preset (e.g. male_to_female)
    #[arg(long)]
    preset: Option<String>,

    /// Extra pitch shift in semitones
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pitch_shift: f64,

    /// Pitch tracker: robust, fast or fast-refined
    #[arg(long, default_value = "robust")]
    f0: String,

    /// Use a precomputed F0 contour (JSON: frame_period_ms, contour)
    /// instead of tracking pitch
    #[arg(long, conflicts_with = "f0")]
    f0_contour: Option<PathBuf>,

    /// Keep music and ambience under the converted voice
    #[arg(long)]
    preserve_background: bool,

    /// Vocal stem gain after separation (dB)
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    vocals_gain: f64,

    /// Background stem gain after separation (dB)
    #[arg(long, default_value_t = -3.0, allow_negative_numbers = true)]
    background_gain: f64,

    /// Always split into chunks
    #[arg(long, conflicts_with = "no_parallel")]
    parallel: bool,

    /// Never split into chunks
    #[arg(long)]
    no_parallel: bool,

    /// Target chunk length in minutes
    #[arg(long, default_value_t = 5.0)]
    chunk_minutes: f64,

    /// Worker count (default: CPU cores)
    #[arg(long)]
    workers: Option<usize>,

    /// Where chunks run
    #[arg(long, value_enum, default_value_t = Backend::Process)]
    backend: Backend,

    /// 16-bit output, no prosody transfer
    #[arg(long)]
    no_quality: bool,

    /// Converter configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let outcome = match cli.command {
        Commands::Convert(args) => convert(args),
        Commands::Profiles => list_profiles().map(|()| ExitCode::SUCCESS),
        Commands::Worker { task } => worker(&task),
    };

    outcome.unwrap_or_else(|e| {
        error!("{e:#}");
        ExitCode::from(EXIT_FAILURE)
    })
}

fn init_logging(cli: &Cli) {
    let default_level = if matches!(cli.command, Commands::Worker { .. }) || cli.quiet {
        "warn"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

/// Trip `cancel` on Ctrl-C. Runs a single-threaded runtime on its own
/// thread so the conversion itself stays synchronous.
fn install_interrupt_handler(cancel: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start signal runtime")?;

    std::thread::Builder::new()
        .name("vx-signal".into())
        .spawn(move || {
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping workers");
                    cancel.cancel();
                }
            });
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

/// F0 contour file: Hz per frame, 0 for unvoiced frames
#[derive(Deserialize)]
struct ContourFile {
    frame_period_ms: f64,
    contour: Vec<f64>,
}

fn load_contour(path: &std::path::Path) -> Result<F0Strategy> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read F0 contour {}", path.display()))?;
    let file: ContourFile = serde_json::from_str(&text)
        .with_context(|| format!("invalid F0 contour {}", path.display()))?;
    Ok(F0Strategy::Override {
        contour: file.contour,
        frame_period_ms: file.frame_period_ms,
    })
}

fn build_request(args: &ConvertArgs) -> Result<ConversionRequest> {
    let voice = match (&args.profile, &args.preset) {
        (Some(profile), None) => VoiceSelector::Profile(profile.clone()),
        (None, Some(preset)) => VoiceSelector::Preset(preset.clone()),
        (None, None) => VoiceSelector::default(),
        (Some(_), Some(_)) => bail!("--profile and --preset are mutually exclusive"),
    };

    let parallel = if args.parallel {
        ParallelMode::On
    } else if args.no_parallel {
        ParallelMode::Off
    } else {
        ParallelMode::Auto
    };

    let f0_strategy = match &args.f0_contour {
        Some(path) => load_contour(path)?,
        None => args.f0.parse()?,
    };
    let options = ConversionOptions {
        extra_pitch_shift_semitones: args.pitch_shift,
        f0_strategy,
        preserve_quality: !args.no_quality,
        preserve_background: args.preserve_background,
        vocals_gain_db: args.vocals_gain,
        background_gain_db: args.background_gain,
        parallel,
        chunk_duration_minutes: args.chunk_minutes,
        worker_count: args.workers,
        preserve_prosody: None,
    };

    Ok(ConversionRequest::builder()
        .input(&args.input)
        .output(&args.output)
        .voice(voice)
        .options(options)
        .build()?)
}

fn convert(args: ConvertArgs) -> Result<ExitCode> {
    let config = match &args.config {
        Some(path) => ConverterConfig::from_json_file(path)?,
        None => ConverterConfig::default(),
    };
    let request = build_request(&args)?;

    let backend = match args.backend {
        Backend::Thread => ExecutionBackend::Threads,
        Backend::Process => ExecutionBackend::Processes {
            worker_exe: std::env::current_exe().context("cannot locate own executable")?,
        },
    };

    let cancel = CancelToken::new();
    install_interrupt_handler(cancel.clone())?;

    let converter = VoiceConverter::with_config(config)
        .with_backend(backend)
        .with_cancel_token(cancel);
    let result = converter.convert(&request);
    println!("{}", result.to_json());

    Ok(if result.success {
        ExitCode::SUCCESS
    } else if result.is_cancelled() {
        ExitCode::from(EXIT_INTERRUPTED)
    } else {
        ExitCode::from(EXIT_FAILURE)
    })
}

fn list_profiles() -> Result<()> {
    let store = VoiceProfileStore::builtin();

    println!("Profiles:");
    for p in store.profiles() {
        println!(
            "  {:<16} F0 {:>5.0} ± {:<4.0} Hz  formant ×{:.2}  tilt {:+.1} dB/oct  breath {:.2}",
            p.name, p.base_f0, p.f0_std, p.formant_shift, p.spectral_tilt, p.breathiness
        );
    }

    println!("\nPresets:");
    for preset in store.presets() {
        println!(
            "  {:<16} → {:<14} {:+.0} st  {}",
            preset.name, preset.profile, preset.pitch_shift_semitones, preset.description
        );
    }
    Ok(())
}

fn worker(task: &std::path::Path) -> Result<ExitCode> {
    let report = run_worker_task(task)
        .with_context(|| format!("worker task {} failed", task.display()))?;

    if report.ok {
        Ok(ExitCode::SUCCESS)
    } else {
        if let Some(failure) = &report.error {
            error!("Chunk {} failed: {}", report.chunk_index, failure);
        }
        Ok(ExitCode::from(EXIT_FAILURE))
    }
}
