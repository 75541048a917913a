//! Generates synthetic profiling telemetry that appears to span hours of
//! wall-clock time, for exercising profile-hours accounting.
//!
//! ```bash
//! # One hour of continuous UI profiling, written to stdout
//! profhours --preset DIRECT_AM3_CONTINUOUS_UI
//!
//! # Three hours of backend transaction profiles through the live pipeline
//! profhours --profile-type transaction --platform python --mode integrated \
//!           --duration-hours 3 --output envelopes.ndjson
//! ```

use std::ffi::c_void;
use std::fs::File;
use std::io::{self, BufWriter};
use std::mem;
use std::path::PathBuf;
use std::process::ExitCode;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use clap::Parser;

use profhours::category::{Platform, PlatformTagger};
use profhours::clock::SystemClock;
use profhours::envelope::{Transport, WriterTransport};
use profhours::orchestrator::Orchestrator;
use profhours::pipeline::SamplingPipeline;
use profhours::session::configuration::{
    duration_from_hours, duration_from_secs, Configuration, GenerationMode, Preset, ProfileType,
    DEFAULT_MINIMUM_SAMPLES, DEFAULT_SAMPLES_PER_UNIT,
};
use profhours::{Error, Result};

static CANCELLATION: OnceLock<Arc<AtomicBool>> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "profhours")]
#[command(about = "Generate synthetic profiling telemetry spanning hours of wall-clock time")]
#[command(version)]
struct Args {
    /// Named testing preset, e.g. DIRECT_AM3_CONTINUOUS_UI. Explicit flags
    /// override the preset.
    #[arg(long)]
    preset: Option<Preset>,

    /// continuous or transaction
    #[arg(long)]
    profile_type: Option<ProfileType>,

    /// Platform reported on every item, e.g. javascript, android, python
    #[arg(long)]
    platform: Option<String>,

    /// direct or integrated
    #[arg(long)]
    mode: Option<GenerationMode>,

    /// Wall-clock duration the telemetry should appear to span, up to about
    /// 19 years. Negative values clamp to a single window.
    #[arg(long, conflicts_with = "duration_secs", allow_negative_numbers = true)]
    duration_hours: Option<f64>,

    #[arg(long)]
    duration_secs: Option<u64>,

    /// Longest a live unit collects samples before it is flushed (integrated
    /// mode). Shortened automatically when the run needs more units.
    #[arg(long, value_name = "MS")]
    flush_interval: Option<u64>,

    /// Give up after this many seconds of generation
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Fraction of windows that must be covered before an integrated run stops
    #[arg(long)]
    coverage_target: Option<f64>,

    #[arg(long, default_value_t = DEFAULT_SAMPLES_PER_UNIT)]
    samples_per_unit: usize,

    /// Floor of samples per transaction profile
    #[arg(long, default_value_t = DEFAULT_MINIMUM_SAMPLES)]
    minimum_samples: usize,

    /// Seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,

    /// Write envelopes to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    debug: bool,
}

impl Args {
    fn configuration(&self) -> Result<Configuration> {
        let mut configuration = Configuration::default();
        if let Some(preset) = self.preset {
            configuration.apply_preset(preset);
        }
        if let Some(profile_type) = self.profile_type {
            configuration.profile_type = profile_type;
        }
        if let Some(platform) = &self.platform {
            configuration.platform = Platform::new(platform.as_str());
        }
        if let Some(mode) = self.mode {
            configuration.mode = mode;
        }
        if let Some(hours) = self.duration_hours {
            configuration.duration = duration_from_hours(hours)?;
        }
        if let Some(secs) = self.duration_secs {
            configuration.duration = duration_from_secs(secs)?;
        }
        if let Some(ms) = self.flush_interval {
            if ms == 0 {
                return Err(Error::InvalidOption {
                    option: "flush_interval",
                    value: "0".to_owned(),
                });
            }
            configuration.flush_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = self.timeout {
            configuration.generation_timeout = Duration::from_secs(secs);
        }
        if let Some(target) = self.coverage_target {
            if !(target > 0.0 && target <= 1.0) {
                return Err(Error::InvalidOption {
                    option: "coverage_target",
                    value: target.to_string(),
                });
            }
            configuration.coverage_target = target;
        }
        if self.samples_per_unit == 0 {
            return Err(Error::InvalidOption {
                option: "samples_per_unit",
                value: "0".to_owned(),
            });
        }
        configuration.samples_per_unit = self.samples_per_unit;
        configuration.minimum_samples = self.minimum_samples;
        configuration.seed = self.seed;
        Ok(configuration)
    }

    fn transport(&self) -> Result<Arc<dyn Transport>> {
        let transport: Arc<dyn Transport> = match &self.output {
            Some(path) => Arc::new(WriterTransport::new(BufWriter::new(File::create(path)?))),
            None => Arc::new(WriterTransport::new(io::stdout())),
        };
        Ok(transport)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::builder()
        .format_timestamp(None)
        .format_module_path(false)
        .filter_level(if args.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let configuration = args.configuration()?;
    if args.preset == Some(Preset::Disabled) {
        log::info!("Preset DISABLED: nothing to generate");
        return Ok(());
    }

    let clock = Arc::new(SystemClock::new());
    let tagger = Arc::new(PlatformTagger::new(configuration.platform.clone()));
    let transport = args.transport()?;

    let mut orchestrator = Orchestrator::new(
        configuration.clone(),
        clock.clone(),
        tagger.clone(),
        Arc::clone(&transport),
    );
    install_interrupt_handler(orchestrator.cancellation())?;

    let summary = match configuration.mode {
        GenerationMode::Direct => orchestrator.run(None)?,
        GenerationMode::Integrated => {
            let mut pipeline = SamplingPipeline::new(&configuration, clock, tagger, transport);
            pipeline.start()?;
            let summary = orchestrator.run(Some(&pipeline));
            pipeline.stop()?;
            summary?
        }
    };
    log::debug!("{:?}", summary);
    Ok(())
}

/// Routes Ctrl-C to the orchestrator's cancellation flag.
fn install_interrupt_handler(cancellation: Arc<AtomicBool>) -> Result<()> {
    if CANCELLATION.set(cancellation).is_err() {
        return Ok(());
    }

    let mut sa: libc::sigaction = unsafe { mem::zeroed() };
    sa.sa_sigaction = handle_interrupt as usize;
    sa.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
    let err = unsafe { libc::sigaction(libc::SIGINT, &sa, null_mut()) };
    if err != 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    log::debug!("Interrupt handler installed");
    Ok(())
}

extern "C" fn handle_interrupt(
    _sig: libc::c_int,
    _info: *mut libc::siginfo_t,
    _ucontext: *mut c_void,
) {
    if let Some(cancellation) = CANCELLATION.get() {
        cancellation.store(true, Ordering::Relaxed);
    }
}
