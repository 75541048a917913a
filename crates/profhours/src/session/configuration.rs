use std::str::FromStr;
use std::time::Duration;

use crate::category::Platform;
use crate::error::Error;
use crate::window::MAX_DURATION;

pub const DEFAULT_DURATION: Duration = Duration::from_secs(3600);
pub const DEFAULT_SAMPLES_PER_UNIT: usize = 20;
pub const DEFAULT_MINIMUM_SAMPLES: usize = 3;
// Roughly three times the usual 101Hz sampling frequency
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_millis(3);
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_COVERAGE_TARGET: f64 = 0.95;
pub const DEFAULT_PROFILE_TYPE: ProfileType = ProfileType::Continuous;
pub const DEFAULT_MODE: GenerationMode = GenerationMode::Direct;
pub const DEFAULT_PLAN: Plan = Plan::Am3;
pub const DEFAULT_PLATFORM: &str = "javascript";

#[derive(Clone, Debug)]
pub struct Configuration {
    pub profile_type: ProfileType,
    pub platform: Platform,
    pub mode: GenerationMode,
    pub plan: Plan,
    /// Total wall-clock duration the generated telemetry should appear to span.
    pub duration: Duration,
    pub samples_per_unit: usize,
    pub minimum_samples: usize,
    /// Period of the background sampling thread in integrated mode.
    pub sampling_interval: Duration,
    /// How long a live buffer collects captures before it is flushed as one unit.
    pub flush_interval: Duration,
    pub generation_timeout: Duration,
    pub coverage_target: f64,
    /// Inject jittered clones of recent samples while assembling live units.
    pub densify: bool,
    pub seed: Option<u64>,
    pub release: String,
    pub environment: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            profile_type: DEFAULT_PROFILE_TYPE,
            platform: Platform::new(DEFAULT_PLATFORM),
            mode: DEFAULT_MODE,
            plan: DEFAULT_PLAN,
            duration: DEFAULT_DURATION,
            samples_per_unit: DEFAULT_SAMPLES_PER_UNIT,
            minimum_samples: DEFAULT_MINIMUM_SAMPLES,
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            coverage_target: DEFAULT_COVERAGE_TARGET,
            densify: true,
            seed: None,
            release: String::new(),
            environment: "production".to_owned(),
        }
    }
}

impl Configuration {
    /// Overwrites the fields a preset controls. `Custom` and `Disabled` leave
    /// the configuration untouched.
    pub fn apply_preset(&mut self, preset: Preset) {
        let Preset::Named {
            direct,
            plan,
            profile_type,
            ui,
        } = preset
        else {
            return;
        };
        self.mode = if direct {
            GenerationMode::Direct
        } else {
            GenerationMode::Integrated
        };
        self.plan = plan;
        self.profile_type = profile_type;
        self.platform = Platform::new(if ui { "javascript" } else { "python" });
        log::info!(
            "Applied preset: {} ({} profiling on {}, {} mode, {} plan)",
            preset,
            self.profile_type,
            self.platform,
            self.mode,
            self.plan
        );
    }

    pub fn duration_hours(&self) -> f64 {
        self.duration.as_secs_f64() / 3600.0
    }
}

/// Converts a duration given in hours. Negative values are degenerate and
/// clamp to zero, which still yields one window.
pub fn duration_from_hours(hours: f64) -> Result<Duration, Error> {
    let invalid = || Error::InvalidOption {
        option: "duration_hours",
        value: hours.to_string(),
    };
    if hours.is_nan() {
        return Err(invalid());
    }
    if hours <= 0.0 {
        if hours < 0.0 {
            log::warn!("Negative duration of {} hours clamped to one window", hours);
        }
        return Ok(Duration::ZERO);
    }
    let duration = Duration::try_from_secs_f64(hours * 3600.0).map_err(|_| invalid())?;
    if duration > MAX_DURATION {
        return Err(invalid());
    }
    Ok(duration)
}

/// Converts a duration given in seconds, rejecting anything past
/// [`MAX_DURATION`].
pub fn duration_from_secs(secs: u64) -> Result<Duration, Error> {
    let duration = Duration::from_secs(secs);
    if duration > MAX_DURATION {
        return Err(Error::InvalidOption {
            option: "duration_secs",
            value: secs.to_string(),
        });
    }
    Ok(duration)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileType {
    /// Continuous profiling; emits chunks with absolute timestamps.
    Continuous,
    /// Transaction profiling; emits profiles with relative offsets.
    Transaction,
}

impl FromStr for ProfileType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "continuous" => Ok(Self::Continuous),
            "transaction" => Ok(Self::Transaction),
            _ => Err(Error::InvalidOption {
                option: "profile_type",
                value: s.to_owned(),
            }),
        }
    }
}

impl std::fmt::Display for ProfileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Continuous => "continuous",
            Self::Transaction => "transaction",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationMode {
    /// Build every unit synthetically, end to end.
    Direct,
    /// Drive a live sampling pipeline and remap its timestamps.
    Integrated,
}

impl FromStr for GenerationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "integrated" => Ok(Self::Integrated),
            _ => Err(Error::InvalidOption {
                option: "mode",
                value: s.to_owned(),
            }),
        }
    }
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Integrated => "integrated",
        })
    }
}

/// Billing plan the run targets. Only recorded in tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Plan {
    Am2,
    Am3,
}

impl FromStr for Plan {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "am2" => Ok(Self::Am2),
            "am3" => Ok(Self::Am3),
            _ => Err(Error::InvalidOption {
                option: "plan",
                value: s.to_owned(),
            }),
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Am2 => "am2",
            Self::Am3 => "am3",
        })
    }
}

/// Named testing presets, e.g. `DIRECT_AM3_CONTINUOUS_UI`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Preset {
    Named {
        direct: bool,
        plan: Plan,
        profile_type: ProfileType,
        ui: bool,
    },
    Custom,
    Disabled,
}

impl FromStr for Preset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || Error::UnknownPreset(s.to_owned());
        match s {
            "CUSTOM" => return Ok(Self::Custom),
            "DISABLED" => return Ok(Self::Disabled),
            _ => {}
        }

        let mut parts = s.split('_').peekable();
        let direct = parts.next_if_eq(&"DIRECT").is_some();
        let plan = parts.next().ok_or_else(unknown)?.parse::<Plan>().map_err(|_| unknown())?;
        let profile_type = match parts.next() {
            Some("TRANSACTION") => ProfileType::Transaction,
            Some("CONTINUOUS") => ProfileType::Continuous,
            _ => return Err(unknown()),
        };
        let ui = match parts.next() {
            Some("UI") => true,
            Some("BACKEND") => false,
            _ => return Err(unknown()),
        };
        if parts.next().is_some() {
            return Err(unknown());
        }

        Ok(Self::Named {
            direct,
            plan,
            profile_type,
            ui,
        })
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named {
                direct,
                plan,
                profile_type,
                ui,
            } => write!(
                f,
                "{}{}_{}_{}",
                if *direct { "DIRECT_" } else { "" },
                plan.to_string().to_ascii_uppercase(),
                profile_type.to_string().to_ascii_uppercase(),
                if *ui { "UI" } else { "BACKEND" }
            ),
            Self::Custom => f.write_str("CUSTOM"),
            Self::Disabled => f.write_str("DISABLED"),
        }
    }
}
