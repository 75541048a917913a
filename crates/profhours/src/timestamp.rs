use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::sample::{SampleTime, MAX_CHUNK_JITTER};
use crate::session::configuration::ProfileType;
use crate::session::Session;
use crate::window::{WindowScheduler, WINDOW_LENGTH};

/// Seconds of a window that samples are spread over, leaving a margin before
/// the next window starts.
pub const WINDOW_FILL: f64 = 59.0;
/// Fill used for live units, whose samples may gain densifying clones up to
/// [`MAX_CHUNK_JITTER`] later. Keeps every clone inside its window.
pub const LIVE_WINDOW_FILL: f64 = WINDOW_FILL - MAX_CHUNK_JITTER;
/// Longest offset a transaction profile sample may carry.
pub const MAX_TRANSACTION_SPAN: Duration = Duration::from_secs(25);

/// The live unit a capture belongs to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnitSpan {
    pub window: Option<usize>,
    /// Wall-clock time the unit was opened, seconds since the Unix epoch.
    pub opened_at_unix: f64,
    /// How long the unit collected captures before it was flushed.
    pub length: Duration,
}

/// Decides the timestamps of captures flushed from the live pipeline.
pub trait TimestampPolicy: Send + Sync {
    /// Called when a live unit opens. Returns the window the unit maps to.
    fn begin_unit(&self) -> Option<usize>;

    /// Where a capture taken `elapsed` after the unit opened lands.
    fn map(&self, unit: &UnitSpan, elapsed: Duration) -> SampleTime;

    /// Start of a transaction profile built from `unit`.
    fn unit_start(&self, unit: &UnitSpan) -> f64;

    /// Duration reported for a transaction profile built from `unit`.
    fn unit_duration_ns(&self, unit: &UnitSpan) -> u64;

    /// Called once the unit was emitted or dropped.
    fn end_unit(&self, unit: &UnitSpan, emitted: bool);
}

/// Keeps capture times as they were observed.
#[derive(Debug)]
pub struct RealTimestamps {
    profile_type: ProfileType,
}

impl RealTimestamps {
    pub fn new(profile_type: ProfileType) -> Self {
        Self { profile_type }
    }
}

impl TimestampPolicy for RealTimestamps {
    fn begin_unit(&self) -> Option<usize> {
        None
    }

    fn map(&self, unit: &UnitSpan, elapsed: Duration) -> SampleTime {
        match self.profile_type {
            ProfileType::Continuous => SampleTime::Absolute(unit.opened_at_unix + elapsed.as_secs_f64()),
            ProfileType::Transaction => SampleTime::Relative(elapsed.as_nanos() as u64),
        }
    }

    fn unit_start(&self, unit: &UnitSpan) -> f64 {
        unit.opened_at_unix
    }

    fn unit_duration_ns(&self, unit: &UnitSpan) -> u64 {
        unit.length.as_nanos() as u64
    }

    fn end_unit(&self, _unit: &UnitSpan, _emitted: bool) {}
}

/// Moves every live unit onto a window of the requested duration, placed in
/// the past so that no timestamp lies in the future.
///
/// A capture's position within the window is its share of the flush
/// interval, so a unit flushed on schedule fills its window evenly.
pub struct WindowedTimestamps {
    profile_type: ProfileType,
    session: Arc<Mutex<Session>>,
    scheduler: Mutex<WindowScheduler>,
    base: f64,
    flush_interval: Duration,
    unit_span: Duration,
}

impl WindowedTimestamps {
    pub fn new(
        profile_type: ProfileType,
        session: Arc<Mutex<Session>>,
        scheduler: WindowScheduler,
        base: f64,
        flush_interval: Duration,
    ) -> Self {
        let unit_span = match session.lock() {
            Ok(session) => unit_span(session.requested_duration(), session.total_windows()),
            Err(_) => WINDOW_LENGTH,
        };
        Self {
            profile_type,
            session,
            scheduler: Mutex::new(scheduler),
            base,
            flush_interval,
            unit_span,
        }
    }

    fn fraction(&self, elapsed: Duration) -> f64 {
        if self.flush_interval.is_zero() {
            return 0.0;
        }
        (elapsed.as_secs_f64() / self.flush_interval.as_secs_f64()).min(1.0)
    }

    fn window_or_zero(unit: &UnitSpan) -> f64 {
        unit.window.unwrap_or(0) as f64
    }
}

impl TimestampPolicy for WindowedTimestamps {
    fn begin_unit(&self) -> Option<usize> {
        let (Ok(mut session), Ok(mut scheduler)) = (self.session.lock(), self.scheduler.lock())
        else {
            log::warn!("Session lock poisoned. Unit will not be mapped to a window.");
            return None;
        };
        Some(scheduler.next_window(&mut session))
    }

    fn map(&self, unit: &UnitSpan, elapsed: Duration) -> SampleTime {
        let fraction = self.fraction(elapsed);
        match self.profile_type {
            ProfileType::Continuous => SampleTime::Absolute(
                self.base
                    + Self::window_or_zero(unit) * WINDOW_LENGTH.as_secs_f64()
                    + fraction * LIVE_WINDOW_FILL,
            ),
            ProfileType::Transaction => {
                let spread = self.unit_span.min(MAX_TRANSACTION_SPAN);
                SampleTime::Relative((fraction * spread.as_nanos() as f64) as u64)
            }
        }
    }

    fn unit_start(&self, unit: &UnitSpan) -> f64 {
        self.base + Self::window_or_zero(unit) * self.unit_span.as_secs_f64()
    }

    fn unit_duration_ns(&self, _unit: &UnitSpan) -> u64 {
        self.unit_span.as_nanos() as u64
    }

    fn end_unit(&self, unit: &UnitSpan, emitted: bool) {
        let Some(window) = unit.window else {
            return;
        };
        if emitted {
            return;
        }
        if let (Ok(mut session), Ok(mut scheduler)) = (self.session.lock(), self.scheduler.lock()) {
            scheduler.release(&mut session, window);
        }
    }
}

/// Length of the slice of `duration` one transaction unit represents.
pub fn unit_span(duration: Duration, total_windows: usize) -> Duration {
    let total_windows = total_windows.max(1);
    match u32::try_from(total_windows) {
        Ok(windows) => duration / windows,
        Err(_) => duration.div_f64(total_windows as f64),
    }
}

/// Start of the generated range: `total_windows` windows before `now`, so
/// the last window ends no later than `now`.
pub fn past_base(now: f64, total_windows: usize) -> f64 {
    now - total_windows as f64 * WINDOW_LENGTH.as_secs_f64()
}
