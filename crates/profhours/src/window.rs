use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;

use crate::session::Session;

/// Length of one window; each chunk is mapped onto exactly one.
pub const WINDOW_LENGTH: Duration = Duration::from_secs(60);

/// Upper bound on the windows of one run, about 19 years of telemetry.
pub const MAX_WINDOWS: usize = 10_000_000;

/// Longest duration a run can span.
pub const MAX_DURATION: Duration = Duration::from_secs(MAX_WINDOWS as u64 * 60);

/// Number of windows needed to span `duration`, in `1..=MAX_WINDOWS`.
pub fn total_windows(duration: Duration) -> usize {
    let window_ns = WINDOW_LENGTH.as_nanos();
    let windows = (duration.as_nanos() + window_ns - 1) / window_ns;
    usize::try_from(windows).map_or(MAX_WINDOWS, |windows| windows.clamp(1, MAX_WINDOWS))
}

/// Decides which window the next unit covers.
///
/// The first `total_windows` assignments sweep the windows in order. After
/// that, uncovered windows (released because their unit was dropped) are
/// picked at random until none remain, then the sweep repeats.
#[derive(Debug)]
pub struct WindowScheduler {
    rng: StdRng,
}

impl WindowScheduler {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
        }
    }

    pub fn next_window(&mut self, session: &mut Session) -> usize {
        let total = session.total_windows();
        let sequential = (session.counters.assigned % total as u64) as usize;

        let window = if session.counters.assigned < total as u64 {
            sequential
        } else {
            session
                .coverage
                .uncovered()
                .choose(&mut self.rng)
                .unwrap_or(sequential)
        };

        session.coverage.mark(window);
        session.counters.assigned += 1;
        log::trace!(
            "Assigned window {}/{} ({:.1}% coverage)",
            window + 1,
            total,
            session.coverage.fraction() * 100.0
        );
        window
    }

    /// Gives a window back when the unit scheduled into it is dropped.
    pub fn release(&mut self, session: &mut Session, window: usize) {
        session.coverage.unmark(window);
        session.counters.dropped += 1;
        log::debug!("Released window {} (unit dropped before flush)", window + 1);
    }
}
