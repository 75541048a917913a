use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Time source for the generator.
///
/// `now` is monotonic and only meaningful relative to other readings of the
/// same clock. `unix_now` is wall-clock seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
    fn unix_now(&self) -> f64;
}

#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn unix_now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    elapsed_ns: AtomicU64,
    unix_origin: f64,
}

impl ManualClock {
    pub fn new(unix_origin: f64) -> Self {
        Self {
            elapsed_ns: AtomicU64::new(0),
            unix_origin,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed_ns
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::SeqCst))
    }

    fn unix_now(&self) -> f64 {
        self.unix_origin + self.now().as_secs_f64()
    }
}
