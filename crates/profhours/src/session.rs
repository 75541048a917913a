pub mod configuration;

use std::time::Duration;

use crate::window::total_windows;

/// State of one generation run.
#[derive(Debug)]
pub struct Session {
    requested_duration: Duration,
    pub coverage: Coverage,
    pub counters: Counters,
}

impl Session {
    pub fn new(requested_duration: Duration) -> Self {
        Self {
            requested_duration,
            coverage: Coverage::new(total_windows(requested_duration)),
            counters: Counters::default(),
        }
    }

    pub fn requested_duration(&self) -> Duration {
        self.requested_duration
    }

    pub fn total_windows(&self) -> usize {
        self.coverage.len()
    }
}

/// Which windows have had at least one sample scheduled into them.
#[derive(Debug)]
pub struct Coverage {
    windows: Box<[bool]>,
    covered: usize,
}

impl Coverage {
    pub fn new(total_windows: usize) -> Self {
        Self {
            windows: vec![false; total_windows.max(1)].into_boxed_slice(),
            covered: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn covered(&self) -> usize {
        self.covered
    }

    pub fn is_covered(&self, window: usize) -> bool {
        self.windows.get(window).copied().unwrap_or(false)
    }

    pub fn fraction(&self) -> f64 {
        self.covered as f64 / self.windows.len() as f64
    }

    pub fn is_complete(&self) -> bool {
        self.covered == self.windows.len()
    }

    pub fn uncovered(&self) -> impl Iterator<Item = usize> + '_ {
        self.windows
            .iter()
            .enumerate()
            .filter(|(_, covered)| !**covered)
            .map(|(index, _)| index)
    }

    pub(crate) fn mark(&mut self, window: usize) {
        if let Some(slot) = self.windows.get_mut(window) {
            if !*slot {
                *slot = true;
                self.covered += 1;
            }
        }
    }

    pub(crate) fn unmark(&mut self, window: usize) {
        if let Some(slot) = self.windows.get_mut(window) {
            if *slot {
                *slot = false;
                self.covered -= 1;
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    /// Windows handed out by the scheduler.
    pub assigned: u64,
    pub emitted: u64,
    /// Units discarded before flush (their windows were released).
    pub dropped: u64,
    pub samples: u64,
}
