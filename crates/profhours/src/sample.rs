use std::sync::Arc;

use rand::Rng;

/// Largest offset, in seconds, of a densifying clone of a continuous sample.
pub const MAX_CHUNK_JITTER: f64 = 3.0;

pub type ThreadId = String;
pub type StackId = String;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Frame {
    pub function: String,
    pub file_path: String,
    pub line: u32,
    pub module: String,
    pub is_application_code: bool,
}

/// A call stack, leaf first.
#[derive(Clone, Debug, PartialEq)]
pub struct Stack {
    pub id: StackId,
    pub frames: Vec<Frame>,
}

/// One `(thread_id, stack)` pair yielded by a sample source. Captures carry
/// no time; the timestamp policy decides where they land.
#[derive(Clone, Debug, PartialEq)]
pub struct Capture {
    pub thread_id: ThreadId,
    pub stack: Arc<Stack>,
}

/// A continuous-mode sample, stamped with seconds since the Unix epoch.
#[derive(Clone, Debug, PartialEq)]
pub struct AbsoluteSample {
    pub timestamp: f64,
    pub thread_id: ThreadId,
    pub stack: Arc<Stack>,
}

/// A transaction-mode sample, stamped with nanoseconds since the profile start.
#[derive(Clone, Debug, PartialEq)]
pub struct RelativeSample {
    pub elapsed_ns: u64,
    pub thread_id: ThreadId,
    pub stack: Arc<Stack>,
}

/// Behaviour shared by both sample kinds while a unit is being assembled.
pub trait TimedSample: Clone {
    /// Chance that a write is followed by densifying clones.
    const DENSIFY_PROBABILITY: f64;

    fn from_capture(capture: Capture, time: SampleTime) -> Self;

    /// Sort key. Both representations fit an `f64` without losing order.
    fn time_key(&self) -> f64;

    /// A copy placed slightly after `self`.
    fn jittered<R: Rng>(&self, rng: &mut R) -> Self;
}

/// Where a capture lands, in the representation of the unit it joins.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SampleTime {
    Absolute(f64),
    Relative(u64),
}

impl SampleTime {
    fn as_absolute(self) -> f64 {
        match self {
            Self::Absolute(timestamp) => timestamp,
            Self::Relative(elapsed_ns) => elapsed_ns as f64 / 1e9,
        }
    }

    fn as_relative(self) -> u64 {
        match self {
            Self::Absolute(timestamp) => (timestamp.max(0.0) * 1e9) as u64,
            Self::Relative(elapsed_ns) => elapsed_ns,
        }
    }
}

impl TimedSample for AbsoluteSample {
    const DENSIFY_PROBABILITY: f64 = 0.15;

    fn from_capture(capture: Capture, time: SampleTime) -> Self {
        Self {
            timestamp: time.as_absolute(),
            thread_id: capture.thread_id,
            stack: capture.stack,
        }
    }

    fn time_key(&self) -> f64 {
        self.timestamp
    }

    fn jittered<R: Rng>(&self, rng: &mut R) -> Self {
        Self {
            timestamp: self.timestamp + rng.gen_range(0.1..=MAX_CHUNK_JITTER),
            ..self.clone()
        }
    }
}

impl TimedSample for RelativeSample {
    const DENSIFY_PROBABILITY: f64 = 0.2;

    fn from_capture(capture: Capture, time: SampleTime) -> Self {
        Self {
            elapsed_ns: time.as_relative(),
            thread_id: capture.thread_id,
            stack: capture.stack,
        }
    }

    fn time_key(&self) -> f64 {
        self.elapsed_ns as f64
    }

    fn jittered<R: Rng>(&self, rng: &mut R) -> Self {
        Self {
            elapsed_ns: self.elapsed_ns + rng.gen_range(1_000_000..=10_000_000),
            ..self.clone()
        }
    }
}

#[cfg(test)]
pub(crate) fn test_capture(id: &str) -> Capture {
    Capture {
        thread_id: "1".to_owned(),
        stack: Arc::new(Stack {
            id: id.to_owned(),
            frames: vec![Frame {
                function: "main".to_owned(),
                file_path: "/app/src/main.rs".to_owned(),
                line: 10,
                module: "app.main".to_owned(),
                is_application_code: true,
            }],
        }),
    }
}
