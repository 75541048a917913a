use crate::category::Platform;
use crate::sample::{AbsoluteSample, RelativeSample, ThreadId};

/// A continuous-mode unit: samples with absolute timestamps.
///
/// Once finalized, samples are sorted and span at most
/// [`MAX_CHUNK_SPAN`](crate::assembler::MAX_CHUNK_SPAN).
#[derive(Clone, Debug)]
pub struct Chunk {
    pub chunk_id: String,
    pub profiler_session_id: String,
    pub platform: Platform,
    pub window: Option<usize>,
    pub samples: Vec<AbsoluteSample>,
}

impl Chunk {
    /// Seconds between the first and the last sample.
    pub fn span(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0.0,
        }
    }
}

/// A transaction-mode unit: samples with offsets from the profile start.
#[derive(Clone, Debug)]
pub struct Profile {
    pub profile_id: String,
    pub transaction_id: String,
    pub trace_id: String,
    pub platform: Platform,
    /// Wall-clock start of the profile, seconds since the Unix epoch.
    pub start_timestamp: f64,
    pub window: Option<usize>,
    pub samples: Vec<RelativeSample>,
    pub unique_sample_count: usize,
    /// Reported as the transaction's `relative_end_ns`.
    pub declared_duration_ns: u64,
    pub active_thread_id: ThreadId,
}

/// Identifiers and placement of a profile under construction.
#[derive(Clone, Debug)]
pub struct ProfileHeader {
    pub profile_id: String,
    pub transaction_id: String,
    pub trace_id: String,
    pub platform: Platform,
    pub start_timestamp: f64,
    pub window: Option<usize>,
    pub declared_duration_ns: u64,
    pub active_thread_id: ThreadId,
}

/// Identifiers and placement of a chunk under construction.
#[derive(Clone, Debug)]
pub struct ChunkHeader {
    pub chunk_id: String,
    pub profiler_session_id: String,
    pub platform: Platform,
    pub window: Option<usize>,
}

/// A finalized unit of either kind.
#[derive(Clone, Debug)]
pub enum Unit {
    Chunk(Chunk),
    Profile(Profile),
}

impl Unit {
    pub fn sample_count(&self) -> usize {
        match self {
            Self::Chunk(chunk) => chunk.samples.len(),
            Self::Profile(profile) => profile.samples.len(),
        }
    }

    pub fn window(&self) -> Option<usize> {
        match self {
            Self::Chunk(chunk) => chunk.window,
            Self::Profile(profile) => profile.window,
        }
    }
}
