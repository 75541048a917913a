use rand::rngs::StdRng;
use rand::Rng;

use crate::profile::{Chunk, ChunkHeader, Profile, ProfileHeader};
use crate::sample::{AbsoluteSample, Capture, RelativeSample, SampleTime, TimedSample};

/// Longest span a finalized chunk may cover, in seconds. Ingestion rejects
/// chunks over 66 seconds.
pub const MAX_CHUNK_SPAN: f64 = 60.0;

/// Accumulates the samples of one unit.
#[derive(Debug)]
pub struct SampleBuffer<S> {
    samples: Vec<S>,
    densify: Option<StdRng>,
}

impl<S: TimedSample> SampleBuffer<S> {
    pub fn new() -> Self {
        Self {
            samples: vec![],
            densify: None,
        }
    }

    /// A buffer that occasionally follows a write with 1-2 jittered clones of
    /// the written sample.
    pub fn densifying(rng: StdRng) -> Self {
        Self {
            samples: vec![],
            densify: Some(rng),
        }
    }

    pub fn write(&mut self, sample: S) {
        let Some(rng) = self.densify.as_mut() else {
            self.samples.push(sample);
            return;
        };
        if rng.gen_bool(S::DENSIFY_PROBABILITY) {
            let clones = rng.gen_range(1..=2);
            let extra: Vec<S> = (0..clones).map(|_| sample.jittered(rng)).collect();
            self.samples.push(sample);
            self.samples.extend(extra);
        } else {
            self.samples.push(sample);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Consumes the buffer, returning samples in non-decreasing time order.
    pub fn into_sorted(self) -> Vec<S> {
        let mut samples = self.samples;
        samples.sort_by(|a, b| a.time_key().total_cmp(&b.time_key()));
        samples
    }
}

impl<S: TimedSample> Default for SampleBuffer<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ChunkAssembler {
    header: ChunkHeader,
    buffer: SampleBuffer<AbsoluteSample>,
}

impl ChunkAssembler {
    pub fn new(header: ChunkHeader, densify: Option<StdRng>) -> Self {
        Self {
            header,
            buffer: densify.map_or_else(SampleBuffer::new, SampleBuffer::densifying),
        }
    }

    pub fn write(&mut self, capture: Capture, time: SampleTime) {
        self.buffer.write(AbsoluteSample::from_capture(capture, time));
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn finalize(self) -> Chunk {
        let samples = self.buffer.into_sorted();
        let before = samples.len();
        let samples = trim_duration(samples, MAX_CHUNK_SPAN);
        if samples.len() != before {
            log::debug!(
                "Trimmed chunk {} from {} to {} samples",
                self.header.chunk_id,
                before,
                samples.len()
            );
        }

        let chunk = Chunk {
            chunk_id: self.header.chunk_id,
            profiler_session_id: self.header.profiler_session_id,
            platform: self.header.platform,
            window: self.header.window,
            samples,
        };
        log::debug!(
            "Final chunk contains {} samples spanning {:.2} seconds",
            chunk.samples.len(),
            chunk.span()
        );
        chunk
    }
}

#[derive(Debug)]
pub struct ProfileAssembler {
    header: ProfileHeader,
    buffer: SampleBuffer<RelativeSample>,
}

impl ProfileAssembler {
    pub fn new(header: ProfileHeader, densify: Option<StdRng>) -> Self {
        Self {
            header,
            buffer: densify.map_or_else(SampleBuffer::new, SampleBuffer::densifying),
        }
    }

    pub fn write(&mut self, capture: Capture, time: SampleTime) {
        self.buffer.write(RelativeSample::from_capture(capture, time));
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn finalize(self) -> Profile {
        let samples = self.buffer.into_sorted();
        Profile {
            profile_id: self.header.profile_id,
            transaction_id: self.header.transaction_id,
            trace_id: self.header.trace_id,
            platform: self.header.platform,
            start_timestamp: self.header.start_timestamp,
            window: self.header.window,
            unique_sample_count: samples.len(),
            samples,
            declared_duration_ns: self.header.declared_duration_ns,
            active_thread_id: self.header.active_thread_id,
        }
    }
}

/// Brings sorted samples within `max_span` seconds.
///
/// First thins them evenly by index in proportion to the overshoot, which
/// keeps the temporal spread. Thinning never moves the endpoints far, so the
/// result is then clamped to the densest `max_span` range.
pub fn trim_duration(samples: Vec<AbsoluteSample>, max_span: f64) -> Vec<AbsoluteSample> {
    let samples = thin_evenly(samples, max_span);
    clamp_to_span(samples, max_span)
}

/// Selects `max(2, floor(count * max_span / span))` evenly spaced samples when
/// the span exceeds `max_span`. Fewer than two samples have no span and are
/// returned as is.
pub fn thin_evenly(samples: Vec<AbsoluteSample>, max_span: f64) -> Vec<AbsoluteSample> {
    let count = samples.len();
    if count < 2 {
        return samples;
    }
    let span = samples[count - 1].timestamp - samples[0].timestamp;
    if span <= max_span {
        return samples;
    }

    let reduction = max_span / span;
    let target = ((count as f64 * reduction) as usize).max(2);
    if target >= count {
        return samples;
    }

    let step = count as f64 / target as f64;
    (0..target)
        .map(|i| samples[((i as f64 * step) as usize).min(count - 1)].clone())
        .collect()
}

fn clamp_to_span(samples: Vec<AbsoluteSample>, max_span: f64) -> Vec<AbsoluteSample> {
    let count = samples.len();
    if count < 2 || samples[count - 1].timestamp - samples[0].timestamp <= max_span {
        return samples;
    }

    let (mut best_start, mut best_len) = (0, 1);
    let mut end = 0;
    for start in 0..count {
        end = end.max(start);
        while end + 1 < count && samples[end + 1].timestamp - samples[start].timestamp <= max_span {
            end += 1;
        }
        if end - start + 1 > best_len {
            best_start = start;
            best_len = end - start + 1;
        }
    }

    samples.into_iter().skip(best_start).take(best_len).collect()
}
