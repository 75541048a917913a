use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::assembler::{ChunkAssembler, ProfileAssembler};
use crate::category::CategoryTagger;
use crate::clock::Clock;
use crate::envelope::{Envelope, Transport};
use crate::error::Error;
use crate::profile::{ChunkHeader, ProfileHeader, Unit};
use crate::ringbuffer::{CapturedSample, Ringbuffer};
use crate::scheduler::Scheduler;
use crate::serialization::random_id;
use crate::serialization::serializer::RunContext;
use crate::session::configuration::{Configuration, GenerationMode, ProfileType};
use crate::source::{IdleSource, SampleSource};
use crate::timer_thread_scheduler::TimerThreadScheduler;
use crate::timestamp::{RealTimestamps, TimestampPolicy, UnitSpan};
use crate::validity::ensure_minimum;
use crate::Result;

pub const LIVE_BUFFER_CAPACITY: usize = 10_000;

/// Captures collected since the live unit was opened.
#[derive(Debug)]
struct LiveBuffer {
    samples: Ringbuffer,
    window: Option<usize>,
    opened_at: Duration,
    opened_at_unix: f64,
}

impl LiveBuffer {
    fn open(window: Option<usize>, clock: &dyn Clock) -> Self {
        Self {
            samples: Ringbuffer::new(LIVE_BUFFER_CAPACITY),
            window,
            opened_at: clock.now(),
            opened_at_unix: clock.unix_now(),
        }
    }
}

/// State shared with the sampling thread.
pub(crate) struct PipelineState {
    clock: Arc<dyn Clock>,
    source: RwLock<Arc<dyn SampleSource>>,
    live: Mutex<Option<LiveBuffer>>,
}

impl fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineState")
            .field("live", &self.live)
            .finish_non_exhaustive()
    }
}

impl PipelineState {
    /// Takes one round of captures from the current source into the live
    /// buffer.
    pub(crate) fn capture(&self) {
        let source = Arc::clone(&self.source.read().unwrap_or_else(PoisonError::into_inner));
        let captures = source.sample();
        if captures.is_empty() {
            return;
        }
        let captured_at = self.clock.now();

        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(buffer) = live.as_mut() else {
            log::trace!("Pipeline is not running. Dropping sample.");
            return;
        };
        for capture in captures {
            let sample = CapturedSample {
                capture,
                captured_at,
            };
            if buffer.samples.push(sample).is_err() {
                log::debug!("Live buffer full. Dropping sample.");
            }
        }
    }
}

/// The strategies a pipeline runs with. `attach` swaps them as a set.
pub struct Strategies {
    pub source: Arc<dyn SampleSource>,
    pub policy: Arc<dyn TimestampPolicy>,
    pub context: RunContext,
}

/// A live sampling pipeline: a background thread collects captures into a
/// live buffer, and each flush turns the buffer into one unit and submits it.
pub struct SamplingPipeline {
    profile_type: ProfileType,
    minimum_samples: usize,
    densify: bool,
    sampling_interval: Duration,
    flush_interval: Duration,
    tagger: Arc<dyn CategoryTagger>,
    transport: Arc<dyn Transport>,
    state: Arc<PipelineState>,
    policy: RwLock<Arc<dyn TimestampPolicy>>,
    context: RwLock<RunContext>,
    scheduler: Option<TimerThreadScheduler>,
    profiler_id: String,
    rng: Mutex<StdRng>,
    flushed: AtomicU64,
}

impl SamplingPipeline {
    pub fn new(
        configuration: &Configuration,
        clock: Arc<dyn Clock>,
        tagger: Arc<dyn CategoryTagger>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let mut rng = match configuration.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let profiler_id = random_id(&mut rng);
        let mut test_run_id = random_id(&mut rng);
        test_run_id.truncate(8);

        Self {
            profile_type: configuration.profile_type,
            minimum_samples: configuration.minimum_samples,
            densify: configuration.densify,
            sampling_interval: configuration.sampling_interval,
            flush_interval: configuration.flush_interval,
            tagger,
            transport,
            state: Arc::new(PipelineState {
                clock,
                source: RwLock::new(Arc::new(IdleSource)),
                live: Mutex::new(None),
            }),
            policy: RwLock::new(Arc::new(RealTimestamps::new(configuration.profile_type))),
            context: RwLock::new(RunContext::new(
                configuration,
                GenerationMode::Integrated,
                test_run_id,
            )),
            scheduler: None,
            profiler_id,
            rng: Mutex::new(rng),
            flushed: AtomicU64::new(0),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let policy = self.current_policy();
        *self.state.live.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(LiveBuffer::open(policy.begin_unit(), &*self.state.clock));

        let mut scheduler = TimerThreadScheduler::new(self.sampling_interval, Arc::clone(&self.state));
        scheduler.start()?;
        self.scheduler = Some(scheduler);
        log::debug!(
            "Sampling pipeline started (interval {:?}, flush every {:?})",
            self.sampling_interval,
            self.flush_interval
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.scheduler
            .as_ref()
            .map_or(false, |scheduler| scheduler.is_running())
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub fn sampling_interval(&self) -> Duration {
        self.sampling_interval
    }

    /// Swaps in new strategies and returns the ones they replace.
    ///
    /// The live unit is reopened under the new policy; captures taken before
    /// the swap are discarded. Fails when the pipeline has not been started.
    pub fn attach(&self, strategies: Strategies) -> Result<Strategies> {
        if !self.is_running() {
            return Err(Error::MissingPipelineInternals("sampling thread"));
        }
        let mut live = self.state.live.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(buffer) = live.as_mut() else {
            return Err(Error::MissingPipelineInternals("live buffer"));
        };

        let Strategies {
            source,
            policy,
            context,
        } = strategies;
        let previous = Strategies {
            source: mem::replace(
                &mut *self.state.source.write().unwrap_or_else(PoisonError::into_inner),
                source,
            ),
            policy: mem::replace(
                &mut *self.policy.write().unwrap_or_else(PoisonError::into_inner),
                Arc::clone(&policy),
            ),
            context: mem::replace(
                &mut *self.context.write().unwrap_or_else(PoisonError::into_inner),
                context,
            ),
        };

        let stale = mem::replace(buffer, LiveBuffer::open(policy.begin_unit(), &*self.state.clock));
        let span = Self::span_of(&stale, self.state.clock.now());
        previous.policy.end_unit(&span, false);
        if !stale.samples.is_empty() {
            log::debug!("Discarded captures taken before the strategies were swapped");
        }
        Ok(previous)
    }

    /// Whether the live unit has been open for at least `interval`.
    pub fn flush_due(&self, interval: Duration) -> bool {
        let now = self.state.clock.now();
        let live = self.state.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.as_ref()
            .map_or(false, |buffer| now.saturating_sub(buffer.opened_at) >= interval)
    }

    /// Emits the live unit and opens the next one. Returns `None` when the
    /// unit held no captures and was dropped.
    pub fn flush(&self) -> Result<Option<Unit>> {
        self.rotate(true)
    }

    /// Like [`flush`](Self::flush), but the next live unit is not mapped to
    /// a window. Used before strategies are restored.
    pub fn drain(&self) -> Result<Option<Unit>> {
        self.rotate(false)
    }

    /// Stops the sampling thread and emits what is left in the live buffer.
    pub fn stop(&mut self) -> Result<Option<Unit>> {
        let Some(mut scheduler) = self.scheduler.take() else {
            return Ok(None);
        };
        scheduler.stop()?;
        let unit = self.rotate(false)?;
        *self.state.live.lock().unwrap_or_else(PoisonError::into_inner) = None;
        log::debug!("Sampling pipeline stopped");
        Ok(unit)
    }

    fn current_policy(&self) -> Arc<dyn TimestampPolicy> {
        Arc::clone(&self.policy.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn span_of(buffer: &LiveBuffer, now: Duration) -> UnitSpan {
        UnitSpan {
            window: buffer.window,
            opened_at_unix: buffer.opened_at_unix,
            length: now.saturating_sub(buffer.opened_at),
        }
    }

    fn rotate(&self, assign_window: bool) -> Result<Option<Unit>> {
        let policy = self.current_policy();
        let closed = {
            let mut live = self.state.live.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(buffer) = live.as_mut() else {
                return Ok(None);
            };
            let window = if assign_window {
                policy.begin_unit()
            } else {
                None
            };
            mem::replace(buffer, LiveBuffer::open(window, &*self.state.clock))
        };
        self.emit(closed, &policy)
    }

    fn emit(&self, buffer: LiveBuffer, policy: &Arc<dyn TimestampPolicy>) -> Result<Option<Unit>> {
        let span = Self::span_of(&buffer, self.state.clock.now());
        let LiveBuffer {
            mut samples,
            opened_at,
            ..
        } = buffer;
        let mut captured = vec![];
        while let Some(sample) = samples.pop() {
            captured.push(sample);
        }
        if captured.is_empty() {
            log::debug!("Live unit has no samples. Dropping it.");
            policy.end_unit(&span, false);
            return Ok(None);
        }

        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let densify = self.densify.then(|| StdRng::seed_from_u64(rng.gen()));
        let times: Vec<_> = captured
            .iter()
            .map(|sample| policy.map(&span, sample.captured_at.saturating_sub(opened_at)))
            .collect();

        let unit = match self.profile_type {
            ProfileType::Continuous => {
                let header = ChunkHeader {
                    chunk_id: random_id(&mut *rng),
                    profiler_session_id: self.profiler_id.clone(),
                    platform: self.tagger.platform().clone(),
                    window: span.window,
                };
                let mut assembler = ChunkAssembler::new(header, densify);
                for (sample, time) in captured.into_iter().zip(times) {
                    assembler.write(sample.capture, time);
                }
                Unit::Chunk(assembler.finalize())
            }
            ProfileType::Transaction => {
                let header = ProfileHeader {
                    profile_id: random_id(&mut *rng),
                    transaction_id: random_id(&mut *rng),
                    trace_id: random_id(&mut *rng),
                    platform: self.tagger.platform().clone(),
                    start_timestamp: policy.unit_start(&span),
                    window: span.window,
                    declared_duration_ns: policy.unit_duration_ns(&span),
                    active_thread_id: captured[0].capture.thread_id.clone(),
                };
                let mut assembler = ProfileAssembler::new(header, densify);
                for (sample, time) in captured.into_iter().zip(times) {
                    assembler.write(sample.capture, time);
                }
                Unit::Profile(ensure_minimum(assembler.finalize(), self.minimum_samples))
            }
        };

        let index = self.flushed.fetch_add(1, Ordering::SeqCst);
        let context = self
            .context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let envelope = match Envelope::for_unit(
            &unit,
            index,
            &*self.tagger,
            &context,
            self.state.clock.unix_now(),
            &mut *rng,
        ) {
            Ok(envelope) => envelope,
            Err(e) => {
                policy.end_unit(&span, false);
                return Err(e);
            }
        };
        self.transport.submit(envelope);
        policy.end_unit(&span, true);
        log::debug!(
            "Flushed unit {} with {} samples (window {:?})",
            index,
            unit.sample_count(),
            unit.window()
        );
        Ok(Some(unit))
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::backtrace::StackSynthesizer;
    use crate::category::{Platform, PlatformTagger};
    use crate::clock::SystemClock;
    use crate::envelope::MemoryTransport;
    use crate::session::Session;
    use crate::source::SyntheticSource;
    use crate::timestamp::WindowedTimestamps;
    use crate::window::WindowScheduler;

    fn configuration(profile_type: ProfileType) -> Configuration {
        Configuration {
            profile_type,
            sampling_interval: Duration::from_millis(1),
            flush_interval: Duration::from_millis(20),
            seed: Some(5),
            ..Configuration::default()
        }
    }

    fn pipeline(
        configuration: &Configuration,
    ) -> (SamplingPipeline, Arc<MemoryTransport>, Arc<PlatformTagger>) {
        let transport = Arc::new(MemoryTransport::new());
        let tagger = Arc::new(PlatformTagger::new(configuration.platform.clone()));
        let pipeline = SamplingPipeline::new(
            configuration,
            Arc::new(SystemClock::new()),
            tagger.clone(),
            transport.clone(),
        );
        (pipeline, transport, tagger)
    }

    fn synthetic(configuration: &Configuration) -> Arc<dyn SampleSource> {
        let synthesizer = StackSynthesizer::new(&configuration.platform, Some(9));
        Arc::new(SyntheticSource::new(synthesizer, "1".to_owned()))
    }

    fn context(configuration: &Configuration) -> RunContext {
        RunContext::new(configuration, GenerationMode::Integrated, "t".to_owned())
    }

    #[test]
    fn test_attach_requires_started_pipeline() {
        let configuration = configuration(ProfileType::Continuous);
        let (pipeline, _, _) = pipeline(&configuration);
        let result = pipeline.attach(Strategies {
            source: synthetic(&configuration),
            policy: Arc::new(RealTimestamps::new(ProfileType::Continuous)),
            context: context(&configuration),
        });
        assert!(matches!(result, Err(Error::MissingPipelineInternals(_))));
    }

    #[test]
    fn test_idle_pipeline_emits_nothing() {
        let configuration = configuration(ProfileType::Continuous);
        let (mut pipeline, transport, _) = pipeline(&configuration);
        pipeline.start().unwrap();
        thread::sleep(Duration::from_millis(10));
        assert!(pipeline.flush().unwrap().is_none());
        assert!(pipeline.stop().unwrap().is_none());
        assert!(transport.is_empty());
    }

    #[test]
    fn test_windowed_chunks() {
        let configuration = configuration(ProfileType::Continuous);
        let (mut pipeline, transport, _) = pipeline(&configuration);
        pipeline.start().unwrap();

        let session = Arc::new(Mutex::new(Session::new(Duration::from_secs(600))));
        let policy = Arc::new(WindowedTimestamps::new(
            ProfileType::Continuous,
            Arc::clone(&session),
            WindowScheduler::new(Some(3)),
            1_000_000.0,
            configuration.flush_interval,
        ));
        let previous = pipeline
            .attach(Strategies {
                source: synthetic(&configuration),
                policy,
                context: context(&configuration),
            })
            .unwrap();

        thread::sleep(Duration::from_millis(30));
        let unit = pipeline.flush().unwrap();
        assert_eq!(unit.as_ref().and_then(Unit::window), Some(0));
        let Some(Unit::Chunk(chunk)) = unit else {
            panic!("expected a chunk");
        };
        assert!(!chunk.samples.is_empty());
        assert!(chunk.span() <= 60.0);
        assert!(chunk
            .samples
            .iter()
            .all(|s| (1_000_000.0..1_000_060.0).contains(&s.timestamp)));
        assert_eq!(session.lock().unwrap().coverage.covered(), 2);

        pipeline.drain().unwrap();
        pipeline.attach(previous).unwrap();
        pipeline.stop().unwrap();
        assert!(!transport.is_empty());
    }

    #[test]
    fn test_empty_unit_releases_window() {
        let configuration = configuration(ProfileType::Continuous);
        let (mut pipeline, transport, _) = pipeline(&configuration);
        pipeline.start().unwrap();

        let session = Arc::new(Mutex::new(Session::new(Duration::from_secs(180))));
        let policy = Arc::new(WindowedTimestamps::new(
            ProfileType::Continuous,
            Arc::clone(&session),
            WindowScheduler::new(Some(3)),
            0.0,
            configuration.flush_interval,
        ));
        pipeline
            .attach(Strategies {
                source: Arc::new(IdleSource),
                policy,
                context: context(&configuration),
            })
            .unwrap();

        assert!(pipeline.flush().unwrap().is_none());
        {
            let session = session.lock().unwrap();
            assert!(!session.coverage.is_covered(0));
            assert!(session.coverage.is_covered(1));
            assert_eq!(session.counters.dropped, 1);
        }
        pipeline.stop().unwrap();
        assert!(transport.is_empty());
    }

    #[test]
    fn test_transaction_profiles_meet_minimum() {
        let mut configuration = configuration(ProfileType::Transaction);
        configuration.minimum_samples = 500;
        let (mut pipeline, transport, _) = pipeline(&configuration);
        pipeline.start().unwrap();
        pipeline
            .attach(Strategies {
                source: synthetic(&configuration),
                policy: Arc::new(RealTimestamps::new(ProfileType::Transaction)),
                context: context(&configuration),
            })
            .unwrap();

        thread::sleep(Duration::from_millis(10));
        let Some(Unit::Profile(profile)) = pipeline.flush().unwrap() else {
            panic!("expected a profile");
        };
        assert!(profile.unique_sample_count >= 500);
        pipeline.stop().unwrap();

        let envelopes = transport.envelopes();
        let items = &envelopes[0].items;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].header.platform, "javascript");
        assert_eq!(items[0].payload_json().unwrap()["platform"], "javascript");
        assert_eq!(
            items[1].payload_json().unwrap()["event_id"],
            items[0].payload_json().unwrap()["transactions"][0]["id"]
        );
    }
}
