use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::assembler::{ChunkAssembler, ProfileAssembler};
use crate::backtrace::StackSynthesizer;
use crate::category::CategoryTagger;
use crate::clock::Clock;
use crate::envelope::{Envelope, Transport};
use crate::error::Error;
use crate::pipeline::{SamplingPipeline, Strategies};
use crate::profile::{ChunkHeader, ProfileHeader, Unit};
use crate::sample::SampleTime;
use crate::serialization::random_id;
use crate::serialization::serializer::RunContext;
use crate::session::configuration::{Configuration, GenerationMode, ProfileType};
use crate::session::Session;
use crate::source::{main_thread_id, SyntheticSource};
use crate::timestamp::{
    past_base, unit_span, WindowedTimestamps, MAX_TRANSACTION_SPAN, WINDOW_FILL,
};
use crate::validity::ensure_minimum;
use crate::window::{total_windows, WindowScheduler, WINDOW_LENGTH};
use crate::Result;

/// Minimum time between two progress lines.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
const MIN_POLL_INTERVAL: Duration = Duration::from_micros(200);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    /// Direct mode: a unit is being built.
    Building,
    /// Direct mode: the last unit was submitted.
    Emitted,
    /// Integrated mode: strategies are attached and the pipeline is running.
    Armed,
    /// Integrated mode: the last live unit is being flushed.
    Draining,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Every window was generated.
    Completed,
    CoverageThreshold,
    TargetReached,
    Timeout,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub mode: GenerationMode,
    pub units_emitted: u64,
    pub total_windows: usize,
    pub covered_windows: usize,
    pub samples: u64,
    pub elapsed: Duration,
    pub stop_reason: StopReason,
}

impl RunSummary {
    pub fn coverage(&self) -> f64 {
        self.covered_windows as f64 / self.total_windows.max(1) as f64
    }

    fn new(mode: GenerationMode, session: &Session, elapsed: Duration, stop_reason: StopReason) -> Self {
        Self {
            mode,
            units_emitted: session.counters.emitted,
            total_windows: session.total_windows(),
            covered_windows: session.coverage.covered(),
            samples: session.counters.samples,
            elapsed,
            stop_reason,
        }
    }
}

/// Rate-limited progress logging.
struct Progress {
    started: Duration,
    last_report: Option<Duration>,
    expected: usize,
}

impl Progress {
    fn new(started: Duration, expected: usize) -> Self {
        Self {
            started,
            last_report: None,
            expected,
        }
    }

    fn report(&mut self, now: Duration, session: &Session, force: bool) {
        let due = self
            .last_report
            .map_or(true, |last| now.saturating_sub(last) >= PROGRESS_INTERVAL);
        if !due && !force {
            return;
        }
        self.last_report = Some(now);

        let emitted = session.counters.emitted;
        let elapsed = now.saturating_sub(self.started).as_secs_f64();
        let rate = if elapsed > 0.0 {
            emitted as f64 / elapsed
        } else {
            0.0
        };
        let remaining = (self.expected as u64).saturating_sub(emitted);
        let eta = if rate > 0.0 {
            remaining as f64 / rate
        } else {
            0.0
        };
        log::info!(
            "Progress: {}/{} units ({:.1}%, {:.2} hours covered), Rate: {:.1} units/s, ETA: {:.1}s",
            emitted,
            self.expected,
            emitted as f64 / self.expected.max(1) as f64 * 100.0,
            session.coverage.covered() as f64 * WINDOW_LENGTH.as_secs_f64() / 3600.0,
            rate,
            eta
        );
    }
}

/// Drives one generation run, directly or through a live pipeline.
pub struct Orchestrator {
    configuration: Configuration,
    clock: Arc<dyn Clock>,
    tagger: Arc<dyn CategoryTagger>,
    transport: Arc<dyn Transport>,
    cancelled: Arc<AtomicBool>,
    state: State,
    rng: StdRng,
}

impl Orchestrator {
    pub fn new(
        configuration: Configuration,
        clock: Arc<dyn Clock>,
        tagger: Arc<dyn CategoryTagger>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let rng = match configuration.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            configuration,
            clock,
            tagger,
            transport,
            cancelled: Arc::new(AtomicBool::new(false)),
            state: State::Idle,
            rng,
        }
    }

    /// Setting the returned flag stops the run before its next iteration.
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Runs in the configured mode. Integrated mode without a pipeline falls
    /// back to direct generation.
    pub fn run(&mut self, pipeline: Option<&SamplingPipeline>) -> Result<RunSummary> {
        match (self.configuration.mode, pipeline) {
            (GenerationMode::Direct, _) => self.run_direct(),
            (GenerationMode::Integrated, Some(pipeline)) => self.run_integrated(pipeline),
            (GenerationMode::Integrated, None) => {
                log::warn!("No sampling pipeline available. Falling back to direct generation.");
                self.run_direct()
            }
        }
    }

    /// Builds one unit per window synthetically and submits each as it is
    /// finished.
    pub fn run_direct(&mut self) -> Result<RunSummary> {
        let started = self.clock.now();
        let duration = self.configuration.duration;
        let total = total_windows(duration);
        let mut session = Session::new(duration);
        let mut scheduler = WindowScheduler::new(self.configuration.seed);
        let mut synthesizer = StackSynthesizer::new(&self.configuration.platform, Some(self.rng.gen()));
        let test_run_id = self.test_run_id();
        let context = RunContext::new(&self.configuration, GenerationMode::Direct, test_run_id);
        let profiler_id = random_id(&mut self.rng);
        let thread_id = main_thread_id();
        let base = past_base(self.clock.unix_now(), total);
        let mut progress = Progress::new(started, total);

        log::info!(
            "Generating {:.2} hours of {} profiling data directly: {} units of {} samples on {} ({:?})",
            self.configuration.duration_hours(),
            self.configuration.profile_type,
            total,
            self.configuration.samples_per_unit,
            self.tagger.platform(),
            self.tagger.category()
        );

        let mut stop_reason = StopReason::Completed;
        for _ in 0..total {
            if let Some(reason) = self.interrupted(started) {
                stop_reason = reason;
                break;
            }
            self.state = State::Building;

            let window = scheduler.next_window(&mut session);
            let unit = match self.configuration.profile_type {
                ProfileType::Continuous => {
                    self.direct_chunk(window, base, &profiler_id, &thread_id, &mut synthesizer)
                }
                ProfileType::Transaction => {
                    self.direct_profile(window, base, &thread_id, &mut synthesizer)
                }
            };

            let index = session.counters.emitted;
            match Envelope::for_unit(
                &unit,
                index,
                &*self.tagger,
                &context,
                self.clock.unix_now(),
                &mut self.rng,
            ) {
                Ok(envelope) => {
                    self.transport.submit(envelope);
                    session.counters.emitted += 1;
                    session.counters.samples += unit.sample_count() as u64;
                }
                Err(e) => {
                    log::warn!("Failed to serialize unit for window {}: {}", window, e);
                    scheduler.release(&mut session, window);
                }
            }
            self.state = State::Emitted;
            progress.report(self.clock.now(), &session, false);
        }

        progress.report(self.clock.now(), &session, true);
        self.state = State::Stopped;
        Ok(self.finish(GenerationMode::Direct, &session, started, stop_reason))
    }

    /// Attaches synthetic strategies to a running pipeline and flushes it
    /// until enough windows are covered.
    pub fn run_integrated(&mut self, pipeline: &SamplingPipeline) -> Result<RunSummary> {
        let started = self.clock.now();
        let duration = self.configuration.duration;
        let total = total_windows(duration);
        let session = Arc::new(Mutex::new(Session::new(duration)));
        let cadence = flush_cadence(
            pipeline.flush_interval(),
            pipeline.sampling_interval(),
            self.configuration.generation_timeout,
            total,
        );
        let policy = Arc::new(WindowedTimestamps::new(
            self.configuration.profile_type,
            Arc::clone(&session),
            WindowScheduler::new(self.configuration.seed),
            past_base(self.clock.unix_now(), total),
            cadence,
        ));
        let synthesizer = StackSynthesizer::new(&self.configuration.platform, Some(self.rng.gen()));
        let test_run_id = self.test_run_id();
        let strategies = Strategies {
            source: Arc::new(SyntheticSource::new(synthesizer, main_thread_id())),
            policy,
            context: RunContext::new(&self.configuration, GenerationMode::Integrated, test_run_id),
        };

        let previous = match pipeline.attach(strategies) {
            Ok(previous) => previous,
            Err(Error::MissingPipelineInternals(what)) => {
                log::warn!(
                    "Sampling pipeline is missing its {}. Falling back to direct generation.",
                    what
                );
                return self.run_direct();
            }
            Err(e) => return Err(e),
        };
        self.state = State::Armed;
        log::info!(
            "Generating {:.2} hours of {} profiling data through the sampling pipeline: {} windows, flushing every {:?}",
            self.configuration.duration_hours(),
            self.configuration.profile_type,
            total,
            cadence
        );

        let poll = (cadence / 10).clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        let mut progress = Progress::new(started, total);
        let stop_reason = loop {
            if let Some(reason) = self.interrupted(started) {
                break reason;
            }
            if let Some(reason) = self.target_met(&lock(&session)) {
                break reason;
            }

            if pipeline.flush_due(cadence) {
                match pipeline.flush() {
                    Ok(Some(unit)) => record(&session, &unit),
                    Ok(None) => {}
                    Err(e) => log::warn!("Failed to flush live unit: {}", e),
                }
            } else {
                thread::sleep(poll);
            }
            progress.report(self.clock.now(), &lock(&session), false);
        };

        self.state = State::Draining;
        match pipeline.drain() {
            Ok(Some(unit)) => record(&session, &unit),
            Ok(None) => {}
            Err(e) => log::warn!("Failed to flush final live unit: {}", e),
        }
        if let Err(e) = pipeline.attach(previous) {
            log::warn!("Failed to restore pipeline strategies: {}", e);
        }

        let session = lock(&session);
        progress.report(self.clock.now(), &session, true);
        self.state = State::Stopped;
        Ok(self.finish(GenerationMode::Integrated, &session, started, stop_reason))
    }

    fn direct_chunk(
        &mut self,
        window: usize,
        base: f64,
        profiler_id: &str,
        thread_id: &str,
        synthesizer: &mut StackSynthesizer,
    ) -> Unit {
        let header = ChunkHeader {
            chunk_id: random_id(&mut self.rng),
            profiler_session_id: profiler_id.to_owned(),
            platform: self.tagger.platform().clone(),
            window: Some(window),
        };
        let window_start = base + window as f64 * WINDOW_LENGTH.as_secs_f64();
        let count = self.samples_per_unit();

        let mut assembler = ChunkAssembler::new(header, None);
        for i in 0..count {
            let offset = i as f64 / count as f64 * WINDOW_FILL;
            assembler.write(
                synthesizer.generate_sample(thread_id),
                SampleTime::Absolute(window_start + offset),
            );
        }
        Unit::Chunk(assembler.finalize())
    }

    fn direct_profile(
        &mut self,
        window: usize,
        base: f64,
        thread_id: &str,
        synthesizer: &mut StackSynthesizer,
    ) -> Unit {
        let span = unit_span(self.configuration.duration, total_windows(self.configuration.duration));
        let header = ProfileHeader {
            profile_id: random_id(&mut self.rng),
            transaction_id: random_id(&mut self.rng),
            trace_id: random_id(&mut self.rng),
            platform: self.tagger.platform().clone(),
            start_timestamp: base + window as f64 * span.as_secs_f64(),
            window: Some(window),
            declared_duration_ns: span.as_nanos() as u64,
            active_thread_id: thread_id.to_owned(),
        };
        let spread = span.min(MAX_TRANSACTION_SPAN).as_nanos() as f64;
        let count = self.samples_per_unit();

        let mut assembler = ProfileAssembler::new(header, None);
        for i in 0..count {
            let offset = (i as f64 / count as f64 * spread) as u64;
            assembler.write(synthesizer.generate_sample(thread_id), SampleTime::Relative(offset));
        }
        Unit::Profile(ensure_minimum(assembler.finalize(), self.configuration.minimum_samples))
    }

    fn samples_per_unit(&self) -> usize {
        self.configuration.samples_per_unit.max(1)
    }

    fn test_run_id(&mut self) -> String {
        let mut id = random_id(&mut self.rng);
        id.truncate(8);
        id
    }

    fn interrupted(&self, started: Duration) -> Option<StopReason> {
        if self.cancelled.load(Ordering::Relaxed) {
            log::info!("Generation cancelled");
            return Some(StopReason::Cancelled);
        }
        if self.clock.now().saturating_sub(started) >= self.configuration.generation_timeout {
            log::warn!(
                "Generation timed out after {:?}",
                self.configuration.generation_timeout
            );
            return Some(StopReason::Timeout);
        }
        None
    }

    /// Windows are marked when a live unit opens, so the open unit's window
    /// is not counted: it may still be dropped by the final drain.
    fn target_met(&self, session: &Session) -> Option<StopReason> {
        let emitted = session.counters.emitted;
        if emitted == 0 {
            return None;
        }
        let total = session.total_windows();
        if emitted >= total as u64 {
            return Some(StopReason::TargetReached);
        }
        let settled = session.coverage.covered().saturating_sub(1) as f64 / total as f64;
        if settled >= self.configuration.coverage_target {
            return Some(StopReason::CoverageThreshold);
        }
        None
    }

    fn finish(
        &self,
        mode: GenerationMode,
        session: &Session,
        started: Duration,
        stop_reason: StopReason,
    ) -> RunSummary {
        let summary = RunSummary::new(mode, session, self.clock.now().saturating_sub(started), stop_reason);
        log::info!(
            "Generation complete: {} units covering {}/{} windows ({:.1}%), {} samples in {:.2}s ({:?})",
            summary.units_emitted,
            summary.covered_windows,
            summary.total_windows,
            summary.coverage() * 100.0,
            summary.samples,
            summary.elapsed.as_secs_f64(),
            summary.stop_reason
        );
        summary
    }
}

/// Flush cadence of an integrated run: the pipeline's flush interval,
/// shortened so that every window fits into half the generation timeout,
/// but never below two sampling ticks.
pub fn flush_cadence(
    flush_interval: Duration,
    sampling_interval: Duration,
    timeout: Duration,
    total_windows: usize,
) -> Duration {
    let budget = timeout.div_f64(2.0 * total_windows.max(1) as f64);
    let floor = (sampling_interval * 2).max(MIN_POLL_INTERVAL);
    if budget < floor {
        log::warn!(
            "A {:?} timeout is too short to flush {} windows; expect partial coverage",
            timeout,
            total_windows
        );
    }
    flush_interval.min(budget.max(floor))
}

fn lock(session: &Mutex<Session>) -> std::sync::MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

fn record(session: &Mutex<Session>, unit: &Unit) {
    let mut session = lock(session);
    session.counters.emitted += 1;
    session.counters.samples += unit.sample_count() as u64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{Platform, PlatformTagger};
    use crate::clock::ManualClock;
    use crate::envelope::{ItemType, MemoryTransport};

    const NOW: f64 = 1_700_000_000.0;

    fn orchestrator(configuration: Configuration) -> (Orchestrator, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let tagger = Arc::new(PlatformTagger::new(configuration.platform.clone()));
        let orchestrator = Orchestrator::new(
            configuration,
            Arc::new(ManualClock::new(NOW)),
            tagger,
            transport.clone(),
        );
        (orchestrator, transport)
    }

    #[test]
    fn test_direct_continuous_one_hour() {
        let configuration = Configuration {
            seed: Some(1),
            ..Configuration::default()
        };
        let (mut orchestrator, transport) = orchestrator(configuration);
        let summary = orchestrator.run_direct().unwrap();

        assert_eq!(summary.stop_reason, StopReason::Completed);
        assert_eq!(summary.units_emitted, 60);
        assert_eq!(summary.covered_windows, 60);
        assert_eq!(summary.samples, 60 * 20);
        assert_eq!(orchestrator.state(), State::Stopped);

        let envelopes = transport.envelopes();
        assert_eq!(envelopes.len(), 60);
        let base = NOW - 3600.0;
        for (window, envelope) in envelopes.iter().enumerate() {
            let item = &envelope.items[0];
            assert_eq!(item.header.item_type, ItemType::ProfileChunk);
            let payload = item.payload_json().unwrap();
            assert_eq!(payload["platform"], item.header.platform.as_str());
            assert_eq!(payload["tags"]["window_index"], window.to_string());

            let samples = payload["profile"]["samples"].as_array().unwrap();
            assert_eq!(samples.len(), 20);
            let first = samples[0]["timestamp"].as_f64().unwrap();
            let last = samples[19]["timestamp"].as_f64().unwrap();
            let window_start = base + window as f64 * 60.0;
            assert!((first - window_start).abs() < 1e-6);
            assert!((last - (window_start + 19.0 * 59.0 / 20.0)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_direct_transaction_ninety_minutes() {
        let configuration = Configuration {
            profile_type: ProfileType::Transaction,
            platform: Platform::new("python"),
            duration: Duration::from_secs(5400),
            seed: Some(2),
            ..Configuration::default()
        };
        let (mut orchestrator, transport) = orchestrator(configuration);
        let summary = orchestrator.run_direct().unwrap();
        assert_eq!(summary.units_emitted, 90);

        let envelopes = transport.envelopes();
        let items = &envelopes[1].items;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].header.item_type, ItemType::Profile);
        assert_eq!(items[1].header.item_type, ItemType::Transaction);
        assert_eq!(items[0].header.platform, "python");

        let profile = items[0].payload_json().unwrap();
        let event = items[1].payload_json().unwrap();
        assert_eq!(profile["transactions"][0]["relative_end_ns"], "60000000000");
        assert_eq!(profile["transactions"][0]["id"], event["event_id"]);
        assert_eq!(event["contexts"]["profile"]["profile_id"], profile["event_id"]);
        assert_eq!(profile["profile"]["samples"][1]["elapsed_since_start_ns"], "1250000000");
        assert_eq!(envelopes[1].header.event_id.as_deref(), event["event_id"].as_str());
    }

    #[test]
    fn test_zero_duration_emits_one_unit() {
        let configuration = Configuration {
            duration: Duration::ZERO,
            seed: Some(3),
            ..Configuration::default()
        };
        let (mut orchestrator, transport) = orchestrator(configuration);
        let summary = orchestrator.run_direct().unwrap();
        assert_eq!(summary.units_emitted, 1);
        assert_eq!(summary.total_windows, 1);
        assert_eq!(transport.len(), 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let (mut orchestrator, transport) = orchestrator(Configuration::default());
        orchestrator.cancellation().store(true, Ordering::Relaxed);
        let summary = orchestrator.run_direct().unwrap();
        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        assert_eq!(summary.units_emitted, 0);
        assert!(transport.is_empty());
    }

    #[test]
    fn test_flush_cadence_fits_timeout() {
        let ms = Duration::from_millis;
        // One hour comfortably fits the default cadence.
        assert_eq!(flush_cadence(ms(100), ms(3), Duration::from_secs(60), 60), ms(100));
        // A day of windows must flush every 60s / 2880.
        let cadence = flush_cadence(ms(100), ms(3), Duration::from_secs(60), 1440);
        assert!(cadence < ms(21) && cadence > ms(20));
        // Never below two sampling ticks, even when the timeout is too short.
        assert_eq!(flush_cadence(ms(100), ms(3), Duration::from_secs(1), 100_000), ms(6));
    }

    #[test]
    fn test_integrated_without_pipeline_falls_back() {
        let configuration = Configuration {
            mode: GenerationMode::Integrated,
            duration: Duration::from_secs(120),
            seed: Some(4),
            ..Configuration::default()
        };
        let (mut orchestrator, transport) = orchestrator(configuration);
        let summary = orchestrator.run(None).unwrap();
        assert_eq!(summary.mode, GenerationMode::Direct);
        assert_eq!(transport.len(), 2);
    }
}
