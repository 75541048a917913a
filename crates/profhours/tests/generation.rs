//! End-to-end runs of the orchestrator against an in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use profhours::category::PlatformTagger;
use profhours::clock::{ManualClock, SystemClock};
use profhours::envelope::{Envelope, ItemType, MemoryTransport};
use profhours::orchestrator::{Orchestrator, RunSummary, StopReason};
use profhours::pipeline::SamplingPipeline;
use profhours::session::configuration::{Configuration, GenerationMode, Preset, ProfileType};

const NOW: f64 = 1_750_000_000.0;

fn run_direct(configuration: Configuration) -> (RunSummary, Vec<Envelope>) {
    let transport = Arc::new(MemoryTransport::new());
    let tagger = Arc::new(PlatformTagger::new(configuration.platform.clone()));
    let mut orchestrator = Orchestrator::new(
        configuration,
        Arc::new(ManualClock::new(NOW)),
        tagger,
        transport.clone(),
    );
    let summary = orchestrator.run(None).unwrap();
    (summary, transport.envelopes())
}

fn integrated_configuration(profile_type: ProfileType) -> Configuration {
    Configuration {
        profile_type,
        mode: GenerationMode::Integrated,
        duration: Duration::from_secs(300),
        sampling_interval: Duration::from_millis(1),
        flush_interval: Duration::from_millis(20),
        generation_timeout: Duration::from_secs(20),
        seed: Some(17),
        ..Configuration::default()
    }
}

fn chunk_timestamps(envelope: &Envelope) -> Vec<f64> {
    let payload = envelope.items[0].payload_json().unwrap();
    payload["profile"]["samples"]
        .as_array()
        .unwrap()
        .iter()
        .map(|sample| sample["timestamp"].as_f64().unwrap())
        .collect()
}

#[test]
fn preset_drives_ui_continuous_run() {
    let mut configuration = Configuration {
        duration: Duration::from_secs(600),
        seed: Some(1),
        ..Configuration::default()
    };
    configuration.apply_preset("DIRECT_AM2_CONTINUOUS_UI".parse::<Preset>().unwrap());
    let (summary, envelopes) = run_direct(configuration);

    assert_eq!(summary.mode, GenerationMode::Direct);
    assert_eq!(summary.units_emitted, 10);
    assert_eq!(summary.coverage(), 1.0);
    for envelope in envelopes.iter() {
        let item = &envelope.items[0];
        let payload = item.payload_json().unwrap();
        assert_eq!(item.header.item_type, ItemType::ProfileChunk);
        assert_eq!(item.header.platform, "javascript");
        assert_eq!(payload["platform"], "javascript");
        assert_eq!(payload["tags"]["is_ui_platform"], "true");
        assert_eq!(payload["tags"]["plan"], "am2");
        assert_eq!(payload["tags"]["direct_generation"], "true");
    }
}

#[test]
fn direct_timestamps_stay_in_the_past() {
    let configuration = Configuration {
        duration: Duration::from_secs(3 * 3600 + 30),
        seed: Some(2),
        ..Configuration::default()
    };
    let (summary, envelopes) = run_direct(configuration);
    assert_eq!(summary.units_emitted, 181);

    let earliest = NOW - 181.0 * 60.0;
    for envelope in envelopes.iter() {
        let timestamps = chunk_timestamps(envelope);
        assert!(timestamps.iter().all(|t| (earliest..NOW).contains(t)));
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[test]
fn backend_transaction_profiles_meet_minimum() {
    let configuration = Configuration {
        profile_type: ProfileType::Transaction,
        platform: profhours::category::Platform::new("python"),
        duration: Duration::from_secs(1800),
        samples_per_unit: 1,
        minimum_samples: 3,
        seed: Some(3),
        ..Configuration::default()
    };
    let (summary, envelopes) = run_direct(configuration);
    assert_eq!(summary.units_emitted, 30);
    assert_eq!(summary.samples, 30 * 3);

    for envelope in envelopes.iter() {
        let profile = envelope.items[0].payload_json().unwrap();
        let offsets: Vec<u64> = profile["profile"]["samples"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["elapsed_since_start_ns"].as_str().unwrap().parse().unwrap())
            .collect();
        assert_eq!(offsets, vec![0, 500_000, 1_000_000]);
        assert_eq!(profile["tags"]["is_ui_platform"], "false");
        assert_eq!(envelope.items[1].header.item_type, ItemType::Transaction);
        assert_eq!(envelope.items[1].header.platform, "python");
    }
}

#[test]
fn integrated_continuous_run() {
    let configuration = integrated_configuration(ProfileType::Continuous);
    let transport = Arc::new(MemoryTransport::new());
    let clock = Arc::new(SystemClock::new());
    let tagger = Arc::new(PlatformTagger::new(configuration.platform.clone()));

    let mut pipeline = SamplingPipeline::new(&configuration, clock.clone(), tagger.clone(), transport.clone());
    pipeline.start().unwrap();
    let mut orchestrator = Orchestrator::new(configuration, clock, tagger, transport.clone());
    let summary = orchestrator.run(Some(&pipeline)).unwrap();
    pipeline.stop().unwrap();

    assert_eq!(summary.mode, GenerationMode::Integrated);
    assert!(matches!(
        summary.stop_reason,
        StopReason::TargetReached | StopReason::CoverageThreshold
    ));
    assert!((1..=2 * summary.total_windows as u64).contains(&summary.units_emitted));
    assert!(summary.covered_windows <= summary.total_windows);

    let envelopes = transport.envelopes();
    assert!(envelopes.len() as u64 >= summary.units_emitted);
    for envelope in envelopes.iter() {
        let timestamps = chunk_timestamps(envelope);
        assert!(!timestamps.is_empty());
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
        assert!(timestamps[timestamps.len() - 1] - timestamps[0] <= 60.0);
    }
}

#[test]
fn integrated_run_covers_many_windows_within_timeout() {
    let configuration = Configuration {
        duration: Duration::from_secs(6 * 3600),
        generation_timeout: Duration::from_secs(8),
        flush_interval: Duration::from_millis(100),
        ..integrated_configuration(ProfileType::Continuous)
    };
    let transport = Arc::new(MemoryTransport::new());
    let clock = Arc::new(SystemClock::new());
    let tagger = Arc::new(PlatformTagger::new(configuration.platform.clone()));

    let mut pipeline = SamplingPipeline::new(&configuration, clock.clone(), tagger.clone(), transport.clone());
    pipeline.start().unwrap();
    let mut orchestrator = Orchestrator::new(configuration, clock, tagger, transport.clone());
    let summary = orchestrator.run(Some(&pipeline)).unwrap();
    pipeline.stop().unwrap();

    assert_eq!(summary.total_windows, 360);
    assert!(matches!(
        summary.stop_reason,
        StopReason::TargetReached | StopReason::CoverageThreshold
    ));
    assert!(summary.coverage() >= 0.95, "coverage {}", summary.coverage());
    assert!(summary.elapsed < Duration::from_secs(8));
}

#[test]
fn integrated_transaction_run() {
    let configuration = integrated_configuration(ProfileType::Transaction);
    let transport = Arc::new(MemoryTransport::new());
    let clock = Arc::new(SystemClock::new());
    let tagger = Arc::new(PlatformTagger::new(configuration.platform.clone()));

    let mut pipeline = SamplingPipeline::new(&configuration, clock.clone(), tagger.clone(), transport.clone());
    pipeline.start().unwrap();
    let mut orchestrator = Orchestrator::new(configuration, clock, tagger, transport.clone());
    let summary = orchestrator.run(Some(&pipeline)).unwrap();
    pipeline.stop().unwrap();

    assert!(summary.units_emitted >= 1);
    for envelope in transport.envelopes().iter() {
        let profile = envelope.items[0].payload_json().unwrap();
        let event = envelope.items[1].payload_json().unwrap();
        assert!(profile["profile"]["samples"].as_array().unwrap().len() >= 3);
        assert_eq!(profile["transactions"][0]["id"], event["event_id"]);
        assert_eq!(profile["tags"]["direct_generation"], "false");
    }
}

#[test]
fn integrated_falls_back_when_pipeline_not_started() {
    let configuration = Configuration {
        duration: Duration::from_secs(240),
        ..integrated_configuration(ProfileType::Continuous)
    };
    let transport = Arc::new(MemoryTransport::new());
    let clock = Arc::new(SystemClock::new());
    let tagger = Arc::new(PlatformTagger::new(configuration.platform.clone()));

    let pipeline = SamplingPipeline::new(&configuration, clock.clone(), tagger.clone(), transport.clone());
    let mut orchestrator = Orchestrator::new(configuration, clock, tagger, transport.clone());
    let summary = orchestrator.run(Some(&pipeline)).unwrap();

    assert_eq!(summary.mode, GenerationMode::Direct);
    assert_eq!(summary.units_emitted, 4);
    assert_eq!(transport.len(), 4);
}
