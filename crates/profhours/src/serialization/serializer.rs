use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rand::Rng;
use serde_json::json;

use super::payload::{
    ChunkPayload, ChunkProfile, ChunkSample, ClientSdk, Contexts, DebugInfo, Device, FrameIndex,
    Measurement, Os, ProfileContext, ProfilePayload, ProfileSample, Runtime, Span, StackIndex,
    Tags, ThreadMetadata, TraceContext, TransactionEvent, TransactionProfile, TransactionRef,
    WireFrame,
};
use super::{random_span_id, rfc3339};
use crate::category::CategoryTagger;
use crate::profile::{Chunk, Profile};
use crate::sample::{Frame, Stack, StackId};
use crate::session::configuration::{Configuration, GenerationMode, ProfileType};

const SDK_NAME: &str = "profhours";
const THREAD_NAME: &str = "MainThread";

/// Run-wide values stamped into every payload.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub mode: GenerationMode,
    pub profile_type: ProfileType,
    pub plan: String,
    pub duration_hours: f64,
    pub release: String,
    pub environment: String,
    /// Short id shared by every unit of one run.
    pub test_run_id: String,
}

impl RunContext {
    pub fn new(configuration: &Configuration, mode: GenerationMode, test_run_id: String) -> Self {
        Self {
            mode,
            profile_type: configuration.profile_type,
            plan: configuration.plan.to_string(),
            duration_hours: configuration.duration_hours(),
            release: configuration.release.clone(),
            environment: configuration.environment.clone(),
            test_run_id,
        }
    }

    fn tags(&self, tagger: &dyn CategoryTagger) -> Tags {
        let mut tags = tagger.tags();
        tags.insert("profile_type".to_owned(), self.profile_type.to_string());
        tags.insert("synthetic".to_owned(), "true".to_owned());
        tags.insert(
            "direct_generation".to_owned(),
            (self.mode == GenerationMode::Direct).to_string(),
        );
        tags.insert("mock_duration_hours".to_owned(), self.duration_hours.to_string());
        tags.insert("mock_timestamps".to_owned(), "past".to_owned());
        tags.insert("plan".to_owned(), self.plan.clone());
        tags.insert("test_run_id".to_owned(), self.test_run_id.clone());
        tags
    }

    fn debug_info(&self, tagger: &dyn CategoryTagger, now: f64) -> DebugInfo {
        BTreeMap::from([
            ("spoofed_platform".to_owned(), json!(tagger.platform().as_str())),
            ("current_timestamp".to_owned(), json!(rfc3339(now))),
            ("mock_duration_hours".to_owned(), json!(self.duration_hours.to_string())),
            ("generation_mode".to_owned(), json!(self.mode.to_string())),
            ("test_run_id".to_owned(), json!(self.test_run_id)),
        ])
    }
}

/// Frame and stack tables of one payload.
///
/// Stacks are deduplicated by id, frames by value.
#[derive(Debug, Default)]
struct StackTable {
    frames: Vec<WireFrame>,
    frame_indices: HashMap<Frame, FrameIndex>,
    stacks: Vec<Vec<FrameIndex>>,
    stack_indices: HashMap<StackId, StackIndex>,
    thread_metadata: BTreeMap<String, ThreadMetadata>,
}

impl StackTable {
    /// Returns the index of the stack in `stacks`, registering it and its
    /// frames on first sight.
    fn stack_index_for(&mut self, stack: &Arc<Stack>) -> StackIndex {
        if let Some(index) = self.stack_indices.get(&stack.id) {
            return *index;
        }
        let frames = stack
            .frames
            .iter()
            .map(|frame| self.frame_index_for(frame))
            .collect();
        self.stacks.push(frames);
        let index = self.stacks.len() - 1;
        self.stack_indices.insert(stack.id.clone(), index);
        index
    }

    fn frame_index_for(&mut self, frame: &Frame) -> FrameIndex {
        if let Some(index) = self.frame_indices.get(frame) {
            return *index;
        }
        self.frames.push(WireFrame {
            function: frame.function.clone(),
            filename: frame.file_path.clone(),
            abs_path: frame.file_path.clone(),
            lineno: frame.line,
            module: frame.module.clone(),
            in_app: frame.is_application_code,
        });
        let index = self.frames.len() - 1;
        self.frame_indices.insert(frame.clone(), index);
        index
    }

    fn register_thread(&mut self, thread_id: &str) {
        if !self.thread_metadata.contains_key(thread_id) {
            self.thread_metadata.insert(
                thread_id.to_owned(),
                ThreadMetadata {
                    name: THREAD_NAME.to_owned(),
                },
            );
        }
    }
}

pub struct ChunkSerializer;

impl ChunkSerializer {
    pub fn serialize(
        chunk: &Chunk,
        tagger: &dyn CategoryTagger,
        context: &RunContext,
        now: f64,
    ) -> ChunkPayload {
        let mut table = StackTable::default();
        let samples = chunk
            .samples
            .iter()
            .map(|sample| {
                table.register_thread(&sample.thread_id);
                ChunkSample {
                    timestamp: sample.timestamp,
                    thread_id: sample.thread_id.clone(),
                    stack_id: table.stack_index_for(&sample.stack),
                }
            })
            .collect();

        let mut tags = context.tags(tagger);
        let mut debug_info = context.debug_info(tagger, now);
        if let Some(window) = chunk.window {
            tags.insert("window_index".to_owned(), window.to_string());
            debug_info.insert("window_index".to_owned(), json!(window));
        }
        if let Some(first) = chunk.samples.first() {
            debug_info.insert("chunk_timestamp".to_owned(), json!(rfc3339(first.timestamp)));
        }

        ChunkPayload {
            chunk_id: chunk.chunk_id.clone(),
            profiler_id: chunk.profiler_session_id.clone(),
            platform: tagger.platform().to_string(),
            version: "2".to_owned(),
            release: context.release.clone(),
            environment: context.environment.clone(),
            client_sdk: ClientSdk {
                name: SDK_NAME.to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
            },
            profile: ChunkProfile {
                frames: table.frames,
                stacks: table.stacks,
                samples,
                thread_metadata: table.thread_metadata,
            },
            tags,
            debug_info,
        }
    }
}

pub struct ProfileSerializer;

impl ProfileSerializer {
    /// Serializes a profile together with the transaction event it belongs to.
    pub fn serialize<R: Rng>(
        profile: &Profile,
        index: u64,
        tagger: &dyn CategoryTagger,
        context: &RunContext,
        now: f64,
        rng: &mut R,
    ) -> (ProfilePayload, TransactionEvent) {
        let mut table = StackTable::default();
        table.register_thread(&profile.active_thread_id);
        let samples = profile
            .samples
            .iter()
            .map(|sample| {
                table.register_thread(&sample.thread_id);
                ProfileSample {
                    elapsed_since_start_ns: sample.elapsed_ns.to_string(),
                    thread_id: sample.thread_id.clone(),
                    stack_id: table.stack_index_for(&sample.stack),
                }
            })
            .collect();

        let transaction_name = format!("synthetic-transaction-{}", index);
        let platform = tagger.platform().to_string();
        let start = rfc3339(profile.start_timestamp);

        let mut tags = context.tags(tagger);
        tags.insert("transaction_id".to_owned(), profile.transaction_id.clone());
        let mut debug_info = context.debug_info(tagger, now);
        debug_info.insert("transaction_index".to_owned(), json!(index));
        debug_info.insert("profile_timestamp".to_owned(), json!(start));
        if let Some(window) = profile.window {
            tags.insert("window_index".to_owned(), window.to_string());
        }

        let payload = ProfilePayload {
            event_id: profile.profile_id.clone(),
            platform: platform.clone(),
            version: "1".to_owned(),
            timestamp: start.clone(),
            environment: context.environment.clone(),
            release: context.release.clone(),
            device: Device {
                architecture: std::env::consts::ARCH.to_owned(),
            },
            os: Os {
                name: std::env::consts::OS.to_owned(),
            },
            runtime: Runtime {
                name: SDK_NAME.to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
            },
            profile: TransactionProfile {
                frames: table.frames,
                stacks: table.stacks,
                samples,
                thread_metadata: table.thread_metadata,
            },
            transactions: vec![TransactionRef {
                id: profile.transaction_id.clone(),
                name: transaction_name.clone(),
                relative_start_ns: "0".to_owned(),
                relative_end_ns: profile.declared_duration_ns.to_string(),
                trace_id: profile.trace_id.clone(),
                active_thread_id: profile.active_thread_id.clone(),
            }],
            tags: tags.clone(),
            debug_info,
        };

        let end_timestamp = profile.start_timestamp + profile.declared_duration_ns as f64 / 1e9;
        let root_span_id = random_span_id(rng);
        let mut event_tags = tags;
        event_tags.insert("transaction".to_owned(), transaction_name.clone());
        event_tags.insert("profile_id".to_owned(), profile.profile_id.clone());

        let event = TransactionEvent {
            event_id: profile.transaction_id.clone(),
            event_type: "transaction".to_owned(),
            transaction: transaction_name,
            platform,
            timestamp: rfc3339(end_timestamp),
            start_timestamp: start,
            contexts: Contexts {
                trace: TraceContext {
                    trace_id: profile.trace_id.clone(),
                    span_id: root_span_id.clone(),
                    op: "synthetic".to_owned(),
                    status: "ok".to_owned(),
                },
                profile: ProfileContext {
                    profile_id: profile.profile_id.clone(),
                },
            },
            tags: event_tags,
            spans: vec![Span {
                span_id: random_span_id(rng),
                parent_span_id: root_span_id,
                trace_id: profile.trace_id.clone(),
                start_timestamp: profile.start_timestamp,
                timestamp: (profile.start_timestamp + end_timestamp) / 2.0,
                description: "Synthetic child span".to_owned(),
                op: "child-operation".to_owned(),
            }],
            measurements: BTreeMap::from([(
                "synthetic_metric".to_owned(),
                Measurement {
                    value: rng.gen_range(10..=100) as f64,
                    unit: "millisecond".to_owned(),
                },
            )]),
        };

        (payload, event)
    }
}
