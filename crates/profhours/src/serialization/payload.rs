use std::collections::BTreeMap;

use serde_json::Value;

pub type FrameIndex = usize;
pub type StackIndex = usize;
pub type Tags = BTreeMap<String, String>;
pub type DebugInfo = BTreeMap<String, Value>;

/// A frame as ingestion expects it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    pub function: String,
    pub filename: String,
    pub abs_path: String,
    pub lineno: u32,
    pub module: String,
    pub in_app: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreadMetadata {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientSdk {
    pub name: String,
    pub version: String,
}

/// Payload of a `profile_chunk` item.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub chunk_id: String,
    pub profiler_id: String,
    pub platform: String,
    pub version: String,
    pub release: String,
    pub environment: String,
    pub client_sdk: ClientSdk,
    pub profile: ChunkProfile,
    pub tags: Tags,
    pub debug_info: DebugInfo,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkProfile {
    pub frames: Vec<WireFrame>,
    /// Each stack lists frame indices, leaf first.
    pub stacks: Vec<Vec<FrameIndex>>,
    pub samples: Vec<ChunkSample>,
    pub thread_metadata: BTreeMap<String, ThreadMetadata>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkSample {
    pub timestamp: f64,
    pub thread_id: String,
    pub stack_id: StackIndex,
}

/// Payload of a `profile` item.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfilePayload {
    pub event_id: String,
    pub platform: String,
    pub version: String,
    pub timestamp: String,
    pub environment: String,
    pub release: String,
    pub device: Device,
    pub os: Os,
    pub runtime: Runtime,
    pub profile: TransactionProfile,
    pub transactions: Vec<TransactionRef>,
    pub tags: Tags,
    pub debug_info: DebugInfo,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Device {
    pub architecture: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Os {
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Runtime {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionProfile {
    pub frames: Vec<WireFrame>,
    pub stacks: Vec<Vec<FrameIndex>>,
    pub samples: Vec<ProfileSample>,
    pub thread_metadata: BTreeMap<String, ThreadMetadata>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileSample {
    /// Nanoseconds since the profile start, as a decimal string.
    pub elapsed_since_start_ns: String,
    pub thread_id: String,
    pub stack_id: StackIndex,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionRef {
    pub id: String,
    pub name: String,
    pub relative_start_ns: String,
    pub relative_end_ns: String,
    pub trace_id: String,
    pub active_thread_id: String,
}

/// The transaction event a `profile` item is attached to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub transaction: String,
    pub platform: String,
    pub timestamp: String,
    pub start_timestamp: String,
    pub contexts: Contexts,
    pub tags: Tags,
    pub spans: Vec<Span>,
    pub measurements: BTreeMap<String, Measurement>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contexts {
    pub trace: TraceContext,
    pub profile: ProfileContext,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub op: String,
    pub status: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileContext {
    pub profile_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Span {
    pub span_id: String,
    pub parent_span_id: String,
    pub trace_id: String,
    pub start_timestamp: f64,
    pub timestamp: f64,
    pub description: String,
    pub op: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub unit: String,
}
