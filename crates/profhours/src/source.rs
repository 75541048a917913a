use std::sync::Mutex;

use crate::backtrace::StackSynthesizer;
use crate::sample::{Capture, ThreadId};

/// Yields the captures taken at one sampling tick.
pub trait SampleSource: Send + Sync {
    fn sample(&self) -> Vec<Capture>;
}

/// A sample source backed by the stack synthesizer, reporting a single thread.
#[derive(Debug)]
pub struct SyntheticSource {
    synthesizer: Mutex<StackSynthesizer>,
    thread_id: ThreadId,
}

impl SyntheticSource {
    pub fn new(synthesizer: StackSynthesizer, thread_id: ThreadId) -> Self {
        Self {
            synthesizer: Mutex::new(synthesizer),
            thread_id,
        }
    }
}

impl SampleSource for SyntheticSource {
    fn sample(&self) -> Vec<Capture> {
        match self.synthesizer.lock() {
            Ok(mut synthesizer) => vec![synthesizer.generate_sample(&self.thread_id)],
            Err(_) => {
                log::debug!("Synthesizer lock poisoned. Dropping sample.");
                vec![]
            }
        }
    }
}

/// A source that never yields anything. Used as the pipeline's default
/// before a real or synthetic source is attached.
#[derive(Debug, Default)]
pub struct IdleSource;

impl SampleSource for IdleSource {
    fn sample(&self) -> Vec<Capture> {
        vec![]
    }
}

/// Thread id reported for samples of the current process. On Linux the main
/// thread's id equals the process id.
pub fn main_thread_id() -> ThreadId {
    std::process::id().to_string()
}
