use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::Error;
use crate::pipeline::PipelineState;
use crate::scheduler::Scheduler;
use crate::Result;

/// Captures from the pipeline's sample source on a background thread, once
/// per `interval`.
#[derive(Debug)]
pub struct TimerThreadScheduler {
    interval: Duration,
    state: Arc<PipelineState>,
    stop_requested: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler for TimerThreadScheduler {
    fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        self.stop_requested.store(false, Ordering::Relaxed);

        let interval = self.interval;
        let state = Arc::clone(&self.state);
        let stop_requested = Arc::clone(&self.stop_requested);
        let handle = thread::Builder::new()
            .name("profhours-sampler".to_owned())
            .spawn(move || Self::thread_main_loop(interval, state, stop_requested))
            .map_err(Error::Spawn)?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stop_requested.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Sampling thread panicked");
            }
        }
        Ok(())
    }
}

impl TimerThreadScheduler {
    pub(crate) fn new(interval: Duration, state: Arc<PipelineState>) -> Self {
        Self {
            interval,
            state,
            stop_requested: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    fn thread_main_loop(
        interval: Duration,
        state: Arc<PipelineState>,
        stop_requested: Arc<AtomicBool>,
    ) {
        loop {
            if stop_requested.load(Ordering::Relaxed) {
                break;
            }
            log::trace!("Capturing samples");
            state.capture();

            thread::sleep(interval);
        }
    }
}

impl Drop for TimerThreadScheduler {
    fn drop(&mut self) {
        self.stop_requested.store(true, Ordering::Relaxed);
    }
}
