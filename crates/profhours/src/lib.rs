extern crate serde;
#[macro_use]
extern crate serde_derive;

pub mod assembler;
pub mod backtrace;
pub mod category;
pub mod clock;
pub mod envelope;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod profile;
mod ringbuffer;
pub mod sample;
pub mod scheduler;
pub mod serialization;
pub mod session;
pub mod source;
pub mod timer_thread_scheduler;
pub mod timestamp;
pub mod validity;
pub mod window;

pub use error::{Error, Result};
