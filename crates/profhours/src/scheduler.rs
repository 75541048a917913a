use crate::Result;

pub trait Scheduler {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}
