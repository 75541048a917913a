use std::time::Duration;

use crate::sample::Capture;

/// A capture taken by the sampling thread, stamped with the pipeline clock.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedSample {
    pub capture: Capture,
    pub captured_at: Duration,
}

#[derive(Debug)]
pub struct Ringbuffer {
    capacity: usize,
    buffer: Vec<Option<CapturedSample>>,
    read_index: usize,
    write_index: usize,
}

#[derive(Debug, PartialEq)]
pub enum RingbufferError {
    Full,
}

impl Ringbuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: std::iter::repeat_with(|| None)
                .take(capacity + 1)
                .collect::<Vec<_>>(),
            read_index: 0,
            write_index: 0,
        }
    }

    pub fn push(&mut self, sample: CapturedSample) -> Result<(), RingbufferError> {
        let next = (self.write_index + 1) % (self.capacity + 1);
        if next == self.read_index {
            return Err(RingbufferError::Full);
        }
        self.buffer[self.write_index] = Some(sample);
        self.write_index = next;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<CapturedSample> {
        if self.read_index == self.write_index {
            return None;
        }
        let sample = self.buffer[self.read_index].take();
        self.read_index = (self.read_index + 1) % (self.capacity + 1);
        sample
    }

    pub fn is_empty(&self) -> bool {
        self.read_index == self.write_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::test_capture;

    fn captured(id: &str, at_ms: u64) -> CapturedSample {
        CapturedSample {
            capture: test_capture(id),
            captured_at: Duration::from_millis(at_ms),
        }
    }

    #[test]
    fn test_ringbuffer() {
        let mut ringbuffer = Ringbuffer::new(2);
        assert_eq!(ringbuffer.pop(), None);

        ringbuffer.push(captured("a", 1)).unwrap();
        ringbuffer.push(captured("b", 2)).unwrap();

        assert_eq!(ringbuffer.pop().unwrap().capture.stack.id, "a");
        assert_eq!(ringbuffer.pop().unwrap().capture.stack.id, "b");
        assert_eq!(ringbuffer.pop(), None);
        assert!(ringbuffer.is_empty());
    }

    #[test]
    fn test_ringbuffer_full() {
        let mut ringbuffer = Ringbuffer::new(1);
        ringbuffer.push(captured("a", 1)).unwrap();
        assert_eq!(ringbuffer.push(captured("b", 2)), Err(RingbufferError::Full));
    }

    #[test]
    fn test_ringbuffer_write_a_lot() {
        let mut ringbuffer = Ringbuffer::new(2);
        ringbuffer.push(captured("a", 1)).unwrap();
        ringbuffer.pop().unwrap();
        ringbuffer.push(captured("b", 2)).unwrap();
        ringbuffer.pop().unwrap();
        ringbuffer.push(captured("c", 3)).unwrap();
        assert_eq!(ringbuffer.pop().unwrap().captured_at, Duration::from_millis(3));
    }
}
