//! Circular sample store with independent push and pop cursors

use super::exchange::ExchangeError;

/// Fixed-capacity circular sample buffer.
///
/// `margin` samples of headroom are never handed out, so the buffer cannot
/// become exactly full and `push_pos == pop_pos` always means empty.
/// Not synchronized; [`super::SampleExchange`] owns it behind its lock.
pub struct SampleRingBuffer {
    samples: Vec<f32>,
    push_pos: usize,
    pop_pos: usize,
    margin: usize,
}

impl SampleRingBuffer {
    pub fn new(capacity: usize, margin: usize) -> Result<Self, ExchangeError> {
        if margin == 0 || margin >= capacity {
            return Err(ExchangeError::Geometry { capacity, margin });
        }

        Ok(Self {
            samples: vec![0.0; capacity],
            push_pos: 0,
            pop_pos: 0,
            margin,
        })
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn margin(&self) -> usize {
        self.margin
    }

    /// Largest chunk a single push or pop may request
    pub fn limit(&self) -> usize {
        self.capacity() - self.margin
    }

    /// Samples written but not yet read
    pub fn available(&self) -> usize {
        let capacity = self.capacity();
        (self.push_pos + capacity - self.pop_pos) % capacity
    }

    /// Unoccupied slots, margin included
    pub fn free(&self) -> usize {
        self.capacity() - self.available()
    }

    pub fn is_empty(&self) -> bool {
        self.push_pos == self.pop_pos
    }

    /// Reject requests that could never be satisfied
    pub fn check_request(&self, len: usize) -> Result<(), ExchangeError> {
        let limit = self.limit();
        if len > limit {
            return Err(ExchangeError::Oversized {
                requested: len,
                limit,
            });
        }
        Ok(())
    }

    pub fn can_push(&self, len: usize) -> bool {
        self.free() >= len + self.margin
    }

    pub fn can_pop(&self, len: usize) -> bool {
        self.available() >= len
    }

    /// Copy `chunk` in at the push cursor.
    ///
    /// Caller must have checked [`Self::can_push`].
    pub fn write(&mut self, chunk: &[f32]) {
        debug_assert!(self.can_push(chunk.len()));

        let capacity = self.capacity();
        let begin = self.push_pos;
        let tail = (capacity - begin).min(chunk.len());

        self.samples[begin..begin + tail].copy_from_slice(&chunk[..tail]);
        if tail < chunk.len() {
            let head = chunk.len() - tail;
            self.samples[..head].copy_from_slice(&chunk[tail..]);
        }

        self.push_pos = (begin + chunk.len()) % capacity;
    }

    /// Fill `out` from the pop cursor.
    ///
    /// Caller must have checked [`Self::can_pop`].
    pub fn read_into(&mut self, out: &mut [f32]) {
        debug_assert!(self.can_pop(out.len()));

        let capacity = self.capacity();
        let begin = self.pop_pos;
        let tail = (capacity - begin).min(out.len());

        out[..tail].copy_from_slice(&self.samples[begin..begin + tail]);
        if tail < out.len() {
            let head = out.len() - tail;
            out[tail..].copy_from_slice(&self.samples[..head]);
        }

        self.pop_pos = (begin + out.len()) % capacity;
    }

    #[cfg(test)]
    fn cursors(&self) -> (usize, usize) {
        (self.push_pos, self.pop_pos)
    }
}
