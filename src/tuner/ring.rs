/// Smallest capture buffer the pitch detector works with.
pub const MIN_CAPACITY: usize = 4096;

/// Fixed-size circular buffer of the most recent mono input.
///
/// The write cursor wraps to index 0 past the end, so after any number of
/// writes the buffer holds the latest `capacity` samples.
#[derive(Debug, Clone)]
pub struct RingCaptureBuffer {
    data: Vec<f32>,
    write_pos: usize,
}

impl RingCaptureBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity.max(MIN_CAPACITY)],
            write_pos: 0,
        }
    }

    /// Grows the buffer to at least `capacity` samples. Only call while not processing.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        let capacity = capacity.max(MIN_CAPACITY);
        if capacity > self.data.len() {
            self.data = vec![0.0; capacity];
            self.write_pos = 0;
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub const fn write_pos(&self) -> usize {
        self.write_pos
    }

    pub fn write(&mut self, samples: &[f32]) {
        let capacity = self.data.len();
        // Anything older than one full buffer would be overwritten anyway
        let samples = &samples[samples.len().saturating_sub(capacity)..];

        let first = samples.len().min(capacity - self.write_pos);
        self.data[self.write_pos..self.write_pos + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        self.data[..rest].copy_from_slice(&samples[first..]);

        self.write_pos = (self.write_pos + samples.len()) % capacity;
    }

    /// Copies the `out.len()` most recent samples, oldest first, ending at the write cursor.
    pub fn read_latest(&self, out: &mut [f32]) {
        let capacity = self.data.len();
        debug_assert!(out.len() <= capacity);
        let len = out.len().min(capacity);
        let out = &mut out[..len];

        let start = (self.write_pos + capacity - len) % capacity;
        let first = len.min(capacity - start);
        out[..first].copy_from_slice(&self.data[start..start + first]);
        out[first..].copy_from_slice(&self.data[..len - first]);
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
        self.write_pos = 0;
    }
}
