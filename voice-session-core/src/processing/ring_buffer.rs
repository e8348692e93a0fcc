use std::collections::VecDeque;

/// Bounded queue of interleaved `f32` samples between the audio callback
/// and whoever drains it.
///
/// Capacity is a whole number of frames. When full, the oldest frames are
/// discarded and counted as overrun; a partial frame is never dropped or
/// drained on its own, so channel alignment survives overflow.
#[derive(Debug)]
pub struct RingBuffer {
    samples: VecDeque<f32>,
    channels: usize,
    capacity: usize,
    overrun: u64,
}

impl RingBuffer {
    /// Mono buffer holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self::with_channels(capacity, 1)
    }

    /// Buffer for `channels`-wide frames; `capacity` is rounded down to whole
    /// frames (at least one).
    pub fn with_channels(capacity: usize, channels: usize) -> Self {
        let channels = channels.max(1);
        let capacity = (capacity / channels).max(1) * channels;
        Self {
            samples: VecDeque::with_capacity(capacity),
            channels,
            capacity,
            overrun: 0,
        }
    }

    pub fn write(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let incoming = if samples.len() > self.capacity {
            let skipped = samples.len() - self.capacity;
            self.overrun += skipped as u64;
            &samples[skipped..]
        } else {
            samples
        };

        let excess = (self.samples.len() + incoming.len()).saturating_sub(self.capacity);
        if excess > 0 {
            // Round up so the queue still starts on a frame boundary.
            let drop = excess.div_ceil(self.channels) * self.channels;
            let drop = drop.min(self.samples.len());
            self.samples.drain(..drop);
            self.overrun += drop as u64;
        }
        self.samples.extend(incoming);
    }

    /// Remove and return every complete frame; a trailing partial frame stays queued.
    pub fn drain_frames(&mut self) -> Vec<f32> {
        let whole = self.samples.len() - self.samples.len() % self.channels;
        self.samples.drain(..whole).collect()
    }

    /// Copy of the newest `count` samples, oldest first; nothing is consumed.
    pub fn latest(&self, count: usize) -> Vec<f32> {
        let count = count.min(self.samples.len());
        self.samples.iter().skip(self.samples.len() - count).copied().collect()
    }

    /// Samples dropped to overflow since the last call.
    pub fn take_overrun(&mut self) -> u64 {
        std::mem::take(&mut self.overrun)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.overrun = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}
