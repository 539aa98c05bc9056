use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Fixed-capacity mono sample buffer shared between a capture callback and
/// the frame loop. The oldest samples are dropped when full.
pub struct SampleRing {
    samples: Mutex<VecDeque<f32>>,
    capacity: usize,
    written: AtomicU64,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            written: AtomicU64::new(0),
        }
    }

    pub fn push_slice(&self, data: &[f32]) {
        let mut samples = self.samples.lock();
        let data = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };

        let overflow = (samples.len() + data.len()).saturating_sub(self.capacity);
        samples.drain(..overflow);
        samples.extend(data.iter().copied());
        self.written.fetch_add(data.len() as u64, Ordering::Relaxed);
    }

    /// Push interleaved frames, averaging channels down to mono.
    pub fn push_interleaved(&self, data: &[f32], channels: usize) {
        if channels <= 1 {
            self.push_slice(data);
            return;
        }
        let mono: Vec<f32> = data
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        self.push_slice(&mono);
    }

    /// Copy of the most recent `count` samples, oldest first.
    pub fn latest(&self, count: usize) -> Vec<f32> {
        let samples = self.samples.lock();
        let skip = samples.len().saturating_sub(count);
        samples.iter().skip(skip).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total samples ever pushed.
    pub fn samples_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}
