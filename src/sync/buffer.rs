//! In-memory sample batch.

use crate::location::types::Sample;
use uuid::Uuid;

/// Collects samples until a batch is full.
#[derive(Debug)]
pub struct SampleBuffer {
    batch_size: usize,
    samples: Vec<Sample>,
}

impl SampleBuffer {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            samples: Vec::with_capacity(batch_size),
        }
    }

    /// Add a sample; returns the full batch once the threshold is reached.
    pub fn push(&mut self, sample: Sample) -> Option<Vec<Sample>> {
        self.samples.push(sample);
        if self.samples.len() >= self.batch_size {
            Some(self.take())
        } else {
            None
        }
    }

    /// Take whatever is buffered.
    pub fn take(&mut self) -> Vec<Sample> {
        std::mem::replace(&mut self.samples, Vec::with_capacity(self.batch_size))
    }

    /// Put samples back at the front, ahead of anything buffered since.
    pub fn restore(&mut self, mut samples: Vec<Sample>) {
        samples.append(&mut self.samples);
        self.samples = samples;
    }

    /// Session of the samples currently buffered.
    pub fn session_id(&self) -> Option<Uuid> {
        self.samples.first().map(|s| s.session_id)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
