use std::collections::VecDeque;

/// Scales mean absolute amplitude into the displayed level range.
const LEVEL_SCALE: f32 = 2.0;
const MAX_LEVEL: f32 = 2.0;

/// The most recent `capacity` samples of the capture stream.
#[derive(Debug, Clone)]
pub struct AnalysisWindow {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl AnalysisWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, chunk: &[f32]) {
        let start = chunk.len().saturating_sub(self.capacity);
        for &sample in &chunk[start..] {
            if self.samples.len() == self.capacity {
                self.samples.pop_front();
            }
            self.samples.push_back(sample);
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Root-mean-square energy on the [-1, 1] scale. Empty window is silence.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }

    /// Live amplitude for display: 0 is silence, around 1 is loud speech.
    pub fn level(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mean_abs: f32 =
            self.samples.iter().map(|s| s.abs()).sum::<f32>() / self.samples.len() as f32;
        (mean_abs * LEVEL_SCALE).min(MAX_LEVEL)
    }
}
