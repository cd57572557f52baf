//! Immutable mono audio buffer

use std::sync::Arc;

/// Mono f32 samples at a fixed sample rate
///
/// Samples are behind an `Arc` so a buffer can be handed to the audio
/// thread, the persistence step and the resynthesis worker without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap decoded or recorded samples
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
        }
    }

    /// Buffer of `len` zero samples
    pub fn silence(len: usize, sample_rate: u32) -> Self {
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Shared handle to the sample data
    pub fn shared(&self) -> Arc<Vec<f32>> {
        Arc::clone(&self.samples)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Absolute peak level
    pub fn peak(&self) -> f32 {
        self.samples.iter().map(|s| s.abs()).fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        let buffer = AudioBuffer::silence(22050, 44100);
        assert_eq!(buffer.len(), 22050);
        assert!((buffer.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_clone_shares_samples() {
        let buffer = AudioBuffer::new(vec![0.25, -0.5], 16000);
        let copy = buffer.clone();
        assert!(Arc::ptr_eq(&buffer.shared(), &copy.shared()));
        assert_eq!(copy.peak(), 0.5);
    }

    #[test]
    fn test_zero_rate_duration() {
        let buffer = AudioBuffer::new(vec![1.0; 10], 0);
        assert_eq!(buffer.duration_secs(), 0.0);
    }
}
