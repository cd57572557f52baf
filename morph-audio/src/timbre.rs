//! Biquad filter and saturation used to color timbre variants

use std::f32::consts::PI;

/// Filter shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterShape {
    #[default]
    LowPass,
    HighPass,
    BandPass,
}

/// Mono biquad filter (RBJ cookbook coefficients)
pub struct Biquad {
    shape: FilterShape,
    sample_rate: f32,
    cutoff: f32,    // Hz
    resonance: f32, // Q factor

    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,

    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    pub fn new(shape: FilterShape, sample_rate: f32, cutoff: f32, resonance: f32) -> Self {
        let mut filter = Self {
            shape,
            sample_rate,
            cutoff: 1000.0,
            resonance: 0.707,
            a0: 1.0,
            a1: 0.0,
            a2: 0.0,
            b1: 0.0,
            b2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        };
        filter.cutoff = filter.clamp_cutoff(cutoff);
        filter.resonance = resonance.clamp(0.1, 20.0);
        filter.calculate_coefficients();
        filter
    }

    pub fn shape(&self) -> FilterShape {
        self.shape
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    pub fn resonance(&self) -> f32 {
        self.resonance
    }

    /// Keep the cutoff below Nyquist for low sample rates
    fn clamp_cutoff(&self, cutoff: f32) -> f32 {
        let upper = 20000.0_f32.min(self.sample_rate * 0.45);
        cutoff.clamp(20.0_f32.min(upper), upper)
    }

    fn calculate_coefficients(&mut self) {
        let omega = 2.0 * PI * self.cutoff / self.sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * self.resonance);

        let (b0, b1, b2) = match self.shape {
            FilterShape::LowPass => (
                (1.0 - cos_omega) / 2.0,
                1.0 - cos_omega,
                (1.0 - cos_omega) / 2.0,
            ),
            FilterShape::HighPass => (
                (1.0 + cos_omega) / 2.0,
                -(1.0 + cos_omega),
                (1.0 + cos_omega) / 2.0,
            ),
            FilterShape::BandPass => (alpha, 0.0, -alpha),
        };
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        self.a0 = b0 / a0;
        self.a1 = b1 / a0;
        self.a2 = b2 / a0;
        self.b1 = a1 / a0;
        self.b2 = a2 / a0;
    }

    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        let output = self.a0 * input + self.a1 * self.x1 + self.a2 * self.x2
            - self.b1 * self.y1
            - self.b2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    /// Filter a block in place
    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

/// Tanh saturation normalized so full scale stays at full scale
///
/// `drive` of 1.0 is nearly linear, higher values add harmonics.
pub fn saturate(samples: &mut [f32], drive: f32) {
    let drive = drive.max(1.0);
    let norm = drive.tanh();
    for sample in samples.iter_mut() {
        *sample = (*sample * drive).tanh() / norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_lowpass_attenuates_highs() {
        let mut filter = Biquad::new(FilterShape::LowPass, 44100.0, 500.0, 0.707);
        let mut high = sine(8000.0, 44100.0, 4410);
        filter.process(&mut high);
        assert!(rms(&high[1000..]) < 0.05);
    }

    #[test]
    fn test_highpass_attenuates_lows() {
        let mut filter = Biquad::new(FilterShape::HighPass, 44100.0, 4000.0, 0.707);
        let mut low = sine(100.0, 44100.0, 4410);
        filter.process(&mut low);
        assert!(rms(&low[1000..]) < 0.05);
    }

    #[test]
    fn test_tiny_sample_rate_does_not_panic() {
        let mut filter = Biquad::new(FilterShape::BandPass, 40.0, 1000.0, 0.707);
        assert!(filter.cutoff() <= 18.0);

        let mut samples = vec![0.5, -0.5, 0.25, 0.0];
        filter.process(&mut samples);
        assert!(samples.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_cutoff_clamped_below_nyquist() {
        let filter = Biquad::new(FilterShape::LowPass, 16000.0, 20000.0, 0.707);
        assert!(filter.cutoff() <= 7200.0);
    }

    #[test]
    fn test_output_is_finite() {
        for shape in [FilterShape::LowPass, FilterShape::HighPass, FilterShape::BandPass] {
            let mut filter = Biquad::new(shape, 44100.0, 1200.0, 4.0);
            let mut samples = vec![1.0, 0.5, 0.0, -0.5, -1.0, -0.5, 0.0, 0.5];
            filter.process(&mut samples);
            assert!(samples.iter().all(|s| s.is_finite()));
        }
    }

    #[test]
    fn test_saturate_keeps_full_scale() {
        let mut samples = vec![1.0, -1.0, 0.0, 0.25];
        saturate(&mut samples, 4.0);
        assert!((samples[0] - 1.0).abs() < 1e-6);
        assert!((samples[1] + 1.0).abs() < 1e-6);
        assert_eq!(samples[2], 0.0);
        assert!(samples[3] > 0.25);
    }
}
