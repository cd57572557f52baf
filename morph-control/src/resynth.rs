//! Timbre variants rendered from the recording

use morph_audio::{saturate, Biquad};
use morph_core::AudioBuffer;
use morph_library::VariantConfig;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ResynthError {
    #[error("Variant {name}: {reason}")]
    InvalidVariant { name: String, reason: String },
    #[error("Resynthesis failed: {0}")]
    Failed(String),
}

/// Produces timbre variants of a recording
///
/// Every variant has the same length and sample rate as the input.
pub trait Resynthesizer: Send + Sync {
    fn variant_count(&self) -> usize;

    fn render(&self, input: &AudioBuffer) -> Result<Vec<AudioBuffer>, ResynthError>;
}

/// Filter and saturation per variant, level matched to the input peak
#[derive(Debug, Clone)]
pub struct FilterBankResynthesizer {
    variants: Vec<VariantConfig>,
}

impl FilterBankResynthesizer {
    pub fn new(variants: Vec<VariantConfig>) -> Result<Self, ResynthError> {
        for variant in &variants {
            let invalid = |reason: &str| ResynthError::InvalidVariant {
                name: variant.name.clone(),
                reason: reason.to_string(),
            };
            if !variant.cutoff_hz.is_finite() || variant.cutoff_hz <= 0.0 {
                return Err(invalid("cutoff must be a positive frequency"));
            }
            if !variant.resonance.is_finite() || variant.resonance <= 0.0 {
                return Err(invalid("resonance must be positive"));
            }
            if !variant.drive.is_finite() {
                return Err(invalid("drive must be finite"));
            }
        }
        Ok(Self { variants })
    }

    fn render_variant(variant: &VariantConfig, input: &AudioBuffer) -> AudioBuffer {
        let mut samples = input.samples().to_vec();
        let mut filter = Biquad::new(
            variant.shape.into(),
            input.sample_rate() as f32,
            variant.cutoff_hz,
            variant.resonance,
        );
        filter.process(&mut samples);
        saturate(&mut samples, variant.drive);

        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        if peak > 0.0 {
            let scale = input.peak() / peak;
            samples.iter_mut().for_each(|s| *s *= scale);
        }
        AudioBuffer::new(samples, input.sample_rate())
    }
}

impl Resynthesizer for FilterBankResynthesizer {
    fn variant_count(&self) -> usize {
        self.variants.len()
    }

    fn render(&self, input: &AudioBuffer) -> Result<Vec<AudioBuffer>, ResynthError> {
        Ok(self
            .variants
            .iter()
            .map(|variant| {
                debug!(variant = %variant.name, "Rendering variant");
                Self::render_variant(variant, input)
            })
            .collect())
    }
}
