//! Configuration persistence for Morph
//!
//! TOML file with audio, file, gesture and timbre variant settings.
//! Missing keys fall back to defaults.

use crate::store::MAX_VARIANTS;
use morph_audio::FilterShape;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Lowest sample rate the recorder and the variant filters accept
pub const MIN_SAMPLE_RATE: u32 = 8000;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub files: FilesConfig,
    pub gestures: GestureConfig,
    pub variants: Vec<VariantConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            files: FilesConfig::default(),
            gestures: GestureConfig::default(),
            variants: VariantConfig::defaults(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Recording cap in seconds
    pub max_duration_secs: f64,
    /// Passes per track, 0 loops forever
    pub loops: u32,
    pub poll_interval_ms: u64,
    /// Play the recording back while variants are rendered
    pub preview_recording: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            max_duration_secs: 14.0,
            loops: 0,
            poll_interval_ms: 1000,
            preview_recording: true,
        }
    }
}

impl AudioConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs_f64(self.max_duration_secs.max(0.0))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Where the recording and its variants are written
    pub audio_dir: PathBuf,
    /// Gesture templates (TOML); built-in templates when absent
    pub model_path: Option<PathBuf>,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            audio_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("morph")
                .join("audio"),
            model_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Frames per classified sequence
    pub sequence_length: usize,
    /// Minimum confidence (exclusive) for a prediction to count
    pub threshold: f32,
    /// Emit a sequence every `sequence_length * latency_factor` frames
    pub latency_factor: usize,
    /// Gesture labels in classifier index order
    pub actions: Vec<String>,
    /// Index of the resting gesture; never switches tracks
    pub neutral: Option<usize>,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            sequence_length: 30,
            threshold: 0.6,
            latency_factor: 1,
            actions: ["left", "right", "up", "down", "rest"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            neutral: Some(4),
        }
    }
}

/// Filter shape as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantShape {
    #[default]
    LowPass,
    HighPass,
    BandPass,
}

impl From<VariantShape> for FilterShape {
    fn from(shape: VariantShape) -> Self {
        match shape {
            VariantShape::LowPass => FilterShape::LowPass,
            VariantShape::HighPass => FilterShape::HighPass,
            VariantShape::BandPass => FilterShape::BandPass,
        }
    }
}

/// One timbre variant rendered from the recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantConfig {
    pub name: String,
    #[serde(default)]
    pub shape: VariantShape,
    pub cutoff_hz: f32,
    #[serde(default = "default_resonance")]
    pub resonance: f32,
    #[serde(default = "default_drive")]
    pub drive: f32,
}

fn default_resonance() -> f32 {
    0.707
}

fn default_drive() -> f32 {
    1.0
}

impl VariantConfig {
    fn new(name: &str, shape: VariantShape, cutoff_hz: f32, resonance: f32, drive: f32) -> Self {
        Self {
            name: name.to_string(),
            shape,
            cutoff_hz,
            resonance,
            drive,
        }
    }

    /// Built-in variant set
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("warm", VariantShape::LowPass, 800.0, 0.707, 1.5),
            Self::new("bright", VariantShape::HighPass, 1500.0, 0.707, 1.2),
            Self::new("nasal", VariantShape::BandPass, 1200.0, 4.0, 2.0),
            Self::new("fuzz", VariantShape::LowPass, 3000.0, 1.0, 6.0),
        ]
    }
}

impl Config {
    /// Defaults including the built-in variants
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Load config from the default location
    ///
    /// Returns the built-in defaults if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::with_defaults());
        }
        Self::load_from(&path)
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        info!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("morph")
            .join("config.toml")
    }

    fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.audio.sample_rate < MIN_SAMPLE_RATE {
            return invalid(format!(
                "audio.sample_rate {} is below the {} Hz minimum",
                self.audio.sample_rate, MIN_SAMPLE_RATE
            ));
        }
        if !(self.audio.max_duration_secs > 0.0) {
            return invalid("audio.max_duration_secs must be positive".into());
        }
        if self.gestures.sequence_length == 0 {
            return invalid("gestures.sequence_length must be positive".into());
        }
        if self.gestures.latency_factor == 0 {
            return invalid("gestures.latency_factor must be at least 1".into());
        }
        if !(0.0..1.0).contains(&self.gestures.threshold) {
            return invalid(format!(
                "gestures.threshold {} must be in [0, 1)",
                self.gestures.threshold
            ));
        }
        if let Some(neutral) = self.gestures.neutral {
            if neutral >= self.gestures.actions.len() {
                return invalid(format!(
                    "gestures.neutral {} is not one of the {} actions",
                    neutral,
                    self.gestures.actions.len()
                ));
            }
        }
        if self.variants.len() > MAX_VARIANTS {
            return invalid(format!(
                "{} variants configured, at most {} are supported",
                self.variants.len(),
                MAX_VARIANTS
            ));
        }
        for variant in &self.variants {
            if !(variant.cutoff_hz > 0.0) {
                return invalid(format!("variant {} needs a positive cutoff_hz", variant.name));
            }
        }
        Ok(())
    }
}
