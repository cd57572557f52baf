//! Audio files and settings for Morph
//!
//! - Loader: decode, downmix and resample audio files into a track bank
//! - Store: persist the recording and its variants as WAV
//! - Config: TOML settings

mod config;
mod loader;
mod store;

pub use config::{
    AudioConfig, Config, ConfigError, FilesConfig, GestureConfig, VariantConfig, VariantShape, MIN_SAMPLE_RATE,
};
pub use loader::{LoadError, TrackLoader, AUDIO_EXTENSIONS};
pub use store::{is_store_file, variant_file_name, AudioStore, StoreError, MAX_VARIANTS, RECORDING_FILE};
