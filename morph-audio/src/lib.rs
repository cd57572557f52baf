//! Audio engine for Morph - track bank, morph engine, and capture
//!
//! This module provides the playback and recording pipeline:
//! - Bank: Parallel tracks with per-track smoothed gain
//! - Engine: Switch commands that move the audible track
//! - Recorder: Bounded mono capture trimmed to the elapsed time
//! - Device: cpal input and output streams
//! - Timbre: Biquad filter and saturation for variant coloring

mod bank;
mod device;
mod engine;
mod recorder;
pub mod timbre;

pub use bank::{BankError, SharedBank, Track, TrackBank, TrackId};
pub use device::{AudioError, CpalCapture, CpalOutput, NullOutput, OutputBackend, OutputStream};
pub use engine::{EnginePhase, MorphCommand, MorphEngine, MorphError, MorphEvent, DEFAULT_POLL_INTERVAL};
pub use recorder::{trimmed_len, CaptureBackend, CaptureSink, RecorderError, RecordingSession, TrackRecorder};
pub use timbre::{saturate, Biquad, FilterShape};
