//! Audio file loading and decoding

use morph_audio::{BankError, TrackBank};
use morph_core::AudioBuffer;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::{debug, info, warn};

/// File extensions picked up when loading a directory
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "flac", "mp3", "ogg", "aac", "m4a"];

/// Errors that can occur during track loading
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No audio track found in file")]
    NoAudioTrack,
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Resample error: {0}")]
    Resample(String),
    #[error("{file} sorts to position {position} but is named for index {index}")]
    OrderingMismatch {
        file: String,
        position: usize,
        index: usize,
    },
    #[error(transparent)]
    Bank(#[from] BankError),
}

/// Audio file loader using Symphonia
///
/// Every file is downmixed to mono and resampled to the loader rate.
pub struct TrackLoader {
    target_sample_rate: u32,
}

impl Default for TrackLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackLoader {
    /// Create a new track loader with default 44.1kHz sample rate
    pub fn new() -> Self {
        Self::with_sample_rate(44100)
    }

    pub fn with_sample_rate(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    pub fn sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Audio files in `dir`, sorted by file name
    pub fn audio_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let is_audio = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_audio {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// Load every audio file in `dir` into a bank, in file name order
    ///
    /// A file whose stem is an integer must land at that index.
    pub fn load_all(&self, dir: &Path) -> Result<TrackBank, LoadError> {
        let files = Self::audio_files(dir)?;
        let mut bank = TrackBank::new();

        for (position, path) in files.iter().enumerate() {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            if let Ok(index) = stem.parse::<usize>() {
                if index != position {
                    return Err(LoadError::OrderingMismatch {
                        file: path.display().to_string(),
                        position,
                        index,
                    });
                }
            }

            let buffer = self.load(path)?;
            debug!(track = %stem, samples = buffer.len(), "Track loaded");
            bank.insert(stem, &buffer)?;
        }

        info!(dir = %dir.display(), tracks = bank.len(), "Track bank loaded");
        Ok(bank)
    }

    /// Load and decode an audio file
    pub fn load(&self, path: &Path) -> Result<AudioBuffer, LoadError> {
        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| LoadError::Decode(e.to_string()))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(LoadError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let source_sample_rate = codec_params.sample_rate.unwrap_or(self.target_sample_rate);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| LoadError::Decode(e.to_string()))?;

        let mut samples: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    warn!(file = %path.display(), "Stopped reading packets: {}", e);
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(_) => continue,
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count().max(1);
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            // Downmix each frame to mono
            samples.extend(
                sample_buf
                    .samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
            );
        }

        let samples = if source_sample_rate != self.target_sample_rate {
            self.resample(&samples, source_sample_rate)?
        } else {
            samples
        };

        Ok(AudioBuffer::new(samples, self.target_sample_rate))
    }

    /// Resample mono audio to the target sample rate
    fn resample(&self, samples: &[f32], source_rate: u32) -> Result<Vec<f32>, LoadError> {
        use rubato::{FftFixedInOut, Resampler};

        if samples.is_empty() {
            return Ok(Vec::new());
        }

        let mut resampler = FftFixedInOut::<f32>::new(
            source_rate as usize,
            self.target_sample_rate as usize,
            1024,
            1,
        )
        .map_err(|e| LoadError::Resample(e.to_string()))?;

        let chunk_size = resampler.input_frames_next();
        let mut output = Vec::with_capacity(
            samples.len() * self.target_sample_rate as usize / source_rate as usize + chunk_size,
        );

        let mut pos = 0;
        while pos + chunk_size <= samples.len() {
            let resampled = resampler
                .process(&[&samples[pos..pos + chunk_size]], None)
                .map_err(|e| LoadError::Resample(e.to_string()))?;
            output.extend_from_slice(&resampled[0]);
            pos += chunk_size;
        }

        // Pad the tail with zeros and keep only its proportional share
        if pos < samples.len() {
            let remaining = samples.len() - pos;
            let mut padded = samples[pos..].to_vec();
            padded.resize(chunk_size, 0.0);

            let resampled = resampler
                .process(&[padded.as_slice()], None)
                .map_err(|e| LoadError::Resample(e.to_string()))?;
            let output_frames = remaining * self.target_sample_rate as usize / source_rate as usize;
            output.extend_from_slice(&resampled[0][..output_frames.min(resampled[0].len())]);
        }

        Ok(output)
    }
}
