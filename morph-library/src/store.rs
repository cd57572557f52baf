//! Persistence of the recording and its timbre variants as WAV files

use morph_core::AudioBuffer;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// File name of the persisted recording
pub const RECORDING_FILE: &str = "recorded_audio.wav";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Variant index {0} exceeds the {MAX_VARIANTS} variant limit")]
    TooManyVariants(usize),
}

/// Two-digit names keep name order equal to index order up to this count
pub const MAX_VARIANTS: usize = 100;

/// File name of variant `index`
///
/// Zero-padded so that name order equals index order.
pub fn variant_file_name(index: usize) -> String {
    format!("{index:02}.wav")
}

/// Whether `name` is one of the files this store writes
pub fn is_store_file(name: &str) -> bool {
    if name == RECORDING_FILE {
        return true;
    }
    name.strip_suffix(".wav")
        .and_then(|stem| stem.parse::<usize>().ok())
        .is_some_and(|index| index < MAX_VARIANTS && variant_file_name(index) == name)
}

/// Directory holding one cycle's audio files
#[derive(Debug, Clone)]
pub struct AudioStore {
    dir: PathBuf,
}

impl AudioStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn recording_path(&self) -> PathBuf {
        self.dir.join(RECORDING_FILE)
    }

    pub fn variant_path(&self, index: usize) -> PathBuf {
        self.dir.join(variant_file_name(index))
    }

    pub fn save_recording(&self, audio: &AudioBuffer) -> Result<PathBuf, StoreError> {
        let path = self.recording_path();
        self.write(&path, audio)?;
        info!(path = %path.display(), seconds = audio.duration_secs(), "Recording saved");
        Ok(path)
    }

    pub fn save_variant(&self, index: usize, audio: &AudioBuffer) -> Result<PathBuf, StoreError> {
        if index >= MAX_VARIANTS {
            return Err(StoreError::TooManyVariants(index));
        }
        let path = self.variant_path(index);
        self.write(&path, audio)?;
        debug!(path = %path.display(), "Variant saved");
        Ok(path)
    }

    /// Remove the recording and variants left from a previous cycle
    ///
    /// Only names this store writes are touched; other files in the
    /// directory are left alone.
    pub fn purge(&self) -> Result<usize, StoreError> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let owned = path.file_name().and_then(|n| n.to_str()).is_some_and(is_store_file);
            if owned && path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(dir = %self.dir.display(), removed, "Previous cycle removed");
        }
        Ok(removed)
    }

    /// Mono 32-bit float WAV
    fn write(&self, path: &Path, audio: &AudioBuffer) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: audio.sample_rate(),
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in audio.samples() {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::TrackLoader;
    use tempfile::tempdir;

    #[test]
    fn test_variant_names_sort_by_index() {
        assert_eq!(variant_file_name(0), "00.wav");
        assert_eq!(variant_file_name(7), "07.wav");
        assert_eq!(variant_file_name(12), "12.wav");

        let mut names: Vec<String> = (0..12).rev().map(variant_file_name).collect();
        names.push(RECORDING_FILE.to_string());
        names.sort();
        assert_eq!(names[2], "02.wav");
        assert_eq!(names[10], "10.wav");
        assert_eq!(names.last().map(String::as_str), Some(RECORDING_FILE));
    }

    #[test]
    fn test_saved_recording_reloads() {
        let dir = tempdir().unwrap();
        let store = AudioStore::new(dir.path().join("audio"));
        let audio = AudioBuffer::new((0..1000).map(|i| (i as f32 / 1000.0) - 0.5).collect(), 44100);

        let path = store.save_recording(&audio).unwrap();
        assert_eq!(path, store.recording_path());

        let loaded = TrackLoader::with_sample_rate(44100).load(&path).unwrap();
        assert_eq!(loaded.len(), audio.len());
        for (a, b) in loaded.samples().iter().zip(audio.samples()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_purge_removes_previous_cycle() {
        let dir = tempdir().unwrap();
        let store = AudioStore::new(dir.path());
        let audio = AudioBuffer::new(vec![0.1; 10], 44100);
        store.save_recording(&audio).unwrap();
        store.save_variant(0, &audio).unwrap();
        store.save_variant(1, &audio).unwrap();
        fs::write(dir.path().join("keep.txt"), "x").unwrap();

        assert_eq!(store.purge().unwrap(), 3);
        assert!(!store.recording_path().exists());
        assert!(dir.path().join("keep.txt").exists());
    }

    #[test]
    fn test_purge_leaves_foreign_audio() {
        let dir = tempdir().unwrap();
        let store = AudioStore::new(dir.path());
        let audio = AudioBuffer::new(vec![0.1; 10], 44100);
        store.save_recording(&audio).unwrap();
        store.save_variant(3, &audio).unwrap();
        for name in ["my_song.wav", "7.wav", "001.wav", "02.mp3"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }

        assert_eq!(store.purge().unwrap(), 2);
        for name in ["my_song.wav", "7.wav", "001.wav", "02.mp3"] {
            assert!(dir.path().join(name).exists(), "{name} was removed");
        }
    }

    #[test]
    fn test_store_file_names() {
        assert!(is_store_file(RECORDING_FILE));
        assert!(is_store_file("00.wav"));
        assert!(is_store_file("99.wav"));
        assert!(!is_store_file("100.wav"));
        assert!(!is_store_file("5.wav"));
        assert!(!is_store_file("track.wav"));
    }

    #[test]
    fn test_variant_index_limit() {
        let dir = tempdir().unwrap();
        let store = AudioStore::new(dir.path());
        let audio = AudioBuffer::new(vec![0.1; 10], 44100);
        assert!(store.save_variant(MAX_VARIANTS - 1, &audio).is_ok());
        assert!(matches!(
            store.save_variant(MAX_VARIANTS, &audio),
            Err(StoreError::TooManyVariants(100))
        ));
    }

    #[test]
    fn test_purge_missing_dir() {
        let dir = tempdir().unwrap();
        let store = AudioStore::new(dir.path().join("missing"));
        assert_eq!(store.purge().unwrap(), 0);
    }
}
