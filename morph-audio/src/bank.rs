//! Track bank - looped mono tracks mixed by per-track gain

use morph_core::AudioBuffer;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Index of a track inside a bank (lexicographic file order)
pub type TrackId = usize;

/// Bank shared between the morph engine and the output callback
pub type SharedBank = Arc<Mutex<TrackBank>>;

/// Errors from building a bank
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BankError {
    #[error("Track '{name}' is {found} Hz but the bank runs at {expected} Hz")]
    SampleRateMismatch {
        name: String,
        expected: u32,
        found: u32,
    },
}

/// A single looping track
#[derive(Debug)]
pub struct Track {
    name: String,
    /// Mono samples - Arc to avoid copying when the bank is rebuilt
    samples: Arc<Vec<f32>>,
    /// Current playback position in samples
    position: usize,
    /// Remaining passes through the track; `None` loops forever
    plays_left: Option<u32>,
    playing: bool,
    /// Target gain set by the engine (0.0 or 1.0 while morphing)
    gain: f32,
    /// Smoothed gain applied per sample (interpolates toward gain)
    smoothed_gain: f32,
}

impl Track {
    fn new(name: String, samples: Arc<Vec<f32>>) -> Self {
        Self {
            name,
            samples,
            position: 0,
            plays_left: None,
            playing: false,
            gain: 0.0,
            smoothed_gain: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn start(&mut self, loop_count: u32) {
        self.position = 0;
        self.plays_left = if loop_count == 0 { None } else { Some(loop_count) };
        self.playing = !self.samples.is_empty();
    }

    fn stop(&mut self) {
        self.playing = false;
        self.position = 0;
    }

    /// Next sample with gain applied, advancing the play head
    #[inline]
    fn next_sample(&mut self) -> f32 {
        self.smoothed_gain = TrackBank::GAIN_SMOOTH_COEFF * self.smoothed_gain
            + (1.0 - TrackBank::GAIN_SMOOTH_COEFF) * self.gain;

        let sample = self.samples[self.position] * self.smoothed_gain;
        self.position += 1;

        if self.position >= self.samples.len() {
            self.position = 0;
            if let Some(plays_left) = self.plays_left.as_mut() {
                *plays_left = plays_left.saturating_sub(1);
                if *plays_left == 0 {
                    self.playing = false;
                }
            }
        }

        sample
    }
}

/// Ordered set of tracks that all share one sample rate
#[derive(Debug, Default)]
pub struct TrackBank {
    tracks: Vec<Track>,
    sample_rate: Option<u32>,
    paused: bool,
}

impl TrackBank {
    /// Smoothing coefficient for gain changes (~5ms at 44.1kHz)
    const GAIN_SMOOTH_COEFF: f32 = 0.995;

    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bank from named buffers in track order
    pub fn from_buffers<I>(buffers: I) -> Result<Self, BankError>
    where
        I: IntoIterator<Item = (String, AudioBuffer)>,
    {
        let mut bank = Self::new();
        for (name, buffer) in buffers {
            bank.insert(name, &buffer)?;
        }
        Ok(bank)
    }

    /// Append a track, returning its id
    pub fn insert(&mut self, name: impl Into<String>, buffer: &AudioBuffer) -> Result<TrackId, BankError> {
        let name = name.into();
        match self.sample_rate {
            Some(expected) if expected != buffer.sample_rate() => {
                return Err(BankError::SampleRateMismatch {
                    name,
                    expected,
                    found: buffer.sample_rate(),
                });
            }
            Some(_) => {}
            None => self.sample_rate = Some(buffer.sample_rate()),
        }
        self.tracks.push(Track::new(name, buffer.shared()));
        Ok(self.tracks.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Shared sample rate, `None` for an empty bank
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(id)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tracks.iter().map(|t| t.name()).collect()
    }

    /// Target gain of a track
    pub fn gain(&self, id: TrackId) -> Option<f32> {
        self.tracks.get(id).map(|t| t.gain)
    }

    /// Target gains of every track, in track order
    pub fn gains(&self) -> Vec<f32> {
        self.tracks.iter().map(|t| t.gain).collect()
    }

    /// Set the target gain of a track; false if the id is unknown
    pub fn set_gain(&mut self, id: TrackId, gain: f32) -> bool {
        match self.tracks.get_mut(id) {
            Some(track) => {
                track.gain = gain.clamp(0.0, 1.0);
                true
            }
            None => false,
        }
    }

    /// Start every track from the top, only track 0 audible
    ///
    /// `loop_count` is the number of passes per track, 0 loops forever.
    pub fn play_all(&mut self, loop_count: u32) {
        self.paused = false;
        for (id, track) in self.tracks.iter_mut().enumerate() {
            track.start(loop_count);
            track.gain = if id == 0 { 1.0 } else { 0.0 };
            // Jump straight to the start gains - there is nothing to fade from
            track.smoothed_gain = track.gain;
        }
    }

    /// Halt every track
    pub fn stop_all(&mut self) {
        for track in &mut self.tracks {
            track.stop();
        }
    }

    /// Halt and release every track
    pub fn clear(&mut self) {
        self.stop_all();
        self.tracks.clear();
        self.sample_rate = None;
        self.paused = false;
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// True while any track is still playing
    pub fn is_playing(&self) -> bool {
        self.tracks.iter().any(|t| t.playing)
    }

    /// Mix all playing tracks into an interleaved output buffer
    ///
    /// Every channel of a frame receives the same mono mix.
    pub fn process(&mut self, output: &mut [f32], channels: usize) {
        output.fill(0.0);
        if self.paused || channels == 0 {
            return;
        }

        for track in self.tracks.iter_mut().filter(|t| t.playing) {
            for frame in output.chunks_mut(channels) {
                if !track.playing {
                    break;
                }
                let sample = track.next_sample();
                for out in frame.iter_mut() {
                    *out += sample;
                }
            }
        }

        for sample in output.iter_mut() {
            *sample = soft_clip(*sample);
        }
    }
}

/// Soft clip threshold
const SOFT_CLIP_THRESHOLD: f32 = 0.75;
/// Soft clip ceiling
const SOFT_CLIP_CEILING: f32 = 0.89;

/// Gentle soft clipper for the mix bus
///
/// Transparent below the threshold; above it the signal approaches the
/// ceiling asymptotically.
#[inline(always)]
fn soft_clip(x: f32) -> f32 {
    let abs_x = x.abs();
    if abs_x <= SOFT_CLIP_THRESHOLD {
        return x;
    }

    let sign = x.signum();
    let knee_width = SOFT_CLIP_CEILING - SOFT_CLIP_THRESHOLD;
    let ratio = (abs_x - SOFT_CLIP_THRESHOLD) / knee_width;
    let compressed = SOFT_CLIP_THRESHOLD + knee_width * (1.0 - (-ratio * 3.0).exp());
    sign * compressed.min(SOFT_CLIP_CEILING)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank_of(count: usize, len: usize) -> TrackBank {
        TrackBank::from_buffers(
            (0..count).map(|i| (format!("{:02}.wav", i), AudioBuffer::new(vec![0.1 * (i + 1) as f32; len], 44100))),
        )
        .unwrap()
    }

    #[test]
    fn test_play_all_only_first_audible() {
        let mut bank = bank_of(4, 16);
        bank.play_all(0);
        assert_eq!(bank.gains(), vec![1.0, 0.0, 0.0, 0.0]);
        assert!(bank.is_playing());
    }

    #[test]
    fn test_play_all_empty_bank_is_noop() {
        let mut bank = TrackBank::new();
        bank.play_all(0);
        assert!(!bank.is_playing());
        assert!(bank.gains().is_empty());

        let mut out = vec![1.0; 8];
        bank.process(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_debug_names_tracks() {
        let bank = bank_of(2, 4);
        let text = format!("{bank:?}");
        assert!(text.contains("00.wav"));
        assert!(text.contains("01.wav"));
    }

    #[test]
    fn test_sample_rate_mismatch_rejected() {
        let mut bank = TrackBank::new();
        bank.insert("a", &AudioBuffer::silence(4, 44100)).unwrap();
        let err = bank.insert("b", &AudioBuffer::silence(4, 48000)).unwrap_err();
        assert_eq!(
            err,
            BankError::SampleRateMismatch {
                name: "b".into(),
                expected: 44100,
                found: 48000
            }
        );
        assert_eq!(bank.len(), 1);
    }

    #[test]
    fn test_process_mixes_audible_track_only() {
        let mut bank = bank_of(3, 64);
        bank.play_all(0);

        let mut out = vec![0.0; 32];
        bank.process(&mut out, 2);

        // Track 0 is a constant 0.1, duplicated into both channels
        for frame in out.chunks(2) {
            assert!((frame[0] - 0.1).abs() < 1e-6);
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn test_gain_change_is_smoothed() {
        let mut bank = bank_of(2, 4096);
        bank.play_all(0);
        bank.set_gain(0, 0.0);
        bank.set_gain(1, 1.0);

        let mut out = vec![0.0; 4];
        bank.process(&mut out, 1);
        // First sample after the switch still carries most of track 0
        assert!(out[0] > 0.09 && out[0] < 0.11);

        let mut long = vec![0.0; 2048];
        bank.process(&mut long, 1);
        // Settled on track 1 (constant 0.2)
        assert!((long[2047] - 0.2).abs() < 1e-3);
    }

    #[test]
    fn test_finite_loops_stop() {
        let mut bank = bank_of(1, 4);
        bank.play_all(2);

        let mut out = vec![0.0; 16];
        bank.process(&mut out, 1);

        assert!(!bank.is_playing());
        assert!(out[..8].iter().all(|&s| (s - 0.1).abs() < 1e-6));
        assert!(out[8..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_infinite_loop_wraps() {
        let mut bank = bank_of(1, 4);
        bank.play_all(0);

        let mut out = vec![0.0; 64];
        bank.process(&mut out, 1);
        assert!(bank.is_playing());
        assert!(out.iter().all(|&s| (s - 0.1).abs() < 1e-6));
    }

    #[test]
    fn test_pause_outputs_silence_and_holds_position() {
        let mut bank = bank_of(1, 64);
        bank.play_all(0);

        let mut out = vec![0.0; 8];
        bank.process(&mut out, 1);
        let position = bank.track(0).unwrap().position();

        bank.pause();
        bank.process(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(bank.track(0).unwrap().position(), position);

        bank.resume();
        bank.process(&mut out, 1);
        assert_eq!(bank.track(0).unwrap().position(), position + 8);
    }

    #[test]
    fn test_stop_all_and_clear() {
        let mut bank = bank_of(3, 16);
        bank.play_all(0);
        bank.stop_all();
        assert!(!bank.is_playing());
        assert_eq!(bank.len(), 3);

        bank.clear();
        assert!(bank.is_empty());
        assert_eq!(bank.sample_rate(), None);
    }

    #[test]
    fn test_set_gain_unknown_track() {
        let mut bank = bank_of(2, 4);
        assert!(!bank.set_gain(5, 1.0));
        assert!(bank.set_gain(1, 3.0));
        assert_eq!(bank.gain(1), Some(1.0));
    }

    #[test]
    fn test_soft_clip() {
        assert_eq!(soft_clip(0.5), 0.5);
        assert!(soft_clip(4.0) <= SOFT_CLIP_CEILING);
        assert!(soft_clip(-4.0) >= -SOFT_CLIP_CEILING);
    }
}
