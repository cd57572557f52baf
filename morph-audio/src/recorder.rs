//! Track recorder - bounded mono capture trimmed to the elapsed time

use crate::device::AudioError;
use morph_core::AudioBuffer;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from the recorder
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("A recording is already in progress")]
    AlreadyRecording,
    #[error("No recording in progress")]
    NotRecording,
    #[error("Session {found} does not match the active recording {active}")]
    SessionMismatch { active: u64, found: u64 },
    #[error(transparent)]
    Device(#[from] AudioError),
}

/// Write end of the capture buffer, handed to the device callback
pub struct CaptureSink {
    producer: HeapProd<f32>,
}

impl CaptureSink {
    /// Push one mono sample; false once the buffer is full
    #[inline]
    pub fn push_sample(&mut self, sample: f32) -> bool {
        self.producer.try_push(sample).is_ok()
    }

    /// Push a block of mono samples, returning how many fit
    pub fn push(&mut self, samples: &[f32]) -> usize {
        self.producer.push_slice(samples)
    }
}

/// Source of captured audio
///
/// `start` returns as soon as capture is running; samples arrive through
/// the sink from whatever thread the device uses.
pub trait CaptureBackend {
    fn start(&mut self, sample_rate: u32, sink: CaptureSink) -> Result<(), AudioError>;
    fn stop(&mut self);
}

/// Handle for one recording, returned by `start` and consumed by `stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingSession {
    id: u64,
    started_at: Instant,
    max_duration: Duration,
}

impl RecordingSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    /// Time recorded so far, capped at the maximum duration
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed().min(self.max_duration)
    }
}

/// Number of samples kept for a recording of `elapsed`
///
/// `floor(min(elapsed, max_duration) * sample_rate)`
pub fn trimmed_len(elapsed: Duration, max_duration: Duration, sample_rate: u32) -> usize {
    let secs = elapsed.min(max_duration).as_secs_f64();
    (secs * sample_rate as f64).floor() as usize
}

struct ActiveCapture {
    session: RecordingSession,
    consumer: HeapCons<f32>,
}

/// Records one bounded mono clip at a time
pub struct TrackRecorder {
    backend: Box<dyn CaptureBackend>,
    sample_rate: u32,
    max_duration: Duration,
    active: Option<ActiveCapture>,
    recorded: Option<AudioBuffer>,
    next_session: u64,
}

impl TrackRecorder {
    pub fn new(backend: Box<dyn CaptureBackend>, sample_rate: u32, max_duration: Duration) -> Self {
        Self {
            backend,
            sample_rate,
            max_duration,
            active: None,
            recorded: None,
            next_session: 1,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    /// Capacity of the capture buffer in samples
    pub fn capacity(&self) -> usize {
        trimmed_len(self.max_duration, self.max_duration, self.sample_rate).max(1)
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Begin capturing into a fresh pre-allocated buffer
    pub fn start(&mut self) -> Result<RecordingSession, RecorderError> {
        if self.active.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        let (producer, consumer) = HeapRb::<f32>::new(self.capacity()).split();
        self.backend.start(self.sample_rate, CaptureSink { producer })?;

        let session = RecordingSession {
            id: self.next_session,
            started_at: Instant::now(),
            max_duration: self.max_duration,
        };
        self.next_session += 1;
        self.recorded = None;
        self.active = Some(ActiveCapture { session, consumer });

        info!(session = session.id, "Recording on");
        Ok(session)
    }

    /// Halt capture and trim the clip to the elapsed duration
    pub fn stop(&mut self, session: RecordingSession) -> Result<AudioBuffer, RecorderError> {
        let elapsed = session.started_at.elapsed();
        self.finish(session, elapsed)
    }

    fn finish(&mut self, session: RecordingSession, elapsed: Duration) -> Result<AudioBuffer, RecorderError> {
        let mut active = match self.active.take() {
            None => return Err(RecorderError::NotRecording),
            Some(active) if active.session.id != session.id => {
                let mismatch = RecorderError::SessionMismatch {
                    active: active.session.id,
                    found: session.id,
                };
                self.active = Some(active);
                return Err(mismatch);
            }
            Some(active) => active,
        };
        self.backend.stop();

        let captured = active.consumer.occupied_len();
        let mut samples = vec![0.0f32; trimmed_len(elapsed, self.max_duration, self.sample_rate)];
        // Anything the device did not deliver stays silent
        active.consumer.pop_slice(&mut samples);

        debug!(captured, kept = samples.len(), "Capture trimmed");
        let buffer = AudioBuffer::new(samples, self.sample_rate);
        info!(
            session = session.id,
            seconds = buffer.duration_secs(),
            "Recording stopped"
        );
        self.recorded = Some(buffer.clone());
        Ok(buffer)
    }

    /// Last finalized clip
    pub fn audio(&self) -> Option<&AudioBuffer> {
        self.recorded.as_ref()
    }

    /// Abandon any capture in progress and forget the last clip
    pub fn reset(&mut self) {
        if self.active.take().is_some() {
            self.backend.stop();
            info!("Recording discarded");
        }
        self.recorded = None;
    }
}

impl Drop for TrackRecorder {
    fn drop(&mut self) {
        if self.active.is_some() {
            self.backend.stop();
        }
    }
}
