//! Audio device backends - cpal output and input streams

use crate::bank::SharedBank;
use crate::recorder::{CaptureBackend, CaptureSink};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use thiserror::Error;
use tracing::{error, info, warn};

/// Device-level failures; terminal for the operation that hit them
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio input device found")]
    NoInputDevice,
    #[error("No audio output device found")]
    NoOutputDevice,
    #[error("Failed to get audio config: {0}")]
    Config(#[from] cpal::DefaultStreamConfigError),
    #[error("Failed to create audio stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("Failed to start audio: {0}")]
    Play(#[from] cpal::PlayStreamError),
    #[error("Sample format {0} not supported")]
    UnsupportedFormat(String),
}

/// Live output stream; audio stops when dropped
pub struct OutputStream {
    stream: Option<cpal::Stream>,
}

impl OutputStream {
    /// Stream that renders nothing (headless runs and tests)
    pub fn silent() -> Self {
        Self { stream: None }
    }

    pub fn is_silent(&self) -> bool {
        self.stream.is_none()
    }
}

/// Something that can render a track bank
///
/// `open` is called on the thread that will own the stream.
pub trait OutputBackend: Send + Sync {
    fn open(&self, bank: SharedBank) -> Result<OutputStream, AudioError>;
}

/// Backend that never touches a device
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl OutputBackend for NullOutput {
    fn open(&self, _bank: SharedBank) -> Result<OutputStream, AudioError> {
        Ok(OutputStream::silent())
    }
}

/// Default output device through cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

impl OutputBackend for CpalOutput {
    fn open(&self, bank: SharedBank) -> Result<OutputStream, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoOutputDevice)?;
        let default_config = device.default_output_config()?;

        let sample_rate = bank
            .lock()
            .sample_rate()
            .unwrap_or(default_config.sample_rate().0);
        let channels = default_config.channels() as usize;
        let config = cpal::StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                // Never block the real-time thread; on contention output silence
                if let Some(mut bank) = bank.try_lock() {
                    bank.process(data, channels);
                } else {
                    data.fill(0.0);
                }
            },
            |err| {
                error!("Audio output stream error: {}", err);
            },
            None,
        )?;
        stream.play()?;

        info!(sample_rate, channels, "Output stream started");
        Ok(OutputStream {
            stream: Some(stream),
        })
    }
}

/// Default input device through cpal, downmixed to mono
#[derive(Default)]
pub struct CpalCapture {
    stream: Option<cpal::Stream>,
}

impl CpalCapture {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_input_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut sink: CaptureSink,
    ) -> Result<cpal::Stream, AudioError>
    where
        T: Sample + SizedSample,
        f32: FromSample<T>,
    {
        let channels = config.channels.max(1) as usize;
        let stream = device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    let sum: f32 = frame.iter().map(|&s| s.to_sample::<f32>()).sum();
                    sink.push_sample(sum / frame.len() as f32);
                }
            },
            |err| {
                error!("Audio input stream error: {}", err);
            },
            None,
        )?;
        Ok(stream)
    }
}

impl CaptureBackend for CpalCapture {
    fn start(&mut self, sample_rate: u32, sink: CaptureSink) -> Result<(), AudioError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(AudioError::NoInputDevice)?;
        let default_config = device.default_input_config()?;
        if default_config.sample_rate().0 != sample_rate {
            warn!(
                device_rate = default_config.sample_rate().0,
                requested = sample_rate,
                "Input device default rate differs, requesting configured rate"
            );
        }

        let config = cpal::StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => Self::build_input_stream::<f32>(&device, &config, sink)?,
            cpal::SampleFormat::I16 => Self::build_input_stream::<i16>(&device, &config, sink)?,
            cpal::SampleFormat::U16 => Self::build_input_stream::<u16>(&device, &config, sink)?,
            format => return Err(AudioError::UnsupportedFormat(format.to_string())),
        };
        stream.play()?;

        info!(sample_rate, channels = config.channels, "Input stream started");
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if self.stream.take().is_some() {
            info!("Input stream stopped");
        }
    }
}
