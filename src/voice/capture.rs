//! Audio capture from microphone

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::AudioSource;
use super::detector::{UtteranceDetector, ambient_threshold};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// How long to sample the room when calibrating
const CALIBRATION_DURATION: Duration = Duration::from_secs(1);

/// Polling interval while waiting for speech
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One captured speech segment
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Mono samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Samples per second
    pub sample_rate: u32,
}

impl Utterance {
    /// Create an utterance from raw samples
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Length of the segment
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Encode as 16-bit PCM WAV for recognition services
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples, self.sample_rate)
    }
}

/// Captures audio from the default input device
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    device_lost: Arc<AtomicBool>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if no usable input device exists
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Capture("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Capture(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Capture("no mono 16kHz input config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            device_lost: Arc::new(AtomicBool::new(false)),
            stream: None,
        })
    }

    /// Start streaming samples into the buffer
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the stream cannot be opened
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let device_lost = Arc::clone(&self.device_lost);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                        device_lost.store(true, Ordering::SeqCst);
                    }
                },
                None,
            )
            .map_err(|e| Error::Capture(e.to_string()))?;

        stream.play().map_err(|e| Error::Capture(e.to_string()))?;
        self.stream = Some(stream);

        tracing::trace!("audio capture started");
        Ok(())
    }

    /// Stop streaming and release the device stream
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::trace!("audio capture stopped");
        }
    }

    /// Get captured samples and clear the buffer
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Clear the sample buffer
    pub fn clear_buffer(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    /// Whether the device reported itself gone
    #[must_use]
    pub fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::SeqCst)
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// The default microphone as an utterance source
///
/// The device stream is only held open while calibrating or capturing.
pub struct Microphone {
    capture: AudioCapture,
    threshold: Option<f32>,
}

impl Microphone {
    /// Open the default input device
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if no usable input device exists
    pub fn new() -> Result<Self> {
        Ok(Self {
            capture: AudioCapture::new()?,
            threshold: None,
        })
    }

    /// Energy threshold fixed by calibration
    #[must_use]
    pub const fn threshold(&self) -> Option<f32> {
        self.threshold
    }

    async fn listen(&mut self, threshold: f32) -> Result<Vec<f32>> {
        let mut detector = UtteranceDetector::new(threshold);

        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            if self.capture.is_device_lost() {
                return Err(Error::Capture("input device disappeared".to_string()));
            }

            let chunk = self.capture.take_buffer();
            if chunk.is_empty() {
                continue;
            }

            if detector.process(&chunk) {
                return Ok(detector.take_speech_buffer());
            }
        }
    }
}

#[async_trait(?Send)]
impl AudioSource for Microphone {
    async fn calibrate(&mut self) -> Result<()> {
        if self.threshold.is_some() {
            tracing::debug!("microphone already calibrated");
            return Ok(());
        }

        self.capture.start()?;
        self.capture.clear_buffer();
        tokio::time::sleep(CALIBRATION_DURATION).await;
        let ambient = self.capture.take_buffer();
        self.capture.stop();

        let threshold = ambient_threshold(&ambient);
        tracing::info!(
            samples = ambient.len(),
            threshold,
            "ambient noise calibration complete"
        );

        self.threshold = Some(threshold);
        Ok(())
    }

    async fn capture_utterance(&mut self) -> Result<Utterance> {
        let threshold = self
            .threshold
            .ok_or_else(|| Error::Capture("microphone used before calibration".to_string()))?;

        self.capture.start()?;
        self.capture.clear_buffer();
        tracing::debug!(threshold, "listening for speech");

        let result = self.listen(threshold).await;
        self.capture.stop();

        let samples = result?;
        tracing::debug!(samples = samples.len(), "utterance captured");

        Ok(Utterance::new(samples, self.capture.sample_rate()))
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
