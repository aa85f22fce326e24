//! Voice processing module
//!
//! Handles microphone capture, utterance detection, transcription, speech
//! synthesis and playback. Each stage sits behind a trait so the session
//! loop can run against real devices or test doubles.

mod capture;
mod detector;
mod playback;
mod speaker;
mod stt;
mod tts;
mod wake_word;

use async_trait::async_trait;

pub use capture::{AudioCapture, Microphone, SAMPLE_RATE, Utterance, samples_to_wav};
pub use detector::{DetectorState, UtteranceDetector, ambient_threshold, calculate_energy};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3};
pub use speaker::{TextOnlySpeaker, VoiceSpeaker};
pub use stt::{SpeechToText, SttProvider};
pub use tts::{TextToSpeech, TtsProvider};
pub use wake_word::{WakeWord, WakeWordMatch, WakeWordPolicy};

use crate::Result;
use crate::error::TranscriptionFailure;

/// Source of spoken utterances
#[async_trait(?Send)]
pub trait AudioSource {
    /// Measure ambient noise and fix the speech energy threshold
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the input device is unavailable
    async fn calibrate(&mut self) -> Result<()>;

    /// Block until one utterance (speech followed by silence) is captured
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the input device is unavailable or lost
    async fn capture_utterance(&mut self) -> Result<Utterance>;
}

/// Converts an utterance to text
#[async_trait(?Send)]
pub trait Transcribe {
    /// Transcribe one utterance
    ///
    /// # Errors
    ///
    /// Returns `Unintelligible` when no speech could be recognized and
    /// `ServiceUnavailable` when the recognition service failed
    async fn transcribe(
        &self,
        utterance: &Utterance,
    ) -> std::result::Result<String, TranscriptionFailure>;
}

/// Renders response text as audible speech
#[async_trait(?Send)]
pub trait Speak {
    /// Speak `text`, returning once playback has finished
    ///
    /// # Errors
    ///
    /// Returns `Error::SpeechOutput` if synthesis or the output device fails
    async fn speak(&mut self, text: &str) -> Result<()>;
}
