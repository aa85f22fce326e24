//! Speakers: synthesized voice output or text-only fallback

use async_trait::async_trait;

use super::{AudioPlayback, Speak, TextToSpeech};
use crate::Result;

/// Speaks through a TTS service and the default output device
///
/// The output device is opened per utterance and released once playback ends.
pub struct VoiceSpeaker {
    tts: TextToSpeech,
}

impl VoiceSpeaker {
    /// Create a speaker backed by a TTS client
    #[must_use]
    pub const fn new(tts: TextToSpeech) -> Self {
        Self { tts }
    }
}

#[async_trait(?Send)]
impl Speak for VoiceSpeaker {
    async fn speak(&mut self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }

        tracing::debug!(chars = text.len(), "speaking");
        let audio = self.tts.synthesize(text).await?;
        let playback = AudioPlayback::new()?;
        playback.play_mp3(&audio)
    }
}

/// Degraded speaker that only logs what would have been said
#[derive(Debug, Default)]
pub struct TextOnlySpeaker;

#[async_trait(?Send)]
impl Speak for TextOnlySpeaker {
    async fn speak(&mut self, text: &str) -> Result<()> {
        tracing::info!(text, "speech output disabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_text_only_speaker_never_fails() {
        let mut speaker = TextOnlySpeaker;
        assert!(speaker.speak("Hello there").await.is_ok());
        assert!(speaker.speak("").await.is_ok());
    }
}
