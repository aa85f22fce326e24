//! Speech-to-text (STT) processing

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::{ExposeSecret, SecretString};

use super::{Transcribe, Utterance};
use crate::error::TranscriptionFailure;
use crate::{Error, Result};

/// Connect timeout for recognition requests
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Response from Google Speech `speech:recognize`
#[derive(serde::Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    results: Vec<GoogleResult>,
}

#[derive(serde::Deserialize)]
struct GoogleResult {
    #[serde(default)]
    alternatives: Vec<GoogleAlternative>,
}

#[derive(serde::Deserialize)]
struct GoogleAlternative {
    #[serde(default)]
    transcript: String,
}

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SttProvider {
    /// Google Cloud Speech-to-Text
    #[default]
    Google,
    /// `OpenAI` Whisper
    Whisper,
    /// Deepgram
    Deepgram,
}

impl SttProvider {
    /// Model used when none is configured
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Google => "default",
            Self::Whisper => "whisper-1",
            Self::Deepgram => "nova-2",
        }
    }

    /// Environment variable holding this provider's API key
    #[must_use]
    pub const fn key_var(self) -> &'static str {
        match self {
            Self::Google => "GOOGLE_SPEECH_API_KEY",
            Self::Whisper => "OPENAI_API_KEY",
            Self::Deepgram => "DEEPGRAM_API_KEY",
        }
    }
}

/// Transcribes speech to text through a cloud recognition service
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    language: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the HTTP client cannot be built
    pub fn new(
        provider: SttProvider,
        api_key: SecretString,
        model: String,
        language: String,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!(
                "API key required for {provider:?} transcription"
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            language,
            provider,
        })
    }

    /// Transcribe WAV audio to text
    ///
    /// # Errors
    ///
    /// Returns `Unintelligible` if the service heard no words, or
    /// `ServiceUnavailable` if the request failed
    pub async fn transcribe_wav(
        &self,
        audio: &[u8],
    ) -> std::result::Result<String, TranscriptionFailure> {
        let transcript = match self.provider {
            SttProvider::Google => self.transcribe_google(audio).await,
            SttProvider::Whisper => self.transcribe_whisper(audio).await,
            SttProvider::Deepgram => self.transcribe_deepgram(audio).await,
        }?;

        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Err(TranscriptionFailure::Unintelligible);
        }

        tracing::info!(transcript, provider = ?self.provider, "transcription complete");
        Ok(transcript.to_string())
    }

    /// Transcribe using Google Speech
    async fn transcribe_google(
        &self,
        audio: &[u8],
    ) -> std::result::Result<String, TranscriptionFailure> {
        tracing::debug!(audio_bytes = audio.len(), "starting Google transcription");

        let body = serde_json::json!({
            "config": {
                "encoding": "LINEAR16",
                "languageCode": self.language,
                "model": self.model,
            },
            "audio": { "content": BASE64.encode(audio) },
        });

        let response = self
            .client
            .post("https://speech.googleapis.com/v1/speech:recognize")
            .query(&[("key", self.api_key.expose_secret())])
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;

        let result: GoogleResponse = check_status(response, "Google")
            .await?
            .json()
            .await
            .map_err(unavailable)?;

        Ok(result
            .results
            .first()
            .and_then(|r| r.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default())
    }

    /// Transcribe using `OpenAI` Whisper
    async fn transcribe_whisper(
        &self,
        audio: &[u8],
    ) -> std::result::Result<String, TranscriptionFailure> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(unavailable)?;

        let language = self.language.split('-').next().unwrap_or("en").to_string();
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", language);

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(unavailable)?;

        let result: WhisperResponse = check_status(response, "Whisper")
            .await?
            .json()
            .await
            .map_err(unavailable)?;
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(
        &self,
        audio: &[u8],
    ) -> std::result::Result<String, TranscriptionFailure> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let response = self
            .client
            .post("https://api.deepgram.com/v1/listen")
            .query(&[
                ("model", self.model.as_str()),
                ("language", self.language.as_str()),
                ("punctuate", "true"),
            ])
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(unavailable)?;

        let result: DeepgramResponse = check_status(response, "Deepgram")
            .await?
            .json()
            .await
            .map_err(unavailable)?;

        Ok(result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default())
    }
}

#[async_trait(?Send)]
impl Transcribe for SpeechToText {
    async fn transcribe(
        &self,
        utterance: &Utterance,
    ) -> std::result::Result<String, TranscriptionFailure> {
        if utterance.samples.is_empty() {
            return Err(TranscriptionFailure::Unintelligible);
        }

        let wav = utterance
            .to_wav()
            .map_err(|e| TranscriptionFailure::ServiceUnavailable(e.to_string()))?;
        self.transcribe_wav(&wav).await
    }
}

fn unavailable(e: impl std::fmt::Display) -> TranscriptionFailure {
    tracing::error!(error = %e, "recognition request failed");
    TranscriptionFailure::ServiceUnavailable(e.to_string())
}

async fn check_status(
    response: reqwest::Response,
    service: &str,
) -> std::result::Result<reqwest::Response, TranscriptionFailure> {
    let status = response.status();
    tracing::debug!(status = %status, service, "received response");

    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(status = %status, body = %body, service, "recognition API error");
    Err(TranscriptionFailure::ServiceUnavailable(format!(
        "{service} API error {status}: {body}"
    )))
}
