//! Error types for the caring voice assistant

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a transcription produced no text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptionFailure {
    /// The service ran but could not make out any speech
    #[error("speech was unintelligible")]
    Unintelligible,

    /// The recognition service could not be reached or rejected the request
    #[error("recognition service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Errors that can occur in the assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone unavailable or lost
    #[error("capture failure: {0}")]
    Capture(String),

    /// Audio encoding or decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text produced no transcript
    #[error("transcription failure: {0}")]
    Transcription(#[from] TranscriptionFailure),

    /// Language model unreachable or stream aborted
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Conversation store unreachable, closed or not configured
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Speech synthesis or playback failed
    #[error("speech output failure: {0}")]
    SpeechOutput(String),

    /// Connection pool error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// `PostgreSQL` error
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error must end the session loop
    ///
    /// Only losing the microphone is fatal; everything else is logged and
    /// the loop carries on with the next utterance.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Capture(_) | Self::Config(_))
    }
}
