//! Caring Voice - a spoken conversation companion for elderly users
//!
//! This library provides the pieces of a voice loop that listens, answers
//! through a local language model and remembers past conversations:
//! - Voice processing (capture, utterance detection, STT, TTS, playback)
//! - Conversation persistence (`PostgreSQL`, `SQLite` or none)
//! - Context assembly and streamed chat with Ollama
//! - The session orchestrator that ties them together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Session                         │
//! │  Listen → Transcribe → Decide → Respond → Persist    │
//! └──────┬──────────┬───────────┬──────────┬────────────┘
//!        │          │           │          │
//!   ┌────▼───┐ ┌────▼────┐ ┌────▼────┐ ┌───▼────────┐
//!   │ Micro- │ │ STT/TTS │ │ Ollama  │ │ Postgres / │
//!   │ phone  │ │ service │ │  chat   │ │  SQLite    │
//!   └────────┘ └─────────┘ └─────────┘ └────────────┘
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod llm;
pub mod session;
pub mod voice;

pub use clock::{ClockReport, ClockSync};
pub use config::{Config, Options};
pub use context::{ChatMessage, ContextBuilder, ContextWindow, Role};
pub use db::{ConversationStore, ConversationTurn, DbPool, StoreTarget, open_store};
pub use error::{Error, Result, TranscriptionFailure};
pub use llm::{ChatModel, OllamaClient};
pub use session::{Components, Session, SessionConfig, SessionState, TurnOutcome};
