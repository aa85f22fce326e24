//! Session orchestration
//!
//! Drives one conversation: capture an utterance, transcribe it, decide
//! whether to respond, stream the model's reply, speak it and persist the
//! turn. Everything runs strictly in sequence on the calling task; one
//! utterance is finished before the next capture starts.
//!
//! Only capture failures (and configuration errors) end the loop. Every
//! other failure is logged, apologized for, and the session returns to
//! [`SessionState::Idle`].

use std::fmt;
use std::io::Write;

use crate::context::{ContextBuilder, ContextWindow};
use crate::db::ConversationStore;
use crate::error::TranscriptionFailure;
use crate::llm::{ChatModel, accumulate};
use crate::voice::{AudioSource, Speak, Transcribe, WakeWord, WakeWordMatch, WakeWordPolicy};
use crate::Result;

/// Transcript that ends the session
pub const STOP_PHRASE: &str = "stop";

/// Said and printed after a recoverable failure
pub const APOLOGY: &str = "I am sorry, I did not understand you. Can you please repeat that?";

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub wake_word: WakeWord,
    pub policy: WakeWordPolicy,
    /// Stored turns replayed to the model on each call
    pub history_turns: usize,
}

/// Where the orchestrator is in the current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Transcribing,
    Deciding,
    Responding,
    Persisting,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::Deciding => "deciding",
            Self::Responding => "responding",
            Self::Persisting => "persisting",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// How a single turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stop phrase was heard
    Stopped,
    /// Nothing usable was transcribed
    NoTranscript,
    /// Strict policy and the wake word was not said
    WakeWordAbsent,
    /// The model replied; speaking and persisting are best-effort
    Responded { spoken: bool, persisted: bool },
    /// The model failed or replied with nothing
    ModelFailed,
}

/// The collaborators a session drives
pub struct Components {
    pub audio: Box<dyn AudioSource>,
    pub transcriber: Box<dyn Transcribe>,
    pub store: Box<dyn ConversationStore>,
    pub model: Box<dyn ChatModel>,
    pub speaker: Box<dyn Speak>,
}

/// One voice conversation from calibration to stop
pub struct Session {
    config: SessionConfig,
    context: ContextBuilder,
    audio: Box<dyn AudioSource>,
    transcriber: Box<dyn Transcribe>,
    store: Box<dyn ConversationStore>,
    model: Box<dyn ChatModel>,
    speaker: Box<dyn Speak>,
    output: Box<dyn Write>,
    state: SessionState,
}

impl Session {
    /// Create a session printing to stdout
    #[must_use]
    pub fn new(config: SessionConfig, context: ContextBuilder, components: Components) -> Self {
        let Components {
            audio,
            transcriber,
            store,
            model,
            speaker,
        } = components;

        Self {
            config,
            context,
            audio,
            transcriber,
            store,
            model,
            speaker,
            output: Box::new(std::io::stdout()),
            state: SessionState::Idle,
        }
    }

    /// Send user-facing text to `output` instead of stdout
    #[must_use]
    pub fn with_output(mut self, output: impl Write + 'static) -> Self {
        self.output = Box::new(output);
        self
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Calibrate, then process utterances until the stop phrase
    ///
    /// The store is closed exactly once before returning, whatever the
    /// exit path.
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the microphone cannot be calibrated or
    /// is lost mid-session
    pub async fn run(mut self) -> Result<()> {
        let result = self.run_loop().await;

        self.store.close().await;
        self.state = SessionState::Stopped;

        if let Err(e) = &result {
            tracing::error!(error = %e, "session ended");
        }
        result
    }

    async fn run_loop(&mut self) -> Result<()> {
        self.say("Adjusting for ambient noise... Please wait.");
        self.audio.calibrate().await?;
        self.say("Ambient noise adjustment complete.");

        tracing::info!(
            wake_word = %self.config.wake_word,
            policy = %self.config.policy,
            model = self.model.name(),
            store = self.store.backend(),
            "session started"
        );
        self.say(&format!("Starting voice assistant. Say '{STOP_PHRASE}' to end."));

        loop {
            match self.run_turn().await {
                Ok(TurnOutcome::Stopped) => {
                    self.say("Stopping voice assistant.");
                    return Ok(());
                }
                Ok(outcome) => tracing::debug!(?outcome, "turn finished"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, state = %self.state, "turn failed");
                    self.apologize().await;
                }
            }
            self.state = SessionState::Idle;
        }
    }

    /// Process a single utterance
    ///
    /// # Errors
    ///
    /// Returns the capture error if no utterance could be recorded; all
    /// later failures are folded into the outcome
    pub async fn run_turn(&mut self) -> Result<TurnOutcome> {
        self.state = SessionState::Listening;
        self.say("Recording... Speak now.");
        let utterance = self.audio.capture_utterance().await?;

        self.state = SessionState::Transcribing;
        self.say("Recording complete. Recognizing...");
        let transcript = match self.transcriber.transcribe(&utterance).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) | Err(TranscriptionFailure::Unintelligible) => {
                tracing::info!("could not understand the audio");
                return Ok(self.idle(TurnOutcome::NoTranscript));
            }
            Err(TranscriptionFailure::ServiceUnavailable(reason)) => {
                tracing::warn!(%reason, "recognition service unavailable");
                return Ok(self.idle(TurnOutcome::NoTranscript));
            }
        };

        self.state = SessionState::Deciding;
        self.say(&format!("You said: {transcript}"));

        if is_stop_phrase(&transcript) {
            self.state = SessionState::Stopped;
            return Ok(TurnOutcome::Stopped);
        }

        if self.config.policy == WakeWordPolicy::Strict
            && self.config.wake_word.check(&transcript) == WakeWordMatch::Absent
        {
            tracing::debug!(wake_word = %self.config.wake_word, "wake word absent, ignoring");
            return Ok(self.idle(TurnOutcome::WakeWordAbsent));
        }

        self.state = SessionState::Responding;
        let history = if self.config.history_turns == 0 {
            Vec::new()
        } else {
            self.store.recent_turns(self.config.history_turns).await
        };
        let window = self.context.build_now(&history, &transcript);
        tracing::debug!(history = window.history_turns(), "context built");

        let reply = match self.stream_reply(&window).await {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => {
                tracing::warn!(model = self.model.name(), "model returned an empty reply");
                self.apologize().await;
                return Ok(self.idle(TurnOutcome::ModelFailed));
            }
            Err(e) => {
                tracing::warn!(error = %e, model = self.model.name(), "model call failed");
                self.apologize().await;
                return Ok(self.idle(TurnOutcome::ModelFailed));
            }
        };

        self.state = SessionState::Persisting;
        let spoken = match self.speaker.speak(&reply).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "speech output failed, reply shown as text only");
                false
            }
        };

        let persisted = match self.store.record_turn(&transcript, &reply).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, backend = self.store.backend(), "turn not stored");
                false
            }
        };

        Ok(self.idle(TurnOutcome::Responded { spoken, persisted }))
    }

    /// Stream the reply, echoing fragments as they arrive
    async fn stream_reply(&mut self, window: &ContextWindow) -> Result<String> {
        let stream = self.model.stream_chat(window).await?;

        let output = &mut self.output;
        let result = accumulate(stream, |fragment| {
            let _ = write!(output, "{fragment}");
            let _ = output.flush();
        })
        .await;

        let _ = writeln!(output);
        result
    }

    async fn apologize(&mut self) {
        self.say(APOLOGY);
        if let Err(e) = self.speaker.speak(APOLOGY).await {
            tracing::debug!(error = %e, "could not speak apology");
        }
    }

    fn say(&mut self, line: &str) {
        if let Err(e) = writeln!(self.output, "{line}").and_then(|()| self.output.flush()) {
            tracing::debug!(error = %e, "could not write to output");
        }
    }

    fn idle(&mut self, outcome: TurnOutcome) -> TurnOutcome {
        self.state = SessionState::Idle;
        outcome
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("model", &self.model.name())
            .field("store", &self.store.backend())
            .finish_non_exhaustive()
    }
}

/// Whether the whole transcript is the stop phrase
///
/// Case-insensitive; surrounding whitespace and trailing `.`/`!` that
/// recognizers add are ignored.
#[must_use]
pub fn is_stop_phrase(transcript: &str) -> bool {
    transcript
        .trim()
        .trim_end_matches(['.', '!'])
        .trim_end()
        .eq_ignore_ascii_case(STOP_PHRASE)
}

impl TurnOutcome {
    /// Whether a turn was stored
    #[must_use]
    pub const fn persisted(self) -> bool {
        matches!(self, Self::Responded { persisted: true, .. })
    }
}
