//! Shared test utilities
//!
//! Scripted stand-ins for the session's collaborators. Every mock records
//! into one shared [`Calls`] log so tests can assert on what the session did.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use caring_voice::context::{ContextBuilder, ContextWindow};
use caring_voice::db::{ConversationStore, ConversationTurn};
use caring_voice::llm::{ChatModel, FragmentStream};
use caring_voice::session::{Components, Session, SessionConfig};
use caring_voice::voice::{
    AudioSource, SAMPLE_RATE, Speak, Transcribe, Utterance, WakeWord, WakeWordPolicy,
};
use caring_voice::{Error, Result, TranscriptionFailure};
use chrono::{FixedOffset, TimeZone, Utc};
use futures::StreamExt;

/// Generate sine wave audio samples
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

/// Everything the mocks observed
#[derive(Debug, Default)]
pub struct Calls {
    pub calibrate: usize,
    pub capture: usize,
    pub transcribe: usize,
    pub recent: usize,
    pub record: usize,
    pub close: usize,
    pub chat: usize,
    pub speak: usize,
    pub spoken: Vec<String>,
    pub recorded: Vec<(String, String)>,
    pub windows: Vec<ContextWindow>,
}

pub type CallLog = Arc<Mutex<Calls>>;

/// Audio source that yields one utterance per scripted transcript, then
/// reports the microphone as lost
pub struct ScriptedAudio {
    remaining: usize,
    calls: CallLog,
}

#[async_trait(?Send)]
impl AudioSource for ScriptedAudio {
    async fn calibrate(&mut self) -> Result<()> {
        self.calls.lock().unwrap().calibrate += 1;
        Ok(())
    }

    async fn capture_utterance(&mut self) -> Result<Utterance> {
        self.calls.lock().unwrap().capture += 1;
        if self.remaining == 0 {
            return Err(Error::Capture("input device disappeared".to_string()));
        }
        self.remaining -= 1;
        Ok(Utterance::new(generate_sine_samples(220.0, 0.5, 0.3), SAMPLE_RATE))
    }
}

/// Transcriber returning scripted results in order
pub struct ScriptedTranscriber {
    results: Mutex<VecDeque<std::result::Result<String, TranscriptionFailure>>>,
    calls: CallLog,
}

#[async_trait(?Send)]
impl Transcribe for ScriptedTranscriber {
    async fn transcribe(
        &self,
        _utterance: &Utterance,
    ) -> std::result::Result<String, TranscriptionFailure> {
        self.calls.lock().unwrap().transcribe += 1;
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(TranscriptionFailure::Unintelligible))
    }
}

/// In-memory store; history is kept newest first like a real backend
pub struct MockStore {
    turns: Vec<ConversationTurn>,
    fail_writes: bool,
    calls: CallLog,
}

#[async_trait(?Send)]
impl ConversationStore for MockStore {
    async fn record_turn(&mut self, user_message: &str, assistant_response: &str) -> Result<()> {
        let mut calls = self.calls.lock().unwrap();
        calls.record += 1;
        if self.fail_writes {
            return Err(Error::PersistenceUnavailable("disk full".to_string()));
        }
        calls
            .recorded
            .push((user_message.to_string(), assistant_response.to_string()));
        self.turns.insert(
            0,
            ConversationTurn {
                user_message: user_message.to_string(),
                assistant_response: assistant_response.to_string(),
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }

    async fn recent_turns(&mut self, limit: usize) -> Vec<ConversationTurn> {
        self.calls.lock().unwrap().recent += 1;
        self.turns.iter().take(limit).cloned().collect()
    }

    async fn close(&mut self) {
        self.calls.lock().unwrap().close += 1;
    }

    fn backend(&self) -> &'static str {
        "mock"
    }
}

/// What the mock model does when called
#[derive(Debug, Clone)]
pub enum ModelScript {
    /// Stream these fragments, then finish
    Reply(Vec<&'static str>),
    /// Refuse the request
    Unreachable,
    /// Stream these fragments, then fail
    DropsMidStream(Vec<&'static str>),
}

pub struct MockModel {
    script: ModelScript,
    calls: CallLog,
}

#[async_trait(?Send)]
impl ChatModel for MockModel {
    async fn stream_chat(&self, window: &ContextWindow) -> Result<FragmentStream> {
        {
            let mut calls = self.calls.lock().unwrap();
            calls.chat += 1;
            calls.windows.push(window.clone());
        }

        let items: Vec<Result<String>> = match &self.script {
            ModelScript::Unreachable => {
                return Err(Error::ModelUnavailable("connection refused".to_string()));
            }
            ModelScript::Reply(parts) => parts.iter().map(|p| Ok((*p).to_string())).collect(),
            ModelScript::DropsMidStream(parts) => parts
                .iter()
                .map(|p| Ok((*p).to_string()))
                .chain(std::iter::once(Err(Error::ModelUnavailable(
                    "stream ended before completion".to_string(),
                ))))
                .collect(),
        };

        Ok(futures::stream::iter(items).boxed_local())
    }

    fn name(&self) -> &str {
        "mock-llama"
    }
}

pub struct MockSpeaker {
    fail: bool,
    calls: CallLog,
}

#[async_trait(?Send)]
impl Speak for MockSpeaker {
    async fn speak(&mut self, text: &str) -> Result<()> {
        let mut calls = self.calls.lock().unwrap();
        calls.speak += 1;
        if self.fail {
            return Err(Error::SpeechOutput("no output device available".to_string()));
        }
        calls.spoken.push(text.to_string());
        Ok(())
    }
}

/// Output sink tests can read back
#[derive(Clone, Default)]
pub struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A turn already in the store
pub fn stored_turn(user: &str, assistant: &str, minute: u32) -> ConversationTurn {
    ConversationTurn {
        user_message: user.to_string(),
        assistant_response: assistant.to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0).unwrap(),
    }
}

/// Builder for a session wired to mocks
pub struct Harness {
    transcripts: Vec<std::result::Result<String, TranscriptionFailure>>,
    policy: WakeWordPolicy,
    model: ModelScript,
    history: Vec<ConversationTurn>,
    store: Option<Box<dyn ConversationStore>>,
    fail_writes: bool,
    fail_speech: bool,
    history_turns: usize,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            transcripts: Vec::new(),
            policy: WakeWordPolicy::Strict,
            model: ModelScript::Reply(vec!["It's ", "three ", "o'clock."]),
            history: Vec::new(),
            store: None,
            fail_writes: false,
            fail_speech: false,
            history_turns: 10,
        }
    }

    /// Queue a successfully transcribed utterance
    pub fn heard(mut self, text: &str) -> Self {
        self.transcripts.push(Ok(text.to_string()));
        self
    }

    /// Queue an utterance that fails to transcribe
    pub fn misheard(mut self, failure: TranscriptionFailure) -> Self {
        self.transcripts.push(Err(failure));
        self
    }

    pub fn policy(mut self, policy: WakeWordPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn model(mut self, script: ModelScript) -> Self {
        self.model = script;
        self
    }

    /// Seed the mock store, newest first
    pub fn history(mut self, turns: Vec<ConversationTurn>) -> Self {
        self.history = turns;
        self
    }

    pub fn history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    /// Use a real store instead of the mock
    pub fn store(mut self, store: Box<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn failing_speech(mut self) -> Self {
        self.fail_speech = true;
        self
    }

    pub fn build(self) -> (Session, CallLog, SharedOutput) {
        let calls = CallLog::default();
        let output = SharedOutput::default();

        let store: Box<dyn ConversationStore> = match self.store {
            Some(store) => store,
            None => Box::new(MockStore {
                turns: self.history,
                fail_writes: self.fail_writes,
                calls: Arc::clone(&calls),
            }),
        };

        let components = Components {
            audio: Box::new(ScriptedAudio {
                remaining: self.transcripts.len(),
                calls: Arc::clone(&calls),
            }),
            transcriber: Box::new(ScriptedTranscriber {
                results: Mutex::new(self.transcripts.into()),
                calls: Arc::clone(&calls),
            }),
            store,
            model: Box::new(MockModel {
                script: self.model,
                calls: Arc::clone(&calls),
            }),
            speaker: Box::new(MockSpeaker {
                fail: self.fail_speech,
                calls: Arc::clone(&calls),
            }),
        };

        let config = SessionConfig {
            wake_word: WakeWord::new("hey llama"),
            policy: self.policy,
            history_turns: self.history_turns,
        };
        let context = ContextBuilder::new("hey llama", FixedOffset::east_opt(0).unwrap());

        let session = Session::new(config, context, components).with_output(output.clone());
        (session, calls, output)
    }
}
