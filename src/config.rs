//! Configuration for the caring voice assistant
//!
//! Plain settings come from CLI flags with environment fallbacks (see
//! [`Options`]). Secrets and database parameters are only read from the
//! environment.

use std::path::PathBuf;

use chrono::FixedOffset;
use secrecy::SecretString;

use crate::context::{ContextBuilder, parse_utc_offset};
use crate::db::{PgParams, StoreTarget};
use crate::session::SessionConfig;
use crate::voice::{SttProvider, TtsProvider, WakeWord, WakeWordPolicy};
use crate::{Error, Result};

/// Default Ollama server
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Settings shared by every subcommand
#[derive(Debug, Clone, clap::Args)]
pub struct Options {
    /// Ollama model name
    #[arg(long, env = "CARING_MODEL", default_value = "llama3")]
    pub model: String,

    /// Ollama server URL
    #[arg(long, env = "OLLAMA_HOST", default_value = DEFAULT_OLLAMA_URL)]
    pub ollama_url: String,

    /// Phrase that addresses the assistant
    #[arg(long, env = "CARING_WAKE_WORD", default_value = "hey llama")]
    pub wake_word: String,

    /// Whether the wake word is required before responding
    #[arg(long, env = "CARING_WAKE_WORD_POLICY", value_enum, default_value_t)]
    pub wake_word_policy: WakeWordPolicy,

    /// Stored turns sent to the model as history
    #[arg(long, env = "CARING_HISTORY_TURNS", default_value_t = 10)]
    pub history_turns: usize,

    /// Fixed UTC offset used for the date and time in the preamble
    #[arg(
        long,
        env = "CARING_UTC_OFFSET",
        default_value = "+00:00",
        allow_hyphen_values = true
    )]
    pub utc_offset: String,

    /// Store conversations in a local `SQLite` file instead of `PostgreSQL`
    #[arg(long = "sqlite", env = "CARING_SQLITE_PATH")]
    pub sqlite_path: Option<PathBuf>,

    /// NTP server for the startup clock check
    #[arg(long, env = "CARING_NTP_SERVER", default_value = "pool.ntp.org:123")]
    pub ntp_server: String,

    /// Print replies instead of speaking them
    #[arg(long, env = "CARING_TEXT_ONLY")]
    pub text_only: bool,

    /// Speech recognition service
    #[arg(long, env = "CARING_STT_PROVIDER", value_enum, default_value_t)]
    pub stt_provider: SttProvider,

    /// Recognition model (provider default if unset)
    #[arg(long, env = "CARING_STT_MODEL")]
    pub stt_model: Option<String>,

    /// Recognition language
    #[arg(long, env = "CARING_STT_LANGUAGE", default_value = "en-US")]
    pub stt_language: String,

    /// Speech synthesis service
    #[arg(long, env = "CARING_TTS_PROVIDER", value_enum, default_value_t)]
    pub tts_provider: TtsProvider,

    /// Synthesis voice name or id (provider default if unset)
    #[arg(long, env = "CARING_TTS_VOICE")]
    pub tts_voice: Option<String>,

    /// Speaking rate (0.25 to 4.0)
    #[arg(long, env = "CARING_TTS_SPEED", default_value_t = 1.0)]
    pub tts_speed: f32,

    /// Synthesis model (provider default if unset)
    #[arg(long, env = "CARING_TTS_MODEL")]
    pub tts_model: Option<String>,
}

/// Speech recognition settings
#[derive(Debug)]
pub struct SttSettings {
    pub provider: SttProvider,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub language: String,
}

/// Speech synthesis settings; absent when replies are text only
#[derive(Debug)]
pub struct TtsSettings {
    pub provider: TtsProvider,
    pub api_key: SecretString,
    pub voice: String,
    pub speed: f32,
    pub model: Option<String>,
}

/// Fully resolved configuration
#[derive(Debug)]
pub struct Config {
    pub model: String,
    pub ollama_url: String,
    pub utc_offset: FixedOffset,
    pub session: SessionConfig,
    pub store: StoreTarget,
    pub ntp_server: String,
    pub stt: SttSettings,
    pub tts: Option<TtsSettings>,
}

impl Config {
    /// Resolve `options` against the process environment
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a setting is invalid
    pub fn load(options: Options) -> Result<Self> {
        Self::load_with(options, |key| std::env::var(key).ok())
    }

    /// Resolve `options`, reading secrets and database settings through `lookup`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a setting is invalid
    pub fn load_with(options: Options, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let secret = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(SecretString::from)
        };

        if options.model.trim().is_empty() {
            return Err(Error::Config("model name must not be empty".to_string()));
        }

        let utc_offset = parse_utc_offset(&options.utc_offset)?;

        let store = if let Some(params) = PgParams::from_lookup(&lookup) {
            StoreTarget::Postgres(params)
        } else if let Some(path) = options.sqlite_path {
            StoreTarget::Sqlite(path)
        } else {
            StoreTarget::Detached
        };

        let stt = SttSettings {
            provider: options.stt_provider,
            api_key: secret(options.stt_provider.key_var()),
            model: options
                .stt_model
                .unwrap_or_else(|| options.stt_provider.default_model().to_string()),
            language: options.stt_language,
        };

        let tts = if options.text_only {
            None
        } else if let Some(api_key) = secret(options.tts_provider.key_var()) {
            Some(TtsSettings {
                provider: options.tts_provider,
                api_key,
                voice: options
                    .tts_voice
                    .unwrap_or_else(|| options.tts_provider.default_voice().to_string()),
                speed: options.tts_speed,
                model: options.tts_model,
            })
        } else {
            tracing::warn!(
                provider = ?options.tts_provider,
                key = options.tts_provider.key_var(),
                "no speech synthesis key, replies will be text only"
            );
            None
        };

        Ok(Self {
            model: options.model,
            ollama_url: options.ollama_url,
            utc_offset,
            session: SessionConfig {
                wake_word: WakeWord::new(&options.wake_word),
                policy: options.wake_word_policy,
                history_turns: options.history_turns,
            },
            store,
            ntp_server: options.ntp_server,
            stt,
            tts,
        })
    }

    /// Context builder for the configured wake word and offset
    #[must_use]
    pub fn context_builder(&self) -> ContextBuilder {
        ContextBuilder::new(self.session.wake_word.phrase(), self.utc_offset)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use clap::Parser;
    use secrecy::ExposeSecret;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        options: Options,
    }

    fn options(args: &[&str]) -> Options {
        let argv = std::iter::once("caring").chain(args.iter().copied());
        TestCli::parse_from(argv).options
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::load_with(options(&[]), env(&[])).unwrap();

        assert_eq!(config.model, "llama3");
        assert_eq!(config.ollama_url, DEFAULT_OLLAMA_URL);
        assert_eq!(config.session.wake_word.phrase(), "hey llama");
        assert_eq!(config.session.policy, WakeWordPolicy::Strict);
        assert_eq!(config.session.history_turns, 10);
        assert_eq!(config.utc_offset.local_minus_utc(), 0);
        assert!(matches!(config.store, StoreTarget::Detached));
        assert_eq!(config.stt.provider, SttProvider::Google);
        assert!(config.stt.api_key.is_none());
        assert_eq!(config.stt.language, "en-US");
        assert!(config.tts.is_none());
    }

    #[test]
    fn test_flags() {
        let opts = options(&[
            "--model",
            "mistral",
            "--wake-word",
            "Hey Caring",
            "--wake-word-policy",
            "advisory",
            "--history-turns",
            "4",
            "--utc-offset",
            "-05:00",
            "--stt-provider",
            "whisper",
        ]);
        let config = Config::load_with(opts, env(&[("OPENAI_API_KEY", "sk-test")])).unwrap();

        assert_eq!(config.model, "mistral");
        assert_eq!(config.session.wake_word.phrase(), "hey caring");
        assert_eq!(config.session.policy, WakeWordPolicy::Advisory);
        assert_eq!(config.session.history_turns, 4);
        assert_eq!(config.utc_offset.local_minus_utc(), -5 * 3600);
        assert_eq!(config.stt.provider, SttProvider::Whisper);
        assert_eq!(config.stt.model, "whisper-1");
        assert_eq!(
            config.stt.api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("sk-test".to_string())
        );
        // Same key drives the default TTS provider
        assert_eq!(config.tts.map(|t| t.voice).as_deref(), Some("alloy"));
    }

    #[test]
    fn test_postgres_takes_precedence_over_sqlite() {
        let lookup = env(&[
            ("PGHOST", "localhost"),
            ("PGDATABASE", "care"),
            ("PGUSER", "care"),
            ("PGPASSWORD", "pw"),
        ]);
        let config = Config::load_with(options(&["--sqlite", "/tmp/turns.db"]), lookup).unwrap();
        assert!(matches!(config.store, StoreTarget::Postgres(_)));

        let config = Config::load_with(options(&["--sqlite", "/tmp/turns.db"]), env(&[])).unwrap();
        assert!(matches!(config.store, StoreTarget::Sqlite(_)));
    }

    #[test]
    fn test_partial_postgres_env_disables_persistence() {
        let lookup = env(&[("PGHOST", "localhost"), ("PGDATABASE", "care")]);
        let config = Config::load_with(options(&[]), lookup).unwrap();
        assert!(matches!(config.store, StoreTarget::Detached));
    }

    #[test]
    fn test_text_only_ignores_tts_key() {
        let lookup = env(&[("OPENAI_API_KEY", "sk-test")]);
        let config = Config::load_with(options(&["--text-only"]), lookup).unwrap();
        assert!(config.tts.is_none());
    }

    #[test]
    fn test_elevenlabs_settings() {
        let opts = options(&["--tts-provider", "elevenlabs", "--tts-voice", "Rachel"]);
        let config = Config::load_with(opts, env(&[("ELEVENLABS_API_KEY", "xi")])).unwrap();
        let tts = config.tts.unwrap();
        assert_eq!(tts.provider, TtsProvider::ElevenLabs);
        assert_eq!(tts.voice, "Rachel");
    }

    #[test]
    fn test_elevenlabs_default_voice() {
        let opts = options(&["--tts-provider", "elevenlabs"]);
        let config = Config::load_with(opts, env(&[("ELEVENLABS_API_KEY", "xi")])).unwrap();
        let tts = config.tts.unwrap();
        assert_eq!(tts.voice, TtsProvider::ElevenLabs.default_voice());
        assert_ne!(tts.voice, TtsProvider::OpenAi.default_voice());
    }

    #[test]
    fn test_invalid_offset_rejected() {
        let err = Config::load_with(options(&["--utc-offset", "noon"]), env(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_blank_key_is_missing() {
        let config = Config::load_with(options(&[]), env(&[("GOOGLE_SPEECH_API_KEY", "  ")]))
            .unwrap();
        assert!(config.stt.api_key.is_none());
    }
}
