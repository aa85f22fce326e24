//! Wake word matching on transcripts

use std::fmt;

/// How the session treats transcripts that lack the wake word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WakeWordPolicy {
    /// Only respond when the wake word is present
    #[default]
    Strict,
    /// Always respond; the system preamble tells the model to ignore the wake word
    Advisory,
}

impl fmt::Display for WakeWordPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Advisory => write!(f, "advisory"),
        }
    }
}

/// Outcome of checking a transcript for the wake word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeWordMatch {
    /// The wake word appears in the transcript
    Matched,
    /// The wake word does not appear
    Absent,
}

/// A configured wake phrase such as "hey llama"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeWord {
    phrase: String,
}

impl WakeWord {
    /// Create a wake word, normalized to lowercase words
    #[must_use]
    pub fn new(phrase: &str) -> Self {
        Self {
            phrase: normalize(phrase),
        }
    }

    /// The normalized phrase
    #[must_use]
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Check whether a transcript contains the wake word
    ///
    /// Case and punctuation are ignored and the phrase must match whole
    /// words, so "Hey, llama!" matches "hey llama" but "hey llamas" does not.
    #[must_use]
    pub fn check(&self, transcript: &str) -> WakeWordMatch {
        if self.phrase.is_empty()
            || format!(" {} ", normalize(transcript)).contains(&format!(" {} ", self.phrase))
        {
            WakeWordMatch::Matched
        } else {
            WakeWordMatch::Absent
        }
    }
}

/// Lowercase words separated by single spaces, punctuation dropped
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl fmt::Display for WakeWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.phrase)
    }
}
