//! Conversation context assembly
//!
//! Builds the message sequence sent to the model for one chat call:
//! system preamble, stored history in chronological order, then the
//! current utterance.

mod builder;
mod preamble;

pub use builder::{ChatMessage, ContextBuilder, ContextWindow, Role};
pub use preamble::{parse_utc_offset, system_preamble};
