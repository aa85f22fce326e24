//! System preamble template

use chrono::{DateTime, FixedOffset};

use crate::{Error, Result};

/// Render the system preamble for the given local time
///
/// The preamble carries the date, time, weekday and UTC offset so the model
/// can answer time questions, and tells it to speak plainly and to disregard
/// the wake word.
#[must_use]
pub fn system_preamble(now: DateTime<FixedOffset>, wake_word: &str) -> String {
    let date = now.format("%B %-d, %Y");
    let time = now.format("%-I:%M %p");
    let weekday = now.format("%A");
    let offset = now.format("%:z");

    format!(
        "You are a warm, patient voice assistant for an elderly person. \
         Today is {weekday}, {date}. The local time is {time} (UTC{offset}).\n\
         Your replies are read aloud, so talk the way a kind person talks: \
         no markdown, lists, symbols, code or technical jargon.\n\
         Keep answers short and clear, usually one to three sentences.\n\
         The user may begin with the wake word \"{wake_word}\". Ignore it \
         and never mention that you are ignoring it."
    )
}

/// Parse a fixed UTC offset such as `+05:30`, `-0800` or `Z`
///
/// # Errors
///
/// Returns `Error::Config` if the offset is malformed or out of range
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| invalid(raw));
    }

    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'+') => (1, &raw[1..]),
        Some(b'-') => (-1, &raw[1..]),
        _ => return Err(invalid(raw)),
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid(raw));
    }

    let hours: i32 = digits[..2].parse().map_err(|_| invalid(raw))?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid(raw))?;
    if minutes >= 60 {
        return Err(invalid(raw));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(|| invalid(raw))
}

fn invalid(raw: &str) -> Error {
    Error::Config(format!("invalid UTC offset: {raw:?} (expected e.g. +05:30)"))
}
