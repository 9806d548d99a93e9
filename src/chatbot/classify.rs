//! Decides what shape a reply should take from the user's request.
//!
//! Plain substring matching. It misfires on things like "make me laugh",
//! which is accepted.

use serde::Deserialize;

/// A request containing any of these (case-insensitive) expects code.
pub const CODE_KEYWORDS: &[&str] = &[
    "write", "generate", "show me", "create", "build", "make", "a script", "code", "function",
];

/// Phrases that ask for a spoken answer in [`ReplyMode::Auto`].
pub const VOICE_KEYWORDS: &[&str] = &[
    "voice message",
    "send a voice",
    "say it out loud",
    "out loud",
    "read it aloud",
    "talk to me",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Text,
    Voice,
    Code,
}

/// When conversational replies are also spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
    /// Never speak.
    Text,
    /// Always send a voice note along with the text.
    Voice,
    /// Speak only when asked to.
    #[default]
    Auto,
}

pub fn is_code_request(message: &str) -> bool {
    let lower = message.to_lowercase();
    CODE_KEYWORDS.iter().any(|k| lower.contains(k))
}

pub fn is_voice_request(message: &str) -> bool {
    let lower = message.to_lowercase();
    VOICE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Classify a request. Code wins over voice.
pub fn classify(message: &str, mode: ReplyMode) -> ReplyKind {
    if is_code_request(message) {
        return ReplyKind::Code;
    }
    match mode {
        ReplyMode::Text => ReplyKind::Text,
        ReplyMode::Voice => ReplyKind::Voice,
        ReplyMode::Auto if is_voice_request(message) => ReplyKind::Voice,
        ReplyMode::Auto => ReplyKind::Text,
    }
}
