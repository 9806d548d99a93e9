//! Chatbot module - relays Telegram messages to a local llama.cpp server.

pub mod classify;
pub mod engine;
pub mod format;
pub mod language;
pub mod llama;
pub mod memory;
pub mod message;
pub mod prompt;
pub mod telegram;
pub mod tts;


pub use engine::{ChatbotConfig, ChatbotEngine};
pub use message::{IncomingMessage, Role, Turn};
pub use telegram::TelegramClient;
