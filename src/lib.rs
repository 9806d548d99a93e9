//! Saro - a sarcastic Telegram chatbot backed by a local llama.cpp server.

pub mod chatbot;
pub mod config;
