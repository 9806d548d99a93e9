//! Telegram client using teloxide.

use std::path::Path;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile};
use tracing::{info, warn};

/// Presence indicator shown to the user while we work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Typing,
    RecordingVoice,
    UploadingDocument,
}

impl From<Presence> for ChatAction {
    fn from(p: Presence) -> Self {
        match p {
            Presence::Typing => ChatAction::Typing,
            Presence::RecordingVoice => ChatAction::RecordVoice,
            Presence::UploadingDocument => ChatAction::UploadDocument,
        }
    }
}

/// The delivery primitives the reply pipeline needs from a chat platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), String>;
    async fn send_voice(&self, chat_id: i64, path: &Path) -> Result<(), String>;
    async fn send_document(&self, chat_id: i64, path: &Path, filename: &str) -> Result<(), String>;
    async fn send_presence(&self, chat_id: i64, presence: Presence) -> Result<(), String>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), String> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .map(|_| ())
            .map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })
    }

    /// Send an OGG Opus file as a voice message.
    async fn send_voice(&self, chat_id: i64, path: &Path) -> Result<(), String> {
        info!("🔊 Sending voice to chat {}", chat_id);

        let input_file = InputFile::file(path.to_path_buf()).file_name("voice.ogg");
        self.bot
            .send_voice(ChatId(chat_id), input_file)
            .await
            .map(|_| ())
            .map_err(|e| {
                let msg = format!("Failed to send voice: {e}");
                warn!("{}", msg);
                msg
            })
    }

    async fn send_document(&self, chat_id: i64, path: &Path, filename: &str) -> Result<(), String> {
        info!("📄 Sending {} to chat {}", filename, chat_id);

        let input_file = InputFile::file(path.to_path_buf()).file_name(filename.to_string());
        self.bot
            .send_document(ChatId(chat_id), input_file)
            .await
            .map(|_| ())
            .map_err(|e| {
                let msg = format!("Failed to send document: {e}");
                warn!("{}", msg);
                msg
            })
    }

    async fn send_presence(&self, chat_id: i64, presence: Presence) -> Result<(), String> {
        self.bot
            .send_chat_action(ChatId(chat_id), presence.into())
            .await
            .map(|_| ())
            .map_err(|e| format!("Failed to send chat action: {e}"))
    }
}
