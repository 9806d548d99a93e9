//! Chatbot engine - runs one user turn from message to delivered reply.
//!
//! received → detecting language → prompting → inferring → classifying →
//! formatting → (synthesizing voice)? → delivering → done.
//!
//! Any failing stage ends the turn with exactly one error message to the user.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::chatbot::classify::{classify, ReplyKind, ReplyMode};
use crate::chatbot::format::{extract_code, split_message, MAX_MESSAGE_LENGTH};
use crate::chatbot::language::detect_language;
use crate::chatbot::llama::{self, Completer};
use crate::chatbot::memory::{is_preference, InFlight, MemoryConfig, SessionRegistry};
use crate::chatbot::message::{IncomingMessage, Turn};
use crate::chatbot::prompt::{build_prompt, Persona};
use crate::chatbot::telegram::{Messenger, Presence};
use crate::chatbot::tts::{temp_file, VoiceSynthesizer};

pub const SERVER_ERROR_REPLY: &str = "❌ Server error. Please try again later.";
pub const SERVER_UNREACHABLE_REPLY: &str = "❌ Server unreachable. Please make sure llama-server is running.";
pub const UNEXPECTED_ERROR_REPLY: &str = "❌ Something unexpected went wrong. Try again in a moment.";
pub const BUSY_REPLY: &str = "⏳ Hold on, I'm still thinking about your last message.";
pub const CODE_SUMMARY_FALLBACK: &str = "Here's your code. Try not to break it.";

/// Stages of a turn, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    DetectingLanguage,
    Prompting,
    Inferring,
    Classifying,
    Formatting,
    SynthesizingVoice,
    Delivering,
    Done,
}

/// Why a turn failed.
#[derive(Debug)]
pub enum PipelineError {
    /// Completion server answered with a non-success status.
    ServerStatus(u16),
    /// Completion server could not be reached or sent garbage.
    ServerUnreachable(String),
    Voice(String),
    Document(String),
    Delivery(String),
}

impl PipelineError {
    /// The one message the user sees for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ServerStatus(_) => SERVER_ERROR_REPLY,
            Self::ServerUnreachable(_) => SERVER_UNREACHABLE_REPLY,
            Self::Voice(_) | Self::Document(_) | Self::Delivery(_) => UNEXPECTED_ERROR_REPLY,
        }
    }
}

impl From<llama::Error> for PipelineError {
    fn from(e: llama::Error) -> Self {
        match e {
            llama::Error::Status(code) => Self::ServerStatus(code),
            other => Self::ServerUnreachable(other.to_string()),
        }
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServerStatus(code) => write!(f, "llama server returned HTTP {code}"),
            Self::ServerUnreachable(e) => write!(f, "llama server unreachable: {e}"),
            Self::Voice(e) => write!(f, "voice synthesis failed: {e}"),
            Self::Document(e) => write!(f, "document export failed: {e}"),
            Self::Delivery(e) => write!(f, "delivery failed: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Chatbot configuration.
#[derive(Debug, Clone)]
pub struct ChatbotConfig {
    pub persona: Persona,
    pub reply_mode: ReplyMode,
    pub memory: MemoryConfig,
    /// Longest single Telegram message, in characters.
    pub message_limit: usize,
    /// Upper bound of the simulated typing delay per message.
    pub max_typing_delay: Duration,
    /// Where transient voice and document files are written.
    pub artifact_dir: PathBuf,
}

impl Default for ChatbotConfig {
    fn default() -> Self {
        Self {
            persona: Persona::default(),
            reply_mode: ReplyMode::default(),
            memory: MemoryConfig::default(),
            message_limit: MAX_MESSAGE_LENGTH,
            max_typing_delay: Duration::from_secs(3),
            artifact_dir: PathBuf::from("."),
        }
    }
}

/// The chatbot engine.
pub struct ChatbotEngine {
    config: ChatbotConfig,
    completer: Arc<dyn Completer>,
    messenger: Arc<dyn Messenger>,
    voice: Option<Arc<dyn VoiceSynthesizer>>,
    sessions: Arc<Mutex<SessionRegistry>>,
    in_flight: InFlight,
}

impl ChatbotEngine {
    pub fn new(
        config: ChatbotConfig,
        completer: Arc<dyn Completer>,
        messenger: Arc<dyn Messenger>,
        voice: Option<Arc<dyn VoiceSynthesizer>>,
    ) -> Self {
        let sessions = SessionRegistry::new(config.memory.clone());
        Self {
            config,
            completer,
            messenger,
            voice,
            sessions: Arc::new(Mutex::new(sessions)),
            in_flight: InFlight::new(),
        }
    }

    /// Whether `user_id` has a turn in progress.
    pub fn is_busy(&self, user_id: i64) -> bool {
        self.in_flight.is_busy(user_id)
    }

    /// Conversation history visible to `user_id`.
    pub async fn history(&self, user_id: i64) -> Vec<Turn> {
        self.sessions.lock().await.history(user_id)
    }

    /// Stored facts about `user_id`.
    pub async fn facts(&self, user_id: i64) -> Vec<String> {
        self.sessions.lock().await.facts(user_id)
    }

    /// Handle an incoming text message.
    pub async fn handle_message(&self, msg: IncomingMessage) {
        info!("📨 [User] {} ({}): \"{}\"", msg.display_name, msg.user_id, msg.preview());

        let Some(_guard) = self.in_flight.try_acquire(msg.user_id) else {
            info!("⏳ {} already has a turn in flight, rejecting", msg.user_id);
            if let Err(e) = self.messenger.send_text(msg.chat_id, BUSY_REPLY).await {
                warn!("Failed to send busy notice: {}", e);
            }
            return;
        };

        if let Err(e) = self.run_turn(&msg).await {
            error!("Turn for {} failed: {}", msg.user_id, e);
            if let Err(send_err) = self.messenger.send_text(msg.chat_id, e.user_message()).await {
                error!("Failed to send error message: {}", send_err);
            }
        }
        debug!("Stage {:?}", Stage::Done);
    }

    async fn run_turn(&self, msg: &IncomingMessage) -> Result<(), PipelineError> {
        debug!("Stage {:?}", Stage::Received);

        debug!("Stage {:?}", Stage::DetectingLanguage);
        let lang = detect_language(&msg.text);
        info!("🌐 Detected language: {}", lang);

        debug!("Stage {:?}", Stage::Prompting);
        let prompt = {
            let mut sessions = self.sessions.lock().await;
            sessions.evict_idle();

            let mut facts = sessions.facts(msg.user_id);
            if is_preference(&msg.text) {
                facts.push(msg.text.clone());
            }
            let mut history = sessions.history(msg.user_id);
            history.push(Turn::user(msg.text.clone()));

            build_prompt(&self.config.persona, &msg.display_name, &facts, lang, &history)
        };

        debug!("Stage {:?}", Stage::Inferring);
        let raw = self.completer.complete(&prompt).await?;
        let reply = match raw.trim() {
            "" => {
                warn!("Empty completion, using fallback");
                self.config.persona.fallback_reply.clone()
            }
            text => text.to_string(),
        };

        {
            let mut sessions = self.sessions.lock().await;
            sessions.remember_preference(msg.user_id, &msg.text);
            sessions.commit_exchange(msg.user_id, &msg.text, &reply);
        }

        debug!("Stage {:?}", Stage::Classifying);
        let kind = classify(&msg.text, self.config.reply_mode);
        info!("🗂️ Reply kind: {:?}", kind);

        match kind {
            ReplyKind::Text => self.deliver_text(msg.chat_id, &reply).await,
            ReplyKind::Voice => {
                self.deliver_text(msg.chat_id, &reply).await?;
                self.deliver_voice(msg.chat_id, &reply, lang).await
            }
            ReplyKind::Code => self.deliver_code(msg, &reply).await,
        }
    }

    fn typing_delay(&self, text: &str) -> Duration {
        let ms = text.chars().count() as u64 * 10;
        Duration::from_millis(ms).min(self.config.max_typing_delay)
    }

    async fn show(&self, chat_id: i64, presence: Presence) {
        if let Err(e) = self.messenger.send_presence(chat_id, presence).await {
            debug!("Presence {:?} failed: {}", presence, e);
        }
    }

    async fn deliver_text(&self, chat_id: i64, reply: &str) -> Result<(), PipelineError> {
        debug!("Stage {:?}", Stage::Formatting);
        let parts = split_message(reply, self.config.message_limit);
        if parts.len() > 1 {
            info!("✂️ Reply too long, split into {} parts", parts.len());
        }

        debug!("Stage {:?}", Stage::Delivering);
        for part in parts {
            let preview: String = part.chars().take(80).collect();
            info!("💬 [Bot] Replying: {}", preview);
            self.show(chat_id, Presence::Typing).await;
            tokio::time::sleep(self.typing_delay(&part)).await;
            self.messenger
                .send_text(chat_id, &part)
                .await
                .map_err(PipelineError::Delivery)?;
        }
        Ok(())
    }

    async fn deliver_voice(&self, chat_id: i64, reply: &str, lang: &str) -> Result<(), PipelineError> {
        let Some(ref voice) = self.voice else {
            warn!("Voice reply requested but no synthesizer is configured");
            return Ok(());
        };

        debug!("Stage {:?}", Stage::SynthesizingVoice);
        self.show(chat_id, Presence::RecordingVoice).await;
        let audio = voice.synthesize(reply, lang).await.map_err(PipelineError::Voice)?;

        debug!("Stage {:?}", Stage::Delivering);
        self.messenger
            .send_voice(chat_id, audio.path())
            .await
            .map_err(PipelineError::Delivery)
    }

    async fn deliver_code(&self, msg: &IncomingMessage, reply: &str) -> Result<(), PipelineError> {
        debug!("Stage {:?}", Stage::Formatting);
        let artifact = extract_code(
            &msg.text,
            reply,
            &self.config.persona.slug(),
            CODE_SUMMARY_FALLBACK,
            self.config.message_limit,
        );

        let file = temp_file(&self.config.artifact_dir, "saro_doc_", ".txt").map_err(PipelineError::Document)?;
        tokio::fs::write(file.path(), artifact.content.as_bytes())
            .await
            .map_err(|e| PipelineError::Document(format!("Failed to write document: {e}")))?;

        debug!("Stage {:?}", Stage::Delivering);
        self.show(msg.chat_id, Presence::Typing).await;
        self.messenger
            .send_text(msg.chat_id, &artifact.summary)
            .await
            .map_err(PipelineError::Delivery)?;

        self.show(msg.chat_id, Presence::UploadingDocument).await;
        self.messenger
            .send_document(msg.chat_id, file.path(), &artifact.filename)
            .await
            .map_err(PipelineError::Delivery)
    }
}

/// System-level summary of how the engine is set up, logged at startup.
pub fn describe(config: &ChatbotConfig, has_voice: bool) -> String {
    format!(
        "persona={} reply_mode={:?} memory={:?} limit={} voice={}",
        config.persona.name,
        config.reply_mode,
        config.memory.scope,
        config.message_limit,
        if has_voice { "on" } else { "off" }
    )
}
