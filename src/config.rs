use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chatbot::classify::ReplyMode;
use crate::chatbot::engine::ChatbotConfig;
use crate::chatbot::format::{MAX_MESSAGE_LENGTH, MIN_SPLIT_OFFSET};
use crate::chatbot::llama::GenerationParams;
use crate::chatbot::memory::{MemoryConfig, MemoryScope};
use crate::chatbot::prompt::Persona;
use crate::chatbot::tts::VoiceStrategy;

/// Environment variable holding the bot token.
pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// No bot token in the environment.
    MissingToken,
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::MissingToken => write!(f, "no {} found in environment or .env file", TOKEN_ENV),
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::MissingToken | Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct ConfigFile {
    /// Base URL of the llama.cpp server.
    server_url: String,
    request_timeout_secs: u64,
    generation: GenerationParams,
    persona: PersonaFile,
    reply_mode: ReplyMode,
    voice: VoiceFile,
    memory: MemoryFile,
    message_limit: usize,
    max_typing_delay_ms: u64,
    /// Directory for transient artifacts and logs. Defaults to current directory.
    data_dir: Option<String>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".to_string(),
            request_timeout_secs: 120,
            generation: GenerationParams::default(),
            persona: PersonaFile::default(),
            reply_mode: ReplyMode::default(),
            voice: VoiceFile::default(),
            memory: MemoryFile::default(),
            message_limit: MAX_MESSAGE_LENGTH,
            max_typing_delay_ms: 3000,
            data_dir: None,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PersonaFile {
    name: Option<String>,
    /// `{user}` is replaced with the user's first name.
    description: Option<String>,
    fallback_reply: Option<String>,
}

#[derive(Deserialize)]
#[serde(default)]
struct VoiceFile {
    strategy: VoiceStrategy,
    /// TTS server for the `http` strategy (e.g., "http://localhost:8880").
    endpoint: Option<String>,
    reference_id: Option<String>,
    /// Reference speaker sample for the `clone` strategy.
    speaker_wav: Option<String>,
    model: Option<String>,
    ffmpeg_bin: String,
    tts_bin: String,
    timeout_secs: u64,
}

impl Default for VoiceFile {
    fn default() -> Self {
        Self {
            strategy: VoiceStrategy::None,
            endpoint: None,
            reference_id: None,
            speaker_wav: None,
            model: None,
            ffmpeg_bin: "ffmpeg".to_string(),
            tts_bin: "tts".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct MemoryFile {
    scope: MemoryScope,
    max_turns: usize,
    max_facts: usize,
    session_ttl_secs: u64,
}

impl Default for MemoryFile {
    fn default() -> Self {
        let defaults = MemoryConfig::default();
        Self {
            scope: defaults.scope,
            max_turns: defaults.max_turns,
            max_facts: defaults.max_facts,
            session_ttl_secs: defaults.session_ttl.as_secs(),
        }
    }
}

/// Voice synthesis settings.
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub strategy: VoiceStrategy,
    pub endpoint: Option<String>,
    pub reference_id: Option<String>,
    pub speaker_wav: Option<PathBuf>,
    pub model: Option<String>,
    pub ffmpeg_bin: String,
    pub tts_bin: String,
    /// Upper bound for one synthesis, request or subprocess.
    pub timeout: Duration,
}

#[cfg_attr(test, derive(Debug))]
pub struct Config {
    pub telegram_bot_token: String,
    pub server_url: String,
    pub request_timeout: Duration,
    pub generation: GenerationParams,
    pub persona: Persona,
    pub reply_mode: ReplyMode,
    pub voice: VoiceConfig,
    pub memory: MemoryConfig,
    pub message_limit: usize,
    pub max_typing_delay: Duration,
    /// Directory for transient artifacts and logs.
    pub data_dir: PathBuf,
}

impl Config {
    /// Load settings from an optional JSON file plus the bot token.
    ///
    /// Without a file every setting takes its default.
    pub fn load(path: Option<&Path>, token: Option<String>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => {
                let config_path = path.to_path_buf();
                let content = std::fs::read_to_string(&config_path)
                    .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
                serde_json::from_str(&content)
                    .map_err(|e| ConfigError::ParseJson { path: config_path, source: e })?
            }
            None => ConfigFile::default(),
        };

        let token = token.map(|t| t.trim().to_string()).unwrap_or_default();
        if token.is_empty() {
            return Err(ConfigError::MissingToken);
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(format!(
                "{} appears invalid (expected format: 123456789:ABCdefGHI...)",
                TOKEN_ENV
            )));
        }

        Self::from_file(file, token)
    }

    fn from_file(file: ConfigFile, token: String) -> Result<Self, ConfigError> {
        if file.server_url.trim().is_empty() {
            return Err(ConfigError::Validation("server_url must not be empty".into()));
        }
        if file.request_timeout_secs == 0 {
            return Err(ConfigError::Validation("request_timeout_secs must be positive".into()));
        }
        if file.message_limit <= MIN_SPLIT_OFFSET {
            return Err(ConfigError::Validation(format!(
                "message_limit must be greater than {}",
                MIN_SPLIT_OFFSET
            )));
        }
        let generation = file.generation;
        if !(generation.top_p > 0.0 && generation.top_p <= 1.0) {
            return Err(ConfigError::Validation("generation.top_p must be in (0, 1]".into()));
        }
        if generation.temperature < 0.0 {
            return Err(ConfigError::Validation("generation.temperature must not be negative".into()));
        }
        if file.memory.max_turns == 0 {
            return Err(ConfigError::Validation("memory.max_turns must be positive".into()));
        }

        let voice = file.voice;
        match voice.strategy {
            VoiceStrategy::Http if voice.endpoint.is_none() => {
                return Err(ConfigError::Validation("voice.endpoint is required for the http strategy".into()));
            }
            VoiceStrategy::Clone if voice.speaker_wav.is_none() => {
                return Err(ConfigError::Validation("voice.speaker_wav is required for the clone strategy".into()));
            }
            _ => {}
        }
        if voice.timeout_secs == 0 {
            return Err(ConfigError::Validation("voice.timeout_secs must be positive".into()));
        }

        let defaults = Persona::default();
        let persona = Persona {
            name: file.persona.name.unwrap_or(defaults.name),
            description: file.persona.description.unwrap_or(defaults.description),
            fallback_reply: file.persona.fallback_reply.unwrap_or(defaults.fallback_reply),
        };

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: token,
            server_url: file.server_url,
            request_timeout: Duration::from_secs(file.request_timeout_secs),
            generation,
            persona,
            reply_mode: file.reply_mode,
            voice: VoiceConfig {
                strategy: voice.strategy,
                endpoint: voice.endpoint,
                reference_id: voice.reference_id,
                speaker_wav: voice.speaker_wav.map(PathBuf::from),
                model: voice.model,
                ffmpeg_bin: voice.ffmpeg_bin,
                tts_bin: voice.tts_bin,
                timeout: Duration::from_secs(voice.timeout_secs),
            },
            memory: MemoryConfig {
                scope: file.memory.scope,
                max_turns: file.memory.max_turns,
                max_facts: file.memory.max_facts,
                session_ttl: Duration::from_secs(file.memory.session_ttl_secs),
            },
            message_limit: file.message_limit,
            max_typing_delay: Duration::from_millis(file.max_typing_delay_ms),
            data_dir,
        })
    }

    /// Settings the chatbot engine needs.
    pub fn chatbot_config(&self) -> ChatbotConfig {
        ChatbotConfig {
            persona: self.persona.clone(),
            reply_mode: self.reply_mode,
            memory: self.memory.clone(),
            message_limit: self.message_limit,
            max_typing_delay: self.max_typing_delay,
            artifact_dir: self.data_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TOKEN: &str = "123456789:ABCdefGHIjklMNOpqrsTUVwxyz";

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    fn token() -> Option<String> {
        Some(TOKEN.to_string())
    }

    #[test]
    fn test_defaults_without_file() {
        let config = Config::load(None, token()).expect("should load defaults");
        assert_eq!(config.server_url, "http://127.0.0.1:8080");
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.generation, GenerationParams::default());
        assert_eq!(config.persona.name, "Saro");
        assert_eq!(config.reply_mode, ReplyMode::Auto);
        assert_eq!(config.voice.strategy, VoiceStrategy::None);
        assert_eq!(config.voice.timeout, Duration::from_secs(120));
        assert_eq!(config.memory.scope, MemoryScope::PerUser);
        assert_eq!(config.message_limit, 4000);
        assert_eq!(config.data_dir, PathBuf::from("."));
    }

    #[test]
    fn test_valid_config_file() {
        let file = write_config(r#"{
            "server_url": "http://10.0.0.2:9000",
            "generation": { "n_predict": 512 },
            "persona": { "name": "Mika" },
            "reply_mode": "voice",
            "voice": { "strategy": "http", "endpoint": "http://localhost:8880" },
            "memory": { "scope": "shared", "max_turns": 10 }
        }"#);
        let config = Config::load(Some(file.path()), token()).expect("should load valid config");
        assert_eq!(config.server_url, "http://10.0.0.2:9000");
        assert_eq!(config.generation.n_predict, 512);
        assert_eq!(config.generation.top_p, 0.9);
        assert_eq!(config.persona.name, "Mika");
        assert!(config.persona.description.contains("{user}"));
        assert_eq!(config.reply_mode, ReplyMode::Voice);
        assert_eq!(config.voice.strategy, VoiceStrategy::Http);
        assert_eq!(config.memory.scope, MemoryScope::Shared);
        assert_eq!(config.memory.max_turns, 10);

        let chatbot = config.chatbot_config();
        assert_eq!(chatbot.message_limit, 4000);
        assert_eq!(chatbot.persona.slug(), "mika");
    }

    #[test]
    fn test_missing_token() {
        let err = assert_err(Config::load(None, None));
        assert!(matches!(err, ConfigError::MissingToken));
        let err = assert_err(Config::load(None, Some("   ".to_string())));
        assert!(matches!(err, ConfigError::MissingToken));
        assert!(err.to_string().contains(TOKEN_ENV));
    }

    #[test]
    fn test_invalid_token_format_no_colon() {
        let err = assert_err(Config::load(None, Some("invalid_token_no_colon".to_string())));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_invalid_token_format_non_numeric_id() {
        let err = assert_err(Config::load(None, Some("notanumber:ABCdef".to_string())));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_invalid_token_format_empty_secret() {
        let err = assert_err(Config::load(None, Some("123456789:".to_string())));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_http_voice_needs_endpoint() {
        let file = write_config(r#"{ "voice": { "strategy": "http" } }"#);
        let err = assert_err(Config::load(Some(file.path()), token()));
        assert!(err.to_string().contains("voice.endpoint"));
    }

    #[test]
    fn test_voice_timeout_must_be_positive() {
        let file = write_config(r#"{ "voice": { "timeout_secs": 0 } }"#);
        let err = Config::load(Some(file.path()), token()).unwrap_err();
        assert!(err.to_string().contains("voice.timeout_secs"));
    }

    #[test]
    fn test_clone_voice_needs_speaker() {
        let file = write_config(r#"{ "voice": { "strategy": "clone" } }"#);
        let err = assert_err(Config::load(Some(file.path()), token()));
        assert!(err.to_string().contains("voice.speaker_wav"));
    }

    #[test]
    fn test_message_limit_too_small() {
        let file = write_config(r#"{ "message_limit": 50 }"#);
        let err = assert_err(Config::load(Some(file.path()), token()));
        assert!(err.to_string().contains("message_limit"));
    }

    #[test]
    fn test_bad_top_p() {
        let file = write_config(r#"{ "generation": { "top_p": 1.5 } }"#);
        let err = assert_err(Config::load(Some(file.path()), token()));
        assert!(err.to_string().contains("top_p"));
    }

    #[test]
    fn test_unknown_enum_value() {
        let file = write_config(r#"{ "reply_mode": "smoke_signals" }"#);
        let err = assert_err(Config::load(Some(file.path()), token()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load(Some(Path::new("/nonexistent/path/config.json")), token()));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(Some(file.path()), token()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
