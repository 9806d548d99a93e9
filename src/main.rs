use std::path::{Path, PathBuf};
use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use saro::chatbot::engine::describe;
use saro::chatbot::llama::Client as LlamaClient;
use saro::chatbot::tts::{CloneTts, HttpTts, VoiceStrategy, VoiceSynthesizer};
use saro::chatbot::{ChatbotEngine, IncomingMessage, TelegramClient};
use saro::config::{Config, VoiceConfig, TOKEN_ENV};

const DEFAULT_CONFIG_PATH: &str = "saro.json";

struct BotState {
    engine: ChatbotEngine,
}

fn build_synthesizer(voice: &VoiceConfig, artifact_dir: &Path) -> Option<Arc<dyn VoiceSynthesizer>> {
    match voice.strategy {
        VoiceStrategy::None => None,
        VoiceStrategy::Http => {
            let endpoint = voice.endpoint.clone()?;
            match HttpTts::new(
                endpoint,
                voice.reference_id.clone(),
                voice.ffmpeg_bin.clone(),
                artifact_dir.to_path_buf(),
                voice.timeout,
            ) {
                Ok(tts) => Some(Arc::new(tts)),
                Err(e) => {
                    error!("{e}; voice replies disabled");
                    None
                }
            }
        }
        VoiceStrategy::Clone => {
            let speaker_wav = voice.speaker_wav.clone()?;
            if !speaker_wav.exists() {
                warn!("Reference voice {} not found", speaker_wav.display());
            }
            Some(Arc::new(CloneTts::new(
                voice.tts_bin.clone(),
                voice.model.clone(),
                speaker_wav,
                voice.ffmpeg_bin.clone(),
                artifact_dir.to_path_buf(),
                voice.timeout,
            )))
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // An explicit path must exist; the default one is optional.
    let explicit_path = std::env::args().nth(1).map(PathBuf::from);
    let config_path = explicit_path
        .clone()
        .or_else(|| Some(PathBuf::from(DEFAULT_CONFIG_PATH)).filter(|p| p.exists()));

    let config = match Config::load(config_path.as_deref(), std::env::var(TOKEN_ENV).ok()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Fatal: {e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::never(&log_dir, "saro.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting Telegram bot...");
    match config_path {
        Some(ref path) => info!("Loaded config from {}", path.display()),
        None => info!("No config file, using defaults"),
    }

    let completer = match LlamaClient::new(&config.server_url, config.generation.clone(), config.request_timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    };
    info!("Llama server: {} (timeout {:?})", completer.url(), config.request_timeout);

    let bot = Bot::new(&config.telegram_bot_token);
    let voice = build_synthesizer(&config.voice, &config.data_dir);
    let chatbot_config = config.chatbot_config();
    info!("Chatbot: {}", describe(&chatbot_config, voice.is_some()));

    let engine = ChatbotEngine::new(
        chatbot_config,
        Arc::new(completer),
        Arc::new(TelegramClient::new(bot.clone())),
        voice,
    );
    let state = Arc::new(BotState { engine });

    // Text messages only; commands are ignored.
    let handler = Update::filter_message()
        .filter(|msg: Message| msg.text().is_some_and(|t| !t.starts_with('/')))
        .endpoint(handle_message);

    info!("📡 Bot is now polling for messages!");
    // No per-chat queueing: every update runs at once and the engine's
    // in-flight guard turns away a user's overlapping messages.
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .distribution_function(|_: &Update| None::<()>)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(incoming) = telegram_to_incoming(&msg) else {
        return Ok(());
    };
    state.engine.handle_message(incoming).await;
    Ok(())
}

fn telegram_to_incoming(msg: &Message) -> Option<IncomingMessage> {
    let text = msg.text()?.to_string();
    let user = msg.from.as_ref();
    let user_id = user.map(|u| u.id.0 as i64).unwrap_or(msg.chat.id.0);
    let display_name = user
        .map(|u| u.first_name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "User".to_string());

    Some(IncomingMessage {
        chat_id: msg.chat.id.0,
        user_id,
        display_name,
        text,
    })
}
