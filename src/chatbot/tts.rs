//! Text-to-speech.
//!
//! Two engines are supported:
//! - an HTTP TTS server (Fish Speech style `/v1/tts`) returning WAV,
//! - a local multilingual voice-cloning model driven through the Coqui
//!   `tts` CLI, conditioned on a reference speaker sample.
//!
//! Both produce WAV which ffmpeg turns into OGG Opus for Telegram voice
//! notes. Every intermediate file is a [`NamedTempFile`] and is removed
//! when dropped, whichever way synthesis ends.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default clone model.
pub const DEFAULT_CLONE_MODEL: &str = "tts_models/multilingual/multi-dataset/xtts_v2";

/// Upper bound for one ffmpeg conversion.
pub const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(60);

/// Which engine to use for voice replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceStrategy {
    #[default]
    None,
    Http,
    Clone,
}

/// Turns reply text into an OGG Opus file.
#[async_trait]
pub trait VoiceSynthesizer: Send + Sync {
    /// Synthesize `text` spoken in `lang`. The returned file lives in the
    /// artifact directory and is deleted when dropped.
    async fn synthesize(&self, text: &str, lang: &str) -> Result<NamedTempFile, String>;
}

/// Create an empty scoped temp file in `dir`.
pub fn temp_file(dir: &Path, prefix: &str, suffix: &str) -> Result<NamedTempFile, String> {
    tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(|e| format!("Failed to create temp file in {}: {e}", dir.display()))
}

/// Run `cmd` to completion. The child is killed if it outlives `limit`.
async fn run_bounded(mut cmd: Command, limit: Duration, what: &str) -> Result<Output, String> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    match tokio::time::timeout(limit, cmd.output()).await {
        Ok(result) => result.map_err(|e| format!("Failed to run {what}: {e}")),
        Err(_) => Err(format!("{what} timed out after {limit:?}")),
    }
}

/// TTS client for a Fish Speech compatible API.
pub struct HttpTts {
    endpoint: String,
    reference_id: String,
    ffmpeg: String,
    artifact_dir: PathBuf,
    client: reqwest::Client,
}

impl HttpTts {
    /// `endpoint` is the base URL of the TTS server, e.g. "http://localhost:8880".
    pub fn new(
        endpoint: String,
        reference_id: Option<String>,
        ffmpeg: String,
        artifact_dir: PathBuf,
        timeout: Duration,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build TTS client: {e}"))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            reference_id: reference_id.unwrap_or_else(|| "xtts_female".to_string()),
            ffmpeg,
            artifact_dir,
            client,
        })
    }
}

#[async_trait]
impl VoiceSynthesizer for HttpTts {
    async fn synthesize(&self, text: &str, _lang: &str) -> Result<NamedTempFile, String> {
        let preview: String = text.chars().take(50).collect();
        info!("🔊 TTS: \"{}\"", preview);

        let response = self
            .client
            .post(format!("{}/v1/tts", self.endpoint))
            .json(&serde_json::json!({
                "text": text,
                "format": "wav",
                "reference_id": self.reference_id,
            }))
            .send()
            .await
            .map_err(|e| format!("TTS request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("TTS error {}: {}", status, body));
        }

        let wav_data = response
            .bytes()
            .await
            .map_err(|e| format!("Failed to read TTS response: {e}"))?;
        debug!("Got {} bytes of WAV audio", wav_data.len());

        let wav = temp_file(&self.artifact_dir, "saro_tts_", ".wav")?;
        tokio::fs::write(wav.path(), &wav_data)
            .await
            .map_err(|e| format!("Failed to write temp WAV: {e}"))?;

        transcode_to_voice(&self.ffmpeg, wav.path(), &self.artifact_dir).await
    }
}

/// Multilingual voice cloning through the Coqui `tts` command.
pub struct CloneTts {
    tts_bin: String,
    model: String,
    speaker_wav: PathBuf,
    ffmpeg: String,
    artifact_dir: PathBuf,
    timeout: Duration,
    use_cuda: bool,
}

impl CloneTts {
    pub fn new(
        tts_bin: String,
        model: Option<String>,
        speaker_wav: PathBuf,
        ffmpeg: String,
        artifact_dir: PathBuf,
        timeout: Duration,
    ) -> Self {
        let use_cuda = cuda_available();
        info!(
            "Voice cloning on {} with reference {}",
            if use_cuda { "CUDA" } else { "CPU" },
            speaker_wav.display()
        );
        Self {
            tts_bin,
            model: model.unwrap_or_else(|| DEFAULT_CLONE_MODEL.to_string()),
            speaker_wav,
            ffmpeg,
            artifact_dir,
            timeout,
            use_cuda,
        }
    }

    fn args(&self, text: &str, lang: &str, out: &Path) -> Vec<String> {
        vec![
            "--model_name".to_string(),
            self.model.clone(),
            "--text".to_string(),
            text.to_string(),
            "--speaker_wav".to_string(),
            self.speaker_wav.display().to_string(),
            "--language_idx".to_string(),
            clone_language(lang).to_string(),
            "--use_cuda".to_string(),
            self.use_cuda.to_string(),
            "--out_path".to_string(),
            out.display().to_string(),
        ]
    }
}

#[async_trait]
impl VoiceSynthesizer for CloneTts {
    async fn synthesize(&self, text: &str, lang: &str) -> Result<NamedTempFile, String> {
        let preview: String = text.chars().take(50).collect();
        info!("🔊 Cloned TTS ({}): \"{}\"", lang, preview);

        let wav = temp_file(&self.artifact_dir, "saro_clone_", ".wav")?;
        let mut cmd = Command::new(&self.tts_bin);
        cmd.args(self.args(text, lang, wav.path()));
        let output = run_bounded(cmd, self.timeout, &self.tts_bin).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("voice cloning failed: {}", stderr.trim()));
        }

        transcode_to_voice(&self.ffmpeg, wav.path(), &self.artifact_dir).await
    }
}

/// The clone model names Chinese `zh-cn`.
pub fn clone_language(lang: &str) -> &str {
    if lang == "zh" { "zh-cn" } else { lang }
}

/// GPU present if the NVIDIA tooling is installed.
fn cuda_available() -> bool {
    which::which("nvidia-smi").is_ok()
}

/// Convert audio to OGG Opus for Telegram voice messages.
///
/// 300ms of silence is prepended since Telegram clips the start of voice
/// notes on playback.
pub async fn transcode_to_voice(ffmpeg: &str, input: &Path, dir: &Path) -> Result<NamedTempFile, String> {
    let ogg = temp_file(dir, "saro_voice_", ".ogg")?;

    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-y", "-f", "lavfi", "-i", "anullsrc=r=44100:cl=mono", "-i"])
        .arg(input)
        .args([
            "-filter_complex",
            "[0]atrim=0:0.3[silence];[silence][1:a]concat=n=2:v=0:a=1",
            "-c:a",
            "libopus",
            "-b:a",
            "64k",
            "-f",
            "ogg",
        ])
        .arg(ogg.path());
    let output = run_bounded(cmd, TRANSCODE_TIMEOUT, "ffmpeg").await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("ffmpeg failed on {}", input.display());
        return Err(format!("ffmpeg conversion failed: {}", stderr.trim()));
    }

    let size = std::fs::metadata(ogg.path()).map(|m| m.len()).unwrap_or(0);
    debug!("Converted {} to OGG ({} bytes)", input.display(), size);
    Ok(ogg)
}
