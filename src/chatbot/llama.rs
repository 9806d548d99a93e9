//! Client for the local llama.cpp completion server.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chatbot::prompt::END_OF_TURN;

/// Sampling parameters. Fixed per deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub n_predict: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            n_predict: 256,
            temperature: 0.7,
            top_p: 0.9,
            stop: vec![END_OF_TURN.to_string()],
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    top_p: f32,
    stop: &'a [String],
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    content: String,
}

/// Anything that turns a prompt into raw model text.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, Error>;
}

pub struct Client {
    url: String,
    params: GenerationParams,
    http: reqwest::Client,
}

impl Client {
    /// `server_url` is the base URL, e.g. "http://127.0.0.1:8080".
    pub fn new(server_url: &str, params: GenerationParams, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            url: format!("{}/completion", server_url.trim_end_matches('/')),
            params,
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Completer for Client {
    async fn complete(&self, prompt: &str) -> Result<String, Error> {
        let request = CompletionRequest {
            prompt,
            n_predict: self.params.n_predict,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            stop: &self.params.stop,
        };

        info!("🦙 Sending request to llama server ({} chars)", prompt.len());

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::Status(status.as_u16()));
        }
        info!("🦙 Received HTTP {} from server", status.as_u16());

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        debug!("Raw completion: {} chars", parsed.content.len());
        Ok(parsed.content)
    }
}

#[derive(Debug)]
pub enum Error {
    /// Connection refused, timeout, and other transport failures.
    Http(String),
    /// Server answered with anything other than 200.
    Status(u16),
    Parse(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Status(code) => write!(f, "server returned HTTP {code}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve exactly one HTTP response and hand back the request body.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let body_start = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let headers = String::from_utf8_lossy(&buf[..body_start]).to_lowercase();
            let content_length: usize = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map(|v| v.trim().parse().unwrap())
                .unwrap_or(0);
            while buf.len() < body_start + content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
            }
            let request_body = String::from_utf8_lossy(&buf[body_start..]).to_string();

            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            tx.send(request_body).ok();
        });

        (format!("http://{addr}"), rx)
    }

    fn client(url: &str) -> Client {
        Client::new(url, GenerationParams::default(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_url_building() {
        assert_eq!(client("http://127.0.0.1:8080").url(), "http://127.0.0.1:8080/completion");
        assert_eq!(client("http://127.0.0.1:8080/").url(), "http://127.0.0.1:8080/completion");
    }

    #[tokio::test]
    async fn test_complete_success() {
        let (url, request) = serve_once("HTTP/1.1 200 OK", r#"{"content":" hey there ","stop":true}"#).await;
        let content = client(&url).complete("PROMPT").await.unwrap();
        assert_eq!(content, " hey there ");

        let body: serde_json::Value = serde_json::from_str(&request.await.unwrap()).unwrap();
        assert_eq!(body["prompt"], "PROMPT");
        assert_eq!(body["n_predict"], 256);
        assert_eq!(body["stop"], serde_json::json!(["<|eot_id|>"]));
        assert!((body["top_p"].as_f64().unwrap() - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_missing_content_is_empty() {
        let (url, _request) = serve_once("HTTP/1.1 200 OK", r#"{"tokens_predicted":0}"#).await;
        let content = client(&url).complete("PROMPT").await.unwrap();
        assert_eq!(content, "");
    }

    #[tokio::test]
    async fn test_server_error_status() {
        let (url, _request) = serve_once("HTTP/1.1 500 Internal Server Error", "{}").await;
        let err = client(&url).complete("PROMPT").await.unwrap_err();
        assert!(matches!(err, Error::Status(500)));
    }

    #[tokio::test]
    async fn test_non_200_success_is_status_error() {
        let (url, _request) = serve_once("HTTP/1.1 202 Accepted", r#"{"content":"queued"}"#).await;
        let err = client(&url).complete("PROMPT").await.unwrap_err();
        assert!(matches!(err, Error::Status(202)));
    }

    #[tokio::test]
    async fn test_invalid_json_is_parse_error() {
        let (url, _request) = serve_once("HTTP/1.1 200 OK", "not json").await;
        let err = client(&url).complete("PROMPT").await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}")).complete("PROMPT").await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }
}
