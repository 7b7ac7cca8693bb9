//! Local Ollama chat adapter: `/api/tags` availability probe and NDJSON
//! streaming over `/api/chat`.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use glossa_provider_protocol::backend::{
    FragmentStream, FragmentSubscription, ProviderConnection, ProviderInfo, ProviderKind,
    ProviderStreamSource,
};
use glossa_provider_protocol::error::{ProviderErrorKind, ProviderResult, ProviderRuntimeError};
use glossa_provider_protocol::request::{ChatMessage, ChatRequest, GenerationParameters};
use serde::{Deserialize, Serialize};

/// Connect timeout mirrors the classic slightly-over-3s TCP retry window.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(3050);
/// Local models can stall for minutes while loading weights.
const READ_TIMEOUT: Duration = Duration::from_secs(600);

const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_TOP_P: f64 = 0.9;
const DEFAULT_TOP_K: i64 = 40;
const DEFAULT_NUM_CTX: i64 = 16_000;

#[derive(Debug, Clone, PartialEq)]
pub struct OllamaBackendConfig {
    /// Server base URL; a bare `host:port` gains an `http://` scheme.
    pub endpoint: String,
    /// Full prefixed model identifier, e.g. `ollama/gemma3:4b`.
    pub model_id: String,
    pub parameters: GenerationParameters,
}

/// One configured connection to an Ollama server, usable for any number of
/// sequential or concurrent chat streams.
pub struct OllamaHandler {
    endpoint: String,
    model_id: String,
    model_name: String,
    parameters: GenerationParameters,
    client: reqwest::Client,
}

impl OllamaHandler {
    pub fn new(config: OllamaBackendConfig) -> ProviderResult<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(ProviderRuntimeError::Configuration(
                "ollama endpoint is not configured".to_owned(),
            ));
        }
        let endpoint = normalize_endpoint(&config.endpoint);
        let model_name = ProviderKind::Ollama.model_name(&config.model_id).to_owned();
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .map_err(|error| {
                ProviderRuntimeError::Configuration(format!(
                    "ollama http client build failed: {error}"
                ))
            })?;
        Ok(Self {
            endpoint,
            model_id: config.model_id,
            model_name,
            parameters: config.parameters,
            client,
        })
    }

    fn status_error(&self, status: reqwest::StatusCode, body: &str) -> ProviderRuntimeError {
        if status == reqwest::StatusCode::NOT_FOUND {
            return ProviderRuntimeError::ModelAccess(format!(
                "Model not found: {}",
                self.model_id
            ));
        }
        let kind =
            ProviderErrorKind::from_status(status.as_u16()).unwrap_or(ProviderErrorKind::Generic);
        ProviderRuntimeError::from_kind(
            kind,
            format!("Ollama API error: status {status}: {}", sanitize_error_body(body)),
        )
    }
}

#[async_trait]
impl ProviderConnection for OllamaHandler {
    async fn validate_connection(&self) -> ProviderResult<bool> {
        let url = format!("{}/api/tags", self.endpoint);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(error = %error, "ollama tags probe unreachable");
                return Ok(false);
            }
        };
        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "ollama tags probe refused");
            return Ok(false);
        }
        let tags: TagsResponse = response.json().await.map_err(|error| {
            ProviderRuntimeError::Generic(format!("Ollama tags response parse failed: {error}"))
        })?;
        Ok(tags
            .models
            .iter()
            .any(|entry| entry.name == self.model_name))
    }
}

#[async_trait]
impl ProviderStreamSource for OllamaHandler {
    async fn send_request(&self, request: &ChatRequest) -> ProviderResult<FragmentStream> {
        let payload = ChatPayload {
            model: &self.model_name,
            messages: &request.messages,
            stream: true,
            options: convert_parameters(&self.parameters),
        };

        tracing::debug!(model = %self.model_name, "opening ollama chat stream");
        let response = self
            .client
            .post(format!("{}/api/chat", self.endpoint))
            .json(&payload)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = self.status_error(status, &body);
            tracing::warn!(status = %status, error = %error, "ollama chat request refused");
            return Err(error);
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(Box::new(OllamaFragmentStream {
            body,
            line_buffer: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        }))
    }
}

impl ProviderInfo for OllamaHandler {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }
}

/// Pull adapter over the chat response body. Chunks are split on newlines;
/// each line is one JSON object carrying either fragment content or the
/// `done` marker.
struct OllamaFragmentStream {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    line_buffer: Vec<u8>,
    pending: VecDeque<String>,
    finished: bool,
}

impl OllamaFragmentStream {
    fn drain_complete_lines(&mut self) {
        while !self.finished {
            let Some(newline_index) = self.line_buffer.iter().position(|byte| *byte == b'\n')
            else {
                return;
            };
            let mut line = self.line_buffer.drain(..=newline_index).collect::<Vec<_>>();
            if matches!(line.last(), Some(b'\n')) {
                line.pop();
            }
            if matches!(line.last(), Some(b'\r')) {
                line.pop();
            }
            self.consume_line(&line);
        }
    }

    fn consume_line(&mut self, line: &[u8]) {
        let Some(parsed) = parse_chat_line(line) else {
            return;
        };
        let content = parsed.message.map(|message| message.content).unwrap_or_default();
        if !content.is_empty() {
            self.pending.push_back(content);
        } else if parsed.done {
            self.finished = true;
        }
    }
}

#[async_trait]
impl FragmentSubscription for OllamaFragmentStream {
    async fn next_fragment(&mut self) -> ProviderResult<Option<String>> {
        loop {
            if let Some(fragment) = self.pending.pop_front() {
                return Ok(Some(fragment));
            }
            if self.finished {
                return Ok(None);
            }
            match self.body.next().await {
                Some(Ok(chunk)) => {
                    self.line_buffer.extend_from_slice(&chunk);
                    self.drain_complete_lines();
                }
                Some(Err(error)) => {
                    self.finished = true;
                    return Err(stream_read_error(error));
                }
                None => {
                    self.finished = true;
                    let trailing = std::mem::take(&mut self.line_buffer);
                    if !trailing.is_empty() {
                        self.consume_line(&trailing);
                    }
                }
            }
        }
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_owned()
    } else {
        format!("http://{trimmed}")
    }
}

fn convert_parameters(parameters: &GenerationParameters) -> ChatOptions {
    ChatOptions {
        temperature: parameters.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        top_p: parameters.top_p.unwrap_or(DEFAULT_TOP_P),
        top_k: parameters.top_k.unwrap_or(DEFAULT_TOP_K),
        num_ctx: parameters.max_tokens.unwrap_or(DEFAULT_NUM_CTX),
        use_mmap: true,
        use_mlock: false,
        // Negative seeds mean "unpinned" and stay off the wire.
        seed: parameters.seed.filter(|seed| *seed >= 0),
    }
}

fn request_error(error: reqwest::Error) -> ProviderRuntimeError {
    if error.is_timeout() {
        ProviderRuntimeError::Network(
            "Ollama request timed out - server not responding".to_owned(),
        )
    } else if error.is_connect() {
        ProviderRuntimeError::Network(
            "Could not connect to Ollama server - check if it's running".to_owned(),
        )
    } else {
        ProviderRuntimeError::Network(format!("Ollama request failed: {error}"))
    }
}

fn stream_read_error(error: reqwest::Error) -> ProviderRuntimeError {
    if error.is_timeout() {
        ProviderRuntimeError::Network(
            "Ollama request timed out - server not responding".to_owned(),
        )
    } else {
        ProviderRuntimeError::Network(format!("Ollama stream read failed: {error}"))
    }
}

fn parse_chat_line(line: &[u8]) -> Option<ChatStreamLine> {
    let line = std::str::from_utf8(line).ok()?.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

fn sanitize_error_body(body: &str) -> String {
    let mut sanitized = body
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect::<String>();
    sanitized = sanitized.split_whitespace().collect::<Vec<_>>().join(" ");
    const MAX_CHARS: usize = 240;
    if sanitized.chars().count() > MAX_CHARS {
        let truncated: String = sanitized.chars().take(MAX_CHARS).collect();
        format!("{truncated}...")
    } else {
        sanitized
    }
}

#[derive(Debug, Serialize)]
struct ChatPayload<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, PartialEq, Serialize)]
struct ChatOptions {
    temperature: f64,
    top_p: f64,
    top_k: i64,
    num_ctx: i64,
    use_mmap: bool,
    use_mlock: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamLine {
    #[serde(default)]
    message: Option<ChatStreamMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ChatStreamMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}
