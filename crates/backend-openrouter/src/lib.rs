//! Hosted OpenRouter chat adapter: bearer-authenticated SSE streaming over
//! the chat completions endpoint.

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

/// Mirrors the single request timeout the hosted endpoint is called with:
/// it bounds both connect and the gap between stream reads.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// App identification headers the hosted API asks clients to send.
const APP_REFERER: &str = "https://github.com/glossa-project/glossa";
const APP_TITLE: &str = "Glossa";

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_TOP_P: f64 = 0.9;
const DEFAULT_TOP_K: i64 = 40;
const DEFAULT_MAX_TOKENS: i64 = 16_000;

#[derive(Debug, Clone, PartialEq)]
pub struct OpenRouterBackendConfig {
    /// API base URL, e.g. `https://openrouter.ai/api/v1`.
    pub base_url: String,
    pub api_key: Option<String>,
    /// Full prefixed model identifier, e.g. `openrouter/google/gemma-2-9b-it`.
    pub model_id: String,
    pub parameters: GenerationParameters,
}

/// One configured OpenRouter connection. A missing API key is not a
/// construction error: validation reports unusable and streaming refuses
/// with an authentication error, so the caller sees the precise failure.
#[derive(Debug)]
pub struct OpenRouterHandler {
    base_url: String,
    api_key: Option<String>,
    model_name: String,
    parameters: GenerationParameters,
    client: reqwest::Client,
}

impl OpenRouterHandler {
    pub fn new(config: OpenRouterBackendConfig) -> ProviderResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(ProviderRuntimeError::Configuration(
                "openrouter base url is not configured".to_owned(),
            ));
        }
        let model_name = ProviderKind::OpenRouter
            .model_name(&config.model_id)
            .to_owned();
        if model_name.is_empty() {
            return Err(ProviderRuntimeError::Configuration(format!(
                "Invalid OpenRouter model ID format: {}",
                config.model_id
            )));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .read_timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| {
                ProviderRuntimeError::Configuration(format!(
                    "openrouter http client build failed: {error}"
                ))
            })?;
        Ok(Self {
            base_url: config.base_url.trim().trim_end_matches('/').to_owned(),
            api_key: config.api_key.filter(|key| !key.trim().is_empty()),
            model_name,
            parameters: config.parameters,
            client,
        })
    }

    fn identified(&self, builder: reqwest::RequestBuilder, api_key: &str) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(api_key)
            .header("HTTP-Referer", APP_REFERER)
            .header("X-Title", APP_TITLE)
    }
}

#[async_trait]
impl ProviderConnection for OpenRouterHandler {
    async fn validate_connection(&self) -> ProviderResult<bool> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(false);
        };
        let probe = self
            .identified(
                self.client.get(format!("{}/auth/key", self.base_url)),
                api_key,
            )
            .timeout(VALIDATION_TIMEOUT)
            .send()
            .await;
        match probe {
            Ok(response) => Ok(response.status() == reqwest::StatusCode::OK),
            Err(error) => {
                tracing::debug!(error = %error, "openrouter key probe unreachable");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl ProviderStreamSource for OpenRouterHandler {
    async fn send_request(&self, request: &ChatRequest) -> ProviderResult<FragmentStream> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderRuntimeError::Authentication(
                "API key not set for OpenRouter".to_owned(),
            ));
        };

        let payload = ChatPayload {
            model: &self.model_name,
            messages: &request.messages,
            stream: true,
            tuning: convert_parameters(&self.parameters),
        };

        tracing::debug!(model = %self.model_name, "opening openrouter chat stream");
        let response = self
            .identified(
                self.client
                    .post(format!("{}/chat/completions", self.base_url)),
                api_key,
            )
            .json(&payload)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = status_error(status, &body);
            tracing::warn!(status = %status, error = %error, "openrouter chat request refused");
            return Err(error);
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(Box::new(OpenRouterFragmentStream {
            body,
            line_buffer: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        }))
    }
}

impl ProviderInfo for OpenRouterHandler {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenRouter
    }
}

/// Pull adapter over the SSE response body. Only `data: ` lines matter;
/// keep-alive comments and malformed payloads are skipped, and the `[DONE]`
/// sentinel ends the sequence regardless of what follows.
struct OpenRouterFragmentStream {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    line_buffer: Vec<u8>,
    pending: VecDeque<String>,
    finished: bool,
}

impl OpenRouterFragmentStream {
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
            match parse_sse_line(&line) {
                SseLine::Fragment(content) => self.pending.push_back(content),
                SseLine::Done => self.finished = true,
                SseLine::Skip => {}
            }
        }
    }
}

#[async_trait]
impl FragmentSubscription for OpenRouterFragmentStream {
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
                    match parse_sse_line(&trailing) {
                        SseLine::Fragment(content) => self.pending.push_back(content),
                        SseLine::Done | SseLine::Skip => {}
                    }
                }
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Fragment(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &[u8]) -> SseLine {
    let Ok(line) = std::str::from_utf8(line) else {
        return SseLine::Skip;
    };
    let Some(data) = line.trim().strip_prefix(DATA_PREFIX) else {
        return SseLine::Skip;
    };
    if data.trim() == DONE_SENTINEL {
        return SseLine::Done;
    }
    let Ok(chunk) = serde_json::from_str::<SseChunk>(data) else {
        return SseLine::Skip;
    };
    // Key presence decides: a delta without a content key is skipped, an
    // explicit empty string still counts as a fragment.
    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
    {
        Some(content) => SseLine::Fragment(content),
        None => SseLine::Skip,
    }
}

fn convert_parameters(parameters: &GenerationParameters) -> ChatTuning {
    ChatTuning {
        temperature: parameters.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        top_p: parameters.top_p.unwrap_or(DEFAULT_TOP_P),
        top_k: parameters.top_k.unwrap_or(DEFAULT_TOP_K),
        max_tokens: parameters.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
    }
}

fn request_error(error: reqwest::Error) -> ProviderRuntimeError {
    ProviderRuntimeError::Network(format!("OpenRouter request failed: {error}"))
}

fn stream_read_error(error: reqwest::Error) -> ProviderRuntimeError {
    ProviderRuntimeError::Network(format!("OpenRouter stream read failed: {error}"))
}

fn status_error(status: reqwest::StatusCode, body: &str) -> ProviderRuntimeError {
    let kind =
        ProviderErrorKind::from_status(status.as_u16()).unwrap_or(ProviderErrorKind::Generic);
    ProviderRuntimeError::from_kind(
        kind,
        format!(
            "OpenRouter API error: status {status}: {}",
            sanitize_error_body(body)
        ),
    )
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
    #[serde(flatten)]
    tuning: ChatTuning,
}

#[derive(Debug, PartialEq, Serialize)]
struct ChatTuning {
    temperature: f64,
    top_p: f64,
    top_k: i64,
    max_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct SseChunk {
    #[serde(default)]
    choices: Vec<SseChoice>,
}

#[derive(Debug, Deserialize)]
struct SseChoice {
    #[serde(default)]
    delta: Option<SseDelta>,
}

#[derive(Debug, Deserialize)]
struct SseDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use glossa_provider_protocol::error::{ProviderErrorKind, ProviderRuntimeError};
    use glossa_provider_protocol::request::GenerationParameters;

    use super::{
        convert_parameters, parse_sse_line, status_error, OpenRouterBackendConfig,
        OpenRouterHandler, SseLine,
    };

    fn config_for(model_id: &str) -> OpenRouterBackendConfig {
        OpenRouterBackendConfig {
            base_url: "https://openrouter.ai/api/v1/".to_owned(),
            api_key: Some("sk-test".to_owned()),
            model_id: model_id.to_owned(),
            parameters: GenerationParameters::default(),
        }
    }

    #[test]
    fn construction_trims_the_base_url_and_strips_the_prefix() {
        let handler = OpenRouterHandler::new(config_for("openrouter/google/gemma-2-9b-it"))
            .expect("build handler");
        assert_eq!(handler.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(handler.model_name, "google/gemma-2-9b-it");
    }

    #[test]
    fn empty_model_names_are_a_configuration_error() {
        let error = OpenRouterHandler::new(config_for("openrouter/")).expect_err("must fail");
        assert_eq!(
            error,
            ProviderRuntimeError::Configuration(
                "Invalid OpenRouter model ID format: openrouter/".to_owned()
            )
        );
    }

    #[test]
    fn blank_api_keys_count_as_absent() {
        let mut config = config_for("openrouter/google/gemma-2-9b-it");
        config.api_key = Some("   ".to_owned());
        let handler = OpenRouterHandler::new(config).expect("build handler");
        assert_eq!(handler.api_key, None);
    }

    #[test]
    fn data_lines_parse_delta_content_and_sentinel() {
        assert_eq!(
            parse_sse_line(br#"data: {"choices":[{"delta":{"content":"Hal"}}]}"#),
            SseLine::Fragment("Hal".to_owned())
        );
        // Key presence matters, not emptiness.
        assert_eq!(
            parse_sse_line(br#"data: {"choices":[{"delta":{"content":""}}]}"#),
            SseLine::Fragment(String::new())
        );
        assert_eq!(parse_sse_line(b"data: [DONE]"), SseLine::Done);
        assert_eq!(
            parse_sse_line(br#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Skip
        );
        assert_eq!(parse_sse_line(b": OPENROUTER PROCESSING"), SseLine::Skip);
        assert_eq!(parse_sse_line(b"data: not json"), SseLine::Skip);
        assert_eq!(parse_sse_line(b""), SseLine::Skip);
    }

    #[test]
    fn parameter_conversion_fills_adapter_defaults() {
        let tuning = convert_parameters(&GenerationParameters::default());
        assert_eq!(tuning.temperature, 0.7);
        assert_eq!(tuning.top_p, 0.9);
        assert_eq!(tuning.top_k, 40);
        assert_eq!(tuning.max_tokens, 16_000);

        let tuning = convert_parameters(&GenerationParameters {
            temperature: Some(0.2),
            max_tokens: Some(2_048),
            ..GenerationParameters::default()
        });
        assert_eq!(tuning.temperature, 0.2);
        assert_eq!(tuning.max_tokens, 2_048);
    }

    #[test]
    fn statuses_map_to_the_error_taxonomy_with_an_excerpt() {
        let error = status_error(
            reqwest::StatusCode::UNAUTHORIZED,
            "{\"error\":\"bad\nkey\"}",
        );
        assert_eq!(error.kind(), ProviderErrorKind::Authentication);
        assert!(error.to_string().contains("status 401"));
        assert!(error.to_string().contains("bad key"));

        assert_eq!(
            status_error(reqwest::StatusCode::PAYMENT_REQUIRED, "").kind(),
            ProviderErrorKind::Quota
        );
        assert_eq!(
            status_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "").kind(),
            ProviderErrorKind::Quota
        );
        assert_eq!(
            status_error(reqwest::StatusCode::FORBIDDEN, "").kind(),
            ProviderErrorKind::AccessDenied
        );
        assert_eq!(
            status_error(reqwest::StatusCode::NOT_FOUND, "").kind(),
            ProviderErrorKind::ModelAccess
        );
        assert_eq!(
            status_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "").kind(),
            ProviderErrorKind::Generic
        );
    }
}
