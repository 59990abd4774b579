//! Reqwest-based LLM client implementing OpenAI-compatible Chat Completions streaming.

use std::{pin::Pin, time::Duration};

use async_stream::try_stream;
use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt as _;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Code,
    CodeResult,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Code => "code",
            Role::CodeResult => "code_result",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "code" => Some(Role::Code),
            "code_result" => Some(Role::CodeResult),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    /// Chat Completions only knows system/user/assistant; code turns are
    /// folded onto those.
    fn to_wire(&self) -> serde_json::Value {
        let (role, content) = match self.role {
            Role::Code => ("assistant", self.content.clone()),
            Role::CodeResult => ("user", format!("Code output:\n{}", self.content)),
            other => (other.as_str(), self.content.clone()),
        };
        serde_json::json!({ "role": role, "content": content })
    }
}

/// Why a model call produced no usable text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model request timed out")]
    Timeout,
    #[error("model endpoint unreachable: {0}")]
    Transport(String),
    #[error("model endpoint returned status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("model refused to answer: {0}")]
    Refused(String),
    #[error("malformed model response: {0}")]
    Malformed(String),
    #[error("model returned an empty response")]
    Empty,
}

impl ModelError {
    /// Transient failures are worth another attempt; the rest mean the
    /// endpoint or credentials are wrong.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Timeout | ModelError::Malformed(_) | ModelError::Empty => true,
            ModelError::Status { code, .. } => *code == 429 || *code >= 500,
            ModelError::Transport(_) | ModelError::Refused(_) => false,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ModelError::Timeout
        } else if e.is_decode() {
            ModelError::Malformed(e.to_string())
        } else {
            ModelError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(e: serde_json::Error) -> Self {
        ModelError::Malformed(e.to_string())
    }
}

/// Model inference collaborator: ordered role-tagged messages in, free text out.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl ChatOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            model: cfg.get("DEFAULT_MODEL").unwrap_or_else(|| "gpt-4o".into()),
            temperature: cfg.get_f32("TEMPERATURE").unwrap_or(0.0),
            max_tokens: cfg.get_u64("MAX_TOKENS").and_then(|v| u32::try_from(v).ok()),
        }
    }
}

#[derive(Debug)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    opts: ChatOptions,
}

impl LlmClient {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let timeout = cfg.get_u64("REQUEST_TIMEOUT").unwrap_or(60);
        let api_base_url = cfg.get("API_BASE_URL").unwrap_or_else(|| "default".into());
        let mut base_url = if api_base_url == "default" {
            "https://api.openai.com/v1".to_string()
        } else {
            api_base_url
        };
        let trimmed = base_url.trim_end_matches('/');
        if !trimmed.ends_with("/v1") && !trimmed.contains("/v1/") {
            base_url = format!("{}/v1", trimmed);
        } else {
            base_url = trimmed.to_string();
        }
        let api_key = cfg.get("OPENAI_API_KEY").filter(|k| !k.trim().is_empty());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;

        Ok(Self { http, base_url, api_key, opts: ChatOptions::from_config(cfg) })
    }

    pub fn chat_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, ModelError>> + Send>> {
        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let api_key = self.api_key.clone();
        let opts = self.opts.clone();
        let wire: Vec<serde_json::Value> = messages.iter().map(ChatMessage::to_wire).collect();

        Box::pin(try_stream! {
            let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("text/event-stream"));
            if let Some(key) = api_key.clone() {
                let hv = HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| ModelError::Transport(format!("invalid api key header: {}", e)))?;
                headers.insert(AUTHORIZATION, hv);
            }

            let mut body = serde_json::json!({
                "model": opts.model,
                "temperature": opts.temperature,
                "messages": wire,
                "stream": true,
            });
            if let Some(max_tokens) = opts.max_tokens {
                body["max_tokens"] = serde_json::json!(max_tokens);
            }

            let resp = http
                .post(url)
                .headers(headers)
                .json(&body)
                .send()
                .await?;

            if !resp.status().is_success() {
                let code = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                Err::<(), _>(ModelError::Status { code, body: text })?;
                return;
            }

            let mut lines = SseLines::default();
            let mut stream = resp.bytes_stream();

            while let Some(chunk) = stream.next().await {
                let bytes = chunk?;
                for line in lines.push(&bytes) {
                    if line.is_empty() || line.starts_with(':') { continue; }
                    if let Some(payload) = line.strip_prefix("data:") {
                        let payload = payload.trim();
                        if payload == "[DONE]" { yield StreamEvent::Done; return; }
                        match serde_json::from_str::<Chunk>(payload) {
                            Ok(chunk) => {
                                for choice in chunk.choices.into_iter() {
                                    if let Some(content) = choice.delta.and_then(|d| d.content) {
                                        if !content.is_empty() {
                                            yield StreamEvent::Content(content);
                                        }
                                    }
                                    if choice.finish_reason.as_deref() == Some("content_filter") {
                                        yield StreamEvent::Refused;
                                    }
                                }
                            }
                            Err(e) => {
                                debug!("skipping malformed stream line: {}", e);
                            }
                        }
                    }
                }
            }
            yield StreamEvent::Done;
        })
    }
}

#[async_trait]
impl ModelClient for LlmClient {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let mut stream = self.chat_stream(messages);
        let mut text = String::new();
        while let Some(ev) = stream.next().await {
            match ev? {
                StreamEvent::Content(t) => text.push_str(&t),
                StreamEvent::Refused => return Err(ModelError::Refused(text)),
                StreamEvent::Done => break,
            }
        }
        if text.trim().is_empty() {
            return Err(ModelError::Empty);
        }
        Ok(text)
    }
}

/// Splits a byte stream into trimmed lines. Bytes are buffered until a
/// newline arrives, so a character split across chunks decodes intact.
#[derive(Debug, Default)]
struct SseLines {
    buf: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }
}

#[derive(Debug)]
pub enum StreamEvent {
    Content(String),
    Refused,
    Done,
}

// Minimal chunk structures for OpenAI-like streaming
#[derive(Debug, Deserialize)]
struct Chunk {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    delta: Option<Delta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_turns_fold_onto_chat_roles() {
        let code = ChatMessage::new(Role::Code, "print(1)").to_wire();
        assert_eq!(code["role"], "assistant");
        let result = ChatMessage::new(Role::CodeResult, "1").to_wire();
        assert_eq!(result["role"], "user");
        assert_eq!(result["content"], "Code output:\n1");
        let user = ChatMessage::new(Role::User, "hi").to_wire();
        assert_eq!(user["role"], "user");
    }

    #[test]
    fn transient_classification() {
        assert!(ModelError::Timeout.is_transient());
        assert!(ModelError::Empty.is_transient());
        assert!(ModelError::Status { code: 503, body: String::new() }.is_transient());
        assert!(ModelError::Status { code: 429, body: String::new() }.is_transient());
        assert!(!ModelError::Status { code: 401, body: String::new() }.is_transient());
        assert!(!ModelError::Transport("dns".into()).is_transient());
        assert!(!ModelError::Refused(String::new()).is_transient());
    }

    #[test]
    fn role_names_round_trip() {
        for role in [Role::System, Role::User, Role::Assistant, Role::Code, Role::CodeResult] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("tool"), None);
    }

    #[test]
    fn characters_split_across_chunks_decode_intact() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"Umsatz f\u{fc}r 2023\"}}]}\n";
        let bytes = line.as_bytes();
        let split = line.find('\u{fc}').unwrap() + 1; // inside the two-byte ü
        let mut lines = SseLines::default();
        assert!(lines.push(&bytes[..split]).is_empty());
        let out = lines.push(&bytes[split..]);
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("Umsatz für 2023"));
        assert!(!out[0].contains('\u{fffd}'));
    }

    #[test]
    fn max_tokens_out_of_range_is_dropped() {
        let cfg = Config::from_pairs([("MAX_TOKENS", "5000000000")]);
        assert_eq!(ChatOptions::from_config(&cfg).max_tokens, None);
        let cfg = Config::from_pairs([("MAX_TOKENS", "2048")]);
        assert_eq!(ChatOptions::from_config(&cfg).max_tokens, Some(2048));
    }

    #[test]
    fn base_url_gets_v1_suffix() {
        let cfg = Config::from_pairs([("API_BASE_URL", "http://localhost:8080/")]);
        let client = LlmClient::from_config(&cfg).unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
