use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;

use rentdesk_core::config::AppConfig;
use rentdesk_core::ChatMessage;

const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("completion transport failed: {0}")]
    Transport(String),
    #[error("completion endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion response was not understood: {0}")]
    InvalidResponse(String),
    #[error("completion response carried no text")]
    EmptyCompletion,
    #[error("completion timed out after {0}s")]
    Timeout(u64),
}

/// Text completion over an ordered role/content message list.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

/// Image analysis for attachments. The image is passed as raw bytes.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn describe(&self, prompt: &str, image: &[u8], mime_type: &str)
        -> Result<String, LlmError>;
}

#[derive(Clone, Debug)]
pub struct CompletionSettings {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub vision_model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl CompletionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.llm_base_url(),
            api_key: config.llm.api_key.clone(),
            model: config.llm.model.clone(),
            vision_model: config.llm.vision_model.clone(),
            temperature: config.llm.temperature,
            timeout: Duration::from_secs(config.llm.timeout_secs),
        }
    }
}

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire format
/// (OpenAI itself, Ollama's compatibility layer, local gateways).
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    settings: CompletionSettings,
}

impl OpenAiCompatibleClient {
    pub fn new(settings: CompletionSettings) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &CompletionSettings {
        &self.settings
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }

    async fn post(&self, body: Value) -> Result<String, LlmError> {
        let mut request = self.http.post(self.endpoint()).json(&body);
        if let Some(api_key) = &self.settings.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout(self.settings.timeout.as_secs())
            } else {
                LlmError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        let payload: Value =
            response.json().await.map_err(|error| LlmError::InvalidResponse(error.to_string()))?;
        parse_completion(&payload)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = build_chat_request(&self.settings.model, self.settings.temperature, messages);
        tracing::debug!(
            event_name = "assistant.completion.requested",
            model = %self.settings.model,
            messages = messages.len(),
            "requesting chat completion"
        );
        self.post(body).await
    }
}

#[async_trait]
impl VisionClient for OpenAiCompatibleClient {
    async fn describe(
        &self,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, LlmError> {
        let body = build_vision_request(&self.settings.vision_model, prompt, image, mime_type);
        tracing::debug!(
            event_name = "assistant.vision.requested",
            model = %self.settings.vision_model,
            bytes = image.len(),
            "requesting image analysis"
        );
        self.post(body).await
    }
}

pub fn build_chat_request(model: &str, temperature: f32, messages: &[ChatMessage]) -> Value {
    json!({
        "model": model,
        "temperature": temperature,
        "messages": messages,
    })
}

pub fn build_vision_request(model: &str, prompt: &str, image: &[u8], mime_type: &str) -> Value {
    let data_url = format!("data:{mime_type};base64,{}", BASE64.encode(image));
    json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                { "type": "image_url", "image_url": { "url": data_url } },
            ],
        }],
    })
}

/// Reads `choices[0].message.content`, trimmed.
pub fn parse_completion(payload: &Value) -> Result<String, LlmError> {
    let content = payload
        .pointer("/choices/0/message/content")
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".to_owned()))?;
    let text = content
        .as_str()
        .ok_or_else(|| LlmError::InvalidResponse("message content is not a string".to_owned()))?
        .trim();

    if text.is_empty() {
        return Err(LlmError::EmptyCompletion);
    }
    Ok(text.to_owned())
}
