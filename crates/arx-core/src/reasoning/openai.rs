//! OpenAI-compatible chat completions backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use serde_json::json;

use super::{BackendReply, Prompt, ReasoningBackend};
use crate::errors::{ConfigError, ConfigResult, ReasoningError, ReasoningResult};
use crate::settings::Settings;

const USER_AGENT_VALUE: &str = concat!("arx/", env!("CARGO_PKG_VERSION"));

pub struct OpenAiBackend {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> ConfigResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::InvalidSettings {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            model: model.into(),
            temperature: 0.7,
            max_tokens: 2000,
            api_key: api_key.into(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            client,
        })
    }

    pub fn from_settings(settings: &Settings) -> ConfigResult<Self> {
        let key = settings
            .api_key
            .clone()
            .ok_or_else(|| ConfigError::InvalidSettings {
                reason: "OPENAI_API_KEY environment variable is required".into(),
            })?;
        let mut backend = Self::new(&settings.base_url, key, settings.model.clone())?;
        backend.temperature = settings.temperature;
        backend.max_tokens = settings.max_tokens;
        Ok(backend)
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl ReasoningBackend for OpenAiBackend {
    async fn complete(&self, prompt: &Prompt) -> ReasoningResult<BackendReply> {
        let mut messages = Vec::new();
        if !prompt.system.is_empty() {
            messages.push(json!({"role": "system", "content": prompt.system}));
        }
        messages.push(json!({"role": "user", "content": prompt.user}));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ReasoningError::BackendUnavailable {
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ReasoningError::BackendRateLimit {
                retry_after: retry_after(resp.headers()),
            });
        }
        if status.is_server_error() {
            return Err(ReasoningError::BackendUnavailable {
                message: format!("backend returned {status}"),
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ReasoningError::protocol(format!(
                "backend returned {status}: {text}"
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ReasoningError::protocol(format!("invalid response body: {e}")))?;

        let text = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ReasoningError::protocol("response missing choices[0].message.content"))?
            .to_string();
        let model = json
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&self.model)
            .to_string();

        Ok(BackendReply { text, model })
    }

    fn backend_name(&self) -> &'static str {
        "openai"
    }
}
