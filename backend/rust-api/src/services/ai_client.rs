//! Boundary to the generative text backend.
//!
//! Callers get either validated data or an [`UpstreamError`]; the heuristics
//! for digging JSON out of free-form model output live only in this module.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::AiSettings;
use crate::error::UpstreamError;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String, UpstreamError>;
}

/// Used when no AI backend is configured; every call fails immediately so
/// callers go straight to their fallback content.
pub struct DisabledTextGenerator;

#[async_trait]
impl TextGenerator for DisabledTextGenerator {
    async fn generate_text(&self, _prompt: &str) -> Result<String, UpstreamError> {
        Err(UpstreamError::Disabled)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionRequest<'a> {
    model_uri: String,
    completion_options: CompletionOptions,
    messages: Vec<CompletionMessage<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionOptions {
    stream: bool,
    temperature: f32,
    max_tokens: String,
}

#[derive(Debug, Serialize)]
struct CompletionMessage<'a> {
    role: &'static str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    result: CompletionResult,
}

#[derive(Debug, Deserialize)]
struct CompletionResult {
    alternatives: Vec<CompletionAlternative>,
}

#[derive(Debug, Deserialize)]
struct CompletionAlternative {
    message: AlternativeMessage,
}

#[derive(Debug, Deserialize)]
struct AlternativeMessage {
    text: String,
}

/// YandexGPT foundation-model completion client.
pub struct YandexGptClient {
    http_client: Client,
    settings: AiSettings,
}

impl YandexGptClient {
    pub fn new(settings: AiSettings) -> Result<Self, UpstreamError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(UpstreamError::Transport)?;

        Ok(Self {
            http_client,
            settings,
        })
    }

    fn model_uri(&self) -> String {
        format!("gpt://{}/{}/latest", self.settings.folder_id, self.settings.model)
    }
}

#[async_trait]
impl TextGenerator for YandexGptClient {
    async fn generate_text(&self, prompt: &str) -> Result<String, UpstreamError> {
        let request = CompletionRequest {
            model_uri: self.model_uri(),
            completion_options: CompletionOptions {
                stream: false,
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens.to_string(),
            },
            messages: vec![CompletionMessage {
                role: "user",
                text: prompt,
            }],
        };

        tracing::debug!(
            "Calling AI completion endpoint {} (prompt {} chars)",
            self.settings.endpoint,
            prompt.len()
        );

        let response = self
            .http_client
            .post(&self.settings.endpoint)
            .header("Authorization", format!("Api-Key {}", self.settings.api_key))
            .header("x-folder-id", &self.settings.folder_id)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    UpstreamError::Auth(status.as_u16())
                }
                StatusCode::NOT_FOUND => UpstreamError::NotFound,
                _ => UpstreamError::Status {
                    status: status.as_u16(),
                    body,
                },
            });
        }

        let completion: CompletionResponse = response.json().await?;
        let text = completion
            .result
            .alternatives
            .into_iter()
            .next()
            .map(|alternative| alternative.message.text)
            .ok_or_else(|| UpstreamError::Malformed("no alternatives in completion".into()))?;

        if text.trim().is_empty() {
            return Err(UpstreamError::Malformed("empty completion".into()));
        }

        Ok(text)
    }
}

/// Sends `prompt` and decodes the first JSON object in the reply as `T`.
pub async fn generate_structured<T: DeserializeOwned>(
    generator: &dyn TextGenerator,
    prompt: &str,
) -> Result<T, UpstreamError> {
    let raw = generator.generate_text(prompt).await?;
    parse_json_reply(&raw)
}

pub fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> Result<T, UpstreamError> {
    let value = extract_json_object(raw)
        .ok_or_else(|| UpstreamError::Malformed("no JSON object in reply".into()))?;
    Ok(serde_json::from_value(value)?)
}

/// Finds the first complete JSON object in `raw`, skipping code fences,
/// prose before it and anything after it.
pub fn extract_json_object(raw: &str) -> Option<Value> {
    raw.match_indices('{').find_map(|(start, _)| {
        let mut stream = serde_json::Deserializer::from_str(&raw[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value @ Value::Object(_))) => Some(value),
            _ => None,
        }
    })
}

/// Accepts a JSON number or a numeric string such as `"1,250"` or `"$4.50"`.
pub fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .trim_start_matches('$')
                .chars()
                .filter(|c| *c != ',' && !c.is_whitespace())
                .collect();
            cleaned.parse::<f64>().ok()?
        }
        _ => return None,
    };
    number.is_finite().then_some(number)
}
