//! OpenAI-compatible chat-completions adapter for the [`TextGenerator`] port.

use std::time::Duration;

use agent_core::{CallPurpose, Generation, GenerationRequest, ProviderError, TextGenerator, Usage};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ConfigError, LlmConfig};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_keys: Vec<String>,
    pub model: String,
    pub lightweight_model: Option<String>,
    pub api_base: String,
    pub temperature: f32,
    pub timeout: Duration,
    pub rotate_keys_on_rate_limit: bool,
}

impl OpenAiConfig {
    pub fn from_settings(settings: &LlmConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            api_keys: settings.api_keys.clone(),
            model: settings.model.clone(),
            lightweight_model: settings.lightweight_model.clone(),
            api_base: settings.api_base.clone(),
            temperature: settings.temperature,
            timeout: settings.timeout()?,
            rotate_keys_on_rate_limit: settings.rotate_keys_on_rate_limit,
        })
    }

    fn model_for(&self, purpose: CallPurpose) -> &str {
        match (&self.lightweight_model, purpose.is_lightweight()) {
            (Some(model), true) => model,
            _ => &self.model,
        }
    }
}

pub struct OpenAiTextGenerator {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiTextGenerator {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        if config.api_keys.is_empty() {
            return Err(ProviderError::Unavailable(
                "missing OpenAI API key (set OPENAI_API_KEY or llm.api_keys)".into(),
            ));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ProviderError::Unavailable(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, config })
    }

    fn build_body(&self, request: &GenerationRequest) -> ChatCompletionRequest {
        let mut system = request.system.clone();
        let response_format = request.schema.as_ref().map(|schema| {
            system.push_str(&format!(
                "\n\nRespond with a single JSON object matching the \"{}\" schema:\n{}",
                schema.name, schema.schema
            ));
            ResponseFormat {
                r#type: "json_object".to_string(),
            }
        });
        ChatCompletionRequest {
            model: self.config.model_for(request.purpose).to_string(),
            temperature: request.temperature.unwrap_or(self.config.temperature),
            max_tokens: request.max_tokens,
            response_format,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.prompt.clone(),
                },
            ],
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiTextGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, ProviderError> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let body = self.build_body(&request);

        let keys = &self.config.api_keys;
        let mut attempt = 0usize;
        loop {
            let key = keys
                .get(attempt)
                .ok_or_else(|| ProviderError::Unavailable("no OpenAI API key left to try".into()))?;
            let response = match self
                .client
                .post(&url)
                .bearer_auth(key)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) if err.is_timeout() => {
                    return Err(ProviderError::Timeout(
                        humantime::format_duration(self.config.timeout).to_string(),
                    ));
                }
                Err(err) => {
                    return Err(ProviderError::Transport(format!(
                        "openai request failed: {err}"
                    )));
                }
            };

            let status = response.status();
            if !status.is_success() {
                let text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<response unavailable>".to_string());
                if status != StatusCode::TOO_MANY_REQUESTS {
                    return Err(ProviderError::Status {
                        status: status.as_u16(),
                        body: text,
                    });
                }
                let friendly = openai_rate_limit_message(&text);
                if self.config.rotate_keys_on_rate_limit && attempt == 0 && keys.len() > 1 {
                    warn!(
                        target: "openai",
                        message = %friendly,
                        purpose = %request.purpose,
                        "OpenAI rate limited request; resending once with the next API key"
                    );
                    attempt += 1;
                    continue;
                }
                return Err(ProviderError::Status {
                    status: status.as_u16(),
                    body: friendly,
                });
            }

            let response: ChatCompletionResponse = response.json().await.map_err(|err| {
                ProviderError::InvalidResponse(format!("openai response invalid: {err}"))
            })?;

            let text = response
                .choices
                .first()
                .and_then(|choice| choice.message.content.as_ref())
                .and_then(ChatCompletionContent::as_text)
                .ok_or_else(|| ProviderError::InvalidResponse("openai response missing content".into()))?;
            let requests = attempt as u64 + 1;
            debug!(
                target: "openai",
                purpose = %request.purpose,
                model = %body.model,
                chars = text.len(),
                requests,
                "chat completion received"
            );

            let usage = response.usage.unwrap_or_default();
            return Ok(Generation {
                text,
                usage: Some(Usage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                    requests,
                }),
                model: Some(response.model.unwrap_or_else(|| body.model.clone())),
            });
        }
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    #[serde(default)]
    content: Option<ChatCompletionContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatCompletionContent {
    Text(String),
    Parts(Vec<ChatCompletionPart>),
}

impl ChatCompletionContent {
    fn as_text(&self) -> Option<String> {
        match self {
            ChatCompletionContent::Text(value) => Some(value.clone()),
            ChatCompletionContent::Parts(parts) => {
                let text = parts
                    .iter()
                    .filter_map(|part| part.text.as_ref())
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n");
                if text.is_empty() {
                    None
                } else {
                    Some(text)
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChatCompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorEnvelope {
    error: OpenAiErrorMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorMessage {
    message: Option<String>,
}

fn openai_rate_limit_message(raw: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<OpenAiErrorEnvelope>(raw) {
        if let Some(message) = envelope.error.message {
            return format!(
                "OpenAI rate limit exceeded: {}. Please retry later or configure a higher tier.",
                message.trim()
            );
        }
    }
    "OpenAI rate limit exceeded; please retry later or reduce usage.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::ResponseSchema;
    use serde_json::Value;

    fn config() -> OpenAiConfig {
        OpenAiConfig {
            api_keys: vec!["sk-test".into()],
            model: "gpt-4o".into(),
            lightweight_model: Some("gpt-4o-mini".into()),
            api_base: "http://localhost:1/v1".into(),
            temperature: 0.2,
            timeout: Duration::from_secs(5),
            rotate_keys_on_rate_limit: true,
        }
    }

    #[test]
    fn missing_keys_are_rejected() {
        let mut config = config();
        config.api_keys.clear();
        assert!(matches!(
            OpenAiTextGenerator::new(config),
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[test]
    fn lightweight_purposes_use_the_cheap_model() {
        let generator = OpenAiTextGenerator::new(config()).unwrap();
        let critic = generator.build_body(&GenerationRequest::new(CallPurpose::Critic, "s", "p"));
        assert_eq!(critic.model, "gpt-4o-mini");
        let planning = generator.build_body(&GenerationRequest::new(CallPurpose::Planning, "s", "p"));
        assert_eq!(planning.model, "gpt-4o");
        assert!(planning.response_format.is_none());
    }

    #[test]
    fn schema_requests_json_mode_and_describes_shape() {
        let generator = OpenAiTextGenerator::new(config()).unwrap();
        let request = GenerationRequest::new(CallPurpose::Critic, "judge", "page")
            .with_schema(ResponseSchema {
                name: "critic",
                schema: serde_json::json!({"type": "object"}),
            })
            .with_temperature(0.0);
        let body = serde_json::to_value(generator.build_body(&request)).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["temperature"], 0.0);
        assert!(body["messages"][0]["content"]
            .as_str()
            .unwrap()
            .contains("\"critic\" schema"));
        assert_eq!(body.get("max_tokens"), None::<&Value>);
    }

    #[test]
    fn content_parts_are_joined() {
        let response: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":[{"type":"text","text":"{\"a\":"},{"type":"text","text":"1}"}]}}]}"#,
        )
        .unwrap();
        let text = response.choices[0]
            .message
            .content
            .as_ref()
            .and_then(ChatCompletionContent::as_text);
        assert_eq!(text.as_deref(), Some("{\"a\":\n1}"));
    }

    #[test]
    fn rate_limit_message_uses_provider_text() {
        let message =
            openai_rate_limit_message(r#"{"error":{"message":"Slow down ","type":"requests"}}"#);
        assert!(message.contains("Slow down."));
        assert!(openai_rate_limit_message("<html>").contains("retry later"));
    }
}
