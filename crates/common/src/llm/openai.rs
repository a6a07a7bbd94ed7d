//! OpenAI-compatible chat completions client

use super::{ModelInvocation, ModelResponse, ReasoningModel};
use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Chat-completions reasoning model
pub struct OpenAIChatModel {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: usize,
    retry_budget: Duration,
}

impl OpenAIChatModel {
    pub fn new(api_key: String, config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            retry_budget: Duration::from_secs(config.retry_budget_secs),
        })
    }

    fn build_request(&self, invocation: &ModelInvocation) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: format!(
                        "You are a biomedical analysis assistant. Reply with one JSON object \
                         matching this shape and nothing else: {}",
                        invocation.schema_hint
                    ),
                },
                ChatMessage {
                    role: "user",
                    content: invocation.prompt.clone(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: invocation.temperature,
            response_format: ResponseFormat { kind: "json_object" },
        }
    }

    /// One HTTP round trip; network failures, 429 and 5xx are transient
    async fn call_once(&self, request: &ChatRequest) -> std::result::Result<String, backoff::Error<AppError>> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                backoff::Error::transient(AppError::Upstream {
                    message: format!("LLM API request failed: {}", e),
                })
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = AppError::Upstream {
                message: format!("LLM API error {}: {}", status, body),
            };
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                backoff::Error::transient(error)
            } else {
                backoff::Error::permanent(error)
            });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            backoff::Error::permanent(AppError::Upstream {
                message: format!("Failed to parse LLM response: {}", e),
            })
        })?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                backoff::Error::permanent(AppError::Upstream {
                    message: "Empty response from LLM".to_string(),
                })
            })
    }
}

#[async_trait]
impl ReasoningModel for OpenAIChatModel {
    async fn invoke(&self, invocation: &ModelInvocation) -> Result<ModelResponse> {
        let request = self.build_request(invocation);
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.retry_budget),
            ..ExponentialBackoff::default()
        };

        let content = retry(policy, || async {
            self.call_once(&request).await.map_err(|e| {
                if let backoff::Error::Transient { err, .. } = &e {
                    tracing::warn!(stage = %invocation.stage, error = %err, "LLM call failed, retrying");
                }
                e
            })
        })
        .await?;

        Ok(ModelResponse::Text(content))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
