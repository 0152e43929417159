//! OpenAI-compatible chat completion client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::traits::{Completion, CompletionClient, CompletionError, CompletionRequest};
use crate::config::{ApiKey, CompletionConfig};
use crate::error::{ExploreError, Result};
use crate::utils::truncate_chars;

const ERROR_BODY_CAP_CHARS: usize = 500;

#[derive(Clone, Debug)]
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    api_key: ApiKey,
    model: String,
    timeout_ms: u64,
    max_retries: u32,
    retry_delay_ms: u64,
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    /// Build a client from immutable configuration. The credential is required.
    pub fn new(config: &CompletionConfig, api_key: ApiKey) -> Result<Self> {
        if api_key.is_blank() {
            return Err(ExploreError::config("Completion client requires an API key"));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ExploreError::config(format!("Failed to build HTTP client: {e}")))?;

        // Ensure endpoint has the correct path if not provided
        let base = config.base_url.trim_end_matches('/');
        let endpoint = if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/chat/completions")
        };

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: config.model.clone(),
            timeout_ms: config.timeout_ms,
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
            temperature: config.temperature,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_once(&self, request: &CompletionRequest) -> std::result::Result<String, CompletionError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            response_format: request.structured.then_some(ResponseFormat {
                kind: "json_object",
            }),
            temperature: self.temperature,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CompletionError::Http {
                status: status.as_u16(),
                body: truncate_chars(text.trim(), ERROR_BODY_CAP_CHARS),
            });
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                CompletionError::Timeout {
                    timeout_ms: self.timeout_ms,
                }
            } else {
                CompletionError::Decode(e.to_string())
            }
        })?;

        if let Some(served_by) = parsed.model.as_deref()
            && served_by != self.model
        {
            debug!("Completion served by model {}", served_by);
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(CompletionError::EmptyResponse);
        }
        Ok(content)
    }

    fn map_transport(&self, err: reqwest::Error) -> CompletionError {
        if err.is_timeout() {
            CompletionError::Timeout {
                timeout_ms: self.timeout_ms,
            }
        } else {
            CompletionError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<Completion, CompletionError> {
        let started = Instant::now();
        let per_attempt = Duration::from_millis(self.timeout_ms);
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(CompletionError::Cancelled),
                res = tokio::time::timeout(per_attempt, self.send_once(&request)) => match res {
                    Ok(inner) => inner,
                    Err(_) => Err(CompletionError::Timeout { timeout_ms: self.timeout_ms }),
                },
            };

            match result {
                Ok(text) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    debug!(
                        "Completion received (model={}, chars={}, latency_ms={}, attempts={})",
                        self.model,
                        text.len(),
                        latency_ms,
                        attempt + 1
                    );
                    return Ok(Completion {
                        text,
                        model: self.model.clone(),
                        latency_ms,
                    });
                }
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    // Retry with simple exponential backoff
                    let delay_ms = self.retry_delay_ms.saturating_mul(1u64 << attempt.min(16));
                    warn!(
                        "Completion attempt {} failed ({}), retrying in {}ms",
                        attempt + 1,
                        err,
                        delay_ms
                    );
                    attempt += 1;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(CompletionError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}
