// Eidolon Engine — OpenAI-Compatible Backend
// Non-streaming chat completions against any /chat/completions endpoint
// (SiliconFlow, OpenAI, OpenRouter, Ollama, vLLM…). Bearer-token auth.
//
// Retry policy: transient statuses (408, 429, 5xx) retry up to MAX_RETRIES
// with exponential backoff; auth errors (401/403) never retry; everything
// else fails immediately. Exhaustion surfaces EngineError::Upstream carrying
// the upstream message.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::ChatMessage;
use async_trait::async_trait;
use log::{error, info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{ChatBackend, ModelConfig, TierConfig};

pub(crate) const MAX_RETRIES: u32 = 2;

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(500u64 << attempt)
}

pub struct OpenAiCompatibleBackend {
    client: Client,
    api_url: String,
    api_key: String,
}

impl OpenAiCompatibleBackend {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn format_messages(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect()
    }

    fn extract_reply(body: &Value) -> Option<String> {
        body["choices"]
            .get(0)?
            .pointer("/message/content")?
            .as_str()
            .map(|s| s.trim().to_string())
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatibleBackend {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tier: &TierConfig,
    ) -> EngineResult<String> {
        let body = json!({
            "model": tier.model,
            "messages": Self::format_messages(messages),
            "temperature": tier.temperature,
            "max_tokens": tier.max_tokens,
            "stream": false,
        });

        info!("[providers] request model={} messages={}", tier.model, messages.len());

        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay(attempt - 1);
                warn!(
                    "[providers] retry {}/{} after {}ms",
                    attempt,
                    MAX_RETRIES,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(&self.api_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = format!("HTTP request failed: {e}");
                    if attempt < MAX_RETRIES {
                        continue;
                    }
                    return Err(EngineError::upstream(last_error));
                }
            };

            let status = response.status().as_u16();
            if !response.status().is_success() {
                let body_text = response.text().await.unwrap_or_default();
                let snippet: String = body_text.chars().take(200).collect();
                last_error = format!("API error {status}: {snippet}");
                error!("[providers] {last_error}");

                if status == 401 || status == 403 {
                    return Err(EngineError::upstream(last_error));
                }
                if is_retryable_status(status) && attempt < MAX_RETRIES {
                    continue;
                }
                return Err(EngineError::upstream(last_error));
            }

            let parsed: Value = match response.json().await {
                Ok(v) => v,
                Err(e) => {
                    last_error = format!("Malformed response body: {e}");
                    if attempt < MAX_RETRIES {
                        continue;
                    }
                    return Err(EngineError::upstream(last_error));
                }
            };

            return match Self::extract_reply(&parsed) {
                Some(text) => Ok(text),
                None => Err(EngineError::upstream(format!(
                    "response carried no choices: {}",
                    parsed.to_string().chars().take(200).collect::<String>()
                ))),
            };
        }

        Err(EngineError::upstream(last_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for s in [408, 429, 500, 502, 503, 504] {
            assert!(is_retryable_status(s), "{s} should retry");
        }
        for s in [400, 401, 403, 404, 422] {
            assert!(!is_retryable_status(s), "{s} should not retry");
        }
    }

    #[test]
    fn extract_reply_reads_first_choice() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "  hello  "}}]
        });
        assert_eq!(OpenAiCompatibleBackend::extract_reply(&body).unwrap(), "hello");
    }

    #[test]
    fn extract_reply_none_on_empty_choices() {
        let body = json!({"choices": []});
        assert!(OpenAiCompatibleBackend::extract_reply(&body).is_none());
    }
}
