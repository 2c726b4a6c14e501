use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::error::{PromptPagesError, Result};
use crate::models::{ChatRequest, ChatResponse};

const MAX_RETRIES: u8 = 5;
const MAX_RETRY_DURATION: Duration = Duration::from_secs(300); // 5 minutes max

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;
}

pub struct OpenAiTransport {
    client: Client,
    endpoint: String,
    api_key: String,
    base_delay: Duration,
}

impl OpenAiTransport {
    pub fn new(client: Client, base_url: &str, api_key: String) -> Self {
        Self {
            client,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            base_delay: Duration::from_millis(200),
        }
    }

    #[cfg(test)]
    fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

#[async_trait]
impl ChatTransport for OpenAiTransport {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let start_time = Instant::now();
        let mut attempts = 0;

        while attempts < MAX_RETRIES {
            if start_time.elapsed() > MAX_RETRY_DURATION {
                return Err(PromptPagesError::Internal(format!(
                    "Chat completion timed out after {} seconds (max retry duration exceeded)",
                    MAX_RETRY_DURATION.as_secs()
                )));
            }

            attempts += 1;

            match self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(req)
                .send()
                .await
            {
                Ok(response) => {
                    if response.status().is_success() {
                        return response.json().await.map_err(|e| {
                            PromptPagesError::Upstream(format!(
                                "Failed to parse chat completion response: {e}"
                            ))
                        });
                    }

                    let status = response.status();
                    // Auth and request-shape problems will not improve on retry
                    if status.is_client_error() && status.as_u16() != 429 {
                        return Err(PromptPagesError::Upstream(format!(
                            "Chat completion rejected ({status}): {}",
                            response
                                .text()
                                .await
                                .unwrap_or_else(|_| "Unknown error".to_string())
                        )));
                    }

                    if attempts >= MAX_RETRIES {
                        return Err(PromptPagesError::Upstream(format!(
                            "Chat completion error after {} attempts: {}",
                            attempts,
                            response
                                .text()
                                .await
                                .unwrap_or_else(|_| "Unknown error".to_string())
                        )));
                    }
                    tracing::warn!(%status, attempt = attempts, "chat completion failed, retrying");
                }
                Err(e) => {
                    if attempts >= MAX_RETRIES {
                        return Err(PromptPagesError::Internal(format!(
                            "Failed to send chat completion request after {attempts} attempts: {e}"
                        )));
                    }
                    tracing::warn!(error = %e, attempt = attempts, "chat completion request error, retrying");
                }
            }

            // Exponential backoff with jitter (only if we're going to retry)
            if attempts < MAX_RETRIES {
                let base_delay = self.base_delay * 2u32.pow(attempts.saturating_sub(1) as u32);
                let jitter = rand::thread_rng().gen_range(0.8..=1.2);
                let delay = Duration::from_millis((base_delay.as_millis() as f64 * jitter) as u64);

                // Cap the delay to prevent excessive waiting
                let max_delay = Duration::from_secs(30);
                let final_delay = std::cmp::min(delay, max_delay);

                sleep(final_delay).await;
            }
        }

        Err(PromptPagesError::Internal(format!(
            "Chat completion failed after {MAX_RETRIES} attempts"
        )))
    }
}
